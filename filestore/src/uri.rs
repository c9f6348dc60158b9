//! URI helpers.
//!
//! A file name is either a bare local path or `scheme://host/path`. A
//! single-character "scheme" is a Windows drive letter, not a scheme.

const SCHEME_SEPARATOR: &str = "://";

/// Scheme of `uri`, empty for local paths.
#[must_use]
pub fn scheme(uri: &str) -> &str {
    match uri.find(SCHEME_SEPARATOR) {
        Some(pos) if pos > 1 => &uri[..pos],
        _ => "",
    }
}

#[must_use]
pub fn is_local(uri: &str) -> bool {
    scheme(uri).is_empty()
}

/// A scheme name usable by a driver: non-empty ASCII alphanumeric.
#[must_use]
pub fn is_valid_scheme(scheme: &str) -> bool {
    !scheme.is_empty() && scheme.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Check the URI syntax.
///
/// Local paths are always accepted. Otherwise the scheme must be valid and
/// the part after `scheme://` must contain a `/` before any `:`.
#[must_use]
pub fn is_well_formed(uri: &str) -> bool {
    let scheme = scheme(uri);
    if scheme.is_empty() {
        return true;
    }
    if !is_valid_scheme(scheme) {
        return false;
    }
    let rest = &uri[scheme.len() + SCHEME_SEPARATOR.len()..];
    match (rest.find('/'), rest.find(':')) {
        (Some(slash), Some(colon)) => slash < colon,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Path component of `uri`: after `scheme://host`, or the whole local path.
#[must_use]
pub fn path(uri: &str) -> &str {
    let scheme = scheme(uri);
    if scheme.is_empty() {
        return uri;
    }
    let rest = &uri[scheme.len() + SCHEME_SEPARATOR.len()..];
    rest.find('/').map_or("", |pos| &rest[pos..])
}

//! Newline scanning in 16-byte strides.

const STRIDE: usize = 16;

/// Count `\n` bytes.
#[must_use]
pub fn count_newlines(bytes: &[u8]) -> usize {
    let mut chunks = bytes.chunks_exact(STRIDE);
    let mut count = 0;
    for chunk in &mut chunks {
        count += usize::from(chunk[0] == b'\n')
            + usize::from(chunk[1] == b'\n')
            + usize::from(chunk[2] == b'\n')
            + usize::from(chunk[3] == b'\n')
            + usize::from(chunk[4] == b'\n')
            + usize::from(chunk[5] == b'\n')
            + usize::from(chunk[6] == b'\n')
            + usize::from(chunk[7] == b'\n')
            + usize::from(chunk[8] == b'\n')
            + usize::from(chunk[9] == b'\n')
            + usize::from(chunk[10] == b'\n')
            + usize::from(chunk[11] == b'\n')
            + usize::from(chunk[12] == b'\n')
            + usize::from(chunk[13] == b'\n')
            + usize::from(chunk[14] == b'\n')
            + usize::from(chunk[15] == b'\n');
    }
    count
        + chunks
            .remainder()
            .iter()
            .filter(|&&byte| byte == b'\n')
            .count()
}

/// Index of the first `\n`, if any.
#[must_use]
pub fn find_eol(bytes: &[u8]) -> Option<usize> {
    let mut chunks = bytes.chunks_exact(STRIDE);
    let mut offset = 0;
    for chunk in &mut chunks {
        if count_newlines(chunk) > 0 {
            return chunk
                .iter()
                .position(|&byte| byte == b'\n')
                .map(|pos| offset + pos);
        }
        offset += STRIDE;
    }
    chunks
        .remainder()
        .iter()
        .position(|&byte| byte == b'\n')
        .map(|pos| offset + pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn naive_count(bytes: &[u8]) -> usize {
        bytes.iter().filter(|&&b| b == b'\n').count()
    }

    #[test]
    fn test_count_empty() {
        assert_eq!(count_newlines(b""), 0);
        assert_eq!(find_eol(b""), None);
    }

    #[test]
    fn test_count_around_stride() {
        for len in [15usize, 16, 17, 31, 32, 33] {
            let bytes = vec![b'\n'; len];
            assert_eq!(count_newlines(&bytes), len);
        }
    }

    #[test]
    fn test_find_eol_in_tail() {
        let mut bytes = vec![b'x'; 35];
        bytes[33] = b'\n';
        assert_eq!(find_eol(&bytes), Some(33));
        bytes[17] = b'\n';
        assert_eq!(find_eol(&bytes), Some(17));
    }

    proptest! {
        #[test]
        fn test_unrolled_count_matches_naive(bytes in prop::collection::vec(prop_oneof![Just(b'\n'), any::<u8>()], 0..300)) {
            prop_assert_eq!(count_newlines(&bytes), naive_count(&bytes));
        }

        #[test]
        fn test_find_eol_matches_position(bytes in prop::collection::vec(prop_oneof![Just(b'\n'), Just(b'a')], 0..100)) {
            prop_assert_eq!(find_eol(&bytes), bytes.iter().position(|&b| b == b'\n'));
        }
    }
}

use super::scan::{count_newlines, find_eol};
use crate::error::FileError;
use crate::system_file::SystemFile;

/// Default block size of a [`ByteCache`].
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Error type for cache allocation
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("unable to allocate a buffer of {requested} bytes")]
    Allocation { requested: usize },
}

#[derive(Clone, Debug)]
enum Storage {
    /// `len <= block_size`, the vector length is the logical length.
    Single(Vec<u8>),
    /// `len > block_size`, `ceil(len / block_size)` full-size blocks.
    /// Bytes past `len` in the last block are zero.
    Blocks(Vec<Box<[u8]>>),
}

/// Outcome of [`ByteCache::read_line`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRead {
    /// Line length, newline excluded. Whole read length when no newline.
    pub length: usize,
    /// A newline terminates the line.
    pub eol: bool,
    /// The read stopped short of the cache length.
    pub eof: bool,
}

/// Growable byte buffer that is not limited to one allocation.
///
/// Up to one block the content is a single vector. Above, it is split into
/// fixed-size blocks so that very large buffers never require one huge
/// contiguous allocation. Both layouts sit behind the same range-checked API.
///
/// # Example
///
/// ```
/// use filestore::cache::ByteCache;
///
/// let mut cache = ByteCache::with_block_size(16);
/// cache.extend_from_slice(b"first line\nsecond line\n");
/// assert!(cache.is_multi_block());
/// assert_eq!(cache.compute_line_number(0, cache.len()), 2);
/// ```
#[derive(Clone, Debug)]
pub struct ByteCache {
    block_size: usize,
    len: usize,
    storage: Storage,
}

fn alloc_zeroed(size: usize) -> Result<Vec<u8>, CacheError> {
    let mut block = Vec::new();
    block
        .try_reserve_exact(size)
        .map_err(|_| CacheError::Allocation { requested: size })?;
    block.resize(size, 0);
    Ok(block)
}

impl ByteCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// # Panics
    /// If `block_size` is zero or not a multiple of 16.
    #[must_use]
    pub fn with_block_size(block_size: usize) -> Self {
        assert!(
            block_size > 0 && block_size % 16 == 0,
            "block size must be a positive multiple of 16, got {block_size}"
        );
        Self {
            block_size,
            len: 0,
            storage: Storage::Single(Vec::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[must_use]
    pub fn is_multi_block(&self) -> bool {
        matches!(self.storage, Storage::Blocks(_))
    }

    /// Allocated bytes
    #[must_use]
    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Single(bytes) => bytes.capacity(),
            Storage::Blocks(blocks) => blocks.len() * self.block_size,
        }
    }

    /// Change the logical length.
    ///
    /// The common prefix is kept, new bytes are zero. On failure the cache
    /// is left unchanged.
    ///
    /// # Errors
    /// The memory could not be allocated.
    pub fn try_resize(&mut self, new_len: usize) -> Result<(), CacheError> {
        let block_size = self.block_size;
        if new_len <= block_size {
            match &mut self.storage {
                Storage::Single(bytes) => {
                    if new_len > bytes.len() {
                        bytes
                            .try_reserve_exact(new_len - bytes.len())
                            .map_err(|_| CacheError::Allocation { requested: new_len })?;
                    }
                    bytes.resize(new_len, 0);
                }
                Storage::Blocks(blocks) => {
                    let mut bytes = Vec::new();
                    bytes
                        .try_reserve_exact(new_len)
                        .map_err(|_| CacheError::Allocation { requested: new_len })?;
                    if let Some(first) = blocks.first() {
                        bytes.extend_from_slice(&first[..new_len]);
                    }
                    self.storage = Storage::Single(bytes);
                }
            }
        } else {
            let needed = new_len.div_ceil(block_size);
            match &mut self.storage {
                Storage::Single(bytes) => {
                    let mut blocks = Vec::new();
                    blocks
                        .try_reserve_exact(needed)
                        .map_err(|_| CacheError::Allocation { requested: new_len })?;
                    for chunk_start in (0..needed).map(|i| i * block_size) {
                        let mut block = alloc_zeroed(block_size)?;
                        if chunk_start < bytes.len() {
                            let chunk_end = bytes.len().min(chunk_start + block_size);
                            block[..chunk_end - chunk_start]
                                .copy_from_slice(&bytes[chunk_start..chunk_end]);
                        }
                        blocks.push(block.into_boxed_slice());
                    }
                    self.storage = Storage::Blocks(blocks);
                }
                Storage::Blocks(blocks) => {
                    if needed > blocks.len() {
                        let missing = needed - blocks.len();
                        let mut fresh = Vec::new();
                        fresh
                            .try_reserve_exact(missing)
                            .map_err(|_| CacheError::Allocation { requested: new_len })?;
                        for _ in 0..missing {
                            fresh.push(alloc_zeroed(block_size)?.into_boxed_slice());
                        }
                        blocks
                            .try_reserve(missing)
                            .map_err(|_| CacheError::Allocation { requested: new_len })?;
                        blocks.extend(fresh);
                    } else {
                        blocks.truncate(needed);
                        if new_len < self.len {
                            let tail = new_len % block_size;
                            if tail != 0 {
                                if let Some(last) = blocks.last_mut() {
                                    last[tail..].fill(0);
                                }
                            }
                        }
                    }
                }
            }
        }
        self.len = new_len;
        Ok(())
    }

    /// Infallible variant of [`ByteCache::try_resize`].
    ///
    /// # Panics
    /// If the memory could not be allocated.
    pub fn resize(&mut self, new_len: usize) {
        if let Err(err) = self.try_resize(new_len) {
            panic!("{err}");
        }
    }

    /// Release memory not needed for the current length.
    pub fn shrink_to_fit(&mut self) {
        match &mut self.storage {
            Storage::Single(bytes) => bytes.shrink_to_fit(),
            Storage::Blocks(blocks) => blocks.shrink_to_fit(),
        }
    }

    pub fn clear(&mut self) {
        self.storage = Storage::Single(Vec::new());
        self.len = 0;
    }

    /// Deep copy of another cache, block size included.
    pub fn copy_from(&mut self, other: &ByteCache) {
        self.clone_from(other);
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<u8> {
        if index >= self.len {
            return None;
        }
        Some(self.segment(index, index + 1)[0])
    }

    /// # Panics
    /// If `index` is out of range.
    pub fn set(&mut self, index: usize, value: u8) {
        assert!(index < self.len, "index {index} out of range {}", self.len);
        self.segment_mut(index, index + 1)[0] = value;
    }

    pub fn push(&mut self, value: u8) {
        let index = self.len;
        self.resize(index + 1);
        self.set(index, value);
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        let at = self.len;
        self.resize(at + data.len());
        self.write_at(at, data);
    }

    /// Copy `data` into the cache at `pos`.
    ///
    /// # Panics
    /// If the range exceeds the cache length.
    pub fn write_at(&mut self, pos: usize, data: &[u8]) {
        let end = pos + data.len();
        assert!(end <= self.len, "range {pos}..{end} out of range {}", self.len);
        let mut done = 0;
        while done < data.len() {
            let segment = self.segment_mut(pos + done, end);
            let count = segment.len();
            segment.copy_from_slice(&data[done..done + count]);
            done += count;
        }
    }

    /// Copy cache bytes starting at `pos` into `out`.
    ///
    /// # Panics
    /// If the range exceeds the cache length.
    pub fn read_at(&self, pos: usize, out: &mut [u8]) {
        let end = pos + out.len();
        let mut done = 0;
        for segment in self.slices(pos, end) {
            out[done..done + segment.len()].copy_from_slice(segment);
            done += segment.len();
        }
    }

    /// Contiguous pieces of `begin..end`, one per block crossed.
    ///
    /// # Panics
    /// If the range is reversed or exceeds the cache length.
    pub fn slices(&self, begin: usize, end: usize) -> impl Iterator<Item = &[u8]> + '_ {
        assert!(
            begin <= end && end <= self.len,
            "range {begin}..{end} out of range {}",
            self.len
        );
        let mut pos = begin;
        std::iter::from_fn(move || {
            if pos >= end {
                return None;
            }
            let segment = self.segment(pos, end);
            pos += segment.len();
            Some(segment)
        })
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for segment in self.slices(0, self.len) {
            out.extend_from_slice(segment);
        }
        out
    }

    /// Longest contiguous slice starting at `pos` and ending at or before `end`.
    fn segment(&self, pos: usize, end: usize) -> &[u8] {
        match &self.storage {
            Storage::Single(bytes) => &bytes[pos..end],
            Storage::Blocks(blocks) => {
                let index = pos / self.block_size;
                let offset = pos % self.block_size;
                let stop = (end - index * self.block_size).min(self.block_size);
                &blocks[index][offset..stop]
            }
        }
    }

    fn segment_mut(&mut self, pos: usize, end: usize) -> &mut [u8] {
        match &mut self.storage {
            Storage::Single(bytes) => &mut bytes[pos..end],
            Storage::Blocks(blocks) => {
                let index = pos / self.block_size;
                let offset = pos % self.block_size;
                let stop = (end - index * self.block_size).min(self.block_size);
                &mut blocks[index][offset..stop]
            }
        }
    }

    /// Number of `\n` in `begin..end`.
    #[must_use]
    pub fn compute_line_number(&self, begin: usize, end: usize) -> usize {
        self.slices(begin, end).map(count_newlines).sum()
    }

    /// Position of the first `\n` at or after `begin`.
    #[must_use]
    pub fn find_eol(&self, begin: usize) -> Option<usize> {
        let mut pos = begin;
        for segment in self.slices(begin, self.len) {
            if let Some(found) = find_eol(segment) {
                return Some(pos + found);
            }
            pos += segment.len();
        }
        None
    }

    /// Write the first `size` bytes to `file`, one write per block.
    ///
    /// The handle is asked to reserve `size` bytes first.
    ///
    /// # Errors
    /// Any write failure.
    ///
    /// # Panics
    /// If `size` exceeds the cache length.
    pub fn write_to_file(&self, file: &mut SystemFile, size: usize) -> Result<(), FileError> {
        file.reserve_extra_size(size as u64)?;
        for segment in self.slices(0, size) {
            file.write(segment)?;
        }
        Ok(())
    }

    /// Read up to `size` bytes from `file` at `pos` into the start of the cache.
    ///
    /// One read per block. A short read means end of file and stops the loop.
    ///
    /// # Returns
    /// Number of bytes read.
    ///
    /// # Errors
    /// Seek or read failure.
    ///
    /// # Panics
    /// If `size` exceeds the cache length.
    pub fn read_from_file(
        &mut self,
        file: &mut SystemFile,
        pos: u64,
        size: usize,
    ) -> Result<usize, FileError> {
        assert!(size <= self.len, "read of {size} bytes into a cache of {}", self.len);
        file.seek(pos)?;
        let mut total = 0;
        while total < size {
            let segment = self.segment_mut(total, size);
            let wanted = segment.len();
            let read = file.read(segment)?;
            total += read;
            if read < wanted {
                break;
            }
        }
        Ok(total)
    }

    /// Read one line from the current position of `file`.
    ///
    /// The cache is filled block by block until it is full, a newline was
    /// read, or the file ends. The file position ends after the bytes read,
    /// which may lie past the newline.
    ///
    /// # Errors
    /// Read failure.
    pub fn read_line(&mut self, file: &mut SystemFile) -> Result<LineRead, FileError> {
        let size = self.len;
        let mut line = LineRead {
            length: 0,
            eol: false,
            eof: false,
        };
        let mut pos = 0;
        while pos < size {
            let segment = self.segment_mut(pos, size);
            let wanted = segment.len();
            let read = file.read(segment)?;
            if let Some(found) = find_eol(&segment[..read]) {
                line.length = pos + found;
                line.eol = true;
            } else {
                line.length = pos + read;
            }
            line.eof = read < wanted;
            if line.eol || line.eof {
                break;
            }
            pos += wanted;
        }
        Ok(line)
    }
}

impl Default for ByteCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ByteCache {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len
            && self
                .slices(0, self.len)
                .flatten()
                .eq(other.slices(0, other.len).flatten())
    }
}

impl Eq for ByteCache {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::registry::DriverRegistry;
    use driver_mocked::MemDriver;
    use proptest::prelude::*;
    use std::sync::Arc;

    /// Read `content` line by line, seeking past each newline.
    fn read_every_line(content: &[u8], block_size: usize) -> (Vec<LineRead>, Vec<u8>) {
        let driver = Arc::new(MemDriver::new("mem"));
        driver.add_file("mem://host/lines", content);
        let registry = Arc::new(DriverRegistry::with_config(RegistryConfig::empty()));
        registry.register(driver).unwrap();
        let mut file = SystemFile::new(registry);
        file.open_input("mem://host/lines").unwrap();

        let mut cache = ByteCache::with_block_size(block_size);
        let mut calls = Vec::new();
        let mut joined = Vec::new();
        let mut pos = 0u64;
        loop {
            cache.resize(4 * block_size);
            file.seek(pos).unwrap();
            let line = cache.read_line(&mut file).unwrap();
            calls.push(line);
            joined.extend(cache.slices(0, line.length).flatten());
            if !line.eol {
                break;
            }
            joined.push(b'\n');
            pos += line.length as u64 + 1;
        }
        file.close().unwrap();
        (calls, joined)
    }

    #[test]
    fn test_new_cache_is_empty() {
        let cache = ByteCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.block_size(), DEFAULT_BLOCK_SIZE);
        assert!(!cache.is_multi_block());
    }

    #[test]
    #[should_panic(expected = "multiple of 16")]
    fn test_block_size_must_be_multiple_of_16() {
        let _ = ByteCache::with_block_size(10);
    }

    #[test]
    fn test_switches_layout_at_block_size() {
        let mut cache = ByteCache::with_block_size(32);
        cache.resize(32);
        assert!(!cache.is_multi_block());
        cache.resize(33);
        assert!(cache.is_multi_block());
        assert_eq!(cache.capacity(), 64);
        cache.resize(10);
        assert!(!cache.is_multi_block());
    }

    #[test]
    fn test_resize_keeps_prefix_and_zero_fills() {
        let mut cache = ByteCache::with_block_size(16);
        let data: Vec<u8> = (1..=40).collect();
        cache.extend_from_slice(&data);
        cache.resize(20);
        assert_eq!(cache.to_vec(), data[..20].to_vec());
        cache.resize(40);
        let mut expected = data[..20].to_vec();
        expected.resize(40, 0);
        assert_eq!(cache.to_vec(), expected);
    }

    #[test]
    fn test_get_set_push() {
        let mut cache = ByteCache::with_block_size(16);
        for i in 0..50u8 {
            cache.push(i);
        }
        assert_eq!(cache.get(17), Some(17));
        cache.set(17, 200);
        assert_eq!(cache.get(17), Some(200));
        assert_eq!(cache.get(50), None);
    }

    #[test]
    fn test_slices_split_at_block_boundaries() {
        let mut cache = ByteCache::with_block_size(16);
        cache.resize(40);
        let lengths: Vec<usize> = cache.slices(10, 40).map(<[u8]>::len).collect();
        assert_eq!(lengths, vec![6, 16, 8]);
    }

    #[test]
    fn test_copy_from_is_deep() {
        let mut source = ByteCache::with_block_size(16);
        source.extend_from_slice(&[7u8; 40]);
        let mut target = ByteCache::new();
        target.copy_from(&source);
        source.set(0, 1);
        assert_eq!(target.get(0), Some(7));
        assert_eq!(target.block_size(), 16);
    }

    #[test]
    fn test_find_eol_across_blocks() {
        let mut cache = ByteCache::with_block_size(16);
        let mut data = vec![b'a'; 40];
        data[35] = b'\n';
        cache.extend_from_slice(&data);
        assert_eq!(cache.find_eol(0), Some(35));
        assert_eq!(cache.find_eol(36), None);
    }

    proptest! {
        #[test]
        fn test_line_number_matches_naive(
            bytes in prop::collection::vec(prop_oneof![Just(b'\n'), any::<u8>()], 0..200),
            block_factor in 1usize..4,
            cut in 0usize..200,
        ) {
            let mut cache = ByteCache::with_block_size(16 * block_factor);
            cache.extend_from_slice(&bytes);
            let begin = cut.min(bytes.len());
            let expected = bytes[begin..].iter().filter(|&&b| b == b'\n').count();
            prop_assert_eq!(cache.compute_line_number(begin, bytes.len()), expected);
            prop_assert_eq!(cache.to_vec(), bytes);
        }

        #[test]
        fn test_read_line_iterates_whole_file(
            lines in prop::collection::vec(
                prop::collection::vec(b' '..=b'~', 0..40),
                0..12,
            ),
            tail in prop::collection::vec(b'a'..=b'z', 0..10),
            block_size in prop_oneof![Just(16usize), Just(32), Just(64)],
        ) {
            let mut content = Vec::new();
            for line in &lines {
                content.extend_from_slice(line);
                content.push(b'\n');
            }
            content.extend_from_slice(&tail);

            let (calls, joined) = read_every_line(&content, block_size);
            prop_assert_eq!(calls.len(), lines.len() + 1);
            for (call, line) in calls.iter().zip(&lines) {
                prop_assert!(call.eol);
                prop_assert_eq!(call.length, line.len());
            }
            let last = calls[calls.len() - 1];
            prop_assert!(!last.eol);
            prop_assert!(last.eof);
            prop_assert_eq!(last.length, tail.len());
            prop_assert_eq!(joined, content);
        }
    }
}

//! Block-based string arena and its compacted form
//!
//! `StringArena` hands out strings from fixed-size blocks and never frees
//! individual allocations. Once a table of contents is complete its labels
//! move into a `CompactedStrings` block: one contiguous buffer of
//! NUL-terminated strings addressed by byte offset.

extern crate alloc;

use alloc::vec::Vec;

/// Default arena block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Handle to a string stored in a [`StringArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaStr {
    block: u32,
    start: u32,
    len: u32,
}

impl ArenaStr {
    /// Length of the string in bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the string is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Bump allocator for transient strings.
#[derive(Debug)]
pub struct StringArena {
    blocks: Vec<Vec<u8>>,
    block_size: usize,
    allocated: usize,
}

impl Default for StringArena {
    fn default() -> Self {
        Self::new()
    }
}

impl StringArena {
    /// Create an empty arena with [`DEFAULT_BLOCK_SIZE`] blocks.
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Create an empty arena with a custom block size.
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            blocks: Vec::new(),
            block_size: block_size.max(1),
            allocated: 0,
        }
    }

    /// Copy `s` into the arena.
    pub fn alloc(&mut self, s: &str) -> ArenaStr {
        let size = s.len();
        let needs_block = match self.blocks.last() {
            Some(block) => block.len() + size >= self.block_size,
            None => true,
        };
        if needs_block {
            // Oversized strings get a block of their own.
            self.blocks
                .push(Vec::with_capacity(self.block_size.max(size)));
        }

        let block_index = self.blocks.len() - 1;
        let block = &mut self.blocks[block_index];
        let start = block.len();
        block.extend_from_slice(s.as_bytes());
        self.allocated += size;

        ArenaStr {
            block: block_index as u32,
            start: start as u32,
            len: size as u32,
        }
    }

    /// Borrow a previously allocated string.
    pub fn get(&self, handle: ArenaStr) -> &str {
        let bytes = self
            .blocks
            .get(handle.block as usize)
            .and_then(|b| b.get(handle.start as usize..(handle.start + handle.len) as usize))
            .unwrap_or_default();
        core::str::from_utf8(bytes).unwrap_or_default()
    }

    /// Bytes handed out so far.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Number of blocks in use.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Release every allocation at once.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.allocated = 0;
    }
}

/// Immutable block of NUL-terminated strings addressed by byte offset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompactedStrings {
    bytes: Vec<u8>,
}

impl CompactedStrings {
    /// Build a block by appending each string followed by a NUL.
    ///
    /// Returns the block and the offset of every input string, in order.
    pub fn build<'a, I>(strings: I) -> (Self, Vec<u32>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut bytes = Vec::new();
        let mut offsets = Vec::new();
        for s in strings {
            offsets.push(bytes.len() as u32);
            bytes.extend(s.bytes().filter(|&b| b != 0));
            bytes.push(0);
        }
        (Self { bytes }, offsets)
    }

    /// Adopt a block read back from storage.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw block contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// String starting at `offset`, up to its NUL terminator.
    pub fn get(&self, offset: u32) -> Option<&str> {
        let tail = self.bytes.get(offset as usize..)?;
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        core::str::from_utf8(&tail[..end]).ok()
    }

    /// Block size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the block is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_get() {
        let mut arena = StringArena::new();
        let a = arena.alloc("Chapter 1");
        let b = arena.alloc("Chapter 2");
        assert_eq!(arena.get(a), "Chapter 1");
        assert_eq!(arena.get(b), "Chapter 2");
        assert_eq!(arena.allocated(), 18);
        assert_eq!(arena.block_count(), 1);
    }

    #[test]
    fn test_new_block_when_full() {
        let mut arena = StringArena::with_block_size(8);
        let a = arena.alloc("abcd");
        let b = arena.alloc("efgh");
        assert_eq!(arena.block_count(), 2);
        assert_eq!(arena.get(a), "abcd");
        assert_eq!(arena.get(b), "efgh");
    }

    #[test]
    fn test_oversized_string_gets_own_block() {
        let mut arena = StringArena::with_block_size(4);
        let long = arena.alloc("a much longer label");
        assert_eq!(arena.get(long), "a much longer label");
        assert_eq!(long.len(), 19);
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut arena = StringArena::new();
        arena.alloc("x");
        arena.clear();
        assert_eq!(arena.block_count(), 0);
        assert_eq!(arena.allocated(), 0);
    }

    #[test]
    fn test_compacted_offsets() {
        let (block, offsets) = CompactedStrings::build(["One", "", "Three"]);
        assert_eq!(offsets, vec![0, 4, 5]);
        assert_eq!(block.as_bytes(), b"One\0\0Three\0");
        assert_eq!(block.get(0), Some("One"));
        assert_eq!(block.get(4), Some(""));
        assert_eq!(block.get(5), Some("Three"));
        assert_eq!(block.get(99), None);
    }

    #[test]
    fn test_compaction_is_deterministic() {
        let labels = ["Intro", "Part I", "Chapter 1"];
        let (first, _) = CompactedStrings::build(labels);
        let (second, _) = CompactedStrings::build(labels);
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_from_bytes_without_trailing_nul() {
        let block = CompactedStrings::from_bytes(b"abc".to_vec());
        assert_eq!(block.get(0), Some("abc"));
        assert_eq!(block.get(1), Some("bc"));
    }
}

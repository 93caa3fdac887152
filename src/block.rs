//! Document/block assembly.
//!
//! Turns a byte sequence into a run of fixed-size blocks and back, handling
//! the partially filled last block and the `0xFF` fill convention. The same
//! machinery serves both granularities: big sectors for large documents and
//! mini sectors inside the mini stream.

use crate::consts::FILL_BYTE;
use crate::error::{CfbError, Result};

/// One fixed-size block of document data.
///
/// `used` is how many bytes carry document content; the remainder up to the
/// block size is fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    data: Vec<u8>,
    used: usize,
}

impl Block {
    /// Build a block from a slice, padding with the fill byte up to
    /// `block_size`.
    pub fn from_slice(slice: &[u8], block_size: usize) -> Self {
        let used = slice.len().min(block_size);
        let mut data = vec![FILL_BYTE; block_size];
        data[..used].copy_from_slice(&slice[..used]);
        Block { data, used }
    }

    /// A block consisting entirely of fill bytes
    pub fn filler(block_size: usize) -> Self {
        Block {
            data: vec![FILL_BYTE; block_size],
            used: 0,
        }
    }

    /// Full block contents including fill
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Whether this block was only partially filled with document content
    pub fn is_partial(&self) -> bool {
        self.used < self.data.len()
    }
}

/// Split a byte sequence into `ceil(len / block_size)` blocks, the last one
/// padded with the fill byte.
pub fn to_blocks(bytes: &[u8], block_size: usize) -> Vec<Block> {
    bytes
        .chunks(block_size)
        .map(|chunk| Block::from_slice(chunk, block_size))
        .collect()
}

/// Copy `dest.len()` bytes out of a block sequence starting at `offset`,
/// transparently spanning block boundaries.
///
/// The range is taken over the blocks' full contents, fill included; a range
/// extending past the last block fails.
pub fn read_from_blocks(blocks: &[Block], dest: &mut [u8], offset: usize) -> Result<()> {
    if blocks.is_empty() {
        if dest.is_empty() {
            return Ok(());
        }
        return Err(CfbError::InvalidData(
            "read from an empty block sequence".to_string(),
        ));
    }

    let block_size = blocks[0].data.len();
    let available = blocks.len() * block_size;
    let end = offset.checked_add(dest.len()).ok_or_else(|| {
        CfbError::InvalidData("block read range overflows".to_string())
    })?;
    if end > available {
        return Err(CfbError::InvalidData(format!(
            "read of {} bytes at offset {} exceeds {} available",
            dest.len(),
            offset,
            available
        )));
    }

    let mut written = 0;
    while written < dest.len() {
        let pos = offset + written;
        let block = &blocks[pos / block_size];
        let start = pos % block_size;
        let take = (block_size - start).min(dest.len() - written);
        dest[written..written + take].copy_from_slice(&block.data[start..start + take]);
        written += take;
    }

    Ok(())
}

/// Append filler blocks until the collection is an exact multiple of
/// `blocks_per_unit`; returns the number of whole container units.
pub fn pad_to_unit(blocks: &mut Vec<Block>, blocks_per_unit: usize) -> usize {
    if !blocks.is_empty() {
        let block_size = blocks[0].data.len();
        while blocks.len() % blocks_per_unit != 0 {
            blocks.push(Block::filler(block_size));
        }
    }
    blocks.len() / blocks_per_unit
}

/// Total byte size of `n` blocks
#[inline]
pub fn size_of(n: usize, block_size: usize) -> usize {
    n * block_size
}

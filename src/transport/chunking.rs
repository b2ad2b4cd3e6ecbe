//! Byte payload chunking
//!
//! Transport messages are size-capped, so payloads are cut into sequential
//! slices of at most `chunk_size` bytes. Concatenating the slices in order
//! reproduces the payload exactly.

use std::slice::Chunks;

use crate::{Error, Result};

/// Split `payload` into ordered chunks of at most `chunk_size` bytes
///
/// An empty payload yields no chunks.
///
/// # Errors
///
/// Returns `Error::Config` if `chunk_size` is zero
pub fn split_chunks(payload: &[u8], chunk_size: usize) -> Result<Chunks<'_, u8>> {
    if chunk_size == 0 {
        return Err(Error::Config("chunk size must be greater than zero".to_string()));
    }
    Ok(payload.chunks(chunk_size))
}

/// Number of chunks `len` bytes occupy at `chunk_size`
#[must_use]
pub const fn chunk_count(len: usize, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    len.div_ceil(chunk_size)
}

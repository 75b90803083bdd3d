//! zlib stream compression for tunnel packet bodies
//!
//! Each body is an independent, complete zlib stream. Decompression must reach
//! the end-of-stream marker; anything else is a codec failure.

use crate::error::{RelayError, Result};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// Minimum growth step for output buffers
const GROW_STEP: usize = 1024;

/// Compress `input` into a complete zlib stream
pub fn compress(input: &[u8]) -> Result<Vec<u8>> {
    let mut stream = Compress::new(Compression::default(), true);
    let mut out = Vec::with_capacity(input.len() / 2 + 64);

    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity().max(GROW_STEP));
        }
        let consumed = stream.total_in() as usize;
        let status = stream
            .compress_vec(&input[consumed..], &mut out, FlushCompress::Finish)
            .map_err(|e| RelayError::Codec(format!("zlib compression failed: {e}")))?;

        if status == Status::StreamEnd {
            return Ok(out);
        }
    }
}

/// Decompress a complete zlib stream of at most `limit` bytes
///
/// A truncated or corrupted stream, or one that inflates past `limit`, is a
/// [`RelayError::Codec`].
pub fn decompress(input: &[u8], limit: usize) -> Result<Vec<u8>> {
    // one byte past the limit distinguishes "exactly limit" from "too large"
    let cap = limit.saturating_add(1);
    let mut stream = Decompress::new(true);
    let mut out = Vec::with_capacity(input.len().saturating_mul(2).max(GROW_STEP).min(cap));

    loop {
        if out.len() == out.capacity() {
            let grow = out.capacity().max(GROW_STEP).min(cap - out.len());
            out.reserve_exact(grow);
        }
        let (before_in, before_out) = (stream.total_in(), stream.total_out());
        let status = stream
            .decompress_vec(&input[before_in as usize..], &mut out, FlushDecompress::None)
            .map_err(|e| RelayError::Codec(format!("zlib decompression failed: {e}")))?;

        if out.len() > limit {
            return Err(RelayError::Codec(format!(
                "zlib stream inflates past {} bytes",
                limit
            )));
        }
        if status == Status::StreamEnd {
            return Ok(out);
        }

        // output space was available, so no progress means the input ran out
        if stream.total_in() == before_in && stream.total_out() == before_out {
            return Err(RelayError::Codec(
                "zlib stream ended before end-of-stream marker".to_string(),
            ));
        }
    }
}

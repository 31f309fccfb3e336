// src/program/codec.rs
//! Program encoding: JSON, optionally wrapped in a zstd frame
//!
//! Decoding sniffs the zstd magic number, so hosts can hand over either form.

use crate::program::ir::Program;
use crate::utils::errors::{Result, SandboxError};
use std::io::Read;
use tracing::debug;

/// zstd frame magic number (little endian 0xFD2FB528)
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Largest decoded program accepted by [`decode`]
pub const DEFAULT_MAX_PROGRAM_BYTES: usize = 64 << 20;

/// Compression levels for encoded programs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    /// Plain JSON
    None,

    /// Fast compression (level 1)
    Fast,

    /// Best compression (level 19)
    Best,
}

impl CompressionLevel {
    fn as_i32(self) -> Option<i32> {
        match self {
            CompressionLevel::None => None,
            CompressionLevel::Fast => Some(1),
            CompressionLevel::Best => Some(19),
        }
    }
}

/// Whether a buffer starts with a zstd frame
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= ZSTD_MAGIC.len() && data[..ZSTD_MAGIC.len()] == ZSTD_MAGIC
}

/// Encode a program
pub fn encode(program: &Program, level: CompressionLevel) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(program)?;

    match level.as_i32() {
        None => Ok(json),
        Some(level) => {
            let compressed = zstd::encode_all(json.as_slice(), level).map_err(|e| {
                SandboxError::InvalidProgram(format!("Compression error: {}", e))
            })?;
            debug!(
                "Encoded program {}: {} bytes -> {} bytes",
                program.package,
                json.len(),
                compressed.len()
            );
            Ok(compressed)
        }
    }
}

/// Decode a program from JSON or zstd-compressed JSON
pub fn decode(data: &[u8]) -> Result<Program> {
    decode_with_limit(data, DEFAULT_MAX_PROGRAM_BYTES)
}

/// Decode a program whose JSON form is at most `limit` bytes
pub fn decode_with_limit(data: &[u8], limit: usize) -> Result<Program> {
    let too_large = || SandboxError::InvalidProgram(format!("Program exceeds {} bytes", limit));

    if is_compressed(data) {
        let decoder = zstd::Decoder::new(data).map_err(|e| {
            SandboxError::InvalidProgram(format!("Decompression error: {}", e))
        })?;
        let mut json = Vec::new();
        decoder
            .take(limit as u64 + 1)
            .read_to_end(&mut json)
            .map_err(|e| SandboxError::InvalidProgram(format!("Decompression error: {}", e)))?;
        if json.len() > limit {
            return Err(too_large());
        }
        debug!("Decompressed program: {} bytes -> {} bytes", data.len(), json.len());
        Ok(serde_json::from_slice(&json)?)
    } else if data.len() > limit {
        Err(too_large())
    } else {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Read and decode a program file
pub fn read_file(path: impl AsRef<std::path::Path>) -> Result<Program> {
    let data = std::fs::read(path)?;
    decode(&data)
}

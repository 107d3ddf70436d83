//! `lz4` and `lz4hc` backends, gated behind the `lz4` feature.
//!
//! Both wire algorithm slots route through the same `lz4_flex` frame format;
//! `lz4_flex`'s safe API has no separate high-compression entry point, so
//! `lz4hc` only differs from `lz4` in its accepted level range, matching how
//! the original treats them as two `knet_handle_compress_cfg` names backed
//! by the same liblz4.

use super::{Codec, CompressError};

#[derive(Debug)]
pub struct Lz4Codec {
    pub high_compression: bool,
}

#[cfg(feature = "lz4")]
impl Codec for Lz4Codec {
    fn validate_level(&self, level: i32) -> Result<(), CompressError> {
        let range = if self.high_compression { 0..=12 } else { 0..=9 };
        if range.contains(&level) {
            Ok(())
        } else {
            let name = self.name();
            Err(CompressError::BackendFailed(name, format!("level {level} out of range")))
        }
    }

    fn compress(&self, input: &[u8], _level: i32, out: &mut Vec<u8>) -> Result<(), CompressError> {
        *out = lz4_flex::block::compress_prepend_size(input);
        Ok(())
    }

    fn decompress(&self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CompressError> {
        let name = self.name();
        *out = lz4_flex::block::decompress_size_prepended(input)
            .map_err(|e| CompressError::BackendFailed(name, e.to_string()))?;
        Ok(())
    }
}

#[cfg(not(feature = "lz4"))]
impl Codec for Lz4Codec {
    fn validate_level(&self, _level: i32) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled(self.name()))
    }

    fn compress(&self, _input: &[u8], _level: i32, _out: &mut Vec<u8>) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled(self.name()))
    }

    fn decompress(&self, _input: &[u8], _out: &mut Vec<u8>) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled(self.name()))
    }
}

impl Lz4Codec {
    fn name(&self) -> &'static str {
        if self.high_compression { "lz4hc" } else { "lz4" }
    }
}

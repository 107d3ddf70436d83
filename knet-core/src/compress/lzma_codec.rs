//! `lzma` backend, gated behind the `lzma` feature.

use super::{Codec, CompressError};

#[cfg(feature = "lzma")]
mod imp {
    use std::io::Write;

    use xz2::read::XzDecoder;
    use xz2::write::XzEncoder;

    use super::{Codec, CompressError};

    #[derive(Debug, Default)]
    pub struct LzmaCodec;

    impl Codec for LzmaCodec {
        fn validate_level(&self, level: i32) -> Result<(), CompressError> {
            if (0..=9).contains(&level) {
                Ok(())
            } else {
                Err(CompressError::BackendFailed("lzma", format!("level {level} out of range 0..=9")))
            }
        }

        fn compress(&self, input: &[u8], level: i32, out: &mut Vec<u8>) -> Result<(), CompressError> {
            let mut encoder = XzEncoder::new(Vec::new(), level as u32);
            encoder
                .write_all(input)
                .map_err(|e| CompressError::BackendFailed("lzma", e.to_string()))?;
            *out = encoder
                .finish()
                .map_err(|e| CompressError::BackendFailed("lzma", e.to_string()))?;
            Ok(())
        }

        fn decompress(&self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CompressError> {
            use std::io::Read;
            let mut decoder = XzDecoder::new(input);
            decoder
                .read_to_end(out)
                .map_err(|e| CompressError::BackendFailed("lzma", e.to_string()))?;
            Ok(())
        }
    }
}

#[cfg(feature = "lzma")]
pub use imp::LzmaCodec;

#[cfg(not(feature = "lzma"))]
#[derive(Debug, Default)]
pub struct LzmaCodec;

#[cfg(not(feature = "lzma"))]
impl Codec for LzmaCodec {
    fn validate_level(&self, _level: i32) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled("lzma"))
    }

    fn compress(&self, _input: &[u8], _level: i32, _out: &mut Vec<u8>) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled("lzma"))
    }

    fn decompress(&self, _input: &[u8], _out: &mut Vec<u8>) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled("lzma"))
    }
}

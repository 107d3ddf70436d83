//! `zlib` backend, gated behind the `zlib` feature.

use super::{Codec, CompressError};

#[cfg(feature = "zlib")]
mod imp {
    use std::io::Write;

    use flate2::Compression;
    use flate2::read::ZlibDecoder;
    use flate2::write::ZlibEncoder;

    use super::{Codec, CompressError};

    #[derive(Debug, Default)]
    pub struct ZlibCodec;

    impl Codec for ZlibCodec {
        fn validate_level(&self, level: i32) -> Result<(), CompressError> {
            if (0..=9).contains(&level) {
                Ok(())
            } else {
                Err(CompressError::BackendFailed("zlib", format!("level {level} out of range 0..=9")))
            }
        }

        fn compress(&self, input: &[u8], level: i32, out: &mut Vec<u8>) -> Result<(), CompressError> {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level as u32));
            encoder
                .write_all(input)
                .map_err(|e| CompressError::BackendFailed("zlib", e.to_string()))?;
            *out = encoder
                .finish()
                .map_err(|e| CompressError::BackendFailed("zlib", e.to_string()))?;
            Ok(())
        }

        fn decompress(&self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CompressError> {
            use std::io::Read;
            let mut decoder = ZlibDecoder::new(input);
            decoder
                .read_to_end(out)
                .map_err(|e| CompressError::BackendFailed("zlib", e.to_string()))?;
            Ok(())
        }
    }
}

#[cfg(feature = "zlib")]
pub use imp::ZlibCodec;

#[cfg(not(feature = "zlib"))]
#[derive(Debug, Default)]
pub struct ZlibCodec;

#[cfg(not(feature = "zlib"))]
impl Codec for ZlibCodec {
    fn validate_level(&self, _level: i32) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled("zlib"))
    }

    fn compress(&self, _input: &[u8], _level: i32, _out: &mut Vec<u8>) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled("zlib"))
    }

    fn decompress(&self, _input: &[u8], _out: &mut Vec<u8>) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled("zlib"))
    }
}

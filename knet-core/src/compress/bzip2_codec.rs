//! `bzip2` backend, gated behind the `bzip2` feature.

use super::{Codec, CompressError};

#[cfg(feature = "bzip2")]
mod imp {
    use std::io::Write;

    use bzip2::Compression;
    use bzip2::read::BzDecoder;
    use bzip2::write::BzEncoder;

    use super::{Codec, CompressError};

    #[derive(Debug, Default)]
    pub struct Bzip2Codec;

    impl Codec for Bzip2Codec {
        fn validate_level(&self, level: i32) -> Result<(), CompressError> {
            if (1..=9).contains(&level) {
                Ok(())
            } else {
                Err(CompressError::BackendFailed("bzip2", format!("level {level} out of range 1..=9")))
            }
        }

        fn compress(&self, input: &[u8], level: i32, out: &mut Vec<u8>) -> Result<(), CompressError> {
            let mut encoder = BzEncoder::new(Vec::new(), Compression::new(level as u32));
            encoder
                .write_all(input)
                .map_err(|e| CompressError::BackendFailed("bzip2", e.to_string()))?;
            *out = encoder
                .finish()
                .map_err(|e| CompressError::BackendFailed("bzip2", e.to_string()))?;
            Ok(())
        }

        fn decompress(&self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CompressError> {
            use std::io::Read;
            let mut decoder = BzDecoder::new(input);
            decoder
                .read_to_end(out)
                .map_err(|e| CompressError::BackendFailed("bzip2", e.to_string()))?;
            Ok(())
        }
    }
}

#[cfg(feature = "bzip2")]
pub use imp::Bzip2Codec;

#[cfg(not(feature = "bzip2"))]
#[derive(Debug, Default)]
pub struct Bzip2Codec;

#[cfg(not(feature = "bzip2"))]
impl Codec for Bzip2Codec {
    fn validate_level(&self, _level: i32) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled("bzip2"))
    }

    fn compress(&self, _input: &[u8], _level: i32, _out: &mut Vec<u8>) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled("bzip2"))
    }

    fn decompress(&self, _input: &[u8], _out: &mut Vec<u8>) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled("bzip2"))
    }
}

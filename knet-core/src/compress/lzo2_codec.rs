//! `lzo2` backend, gated behind the `lzo2` feature.
//!
//! `lzo2_init`/`lzo2_fini` are the one optional-init pair in
//! `examples/original_source/libknet/compress.c`'s dispatch table; `lzokay`
//! mirrors that by requiring its working memory to be allocated once and
//! reused, so this is the one [`Codec`] whose `init` hook does real work.

use super::{Codec, CompressError};

#[cfg(feature = "lzo2")]
mod imp {
    use parking_lot::Mutex;

    use super::{Codec, CompressError};

    #[derive(Debug)]
    pub struct Lzo2Codec {
        dict: Mutex<lzokay::compress::Dict>,
    }

    impl Default for Lzo2Codec {
        fn default() -> Self {
            Self {
                dict: Mutex::new(lzokay::compress::Dict::new()),
            }
        }
    }

    impl Codec for Lzo2Codec {
        fn init(&self) -> Result<(), CompressError> {
            // Resets the working-memory dictionary so a fini/init cycle
            // behaves like the original's lzo_init() warm-up.
            *self.dict.lock() = lzokay::compress::Dict::new();
            Ok(())
        }

        fn validate_level(&self, level: i32) -> Result<(), CompressError> {
            if level == 0 {
                Ok(())
            } else {
                Err(CompressError::BackendFailed("lzo2", "lzo2 has no tunable level".into()))
            }
        }

        fn compress(&self, input: &[u8], _level: i32, out: &mut Vec<u8>) -> Result<(), CompressError> {
            let mut dict = self.dict.lock();
            lzokay::compress::compress_with_dict(input, &mut dict, out)
                .map_err(|e| CompressError::BackendFailed("lzo2", format!("{e:?}")))?;
            Ok(())
        }

        fn decompress(&self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CompressError> {
            lzokay::decompress::decompress(input, out)
                .map_err(|e| CompressError::BackendFailed("lzo2", format!("{e:?}")))?;
            Ok(())
        }
    }
}

#[cfg(feature = "lzo2")]
pub use imp::Lzo2Codec;

#[cfg(not(feature = "lzo2"))]
#[derive(Debug, Default)]
pub struct Lzo2Codec;

#[cfg(not(feature = "lzo2"))]
impl Codec for Lzo2Codec {
    fn validate_level(&self, _level: i32) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled("lzo2"))
    }

    fn compress(&self, _input: &[u8], _level: i32, _out: &mut Vec<u8>) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled("lzo2"))
    }

    fn decompress(&self, _input: &[u8], _out: &mut Vec<u8>) -> Result<(), CompressError> {
        Err(CompressError::AlgorithmNotCompiled("lzo2"))
    }
}

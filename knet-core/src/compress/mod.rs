//! Compression algorithm dispatch (spec.md §4.2).
//!
//! The on-wire algorithm index table lives in `knet_proto::COMPRESS_ALGORITHMS`
//! and is append-only. Each non-sentinel entry is backed by a [`Codec`]
//! implementation gated behind a Cargo feature, the way kronosnet itself
//! only links the compression libraries selected at `./configure` time
//! (`examples/original_source/libknet/compress.c`'s `compress_modules_cmds`
//! table has the exact same "slot exists, implementation may be absent"
//! shape for its one optional-init entry, `lzo2`).

mod bzip2_codec;
mod lz4_codec;
mod lzma_codec;
mod lzo2_codec;
mod zlib_codec;

use std::fmt;

use knet_proto::COMPRESS_ALGORITHMS;
use thiserror::Error;

use crate::error::ConfigError;

/// Errors raised by an individual codec's compress/decompress call. Distinct
/// from [`ConfigError`], which covers the init-time validation spec.md §4.2
/// calls out separately (unknown algorithm, bad level, threshold too large).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompressError {
    #[error("compression algorithm '{0}' was not compiled into this build")]
    AlgorithmNotCompiled(&'static str),
    #[error("output buffer too small for compressed data")]
    OutputTooSmall,
    #[error("{0} compression failed: {1}")]
    BackendFailed(&'static str, String),
    #[error("unknown compression algorithm index {0} received on the wire")]
    UnknownWireIndex(u8),
}

/// The per-algorithm operations table (spec.md §4.2: "Each entry exposes
/// four operations: optional init, optional fini, level-validation,
/// compress, decompress").
pub trait Codec: fmt::Debug + Send + Sync {
    /// Eager library warm-up. Only `lzo2` has a meaningful one, mirroring
    /// the original's `lzo2_init`/`lzo2_fini` being the lone non-null pair.
    fn init(&self) -> Result<(), CompressError> {
        Ok(())
    }

    fn fini(&self) {}

    fn validate_level(&self, level: i32) -> Result<(), CompressError>;

    fn compress(&self, input: &[u8], level: i32, out: &mut Vec<u8>) -> Result<(), CompressError>;

    fn decompress(&self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CompressError>;
}

/// One slot of [`knet_proto::COMPRESS_ALGORITHMS`], `None` when the backing
/// Cargo feature is disabled.
fn codec_for(idx: u8) -> Option<Box<dyn Codec>> {
    match idx {
        1 => Some(Box::new(zlib_codec::ZlibCodec)),
        2 => Some(Box::new(lz4_codec::Lz4Codec { high_compression: false })),
        3 => Some(Box::new(lz4_codec::Lz4Codec { high_compression: true })),
        4 => Some(Box::new(lzo2_codec::Lzo2Codec)),
        5 => Some(Box::new(lzma_codec::LzmaCodec)),
        6 => Some(Box::new(bzip2_codec::Bzip2Codec)),
        _ => None,
    }
}

fn name_for(idx: u8) -> &'static str {
    COMPRESS_ALGORITHMS.get(idx as usize).copied().unwrap_or("unknown")
}

fn index_for(name: &str) -> Option<u8> {
    COMPRESS_ALGORITHMS
        .iter()
        .position(|&n| n == name)
        .map(|i| i as u8)
}

/// What the caller asked for at `init` time (spec.md §4.2's
/// `knet_handle_compress_cfg`).
#[derive(Debug, Clone)]
pub struct CompressConfig {
    pub algo: String,
    pub level: i32,
    pub threshold: usize,
}

/// The resolved, validated selection stored on the handle.
#[derive(Debug, Clone, Copy)]
pub struct CompressSelection {
    pub algo_idx: u8,
    pub level: i32,
    pub threshold: usize,
}

pub const DEFAULT_COMPRESS_THRESHOLD: usize = 100;

/// Owns the per-algorithm dispatch table and the handle's resolved
/// selection. One instance per [`crate::handle::Handle`].
pub struct CompressTable {
    codecs: Vec<Option<Box<dyn Codec>>>,
    selection: Option<CompressSelection>,
    initialized: Vec<bool>,
}

impl fmt::Debug for CompressTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressTable")
            .field("selection", &self.selection)
            .finish()
    }
}

impl CompressTable {
    /// Builds the table and, matching `compress_init(knet_h, NULL)` in the
    /// original, eagerly warms every compiled-in algorithm with an `init`
    /// hook when `cfg` is absent.
    pub fn new(cfg: Option<CompressConfig>, max_packet_size: usize) -> Result<Self, ConfigError> {
        let max_methods = knet_proto::MAX_COMPRESS_METHODS;
        if COMPRESS_ALGORITHMS.len() > max_methods {
            return Err(ConfigError::TooManyCompressAlgorithms(COMPRESS_ALGORITHMS.len()));
        }

        let mut codecs = Vec::with_capacity(COMPRESS_ALGORITHMS.len());
        codecs.push(None); // index 0: "none", never dispatched
        for idx in 1..COMPRESS_ALGORITHMS.len() as u8 {
            codecs.push(codec_for(idx));
        }
        let mut initialized = vec![false; codecs.len()];

        let mut table = Self {
            codecs,
            selection: None,
            initialized: std::mem::take(&mut initialized),
        };

        match cfg {
            None => {
                for (idx, codec) in table.codecs.iter().enumerate() {
                    if let Some(codec) = codec {
                        codec.init().ok(); // pre-warming is best-effort library prep
                        table.initialized[idx] = true;
                    }
                }
                Ok(table)
            }
            Some(cfg) => {
                table.configure(cfg, max_packet_size)?;
                Ok(table)
            }
        }
    }

    fn configure(&mut self, cfg: CompressConfig, max_packet_size: usize) -> Result<(), ConfigError> {
        let algo_idx = index_for(&cfg.algo)
            .ok_or_else(|| ConfigError::UnknownCompressAlgorithm(cfg.algo.clone()))?;

        if algo_idx != knet_proto::COMPRESS_NONE_IDX {
            let codec = self
                .codecs
                .get(algo_idx as usize)
                .and_then(|c| c.as_ref())
                .ok_or(ConfigError::UnknownCompressAlgorithm(cfg.algo.clone()))?;
            codec.validate_level(cfg.level).map_err(|_| {
                ConfigError::UnsupportedCompressLevel {
                    algo: cfg.algo.clone(),
                    level: cfg.level,
                }
            })?;
            if cfg.threshold > max_packet_size {
                return Err(ConfigError::ThresholdTooLarge(cfg.threshold));
            }
        }

        let threshold = if cfg.threshold == 0 {
            DEFAULT_COMPRESS_THRESHOLD
        } else {
            cfg.threshold
        };

        self.selection = Some(CompressSelection {
            algo_idx,
            level: cfg.level,
            threshold,
        });
        Ok(())
    }

    pub fn selection(&self) -> Option<CompressSelection> {
        self.selection
    }

    /// `fini`: calls every algorithm's fini hook. Safe to call repeatedly or
    /// without a prior successful `init` (spec.md §8 idempotence property).
    pub fn fini(&mut self) {
        for (idx, codec) in self.codecs.iter().enumerate() {
            if let Some(codec) = codec {
                if self.initialized[idx] {
                    codec.fini();
                }
            }
        }
        self.initialized.iter_mut().for_each(|i| *i = false);
    }

    /// Compresses using the handle's configured selection. Returns `None`
    /// when the handle has no compression selected (index 0).
    pub fn compress(&self, input: &[u8]) -> Result<Option<(u8, Vec<u8>)>, CompressError> {
        let Some(sel) = self.selection else { return Ok(None) };
        if sel.algo_idx == knet_proto::COMPRESS_NONE_IDX {
            return Ok(None);
        }
        let codec = self
            .codecs
            .get(sel.algo_idx as usize)
            .and_then(|c| c.as_ref())
            .ok_or(CompressError::AlgorithmNotCompiled(name_for(sel.algo_idx)))?;
        let mut out = Vec::new();
        codec.compress(input, sel.level, &mut out)?;
        Ok(Some((sel.algo_idx, out)))
    }

    /// Decompresses a packet tagged with `algo_idx`, which may differ from
    /// the handle's own selection (spec.md §4.2).
    pub fn decompress(&self, algo_idx: u8, input: &[u8]) -> Result<Vec<u8>, CompressError> {
        if algo_idx as usize >= self.codecs.len() {
            return Err(CompressError::UnknownWireIndex(algo_idx));
        }
        if algo_idx == knet_proto::COMPRESS_NONE_IDX {
            return Ok(input.to_vec());
        }
        let codec = self.codecs[algo_idx as usize]
            .as_ref()
            .ok_or(CompressError::AlgorithmNotCompiled(name_for(algo_idx)))?;
        let mut out = Vec::new();
        codec.decompress(input, &mut out)?;
        Ok(out)
    }

    /// Egress policy from spec.md §4.2: compress only above threshold.
    pub fn should_compress(&self, payload_len: usize) -> bool {
        self.selection
            .map(|s| s.algo_idx != knet_proto::COMPRESS_NONE_IDX && payload_len > s.threshold)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_no_compression_when_unconfigured() {
        let table = CompressTable::new(None, 4096).unwrap();
        assert!(table.selection().is_none());
        assert!(!table.should_compress(10_000));
    }

    #[test]
    fn rejects_unknown_algorithm_name() {
        let cfg = CompressConfig {
            algo: "rot13".into(),
            level: 1,
            threshold: 0,
        };
        let err = CompressTable::new(Some(cfg), 4096).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCompressAlgorithm(_)));
    }

    #[test]
    fn zero_threshold_substitutes_the_default() {
        let cfg = CompressConfig {
            algo: "none".into(),
            level: 0,
            threshold: 0,
        };
        let table = CompressTable::new(Some(cfg), 4096).unwrap();
        assert_eq!(table.selection().unwrap().threshold, DEFAULT_COMPRESS_THRESHOLD);
    }

    #[test]
    fn threshold_above_max_packet_size_is_a_config_error() {
        let cfg = CompressConfig {
            algo: "none".into(),
            level: 0,
            threshold: 100_000,
        };
        let err = CompressTable::new(Some(cfg), 4096).unwrap_err();
        assert!(matches!(err, ConfigError::ThresholdTooLarge(100_000)));
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn lz4_round_trips() {
        let cfg = CompressConfig {
            algo: "lz4".into(),
            level: 1,
            threshold: 16,
        };
        let table = CompressTable::new(Some(cfg), 65536).unwrap();
        let payload = vec![b'a'; 4096];
        let (idx, compressed) = table.compress(&payload).unwrap().unwrap();
        assert_eq!(idx, index_for("lz4").unwrap());
        let restored = table.decompress(idx, &compressed).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn fini_is_idempotent_without_a_prior_init() {
        let mut table = CompressTable::new(None, 4096).unwrap();
        table.fini();
        table.fini();
    }
}

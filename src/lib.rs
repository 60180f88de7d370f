//! # tilevq
//!
//! Offline tile-dictionary pre-compressor for 8-bit video planes.
//!
//! Tiles are bucket-quantized into integer codes, the most frequent codes
//! form a fixed dictionary, every tile of every frame is replaced by its
//! nearest dictionary entry, and the per-pixel residual is kept for entropy
//! coding. Two rANS streams come out: dictionary indices and residuals.
//!
//! ```no_run
//! use tilevq::{encode_clip, ReaderFrameSource, TileConfig};
//!
//! let config = TileConfig::builder(800, 450, 150).build()?;
//! let mut source = ReaderFrameSource::open("bunny.450p.yuv", 800, 450)?;
//! let mut index = std::fs::File::create("bunny-dictionary.dat")?;
//! let mut residual = std::fs::File::create("bunny-residuals.dat")?;
//! let report = encode_clip(&config, &mut source, &mut index, &mut residual)?;
//! assert!(report.is_ok());
//! # Ok::<(), tilevq::TileError>(())
//! ```

pub mod config;
pub mod dictionary;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod model;
pub mod pipeline;
pub mod quantizer;
pub mod rans;
pub mod residual;
pub mod source;

pub use config::{DegeneratePolicy, TileConfig, TileConfigBuilder};
pub use dictionary::{build_dictionary, Dictionary, TileCounter};
pub use encoder::{best_tile_from_dictionary, encode_frame};
pub use error::{Result, TileError};
pub use frame::{Frame, ResidualFrame, TileIndexGrid};
pub use model::SymbolModel;
pub use pipeline::{
    decode_clip, decode_clip_with, encode_clip, train, DecodeReport, PipelineReport, StreamSummary, TrainedCodec,
};
pub use quantizer::{bucket_code, decode_tile, encode_tile, TileCode};
pub use rans::{RansDecoder, RansEncoder, SymbolDecoder, SymbolEncoder};
pub use residual::{predicted_frame, reconstruct_frame, residuals_from_encoded_frame};
pub use source::{FrameSource, MemoryFrameSource, ReaderFrameSource};

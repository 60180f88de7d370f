//! Multi-pass orchestration.
//!
//! Pass 1 builds the dictionary, pass 2 computes every frame's index grid and
//! trains the index model, pass 3 trains the residual model, and the final
//! pass drives the two entropy-coded streams in frame order. The source is
//! rewound before each pass.
//!
//! Neither model is stored in the streams: [`decode_clip`] repeats passes 1-3
//! over the same clip to rebuild them before it can decode a single symbol.

use std::io::Write;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::TileConfig;
use crate::dictionary::{build_dictionary, Dictionary};
use crate::encoder::encode_frame;
use crate::error::{Result, TileError};
use crate::frame::{Frame, TileIndexGrid};
use crate::model::SymbolModel;
use crate::rans::{RansDecoder, RansEncoder, SymbolDecoder, SymbolEncoder};
use crate::residual::{predicted_frame, reconstruct_frame, residuals_from_encoded_frame};
use crate::source::FrameSource;

pub const DICTIONARY_STREAM: &str = "dictionary";
pub const RESIDUAL_STREAM: &str = "residuals";

/// Dictionary, both trained models and the cached index grids of a clip.
#[derive(Debug, Clone)]
pub struct TrainedCodec {
    pub dictionary: Dictionary,
    pub index_model: SymbolModel,
    pub residual_model: SymbolModel,
    pub grids: Vec<TileIndexGrid>,
}

#[derive(Debug, Clone, Copy)]
pub struct StreamSummary {
    pub symbols: u64,
    pub bytes: usize,
    /// Order-0 entropy of the trained model, bits per symbol.
    pub entropy_bits: f64,
}

/// Outcome of [`encode_clip`]. Each stream succeeds or fails on its own.
#[derive(Debug)]
pub struct PipelineReport {
    pub frames: usize,
    pub dictionary_len: usize,
    pub index_stream: Result<StreamSummary>,
    pub residual_stream: Result<StreamSummary>,
}

impl PipelineReport {
    pub fn is_ok(&self) -> bool {
        self.index_stream.is_ok() && self.residual_stream.is_ok()
    }
}

fn check_source<S: FrameSource + ?Sized>(config: &TileConfig, source: &S) -> Result<()> {
    let expected = (config.width(), config.height());
    if source.dims() != expected {
        return Err(TileError::DimensionMismatch {
            expected,
            got: source.dims(),
        });
    }
    Ok(())
}

/// Passes 1-3. Deterministic: the same clip and config always produce the
/// same dictionary, grids and models.
pub fn train<S: FrameSource + ?Sized>(config: &TileConfig, source: &mut S) -> Result<TrainedCodec> {
    check_source(config, source)?;

    let t0 = Instant::now();
    source.rewind()?;
    let dictionary = build_dictionary(config, source)?;
    info!(
        entries = dictionary.len(),
        secs = t0.elapsed().as_secs_f64(),
        "pass 1: dictionary"
    );

    let t1 = Instant::now();
    source.rewind()?;
    let mut index_model = SymbolModel::new();
    let mut grids = Vec::with_capacity(config.frames());
    for f in 0..config.frames() {
        let frame = source.expect_frame(f)?;
        let grid = encode_frame(config, &dictionary, &frame)?;
        index_model.train_with(grid.indices().iter().copied());
        grids.push(grid);
        debug!(frame = f, "index grid");
    }
    info!(
        symbols = index_model.total(),
        entropy = index_model.entropy_bits(),
        secs = t1.elapsed().as_secs_f64(),
        "pass 2: index model"
    );
    index_model.log_probabilities(DICTIONARY_STREAM);

    let t2 = Instant::now();
    source.rewind()?;
    let mut residual_model = SymbolModel::new();
    for (f, grid) in grids.iter().enumerate() {
        let frame = source.expect_frame(f)?;
        let residual = residuals_from_encoded_frame(config, &dictionary, &frame, grid)?;
        residual_model.train_with(residual.symbols());
        debug!(frame = f, "residual frame");
    }
    info!(
        symbols = residual_model.total(),
        entropy = residual_model.entropy_bits(),
        secs = t2.elapsed().as_secs_f64(),
        "pass 3: residual model"
    );
    residual_model.log_probabilities(RESIDUAL_STREAM);

    Ok(TrainedCodec {
        dictionary,
        index_model,
        residual_model,
        grids,
    })
}

fn summarize(model: &SymbolModel, bytes: usize) -> StreamSummary {
    StreamSummary {
        symbols: model.total(),
        bytes,
        entropy_bits: model.entropy_bits(),
    }
}

/// Run all passes and write the index stream to `index_sink` and the
/// residual stream to `residual_sink`, each in strict frame order and each
/// closed exactly once.
///
/// Frame-source failures abort the run; coder failures only mark the
/// affected stream as failed in the report.
pub fn encode_clip<S, W1, W2>(
    config: &TileConfig,
    source: &mut S,
    index_sink: &mut W1,
    residual_sink: &mut W2,
) -> Result<PipelineReport>
where
    S: FrameSource + ?Sized,
    W1: Write,
    W2: Write,
{
    let trained = train(config, source)?;
    let t0 = Instant::now();

    let index_stream = (|| -> Result<StreamSummary> {
        let mut enc = RansEncoder::new(&trained.index_model, DICTIONARY_STREAM)?;
        for grid in &trained.grids {
            enc.encode_all(grid.indices().iter().copied())?;
        }
        let bytes = enc.close(index_sink)?;
        Ok(summarize(&trained.index_model, bytes))
    })();
    if let Err(e) = &index_stream {
        warn!(stream = DICTIONARY_STREAM, error = %e, "stream failed");
    }

    source.rewind()?;
    let mut residual_enc: Result<RansEncoder> =
        RansEncoder::new(&trained.residual_model, RESIDUAL_STREAM).map_err(TileError::from);
    for (f, grid) in trained.grids.iter().enumerate() {
        let frame = source.expect_frame(f)?;
        let residual = residuals_from_encoded_frame(config, &trained.dictionary, &frame, grid)?;
        if let Ok(enc) = residual_enc.as_mut() {
            if let Err(e) = enc.encode_all(residual.symbols()) {
                residual_enc = Err(e.into());
            }
        }
    }
    let residual_stream = residual_enc.and_then(|enc| {
        let bytes = enc.close(residual_sink)?;
        Ok(summarize(&trained.residual_model, bytes))
    });
    if let Err(e) = &residual_stream {
        warn!(stream = RESIDUAL_STREAM, error = %e, "stream failed");
    }

    info!(secs = t0.elapsed().as_secs_f64(), "pass 4: streams written");

    Ok(PipelineReport {
        frames: config.frames(),
        dictionary_len: trained.dictionary.len(),
        index_stream,
        residual_stream,
    })
}

/// Outcome of [`decode_clip_with`], one result per stream.
///
/// A failed index stream yields no frames. A failed residual stream with an
/// intact index stream still yields every frame, at bucket resolution: the
/// dictionary prediction without the residual correction.
#[derive(Debug)]
pub struct DecodeReport {
    pub frames: usize,
    pub index_stream: Result<()>,
    pub residual_stream: Result<()>,
}

impl DecodeReport {
    /// Both streams decoded, so every emitted frame is the original.
    pub fn is_exact(&self) -> bool {
        self.index_stream.is_ok() && self.residual_stream.is_ok()
    }
}

fn open_stream(model: &SymbolModel, blob: &[u8], expected: usize, name: &str) -> Result<RansDecoder> {
    let decoder = RansDecoder::new(model, blob, expected).map_err(TileError::from);
    if let Err(e) = &decoder {
        warn!(stream = name, error = %e, "stream failed");
    }
    decoder
}

/// Rebuild the dictionary and models from `training` (the same clip the
/// encoder saw), then decode both streams frame by frame into `on_frame`.
///
/// Training, source and callback failures abort the run; a bad stream only
/// marks itself failed in the returned [`DecodeReport`].
pub fn decode_clip_with<S, F>(
    config: &TileConfig,
    training: &mut S,
    index_stream: &[u8],
    residual_stream: &[u8],
    mut on_frame: F,
) -> Result<DecodeReport>
where
    S: FrameSource + ?Sized,
    F: FnMut(Frame) -> Result<()>,
{
    let trained = train(config, training)?;

    let tiles = config.tiles_x() * config.tiles_y();
    let indices = open_stream(
        &trained.index_model,
        index_stream,
        config.frames() * tiles,
        DICTIONARY_STREAM,
    );
    let mut residuals = open_stream(
        &trained.residual_model,
        residual_stream,
        config.frames() * config.frame_len(),
        RESIDUAL_STREAM,
    );

    let mut indices = match indices {
        Ok(d) => d,
        Err(e) => {
            return Ok(DecodeReport {
                frames: 0,
                index_stream: Err(e),
                residual_stream: residuals.map(|_| ()),
            })
        }
    };

    let mut symbols = vec![0u8; config.frame_len()];
    for f in 0..config.frames() {
        let idx = (0..tiles)
            .map(|_| indices.decode())
            .collect::<std::result::Result<Vec<u8>, _>>()?;
        let grid = TileIndexGrid::new(config.tiles_x(), config.tiles_y(), idx)?;

        let frame = match residuals.as_mut() {
            Ok(dec) => {
                for s in symbols.iter_mut() {
                    *s = dec.decode()?;
                }
                reconstruct_frame(config, &trained.dictionary, &grid, &symbols)?
            }
            Err(_) => predicted_frame(config, &trained.dictionary, &grid)?,
        };
        debug!(frame = f, "decoded frame");
        on_frame(frame)?;
    }

    Ok(DecodeReport {
        frames: config.frames(),
        index_stream: Ok(()),
        residual_stream: residuals.map(|_| ()),
    })
}

/// Decode the whole clip, failing unless both streams decode.
pub fn decode_clip<S: FrameSource + ?Sized>(
    config: &TileConfig,
    training: &mut S,
    index_stream: &[u8],
    residual_stream: &[u8],
) -> Result<Vec<Frame>> {
    let mut frames = Vec::with_capacity(config.frames());
    let report = decode_clip_with(config, training, index_stream, residual_stream, |f| {
        frames.push(f);
        Ok(())
    })?;
    report.index_stream?;
    report.residual_stream?;
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryFrameSource;

    fn clip() -> (TileConfig, MemoryFrameSource) {
        let cfg = TileConfig::builder(6, 6, 2).dictionary_size(2).build().unwrap();
        let mut a = Frame::filled(6, 6, 0);
        let mut b = Frame::filled(6, 6, 130);
        for y in 0..3 {
            for x in 0..3 {
                a.set(x, y, 128);
                b.set(x + 3, y + 3, 5);
            }
        }
        (cfg, MemoryFrameSource::new(6, 6, vec![a, b]).unwrap())
    }

    #[test]
    fn training_is_reproducible() {
        let (cfg, mut src) = clip();
        let a = train(&cfg, &mut src).unwrap();
        let b = train(&cfg, &mut src).unwrap();
        assert_eq!(a.dictionary, b.dictionary);
        assert_eq!(a.index_model, b.index_model);
        assert_eq!(a.residual_model, b.residual_model);
        assert_eq!(a.grids, b.grids);
        assert_eq!(a.index_model.total(), 8);
        assert_eq!(a.residual_model.total(), 72);
    }

    #[test]
    fn encode_then_decode_restores_frames() {
        let (cfg, mut src) = clip();
        let mut idx = Vec::new();
        let mut res = Vec::new();
        let report = encode_clip(&cfg, &mut src, &mut idx, &mut res).unwrap();
        assert!(report.is_ok());
        assert_eq!(report.index_stream.as_ref().unwrap().symbols, 8);
        assert_eq!(report.residual_stream.as_ref().unwrap().bytes, res.len());

        let frames = decode_clip(&cfg, &mut src, &idx, &res).unwrap();
        src.rewind().unwrap();
        for (f, got) in frames.iter().enumerate() {
            assert_eq!(got, &src.expect_frame(f).unwrap());
        }
    }

    #[test]
    fn source_with_other_dims_is_fatal() {
        let cfg = TileConfig::builder(9, 6, 1).dictionary_size(2).build().unwrap();
        let mut src = MemoryFrameSource::new(6, 6, vec![Frame::filled(6, 6, 0)]).unwrap();
        assert!(matches!(
            train(&cfg, &mut src),
            Err(TileError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn short_clip_is_truncation() {
        let cfg = TileConfig::builder(6, 6, 3).training_frames(1).dictionary_size(2).build().unwrap();
        let mut src = MemoryFrameSource::new(6, 6, vec![Frame::filled(6, 6, 0); 2]).unwrap();
        let mut idx = Vec::new();
        let mut res = Vec::new();
        assert!(matches!(
            encode_clip(&cfg, &mut src, &mut idx, &mut res),
            Err(TileError::TruncatedInput { frame: 2, .. })
        ));
    }

    #[test]
    fn mismatched_training_fails_to_decode() {
        let (cfg, mut src) = clip();
        let mut idx = Vec::new();
        let mut res = Vec::new();
        encode_clip(&cfg, &mut src, &mut idx, &mut res).unwrap();

        let one_frame = TileConfig::builder(6, 6, 1).training_frames(1).dictionary_size(2).build().unwrap();
        // one-frame training yields different models, so decoding fails one way or another
        assert!(decode_clip(&one_frame, &mut src, &idx, &res).is_err());
    }

    #[test]
    fn bad_index_stream_yields_no_frames() {
        let (cfg, mut src) = clip();
        let mut idx = Vec::new();
        let mut res = Vec::new();
        encode_clip(&cfg, &mut src, &mut idx, &mut res).unwrap();

        let mut emitted = 0;
        let report = decode_clip_with(&cfg, &mut src, &idx[..idx.len() - 1], &res, |_| {
            emitted += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!((report.frames, emitted), (0, 0));
        assert!(matches!(report.index_stream, Err(TileError::Format(_))));
        assert!(report.residual_stream.is_ok());
        assert!(!report.is_exact());
    }
}

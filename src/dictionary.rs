//! Frequency-driven tile dictionary.
//!
//! Building is two passes: [`TileCounter`] counts tile codes over the
//! training frames, then [`TileCounter::select`] keeps the most frequent
//! codes, ordered by descending count with ties broken by ascending code.

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{DegeneratePolicy, TileConfig};
use crate::error::{Result, TileError};
use crate::frame::Frame;
use crate::quantizer::{decode_tile_into, encode_tile, TileCode};
use crate::source::FrameSource;

/// Immutable ordered set of distinct tile codes plus their decoded tiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dictionary {
    codes: Vec<TileCode>,
    // decoded representative tiles, `tile_area` pixels per entry
    tiles: Vec<u8>,
    tile_size: usize,
    buckets: u32,
    dims: (usize, usize),
}

impl Dictionary {
    /// Wrap an explicit code list. Codes must be distinct and inside the
    /// configured code space.
    pub fn from_codes(config: &TileConfig, codes: Vec<TileCode>) -> Result<Self> {
        if codes.is_empty() {
            return Err(TileError::EmptyDictionary);
        }
        if codes.len() > crate::config::MAX_DICTIONARY_SIZE {
            return Err(TileError::InvalidConfig(format!(
                "{} dictionary entries do not fit the byte index alphabet",
                codes.len()
            )));
        }
        if let Some(&c) = codes.iter().find(|&&c| c as u64 >= config.code_space()) {
            return Err(TileError::InvalidConfig(format!(
                "tile code {c} outside code space {}",
                config.code_space()
            )));
        }
        verify_distinct(&codes)?;

        let area = config.tile_area();
        let mut tiles = vec![0u8; codes.len() * area];
        for (tile, &code) in tiles.chunks_exact_mut(area).zip(&codes) {
            decode_tile_into(code, config.buckets(), tile);
        }

        Ok(Self {
            codes,
            tiles,
            tile_size: config.tile_size(),
            buckets: config.buckets(),
            dims: (config.width(), config.height()),
        })
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn codes(&self) -> &[TileCode] {
        &self.codes
    }

    pub fn code(&self, index: usize) -> TileCode {
        self.codes[index]
    }

    /// Decoded representative tile of entry `index`, row-major.
    pub fn tile(&self, index: usize) -> &[u8] {
        let area = self.tile_size * self.tile_size;
        &self.tiles[index * area..(index + 1) * area]
    }

    pub fn tiles(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.tiles.chunks_exact(self.tile_size * self.tile_size)
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    pub fn buckets(&self) -> u32 {
        self.buckets
    }

    /// Frame dimensions the dictionary was built for.
    pub fn dims(&self) -> (usize, usize) {
        self.dims
    }

    /// Reject frames whose geometry differs from the training frames.
    pub fn check_frame(&self, frame: &Frame) -> Result<()> {
        if frame.dims() != self.dims {
            return Err(TileError::DimensionMismatch {
                expected: self.dims,
                got: frame.dims(),
            });
        }
        Ok(())
    }
}

/// Occurrence counts over the full tile code space.
pub struct TileCounter {
    counts: Vec<u32>,
    frames: usize,
    tiles: u64,
}

impl TileCounter {
    pub fn new(config: &TileConfig) -> Self {
        Self {
            counts: vec![0u32; config.code_space() as usize],
            frames: 0,
            tiles: 0,
        }
    }

    /// Count every whole tile of `frame`, stepping by `tile_size` on both axes.
    pub fn count_frame(&mut self, config: &TileConfig, frame: &Frame) -> Result<()> {
        let expected = (config.width(), config.height());
        if frame.dims() != expected {
            return Err(TileError::DimensionMismatch {
                expected,
                got: frame.dims(),
            });
        }

        for code in frame_tile_codes(config, frame) {
            let slot = &mut self.counts[code as usize];
            *slot = slot.saturating_add(1);
            self.tiles += 1;
        }
        self.frames += 1;
        Ok(())
    }

    pub fn count(&self, code: TileCode) -> u32 {
        self.counts[code as usize]
    }

    pub fn frames_counted(&self) -> usize {
        self.frames
    }

    pub fn tiles_counted(&self) -> u64 {
        self.tiles
    }

    /// Number of codes seen at least once.
    pub fn distinct_codes(&self) -> usize {
        self.counts.iter().filter(|&&c| c != 0).count()
    }

    /// Pick the dictionary: highest count first, ties by ascending code.
    pub fn select(&self, config: &TileConfig) -> Result<Dictionary> {
        let want = config.dictionary_size();

        let mut seen: Vec<(TileCode, u32)> = self
            .counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c != 0)
            .map(|(code, &c)| (code as TileCode, c))
            .collect();
        seen.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut codes: Vec<TileCode> = seen.iter().take(want).map(|&(code, _)| code).collect();

        if codes.len() < want {
            warn!(
                distinct = codes.len(),
                requested = want,
                policy = ?config.degenerate_policy(),
                "fewer distinct tile codes than dictionary slots"
            );
            if config.degenerate_policy() == DegeneratePolicy::PadUnseen {
                let missing = want - codes.len();
                codes.extend(
                    self.counts
                        .iter()
                        .enumerate()
                        .filter(|(_, &c)| c == 0)
                        .map(|(code, _)| code as TileCode)
                        .take(missing),
                );
            }
        }

        if codes.is_empty() {
            return Err(TileError::EmptyDictionary);
        }

        for (i, &code) in codes.iter().enumerate().take(8) {
            debug!(index = i, code, count = self.count(code), "dictionary entry");
        }

        Dictionary::from_codes(config, codes).map_err(|e| match e {
            TileError::InvalidConfig(msg) => TileError::InvariantViolation(msg),
            other => other,
        })
    }
}

/// Tile codes of every whole tile in `frame`, row-major over tile positions.
pub fn frame_tile_codes(config: &TileConfig, frame: &Frame) -> Vec<TileCode> {
    let ts = config.tile_size();
    let tiles_x = config.tiles_x();
    let buckets = config.buckets();

    (0..config.tiles_y())
        .into_par_iter()
        .flat_map_iter(|ty| {
            (0..tiles_x).map(move |tx| encode_tile(frame.tile(tx * ts, ty * ts, ts), buckets))
        })
        .collect()
}

/// Counting pass plus selection over the first `training_frames` frames of
/// `source`. The caller positions the source (normally at frame 0).
pub fn build_dictionary<S: FrameSource + ?Sized>(
    config: &TileConfig,
    source: &mut S,
) -> Result<Dictionary> {
    let mut counter = TileCounter::new(config);
    for f in 0..config.training_frames() {
        let frame = source.expect_frame(f)?;
        counter.count_frame(config, &frame)?;
        debug!(frame = f, "counted tiles");
    }

    let dictionary = counter.select(config)?;
    info!(
        frames = counter.frames_counted(),
        tiles = counter.tiles_counted(),
        distinct = counter.distinct_codes(),
        entries = dictionary.len(),
        "dictionary built"
    );
    Ok(dictionary)
}

fn verify_distinct(codes: &[TileCode]) -> Result<()> {
    let mut sorted = codes.to_vec();
    sorted.sort_unstable();
    if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
        return Err(TileError::InvariantViolation(format!(
            "duplicate dictionary entry {}",
            w[0]
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryFrameSource;

    fn config(dictionary_size: usize, policy: DegeneratePolicy) -> TileConfig {
        TileConfig::builder(6, 6, 2)
            .tile_size(3)
            .buckets(4)
            .dictionary_size(dictionary_size)
            .degenerate_policy(policy)
            .build()
            .unwrap()
    }

    #[test]
    fn zero_clip_with_one_marked_pixel() {
        let cfg = config(2, DegeneratePolicy::PadUnseen);
        let mut first = Frame::filled(6, 6, 0);
        first.set(0, 0, 64);
        let second = Frame::filled(6, 6, 0);
        let mut src = MemoryFrameSource::new(6, 6, vec![first, second]).unwrap();

        let dict = build_dictionary(&cfg, &mut src).unwrap();
        assert_eq!(dict.codes(), &[0, 4u32.pow(8)]);
        assert_eq!(dict.tile(1)[0], 64);
        assert!(dict.tile(1)[1..].iter().all(|&p| p == 0));
    }

    #[test]
    fn ties_break_by_ascending_code() {
        let cfg = TileConfig::builder(4, 1, 1)
            .tile_size(1)
            .buckets(4)
            .dictionary_size(3)
            .build()
            .unwrap();
        // buckets 3, 1, 2, 1: code 1 twice, codes 2 and 3 once each.
        let frame = Frame::new(4, 1, vec![192, 64, 128, 64]).unwrap();
        let mut counter = TileCounter::new(&cfg);
        counter.count_frame(&cfg, &frame).unwrap();
        let dict = counter.select(&cfg).unwrap();
        assert_eq!(dict.codes(), &[1, 2, 3]);
    }

    #[test]
    fn degenerate_pad_uses_lowest_unseen_codes() {
        let cfg = config(4, DegeneratePolicy::PadUnseen);
        let mut frame = Frame::filled(6, 6, 128);
        for y in 0..3 {
            for x in 0..3 {
                frame.set(x, y, 0);
            }
        }
        let mut counter = TileCounter::new(&cfg);
        counter.count_frame(&cfg, &frame).unwrap();
        assert_eq!(counter.distinct_codes(), 2);

        let all_two: TileCode = (0..9).fold(0, |c, _| c * 4 + 2);
        let dict = counter.select(&cfg).unwrap();
        // three tiles of bucket 2, one zero tile, then unseen codes 1 and 2
        assert_eq!(dict.codes(), &[all_two, 0, 1, 2]);
    }

    #[test]
    fn degenerate_truncate_returns_shorter_dictionary() {
        let cfg = config(4, DegeneratePolicy::Truncate);
        let mut counter = TileCounter::new(&cfg);
        counter.count_frame(&cfg, &Frame::filled(6, 6, 0)).unwrap();
        let dict = counter.select(&cfg).unwrap();
        assert_eq!(dict.codes(), &[0]);
    }

    #[test]
    fn selection_never_duplicates_under_ties() {
        let cfg = TileConfig::builder(16, 16, 1)
            .tile_size(2)
            .buckets(4)
            .dictionary_size(64)
            .build()
            .unwrap();
        let pixels: Vec<u8> = (0..256u32).map(|i| ((i * 37) % 256) as u8).collect();
        let frame = Frame::new(16, 16, pixels).unwrap();
        let mut counter = TileCounter::new(&cfg);
        counter.count_frame(&cfg, &frame).unwrap();
        let dict = counter.select(&cfg).unwrap();
        assert_eq!(dict.len(), 64);
        let mut sorted = dict.codes().to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 64);
    }

    #[test]
    fn rejects_duplicates_and_mismatched_frames() {
        let cfg = config(2, DegeneratePolicy::PadUnseen);
        assert!(matches!(
            Dictionary::from_codes(&cfg, vec![5, 5]),
            Err(TileError::InvariantViolation(_))
        ));
        assert!(matches!(
            Dictionary::from_codes(&cfg, vec![]),
            Err(TileError::EmptyDictionary)
        ));

        let dict = Dictionary::from_codes(&cfg, vec![0, 1]).unwrap();
        assert!(dict.check_frame(&Frame::filled(6, 6, 0)).is_ok());
        assert!(matches!(
            dict.check_frame(&Frame::filled(9, 6, 0)),
            Err(TileError::DimensionMismatch { .. })
        ));

        let mut counter = TileCounter::new(&cfg);
        assert!(counter.count_frame(&cfg, &Frame::filled(6, 9, 0)).is_err());
    }

    #[test]
    fn training_stops_at_configured_frame_count() {
        let cfg = TileConfig::builder(6, 6, 3)
            .training_frames(1)
            .dictionary_size(1)
            .build()
            .unwrap();
        let frames = vec![
            Frame::filled(6, 6, 0),
            Frame::filled(6, 6, 128),
            Frame::filled(6, 6, 128),
        ];
        let mut src = MemoryFrameSource::new(6, 6, frames).unwrap();
        let dict = build_dictionary(&cfg, &mut src).unwrap();
        assert_eq!(dict.codes(), &[0]);
    }

    #[test]
    fn short_training_clip_is_truncation() {
        let cfg = config(2, DegeneratePolicy::PadUnseen);
        let mut src = MemoryFrameSource::new(6, 6, vec![Frame::filled(6, 6, 0)]).unwrap();
        assert!(matches!(
            build_dictionary(&cfg, &mut src),
            Err(TileError::TruncatedInput { frame: 1, .. })
        ));
    }
}

//! Run configuration shared by every pass.
//!
//! A [`TileConfig`] is validated once, up front, and then threaded by reference
//! through the quantizer, dictionary builder, encoder and residual stages.

use crate::error::{Result, TileError};

// ====== defaults (450p clip) ======
pub const DEFAULT_WIDTH: usize = 800;
pub const DEFAULT_HEIGHT: usize = 450;
pub const DEFAULT_FRAMES: usize = 150;
pub const DEFAULT_TILE_SIZE: usize = 3;
pub const DEFAULT_BUCKETS: u32 = 4;
pub const DEFAULT_DICTIONARY_SIZE: usize = 64;

/// Upper bound on the tile code space; the counting pass keeps one `u32` per code.
pub const MAX_CODE_SPACE: u64 = 1 << 24;

/// Largest dictionary whose indices still fit the byte symbol alphabet.
pub const MAX_DICTIONARY_SIZE: usize = 256;

/// What the dictionary builder does when fewer distinct tile codes were
/// observed than the requested dictionary size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DegeneratePolicy {
    /// Fill the remaining slots with unseen codes, lowest code first.
    #[default]
    PadUnseen,
    /// Return a dictionary shorter than requested.
    Truncate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileConfig {
    width: usize,
    height: usize,
    frames: usize,
    training_frames: usize,
    tile_size: usize,
    buckets: u32,
    dictionary_size: usize,
    degenerate_policy: DegeneratePolicy,
    code_space: u64,
}

impl TileConfig {
    pub fn builder(width: usize, height: usize, frames: usize) -> TileConfigBuilder {
        TileConfigBuilder {
            width,
            height,
            frames,
            training_frames: None,
            tile_size: DEFAULT_TILE_SIZE,
            buckets: DEFAULT_BUCKETS,
            dictionary_size: DEFAULT_DICTIONARY_SIZE,
            degenerate_policy: DegeneratePolicy::default(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of leading frames scanned by the dictionary counting pass.
    pub fn training_frames(&self) -> usize {
        self.training_frames
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    pub fn buckets(&self) -> u32 {
        self.buckets
    }

    pub fn bucket_size(&self) -> u32 {
        256 / self.buckets
    }

    pub fn dictionary_size(&self) -> usize {
        self.dictionary_size
    }

    pub fn degenerate_policy(&self) -> DegeneratePolicy {
        self.degenerate_policy
    }

    /// `buckets ^ (tile_size^2)`: number of distinct tile codes.
    pub fn code_space(&self) -> u64 {
        self.code_space
    }

    /// Pixels in one tile.
    pub fn tile_area(&self) -> usize {
        self.tile_size * self.tile_size
    }

    /// Whole tiles per row.
    pub fn tiles_x(&self) -> usize {
        self.width / self.tile_size
    }

    /// Whole tiles per column.
    pub fn tiles_y(&self) -> usize {
        self.height / self.tile_size
    }

    pub fn frame_len(&self) -> usize {
        self.width * self.height
    }
}

#[derive(Debug, Clone)]
pub struct TileConfigBuilder {
    width: usize,
    height: usize,
    frames: usize,
    training_frames: Option<usize>,
    tile_size: usize,
    buckets: u32,
    dictionary_size: usize,
    degenerate_policy: DegeneratePolicy,
}

impl TileConfigBuilder {
    pub fn training_frames(mut self, n: usize) -> Self {
        self.training_frames = Some(n);
        self
    }

    pub fn tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn buckets(mut self, buckets: u32) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn dictionary_size(mut self, n: usize) -> Self {
        self.dictionary_size = n;
        self
    }

    pub fn degenerate_policy(mut self, policy: DegeneratePolicy) -> Self {
        self.degenerate_policy = policy;
        self
    }

    /// Validate and freeze the configuration. Nothing runs on an invalid one.
    pub fn build(self) -> Result<TileConfig> {
        let invalid = |msg: String| Err(TileError::InvalidConfig(msg));

        if self.buckets < 2 || self.buckets > 256 || 256 % self.buckets != 0 {
            return invalid(format!(
                "buckets must divide 256 and lie in 2..=256, got {}",
                self.buckets
            ));
        }
        if self.tile_size == 0 {
            return invalid("tile size must be at least 1".into());
        }
        if self.width < self.tile_size || self.height < self.tile_size {
            return invalid(format!(
                "frame {}x{} is smaller than one {}x{} tile",
                self.width, self.height, self.tile_size, self.tile_size
            ));
        }
        if self.frames == 0 {
            return invalid("frame count must be at least 1".into());
        }
        let training_frames = self.training_frames.unwrap_or(self.frames);
        if training_frames == 0 || training_frames > self.frames {
            return invalid(format!(
                "training frames must lie in 1..={}, got {}",
                self.frames, training_frames
            ));
        }

        let area = self.tile_size * self.tile_size;
        let code_space = u32::try_from(area)
            .ok()
            .and_then(|a| (self.buckets as u64).checked_pow(a))
            .filter(|&s| s <= MAX_CODE_SPACE);
        let Some(code_space) = code_space else {
            return invalid(format!(
                "code space {}^{} exceeds the counter limit of {}",
                self.buckets, area, MAX_CODE_SPACE
            ));
        };

        if self.dictionary_size == 0 || self.dictionary_size > MAX_DICTIONARY_SIZE {
            return invalid(format!(
                "dictionary size must lie in 1..={}, got {}",
                MAX_DICTIONARY_SIZE, self.dictionary_size
            ));
        }
        if self.dictionary_size as u64 > code_space {
            return invalid(format!(
                "dictionary size {} exceeds the {} distinct tile codes",
                self.dictionary_size, code_space
            ));
        }

        Ok(TileConfig {
            width: self.width,
            height: self.height,
            frames: self.frames,
            training_frames,
            tile_size: self.tile_size,
            buckets: self.buckets,
            dictionary_size: self.dictionary_size,
            degenerate_policy: self.degenerate_policy,
            code_space,
        })
    }
}

impl Default for TileConfig {
    fn default() -> Self {
        TileConfig {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frames: DEFAULT_FRAMES,
            training_frames: DEFAULT_FRAMES,
            tile_size: DEFAULT_TILE_SIZE,
            buckets: DEFAULT_BUCKETS,
            dictionary_size: DEFAULT_DICTIONARY_SIZE,
            degenerate_policy: DegeneratePolicy::PadUnseen,
            code_space: (DEFAULT_BUCKETS as u64).pow((DEFAULT_TILE_SIZE * DEFAULT_TILE_SIZE) as u32),
        }
    }
}

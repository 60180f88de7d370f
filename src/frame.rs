//! Grid value types: frames, tile-index grids and residual grids.
//!
//! All grids are flat row-major buffers with the width as stride.

use crate::error::{Result, TileError};

/// One 8-bit plane, `width * height` pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self> {
        if pixels.len() != width * height {
            return Err(TileError::Format(format!(
                "frame buffer holds {} pixels, {}x{} needs {}",
                pixels.len(),
                width,
                height,
                width * height
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: u8) {
        self.pixels[y * self.width + x] = v;
    }

    pub fn row(&self, y: usize) -> &[u8] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.pixels
    }

    /// Pixels of the `tile_size` square whose top-left corner is `(x, y)`,
    /// in row-major order. The tile must lie inside the frame.
    pub fn tile(&self, x: usize, y: usize, tile_size: usize) -> impl Iterator<Item = u8> + '_ {
        (y..y + tile_size).flat_map(move |yy| self.row(yy)[x..x + tile_size].iter().copied())
    }
}

/// Dictionary index per tile position, `tiles_x * tiles_y` entries, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileIndexGrid {
    tiles_x: usize,
    tiles_y: usize,
    indices: Vec<u8>,
}

impl TileIndexGrid {
    pub fn new(tiles_x: usize, tiles_y: usize, indices: Vec<u8>) -> Result<Self> {
        if indices.len() != tiles_x * tiles_y {
            return Err(TileError::Format(format!(
                "index grid holds {} entries, {}x{} tiles need {}",
                indices.len(),
                tiles_x,
                tiles_y,
                tiles_x * tiles_y
            )));
        }
        Ok(Self {
            tiles_x,
            tiles_y,
            indices,
        })
    }

    pub fn tiles_x(&self) -> usize {
        self.tiles_x
    }

    pub fn tiles_y(&self) -> usize {
        self.tiles_y
    }

    #[inline]
    pub fn get(&self, tx: usize, ty: usize) -> u8 {
        self.indices[ty * self.tiles_x + tx]
    }

    /// Indices in emission order (row-major over tile positions).
    pub fn indices(&self) -> &[u8] {
        &self.indices
    }
}

/// Signed `original - predicted` differences, shaped like the source frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidualFrame {
    width: usize,
    height: usize,
    values: Vec<i16>,
}

impl ResidualFrame {
    pub(crate) fn from_values(width: usize, height: usize, values: Vec<i16>) -> Self {
        debug_assert_eq!(values.len(), width * height);
        Self {
            width,
            height,
            values,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> i16 {
        self.values[y * self.width + x]
    }

    pub fn values(&self) -> &[i16] {
        &self.values
    }

    /// Residual symbols as written to the residual stream: each difference
    /// wrapped modulo 256 (low byte of the two's complement value).
    pub fn symbols(&self) -> impl Iterator<Item = u8> + '_ {
        self.values.iter().map(|&r| residual_symbol(r))
    }
}

#[inline]
pub fn residual_symbol(r: i16) -> u8 {
    r as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_iterates_row_major() {
        let pixels: Vec<u8> = (0..16).collect();
        let f = Frame::new(4, 4, pixels).unwrap();
        let t: Vec<u8> = f.tile(1, 1, 2).collect();
        assert_eq!(t, vec![5, 6, 9, 10]);
    }

    #[test]
    fn rejects_wrong_buffer_len() {
        assert!(Frame::new(3, 3, vec![0; 8]).is_err());
        assert!(TileIndexGrid::new(2, 2, vec![0; 3]).is_err());
    }

    #[test]
    fn residual_symbols_wrap() {
        let r = ResidualFrame::from_values(2, 2, vec![0, -1, 255, -255]);
        let s: Vec<u8> = r.symbols().collect();
        assert_eq!(s, vec![0, 255, 255, 1]);
    }
}

//! Prediction from a tile-index grid, and the residual against the original.

use rayon::prelude::*;

use crate::config::TileConfig;
use crate::dictionary::Dictionary;
use crate::error::{Result, TileError};
use crate::frame::{Frame, ResidualFrame, TileIndexGrid};

fn check_grid(config: &TileConfig, dictionary: &Dictionary, grid: &TileIndexGrid) -> Result<()> {
    if (grid.tiles_x(), grid.tiles_y()) != (config.tiles_x(), config.tiles_y()) {
        return Err(TileError::DimensionMismatch {
            expected: (config.tiles_x(), config.tiles_y()),
            got: (grid.tiles_x(), grid.tiles_y()),
        });
    }
    if let Some(&bad) = grid.indices().iter().find(|&&i| i as usize >= dictionary.len()) {
        return Err(TileError::InvariantViolation(format!(
            "tile index {bad} outside dictionary of {} entries",
            dictionary.len()
        )));
    }
    Ok(())
}

/// Frame assembled from the dictionary tiles named by `grid`. Pixels outside
/// whole-tile coverage (right and bottom margins) are predicted as 0.
pub fn predicted_frame(config: &TileConfig, dictionary: &Dictionary, grid: &TileIndexGrid) -> Result<Frame> {
    check_grid(config, dictionary, grid)?;

    let width = config.width();
    let ts = config.tile_size();
    let mut pixels = vec![0u8; config.frame_len()];

    pixels
        .par_chunks_mut(width * ts)
        .take(config.tiles_y())
        .enumerate()
        .for_each(|(ty, band)| {
            for tx in 0..grid.tiles_x() {
                let rep = dictionary.tile(grid.get(tx, ty) as usize);
                for (row, rep_row) in rep.chunks_exact(ts).enumerate() {
                    let start = row * width + tx * ts;
                    band[start..start + ts].copy_from_slice(rep_row);
                }
            }
        });

    Frame::new(width, config.height(), pixels)
}

/// `original - predicted` for every pixel of `frame`.
pub fn residuals_from_encoded_frame(
    config: &TileConfig,
    dictionary: &Dictionary,
    frame: &Frame,
    grid: &TileIndexGrid,
) -> Result<ResidualFrame> {
    dictionary.check_frame(frame)?;
    let predicted = predicted_frame(config, dictionary, grid)?;

    let values: Vec<i16> = frame
        .as_bytes()
        .par_iter()
        .zip(predicted.as_bytes().par_iter())
        .map(|(&o, &p)| o as i16 - p as i16)
        .collect();

    Ok(ResidualFrame::from_values(frame.width(), frame.height(), values))
}

/// Inverse of the residual step: add wrapped residual symbols back onto the
/// prediction. Exact for symbols produced by [`ResidualFrame::symbols`].
pub fn reconstruct_frame(
    config: &TileConfig,
    dictionary: &Dictionary,
    grid: &TileIndexGrid,
    residual_symbols: &[u8],
) -> Result<Frame> {
    if residual_symbols.len() != config.frame_len() {
        return Err(TileError::Format(format!(
            "{} residual symbols for a {}-pixel frame",
            residual_symbols.len(),
            config.frame_len()
        )));
    }
    let predicted = predicted_frame(config, dictionary, grid)?;
    let pixels: Vec<u8> = predicted
        .as_bytes()
        .par_iter()
        .zip(residual_symbols.par_iter())
        .map(|(&p, &r)| p.wrapping_add(r))
        .collect();
    Frame::new(config.width(), config.height(), pixels)
}

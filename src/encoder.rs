//! Nearest-dictionary-entry search.
//!
//! Each tile position is compared against every decoded dictionary tile by
//! sum of absolute differences, which costs
//! `O(dictionary_size * tile_size^2)` per tile position. This is the hot
//! loop of the whole pipeline, so tile rows are searched in parallel.

use rayon::prelude::*;

use crate::config::TileConfig;
use crate::dictionary::Dictionary;
use crate::error::{Result, TileError};
use crate::frame::{Frame, TileIndexGrid};

/// Sum of absolute pixel differences between two equally sized tiles.
#[inline]
pub fn tile_distance<I>(pixels: I, representative: &[u8]) -> u32
where
    I: IntoIterator<Item = u8>,
{
    pixels
        .into_iter()
        .zip(representative)
        .map(|(p, &r)| (p as i32 - r as i32).unsigned_abs())
        .sum()
}

/// Index of the dictionary entry closest to the tile whose top-left pixel is
/// `(x, y)`. On equal distance the lowest index wins.
///
/// The whole tile must lie inside `frame`; otherwise
/// [`TileError::TileOutOfBounds`] is returned.
pub fn best_tile_from_dictionary(frame: &Frame, x: usize, y: usize, dictionary: &Dictionary) -> Result<usize> {
    if dictionary.is_empty() {
        return Err(TileError::EmptyDictionary);
    }
    let ts = dictionary.tile_size();
    let (width, height) = frame.dims();
    let fits = |p: usize, limit: usize| p.checked_add(ts).is_some_and(|end| end <= limit);
    if !fits(x, width) || !fits(y, height) {
        return Err(TileError::TileOutOfBounds { x, y, width, height });
    }
    Ok(nearest_entry(frame, x, y, dictionary))
}

// caller guarantees the tile is in bounds
fn nearest_entry(frame: &Frame, x: usize, y: usize, dictionary: &Dictionary) -> usize {
    let ts = dictionary.tile_size();
    let mut best = 0usize;
    let mut best_diff = u32::MAX;
    for (i, rep) in dictionary.tiles().enumerate() {
        let diff = tile_distance(frame.tile(x, y, ts), rep);
        if diff < best_diff {
            best_diff = diff;
            best = i;
            if diff == 0 {
                break;
            }
        }
    }
    best
}

/// Dictionary index for every whole tile of `frame`.
pub fn encode_frame(config: &TileConfig, dictionary: &Dictionary, frame: &Frame) -> Result<TileIndexGrid> {
    dictionary.check_frame(frame)?;
    if dictionary.is_empty() {
        return Err(TileError::EmptyDictionary);
    }

    let ts = config.tile_size();
    let tiles_x = config.tiles_x();
    let tiles_y = config.tiles_y();

    let indices: Vec<u8> = (0..tiles_y)
        .into_par_iter()
        .flat_map_iter(|ty| {
            (0..tiles_x).map(move |tx| nearest_entry(frame, tx * ts, ty * ts, dictionary) as u8)
        })
        .collect();

    TileIndexGrid::new(tiles_x, tiles_y, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantizer::encode_tile;
    use proptest::prelude::*;

    fn cfg() -> TileConfig {
        TileConfig::builder(6, 6, 1)
            .tile_size(3)
            .buckets(4)
            .dictionary_size(4)
            .build()
            .unwrap()
    }

    fn uniform(digit: u32) -> u32 {
        (0..9).fold(0, |c, _| c * 4 + digit)
    }

    #[test]
    fn picks_exact_match() {
        let cfg = cfg();
        let dict = Dictionary::from_codes(&cfg, vec![uniform(0), uniform(1), uniform(2), uniform(3)]).unwrap();
        let frame = Frame::filled(6, 6, 128);
        assert_eq!(best_tile_from_dictionary(&frame, 0, 0, &dict).unwrap(), 2);
        let frame = Frame::filled(6, 6, 70);
        assert_eq!(best_tile_from_dictionary(&frame, 3, 3, &dict).unwrap(), 1);
    }

    #[test]
    fn equidistant_entries_resolve_to_lowest_index() {
        let cfg = cfg();
        // 96 is 32 away from both 64 and 128.
        let dict = Dictionary::from_codes(&cfg, vec![uniform(2), uniform(1), uniform(3)]).unwrap();
        let frame = Frame::filled(6, 6, 96);
        assert_eq!(best_tile_from_dictionary(&frame, 0, 0, &dict).unwrap(), 0);

        let dict = Dictionary::from_codes(&cfg, vec![uniform(3), uniform(1), uniform(2)]).unwrap();
        assert_eq!(best_tile_from_dictionary(&frame, 0, 0, &dict).unwrap(), 1);
    }

    #[test]
    fn tile_past_the_frame_edge_is_an_error() {
        let cfg = cfg();
        let dict = Dictionary::from_codes(&cfg, vec![uniform(0), uniform(2)]).unwrap();
        let frame = Frame::filled(6, 6, 0);
        assert_eq!(best_tile_from_dictionary(&frame, 3, 0, &dict).unwrap(), 0);
        for (x, y) in [(4, 0), (0, 4), (6, 6), (usize::MAX, 0)] {
            assert!(matches!(
                best_tile_from_dictionary(&frame, x, y, &dict),
                Err(TileError::TileOutOfBounds { width: 6, height: 6, .. })
            ));
        }
    }

    #[test]
    fn grid_is_row_major_over_tiles() {
        let cfg = cfg();
        let dict = Dictionary::from_codes(&cfg, vec![uniform(0), uniform(2)]).unwrap();
        let mut frame = Frame::filled(6, 6, 0);
        for y in 0..3 {
            for x in 3..6 {
                frame.set(x, y, 128);
            }
        }
        let grid = encode_frame(&cfg, &dict, &frame).unwrap();
        assert_eq!((grid.tiles_x(), grid.tiles_y()), (2, 2));
        assert_eq!(grid.indices(), &[0, 1, 0, 0]);
        assert_eq!(grid.get(1, 0), 1);
    }

    #[test]
    fn ignores_partial_edge_tiles() {
        let cfg = TileConfig::builder(7, 5, 1).tile_size(3).dictionary_size(2).build().unwrap();
        let dict = Dictionary::from_codes(&cfg, vec![uniform(0), uniform(2)]).unwrap();
        let grid = encode_frame(&cfg, &dict, &Frame::filled(7, 5, 128)).unwrap();
        assert_eq!(grid.indices(), &[1, 1]);
    }

    #[test]
    fn rejects_frame_of_other_size() {
        let cfg = cfg();
        let dict = Dictionary::from_codes(&cfg, vec![0]).unwrap();
        assert!(matches!(
            encode_frame(&cfg, &dict, &Frame::filled(9, 9, 0)),
            Err(TileError::DimensionMismatch { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_choice_minimizes_distance(
            pixels in prop::collection::vec(any::<u8>(), 36),
            codes in prop::collection::btree_set(0u32..262_144, 1..16),
        ) {
            let cfg = TileConfig::builder(6, 6, 1)
                .dictionary_size(codes.len())
                .build()
                .unwrap();
            let dict = Dictionary::from_codes(&cfg, codes.into_iter().collect()).unwrap();
            let frame = Frame::new(6, 6, pixels).unwrap();
            let grid = encode_frame(&cfg, &dict, &frame).unwrap();

            for ty in 0..2 {
                for tx in 0..2 {
                    let chosen = grid.get(tx, ty) as usize;
                    let dists: Vec<u32> = dict
                        .tiles()
                        .map(|rep| tile_distance(frame.tile(tx * 3, ty * 3, 3), rep))
                        .collect();
                    let min = *dists.iter().min().unwrap();
                    prop_assert_eq!(dists[chosen], min);
                    prop_assert_eq!(dists.iter().position(|&d| d == min), Some(chosen));
                }
            }
        }
    }

    #[test]
    fn own_code_is_an_exact_match_at_lower_edges() {
        let cfg = cfg();
        let tile = [0u8, 64, 128, 192, 0, 64, 128, 192, 0];
        let code = encode_tile(tile, 4);
        let dict = Dictionary::from_codes(&cfg, vec![uniform(1), code]).unwrap();
        let mut frame = Frame::filled(6, 6, 0);
        for (i, &p) in tile.iter().enumerate() {
            frame.set(i % 3, i / 3, p);
        }
        assert_eq!(best_tile_from_dictionary(&frame, 0, 0, &dict).unwrap(), 1);
    }
}

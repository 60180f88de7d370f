//! Bucket quantization of pixels and tiles.
//!
//! A tile's bucket digits are packed as a base-`buckets` number, first pixel
//! (top-left, row-major) in the most significant digit.

/// Packed bucket digits of one tile, in `[0, buckets^(tile_size^2))`.
pub type TileCode = u32;

/// Quantization class of one pixel.
///
/// The half-bucket offset centers bucket 0 on pixel value 0, so values just
/// below 256 wrap into bucket 0 together with values just above 0.
#[inline]
pub fn bucket_code(pixel: u8, buckets: u32) -> u32 {
    let bucket_size = 256 / buckets;
    let shifted = (pixel as u32 + bucket_size / 2) % 256;
    shifted / bucket_size
}

/// Pack the bucket codes of `pixels` (row-major tile order).
pub fn encode_tile<I>(pixels: I, buckets: u32) -> TileCode
where
    I: IntoIterator<Item = u8>,
{
    pixels
        .into_iter()
        .fold(0, |code, p| code * buckets + bucket_code(p, buckets))
}

/// Write the representative pixels of `code` into `out` (row-major).
///
/// Each pixel is the lower edge of its bucket (`digit * bucket_size`), not the
/// bucket center that `bucket_code` rounds to.
pub fn decode_tile_into(code: TileCode, buckets: u32, out: &mut [u8]) {
    let bucket_size = 256 / buckets;
    let mut rest = code;
    for px in out.iter_mut().rev() {
        let digit = rest % buckets;
        *px = (digit * bucket_size) as u8;
        rest /= buckets;
    }
}

pub fn decode_tile(code: TileCode, tile_size: usize, buckets: u32) -> Vec<u8> {
    let mut tile = vec![0u8; tile_size * tile_size];
    decode_tile_into(code, buckets, &mut tile);
    tile
}

//! rans.rs: byte-oriented rANS over a frozen order-0 [`SymbolModel`].
//!
//! The model is never written to the stream: encoder and decoder must be
//! built from identical models. Symbols are buffered by the encoder and
//! coded in independent chunks on `close`.
//!
//! Stream layout (little endian):
//!   MAGIC(4) symbols(u64) chunk(u32) chunks(u32) lens[chunks]*u32
//!   then per chunk: state(u32) renorm_len(u32) renorm[renorm_len]

use std::io::{Read, Write};

use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::model::{SymbolModel, ALPHABET};

#[derive(Error, Debug)]
pub enum RansError {
    #[error("Format error: {0}")]
    Format(String),
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RansError>;

/* ============================= Coder traits ============================= */

/// Sequential symbol encoder. `close` flushes all pending state into the
/// sink and consumes the encoder, so it runs exactly once per stream.
pub trait SymbolEncoder {
    fn encode(&mut self, symbol: u8) -> Result<()>;

    fn encode_all<I: IntoIterator<Item = u8>>(&mut self, symbols: I) -> Result<()> {
        for s in symbols {
            self.encode(s)?;
        }
        Ok(())
    }

    /// Returns the number of bytes written.
    fn close<W: Write>(self, sink: &mut W) -> Result<usize>;
}

pub trait SymbolDecoder {
    fn decode(&mut self) -> Result<u8>;

    /// Symbols still available.
    fn remaining(&self) -> usize;
}

/* ============================= Container constants ============================= */

const MAGIC: &[u8; 4] = b"TVQ1";
const HEADER_LEN: usize = 4 + 8 + 4 + 4;
const CHUNK_SIZE: usize = 1 << 16;

/* ============================= rANS model ============================= */

// TOTFREQ = 2^12
const SCALE_BITS: u32 = 12;
const TOTFREQ: u32 = 1 << SCALE_BITS;
const MASK: u32 = TOTFREQ - 1;
const RANS_L: u32 = 1 << 23;

#[derive(Clone)]
struct Model {
    freq: [u16; ALPHABET],
    cum: [u32; ALPHABET + 1],
    dec: Vec<DecEntry>, // len TOTFREQ
}

#[derive(Clone, Copy)]
struct DecEntry {
    sym: u8,
    freq: u16,
    cum: u32,
}

impl Model {
    fn from_symbol_model(m: &SymbolModel) -> Result<Self> {
        let freq = normalize_histogram(m.counts(), m.total())?;

        let mut cum = [0u32; ALPHABET + 1];
        let mut acc = 0u32;
        for s in 0..ALPHABET {
            cum[s] = acc;
            acc += freq[s] as u32;
        }
        cum[ALPHABET] = acc;
        if m.total() != 0 && acc != TOTFREQ {
            return Err(RansError::Codec(format!("normalized sum != TOTFREQ: {acc}")));
        }

        let mut dec = vec![DecEntry { sym: 0, freq: 0, cum: 0 }; TOTFREQ as usize];
        for s in 0..ALPHABET {
            let f = freq[s];
            if f == 0 {
                continue;
            }
            let start = cum[s] as usize;
            let end = start + f as usize;
            for e in &mut dec[start..end] {
                *e = DecEntry { sym: s as u8, freq: f, cum: cum[s] };
            }
        }

        Ok(Model { freq, cum, dec })
    }
}

/// Scale counts to sum to TOTFREQ; every seen symbol keeps freq >= 1.
fn normalize_histogram(hist: &[u64; ALPHABET], n: u64) -> Result<[u16; ALPHABET]> {
    let mut out = [0u16; ALPHABET];
    if n == 0 {
        return Ok(out);
    }

    let mut nonzero: Vec<usize> = (0..ALPHABET).filter(|&s| hist[s] != 0).collect();

    // initial scaling
    let mut sum = 0u32;
    for &s in &nonzero {
        let scaled = ((hist[s] as u128 * TOTFREQ as u128) / n as u128) as u32;
        let f = scaled.clamp(1, TOTFREQ);
        out[s] = f as u16;
        sum += f;
    }

    // deterministic adjust by descending count, ties by symbol
    nonzero.sort_by_key(|&s| (std::cmp::Reverse(hist[s]), s));

    if sum < TOTFREQ {
        let mut need = TOTFREQ - sum;
        let mut idx = 0usize;
        while need > 0 {
            let s = nonzero[idx % nonzero.len()];
            out[s] += 1;
            need -= 1;
            idx += 1;
        }
    } else if sum > TOTFREQ {
        let mut need = sum - TOTFREQ;
        let mut idx = 0usize;
        while need > 0 {
            let s = nonzero[idx % nonzero.len()];
            if out[s] > 1 {
                out[s] -= 1;
                need -= 1;
            }
            idx += 1;
        }
    }

    let final_sum: u32 = out.iter().map(|&f| f as u32).sum();
    if final_sum != TOTFREQ {
        return Err(RansError::Codec(format!("normalize failed: sum={final_sum}")));
    }

    Ok(out)
}

/* ============================= Encoder ============================= */

pub struct RansEncoder {
    model: Model,
    pending: Vec<u8>,
    name: String,
}

impl RansEncoder {
    pub fn new(model: &SymbolModel, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            model: Model::from_symbol_model(model)?,
            pending: Vec::new(),
            name: name.into(),
        })
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl SymbolEncoder for RansEncoder {
    fn encode(&mut self, symbol: u8) -> Result<()> {
        if self.model.freq[symbol as usize] == 0 {
            return Err(RansError::Codec(format!(
                "{}: symbol {symbol} has zero frequency in the model",
                self.name
            )));
        }
        self.pending.push(symbol);
        Ok(())
    }

    fn close<W: Write>(self, sink: &mut W) -> Result<usize> {
        let n = self.pending.len();
        let model = &self.model;

        let payloads: Vec<Vec<u8>> = self
            .pending
            .par_chunks(CHUNK_SIZE)
            .map(|chunk| rans_encode_bytes(chunk, model))
            .collect();

        let mut header = Vec::with_capacity(HEADER_LEN + payloads.len() * 4);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&(n as u64).to_le_bytes());
        header.extend_from_slice(&(CHUNK_SIZE as u32).to_le_bytes());
        header.extend_from_slice(&(payloads.len() as u32).to_le_bytes());
        for p in &payloads {
            header.extend_from_slice(&(p.len() as u32).to_le_bytes());
        }

        sink.write_all(&header)?;
        let mut written = header.len();
        for p in &payloads {
            sink.write_all(p)?;
            written += p.len();
        }
        sink.flush()?;

        debug!(
            stream = %self.name,
            symbols = n,
            chunks = payloads.len(),
            bytes = written,
            "closed rANS stream"
        );
        Ok(written)
    }
}

/* ============================= Decoder ============================= */

pub struct RansDecoder {
    symbols: Vec<u8>,
    pos: usize,
}

impl RansDecoder {
    /// Decode a whole stream produced by [`RansEncoder`] with the same model.
    ///
    /// `expected` is the symbol count the caller knows the stream must hold;
    /// a header claiming any other count is rejected before anything is
    /// allocated.
    pub fn new(model: &SymbolModel, blob: &[u8], expected: usize) -> Result<Self> {
        let model = Model::from_symbol_model(model)?;
        let symbols = decode_stream(blob, &model, expected)?;
        Ok(Self { symbols, pos: 0 })
    }

    pub fn from_reader<R: Read>(model: &SymbolModel, reader: &mut R, expected: usize) -> Result<Self> {
        let mut blob = Vec::new();
        reader.read_to_end(&mut blob)?;
        Self::new(model, &blob, expected)
    }
}

impl SymbolDecoder for RansDecoder {
    fn decode(&mut self) -> Result<u8> {
        let s = self
            .symbols
            .get(self.pos)
            .copied()
            .ok_or_else(|| RansError::Format("insufficient bits left in stream".into()))?;
        self.pos += 1;
        Ok(s)
    }

    fn remaining(&self) -> usize {
        self.symbols.len() - self.pos
    }
}

fn read_u32(buf: &[u8], off: &mut usize) -> Result<u32> {
    let b = buf
        .get(*off..*off + 4)
        .ok_or_else(|| RansError::Format("stream truncated (header)".into()))?;
    *off += 4;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn decode_stream(blob: &[u8], model: &Model, expected: usize) -> Result<Vec<u8>> {
    if blob.len() < HEADER_LEN {
        return Err(RansError::Format("stream too small".into()));
    }
    if &blob[0..4] != MAGIC {
        return Err(RansError::Format("bad magic".into()));
    }
    let mut n_bytes = [0u8; 8];
    n_bytes.copy_from_slice(&blob[4..12]);
    let n = usize::try_from(u64::from_le_bytes(n_bytes))
        .map_err(|_| RansError::Format("symbol count overflow".into()))?;
    if n != expected {
        return Err(RansError::Format(format!(
            "stream holds {n} symbols, expected {expected}"
        )));
    }

    let mut off = 12;
    let chunk_size = read_u32(blob, &mut off)? as usize;
    let chunks = read_u32(blob, &mut off)? as usize;
    // every chunk costs a 4-byte table entry and at least an 8-byte payload
    let table_end = chunks.checked_mul(4).and_then(|t| t.checked_add(HEADER_LEN));
    let min_len = chunks.checked_mul(8).and_then(|p| p.checked_add(table_end?));
    if min_len.map_or(true, |m| m > blob.len()) {
        return Err(RansError::Format(format!(
            "chunk table of {chunks} entries does not fit a {} byte stream",
            blob.len()
        )));
    }
    if chunk_size == 0 || chunks != n.div_ceil(chunk_size) {
        return Err(RansError::Format(format!(
            "chunk table mismatch: {chunks} chunks of {chunk_size} for {n} symbols"
        )));
    }

    let mut lens = Vec::with_capacity(chunks);
    for _ in 0..chunks {
        lens.push(read_u32(blob, &mut off)? as usize);
    }

    let mut chunk_blobs: Vec<&[u8]> = Vec::with_capacity(chunks);
    for &cl in &lens {
        let end = off
            .checked_add(cl)
            .filter(|&e| e <= blob.len())
            .ok_or_else(|| RansError::Format("stream truncated (chunk)".into()))?;
        chunk_blobs.push(&blob[off..end]);
        off = end;
    }
    if off != blob.len() {
        return Err(RansError::Format("stream has trailing bytes".into()));
    }

    let mut out = vec![0u8; n];
    out.par_chunks_mut(chunk_size)
        .zip(chunk_blobs.par_iter())
        .try_for_each(|(dst, payload)| rans_decode_bytes(payload, model, dst))?;

    Ok(out)
}

/* ============================= rANS core ============================= */

fn rans_encode_bytes(src: &[u8], m: &Model) -> Vec<u8> {
    // symbols are coded back to front; renorm bytes form a stack
    let mut state: u32 = RANS_L;
    let mut renorm: Vec<u8> = Vec::with_capacity(src.len() / 2);

    for &sym in src.iter().rev() {
        let s = sym as usize;
        let f = m.freq[s] as u32;
        let c = m.cum[s];

        let x_max = ((RANS_L >> SCALE_BITS) * f) << 8;
        while state >= x_max {
            renorm.push((state & 0xFF) as u8);
            state >>= 8;
        }

        let q = state / f;
        let r = state - q * f;
        state = q * TOTFREQ + r + c;
    }

    let mut payload = Vec::with_capacity(8 + renorm.len());
    payload.extend_from_slice(&state.to_le_bytes());
    payload.extend_from_slice(&(renorm.len() as u32).to_le_bytes());
    payload.extend_from_slice(&renorm);
    payload
}

fn rans_decode_bytes(payload: &[u8], m: &Model, dst: &mut [u8]) -> Result<()> {
    if payload.len() < 8 {
        return Err(RansError::Format("payload too small".into()));
    }
    let mut state = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let renorm_len = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]) as usize;
    if payload.len() != 8 + renorm_len {
        return Err(RansError::Format("payload length mismatch".into()));
    }

    let renorm = &payload[8..];
    let mut pos = renorm.len();

    for out in dst.iter_mut() {
        let e = m.dec[(state & MASK) as usize];
        if e.freq == 0 {
            return Err(RansError::Codec("state maps to a zero-frequency symbol".into()));
        }
        *out = e.sym;

        state = (e.freq as u32) * (state >> SCALE_BITS) + (state & MASK) - e.cum;

        while state < RANS_L {
            if pos == 0 {
                return Err(RansError::Format("insufficient bits left during renorm".into()));
            }
            pos -= 1;
            state = (state << 8) | (renorm[pos] as u32);
        }
    }

    if pos != 0 {
        return Err(RansError::Format("payload has trailing renorm bytes".into()));
    }
    Ok(())
}

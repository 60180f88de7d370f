//! Rewindable frame sources.
//!
//! The pipeline walks the same clip several times, so every source must be
//! able to restart from frame 0.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use crate::error::{Result, TileError};
use crate::frame::Frame;

pub trait FrameSource {
    /// `(width, height)` of every frame this source yields.
    fn dims(&self) -> (usize, usize);

    /// Restart from frame 0.
    fn rewind(&mut self) -> Result<()>;

    /// Next frame, or `Ok(None)` at a clean end of stream.
    /// A partial trailing frame is `TruncatedInput`.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Next frame, treating end of stream as truncation of frame `index`.
    fn expect_frame(&mut self, index: usize) -> Result<Frame> {
        match self.next_frame()? {
            Some(f) => Ok(f),
            None => {
                let (w, h) = self.dims();
                Err(TileError::TruncatedInput {
                    frame: index,
                    expected: w * h,
                    got: 0,
                })
            }
        }
    }
}

/// Headerless concatenated 8-bit planes read from any seekable reader.
pub struct ReaderFrameSource<R> {
    reader: R,
    width: usize,
    height: usize,
    frame_no: usize,
}

impl ReaderFrameSource<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>, width: usize, height: usize) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), width, height, "opened frame file");
        Ok(Self::new(BufReader::new(file), width, height))
    }
}

impl<R: Read + Seek> ReaderFrameSource<R> {
    pub fn new(reader: R, width: usize, height: usize) -> Self {
        Self {
            reader,
            width,
            height,
            frame_no: 0,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Seek> FrameSource for ReaderFrameSource<R> {
    fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn rewind(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.frame_no = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let need = self.width * self.height;
        let mut buf = vec![0u8; need];
        let mut got = 0usize;
        while got < need {
            match self.reader.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if got == 0 {
            return Ok(None);
        }
        if got < need {
            return Err(TileError::TruncatedInput {
                frame: self.frame_no,
                expected: need,
                got,
            });
        }
        self.frame_no += 1;
        Frame::new(self.width, self.height, buf).map(Some)
    }
}

/// Frames cached in memory; suits short clips and tests.
#[derive(Debug, Clone)]
pub struct MemoryFrameSource {
    width: usize,
    height: usize,
    frames: Vec<Frame>,
    cursor: usize,
}

impl MemoryFrameSource {
    pub fn new(width: usize, height: usize, frames: Vec<Frame>) -> Result<Self> {
        if let Some(bad) = frames.iter().find(|f| f.dims() != (width, height)) {
            return Err(TileError::DimensionMismatch {
                expected: (width, height),
                got: bad.dims(),
            });
        }
        Ok(Self {
            width,
            height,
            frames,
            cursor: 0,
        })
    }

    /// Split a headerless byte buffer into frames. A partial trailing frame
    /// is reported as truncation.
    pub fn from_bytes(width: usize, height: usize, bytes: &[u8]) -> Result<Self> {
        let need = width * height;
        if need == 0 {
            return Err(TileError::InvalidConfig("frame area must be non-zero".into()));
        }
        let chunks = bytes.chunks_exact(need);
        let rest = chunks.remainder();
        if !rest.is_empty() {
            return Err(TileError::TruncatedInput {
                frame: bytes.len() / need,
                expected: need,
                got: rest.len(),
            });
        }
        let frames = chunks
            .map(|c| Frame::new(width, height, c.to_vec()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(width, height, frames)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for MemoryFrameSource {
    fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let f = self.frames.get(self.cursor).cloned();
        if f.is_some() {
            self.cursor += 1;
        }
        Ok(f)
    }
}

use std::io;

use thiserror::Error;

// Every failure the codec core can surface. No retry or recovery happens at
// this level; callers decide what a corrupt stream or a failed frame means.
#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid dimensions {width}x{height}: both must be nonzero multiples of {multiple}")]
  InvalidDimensions {
    width: usize,
    height: usize,
    multiple: usize,
  },

  #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
  BufferSize { expected: usize, actual: usize },

  #[error("still coder failed: {0}")]
  StillCoder(String),

  #[error("i/o error: {0}")]
  Io(#[from] io::Error),

  // Signalled by the sentinel read past the last frame. The read that
  // returns this has not consumed anything.
  #[error("end of stream")]
  EndOfStream,

  #[error("unsupported stream feature: {0}")]
  Unsupported(&'static str),

  #[error("invalid stream: {0}")]
  InvalidStream(&'static str),

  #[error("worker task panicked")]
  TaskPanicked,
}

pub type Result<T> = std::result::Result<T, Error>;

// Minimal YUV4MPEG2 stream reader/writer for the CLI driver.
//
// Only the width and height parameters are interpreted; everything else on
// the header line is skipped. Frames are raw planar 4:2:0 payloads between
// FRAME markers.

use std::io::prelude::*;

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

const FILE_MAGIC: &str = "YUV4MPEG2 ";
const FRAME_MAGIC: &str = "FRAME";

pub struct Y4MReader<R> {
  inner: R,
  width: usize,
  height: usize,
}

pub struct Y4MWriter<W> {
  inner: W,
  width: usize,
  height: usize,
}

fn read_decimal<R: Read>(r: &mut R) -> Result<(usize, u8)> {
  let mut v = 0usize;
  loop {
    let byte = r.read_u8()?;
    match byte {
      b'0'..=b'9' => {
        v = 10 * v + (byte - b'0') as usize;
      }
      _ => {
        // Non-digit terminates the number.
        return Ok((v, byte));
      }
    }
  }
}

// Skip forward to the next whitespace character and return it.
fn find_whitespace<R: Read>(r: &mut R) -> Result<u8> {
  loop {
    let byte = r.read_u8()?;
    match byte {
      b' ' | b'\t' | b'\n' => return Ok(byte),
      _ => continue,
    }
  }
}

impl<R: Read> Y4MReader<R> {
  pub fn new(mut inner: R) -> Result<Self> {
    let mut file_magic = [0u8; 10];
    inner.read_exact(&mut file_magic)?;
    if file_magic != FILE_MAGIC.as_bytes() {
      return Err(Error::InvalidStream("not a YUV4MPEG2 stream"));
    }

    let mut width = 0;
    let mut height = 0;

    // Parse the parameter line.
    loop {
      match inner.read_u8()? {
        b'\n' => break,
        b' ' | b'\t' => continue,
        b'W' => {
          let (value, stop) = read_decimal(&mut inner)?;
          width = value;
          if stop == b'\n' {
            break;
          }
        }
        b'H' => {
          let (value, stop) = read_decimal(&mut inner)?;
          height = value;
          if stop == b'\n' {
            break;
          }
        }
        _ => {
          // A parameter we don't interpret; skip to the next separator.
          if find_whitespace(&mut inner)? == b'\n' {
            break;
          }
        }
      }
    }

    if width == 0 || height == 0 {
      return Err(Error::InvalidStream("YUV4MPEG2 header has no usable size"));
    }

    Ok(Y4MReader {
      inner: inner,
      width: width,
      height: height,
    })
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn frame_size(&self) -> usize {
    self.width * self.height * 3 / 2
  }

  // Read the next frame into `frame`. A clean end of the stream at a frame
  // boundary comes back as EndOfStream.
  pub fn read_frame(&mut self, frame: &mut [u8]) -> Result<()> {
    if frame.len() != self.frame_size() {
      return Err(Error::BufferSize {
        expected: self.frame_size(),
        actual: frame.len(),
      });
    }

    let mut frame_magic = [0u8; 5];
    match self.inner.read_exact(&mut frame_magic) {
      Ok(()) => {}
      Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
        return Err(Error::EndOfStream);
      }
      Err(e) => return Err(e.into()),
    }
    if frame_magic != FRAME_MAGIC.as_bytes() {
      return Err(Error::InvalidStream("bad FRAME marker"));
    }

    // The frame line can carry parameters; none are useful here.
    while self.inner.read_u8()? != b'\n' {}

    self.inner.read_exact(frame)?;
    Ok(())
  }
}

impl<W: Write> Y4MWriter<W> {
  pub fn new(mut inner: W, width: usize, height: usize) -> Result<Self> {
    inner.write_all(FILE_MAGIC.as_bytes())?;
    write!(inner, "W{} H{} F30:1 C420\n", width, height)?;

    Ok(Y4MWriter {
      inner: inner,
      width: width,
      height: height,
    })
  }

  pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
    let expected = self.width * self.height * 3 / 2;
    if frame.len() != expected {
      return Err(Error::BufferSize {
        expected: expected,
        actual: frame.len(),
      });
    }

    self.inner.write_all(FRAME_MAGIC.as_bytes())?;
    self.inner.write_u8(b'\n')?;
    self.inner.write_all(frame)?;
    Ok(())
  }

  pub fn into_inner(self) -> W {
    self.inner
  }
}

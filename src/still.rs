// Boundary to the external intra-frame still-image codec.
//
// The codec core never looks inside a compressed payload; everything it
// needs from the still coder fits in four calls. Implementations wrap a real
// transform coder (the reference system used turbojpeg); `RawStill` below is
// the passthrough used by the tests and the CLI driver.

use crate::error::{Error, Result};
use crate::frame::StripeShape;

pub trait StillCoder: Send {
  // Compress a planar YUV 4:2:0 image of the given luma dimensions.
  fn compress_yuv420(&mut self, src: &[u8], width: usize, height: usize, quality: u8) -> Result<Vec<u8>>;

  // Compress a single 8-bit plane as a grayscale channel.
  fn compress_plane(&mut self, src: &[u8], width: usize, height: usize, quality: u8) -> Result<Vec<u8>>;

  // Decompress into a planar YUV 4:2:0 buffer of exactly width*height*3/2
  // bytes.
  fn decompress_yuv420(&mut self, data: &[u8], dst: &mut [u8], width: usize, height: usize) -> Result<()>;

  // Decompress a grayscale channel into exactly width*height bytes.
  fn decompress_plane(&mut self, data: &[u8], dst: &mut [u8], width: usize, height: usize) -> Result<()>;
}

// Route one sub-frame stripe into the right entry point of the coder.
pub fn compress_stripe(
  coder: &mut dyn StillCoder,
  shape: StripeShape,
  src: &[u8],
  quality: u8,
) -> Result<Vec<u8>> {
  match shape {
    StripeShape::FullFrame { width, height } => coder.compress_yuv420(src, width, height, quality),
    StripeShape::Luma { width, height } => coder.compress_plane(src, width, height, quality),
    StripeShape::Chroma { width, height } => coder.compress_plane(src, width, height, quality),
  }
}

pub fn decompress_stripe(
  coder: &mut dyn StillCoder,
  shape: StripeShape,
  data: &[u8],
  dst: &mut [u8],
) -> Result<()> {
  match shape {
    StripeShape::FullFrame { width, height } => coder.decompress_yuv420(data, dst, width, height),
    StripeShape::Luma { width, height } => coder.decompress_plane(data, dst, width, height),
    StripeShape::Chroma { width, height } => coder.decompress_plane(data, dst, width, height),
  }
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
  if expected != actual {
    return Err(Error::BufferSize {
      expected: expected,
      actual: actual,
    });
  }
  Ok(())
}

// Identity "compressor": payloads are the raw bytes. Turns the codec into a
// lossless stereo/temporal-diff archival format and gives the tests an exact
// modular-identity baseline.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawStill;

impl StillCoder for RawStill {
  fn compress_yuv420(&mut self, src: &[u8], width: usize, height: usize, _quality: u8) -> Result<Vec<u8>> {
    check_len(width * height * 3 / 2, src.len())?;
    Ok(src.to_vec())
  }

  fn compress_plane(&mut self, src: &[u8], width: usize, height: usize, _quality: u8) -> Result<Vec<u8>> {
    check_len(width * height, src.len())?;
    Ok(src.to_vec())
  }

  fn decompress_yuv420(&mut self, data: &[u8], dst: &mut [u8], width: usize, height: usize) -> Result<()> {
    check_len(width * height * 3 / 2, dst.len())?;
    if data.len() != dst.len() {
      return Err(Error::StillCoder(format!(
        "raw payload is {} bytes, expected {} for {}x{}",
        data.len(),
        dst.len(),
        width,
        height
      )));
    }
    dst.copy_from_slice(data);
    Ok(())
  }

  fn decompress_plane(&mut self, data: &[u8], dst: &mut [u8], width: usize, height: usize) -> Result<()> {
    check_len(width * height, dst.len())?;
    if data.len() != dst.len() {
      return Err(Error::StillCoder(format!(
        "raw payload is {} bytes, expected {} for {}x{} plane",
        data.len(),
        dst.len(),
        width,
        height
      )));
    }
    dst.copy_from_slice(data);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn raw_still_roundtrip() {
    let mut coder = RawStill;
    let src: Vec<u8> = (0..6144).map(|i| (i % 251) as u8).collect();
    let payload = coder.compress_yuv420(&src, 64, 64, 75).unwrap();

    let mut dst = vec![0u8; src.len()];
    coder.decompress_yuv420(&payload, &mut dst, 64, 64).unwrap();
    assert_eq!(dst, src);
  }

  #[test]
  fn raw_still_rejects_bad_lengths() {
    let mut coder = RawStill;
    assert!(coder.compress_plane(&[0u8; 100], 64, 64, 75).is_err());

    let mut dst = vec![0u8; 4096];
    assert!(coder.decompress_plane(&[0u8; 100], &mut dst, 64, 64).is_err());
  }
}

use std::ops::Range;

use bitflags::bitflags;
use bytemuck::allocation::zeroed_slice_box;

use crate::error::{Error, Result};

// Both dimensions of an encoded stream must be multiples of this. The rule
// keeps every plane (and every half-plane of a stereo pair) cleanly divisible
// into the 8x8 proxy tiles and 16-byte kernel chunks.
pub const DIM_MULTIPLE: usize = 32;

// The proxy is a 1-in-8 sampling in both directions.
pub const PROXY_SHIFT: usize = 3;

// Number of vertical stripes a residual frame is split into for parallel
// still-image compression. The container reserves room for more; see
// format::FrameRecord for how a reader recovers the count from the index.
pub const SUB_BUFFER_COUNT: usize = 1;

bitflags! {
  // The mode-flags word of the pre-header. Bit 0 selects stereo; bits 1..4
  // are reserved for a future encoder selector and must read back as written.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct ModeFlags: u64 {
    const STEREO = 1;
  }
}

impl ModeFlags {
  pub fn is_stereo(&self) -> bool {
    self.contains(ModeFlags::STEREO)
  }
}

// Logical luma dimensions of a frame. For stereo streams the height covers
// both eyes: the top half of every plane is the left eye, the bottom half the
// right eye.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
  pub width: usize,
  pub height: usize,
}

// One plane of a planar YUV 4:2:0 buffer: where it starts and its own
// pixel dimensions.
#[derive(Debug, Clone, Copy)]
pub struct Plane {
  pub offset: usize,
  pub width: usize,
  pub height: usize,
}

impl Plane {
  pub fn size(&self) -> usize {
    self.width * self.height
  }

  pub fn range(&self) -> Range<usize> {
    self.offset..self.offset + self.size()
  }
}

impl Dimensions {
  pub fn new(width: usize, height: usize) -> Result<Self> {
    if width == 0 || height == 0 || width % DIM_MULTIPLE != 0 || height % DIM_MULTIPLE != 0 {
      return Err(Error::InvalidDimensions {
        width: width,
        height: height,
        multiple: DIM_MULTIPLE,
      });
    }

    Ok(Self {
      width: width,
      height: height,
    })
  }

  pub fn luma_size(&self) -> usize {
    self.width * self.height
  }

  pub fn chroma_size(&self) -> usize {
    (self.width / 2) * (self.height / 2)
  }

  // Total byte size of a planar YUV 4:2:0 frame at these dimensions.
  pub fn frame_size(&self) -> usize {
    self.luma_size() + 2 * self.chroma_size()
  }

  // Layout is strictly Y, then U, then V.
  pub fn planes(&self) -> [Plane; 3] {
    let luma = Plane {
      offset: 0,
      width: self.width,
      height: self.height,
    };
    let u = Plane {
      offset: self.luma_size(),
      width: self.width / 2,
      height: self.height / 2,
    };
    let v = Plane {
      offset: self.luma_size() + self.chroma_size(),
      width: u.width,
      height: u.height,
    };
    [luma, u, v]
  }

  // Dimensions of the low-res proxy. The proxy samples the top (left-eye)
  // half only, so a stereo stream halves the vertical a second time.
  pub fn proxy(&self, flags: ModeFlags) -> Dimensions {
    let height = if flags.is_stereo() {
      self.height >> (PROXY_SHIFT + 1)
    } else {
      self.height >> PROXY_SHIFT
    };

    Dimensions {
      width: self.width >> PROXY_SHIFT,
      height: height,
    }
  }
}

// Verify a caller-supplied frame buffer is exactly one frame long.
pub fn check_frame_len(dims: Dimensions, buf: &[u8]) -> Result<()> {
  if buf.len() != dims.frame_size() {
    return Err(Error::BufferSize {
      expected: dims.frame_size(),
      actual: buf.len(),
    });
  }
  Ok(())
}

// An owned, zero-initialized planar YUV 4:2:0 buffer. Used for the reference
// frame, the proxy staging buffer, and decoded output.
pub struct FrameBuf {
  dims: Dimensions,
  data: Box<[u8]>,
}

impl FrameBuf {
  pub fn new(dims: Dimensions) -> Self {
    Self {
      dims: dims,
      data: zeroed_slice_box(dims.frame_size()),
    }
  }

  pub fn dims(&self) -> Dimensions {
    self.dims
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.data
  }

  pub fn as_mut_slice(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

// How the still coder should interpret one sub-frame stripe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripeShape {
  // The stripe is the entire frame; pass it through the planar YUV 4:2:0
  // entry point.
  FullFrame { width: usize, height: usize },
  // The stripe lies entirely within the luma plane; pass it as a grayscale
  // channel at full width.
  Luma { width: usize, height: usize },
  // The stripe lies entirely below the luma plane. Chroma rows are half as
  // wide, so the stripe is passed with halved width and doubled height to
  // keep the coder's view contiguous.
  Chroma { width: usize, height: usize },
}

#[derive(Debug, Clone)]
pub struct Stripe {
  pub range: Range<usize>,
  pub shape: StripeShape,
}

// Geometry of sub-frame k of n. The frame is viewed as (height * 3/2) rows of
// `width` bytes and cut into n equal stripes.
pub fn stripe(dims: Dimensions, k: usize, n: usize) -> Result<Stripe> {
  assert!(n > 0 && k < n);

  if n == 1 {
    return Ok(Stripe {
      range: 0..dims.frame_size(),
      shape: StripeShape::FullFrame {
        width: dims.width,
        height: dims.height,
      },
    });
  }

  let total_rows = (dims.height * 3) / 2;
  if total_rows % n != 0 {
    return Err(Error::Unsupported("sub-frame count does not divide the frame"));
  }

  let rows = total_rows / n;
  let start = k * rows * dims.width;
  let end = start + rows * dims.width;

  let shape = if end <= dims.luma_size() {
    StripeShape::Luma {
      width: dims.width,
      height: rows,
    }
  } else if start >= dims.luma_size() {
    StripeShape::Chroma {
      width: dims.width / 2,
      height: rows * 2,
    }
  } else {
    return Err(Error::Unsupported("sub-frame straddles the luma/chroma boundary"));
  };

  Ok(Stripe {
    range: start..end,
    shape: shape,
  })
}

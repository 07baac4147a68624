// Per-frame encode state machine.
//
// A frame moves through five strictly ordered steps inside one AddFrame:
// begin_frame (differential pre-transform + proxy staging), proxy compress,
// parallel sub-frame compress, parallel sub-frame reconstruct, end_frame
// (inverse transform against the decompressed data). After end_frame the
// reference frame holds exactly what a remote decoder will reconstruct,
// which is the invariant the whole P-frame chain stands on.

use std::mem;

use log::debug;

use crate::diff::{self, FrameKind};
use crate::error::{Error, Result};
use crate::format::I_STEP;
use crate::frame::{self, check_frame_len, Dimensions, FrameBuf, ModeFlags, SUB_BUFFER_COUNT};
use crate::pool::WorkerPool;
use crate::still::{compress_stripe, decompress_stripe, StillCoder};

pub const DEFAULT_QUALITY: u8 = 75;
pub const DEFAULT_IFRAME_QUALITY: u8 = 75;
pub const DEFAULT_PROXY_QUALITY: u8 = 85;

pub struct Encoder {
  dims: Dimensions,
  flags: ModeFlags,
  i_step: usize,
  frame_index: usize,
  kind: FrameKind,

  quality: u8,
  iframe_quality: u8,
  proxy_quality: u8,

  last_frame: FrameBuf,
  proxy: FrameBuf,

  // One compressor per sub-frame plus a dedicated one for the proxy, and one
  // decompressor per sub-frame to rebuild the reference from our own output.
  coders: Vec<Box<dyn StillCoder>>,
  decoders: Vec<Box<dyn StillCoder>>,

  compressed: Vec<Vec<u8>>,
  proxy_payload: Vec<u8>,

  pool: WorkerPool,
}

impl Encoder {
  pub fn new(
    dims: Dimensions,
    flags: ModeFlags,
    mut make_coder: impl FnMut() -> Box<dyn StillCoder>,
  ) -> Result<Encoder> {
    if !flags.is_stereo() {
      return Err(Error::Unsupported("monoscopic streams are reserved but not implemented"));
    }

    Ok(Encoder {
      dims: dims,
      flags: flags,
      i_step: I_STEP,
      frame_index: 0,
      kind: FrameKind::I,
      quality: DEFAULT_QUALITY,
      iframe_quality: DEFAULT_IFRAME_QUALITY,
      proxy_quality: DEFAULT_PROXY_QUALITY,
      last_frame: FrameBuf::new(dims),
      proxy: FrameBuf::new(dims.proxy(flags)),
      coders: (0..SUB_BUFFER_COUNT + 1).map(|_| make_coder()).collect(),
      decoders: (0..SUB_BUFFER_COUNT).map(|_| make_coder()).collect(),
      compressed: vec![Vec::new(); SUB_BUFFER_COUNT],
      proxy_payload: Vec::new(),
      pool: WorkerPool::with_default_threads(),
    })
  }

  pub fn dims(&self) -> Dimensions {
    self.dims
  }

  pub fn flags(&self) -> ModeFlags {
    self.flags
  }

  pub fn i_step(&self) -> usize {
    self.i_step
  }

  pub fn frame_index(&self) -> usize {
    self.frame_index
  }

  pub fn frame_kind(&self) -> FrameKind {
    self.kind
  }

  pub fn proxy_dims(&self) -> Dimensions {
    self.proxy.dims()
  }

  // The reference frame: what a decoder of the stream so far would hold.
  pub fn last_frame(&self) -> &[u8] {
    self.last_frame.as_slice()
  }

  pub fn set_qualities(&mut self, quality: u8, iframe_quality: u8, proxy_quality: u8) {
    self.quality = quality;
    self.iframe_quality = iframe_quality;
    self.proxy_quality = proxy_quality;
  }

  // Apply the differential pre-transform in place. Afterwards `src` holds
  // the residual frame and the proxy buffer holds the thumbnail.
  pub fn begin_frame(&mut self, src: &mut [u8]) -> Result<()> {
    check_frame_len(self.dims, src)?;

    self.kind = FrameKind::of(self.frame_index, self.i_step);
    debug!("frame {}: {:?}-transform", self.frame_index, self.kind);

    match self.kind {
      FrameKind::I => diff::i_transform_with_proxy(
        self.dims,
        self.flags,
        src,
        self.proxy.as_mut_slice(),
        self.last_frame.as_mut_slice(),
      ),
      FrameKind::P => diff::p_transform_with_proxy(
        self.dims,
        self.flags,
        src,
        self.last_frame.as_slice(),
        self.proxy.as_mut_slice(),
      ),
    }

    Ok(())
  }

  // Compress the staged proxy with its dedicated coder.
  pub fn compress_proxy(&mut self) -> Result<&[u8]> {
    let pdims = self.proxy.dims();
    self.proxy_payload = self.coders[SUB_BUFFER_COUNT].compress_yuv420(
      self.proxy.as_slice(),
      pdims.width,
      pdims.height,
      self.proxy_quality,
    )?;
    Ok(&self.proxy_payload)
  }

  // Compress all sub-frame stripes of the residual in parallel. The results
  // land in per-sub slots, never appended, so scheduling order is
  // irrelevant.
  pub fn encode_sub_frames(&mut self, src: &[u8]) -> Result<()> {
    check_frame_len(self.dims, src)?;

    let quality = match self.kind {
      FrameKind::I => self.iframe_quality,
      FrameKind::P => self.quality,
    };

    let dims = self.dims;
    let Encoder { pool, coders, compressed, .. } = self;

    pool.scope(|scope| {
      let stripes = coders[..SUB_BUFFER_COUNT].iter_mut().zip(compressed.iter_mut());

      for (k, (coder, slot)) in stripes.enumerate() {
        let stripe = frame::stripe(dims, k, SUB_BUFFER_COUNT)?;
        let src = &src[stripe.range.clone()];
        let shape = stripe.shape;

        scope.spawn(move || {
          let payload = compress_stripe(coder.as_mut(), shape, src, quality)?;
          let size = payload.len() as u64;
          *slot = payload;
          Ok(size)
        });
      }

      Ok(())
    })
  }

  // Decompress our own sub-frame payloads, in parallel, to learn what the
  // decoder will see. I-frames land directly in the reference frame;
  // P-frames overwrite the residual in `src` for end_frame to post-process.
  pub fn reconstruct_sub_frames(&mut self, src: &mut [u8]) -> Result<()> {
    check_frame_len(self.dims, src)?;

    let dims = self.dims;
    let kind = self.kind;
    let Encoder { pool, decoders, compressed, last_frame, .. } = self;

    let target: &mut [u8] = match kind {
      FrameKind::I => last_frame.as_mut_slice(),
      FrameKind::P => src,
    };

    pool.scope(|scope| {
      let mut tail = target;

      for (k, (decoder, payload)) in decoders.iter_mut().zip(compressed.iter()).enumerate() {
        let stripe = frame::stripe(dims, k, SUB_BUFFER_COUNT)?;
        let (head, rest) = mem::take(&mut tail).split_at_mut(stripe.range.len());
        tail = rest;

        let shape = stripe.shape;
        scope.spawn(move || {
          let size = head.len() as u64;
          decompress_stripe(decoder.as_mut(), shape, payload, head)?;
          Ok(size)
        });
      }

      Ok(())
    })
  }

  // Apply the inverse residual transform against the decompressed data,
  // leaving the reference frame in the decoder's state, and advance to the
  // next frame.
  pub fn end_frame(&mut self, src: &mut [u8]) -> Result<()> {
    check_frame_len(self.dims, src)?;

    match self.kind {
      FrameKind::I => diff::i_reconstruct(self.dims, self.flags, self.last_frame.as_mut_slice()),
      FrameKind::P => diff::p_reconstruct(self.dims, self.flags, src, self.last_frame.as_mut_slice()),
    }

    self.frame_index += 1;
    Ok(())
  }

  pub fn proxy_payload(&self) -> &[u8] {
    &self.proxy_payload
  }

  pub fn sub_frame(&self, k: usize) -> &[u8] {
    &self.compressed[k]
  }

  pub fn sub_frame_size(&self, k: usize) -> usize {
    self.compressed[k].len()
  }

  pub fn full_size(&self) -> usize {
    self.compressed.iter().map(|payload| payload.len()).sum()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::still::RawStill;

  use rand::rngs::SmallRng;
  use rand::{Rng, SeedableRng};

  fn new_encoder() -> Encoder {
    let dims = Dimensions::new(64, 64).unwrap();
    Encoder::new(dims, ModeFlags::STEREO, || Box::new(RawStill)).unwrap()
  }

  fn drive_frame(encoder: &mut Encoder, src: &mut [u8]) {
    encoder.begin_frame(src).unwrap();
    encoder.compress_proxy().unwrap();
    encoder.encode_sub_frames(src).unwrap();
    encoder.reconstruct_sub_frames(src).unwrap();
    encoder.end_frame(src).unwrap();
  }

  #[test]
  fn mono_is_rejected() {
    let dims = Dimensions::new(64, 64).unwrap();
    assert!(Encoder::new(dims, ModeFlags::empty(), || Box::new(RawStill)).is_err());
  }

  #[test]
  fn reference_tracks_input_when_lossless() {
    // With the passthrough coder the reference frame must equal the input
    // exactly, for I- and P-frames alike.
    let mut encoder = new_encoder();
    let mut rng = SmallRng::seed_from_u64(7);

    for _ in 0..3 {
      let mut frame = vec![0u8; encoder.dims().frame_size()];
      rng.fill(&mut frame[..]);
      let original = frame.clone();

      drive_frame(&mut encoder, &mut frame);
      assert_eq!(encoder.last_frame(), &original[..]);
    }
  }

  #[test]
  fn kind_follows_cadence() {
    let mut encoder = new_encoder();
    let size = encoder.dims().frame_size();

    for i in 0..32 {
      let mut frame = vec![0x80u8; size];
      drive_frame(&mut encoder, &mut frame);
      let expected = if i % 30 == 0 { FrameKind::I } else { FrameKind::P };
      assert_eq!(encoder.frame_kind(), expected, "frame {}", i);
    }
  }

  #[test]
  fn payload_sizes_are_tracked() {
    let mut encoder = new_encoder();
    let mut frame = vec![0x80u8; encoder.dims().frame_size()];
    drive_frame(&mut encoder, &mut frame);

    // RawStill payloads are the raw stripe and proxy bytes.
    assert_eq!(encoder.full_size(), encoder.dims().frame_size());
    assert_eq!(encoder.sub_frame_size(0), encoder.dims().frame_size());
    assert_eq!(encoder.proxy_payload().len(), encoder.proxy_dims().frame_size());
  }
}

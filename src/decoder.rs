// Mirror of the encoder: decompress sub-frames in parallel, then invert the
// differential transform, keeping a reference frame bit-identical to the
// encoder's at every step.

use std::mem;

use log::debug;

use crate::diff::{self, FrameKind};
use crate::error::{Error, Result};
use crate::frame::{self, check_frame_len, Dimensions, FrameBuf, ModeFlags};
use crate::pool::WorkerPool;
use crate::still::{decompress_stripe, StillCoder};

pub struct Decoder {
  dims: Dimensions,
  flags: ModeFlags,
  i_step: usize,
  frame_index: usize,
  subs: usize,

  last_frame: FrameBuf,

  // One decompressor per sub-frame, plus a dedicated one for the
  // self-contained proxy stills.
  decoders: Vec<Box<dyn StillCoder>>,
  proxy_decoder: Box<dyn StillCoder>,

  pool: WorkerPool,
}

impl Decoder {
  pub fn new(
    dims: Dimensions,
    flags: ModeFlags,
    i_step: usize,
    subs: usize,
    mut make_coder: impl FnMut() -> Box<dyn StillCoder>,
  ) -> Result<Decoder> {
    if !flags.is_stereo() {
      return Err(Error::Unsupported("monoscopic streams are reserved but not implemented"));
    }
    assert!(i_step > 0 && subs > 0);

    // Fail up front if the stream's stripe count cannot be mapped onto this
    // frame geometry.
    for k in 0..subs {
      frame::stripe(dims, k, subs)?;
    }

    Ok(Decoder {
      dims: dims,
      flags: flags,
      i_step: i_step,
      frame_index: 0,
      subs: subs,
      last_frame: FrameBuf::new(dims),
      decoders: (0..subs).map(|_| make_coder()).collect(),
      proxy_decoder: make_coder(),
      pool: WorkerPool::with_default_threads(),
    })
  }

  pub fn dims(&self) -> Dimensions {
    self.dims
  }

  pub fn frame_index(&self) -> usize {
    self.frame_index
  }

  pub fn proxy_dims(&self) -> Dimensions {
    self.dims.proxy(self.flags)
  }

  pub fn last_frame(&self) -> &[u8] {
    self.last_frame.as_slice()
  }

  // Decompress one payload per sub-frame stripe into `dst`, in parallel.
  // The stripe geometry is the same convention the encoder used to cut the
  // frame.
  pub fn decode_sub_frames(&mut self, payloads: &[&[u8]], dst: &mut [u8]) -> Result<()> {
    check_frame_len(self.dims, dst)?;
    if payloads.len() != self.subs {
      return Err(Error::InvalidStream("frame record has the wrong sub-buffer count"));
    }

    let dims = self.dims;
    let subs = self.subs;
    let Decoder { pool, decoders, .. } = self;

    pool.scope(|scope| {
      let mut tail = dst;

      for (k, (decoder, payload)) in decoders.iter_mut().zip(payloads.iter()).enumerate() {
        let stripe = frame::stripe(dims, k, subs)?;
        let (head, rest) = mem::take(&mut tail).split_at_mut(stripe.range.len());
        tail = rest;

        let shape = stripe.shape;
        let payload = *payload;
        scope.spawn(move || {
          let size = head.len() as u64;
          decompress_stripe(decoder.as_mut(), shape, payload, head)?;
          Ok(size)
        });
      }

      Ok(())
    })
  }

  // Invert the differential transform in `dst` and advance the reference
  // frame, exactly as the encoder's end_frame did on its side.
  pub fn finalize(&mut self, dst: &mut [u8]) -> Result<()> {
    check_frame_len(self.dims, dst)?;

    let kind = FrameKind::of(self.frame_index, self.i_step);
    debug!("frame {}: {:?}-reconstruct", self.frame_index, kind);

    match kind {
      FrameKind::I => {
        diff::i_reconstruct(self.dims, self.flags, dst);
        self.last_frame.as_mut_slice().copy_from_slice(dst);
      }
      FrameKind::P => {
        diff::p_reconstruct(self.dims, self.flags, dst, self.last_frame.as_mut_slice());
      }
    }

    self.frame_index += 1;
    Ok(())
  }

  // Proxies are self-contained stills at the proxy dimensions; no diff
  // inverse is involved.
  pub fn decode_proxy(&mut self, payload: &[u8], dst: &mut [u8]) -> Result<()> {
    let pdims = self.proxy_dims();
    check_frame_len(pdims, dst)?;
    self.proxy_decoder.decompress_yuv420(payload, dst, pdims.width, pdims.height)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::encoder::Encoder;
  use crate::format::I_STEP;
  use crate::still::RawStill;

  use rand::rngs::SmallRng;
  use rand::{Rng, SeedableRng};

  // Encode a frame, feed the payloads straight into a decoder, and check
  // both sides agree. This is the reference-frame agreement invariant at
  // its smallest scale.
  #[test]
  fn encoder_and_decoder_agree() {
    let dims = Dimensions::new(64, 64).unwrap();
    let mut encoder = Encoder::new(dims, ModeFlags::STEREO, || Box::new(RawStill)).unwrap();
    let mut decoder = Decoder::new(dims, ModeFlags::STEREO, I_STEP, 1, || Box::new(RawStill)).unwrap();

    let mut rng = SmallRng::seed_from_u64(11);
    let mut decoded = vec![0u8; dims.frame_size()];

    for _ in 0..4 {
      let mut src = vec![0u8; dims.frame_size()];
      rng.fill(&mut src[..]);
      let original = src.clone();

      encoder.begin_frame(&mut src).unwrap();
      encoder.compress_proxy().unwrap();
      encoder.encode_sub_frames(&src).unwrap();
      encoder.reconstruct_sub_frames(&mut src).unwrap();
      encoder.end_frame(&mut src).unwrap();

      let payloads = [encoder.sub_frame(0)];
      decoder.decode_sub_frames(&payloads, &mut decoded).unwrap();
      decoder.finalize(&mut decoded).unwrap();

      assert_eq!(decoded, original);
      assert_eq!(encoder.last_frame(), decoder.last_frame());
    }
  }

  #[test]
  fn proxy_decodes_standalone() {
    let dims = Dimensions::new(64, 64).unwrap();
    let mut encoder = Encoder::new(dims, ModeFlags::STEREO, || Box::new(RawStill)).unwrap();
    let mut decoder = Decoder::new(dims, ModeFlags::STEREO, I_STEP, 1, || Box::new(RawStill)).unwrap();

    let mut src = vec![0x55u8; dims.frame_size()];
    encoder.begin_frame(&mut src).unwrap();
    let payload = encoder.compress_proxy().unwrap().to_vec();

    let mut thumb = vec![0u8; decoder.proxy_dims().frame_size()];
    decoder.decode_proxy(&payload, &mut thumb).unwrap();
    assert!(thumb.iter().all(|&b| b == 0x55));
  }

  #[test]
  fn wrong_sub_count_is_rejected() {
    let dims = Dimensions::new(64, 64).unwrap();
    let mut decoder = Decoder::new(dims, ModeFlags::STEREO, I_STEP, 1, || Box::new(RawStill)).unwrap();
    let mut dst = vec![0u8; dims.frame_size()];
    assert!(decoder.decode_sub_frames(&[&[], &[]], &mut dst).is_err());
  }
}

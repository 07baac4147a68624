// The differential pre-transform and its inverses.
//
// Every kernel operates byte-wise on planar YUV 4:2:0 buffers with
// wrap-around 8-bit arithmetic. A per-plane bias recenters each residual
// near 128 so the still coder's quantizer does not clip small signals.
// The loops walk fixed 16-byte chunks; the algorithm itself is defined at
// the byte level, the chunking only keeps the hot loops trivially
// vectorizable.

use crate::frame::{Dimensions, ModeFlags, PROXY_SHIFT};

// Width of the inner-loop block. Every plane and half-plane is a multiple of
// this thanks to the dimension rule.
const CHUNK: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
  I,
  P,
}

impl FrameKind {
  // The I/P decision is purely positional: frame 0 and every i_step-th frame
  // after it is an I-frame. Nothing is written per frame; decoders derive
  // the same answer from the pre-header.
  pub fn of(frame_index: usize, i_step: usize) -> FrameKind {
    if frame_index % i_step == 0 {
      FrameKind::I
    } else {
      FrameKind::P
    }
  }
}

// Residual bias constants, chosen empirically. A single table shared by the
// transform and reconstruction paths; the reconstruction side inverts the
// expressions rather than carrying negated constants. Plane index 0 is luma.
const STEREO_BIAS: [[u8; 3]; 2] = [
  [118, 126, 126], // I-frames
  [127, 127, 127], // P-frames
];

const TEMPORAL_BIAS: [u8; 3] = [129, 130, 130];

fn stereo_bias(kind: FrameKind, plane: usize) -> u8 {
  match kind {
    FrameKind::I => STEREO_BIAS[0][plane],
    FrameKind::P => STEREO_BIAS[1][plane],
  }
}

fn temporal_bias(plane: usize) -> u8 {
  TEMPORAL_BIAS[plane]
}

// bottom := bottom - top + bias
fn stereo_diff(top: &[u8], bottom: &mut [u8], bias: u8) {
  debug_assert_eq!(top.len(), bottom.len());
  debug_assert_eq!(top.len() % CHUNK, 0);

  for (b, t) in bottom.chunks_exact_mut(CHUNK).zip(top.chunks_exact(CHUNK)) {
    for (b, t) in b.iter_mut().zip(t) {
      *b = b.wrapping_sub(*t).wrapping_add(bias);
    }
  }
}

// bottom := bottom - bias + top (exact inverse of stereo_diff)
fn stereo_undiff(top: &[u8], bottom: &mut [u8], bias: u8) {
  debug_assert_eq!(top.len(), bottom.len());
  debug_assert_eq!(top.len() % CHUNK, 0);

  for (b, t) in bottom.chunks_exact_mut(CHUNK).zip(top.chunks_exact(CHUNK)) {
    for (b, t) in b.iter_mut().zip(t) {
      *b = b.wrapping_sub(bias).wrapping_add(*t);
    }
  }
}

// frame := last - frame + bias
fn temporal_diff(last: &[u8], frame: &mut [u8], bias: u8) {
  debug_assert_eq!(last.len(), frame.len());
  debug_assert_eq!(last.len() % CHUNK, 0);

  for (f, l) in frame.chunks_exact_mut(CHUNK).zip(last.chunks_exact(CHUNK)) {
    for (f, l) in f.iter_mut().zip(l) {
      *f = l.wrapping_sub(*f).wrapping_add(bias);
    }
  }
}

// One proxy byte per 8x8 block: the byte at (x=7, y=0) of each block, in
// raster order. `src` is the sampled plane region, `rows` of `width` bytes.
fn sample_proxy(src: &[u8], width: usize, rows: usize, out: &mut [u8]) {
  debug_assert_eq!(src.len(), width * rows);
  debug_assert_eq!(out.len(), (width >> PROXY_SHIFT) * (rows >> PROXY_SHIFT));

  let mut n = 0;
  for row in (0..rows).step_by(1 << PROXY_SHIFT) {
    let line = &src[row * width..(row + 1) * width];
    for col in (7..width).step_by(1 << PROXY_SHIFT) {
      out[n] = line[col];
      n += 1;
    }
  }

  debug_assert_eq!(n, out.len());
}

// Fill `proxy` (a planar YUV 4:2:0 buffer at the proxy dimensions) from the
// top (left-eye) half of every plane of `frame` - the whole plane when the
// stream is monoscopic.
fn sample_frame_proxy(dims: Dimensions, flags: ModeFlags, frame: &[u8], proxy: &mut [u8]) {
  let proxy_planes = dims.proxy(flags).planes();

  for (plane, out) in dims.planes().iter().zip(proxy_planes.iter()) {
    let rows = if flags.is_stereo() {
      plane.height / 2
    } else {
      plane.height
    };

    let src = &frame[plane.offset..plane.offset + rows * plane.width];
    sample_proxy(src, plane.width, rows, &mut proxy[out.range()]);
  }
}

// I-frame pre-transform. Copies the untouched input into the reference
// frame, emits the proxy, then rewrites the bottom (right-eye) half of every
// plane as its difference against the top half. The top halves pass through
// to the still coder unchanged.
pub fn i_transform_with_proxy(
  dims: Dimensions,
  flags: ModeFlags,
  frame: &mut [u8],
  proxy: &mut [u8],
  last: &mut [u8],
) {
  last.copy_from_slice(frame);
  sample_frame_proxy(dims, flags, frame, proxy);

  if flags.is_stereo() {
    for (i, plane) in dims.planes().iter().enumerate() {
      let data = &mut frame[plane.range()];
      let (top, bottom) = data.split_at_mut(plane.size() / 2);
      stereo_diff(top, bottom, stereo_bias(FrameKind::I, i));
    }
  }
}

// P-frame pre-transform: temporal difference against the reference frame,
// then stereo difference of the residuals. The proxy is sampled first, from
// the original bytes, because the temporal diff overwrites them. The
// reference frame is not touched here; it is advanced by p_reconstruct once
// the residual has round-tripped through the still coder.
pub fn p_transform_with_proxy(
  dims: Dimensions,
  flags: ModeFlags,
  frame: &mut [u8],
  last: &[u8],
  proxy: &mut [u8],
) {
  sample_frame_proxy(dims, flags, frame, proxy);

  for (i, plane) in dims.planes().iter().enumerate() {
    temporal_diff(&last[plane.range()], &mut frame[plane.range()], temporal_bias(i));
  }

  if flags.is_stereo() {
    for (i, plane) in dims.planes().iter().enumerate() {
      let data = &mut frame[plane.range()];
      let (top, bottom) = data.split_at_mut(plane.size() / 2);
      stereo_diff(top, bottom, stereo_bias(FrameKind::P, i));
    }
  }
}

// Inverse of the I-frame transform, in place. The encoder runs this on the
// reference frame it just filled from its own decompressor output; the
// decoder runs it on the decoded buffer and then copies into its reference.
// Both sides therefore hold bit-identical reference frames afterwards.
pub fn i_reconstruct(dims: Dimensions, flags: ModeFlags, frame: &mut [u8]) {
  if flags.is_stereo() {
    for (i, plane) in dims.planes().iter().enumerate() {
      let data = &mut frame[plane.range()];
      let (top, bottom) = data.split_at_mut(plane.size() / 2);
      stereo_undiff(top, bottom, stereo_bias(FrameKind::I, i));
    }
  }
}

// Inverse of the P-frame transform. Walks the top and bottom halves of each
// plane in lockstep so the bottom half can read the top half's temporal
// residual before it is overwritten, and writes the reconstructed bytes into
// the frame and the reference simultaneously.
pub fn p_reconstruct(dims: Dimensions, flags: ModeFlags, frame: &mut [u8], last: &mut [u8]) {
  for (i, plane) in dims.planes().iter().enumerate() {
    let bt = temporal_bias(i);
    let f = &mut frame[plane.range()];
    let l = &mut last[plane.range()];

    if flags.is_stereo() {
      let bs = stereo_bias(FrameKind::P, i);
      let half = plane.size() / 2;
      let (ft, fb) = f.split_at_mut(half);
      let (lt, lb) = l.split_at_mut(half);

      let iter = ft
        .chunks_exact_mut(CHUNK)
        .zip(fb.chunks_exact_mut(CHUNK))
        .zip(lt.chunks_exact_mut(CHUNK).zip(lb.chunks_exact_mut(CHUNK)));

      for ((ft, fb), (lt, lb)) in iter {
        for j in 0..CHUNK {
          let et = ft[j];
          let eb = fb[j].wrapping_sub(bs).wrapping_add(et);
          let rt = lt[j].wrapping_sub(et).wrapping_add(bt);
          let rb = lb[j].wrapping_sub(eb).wrapping_add(bt);
          ft[j] = rt;
          lt[j] = rt;
          fb[j] = rb;
          lb[j] = rb;
        }
      }
    } else {
      for (f, l) in f.chunks_exact_mut(CHUNK).zip(l.chunks_exact_mut(CHUNK)) {
        for (f, l) in f.iter_mut().zip(l.iter_mut()) {
          let r = l.wrapping_sub(*f).wrapping_add(bt);
          *f = r;
          *l = r;
        }
      }
    }
  }
}

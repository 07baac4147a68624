// End-to-end container tests over the passthrough still coder: with no
// quantization in the loop, every decode must reproduce the encoder's input
// byte for byte, and both sides must agree on the reference frame at every
// step.

use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use stereovid::frame::{Dimensions, ModeFlags};
use stereovid::reader::ContainerReader;
use stereovid::still::RawStill;
use stereovid::writer::ContainerWriter;
use stereovid::{Error, I_STEP};

fn dims64() -> Dimensions {
  Dimensions::new(64, 64).unwrap()
}

fn random_frames(dims: Dimensions, count: usize, seed: u64) -> Vec<Vec<u8>> {
  let mut rng = SmallRng::seed_from_u64(seed);
  (0..count)
    .map(|_| {
      let mut frame = vec![0u8; dims.frame_size()];
      rng.fill(&mut frame[..]);
      frame
    })
    .collect()
}

// Encode the given frames into `path` and return the encoder's final
// reference frame.
fn write_stream(path: &Path, dims: Dimensions, frames: &[Vec<u8>]) -> Vec<u8> {
  let mut writer =
    ContainerWriter::create(path, dims, ModeFlags::STEREO, || Box::new(RawStill)).unwrap();

  for frame in frames {
    // add_frame consumes its buffer as scratch, so hand it a copy.
    let mut scratch = frame.clone();
    writer.add_frame(&mut scratch).unwrap();
  }

  let reference = writer.encoder().last_frame().to_vec();
  writer.finalize().unwrap();
  reference
}

fn open_stream(path: &Path) -> ContainerReader {
  ContainerReader::open(path, || Box::new(RawStill)).unwrap()
}

#[test]
fn single_iframe_roundtrip() {
  // S1: one uniform I-frame comes back exactly, and the proxy is the
  // documented (8, 4) / 48 byte thumbnail.
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("s1");
  let dims = dims64();
  let frames = vec![vec![0x80u8; dims.frame_size()]];
  write_stream(&path, dims, &frames);

  let mut reader = open_stream(&path);
  assert_eq!(reader.frame_count(), 1);
  assert_eq!(reader.resolution(), (64, 64));
  assert_eq!(reader.proxy_resolution(), (8, 4));

  reader.read_full(0).unwrap();
  assert_eq!(reader.decode_full().unwrap(), &frames[0][..]);

  reader.read_proxy(0).unwrap();
  let thumb = reader.decode_proxy().unwrap();
  assert_eq!(thumb.len(), 48);
  assert!(thumb.iter().all(|&b| b == 0x80));
}

#[test]
fn pframe_roundtrip() {
  // S2 end to end: a one-grey-level temporal step decodes losslessly.
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("s2");
  let dims = dims64();
  let frames = vec![
    vec![0x40u8; dims.frame_size()],
    vec![0x41u8; dims.frame_size()],
  ];
  write_stream(&path, dims, &frames);

  let mut reader = open_stream(&path);
  for (i, frame) in frames.iter().enumerate() {
    reader.read_full(i).unwrap();
    assert_eq!(reader.decode_full().unwrap(), &frame[..], "frame {}", i);
  }
}

#[test]
fn thirty_one_frames_with_two_iframes() {
  // S4: 31 frames span exactly two I-frames (0 and 30) and every frame
  // reads back losslessly.
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("s4");
  let dims = dims64();
  let frames = random_frames(dims, 31, 41);
  write_stream(&path, dims, &frames);

  let mut reader = open_stream(&path);
  assert_eq!(reader.frame_count(), 31);
  assert_eq!(reader.i_step(), I_STEP);

  for (i, frame) in frames.iter().enumerate() {
    reader.read_full(i).unwrap();
    assert_eq!(reader.decode_full().unwrap(), &frame[..], "frame {}", i);
  }

  assert!(matches!(reader.read_full(31), Err(Error::EndOfStream)));
}

#[test]
fn header_roundtrip() {
  // Universal invariant 1: pre-header fields survive the write/finalize/read
  // cycle exactly.
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("header");
  let dims = Dimensions::new(128, 64).unwrap();
  let frames = random_frames(dims, 3, 5);
  write_stream(&path, dims, &frames);

  let reader = open_stream(&path);
  assert_eq!(reader.resolution(), (128, 64));
  assert_eq!(reader.frame_count(), 3);
  assert_eq!(reader.i_step(), 30);
  assert_eq!(reader.proxy_resolution(), (16, 4));
}

#[test]
fn index_is_consistent() {
  // Universal invariant 2, checked against the records as parsed.
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("index");
  let dims = dims64();
  let frames = random_frames(dims, 7, 13);
  write_stream(&path, dims, &frames);

  let reader = open_stream(&path);
  let mut previous_end = 0u64;

  for i in 0..7 {
    let record = reader.record(i).unwrap();
    assert!(record.proxy_offset >= previous_end);
    assert!(record.proxy_offset + record.proxy_size <= record.full_offset);
    let total: u64 = record.subs.iter().map(|&(_, size)| size).sum();
    assert_eq!(total, record.full_size);
    previous_end = record.full_offset + record.full_size;
  }
}

#[test]
fn reference_frames_agree() {
  // Universal invariant 3: after encoding, an independent decode of the
  // stream holds the same reference frame as the encoder did.
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("reference");
  let dims = dims64();
  let frames = random_frames(dims, 5, 99);
  let encoder_reference = write_stream(&path, dims, &frames);

  let mut reader = open_stream(&path);
  for i in 0..5 {
    reader.read_full(i).unwrap();
    reader.decode_full().unwrap();
  }

  assert_eq!(reader.decoder().last_frame(), &encoder_reference[..]);
}

#[test]
fn iframe_is_a_seek_point() {
  // Universal invariant 6: frame 30 decodes to the same bytes from a cold
  // reader as it does after the full P-chain, because it is an I-frame.
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("seek");
  let dims = dims64();
  let frames = random_frames(dims, 31, 77);
  write_stream(&path, dims, &frames);

  let mut sequential = open_stream(&path);
  let mut last = Vec::new();
  for i in 0..31 {
    sequential.read_full(i).unwrap();
    last = sequential.decode_full().unwrap().to_vec();
  }

  let mut seeked = open_stream(&path);
  seeked.read_full(30).unwrap();
  assert_eq!(seeked.decode_full().unwrap(), &last[..]);
  assert_eq!(&last[..], &frames[30][..]);
}

#[test]
fn proxy_scrub_without_full_decode() {
  // Proxies decode standalone in any order; each one is the top-half
  // sampling of its source frame.
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("scrub");
  let dims = dims64();
  let frames: Vec<Vec<u8>> = (0..4u8)
    .map(|i| vec![0x20 + i * 0x10; dims.frame_size()])
    .collect();
  write_stream(&path, dims, &frames);

  let mut reader = open_stream(&path);
  for i in (0..4).rev() {
    reader.read_proxy(i).unwrap();
    let thumb = reader.decode_proxy().unwrap();
    assert!(thumb.iter().all(|&b| b == 0x20 + (i as u8) * 0x10), "proxy {}", i);
  }
}

#[test]
fn finalize_deletes_sidecars() {
  // S6: after finalize only the final file remains, and it is readable.
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("stream");
  let dims = dims64();
  let frames = random_frames(dims, 2, 3);
  write_stream(&path, dims, &frames);

  assert!(path.exists());
  assert!(!sidecar(&path, ".raw").exists());
  assert!(!sidecar(&path, ".header").exists());

  let mut reader = open_stream(&path);
  reader.read_full(0).unwrap();
  reader.decode_full().unwrap();
}

#[test]
fn unfinalized_stream_leaves_sidecars() {
  // Dropping a writer without finalize keeps the sidecars on disk for
  // inspection and never creates the final file.
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("partial");
  let dims = dims64();

  let mut writer =
    ContainerWriter::create(&path, dims, ModeFlags::STEREO, || Box::new(RawStill)).unwrap();
  let mut frame = vec![0x11u8; dims.frame_size()];
  writer.add_frame(&mut frame).unwrap();
  drop(writer);

  assert!(!path.exists());
  assert!(sidecar(&path, ".raw").exists());
  assert!(sidecar(&path, ".header").exists());
}

fn sidecar(base: &Path, suffix: &str) -> PathBuf {
  let mut name = base.as_os_str().to_os_string();
  name.push(suffix);
  PathBuf::from(name)
}

// A still coder that fails after a set number of compressions.
struct FlakyStill {
  remaining: usize,
}

impl stereovid::StillCoder for FlakyStill {
  fn compress_yuv420(&mut self, src: &[u8], w: usize, h: usize, q: u8) -> stereovid::Result<Vec<u8>> {
    if self.remaining == 0 {
      return Err(Error::StillCoder("flaky coder gave out".into()));
    }
    self.remaining -= 1;
    RawStill.compress_yuv420(src, w, h, q)
  }

  fn compress_plane(&mut self, src: &[u8], w: usize, h: usize, q: u8) -> stereovid::Result<Vec<u8>> {
    if self.remaining == 0 {
      return Err(Error::StillCoder("flaky coder gave out".into()));
    }
    self.remaining -= 1;
    RawStill.compress_plane(src, w, h, q)
  }

  fn decompress_yuv420(&mut self, data: &[u8], dst: &mut [u8], w: usize, h: usize) -> stereovid::Result<()> {
    RawStill.decompress_yuv420(data, dst, w, h)
  }

  fn decompress_plane(&mut self, data: &[u8], dst: &mut [u8], w: usize, h: usize) -> stereovid::Result<()> {
    RawStill.decompress_plane(data, dst, w, h)
  }
}

#[test]
fn failed_add_frame_poisons_the_writer() {
  // A still-coder failure leaves the writer droppable but not finalizable,
  // with the sidecars still on disk.
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("poisoned");
  let dims = dims64();

  // Every coder instance survives exactly one compression, so the first
  // frame goes through and the second frame's proxy compression fails.
  let mut writer = ContainerWriter::create(&path, dims, ModeFlags::STEREO, || {
    Box::new(FlakyStill { remaining: 1 })
  })
  .unwrap();

  let mut frame = vec![0x33u8; dims.frame_size()];
  writer.add_frame(&mut frame).unwrap();

  let mut frame = vec![0x34u8; dims.frame_size()];
  assert!(matches!(writer.add_frame(&mut frame), Err(Error::StillCoder(_))));

  // Poisoned: further frames and finalize are refused.
  let mut frame = vec![0x35u8; dims.frame_size()];
  assert!(writer.add_frame(&mut frame).is_err());
  assert!(writer.finalize().is_err());

  assert!(!path.exists());
  assert!(sidecar(&path, ".raw").exists());
  assert!(sidecar(&path, ".header").exists());
}

#[test]
fn empty_stream_roundtrip() {
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("empty");
  let dims = dims64();
  write_stream(&path, dims, &[]);

  let mut reader = open_stream(&path);
  assert_eq!(reader.frame_count(), 0);
  assert!(matches!(reader.read_full(0), Err(Error::EndOfStream)));
  assert!(matches!(reader.read_proxy(0), Err(Error::EndOfStream)));
}

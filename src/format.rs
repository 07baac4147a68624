// Container layout.
//
// The file is a fixed 8-word pre-header, an index of per-frame records, and
// a data section of concatenated still-coder payloads. Everything in the
// header and index is a little-endian 64-bit word; all data offsets are
// relative to the end of the index.

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};
use crate::frame::{Dimensions, ModeFlags};

pub const PRE_HEADER_WORDS: usize = 8;

// Semantic indices into the pre-header.
pub const PRE_HEADER_INDEX_LENGTH: usize = 0;
pub const PRE_HEADER_FRAME_COUNT: usize = 1;
pub const PRE_HEADER_WIDTH: usize = 2;
pub const PRE_HEADER_HEIGHT: usize = 3;
pub const PRE_HEADER_I_STEP: usize = 4;
pub const PRE_HEADER_MODE_FLAGS: usize = 5;

// I-frame cadence. Derived by readers from the pre-header; never written per
// frame.
pub const I_STEP: usize = 30;

// A per-frame record is 4 fixed words plus an (offset, size) pair per
// sub-buffer.
pub const FRAME_RECORD_BASE_WORDS: usize = 4;

pub fn frame_record_words(subs: usize) -> usize {
  FRAME_RECORD_BASE_WORDS + 2 * subs
}

#[derive(Debug, Clone, Copy)]
pub struct PreHeader {
  pub index_words: u64,
  pub frame_count: u64,
  pub dims: Dimensions,
  pub i_step: usize,
  pub flags: ModeFlags,
}

impl PreHeader {
  // The word image of this pre-header, with index length and frame count
  // still unknown. Those two words are patched during finalization.
  pub fn placeholder_words(dims: Dimensions, i_step: usize, flags: ModeFlags) -> [u64; PRE_HEADER_WORDS] {
    let mut words = [0u64; PRE_HEADER_WORDS];
    words[PRE_HEADER_WIDTH] = dims.width as u64;
    words[PRE_HEADER_HEIGHT] = dims.height as u64;
    words[PRE_HEADER_I_STEP] = i_step as u64;
    words[PRE_HEADER_MODE_FLAGS] = flags.bits();
    words
  }

  pub fn read_from(r: &mut impl Read) -> Result<PreHeader> {
    let mut words = [0u64; PRE_HEADER_WORDS];
    for word in words.iter_mut() {
      *word = r.read_u64::<LittleEndian>()?;
    }

    let dims = Dimensions::new(
      words[PRE_HEADER_WIDTH] as usize,
      words[PRE_HEADER_HEIGHT] as usize,
    )?;

    let i_step = words[PRE_HEADER_I_STEP] as usize;
    if i_step == 0 {
      return Err(Error::InvalidStream("i-frame step is zero"));
    }

    let flags = ModeFlags::from_bits_retain(words[PRE_HEADER_MODE_FLAGS]);

    Ok(PreHeader {
      index_words: words[PRE_HEADER_INDEX_LENGTH],
      frame_count: words[PRE_HEADER_FRAME_COUNT],
      dims: dims,
      i_step: i_step,
      flags: flags,
    })
  }

  // Words per frame record, recovered from the index size rather than
  // assumed, so a reader keeps working if the sub-buffer count ever grows.
  pub fn record_words(&self) -> Result<usize> {
    if self.frame_count == 0 {
      return Ok(frame_record_words(1));
    }

    if self.index_words % self.frame_count != 0 {
      return Err(Error::InvalidStream("index length is not a whole number of frame records"));
    }

    let words = (self.index_words / self.frame_count) as usize;
    if words < frame_record_words(1) || (words - FRAME_RECORD_BASE_WORDS) % 2 != 0 {
      return Err(Error::InvalidStream("frame record size is malformed"));
    }

    Ok(words)
  }
}

#[derive(Debug, Clone)]
pub struct FrameRecord {
  pub proxy_offset: u64,
  pub proxy_size: u64,
  pub full_offset: u64,
  pub full_size: u64,
  // (offset relative to full_offset, size) per sub-buffer.
  pub subs: Vec<(u64, u64)>,
}

impl FrameRecord {
  pub fn parse(words: &[u64]) -> Result<FrameRecord> {
    assert!(words.len() >= frame_record_words(1));
    assert!((words.len() - FRAME_RECORD_BASE_WORDS) % 2 == 0);

    let record = FrameRecord {
      proxy_offset: words[0],
      proxy_size: words[1],
      full_offset: words[2],
      full_size: words[3],
      subs: words[FRAME_RECORD_BASE_WORDS..]
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect(),
    };

    if record.proxy_offset + record.proxy_size > record.full_offset {
      return Err(Error::InvalidStream("proxy payload overlaps frame payload"));
    }

    let total: u64 = record.subs.iter().map(|&(_, size)| size).sum();
    if total != record.full_size {
      return Err(Error::InvalidStream("sub-buffer sizes do not add up to the frame size"));
    }

    for &(offset, size) in &record.subs {
      if offset + size > record.full_size {
        return Err(Error::InvalidStream("sub-buffer extends past the frame payload"));
      }
    }

    Ok(record)
  }
}

// Container writer.
//
// The index cannot be sized until the last frame is in, so the stream is
// staged across two sidecar files: `<name>.raw` takes the data section as it
// is produced and `<name>.header` takes the pre-header and index words,
// strictly sequentially. Finalization patches the two unknown pre-header
// words and concatenates the sidecars into the final `<name>` file.

use std::fs::{self, File};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};

use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::format::{PreHeader, I_STEP, PRE_HEADER_WORDS};
use crate::frame::{Dimensions, ModeFlags, SUB_BUFFER_COUNT};
use crate::still::StillCoder;

// Index words staged in memory between header-file writes.
pub const HEADER_STAGE_WORDS: usize = 1024;

// Finalization copies the data section in chunks of this size to bound
// memory on large streams.
const COPY_CHUNK: usize = 64 << 20;

// `<name>` plus a sidecar suffix, without touching any existing extension.
fn sidecar_path(base: &Path, suffix: &str) -> PathBuf {
  let mut name = base.as_os_str().to_os_string();
  name.push(suffix);
  PathBuf::from(name)
}

pub struct ContainerWriter {
  path: PathBuf,
  raw_path: PathBuf,
  header_path: PathBuf,

  main_file: File,
  header_file: File,

  stage: [u64; HEADER_STAGE_WORDS],
  stage_len: usize,
  header_words: u64,

  frames_written: u64,
  encoder: Encoder,

  // A failed add_frame makes the stream unfinishable; the sidecars are left
  // behind for inspection.
  failed: bool,
}

impl ContainerWriter {
  pub fn create(
    path: impl AsRef<Path>,
    dims: Dimensions,
    flags: ModeFlags,
    make_coder: impl FnMut() -> Box<dyn StillCoder>,
  ) -> Result<ContainerWriter> {
    let encoder = Encoder::new(dims, flags, make_coder)?;

    let path = path.as_ref().to_path_buf();
    let raw_path = sidecar_path(&path, ".raw");
    let header_path = sidecar_path(&path, ".header");

    let main_file = File::create(&raw_path)?;
    let header_file = File::create(&header_path)?;

    let mut writer = ContainerWriter {
      path: path,
      raw_path: raw_path,
      header_path: header_path,
      main_file: main_file,
      header_file: header_file,
      stage: [0u64; HEADER_STAGE_WORDS],
      stage_len: 0,
      header_words: 0,
      frames_written: 0,
      encoder: encoder,
      failed: false,
    };

    // Index length and frame count are not known yet; they are patched into
    // words 0 and 1 during finalize.
    for word in PreHeader::placeholder_words(dims, I_STEP, flags) {
      writer.push_header_word(word)?;
    }

    info!(
      "writing {}x{} stream to {}",
      dims.width,
      dims.height,
      writer.path.display()
    );

    Ok(writer)
  }

  pub fn encoder(&self) -> &Encoder {
    &self.encoder
  }

  pub fn encoder_mut(&mut self) -> &mut Encoder {
    &mut self.encoder
  }

  pub fn frames_written(&self) -> u64 {
    self.frames_written
  }

  fn push_header_word(&mut self, word: u64) -> Result<()> {
    self.stage[self.stage_len] = word;
    self.stage_len += 1;
    self.header_words += 1;

    if self.stage_len == HEADER_STAGE_WORDS {
      self.flush_stage()?;
    }

    Ok(())
  }

  fn flush_stage(&mut self) -> Result<()> {
    let mut bytes = vec![0u8; self.stage_len * 8];
    LittleEndian::write_u64_into(&self.stage[..self.stage_len], &mut bytes);
    self.header_file.write_all(&bytes)?;
    self.stage_len = 0;
    Ok(())
  }

  // Encode one frame and append its payloads and index words. `src` is
  // consumed as scratch: it holds residuals afterwards.
  pub fn add_frame(&mut self, src: &mut [u8]) -> Result<()> {
    if self.failed {
      return Err(Error::InvalidStream("writer poisoned by an earlier failure"));
    }

    match self.add_frame_inner(src) {
      Ok(()) => Ok(()),
      Err(e) => {
        self.failed = true;
        Err(e)
      }
    }
  }

  fn add_frame_inner(&mut self, src: &mut [u8]) -> Result<()> {
    self.encoder.begin_frame(src)?;
    self.encoder.compress_proxy()?;
    self.encoder.encode_sub_frames(src)?;

    // All offsets are relative to the data section, which is exactly what
    // the raw sidecar contains.
    let proxy_offset = self.main_file.stream_position()?;
    let proxy_size = self.encoder.proxy_payload().len() as u64;
    self.push_header_word(proxy_offset)?;
    self.push_header_word(proxy_size)?;
    self.main_file.write_all(self.encoder.proxy_payload())?;

    let full_offset = self.main_file.stream_position()?;
    let full_size = self.encoder.full_size() as u64;
    self.push_header_word(full_offset)?;
    self.push_header_word(full_size)?;

    let mut relative = 0u64;
    for k in 0..SUB_BUFFER_COUNT {
      let size = self.encoder.sub_frame_size(k) as u64;
      self.push_header_word(relative)?;
      self.push_header_word(size)?;
      self.main_file.write_all(self.encoder.sub_frame(k))?;
      relative += size;
    }

    self.encoder.reconstruct_sub_frames(src)?;
    self.encoder.end_frame(src)?;

    debug!(
      "frame {}: proxy {} bytes at {}, full {} bytes at {}",
      self.frames_written, proxy_size, proxy_offset, full_size, full_offset
    );

    self.frames_written += 1;
    Ok(())
  }

  // Merge the sidecars into the final self-describing file and delete them.
  pub fn finalize(mut self) -> Result<()> {
    if self.failed {
      return Err(Error::InvalidStream("writer poisoned by an earlier failure"));
    }

    self.flush_stage()?;

    let ContainerWriter {
      path,
      raw_path,
      header_path,
      main_file,
      header_file,
      header_words,
      frames_written,
      encoder,
      ..
    } = self;

    // Close the sidecar handles before reading them back.
    drop(header_file);
    drop(main_file);
    drop(encoder);

    let mut header_bytes = fs::read(&header_path)?;
    if header_bytes.len() != header_words as usize * 8 {
      return Err(Error::InvalidStream("staged header has unexpected size"));
    }

    LittleEndian::write_u64(&mut header_bytes[0..8], header_words - PRE_HEADER_WORDS as u64);
    LittleEndian::write_u64(&mut header_bytes[8..16], frames_written);

    let mut output = File::create(&path)?;
    output.write_all(&header_bytes)?;

    let mut raw = File::open(&raw_path)?;
    let mut chunk = vec![0u8; COPY_CHUNK];
    loop {
      let n = raw.read(&mut chunk)?;
      if n == 0 {
        break;
      }
      output.write_all(&chunk[..n])?;
    }

    output.flush()?;
    drop(raw);
    drop(output);

    fs::remove_file(&raw_path)?;
    fs::remove_file(&header_path)?;

    info!("finalized {} frames to {}", frames_written, path.display());
    Ok(())
  }
}

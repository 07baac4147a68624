// Container reader.
//
// The pre-header and the whole index are read up front; everything after
// that is a seek into the data section. Frame payloads land in a grow-only
// scratch buffer so steady-state reading does not allocate.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use log::info;

use crate::decoder::Decoder;
use crate::error::{Error, Result};
use crate::format::{FrameRecord, PreHeader, FRAME_RECORD_BASE_WORDS};
use crate::frame::{Dimensions, FrameBuf};
use crate::still::StillCoder;

// What the scratch buffer currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payload {
  None,
  Full,
  Proxy,
}

pub struct ContainerReader {
  file: File,
  header: PreHeader,
  index: Vec<u64>,
  record_words: usize,
  data_base: u64,

  current: Vec<u8>,
  current_size: usize,
  current_payload: Payload,
  record: Option<FrameRecord>,
  frame_index: usize,

  decoder: Decoder,
  decoded: FrameBuf,
  decoded_proxy: FrameBuf,
}

impl ContainerReader {
  pub fn open(
    path: impl AsRef<Path>,
    make_coder: impl FnMut() -> Box<dyn StillCoder>,
  ) -> Result<ContainerReader> {
    let mut file = File::open(path.as_ref())?;

    let header = PreHeader::read_from(&mut file)?;
    let record_words = header.record_words()?;
    let subs = (record_words - FRAME_RECORD_BASE_WORDS) / 2;

    let mut index = vec![0u64; header.index_words as usize];
    file.read_u64_into::<LittleEndian>(&mut index)?;
    let data_base = file.stream_position()?;

    let decoder = Decoder::new(header.dims, header.flags, header.i_step, subs, make_coder)?;
    let decoded = FrameBuf::new(header.dims);
    let decoded_proxy = FrameBuf::new(header.dims.proxy(header.flags));

    info!(
      "opened {}: {}x{}, {} frames, {} sub-buffer(s)",
      path.as_ref().display(),
      header.dims.width,
      header.dims.height,
      header.frame_count,
      subs
    );

    Ok(ContainerReader {
      file: file,
      header: header,
      index: index,
      record_words: record_words,
      data_base: data_base,
      current: Vec::new(),
      current_size: 0,
      current_payload: Payload::None,
      record: None,
      frame_index: 0,
      decoder: decoder,
      decoded: decoded,
      decoded_proxy: decoded_proxy,
    })
  }

  pub fn resolution(&self) -> (usize, usize) {
    (self.header.dims.width, self.header.dims.height)
  }

  pub fn proxy_resolution(&self) -> (usize, usize) {
    let proxy = self.header.dims.proxy(self.header.flags);
    (proxy.width, proxy.height)
  }

  pub fn dims(&self) -> Dimensions {
    self.header.dims
  }

  pub fn frame_count(&self) -> u64 {
    self.header.frame_count
  }

  pub fn i_step(&self) -> usize {
    self.header.i_step
  }

  pub fn frame_index(&self) -> usize {
    self.frame_index
  }

  pub fn decoder(&self) -> &Decoder {
    &self.decoder
  }

  pub fn record(&self, i: usize) -> Result<FrameRecord> {
    if i as u64 >= self.header.frame_count {
      return Err(Error::EndOfStream);
    }

    let start = i * self.record_words;
    FrameRecord::parse(&self.index[start..start + self.record_words])
  }

  fn fetch(&mut self, offset: u64, size: usize) -> Result<()> {
    self.file.seek(SeekFrom::Start(self.data_base + offset))?;

    // Grow-only: the buffer never shrinks across frames.
    if self.current.len() < size {
      self.current.resize(size, 0);
    }

    self.file.read_exact(&mut self.current[..size])?;
    self.current_size = size;
    Ok(())
  }

  // Fetch frame i's full payload. Returns EndOfStream past the last frame.
  pub fn read_full(&mut self, i: usize) -> Result<()> {
    let record = self.record(i)?;
    self.fetch(record.full_offset, record.full_size as usize)?;
    self.record = Some(record);
    self.current_payload = Payload::Full;
    self.frame_index = i + 1;
    Ok(())
  }

  // Fetch frame i's proxy payload.
  pub fn read_proxy(&mut self, i: usize) -> Result<()> {
    let record = self.record(i)?;
    self.fetch(record.proxy_offset, record.proxy_size as usize)?;
    self.record = Some(record);
    self.current_payload = Payload::Proxy;
    self.frame_index = i + 1;
    Ok(())
  }

  // Decode the fetched full frame: parallel sub-frame decompression, then
  // the inverse differential transform.
  pub fn decode_full(&mut self) -> Result<&[u8]> {
    if self.current_payload != Payload::Full {
      return Err(Error::InvalidStream("decode_full without a preceding read_full"));
    }
    let record = self.record.as_ref().unwrap();

    let payload = &self.current[..self.current_size];
    let payloads: Vec<&[u8]> = record
      .subs
      .iter()
      .map(|&(offset, size)| &payload[offset as usize..(offset + size) as usize])
      .collect();

    self.decoder.decode_sub_frames(&payloads, self.decoded.as_mut_slice())?;
    self.decoder.finalize(self.decoded.as_mut_slice())?;
    Ok(self.decoded.as_slice())
  }

  // Decode the fetched proxy as a self-contained thumbnail.
  pub fn decode_proxy(&mut self) -> Result<&[u8]> {
    if self.current_payload != Payload::Proxy {
      return Err(Error::InvalidStream("decode_proxy without a preceding read_proxy"));
    }

    let payload = &self.current[..self.current_size];
    self.decoder.decode_proxy(payload, self.decoded_proxy.as_mut_slice())?;
    Ok(self.decoded_proxy.as_slice())
  }
}

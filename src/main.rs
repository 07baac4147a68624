use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use stereovid::error::{Error, Result};
use stereovid::frame::{Dimensions, ModeFlags};
use stereovid::reader::ContainerReader;
use stereovid::still::RawStill;
use stereovid::writer::ContainerWriter;
use stereovid::y4m::{Y4MReader, Y4MWriter};

#[derive(Parser)]
#[command(name = "stereovid", version, about = "Side-by-side stereoscopic video container codec")]
struct Args {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Encode a YUV4MPEG2 stream (each frame a vertically stacked stereo pair)
  Encode {
    /// Input .y4m file
    input: PathBuf,
    /// Output stream
    output: PathBuf,
    /// P-frame quality passed to the still coder
    #[arg(long, default_value_t = 75)]
    quality: u8,
    /// I-frame quality passed to the still coder
    #[arg(long, default_value_t = 75)]
    iframe_quality: u8,
    /// Low-res proxy quality passed to the still coder
    #[arg(long, default_value_t = 85)]
    proxy_quality: u8,
  },
  /// Decode a stream back to YUV4MPEG2
  Decode {
    input: PathBuf,
    /// Output .y4m file
    output: PathBuf,
  },
  /// Extract the low-res proxy track as YUV4MPEG2
  Proxy {
    input: PathBuf,
    /// Output .y4m file
    output: PathBuf,
  },
  /// Print stream information
  Info { input: PathBuf },
}

fn encode(
  input: &PathBuf,
  output: &PathBuf,
  quality: u8,
  iframe_quality: u8,
  proxy_quality: u8,
) -> Result<()> {
  let mut y4m = Y4MReader::new(BufReader::new(File::open(input)?))?;
  let dims = Dimensions::new(y4m.width(), y4m.height())?;

  let mut writer = ContainerWriter::create(output, dims, ModeFlags::STEREO, || Box::new(RawStill))?;
  writer.encoder_mut().set_qualities(quality, iframe_quality, proxy_quality);

  let mut frame = vec![0u8; dims.frame_size()];
  loop {
    match y4m.read_frame(&mut frame) {
      Ok(()) => {}
      Err(Error::EndOfStream) => break,
      Err(e) => return Err(e),
    }
    writer.add_frame(&mut frame)?;
  }

  let frames = writer.frames_written();
  writer.finalize()?;
  println!("encoded {} frames to {}", frames, output.display());
  Ok(())
}

fn decode(input: &PathBuf, output: &PathBuf) -> Result<()> {
  let mut reader = ContainerReader::open(input, || Box::new(RawStill))?;
  let (width, height) = reader.resolution();
  let mut y4m = Y4MWriter::new(BufWriter::new(File::create(output)?), width, height)?;

  for i in 0..reader.frame_count() as usize {
    reader.read_full(i)?;
    let frame = reader.decode_full()?;
    y4m.write_frame(frame)?;
  }

  println!("decoded {} frames to {}", reader.frame_count(), output.display());
  Ok(())
}

fn proxy(input: &PathBuf, output: &PathBuf) -> Result<()> {
  let mut reader = ContainerReader::open(input, || Box::new(RawStill))?;
  let (width, height) = reader.proxy_resolution();
  let mut y4m = Y4MWriter::new(BufWriter::new(File::create(output)?), width, height)?;

  for i in 0..reader.frame_count() as usize {
    reader.read_proxy(i)?;
    let thumb = reader.decode_proxy()?;
    y4m.write_frame(thumb)?;
  }

  println!("extracted {} proxy frames to {}", reader.frame_count(), output.display());
  Ok(())
}

fn info(input: &PathBuf) -> Result<()> {
  let reader = ContainerReader::open(input, || Box::new(RawStill))?;
  let (width, height) = reader.resolution();
  let (proxy_width, proxy_height) = reader.proxy_resolution();

  println!("resolution:       {}x{}", width, height);
  println!("proxy resolution: {}x{}", proxy_width, proxy_height);
  println!("frames:           {}", reader.frame_count());
  println!("i-frame step:     {}", reader.i_step());

  let mut proxy_bytes = 0u64;
  let mut full_bytes = 0u64;
  for i in 0..reader.frame_count() as usize {
    let record = reader.record(i)?;
    proxy_bytes += record.proxy_size;
    full_bytes += record.full_size;
  }
  println!("payload bytes:    {} full, {} proxy", full_bytes, proxy_bytes);
  Ok(())
}

fn run(args: Args) -> Result<()> {
  match &args.command {
    Command::Encode { input, output, quality, iframe_quality, proxy_quality } => {
      encode(input, output, *quality, *iframe_quality, *proxy_quality)
    }
    Command::Decode { input, output } => decode(input, output),
    Command::Proxy { input, output } => proxy(input, output),
    Command::Info { input } => info(input),
  }
}

fn main() -> ExitCode {
  env_logger::init();

  match run(Args::parse()) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("error: {}", e);
      ExitCode::FAILURE
    }
  }
}

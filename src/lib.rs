//! Codec for side-by-side stereoscopic video: each frame is a vertically
//! stacked left/right pair in planar YUV 4:2:0. Before handing anything to
//! the (external) still-image coder, frames are rewritten as stereo
//! differences (I-frames) or temporal-plus-stereo differences (P-frames),
//! and a 1-in-8 thumbnail proxy is stored next to every frame so readers can
//! scrub without full reconstruction. The container is a flat file: 8-word
//! pre-header, per-frame index, concatenated payloads.

pub mod decoder;
pub mod diff;
pub mod encoder;
pub mod error;
pub mod format;
pub mod frame;
pub mod pool;
pub mod reader;
pub mod still;
pub mod writer;
pub mod y4m;

pub use decoder::Decoder;
pub use diff::FrameKind;
pub use encoder::Encoder;
pub use error::{Error, Result};
pub use format::I_STEP;
pub use frame::{Dimensions, FrameBuf, ModeFlags, SUB_BUFFER_COUNT};
pub use pool::WorkerPool;
pub use reader::ContainerReader;
pub use still::{RawStill, StillCoder};
pub use writer::ContainerWriter;

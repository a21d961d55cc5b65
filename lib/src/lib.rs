//! Buffer queue management for the Exynos MFC (Multi-Format Codec) V4L2 driver.
//!
//! The MFC is a memory-to-memory codec: compressed bitstream and raw frames travel through two
//! independent V4L2 queues. This crate manages the buffer pools backing these queues for both the
//! decoder and the encoder, and the reference tracking required to let userspace own the decoded
//! picture buffers ("dynamic DPB").
//!
//! It is organized in layers:
//!
//! * The `ioctl` module provides thin, safe wrappers over the few V4L2 ioctls the MFC driver needs.
//! * The `device` module defines the [`device::MfcDevice`] trait through which every device
//!   interaction goes, and its implementation over an actual V4L2 node.
//! * The `pool` module contains the per-direction buffer pools: setup, streaming control,
//!   registration of external memory, enqueue and dequeue.
//! * The [`decoder::Decoder`] and [`encoder::Encoder`] types are the codec contexts that own a
//!   device and its two pools.
#[doc(hidden)]
pub mod bindings;
pub mod decoder;
pub mod device;
pub mod dpb;
pub mod encoder;
pub mod error;
pub mod format;
pub mod ioctl;
pub mod memory;
pub mod ops;
pub mod pool;

use std::fmt;

use enumn::N;

pub use error::VideoError;

/// Side of a memory-to-memory queue, from the driver's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueueDirection {
    /// Userspace writes into it: bitstream to decode, or frames to encode.
    Output,
    /// Userspace reads from it.
    Capture,
}

/// The two multiplanar queues of an MFC instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(u32)]
pub enum QueueType {
    VideoCaptureMplane = bindings::v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
    VideoOutputMplane = bindings::v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE,
}

impl QueueType {
    pub fn direction(&self) -> QueueDirection {
        match self {
            QueueType::VideoOutputMplane => QueueDirection::Output,
            QueueType::VideoCaptureMplane => QueueDirection::Capture,
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueueType::VideoOutputMplane => "OUTPUT_MPLANE",
            QueueType::VideoCaptureMplane => "CAPTURE_MPLANE",
        })
    }
}

/// A V4L2 fourcc code.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelFormat(u32);

impl PixelFormat {
    pub const fn from_fourcc(code: &[u8; 4]) -> Self {
        Self(bindings::v4l2_fourcc(code[0], code[1], code[2], code[3]))
    }

    pub const fn to_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for PixelFormat {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

impl From<&[u8; 4]> for PixelFormat {
    fn from(code: &[u8; 4]) -> Self {
        Self::from_fourcc(code)
    }
}

impl From<PixelFormat> for u32 {
    fn from(format: PixelFormat) -> Self {
        format.0
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for c in self.0.to_le_bytes() {
            write!(f, "{}", c as char)?;
        }
        Ok(())
    }
}

impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({:#x})", self, self.0)
    }
}

/// Size requirements of one plane of a format.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct PlaneLayout {
    /// Minimum size of the memory backing the plane.
    pub sizeimage: u32,
    /// Line stride, zero for bitstream planes.
    pub bytesperline: u32,
}

/// Multiplanar format of a queue.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Format {
    pub width: u32,
    pub height: u32,
    pub pixelformat: PixelFormat,
    pub plane_fmt: Vec<PlaneLayout>,
}

/// Rectangle of a frame, e.g. its visible area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Rect {
        Rect {
            left,
            top,
            width,
            height,
        }
    }
}

impl From<bindings::v4l2_rect> for Rect {
    fn from(r: bindings::v4l2_rect) -> Self {
        Rect::new(r.left, r.top, r.width, r.height)
    }
}

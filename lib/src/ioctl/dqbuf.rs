//! `VIDIOC_DQBUF` for the multiplanar queues.
use std::os::unix::io::AsRawFd;

use nix::errno::Errno;
use thiserror::Error;

use super::{mplane_buffer, BufferFlags, V4l2BufferPlanes};
use crate::memory::MemoryType;
use crate::QueueType;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DqBufPlane {
    pub bytesused: u32,
    pub length: u32,
}

/// What the driver reports about a buffer it returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DqBuffer {
    pub index: u32,
    /// Carries the frame type and the `LAST` marker.
    pub flags: BufferFlags,
    pub sequence: u32,
    pub planes: Vec<DqBufPlane>,
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_buffer;
    nix::ioctl_readwrite!(vidioc_dqbuf, b'V', 17, v4l2_buffer);
}

#[derive(Debug, Error)]
pub enum DqBufError {
    #[error("no buffer ready")]
    NotReady,
    #[error("last buffer already dequeued")]
    Eos,
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<Errno> for DqBufError {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::EAGAIN => DqBufError::NotReady,
            Errno::EPIPE => DqBufError::Eos,
            e => DqBufError::IoctlError(e),
        }
    }
}

impl From<DqBufError> for Errno {
    fn from(err: DqBufError) -> Self {
        match err {
            DqBufError::NotReady => Errno::EAGAIN,
            DqBufError::Eos => Errno::EPIPE,
            DqBufError::IoctlError(e) => e,
        }
    }
}

/// Dequeue the next buffer of `queue`. On a non-blocking node, `NotReady` is returned when the
/// driver has nothing to give back yet.
pub fn dqbuf(
    fd: &impl AsRawFd,
    queue: QueueType,
    memory: MemoryType,
    num_planes: usize,
) -> Result<DqBuffer, DqBufError> {
    let mut planes = V4l2BufferPlanes::default();
    let mut buf = mplane_buffer(queue, memory, &mut planes, num_planes);

    // SAFETY: `buf` points to `planes`, which holds `buf.length` entries.
    unsafe { ioctl::vidioc_dqbuf(fd.as_raw_fd(), &mut buf) }?;

    let planes = planes[..(buf.length as usize).min(planes.len())]
        .iter()
        .map(|p| DqBufPlane {
            bytesused: p.bytesused,
            length: p.length,
        })
        .collect();

    Ok(DqBuffer {
        index: buf.index,
        flags: BufferFlags::from_bits_truncate(buf.flags),
        sequence: buf.sequence,
        planes,
    })
}

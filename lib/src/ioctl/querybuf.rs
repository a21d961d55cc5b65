//! `VIDIOC_QUERYBUF`, used to locate the planes of MMAP buffers.
use std::os::unix::io::AsRawFd;

use nix::errno::Errno;
use thiserror::Error;

use super::{mplane_buffer, BufferFlags, V4l2BufferPlanes};
use crate::bindings;
use crate::memory::MemoryType;
use crate::QueueType;

/// Where to find a plane of an MMAP buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryBufPlane {
    /// Offset to pass to `mmap()` on the device.
    pub mem_offset: u32,
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryBuffer {
    pub index: u32,
    pub flags: BufferFlags,
    pub planes: Vec<QueryBufPlane>,
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_buffer;
    nix::ioctl_readwrite!(vidioc_querybuf, b'V', 9, v4l2_buffer);
}

#[derive(Debug, Error)]
pub enum QueryBufError {
    #[error("no buffer {0} on this queue")]
    InvalidIndex(u32),
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<QueryBufError> for Errno {
    fn from(err: QueryBufError) -> Self {
        match err {
            QueryBufError::InvalidIndex(_) => Errno::EINVAL,
            QueryBufError::IoctlError(e) => e,
        }
    }
}

pub fn querybuf(
    fd: &impl AsRawFd,
    queue: QueueType,
    memory: MemoryType,
    index: u32,
) -> Result<QueryBuffer, QueryBufError> {
    let mut planes = V4l2BufferPlanes::default();
    let mut buf = mplane_buffer(queue, memory, &mut planes, bindings::VIDEO_MAX_PLANES as usize);
    buf.index = index;

    // SAFETY: `buf` points to `planes`, which is large enough for any plane count.
    unsafe { ioctl::vidioc_querybuf(fd.as_raw_fd(), &mut buf) }.map_err(|e| match e {
        Errno::EINVAL => QueryBufError::InvalidIndex(index),
        e => QueryBufError::IoctlError(e),
    })?;

    let planes = planes[..(buf.length as usize).min(planes.len())]
        .iter()
        .map(|plane| QueryBufPlane {
            // SAFETY: the driver sets `mem_offset` for MMAP buffers.
            mem_offset: unsafe { plane.m.mem_offset },
            length: plane.length,
        })
        .collect();

    Ok(QueryBuffer {
        index: buf.index,
        flags: BufferFlags::from_bits_truncate(buf.flags),
        planes,
    })
}

//! `VIDIOC_QBUF` for the multiplanar queues.
use std::os::unix::io::{AsRawFd, RawFd};

use nix::errno::Errno;
use nix::libc::c_ulong;
use thiserror::Error;

use super::{mplane_buffer, BufferFlags, V4l2BufferPlanes};
use crate::memory::MemoryType;
use crate::QueueType;

/// Memory reference passed along with a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneBacking {
    /// The device's own memory, designated by the buffer index.
    Mmap,
    UserPtr(usize),
    DmaBuf(RawFd),
}

/// One plane of a buffer to queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QBufPlane {
    pub bytesused: u32,
    /// Size of the backing memory. Ignored for MMAP planes.
    pub length: u32,
    pub backing: PlaneBacking,
}

/// A buffer to queue, along with the memory backing each of its planes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QBuffer {
    pub index: u32,
    pub memory: MemoryType,
    pub flags: BufferFlags,
    pub planes: Vec<QBufPlane>,
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_buffer;
    nix::ioctl_readwrite!(vidioc_qbuf, b'V', 15, v4l2_buffer);
}

#[derive(Debug, Error)]
pub enum QBufError {
    #[error("invalid number of planes specified for the buffer: {0}")]
    InvalidNumPlanes(usize),
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<QBufError> for Errno {
    fn from(err: QBufError) -> Self {
        match err {
            QBufError::InvalidNumPlanes(_) => Errno::EINVAL,
            QBufError::IoctlError(e) => e,
        }
    }
}

/// Give `buffer` to the driver. All its planes must use the same memory type as the queue.
pub fn qbuf(fd: &impl AsRawFd, queue: QueueType, buffer: &QBuffer) -> Result<(), QBufError> {
    let mut planes = V4l2BufferPlanes::default();
    let num_planes = buffer.planes.len();
    if num_planes == 0 || num_planes > planes.len() {
        return Err(QBufError::InvalidNumPlanes(num_planes));
    }

    for (dst, src) in planes.iter_mut().zip(&buffer.planes) {
        dst.bytesused = src.bytesused;
        match src.backing {
            PlaneBacking::Mmap => continue,
            PlaneBacking::UserPtr(addr) => dst.m.userptr = addr as c_ulong,
            PlaneBacking::DmaBuf(fd) => dst.m.fd = fd,
        }
        dst.length = src.length;
    }

    let mut buf = mplane_buffer(queue, buffer.memory, &mut planes, num_planes);
    buf.index = buffer.index;
    buf.flags = buffer.flags.bits();

    // SAFETY: `buf` points to `planes`, which holds `num_planes` initialized entries.
    unsafe { ioctl::vidioc_qbuf(fd.as_raw_fd(), &mut buf) }.map_err(QBufError::IoctlError)?;

    Ok(())
}

//! `VIDIOC_REQBUFS`: allocation and release of a queue's buffers.
use std::os::unix::io::AsRawFd;

use nix::errno::Errno;
use thiserror::Error;

use crate::bindings::v4l2_requestbuffers;
use crate::memory::MemoryType;
use crate::QueueType;

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_requestbuffers;
    nix::ioctl_readwrite!(vidioc_reqbufs, b'V', 8, v4l2_requestbuffers);
}

#[derive(Debug, Error)]
pub enum ReqbufsError {
    #[error("{0} does not support {1:?} memory")]
    Unsupported(QueueType, MemoryType),
    #[error("queue still has mapped or queued buffers")]
    Busy,
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<ReqbufsError> for Errno {
    fn from(err: ReqbufsError) -> Self {
        match err {
            ReqbufsError::Unsupported(..) => Errno::EINVAL,
            ReqbufsError::Busy => Errno::EBUSY,
            ReqbufsError::IoctlError(e) => e,
        }
    }
}

/// Request `count` buffers of `memory` type on `queue`, or free them all if `count` is 0.
///
/// Returns the number of buffers the driver actually allocated, which can differ from `count`.
pub fn reqbufs(
    fd: &impl AsRawFd,
    queue: QueueType,
    memory: MemoryType,
    count: u32,
) -> Result<u32, ReqbufsError> {
    let mut request = v4l2_requestbuffers {
        count,
        type_: queue as u32,
        memory: memory as u32,
        ..Default::default()
    };

    // SAFETY: `request` is a valid structure the driver updates in place.
    unsafe { ioctl::vidioc_reqbufs(fd.as_raw_fd(), &mut request) }.map_err(|e| match e {
        Errno::EINVAL => ReqbufsError::Unsupported(queue, memory),
        Errno::EBUSY => ReqbufsError::Busy,
        e => ReqbufsError::IoctlError(e),
    })?;

    Ok(request.count)
}

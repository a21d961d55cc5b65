//! `VIDIOC_STREAMON` and `VIDIOC_STREAMOFF`.
use std::os::unix::io::AsRawFd;

use nix::errno::Errno;
use thiserror::Error;

use crate::QueueType;

#[doc(hidden)]
mod ioctl {
    nix::ioctl_write_ptr!(vidioc_streamon, b'V', 18, u32);
    nix::ioctl_write_ptr!(vidioc_streamoff, b'V', 19, u32);
}

type StreamIoctl = unsafe fn(nix::libc::c_int, *const u32) -> nix::Result<nix::libc::c_int>;

fn stream_ioctl(fd: &impl AsRawFd, queue: QueueType, f: StreamIoctl) -> Result<(), Errno> {
    let type_ = queue as u32;
    // SAFETY: `type_` outlives the call.
    unsafe { f(fd.as_raw_fd(), &type_) }.map(|_| ())
}

#[derive(Debug, Error)]
pub enum StreamOnError {
    #[error("cannot stream {0}: unsupported or no buffers allocated")]
    InvalidQueue(QueueType),
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<StreamOnError> for Errno {
    fn from(err: StreamOnError) -> Self {
        match err {
            StreamOnError::InvalidQueue(_) => Errno::EINVAL,
            StreamOnError::IoctlError(e) => e,
        }
    }
}

pub fn streamon(fd: &impl AsRawFd, queue: QueueType) -> Result<(), StreamOnError> {
    stream_ioctl(fd, queue, ioctl::vidioc_streamon).map_err(|e| match e {
        Errno::EINVAL => StreamOnError::InvalidQueue(queue),
        e => StreamOnError::IoctlError(e),
    })
}

#[derive(Debug, Error)]
pub enum StreamOffError {
    #[error("cannot stop {0}: unsupported queue")]
    InvalidQueue(QueueType),
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<StreamOffError> for Errno {
    fn from(err: StreamOffError) -> Self {
        match err {
            StreamOffError::InvalidQueue(_) => Errno::EINVAL,
            StreamOffError::IoctlError(e) => e,
        }
    }
}

/// Stop streaming on `queue`. The driver returns all queued buffers to userspace.
pub fn streamoff(fd: &impl AsRawFd, queue: QueueType) -> Result<(), StreamOffError> {
    stream_ioctl(fd, queue, ioctl::vidioc_streamoff).map_err(|e| match e {
        Errno::EINVAL => StreamOffError::InvalidQueue(queue),
        e => StreamOffError::IoctlError(e),
    })
}

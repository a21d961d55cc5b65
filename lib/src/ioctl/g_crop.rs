//! `VIDIOC_G_CROP`, which the MFC uses to report the visible area of decoded frames.
use std::os::unix::io::AsRawFd;

use nix::errno::Errno;
use thiserror::Error;

use crate::bindings::v4l2_crop;
use crate::{QueueType, Rect};

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_crop;
    nix::ioctl_readwrite!(vidioc_g_crop, b'V', 59, v4l2_crop);
}

#[derive(Debug, Error)]
pub enum GCropError {
    #[error("no crop rectangle on {0}")]
    Invalid(QueueType),
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<GCropError> for Errno {
    fn from(err: GCropError) -> Self {
        match err {
            GCropError::Invalid(_) => Errno::EINVAL,
            GCropError::IoctlError(e) => e,
        }
    }
}

pub fn g_crop(fd: &impl AsRawFd, queue: QueueType) -> Result<Rect, GCropError> {
    let mut crop = v4l2_crop {
        type_: queue as u32,
        ..Default::default()
    };
    // SAFETY: `crop` is a valid structure the driver fills.
    unsafe { ioctl::vidioc_g_crop(fd.as_raw_fd(), &mut crop) }.map_err(|e| match e {
        Errno::EINVAL => GCropError::Invalid(queue),
        e => GCropError::IoctlError(e),
    })?;

    Ok(crop.c.into())
}

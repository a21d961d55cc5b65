//! `VIDIOC_G_CTRL` and `VIDIOC_S_CTRL`, through which all MFC codec settings go.
use std::os::unix::io::AsRawFd;

use nix::errno::Errno;
use thiserror::Error;

use crate::bindings::v4l2_control;

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_control;
    nix::ioctl_readwrite!(vidioc_g_ctrl, b'V', 27, v4l2_control);
    nix::ioctl_readwrite!(vidioc_s_ctrl, b'V', 28, v4l2_control);
}

#[derive(Debug, Error)]
pub enum SCtrlError {
    #[error("control not supported by the driver")]
    InvalidId,
    #[error("value out of range")]
    ValueOutOfBounds,
    #[error("control cannot be changed in the current state")]
    DeviceBusy,
    #[error("control is read-only")]
    ReadOnly,
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<Errno> for SCtrlError {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::EINVAL => SCtrlError::InvalidId,
            Errno::ERANGE => SCtrlError::ValueOutOfBounds,
            Errno::EBUSY => SCtrlError::DeviceBusy,
            Errno::EACCES => SCtrlError::ReadOnly,
            e => SCtrlError::IoctlError(e),
        }
    }
}

impl From<SCtrlError> for Errno {
    fn from(err: SCtrlError) -> Self {
        match err {
            SCtrlError::InvalidId => Errno::EINVAL,
            SCtrlError::ValueOutOfBounds => Errno::ERANGE,
            SCtrlError::DeviceBusy => Errno::EBUSY,
            SCtrlError::ReadOnly => Errno::EACCES,
            SCtrlError::IoctlError(e) => e,
        }
    }
}

type CtrlIoctl = unsafe fn(nix::libc::c_int, *mut v4l2_control) -> nix::Result<nix::libc::c_int>;

fn ctrl_ioctl(fd: &impl AsRawFd, f: CtrlIoctl, id: u32, value: i32) -> Result<i32, SCtrlError> {
    let mut ctrl = v4l2_control { id, value };
    // SAFETY: `ctrl` is a valid structure the driver updates in place.
    unsafe { f(fd.as_raw_fd(), &mut ctrl) }?;
    Ok(ctrl.value)
}

/// Set control `id` to `value`. Returns the value the driver kept.
pub fn s_ctrl(fd: &impl AsRawFd, id: u32, value: i32) -> Result<i32, SCtrlError> {
    ctrl_ioctl(fd, ioctl::vidioc_s_ctrl, id, value)
}

pub fn g_ctrl(fd: &impl AsRawFd, id: u32) -> Result<i32, SCtrlError> {
    ctrl_ioctl(fd, ioctl::vidioc_g_ctrl, id, 0)
}

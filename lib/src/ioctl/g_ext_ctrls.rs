//! Safe wrappers for the `VIDIOC_(G|S)_EXT_CTRLS` ioctls, restricted to 32-bit integer controls.
use std::os::unix::io::AsRawFd;

use nix::errno::Errno;
use thiserror::Error;

use crate::bindings;

/// A single integer control, as sent or received in a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtControl {
    pub id: u32,
    pub value: i32,
}

impl ExtControl {
    pub const fn new(id: u32, value: i32) -> Self {
        Self { id, value }
    }
}

impl From<&ExtControl> for bindings::v4l2_ext_control {
    fn from(ctrl: &ExtControl) -> Self {
        bindings::v4l2_ext_control {
            id: ctrl.id,
            __bindgen_anon_1: bindings::v4l2_ext_control__bindgen_ty_1 { value: ctrl.value },
            ..Default::default()
        }
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_ext_controls;
    nix::ioctl_readwrite!(vidioc_g_ext_ctrls, b'V', 71, v4l2_ext_controls);
    nix::ioctl_readwrite!(vidioc_s_ext_ctrls, b'V', 72, v4l2_ext_controls);
}

#[derive(Debug, Error)]
pub enum ExtCtrlError {
    #[error("control at index {0} is invalid or has an invalid value")]
    InvalidControl(u32),
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<ExtCtrlError> for Errno {
    fn from(err: ExtCtrlError) -> Self {
        match err {
            ExtCtrlError::InvalidControl(_) => Errno::EINVAL,
            ExtCtrlError::IoctlError(e) => e,
        }
    }
}

enum Direction {
    Get,
    Set,
}

fn ext_ctrls(
    fd: &impl AsRawFd,
    direction: Direction,
    ctrl_class: u32,
    ctrls: &mut [ExtControl],
) -> Result<(), ExtCtrlError> {
    let mut v4l2_ctrls: Vec<bindings::v4l2_ext_control> =
        ctrls.iter().map(bindings::v4l2_ext_control::from).collect();
    let mut v4l2_ext_ctrls = bindings::v4l2_ext_controls {
        which: ctrl_class,
        count: v4l2_ctrls.len() as u32,
        controls: v4l2_ctrls.as_mut_ptr(),
        ..Default::default()
    };

    let res = match direction {
        Direction::Get => unsafe { ioctl::vidioc_g_ext_ctrls(fd.as_raw_fd(), &mut v4l2_ext_ctrls) },
        Direction::Set => unsafe { ioctl::vidioc_s_ext_ctrls(fd.as_raw_fd(), &mut v4l2_ext_ctrls) },
    };
    match res {
        Ok(_) => (),
        Err(Errno::EINVAL) | Err(Errno::ERANGE) => {
            return Err(ExtCtrlError::InvalidControl(v4l2_ext_ctrls.error_idx))
        }
        Err(e) => return Err(ExtCtrlError::IoctlError(e)),
    }

    for (ctrl, v4l2_ctrl) in ctrls.iter_mut().zip(v4l2_ctrls.iter()) {
        // SAFETY: all our controls are 32-bit integers.
        ctrl.value = unsafe { v4l2_ctrl.__bindgen_anon_1.value };
    }

    Ok(())
}

/// Safe wrapper around the `VIDIOC_G_EXT_CTRLS` ioctl. The values of `ctrls` are updated with the
/// current values of the controls.
pub fn g_ext_ctrls(
    fd: &impl AsRawFd,
    ctrl_class: u32,
    ctrls: &mut [ExtControl],
) -> Result<(), ExtCtrlError> {
    ext_ctrls(fd, Direction::Get, ctrl_class, ctrls)
}

/// Safe wrapper around the `VIDIOC_S_EXT_CTRLS` ioctl.
pub fn s_ext_ctrls(
    fd: &impl AsRawFd,
    ctrl_class: u32,
    ctrls: &mut [ExtControl],
) -> Result<(), ExtCtrlError> {
    ext_ctrls(fd, Direction::Set, ctrl_class, ctrls)
}

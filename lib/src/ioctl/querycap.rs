//! `VIDIOC_QUERYCAP`, used to check that a node is an MFC instance before driving it.
use std::fmt;
use std::os::unix::io::AsRawFd;

use bitflags::bitflags;
use nix::errno::Errno;
use thiserror::Error;

use super::c_string;
use crate::bindings::{self, v4l2_capability};

bitflags! {
    /// Capability bits we care about.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const VIDEO_CAPTURE_MPLANE = bindings::V4L2_CAP_VIDEO_CAPTURE_MPLANE;
        const VIDEO_OUTPUT_MPLANE = bindings::V4L2_CAP_VIDEO_OUTPUT_MPLANE;
        const VIDEO_M2M_MPLANE = bindings::V4L2_CAP_VIDEO_M2M_MPLANE;
        const STREAMING = bindings::V4L2_CAP_STREAMING;
        const DEVICE_CAPS = bindings::V4L2_CAP_DEVICE_CAPS;
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#010x}", self.bits())
    }
}

#[derive(Debug)]
pub struct Capability {
    pub driver: String,
    pub card: String,
    capabilities: Capabilities,
    node_caps: Capabilities,
}

impl Capability {
    /// Capabilities of the opened node, falling back to the whole device's if the driver does
    /// not report per-node ones.
    pub fn device_caps(&self) -> Capabilities {
        if self.capabilities.contains(Capabilities::DEVICE_CAPS) {
            self.node_caps
        } else {
            self.capabilities - Capabilities::DEVICE_CAPS
        }
    }

    pub fn is_mplane_codec(&self) -> bool {
        let caps = self.device_caps();
        let both_queues = Capabilities::VIDEO_CAPTURE_MPLANE | Capabilities::VIDEO_OUTPUT_MPLANE;

        caps.contains(Capabilities::STREAMING)
            && (caps.contains(Capabilities::VIDEO_M2M_MPLANE) || caps.contains(both_queues))
    }
}

impl From<v4l2_capability> for Capability {
    fn from(qcap: v4l2_capability) -> Self {
        Capability {
            driver: c_string(&qcap.driver),
            card: c_string(&qcap.card),
            capabilities: Capabilities::from_bits_truncate(qcap.capabilities),
            node_caps: Capabilities::from_bits_truncate(qcap.device_caps),
        }
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_capability;
    nix::ioctl_read!(vidioc_querycap, b'V', 0, v4l2_capability);
}

#[derive(Debug, Error)]
#[error("VIDIOC_QUERYCAP failed: {0}")]
pub struct QueryCapError(#[from] pub Errno);

impl From<QueryCapError> for Errno {
    fn from(err: QueryCapError) -> Self {
        err.0
    }
}

pub fn querycap(fd: &impl AsRawFd) -> Result<Capability, QueryCapError> {
    let mut qcap = v4l2_capability::default();
    // SAFETY: `qcap` is a properly sized structure the driver fills.
    unsafe { ioctl::vidioc_querycap(fd.as_raw_fd(), &mut qcap) }?;

    Ok(qcap.into())
}

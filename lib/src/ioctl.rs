//! Thin wrappers around the V4L2 ioctls the MFC driver is driven with.
//!
//! Each wrapper only takes the inputs the caller is expected to provide, and returns an owned
//! Rust view of what the driver filled in. Errors are specific to each ioctl so that expected
//! outcomes (e.g. `EAGAIN` on `VIDIOC_DQBUF`) get their own variant. Every error type converts
//! back into the `Errno` it came from.

mod dqbuf;
mod g_crop;
mod g_ext_ctrls;
mod g_fmt;
mod mmap;
mod qbuf;
mod querybuf;
mod querycap;
mod reqbufs;
mod s_ctrl;
mod streamon;

pub use dqbuf::*;
pub use g_crop::*;
pub use g_ext_ctrls::*;
pub use g_fmt::*;
pub use mmap::*;
pub use qbuf::*;
pub use querybuf::*;
pub use querycap::*;
pub use reqbufs::*;
pub use s_ctrl::*;
pub use streamon::*;

use std::ffi::CStr;

use bitflags::bitflags;

use crate::bindings;
use crate::memory::MemoryType;
use crate::QueueType;

/// Decode a fixed-size, nul-padded C string field. The result is empty if `bytes` has no nul.
fn c_string(bytes: &[u8]) -> String {
    CStr::from_bytes_until_nul(bytes)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Plane array exchanged with the multiplanar buffer ioctls.
type V4l2BufferPlanes = [bindings::v4l2_plane; bindings::VIDEO_MAX_PLANES as usize];

/// Build a multiplanar `v4l2_buffer` whose first `num_planes` planes are stored in `planes`.
/// `planes` must outlive any ioctl the returned buffer is passed to.
fn mplane_buffer(
    queue: QueueType,
    memory: MemoryType,
    planes: &mut V4l2BufferPlanes,
    num_planes: usize,
) -> bindings::v4l2_buffer {
    let mut buf = bindings::v4l2_buffer {
        type_: queue as u32,
        memory: memory as u32,
        length: num_planes.min(planes.len()) as u32,
        ..Default::default()
    };
    buf.m.planes = planes.as_mut_ptr();
    buf
}

bitflags! {
    /// Subset of the `v4l2_buffer` flags the MFC driver reports or honors.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BufferFlags: u32 {
        const MAPPED = bindings::V4L2_BUF_FLAG_MAPPED;
        const QUEUED = bindings::V4L2_BUF_FLAG_QUEUED;
        const DONE = bindings::V4L2_BUF_FLAG_DONE;
        const ERROR = bindings::V4L2_BUF_FLAG_ERROR;
        const KEYFRAME = bindings::V4L2_BUF_FLAG_KEYFRAME;
        const PFRAME = bindings::V4L2_BUF_FLAG_PFRAME;
        const BFRAME = bindings::V4L2_BUF_FLAG_BFRAME;
        const LAST = bindings::V4L2_BUF_FLAG_LAST;
    }
}

#[cfg(test)]
mod tests {
    use super::c_string;

    #[test]
    fn c_string_fields() {
        assert_eq!(c_string(b"Exynos\0"), "Exynos");
        assert_eq!(c_string(b"s5p\0-mfc"), "s5p");
        assert_eq!(c_string(b"s5p\0-mfc\0"), "s5p");
        assert_eq!(c_string(b"\0mfc"), "");
        // Unterminated fields are not trusted.
        assert_eq!(c_string(b"s5p-mfc"), "");
    }
}

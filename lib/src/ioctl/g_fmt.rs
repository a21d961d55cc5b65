//! `VIDIOC_G_FMT` and `VIDIOC_S_FMT` on the multiplanar queues.
use std::os::unix::io::AsRawFd;

use nix::errno::Errno;
use thiserror::Error;

use crate::bindings::{self, v4l2_format, v4l2_pix_format_mplane};
use crate::{Format, PixelFormat, PlaneLayout, QueueType};

#[doc(hidden)]
mod ioctl {
    use crate::bindings::v4l2_format;
    nix::ioctl_readwrite!(vidioc_g_fmt, b'V', 4, v4l2_format);
    nix::ioctl_readwrite!(vidioc_s_fmt, b'V', 5, v4l2_format);
}

#[derive(Debug, Error)]
pub enum GFmtError {
    #[error("format has {0} planes")]
    TooManyPlanes(usize),
    #[error("queue type not supported")]
    InvalidBufferType,
    #[error("ioctl error: {0}")]
    IoctlError(Errno),
}

impl From<GFmtError> for Errno {
    fn from(err: GFmtError) -> Self {
        match err {
            GFmtError::TooManyPlanes(_) | GFmtError::InvalidBufferType => Errno::EINVAL,
            GFmtError::IoctlError(e) => e,
        }
    }
}

impl From<Errno> for GFmtError {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::EINVAL => GFmtError::InvalidBufferType,
            e => GFmtError::IoctlError(e),
        }
    }
}

fn to_v4l2(queue: QueueType, format: &Format) -> Result<v4l2_format, GFmtError> {
    let mut pix_mp = v4l2_pix_format_mplane {
        width: format.width,
        height: format.height,
        pixelformat: format.pixelformat.into(),
        num_planes: format.plane_fmt.len() as u8,
        ..Default::default()
    };
    if format.plane_fmt.len() > pix_mp.plane_fmt.len() {
        return Err(GFmtError::TooManyPlanes(format.plane_fmt.len()));
    }
    for (dst, src) in pix_mp.plane_fmt.iter_mut().zip(&format.plane_fmt) {
        dst.sizeimage = src.sizeimage;
        dst.bytesperline = src.bytesperline;
    }

    Ok(v4l2_format {
        type_: queue as u32,
        fmt: bindings::v4l2_format__bindgen_ty_1 { pix_mp },
    })
}

fn from_v4l2(fmt: &v4l2_format) -> Result<Format, GFmtError> {
    QueueType::n(fmt.type_).ok_or(GFmtError::InvalidBufferType)?;
    // SAFETY: both queue types we support use the `pix_mp` member.
    let pix_mp = unsafe { &fmt.fmt.pix_mp };
    let num_planes = pix_mp.num_planes as usize;
    let planes = pix_mp
        .plane_fmt
        .get(..num_planes)
        .ok_or(GFmtError::TooManyPlanes(num_planes))?;

    Ok(Format {
        width: pix_mp.width,
        height: pix_mp.height,
        pixelformat: PixelFormat::from(pix_mp.pixelformat),
        plane_fmt: planes
            .iter()
            .map(|p| PlaneLayout {
                sizeimage: p.sizeimage,
                bytesperline: p.bytesperline,
            })
            .collect(),
    })
}

pub fn g_fmt(fd: &impl AsRawFd, queue: QueueType) -> Result<Format, GFmtError> {
    let mut fmt = v4l2_format {
        type_: queue as u32,
        ..Default::default()
    };
    // SAFETY: `fmt` is a valid structure the driver fills.
    unsafe { ioctl::vidioc_g_fmt(fd.as_raw_fd(), &mut fmt) }?;

    from_v4l2(&fmt)
}

/// Set the format of `queue`. The driver may adjust it, so the format it settled on is returned.
pub fn s_fmt(fd: &impl AsRawFd, queue: QueueType, format: &Format) -> Result<Format, GFmtError> {
    let mut fmt = to_v4l2(queue, format)?;
    // SAFETY: `fmt` is a valid structure the driver updates in place.
    unsafe { ioctl::vidioc_s_fmt(fd.as_raw_fd(), &mut fmt) }?;

    from_v4l2(&fmt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nv12m_1080p() -> Format {
        Format {
            width: 1920,
            height: 1088,
            pixelformat: PixelFormat::from(b"NM12"),
            plane_fmt: vec![
                PlaneLayout {
                    sizeimage: 1920 * 1088,
                    bytesperline: 1920,
                },
                PlaneLayout {
                    sizeimage: 1920 * 1088 / 2,
                    bytesperline: 1920,
                },
            ],
        }
    }

    #[test]
    fn frame_format_conversion() {
        let format = nv12m_1080p();
        let fmt = to_v4l2(QueueType::VideoCaptureMplane, &format).unwrap();
        assert_eq!(
            fmt.type_,
            bindings::v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE
        );
        // SAFETY: we just built a multiplanar format.
        assert_eq!(unsafe { fmt.fmt.pix_mp.num_planes }, 2);
        assert_eq!(from_v4l2(&fmt).unwrap(), format);
    }

    #[test]
    fn rejected_formats() {
        let mut format = nv12m_1080p();
        format.plane_fmt.resize(bindings::VIDEO_MAX_PLANES as usize + 1, Default::default());
        assert!(matches!(
            to_v4l2(QueueType::VideoOutputMplane, &format),
            Err(GFmtError::TooManyPlanes(9))
        ));

        // Single-planar capture.
        let fmt = v4l2_format {
            type_: bindings::v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        assert!(matches!(
            from_v4l2(&fmt),
            Err(GFmtError::InvalidBufferType)
        ));
    }
}

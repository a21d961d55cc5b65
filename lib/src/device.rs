//! Access to the MFC V4L2 node.
//!
//! Every interaction with the driver goes through the [`MfcDevice`] trait, so the buffer pools and
//! codec contexts can be driven by something else than an actual device node.
pub mod poller;

#[cfg(test)]
pub(crate) mod mock;

use std::fs::File;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, RawFd};
use std::path::{Path, PathBuf};

use log::{debug, error};
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::stat::Mode;

use crate::error::{VideoError, VideoResult};
use crate::ioctl::{
    self, Capability, DqBufError, DqBuffer, ExtControl, ExtCtrlError, GCropError, GFmtError,
    MmapError, PlaneMapping, QBufError, QBuffer, QueryBufError, QueryBufPlane, QueryBuffer,
    ReqbufsError, SCtrlError, StreamOffError, StreamOnError,
};
use crate::memory::MemoryType;
use crate::{Format, QueueType, Rect};

/// The operations the MFC driver is driven with.
///
/// All methods take `&self`: a device is shared by the two buffer pools of a codec, which may be
/// used from different threads.
pub trait MfcDevice: Send + Sync {
    /// Allocate `count` buffers on `queue`, or free them if `count` is 0. Returns the number of
    /// buffers actually allocated.
    fn reqbufs(&self, queue: QueueType, memory: MemoryType, count: u32)
        -> Result<u32, ReqbufsError>;
    fn querybuf(
        &self,
        queue: QueueType,
        memory: MemoryType,
        index: u32,
    ) -> Result<QueryBuffer, QueryBufError>;
    /// Map a plane previously described by `querybuf`.
    fn map_plane(&self, plane: &QueryBufPlane) -> Result<PlaneMapping, MmapError>;
    fn qbuf(&self, queue: QueueType, buffer: &QBuffer) -> Result<(), QBufError>;
    fn dqbuf(
        &self,
        queue: QueueType,
        memory: MemoryType,
        num_planes: usize,
    ) -> Result<DqBuffer, DqBufError>;
    fn streamon(&self, queue: QueueType) -> Result<(), StreamOnError>;
    fn streamoff(&self, queue: QueueType) -> Result<(), StreamOffError>;
    fn s_ctrl(&self, id: u32, value: i32) -> Result<(), SCtrlError>;
    fn g_ctrl(&self, id: u32) -> Result<i32, SCtrlError>;
    fn s_ext_ctrls(&self, ctrl_class: u32, ctrls: &mut [ExtControl]) -> Result<(), ExtCtrlError>;
    fn g_ext_ctrls(&self, ctrl_class: u32, ctrls: &mut [ExtControl]) -> Result<(), ExtCtrlError>;
    fn s_fmt(&self, queue: QueueType, format: &Format) -> Result<Format, GFmtError>;
    fn g_fmt(&self, queue: QueueType) -> Result<Format, GFmtError>;
    fn g_crop(&self, queue: QueueType) -> Result<Rect, GCropError>;
    /// Wait up to `timeout_ms` for one of `events`. Returns the events that occurred, which is
    /// empty if the timeout expired.
    fn poll(&self, events: PollFlags, timeout_ms: i32) -> Result<PollFlags, Errno>;
}

/// Options for opening an MFC node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub path: PathBuf,
    /// Open the node with `O_NONBLOCK`, so dequeue returns immediately when no buffer is ready.
    pub non_blocking_dqbuf: bool,
    /// Period after which a wait on a queue polls again.
    pub poll_timeout_ms: i32,
}

impl DeviceConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        DeviceConfig {
            path: path.as_ref().to_path_buf(),
            non_blocking_dqbuf: false,
            poll_timeout_ms: -1,
        }
    }

    pub fn non_blocking_dqbuf(self) -> Self {
        DeviceConfig {
            non_blocking_dqbuf: true,
            ..self
        }
    }

    pub fn poll_timeout_ms(self, poll_timeout_ms: i32) -> Self {
        DeviceConfig {
            poll_timeout_ms,
            ..self
        }
    }

    /// Replace the path with the content of the `var` environment variable, if set.
    pub fn path_from_env(self, var: &str) -> Self {
        match std::env::var_os(var) {
            Some(path) if !path.is_empty() => {
                debug!("Using {:?} from {} as device node", path, var);
                DeviceConfig {
                    path: PathBuf::from(path),
                    ..self
                }
            }
            _ => self,
        }
    }
}

/// An opened MFC V4L2 node.
pub struct V4l2Device {
    pub capability: Capability,
    config: DeviceConfig,
    fd: File,
}

impl V4l2Device {
    /// Open the node described by `config` and check that it is a multi-planar codec.
    pub fn open(config: &DeviceConfig) -> VideoResult<Self> {
        let flags = OFlag::O_RDWR
            | OFlag::O_CLOEXEC
            | if config.non_blocking_dqbuf {
                OFlag::O_NONBLOCK
            } else {
                OFlag::empty()
            };

        let fd = open(&config.path, flags, Mode::empty()).map_err(|e| {
            error!("Cannot open {}: {}", config.path.display(), e);
            VideoError::Init(format!("cannot open {}: {}", config.path.display(), e))
        })?;
        // Safe because we are constructing a file from the fd we just opened.
        let fd = unsafe { File::from_raw_fd(fd) };

        let capability: Capability = ioctl::querycap(&fd)?;
        if !capability.is_mplane_codec() {
            return Err(VideoError::Init(format!(
                "{} ({}) is not a multi-planar codec: {}",
                config.path.display(),
                capability.card,
                capability.device_caps()
            )));
        }
        debug!(
            "Opened {} ({}, driver {})",
            config.path.display(),
            capability.card,
            capability.driver
        );

        Ok(V4l2Device {
            capability,
            config: config.clone(),
            fd,
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }
}

impl AsRawFd for V4l2Device {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for V4l2Device {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl MfcDevice for V4l2Device {
    fn reqbufs(
        &self,
        queue: QueueType,
        memory: MemoryType,
        count: u32,
    ) -> Result<u32, ReqbufsError> {
        ioctl::reqbufs(self, queue, memory, count)
    }

    fn querybuf(
        &self,
        queue: QueueType,
        memory: MemoryType,
        index: u32,
    ) -> Result<QueryBuffer, QueryBufError> {
        ioctl::querybuf(self, queue, memory, index)
    }

    fn map_plane(&self, plane: &QueryBufPlane) -> Result<PlaneMapping, MmapError> {
        ioctl::mmap(self, plane.mem_offset, plane.length)
    }

    fn qbuf(&self, queue: QueueType, buffer: &QBuffer) -> Result<(), QBufError> {
        ioctl::qbuf(self, queue, buffer)
    }

    fn dqbuf(
        &self,
        queue: QueueType,
        memory: MemoryType,
        num_planes: usize,
    ) -> Result<DqBuffer, DqBufError> {
        ioctl::dqbuf(self, queue, memory, num_planes)
    }

    fn streamon(&self, queue: QueueType) -> Result<(), StreamOnError> {
        ioctl::streamon(self, queue)
    }

    fn streamoff(&self, queue: QueueType) -> Result<(), StreamOffError> {
        ioctl::streamoff(self, queue)
    }

    fn s_ctrl(&self, id: u32, value: i32) -> Result<(), SCtrlError> {
        ioctl::s_ctrl(self, id, value).map(|_| ())
    }

    fn g_ctrl(&self, id: u32) -> Result<i32, SCtrlError> {
        ioctl::g_ctrl(self, id)
    }

    fn s_ext_ctrls(&self, ctrl_class: u32, ctrls: &mut [ExtControl]) -> Result<(), ExtCtrlError> {
        ioctl::s_ext_ctrls(self, ctrl_class, ctrls)
    }

    fn g_ext_ctrls(&self, ctrl_class: u32, ctrls: &mut [ExtControl]) -> Result<(), ExtCtrlError> {
        ioctl::g_ext_ctrls(self, ctrl_class, ctrls)
    }

    fn s_fmt(&self, queue: QueueType, format: &Format) -> Result<Format, GFmtError> {
        ioctl::s_fmt(self, queue, format)
    }

    fn g_fmt(&self, queue: QueueType) -> Result<Format, GFmtError> {
        ioctl::g_fmt(self, queue)
    }

    fn g_crop(&self, queue: QueueType) -> Result<Rect, GCropError> {
        ioctl::g_crop(self, queue)
    }

    fn poll(&self, events: PollFlags, timeout_ms: i32) -> Result<PollFlags, Errno> {
        // Negative timeouts below -1 are clamped to an infinite wait.
        let timeout = PollTimeout::try_from(timeout_ms).unwrap_or(PollTimeout::NONE);
        let mut poll_fd = [PollFd::new(self.fd.as_fd(), events)];

        match poll(&mut poll_fd, timeout)? {
            0 => Ok(PollFlags::empty()),
            _ => Ok(poll_fd[0].revents().unwrap_or(PollFlags::empty())),
        }
    }
}

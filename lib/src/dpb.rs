//! Release descriptors shared with the driver in dynamic DPB mode.
//!
//! When decoded picture buffers are owned by userspace, the driver may keep referencing a frame
//! after returning it, and only tells us later which frames it stopped referencing. It does so
//! through a table shared over a memory fd: one entry per CAPTURE buffer slot, filled by the
//! driver when that slot is dequeued and listing the dma-buf fds of the frames it released.
//!
//! Each entry is laid out in native byte order as a 32-bit slot index followed by
//! [`MAX_DPB_FD_ENTRIES`] triples of 32-bit fds (one per plane). A triple whose first fd is
//! negative terminates the list.
use std::ffi::CStr;
use std::os::unix::io::{AsFd, AsRawFd, OwnedFd, RawFd};

use log::error;
use nix::sys::stat::fstat;

use crate::error::{VideoError, VideoResult};
use crate::ioctl::{self, PlaneMapping};
use crate::memory::shared_memory;

/// Maximum number of buffers in a pool, and number of entries in the release table.
pub const VIDEO_BUFFER_MAX_NUM: usize = 32;
/// Number of fd triples in a release entry.
pub const MAX_DPB_FD_ENTRIES: usize = 32;
/// Number of planes described by a release triple.
pub const RELEASE_FD_PLANES: usize = 3;

const INT_SIZE: usize = std::mem::size_of::<i32>();
/// Size in bytes of one entry of the shared table.
pub const ENTRY_SIZE: usize = INT_SIZE * (1 + MAX_DPB_FD_ENTRIES * RELEASE_FD_PLANES);
/// Size in bytes of the shared table.
pub const TABLE_SIZE: usize = ENTRY_SIZE * VIDEO_BUFFER_MAX_NUM;

/// Decoded copy of one entry of the release table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseEntry {
    pub index: i32,
    pub fds: [[RawFd; RELEASE_FD_PLANES]; MAX_DPB_FD_ENTRIES],
}

impl Default for ReleaseEntry {
    fn default() -> Self {
        ReleaseEntry {
            index: -1,
            fds: [[-1; RELEASE_FD_PLANES]; MAX_DPB_FD_ENTRIES],
        }
    }
}

impl ReleaseEntry {
    /// Entry for slot `index` releasing the frames whose first plane is one of `fds`.
    pub fn new(index: i32, fds: &[RawFd]) -> Self {
        let mut entry = ReleaseEntry {
            index,
            ..Default::default()
        };
        for (triple, &fd) in entry.fds.iter_mut().zip(fds) {
            triple[0] = fd;
        }
        entry
    }

    /// First-plane fds of the released frames, up to the terminator.
    pub fn released_fds(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.fds
            .iter()
            .map(|triple| triple[0])
            .take_while(|&fd| fd > -1)
    }

    pub fn is_empty(&self) -> bool {
        self.released_fds().next().is_none()
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut words = bytes
            .chunks_exact(INT_SIZE)
            .map(|w| i32::from_ne_bytes([w[0], w[1], w[2], w[3]]));

        let mut entry = ReleaseEntry {
            index: words.next().unwrap_or(-1),
            ..Default::default()
        };
        for triple in entry.fds.iter_mut() {
            for fd in triple.iter_mut() {
                *fd = words.next().unwrap_or(-1);
            }
        }
        entry
    }

    fn write_to(&self, bytes: &mut [u8]) {
        let words = std::iter::once(self.index).chain(self.fds.iter().flatten().copied());
        for (chunk, word) in bytes.chunks_exact_mut(INT_SIZE).zip(words) {
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
    }
}

/// The release table, mapped in our address space.
pub struct ReleaseTable {
    mapping: PlaneMapping,
    fd: OwnedFd,
}

impl ReleaseTable {
    /// Allocate a new table, with every entry reset.
    pub fn new() -> VideoResult<Self> {
        let name = CStr::from_bytes_with_nul(b"mfc-dpb-release\0")
            .map_err(|_| VideoError::BadParam("invalid shared memory name"))?;
        let fd = shared_memory(name, TABLE_SIZE).map_err(|e| {
            error!("Cannot allocate DPB release table: {}", e);
            VideoError::Init(format!("cannot allocate DPB release table: {}", e))
        })?;

        Self::from_fd(fd)
    }

    /// Map an existing table of at least [`TABLE_SIZE`] bytes and reset all its entries.
    pub fn from_fd(fd: OwnedFd) -> VideoResult<Self> {
        // Touching a mapping past the end of the file would raise SIGBUS.
        let stat = fstat(fd.as_raw_fd())
            .map_err(|e| VideoError::Init(format!("cannot stat DPB release table: {}", e)))?;
        let size = i64::from(stat.st_size);
        if size < TABLE_SIZE as i64 {
            error!(
                "DPB release table is {} bytes, expected at least {}",
                size, TABLE_SIZE
            );
            return Err(VideoError::BadParam("DPB release table is too small"));
        }

        let mapping = ioctl::mmap(&fd, 0, TABLE_SIZE as u32)?;
        let mut table = ReleaseTable { mapping, fd };
        for index in 0..VIDEO_BUFFER_MAX_NUM {
            table.reset_entry(index);
        }

        Ok(table)
    }

    fn entry_bytes(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(ENTRY_SIZE)?;
        self.mapping.get(start..start + ENTRY_SIZE)
    }

    fn entry_bytes_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let start = index.checked_mul(ENTRY_SIZE)?;
        self.mapping.get_mut(start..start + ENTRY_SIZE)
    }

    /// Copy of the entry of slot `index`.
    pub fn entry(&self, index: usize) -> Option<ReleaseEntry> {
        self.entry_bytes(index).map(ReleaseEntry::from_bytes)
    }

    pub fn set_entry(&mut self, index: usize, entry: &ReleaseEntry) {
        if let Some(bytes) = self.entry_bytes_mut(index) {
            entry.write_to(bytes);
        }
    }

    /// Mark every fd of the entry of slot `index` as unused.
    pub fn reset_entry(&mut self, index: usize) {
        self.set_entry(index, &ReleaseEntry::default());
    }
}

impl AsRawFd for ReleaseTable {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for ReleaseTable {
    fn as_fd(&self) -> std::os::unix::io::BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

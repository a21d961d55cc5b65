//! Abstracts the different kinds of backing memory (`MMAP`, `USERPTR`, `DMABUF`) a plane of an
//! MFC buffer can use.
//!
//! When a pool owns its memory, each plane is a mapping of the device's own buffer (MMAP). When
//! memory is supplied by a client, a plane is described either by a user pointer or by a dma-buf
//! file descriptor, optionally along with the address the client mapped it at. The address is
//! what clients use to designate a buffer, so it serves as the identity key of the plane.
use std::fmt::{self, Debug};
use std::fs::File;
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};

use enumn::N;
use nix::errno::Errno;
use nix::libc;

use crate::bindings;
use crate::ioctl::PlaneMapping;

/// All the supported V4L2 memory types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, N)]
#[repr(u32)]
pub enum MemoryType {
    #[default]
    Mmap = bindings::v4l2_memory_V4L2_MEMORY_MMAP,
    UserPtr = bindings::v4l2_memory_V4L2_MEMORY_USERPTR,
    DmaBuf = bindings::v4l2_memory_V4L2_MEMORY_DMABUF,
}

/// Backing memory of a single plane.
#[derive(Default)]
pub enum PlaneMemory {
    /// Nothing attached yet.
    #[default]
    Empty,
    /// Device memory mapped into our address space. Unmapped when dropped.
    Mapped(PlaneMapping),
    /// A dma-buf. `addr` is the address the client mapped it at, if any.
    DmaBuf { fd: RawFd, addr: Option<usize> },
    /// Client memory passed by address.
    UserPtr(usize),
}

impl PlaneMemory {
    /// Build the memory of a client-supplied plane according to the memory type in use.
    pub fn imported(memory: MemoryType, addr: Option<usize>, fd: Option<RawFd>) -> Self {
        match (memory, fd) {
            (MemoryType::DmaBuf, Some(fd)) => PlaneMemory::DmaBuf { fd, addr },
            (_, _) => match addr {
                Some(addr) => PlaneMemory::UserPtr(addr),
                None => PlaneMemory::Empty,
            },
        }
    }

    /// Address this plane is visible at in our address space.
    pub fn address(&self) -> Option<usize> {
        match self {
            PlaneMemory::Empty => None,
            PlaneMemory::Mapped(mapping) => Some(mapping.as_ptr() as usize),
            PlaneMemory::DmaBuf { addr, .. } => *addr,
            PlaneMemory::UserPtr(addr) => Some(*addr),
        }
    }

    /// dma-buf file descriptor backing this plane, if any.
    pub fn fd(&self) -> Option<RawFd> {
        match self {
            PlaneMemory::DmaBuf { fd, .. } => Some(*fd),
            _ => None,
        }
    }

    /// Value used to look a buffer up by its first plane: the address if there is one, otherwise
    /// the dma-buf fd.
    pub fn key(&self) -> Option<PlaneKey> {
        match (self.address(), self.fd()) {
            (Some(addr), _) => Some(PlaneKey::Addr(addr)),
            (None, Some(fd)) => Some(PlaneKey::Fd(fd)),
            (None, None) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, PlaneMemory::Empty)
    }
}

impl Debug for PlaneMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaneMemory::Empty => f.write_str("Empty"),
            PlaneMemory::Mapped(mapping) => f
                .debug_struct("Mapped")
                .field("addr", &(mapping.as_ptr() as usize))
                .field("size", &mapping.size())
                .finish(),
            PlaneMemory::DmaBuf { fd, addr } => f
                .debug_struct("DmaBuf")
                .field("fd", fd)
                .field("addr", addr)
                .finish(),
            PlaneMemory::UserPtr(addr) => f.debug_tuple("UserPtr").field(addr).finish(),
        }
    }
}

/// Identity of a buffer as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneKey {
    Addr(usize),
    Fd(RawFd),
}

/// Description of a client-side plane, as passed to enqueue and register operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaneSource {
    /// Address of the plane in the client's address space.
    pub addr: Option<usize>,
    /// dma-buf backing the plane.
    pub fd: Option<RawFd>,
    /// Number of bytes of valid data.
    pub data_size: u32,
    /// Size of the memory backing the plane.
    pub alloc_size: u32,
}

impl PlaneSource {
    /// Plane known by its address only.
    pub fn from_addr(addr: usize, data_size: u32) -> Self {
        Self {
            addr: Some(addr),
            data_size,
            ..Default::default()
        }
    }

    /// Plane backed by a dma-buf.
    pub fn from_dmabuf(fd: RawFd, addr: Option<usize>, data_size: u32, alloc_size: u32) -> Self {
        Self {
            addr,
            fd: Some(fd),
            data_size,
            alloc_size,
        }
    }

    /// Key used to look up the buffer this plane belongs to.
    pub fn key(&self) -> Option<PlaneKey> {
        match (self.addr, self.fd) {
            (Some(addr), _) => Some(PlaneKey::Addr(addr)),
            (None, Some(fd)) => Some(PlaneKey::Fd(fd)),
            (None, None) => None,
        }
    }
}

/// Create an anonymous shared memory file of `len` bytes, suitable for mapping and for passing to
/// another process or to the driver.
pub fn shared_memory(name: &std::ffi::CStr, len: usize) -> Result<OwnedFd, Errno> {
    // Safe because `name` is a valid nul-terminated string.
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(Errno::last());
    }
    // Safe because we just created this fd and nothing else owns it.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let file = File::from(fd);
    file.set_len(len as u64)
        .map_err(|e| Errno::from_raw(e.raw_os_error().unwrap_or(libc::EIO)))?;

    Ok(OwnedFd::from(file))
}

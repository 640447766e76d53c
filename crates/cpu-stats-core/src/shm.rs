//! Named POSIX shared memory.
//!
//! Thin wrapper over `shm_open`/`mmap`/`munmap`/`shm_unlink`:
//! - [`SharedMapping::create_exclusive`] fails if the name exists, which is
//!   what keeps a second writer from starting,
//! - [`SharedMapping::open_read_only`] never creates anything,
//! - dropping a mapping only unmaps it; removing the name is [`unlink`].

use std::ffi::CString;
use std::fs::{File, Permissions};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::PermissionsExt;
use std::ptr::{self, NonNull};

use crate::error::SegmentError;

/// Mode of created segments: writer read/write, readers read-only.
pub const SEGMENT_MODE: u32 = 0o644;

fn c_name(name: &str) -> Result<CString, SegmentError> {
    CString::new(name).map_err(|_| {
        SegmentError::os(
            name,
            "name",
            io::Error::new(io::ErrorKind::InvalidInput, "interior NUL byte"),
        )
    })
}

fn shm_open(name: &CString, flags: libc::c_int, mode: u32) -> io::Result<File> {
    // SAFETY: `name` is a valid NUL-terminated string that outlives the call.
    let fd = unsafe { libc::shm_open(name.as_ptr(), flags, mode as libc::mode_t) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` was just returned by shm_open and nothing else owns it.
    Ok(File::from(unsafe { OwnedFd::from_raw_fd(fd) }))
}

fn map(file: &File, len: usize, prot: libc::c_int) -> io::Result<NonNull<u8>> {
    // SAFETY: a fresh shared mapping of an open descriptor; the kernel picks
    // the address, so no existing Rust object is aliased.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            prot,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(addr.cast::<u8>()).ok_or_else(|| io::Error::other("mmap returned null"))
}

/// Remove a segment name. Existing mappings stay valid until unmapped.
pub fn unlink(name: &str) -> io::Result<()> {
    let cname = CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interior NUL byte"))?;
    // SAFETY: `cname` is a valid NUL-terminated string.
    if unsafe { libc::shm_unlink(cname.as_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// A mapped shared-memory object, unmapped on drop.
#[derive(Debug)]
pub struct SharedMapping {
    ptr: NonNull<u8>,
    len: usize,
    writable: bool,
}

// SAFETY: the mapping is plain process memory; synchronization of its
// contents is left to the record type placed on top of it.
unsafe impl Send for SharedMapping {}

impl SharedMapping {
    /// Create `name` with `len` zeroed bytes and map it read/write.
    ///
    /// Fails with [`SegmentError::AlreadyRunning`] if the name exists; the
    /// existing object is not touched. If anything after the create step
    /// fails, the name is removed again.
    pub fn create_exclusive(name: &str, len: usize) -> Result<Self, SegmentError> {
        let cname = c_name(name)?;
        let file = shm_open(
            &cname,
            libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            SEGMENT_MODE,
        )
        .map_err(|e| match e.raw_os_error() {
            Some(libc::EEXIST) => SegmentError::AlreadyRunning {
                name: name.to_string(),
            },
            _ => SegmentError::os(name, "create", e),
        })?;

        let setup = || -> Result<NonNull<u8>, SegmentError> {
            // The process umask may have stripped the read bits at create time.
            file.set_permissions(Permissions::from_mode(SEGMENT_MODE))
                .map_err(|e| SegmentError::os(name, "chmod", e))?;
            file.set_len(len as u64)
                .map_err(|e| SegmentError::os(name, "resize", e))?;
            map(&file, len, libc::PROT_READ | libc::PROT_WRITE)
                .map_err(|e| SegmentError::os(name, "map", e))
        };

        match setup() {
            Ok(ptr) => Ok(Self {
                ptr,
                len,
                writable: true,
            }),
            Err(e) => {
                let _ = unlink(name);
                Err(e)
            }
        }
    }

    /// Map an existing `name` read-only.
    ///
    /// Fails with [`SegmentError::ProducerAbsent`] if it does not exist and
    /// with [`SegmentError::LayoutMismatch`] if its size is not `len`.
    pub fn open_read_only(name: &str, len: usize) -> Result<Self, SegmentError> {
        let cname = c_name(name)?;
        let file = shm_open(&cname, libc::O_RDONLY, 0).map_err(|e| match e.raw_os_error() {
            Some(libc::ENOENT) => SegmentError::ProducerAbsent {
                name: name.to_string(),
            },
            _ => SegmentError::os(name, "open", e),
        })?;

        let found = file
            .metadata()
            .map_err(|e| SegmentError::os(name, "stat", e))?
            .len();
        if found != len as u64 {
            return Err(SegmentError::LayoutMismatch {
                name: name.to_string(),
                expected: len,
                found,
            });
        }

        let ptr = map(&file, len, libc::PROT_READ).map_err(|e| SegmentError::os(name, "map", e))?;
        Ok(Self {
            ptr,
            len,
            writable: false,
        })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl Drop for SharedMapping {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe a mapping created by `map` and not yet
        // unmapped; no references into it outlive `self`.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

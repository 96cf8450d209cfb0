use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::ptr;

/// Executable JIT code arena backed by an anonymous `mmap`.
///
/// Holds concatenated host-code blocks written by the code generator.
/// Append-only for the process lifetime: nothing ever reclaims arena
/// space, and a block written for a given offset is never overwritten.
/// Mapped read-write-execute for the process lifetime, matching the
/// single-threaded, no-W^X-split default this crate targets (see
/// DESIGN.md for the dual-mapping alternative).
pub struct CodeArena {
    ptr: *mut u8,
    size: usize,
    offset: usize,
    /// Kept open for the process lifetime as a placeholder for a
    /// future file-backed tier; never mapped. See DESIGN.md.
    _backing: std::fs::File,
}

// SAFETY: CodeArena owns its mmap'd memory exclusively and the
// engine drives it from a single thread of control.
unsafe impl Send for CodeArena {}

impl CodeArena {
    /// Create and truncate the backing file to `size` bytes, then map
    /// an anonymous RWX region of the same size.
    pub fn new(backing_path: &Path, size: usize) -> io::Result<Self> {
        let backing = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(backing_path)?;
        backing.set_len(size as u64)?;

        // SAFETY: MAP_ANONYMOUS with no file descriptor; fd/offset
        // arguments are ignored by the kernel in that mode.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            offset: 0,
            _backing: backing,
        })
    }

    /// Current bump-allocator write position.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total arena capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Host pointer to a previously written offset.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *const u8 {
        assert!(offset <= self.size, "arena offset out of range");
        // SAFETY: offset <= size, and the region is mapped for the
        // lifetime of `self`.
        unsafe { self.ptr.add(offset) }
    }

    /// Page-align the write position, copy `code` into the arena, and
    /// flush the instruction cache over the written range.
    ///
    /// Returns the byte offset the block now starts at.
    ///
    /// # Panics
    /// Panics if the page-aligned write would overrun the arena.
    /// Arena exhaustion has no defined recovery: the caller is
    /// expected to size the arena so this never triggers.
    pub fn append(&mut self, code: &[u8]) -> usize {
        let start = align_up(self.offset, page_size());
        assert!(
            start + code.len() <= self.size,
            "code arena exhausted: {} + {} > {}",
            start,
            code.len(),
            self.size
        );

        // SAFETY: start + code.len() <= self.size, just checked.
        unsafe {
            ptr::copy_nonoverlapping(code.as_ptr(), self.ptr.add(start), code.len());
        }
        self.offset = start + code.len();

        // SAFETY: [start, start + code.len()) was just written and
        // lies within the mapped region.
        unsafe { flush_icache(self.ptr.add(start), code.len()) };

        start
    }
}

impl Drop for CodeArena {
    fn drop(&mut self) {
        // SAFETY: ptr/size describe the mapping created in `new`.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Make freshly written code visible to the instruction fetch unit.
///
/// # Safety
/// `addr` must point to `len` writable, mapped bytes that were just
/// written by the caller.
#[cfg(target_arch = "aarch64")]
unsafe fn flush_icache(addr: *const u8, len: usize) {
    let start = addr as usize;
    let end = start + len;
    let mut line = start & !63;
    while line < end {
        std::arch::asm!("dc cvau, {0}", in(reg) line);
        line += 64;
    }
    std::arch::asm!("dsb ish");
    line = start & !63;
    while line < end {
        std::arch::asm!("ic ivau, {0}", in(reg) line);
        line += 64;
    }
    std::arch::asm!("dsb ish", "isb");
}

/// x86-64 has a coherent instruction cache for code written through
/// the same virtual mapping it is later fetched from, so no explicit
/// flush is required; a fence keeps the store ordered before any
/// later call into the freshly written range.
#[cfg(not(target_arch = "aarch64"))]
unsafe fn flush_icache(_addr: *const u8, _len: usize) {
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}

use std::io;
use std::ptr;

/// Default code buffer size: 32 MiB.
pub const DEFAULT_CODE_BUF_SIZE: usize = 32 * 1024 * 1024;

/// Host code alignment applied after every finalized block.
pub const BLOCK_ALIGNMENT: usize = 16;

/// Executable region that compiled blocks are appended to.
///
/// The mapping is readable, writable and executable for its whole
/// lifetime: blocks are appended while earlier blocks keep running.
/// Writes past the end are dropped and latch [`CodeBuffer::overflowed`];
/// the block compiler checks the flag once per block and rewinds.
pub struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    offset: usize,
    overflowed: bool,
}

// SAFETY: CodeBuffer owns its mapping exclusively.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    /// Map a new code buffer of the given size (rounded up to page size).
    pub fn new(size: usize) -> io::Result<Self> {
        let page_size = page_size();
        let size = (size.max(1) + page_size - 1) & !(page_size - 1);
        let ptr = map_executable(size)?;
        Ok(Self {
            ptr,
            size,
            offset: 0,
            overflowed: false,
        })
    }

    /// Current write offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Remaining writable bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.offset
    }

    /// Whether an emit has been dropped since the last [`clear_overflow`].
    ///
    /// [`clear_overflow`]: CodeBuffer::clear_overflow
    #[inline]
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    #[inline]
    pub fn clear_overflow(&mut self) {
        self.overflowed = false;
    }

    #[inline]
    pub fn base_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Pointer at a given offset.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *const u8 {
        assert!(offset <= self.size);
        // SAFETY: offset is within the mapping.
        unsafe { self.ptr.add(offset) as *const u8 }
    }

    /// Set the write offset (e.g. to rewind a failed block).
    #[inline]
    pub fn set_offset(&mut self, offset: usize) {
        assert!(offset <= self.size);
        self.offset = offset;
    }

    /// Drop every block: rewind to the start and clear the overflow latch.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.overflowed = false;
    }

    /// Append `bytes`, or drop them all and latch the overflow flag.
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        if self.offset + bytes.len() > self.size {
            self.overflowed = true;
            return;
        }
        // SAFETY: the range was bounds-checked against the mapping above.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(self.offset), bytes.len());
        }
        self.offset += bytes.len();
    }

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        self.emit_bytes(&[val]);
    }

    #[inline]
    pub fn emit_u16(&mut self, val: u16) {
        self.emit_bytes(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        self.emit_bytes(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        self.emit_bytes(&val.to_le_bytes());
    }

    /// Pad with `fill` up to the next multiple of `align`.
    pub fn align_to(&mut self, align: usize, fill: u8) {
        debug_assert!(align.is_power_of_two());
        while self.offset % align != 0 && !self.overflowed {
            self.emit_u8(fill);
        }
    }

    /// Overwrite an already emitted rel32 or imm32. Offsets past the
    /// write position belong to dropped emits and are ignored.
    pub fn patch_u32(&mut self, offset: usize, val: u32) {
        if offset + 4 <= self.offset {
            // SAFETY: below the write offset, so inside the mapping.
            unsafe {
                ptr::copy_nonoverlapping(val.to_le_bytes().as_ptr(), self.ptr.add(offset), 4);
            }
        }
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.as_slice()[offset..offset + 4]);
        u32::from_le_bytes(word)
    }

    /// Everything emitted so far.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr..ptr+offset lies in the mapping and has been written.
        unsafe { std::slice::from_raw_parts(self.ptr, self.offset) }
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unmap(self.ptr, self.size);
        }
    }
}

#[cfg(unix)]
fn map_executable(size: usize) -> io::Result<*mut u8> {
    // SAFETY: anonymous private mapping, no file backing.
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
    Ok(ptr as *mut u8)
}

#[cfg(unix)]
fn unmap(ptr: *mut u8, size: usize) {
    unsafe {
        libc::munmap(ptr as *mut libc::c_void, size);
    }
}

/// Host page size; buffer sizes are rounded up to a multiple of it.
#[cfg(unix)]
pub fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(windows)]
fn map_executable(size: usize) -> io::Result<*mut u8> {
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
    };

    // SAFETY: fresh reservation, no aliasing.
    let ptr = unsafe {
        VirtualAlloc(
            ptr::null(),
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_EXECUTE_READWRITE,
        )
    };
    if ptr.is_null() {
        return Err(io::Error::last_os_error());
    }
    Ok(ptr as *mut u8)
}

#[cfg(windows)]
fn unmap(ptr: *mut u8, _size: usize) {
    use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};

    // SAFETY: ptr is the base returned by VirtualAlloc.
    unsafe {
        VirtualFree(ptr.cast(), 0, MEM_RELEASE);
    }
}

#[cfg(windows)]
pub fn page_size() -> usize {
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    // SAFETY: SYSTEM_INFO is plain data and GetSystemInfo fills all of it.
    let info = unsafe {
        let mut info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut info);
        info
    };
    info.dwPageSize as usize
}

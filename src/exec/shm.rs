/// Anonymous shared mapping that carries the output grid out of a forked child
///
/// The mapping is created before fork, so parent and child see the same pages.
/// The child writes through the pointer handed to the UDF; the parent copies
/// the whole region back into the caller's buffer after joining the child.
use crate::config::types::{Result, UdfError};
use std::ptr::NonNull;

pub struct SharedMemoryChannel {
    ptr: NonNull<u8>,
    len: usize,
    mapped_len: usize,
}

impl SharedMemoryChannel {
    /// Map `len` bytes of zeroed shared memory
    pub fn new(len: usize) -> Result<Self> {
        // mmap rejects zero-length mappings; scalar/empty grids still get one page.
        let mapped_len = len.max(1);

        // SAFETY: anonymous mapping with no fixed address and no fd; the result is
        // checked against MAP_FAILED before use.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapped_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(UdfError::Process(format!(
                "mmap of {} shared bytes failed: {}",
                mapped_len,
                std::io::Error::last_os_error()
            )));
        }

        let ptr = NonNull::new(addr as *mut u8)
            .ok_or_else(|| UdfError::Process("mmap returned a null mapping".to_string()))?;
        Ok(Self {
            ptr,
            len,
            mapped_len,
        })
    }

    /// Map a channel holding a copy of `initial`
    pub fn with_contents(initial: &[u8]) -> Result<Self> {
        let mut channel = Self::new(initial.len())?;
        channel.as_mut_slice().copy_from_slice(initial);
        Ok(channel)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer handed to the UDF as its output buffer
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is at least `len` bytes and lives as long as self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; &mut self excludes other views in this process.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Copy the channel into `dest`. Only meaningful once the writer has exited.
    pub fn copy_back(&self, dest: &mut [u8]) -> Result<()> {
        if dest.len() != self.len {
            return Err(UdfError::Dataset(format!(
                "output buffer is {} bytes but the channel holds {}",
                dest.len(),
                self.len
            )));
        }
        dest.copy_from_slice(self.as_slice());
        Ok(())
    }
}

impl Drop for SharedMemoryChannel {
    fn drop(&mut self) {
        // SAFETY: ptr/mapped_len are exactly what mmap returned and nothing else unmaps them.
        let rc = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.mapped_len) };
        if rc != 0 {
            log::warn!(
                "munmap of shared channel failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

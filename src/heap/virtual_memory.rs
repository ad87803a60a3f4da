//! Raw OS page-frame reservation (§4.1). This is the only module that
//! calls into `mmap`/`munmap` directly; everything else works in terms of
//! page-aligned `usize` base addresses.

use crate::error::{GcError, Result};
use crate::heap::page::PAGE_SIZE;

/// Map `size` bytes (rounded up to a page multiple) of fresh, zero-filled,
/// readable/writable memory from the OS. Returns the page-aligned base
/// address.
pub fn map_pages(size: usize) -> Result<usize> {
    let size = crate::heap::page::align_up_to_page(size.max(PAGE_SIZE));
    unsafe { os::map(size) }
}

/// Release `size` bytes previously returned by [`map_pages`] back to the
/// OS. `addr` must be the exact base address `map_pages` returned and
/// `size` the exact (aligned) size requested.
pub fn unmap_pages(addr: usize, size: usize) -> Result<()> {
    let size = crate::heap::page::align_up_to_page(size.max(PAGE_SIZE));
    unsafe { os::unmap(addr, size) }
}

#[cfg(unix)]
mod os {
    use super::*;

    pub unsafe fn map(size: usize) -> Result<usize> {
        let ptr = libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if ptr == libc::MAP_FAILED {
            return Err(GcError::Mmap(std::io::Error::last_os_error().to_string()));
        }
        Ok(ptr as usize)
    }

    pub unsafe fn unmap(addr: usize, size: usize) -> Result<()> {
        if libc::munmap(addr as *mut libc::c_void, size) != 0 {
            return Err(GcError::Munmap(std::io::Error::last_os_error().to_string()));
        }
        Ok(())
    }
}

#[cfg(windows)]
mod os {
    use super::*;
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
    };

    pub unsafe fn map(size: usize) -> Result<usize> {
        let ptr = VirtualAlloc(
            std::ptr::null_mut(),
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        );
        if ptr.is_null() {
            return Err(GcError::Mmap("VirtualAlloc failed".to_string()));
        }
        Ok(ptr as usize)
    }

    pub unsafe fn unmap(addr: usize, _size: usize) -> Result<()> {
        if VirtualFree(addr as *mut _, 0, MEM_RELEASE) == 0 {
            return Err(GcError::Munmap("VirtualFree failed".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_and_unmap_round_trips() {
        let addr = map_pages(PAGE_SIZE).unwrap();
        assert_eq!(addr % PAGE_SIZE, 0);
        unsafe {
            // Fresh pages must be zero-filled.
            assert_eq!(*(addr as *const u64), 0);
            *(addr as *mut u64) = 0xdead_beef;
            assert_eq!(*(addr as *const u64), 0xdead_beef);
        }
        unmap_pages(addr, PAGE_SIZE).unwrap();
    }

    #[test]
    fn map_rounds_up_to_page_multiple() {
        let addr = map_pages(PAGE_SIZE + 1).unwrap();
        unmap_pages(addr, PAGE_SIZE + 1).unwrap();
        let _ = addr;
    }
}

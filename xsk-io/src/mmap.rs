//! # UMEM Backing Memory
//!
//! ## Purpose
//!
//! This module allocates the anonymous memory region backing a socket's
//! UMEM. The kernel copies received packets into this region and reads
//! outgoing packets from it, so the mapping must stay alive for as long as
//! the socket exists.
//!
//! ## How it works
//!
//! `UmemMap` owns one `mmap` allocation and unmaps it on drop. Backing the
//! UMEM with 2 MiB huge pages cuts TLB pressure on the packet path, but
//! whether any are reserved is the administrator's call, not ours: by
//! default the allocation simply asks for `MAP_HUGETLB` first and retries
//! with normal pages when the kernel refuses. The refusal is the probe;
//! there is nothing to parse. A caller that knows better can force either
//! page size.

use std::{io, ptr};

/// Huge page size requested via `MAP_HUGE_2MB`.
const HUGE_PAGE_SIZE: usize = 2 << 20;

/// An owned anonymous memory mapping used as UMEM backing store.
pub struct UmemMap {
    addr: *mut libc::c_void,
    len: usize,
}

// The mapping is plain anonymous memory; nothing about it is tied to the
// creating thread.
unsafe impl Send for UmemMap {}
unsafe impl Sync for UmemMap {}

impl UmemMap {
    /// Maps at least `size` bytes of anonymous memory.
    ///
    /// `huge_page` forces 2 MiB huge pages on (`Some(true)`, failing when
    /// none are reserved) or off (`Some(false)`); `None` tries huge pages
    /// and falls back to the normal page size.
    pub fn alloc(size: usize, huge_page: Option<bool>) -> io::Result<Self> {
        match huge_page {
            Some(huge) => Self::map_pages(size, huge),
            None => Self::map_pages(size, true).or_else(|_| Self::map_pages(size, false)),
        }
    }

    fn map_pages(size: usize, huge: bool) -> io::Result<Self> {
        let page_size = if huge {
            HUGE_PAGE_SIZE
        } else {
            unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
        };
        let len = size.next_multiple_of(page_size);
        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        if huge {
            flags |= libc::MAP_HUGETLB | libc::MAP_HUGE_2MB;
        }
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(UmemMap { addr, len })
    }

    pub fn as_void_ptr(&self) -> *mut libc::c_void {
        self.addr
    }

    pub fn as_u8_ptr(&self) -> *mut u8 {
        self.addr as *mut u8
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for UmemMap {
    fn drop(&mut self) {
        // The constructor never hands out an invalid mapping, so this can
        // only fail if someone unmapped the region behind our back.
        if unsafe { libc::munmap(self.addr, self.len) } != 0 {
            log::error!(
                "failed to release {} bytes of UMEM: {}",
                self.len,
                io::Error::last_os_error()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_whole_pages() {
        let map = UmemMap::alloc(100, Some(false)).unwrap();
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
        assert_eq!(map.len(), page);
        assert!(!map.as_void_ptr().is_null());
    }

    #[test]
    fn default_allocation_succeeds_without_reserved_hugepages() {
        // With no forced page size the huge-page attempt may be refused;
        // the fallback has to kick in transparently.
        let map = UmemMap::alloc(1 << 20, None).unwrap();
        assert!(map.len() >= 1 << 20);
    }

    #[test]
    fn writable_across_the_whole_length() {
        let map = UmemMap::alloc(8192, Some(false)).unwrap();
        unsafe {
            let bytes = std::slice::from_raw_parts_mut(map.as_u8_ptr(), map.len());
            bytes[0] = 0xAB;
            bytes[map.len() - 1] = 0xCD;
            assert_eq!(bytes[0], 0xAB);
        }
    }
}

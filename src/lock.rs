use crate::{MemorySource, Segfit, DWORD};

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

/// Segfit lock: wrapper struct containing a mutex-locked [`Segfit`].
///
/// The core allocator is single-threaded; this wrapper discharges the
/// serialization requirement and, in doing so, can offer [`GlobalAlloc`].
///
/// # Example
/// ```rust
/// # use segfit::*;
/// static mut ARENA: [u8; 4096] = [0; 4096];
///
/// let segfit = Segfit::new(unsafe {
///     ArenaSource::new(Extent::from_array(std::ptr::addr_of!(ARENA) as *mut [u8; 4096]))
/// });
/// let lock = segfit.lock::<spin::Mutex<()>>();
/// ```
#[derive(Debug)]
pub struct SegfitLock<R: lock_api::RawMutex, M: MemorySource>(
    pub lock_api::Mutex<R, Segfit<M>>,
);

impl<R: lock_api::RawMutex, M: MemorySource> SegfitLock<R, M> {
    /// Lock the mutex and access the inner `Segfit`.
    pub fn segfit(&self) -> lock_api::MutexGuard<'_, R, Segfit<M>> {
        self.0.lock()
    }
}

unsafe impl<R: lock_api::RawMutex, M: MemorySource> GlobalAlloc for SegfitLock<R, M> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > DWORD {
            return ptr::null_mut();
        }

        let mut segfit = self.0.lock();

        // allocations may occur prior to an explicit init, e.g. before main
        if !segfit.is_initialized() && segfit.init().is_err() {
            return ptr::null_mut();
        }

        segfit.malloc(layout.size()).map_or(ptr::null_mut(), |nn| nn.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // block sizes live in the boundary tags; the layout is not needed
        self.0.lock().free(NonNull::new_unchecked(ptr));
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > DWORD {
            return ptr::null_mut();
        }

        self.0
            .lock()
            .realloc(NonNull::new_unchecked(ptr), new_size)
            .map_or(ptr::null_mut(), |nn| nn.as_ptr())
    }
}

/// A no-op `RawMutex` for environments where a [`SegfitLock`] can never be
/// reached from two threads at once.
///
/// # Safety
/// Nothing here synchronizes anything. Should two threads reach the inner
/// [`Segfit`] at the same time, its list heads and boundary tags are torn
/// mid-update and behaviour is undefined, with no unsafe code on the
/// caller's side. Only use this where exclusivity holds by construction,
/// e.g. a single-threaded embedded target.
pub struct AssumeUnlockable;

// SAFETY: none provided; exclusivity is the caller's promise
unsafe impl lock_api::RawMutex for AssumeUnlockable {
    const INIT: AssumeUnlockable = AssumeUnlockable;

    // nothing is thread-bound, so guards may move freely
    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {}

    fn try_lock(&self) -> bool {
        true
    }

    unsafe fn unlock(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArenaSource, Extent};

    #[test]
    fn global_alloc_roundtrip() {
        let arena = Box::leak(vec![0u8; 1 << 16].into_boxed_slice());
        let lock = Segfit::new(unsafe { ArenaSource::new(Extent::from(&mut arena[..])) })
            .lock::<spin::Mutex<()>>();

        unsafe {
            // initializes lazily on the first allocation
            let layout = Layout::from_size_align(100, 8).unwrap();
            let p = lock.alloc(layout);
            assert!(!p.is_null());
            p.write_bytes(0x5a, layout.size());

            let p = lock.realloc(p, layout, 300);
            assert!(!p.is_null());
            for i in 0..layout.size() {
                assert_eq!(p.add(i).read(), 0x5a);
            }

            lock.dealloc(p, Layout::from_size_align(300, 8).unwrap());
        }
    }

    #[test]
    fn unsupported_alignment_yields_null() {
        let arena = Box::leak(vec![0u8; 1 << 16].into_boxed_slice());
        let lock = Segfit::new(unsafe { ArenaSource::new(Extent::from(&mut arena[..])) })
            .lock::<spin::Mutex<()>>();

        unsafe {
            let p = lock.alloc(Layout::from_size_align(64, 64).unwrap());
            assert!(p.is_null());
        }
    }
}

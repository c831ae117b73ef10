#![no_main]

use std::ptr::NonNull;

use segfit::{ArenaSource, Extent, Segfit};

use libfuzzer_sys::arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

const ARENA_SIZE: usize = 1 << 20;

#[derive(Arbitrary, Debug)]
enum Actions {
    /// Allocate memory with the given size
    Alloc { size: u16 },
    /// Free the ith allocation
    Free { index: u8 },
    /// Reallocate the ith allocation
    Realloc { index: u8, new_size: u16 },
    /// Reset the memory source and start over
    Reset,
}
use Actions::*;

fuzz_target!(|actions: Vec<Actions>| {
    let arena = Box::leak(vec![0u8; ARENA_SIZE].into_boxed_slice());
    let mut segfit = Segfit::new(unsafe { ArenaSource::new(Extent::from(&mut arena[..])) });
    unsafe { segfit.init().unwrap() };

    let mut allocations: Vec<(NonNull<u8>, usize, u8)> = vec![];
    let mut stamp: u8 = 0;

    for action in actions {
        match action {
            Alloc { size } => {
                if size == 0 {
                    continue;
                }

                if let Ok(ptr) = unsafe { segfit.malloc(size as usize) } {
                    assert!(ptr.as_ptr() as usize % 8 == 0);
                    assert!(segfit.heap_extent().contains(ptr.as_ptr()));

                    stamp = stamp.wrapping_add(1).max(1);
                    unsafe { ptr.as_ptr().write_bytes(stamp, size as usize) };
                    allocations.push((ptr, size as usize, stamp));
                }
            }
            Free { index } => {
                if index as usize >= allocations.len() {
                    continue;
                }

                let (ptr, size, stamp) = allocations.swap_remove(index as usize);
                unsafe {
                    check_stamp(ptr, size, stamp);
                    segfit.free(ptr);
                }
            }
            Realloc { index, new_size } => {
                if index as usize >= allocations.len() || new_size == 0 {
                    continue;
                }

                let (ptr, size, old_stamp) = allocations[index as usize];

                if let Ok(ptr) = unsafe { segfit.realloc(ptr, new_size as usize) } {
                    unsafe {
                        check_stamp(ptr, size.min(new_size as usize), old_stamp);
                        stamp = stamp.wrapping_add(1).max(1);
                        ptr.as_ptr().write_bytes(stamp, new_size as usize);
                    }
                    allocations[index as usize] = (ptr, new_size as usize, stamp);
                }
            }
            Reset => {
                allocations.clear();
                segfit.source.reset();
                unsafe { segfit.init().unwrap() };
            }
        }
    }

    // Free any remaining allocations.
    for (ptr, size, stamp) in allocations {
        unsafe {
            check_stamp(ptr, size, stamp);
            segfit.free(ptr);
        }
    }
});

unsafe fn check_stamp(ptr: NonNull<u8>, len: usize, stamp: u8) {
    for i in 0..len {
        assert_eq!(ptr.as_ptr().add(i).read(), stamp);
    }
}

use std::ptr::addr_of;

use segfit::*;

// Run with: `cargo run --example global_allocator`

// Notes:
//
// ## Using `spin::Mutex<()>`
// The `spin` crate provides a simple mutex we can use on most platforms.
// We'll use it for the sake of example.
//
// ## Lazy initialization
// `SegfitLock`'s `GlobalAlloc` implementation establishes the heap on the
// first allocation, as allocations may occur prior to the execution of
// `main`.

static mut ARENA: [u8; 1 << 16] = [0; 1 << 16];

#[global_allocator]
static ALLOCATOR: SegfitLock<spin::Mutex<()>, ArenaSource> = Segfit::new(unsafe {
    ArenaSource::new(Extent::from_array(addr_of!(ARENA) as *mut [u8; 1 << 16]))
})
.lock();

fn main() {
    let mut vec = Vec::with_capacity(100);
    vec.extend(0..300usize);
    vec.truncate(100);
    vec.shrink_to_fit();
    assert_eq!(vec.iter().sum::<usize>(), 100 * 99 / 2);
}

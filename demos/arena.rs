use segfit::{ArenaSource, Extent, Segfit};

// Run with: `cargo run --example arena`

fn main() {
    let arena = Box::leak(vec![0u8; 1 << 20].into_boxed_slice());

    let mut segfit = Segfit::new(unsafe { ArenaSource::new(Extent::from(&mut arena[..])) });

    unsafe {
        segfit.init().expect("arena too small");

        let a = segfit.malloc(128).expect("allocation failed");
        a.as_ptr().write_bytes(0xab, 128);

        // grows in place where it can; contents carry over either way
        let a = segfit.realloc(a, 4096).expect("reallocation failed");
        assert_eq!(a.as_ptr().read(), 0xab);

        segfit.free(a);
    }

    println!("heap extent: {}", segfit.heap_extent());
}

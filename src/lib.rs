#![doc = include_str!("../README.md")]
#![cfg_attr(not(test), no_std)]

#[cfg(feature = "lock_api")]
mod lock;

mod block;
mod extent;
mod list;
mod source;
mod word;

#[cfg(feature = "counters")]
pub mod counters;

#[cfg(feature = "counters")]
pub use counters::Counters;
#[cfg(feature = "lock_api")]
pub use lock::{AssumeUnlockable, SegfitLock};
pub use extent::Extent;
pub use source::{ArenaSource, MemorySource};

use block::FreeBlock;
use list::Bins;
use word::Word;

use core::ptr::{null_mut, NonNull};

// Block layout, by offset from the payload pointer:
//   -4 | header word: size | reloc tag | alloc bit
//    0 | payload, or the next link of a free block
//   +4 | payload, or the prev link of a free block
//  ... | payload, or the unused body of a free block
//   -8 from the end | footer word, duplicating the header
//
// Two sentinels frame the heap so that coalescing and reallocation never
// have to special-case the boundaries: a permanently allocated prologue
// of size 8 at the bottom, and a header-only epilogue of size 0 at the
// break. Both report "allocated".

/// Header/footer word size in bytes.
pub(crate) const WORD: usize = 4;
/// Payload alignment, and the granularity of block sizes.
pub(crate) const DWORD: usize = 2 * WORD;
/// Smallest block: header, two link words, footer.
pub(crate) const MIN_BLOCK: usize = 2 * DWORD;
/// Number of segregated size classes.
pub(crate) const BIN_COUNT: usize = 20;

/// Size of the first heap extension, performed by `init`.
const INIT_CHUNK: usize = 1 << 6;
/// Minimum heap extension thereafter.
const CHUNK: usize = 1 << 12;
/// Extra bytes reserved by every reallocation to absorb future growth.
const REALLOC_SLACK: usize = 1 << 7;
/// Requests at least this large are placed at the top of their block,
/// keeping them out of the small classes when they come back as free.
const TAIL_PLACE_MIN: usize = 100;

const fn align_up(size: usize) -> usize {
    (size + (DWORD - 1)) & !(DWORD - 1)
}

/// Block size for a payload request: boundary-tag overhead, rounded up,
/// and never smaller than a free block's link area.
const fn adjust_request(size: usize) -> usize {
    if size <= DWORD {
        MIN_BLOCK
    } else {
        align_up(size + DWORD)
    }
}

/// The Segfit allocator.
///
/// One way to get started:
/// 1. Construct with [`new`](Segfit::new), supplying a [`MemorySource`]
///    such as [`ArenaSource`].
/// 2. Establish the heap with [`init`](Segfit::init).
/// 3. Allocate with [`malloc`](Segfit::malloc), [`free`](Segfit::free)
///    and [`realloc`](Segfit::realloc), or call [`lock`](Segfit::lock)
///    to get a [`SegfitLock`] which supports
///    [`GlobalAlloc`](core::alloc::GlobalAlloc).
pub struct Segfit<M: MemorySource> {
    /// The heap-extension oracle.
    ///
    /// Its state is entirely maintained by the source implementation.
    pub source: M,

    /// Segregated list heads.
    bins: Bins,
    /// The heap's fixed low address. Null until `init` succeeds; link
    /// offsets inside free blocks are relative to this.
    base: *mut u8,

    #[cfg(feature = "counters")]
    /// Allocation stats.
    counters: counters::Counters,
}

unsafe impl<M: Send + MemorySource> Send for Segfit<M> {}

impl<M: MemorySource> core::fmt::Debug for Segfit<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Segfit")
            .field("base", &self.base)
            .field("heap", &self.heap_extent())
            .finish()
    }
}

impl<M: MemorySource> Segfit<M> {
    /// Returns an uninitialized [`Segfit`]. Call [`init`](Segfit::init)
    /// before allocating.
    pub const fn new(source: M) -> Self {
        Self {
            source,
            bins: Bins::new(),
            base: null_mut(),

            #[cfg(feature = "counters")]
            counters: counters::Counters::new(),
        }
    }

    /// Whether [`init`](Segfit::init) has succeeded.
    pub fn is_initialized(&self) -> bool {
        !self.base.is_null()
    }

    /// The heap's current extent, `[heap_lo, heap_hi)`.
    pub fn heap_extent(&self) -> Extent {
        Extent::new(self.source.heap_lo(), self.source.heap_hi())
    }

    /// Establishes the heap: installs the prologue and epilogue sentinels,
    /// then performs the first extension.
    ///
    /// May be called again after [`MemorySource::reset`] to start over.
    ///
    /// # Safety
    /// The memory served by the source must be valid for reads and writes
    /// and unmutated by anything else while the allocator is in use.
    pub unsafe fn init(&mut self) -> Result<(), ()> {
        self.bins.clear();
        self.base = null_mut();

        let start = self.source.extend(2 * DWORD)?.as_ptr();
        debug_assert!(start as usize % DWORD == 0);
        self.base = start;

        Word::write(start, Word::new(0, false)); // alignment pad
        Word::write(start.add(WORD), Word::new(DWORD, true)); // prologue header
        Word::write(start.add(2 * WORD), Word::new(DWORD, true)); // prologue footer
        Word::write(start.add(3 * WORD), Word::new(0, true)); // epilogue header

        #[cfg(feature = "counters")]
        self.counters.account_init(2 * DWORD);

        if self.extend_heap(INIT_CHUNK).is_err() {
            self.base = null_mut();
            return Err(());
        }

        self.scan_for_errors();

        Ok(())
    }

    /// Grows the heap, installing the new region as one free block and a
    /// fresh epilogue. Returns the (coalesced) free block.
    unsafe fn extend_heap(&mut self, size: usize) -> Result<*mut u8, ()> {
        let asize = align_up(size);
        let payload = self.source.extend(asize)?.as_ptr();

        // the new block's header lands on the old epilogue
        Word::write(block::header(payload), Word::new(asize, false));
        Word::write(block::footer(payload), Word::new(asize, false));
        Word::write(block::header(block::next_block(payload)), Word::new(0, true));

        #[cfg(feature = "counters")]
        self.counters.account_extend(asize);

        self.bins.insert(self.base, payload);

        Ok(self.coalesce(payload))
    }

    /// Merges a just-freed (and already indexed) block with its free
    /// physical neighbors, reindexing the result.
    unsafe fn coalesce(&mut self, payload: *mut u8) -> *mut u8 {
        let prev = block::prev_block(payload);
        let next = block::next_block(payload);
        let prev_word = Word::read(block::header(prev));
        let next_word = Word::read(block::header(next));

        // a tagged predecessor is reserved slack: hands off
        let prev_alloc = prev_word.is_allocated() || prev_word.is_reloc_tagged();
        let next_alloc = next_word.is_allocated();

        let mut payload = payload;
        let mut size = block::size(payload);

        if prev_alloc && next_alloc {
            return payload;
        } else if prev_alloc {
            self.bins.remove(self.base, payload);
            self.bins.remove(self.base, next);
            size += next_word.size();
            Word::write_keeping_tag(block::header(payload), Word::new(size, false));
            Word::write_keeping_tag(block::footer(payload), Word::new(size, false));
        } else if next_alloc {
            self.bins.remove(self.base, payload);
            self.bins.remove(self.base, prev);
            size += prev_word.size();
            Word::write_keeping_tag(block::footer(payload), Word::new(size, false));
            Word::write_keeping_tag(block::header(prev), Word::new(size, false));
            payload = prev;
        } else {
            self.bins.remove(self.base, payload);
            self.bins.remove(self.base, prev);
            self.bins.remove(self.base, next);
            size += prev_word.size() + next_word.size();
            Word::write_keeping_tag(block::header(prev), Word::new(size, false));
            Word::write_keeping_tag(block::footer(next), Word::new(size, false));
            payload = prev;
        }

        self.bins.insert(self.base, payload);

        payload
    }

    /// Carves `asize` bytes out of the free block at `payload`, which must
    /// be indexed and at least that large. Returns the allocation's payload.
    unsafe fn place(&mut self, payload: *mut u8, asize: usize) -> *mut u8 {
        let psize = block::size(payload);
        let remainder = psize - asize;

        self.bins.remove(self.base, payload);

        if remainder <= MIN_BLOCK {
            // too little left over to form a block
            Word::write_keeping_tag(block::header(payload), Word::new(psize, true));
            Word::write_keeping_tag(block::footer(payload), Word::new(psize, true));
            payload
        } else if asize >= TAIL_PLACE_MIN {
            // hand out the top of the block, keep the bottom free
            Word::write_keeping_tag(block::header(payload), Word::new(remainder, false));
            Word::write_keeping_tag(block::footer(payload), Word::new(remainder, false));
            let alloc = block::next_block(payload);
            Word::write(block::header(alloc), Word::new(asize, true));
            Word::write(block::footer(alloc), Word::new(asize, true));
            self.bins.insert(self.base, payload);
            alloc
        } else {
            Word::write_keeping_tag(block::header(payload), Word::new(asize, true));
            Word::write_keeping_tag(block::footer(payload), Word::new(asize, true));
            let rest = block::next_block(payload);
            Word::write(block::header(rest), Word::new(remainder, false));
            Word::write(block::footer(rest), Word::new(remainder, false));
            self.bins.insert(self.base, rest);
            payload
        }
    }

    /// Allocate at least `size` bytes, if possible.
    ///
    /// Zero-sized requests yield `Err`.
    ///
    /// # Safety
    /// [`init`](Segfit::init) must have succeeded.
    pub unsafe fn malloc(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        debug_assert!(self.is_initialized());

        if size == 0 {
            return Err(());
        }

        let asize = adjust_request(size);

        // best fit within a class, first fit across classes; blocks
        // reserved as reallocation slack are not up for grabs
        let mut chosen = null_mut();
        'bins: for bin in Bins::bin_of_size(asize)..BIN_COUNT {
            let mut node = self.bins.head(self.base, bin);
            while let Some(p) = node {
                let word = Word::read(block::header(p));
                if asize <= word.size() && !word.is_reloc_tagged() {
                    chosen = p;
                    break 'bins;
                }
                node = list::resolve(self.base, FreeBlock(p).next());
            }
        }

        if chosen.is_null() {
            chosen = self.extend_heap(asize.max(CHUNK))?;
        }

        let payload = self.place(chosen, asize);

        #[cfg(feature = "counters")]
        self.counters.account_alloc(block::size(payload));

        self.scan_for_errors();

        Ok(NonNull::new_unchecked(payload))
    }

    /// Free a previously allocated block.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`malloc`](Segfit::malloc) or
    /// [`realloc`](Segfit::realloc) of this allocator and not yet freed.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let payload = ptr.as_ptr();
        let size = block::size(payload);

        #[cfg(feature = "counters")]
        self.counters.account_free(size);

        // slack reserved behind a departing block no longer means anything
        let next = block::next_block(payload);
        let next_word = Word::read(block::header(next));
        if next_word.is_reloc_tagged() {
            Word::clear_reloc_tag(block::header(next));

            // released slack may now border another free block
            if !next_word.is_allocated() && next_word.size() != 0 {
                self.coalesce(next);
            }
        }

        // plain writes: a freshly freed block must not carry a stale tag
        Word::write(block::header(payload), Word::new(size, false));
        Word::write(block::footer(payload), Word::new(size, false));

        self.bins.insert(self.base, payload);
        self.coalesce(payload);

        self.scan_for_errors();
    }

    /// Resize a previously allocated block to at least `size` bytes,
    /// preserving its contents up to the smaller of the two sizes.
    ///
    /// Every reallocation reserves 128 extra bytes of slack and, when
    /// little of that slack remains, tags the physically next block so that
    /// a subsequent call can grow in place instead of relocating.
    ///
    /// Zero-sized requests yield `Err` without freeing `ptr`.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`malloc`](Segfit::malloc) or
    /// [`realloc`](Segfit::realloc) of this allocator and not yet freed.
    pub unsafe fn realloc(&mut self, ptr: NonNull<u8>, size: usize) -> Result<NonNull<u8>, ()> {
        if size == 0 {
            return Err(());
        }

        let mut payload = ptr.as_ptr();
        let target = adjust_request(size) + REALLOC_SLACK;
        let mut slack = block::size(payload) as isize - target as isize;

        if slack < 0 {
            let cur = block::size(payload);
            let next = block::next_block(payload);
            let next_word = Word::read(block::header(next));
            let next_is_epilogue = next_word.size() == 0;
            let next_is_free = !next_word.is_allocated();

            let mut avail = cur as isize + next_word.size() as isize - target as isize;

            // an extension can only be absorbed when the grown span
            // reaches the break
            let reaches_break = next_is_epilogue
                || next_is_free
                    && Word::read(block::header(block::next_block(next))).size() == 0;

            if (next_is_free || next_is_epilogue) && (avail >= 0 || reaches_break) {
                if next_is_free {
                    // the successor is being consumed; drop its tag so a
                    // heap extension can merge into it
                    Word::clear_reloc_tag(block::header(next));
                }

                if avail < 0 {
                    let ext = ((-avail) as usize).max(CHUNK);
                    self.extend_heap(ext)?;
                    avail += ext as isize;
                }

                // the extension may have merged into the successor, so
                // locate it afresh
                let next = block::next_block(payload);
                self.bins.remove(self.base, next);

                let new_size = (target as isize + avail) as usize;
                Word::write(block::header(payload), Word::new(new_size, true));
                Word::write(block::footer(payload), Word::new(new_size, true));

                #[cfg(feature = "counters")]
                self.counters.account_realloc_in_place(cur, new_size);
            } else {
                let moved = self.malloc(target - DWORD)?.as_ptr();
                // memmove semantics: the copy reads past the old payload
                // and may overlap the fresh block
                moved.copy_from(payload, size.min(target));
                self.free(ptr);
                payload = moved;

                #[cfg(feature = "counters")]
                self.counters.account_realloc_moved();
            }

            slack = block::size(payload) as isize - target as isize;
        }

        // little slack left: reserve the neighbor against allocation and
        // coalescing so the next call here can absorb it
        if slack < 2 * REALLOC_SLACK as isize {
            Word::set_reloc_tag(block::header(block::next_block(payload)));
        }

        self.scan_for_errors();

        Ok(NonNull::new_unchecked(payload))
    }

    /// Wrap in `SegfitLock`, a mutex-locked wrapper struct using [`lock_api`].
    ///
    /// This implements the [`GlobalAlloc`](core::alloc::GlobalAlloc) trait.
    #[cfg(feature = "lock_api")]
    pub const fn lock<R: lock_api::RawMutex>(self) -> SegfitLock<R, M> {
        SegfitLock(lock_api::Mutex::new(self))
    }

    /// Wrap in a `SegfitLock` without a synchronizing lock.
    ///
    /// **Not generally recommended.** Use [`lock`](Segfit::lock) with a
    /// spin lock instead if you're unsure.
    /// # Safety
    /// You must maintain exclusivity of access to the lock, whether via
    /// platform specific constraints, application thread usage, or some
    /// form of synchronization.
    #[cfg(feature = "lock_api")]
    pub const unsafe fn lock_assume_single_threaded(self) -> SegfitLock<AssumeUnlockable, M> {
        SegfitLock(lock_api::Mutex::new(self))
    }

    #[cfg(not(debug_assertions))]
    fn scan_for_errors(&self) {}

    #[cfg(debug_assertions)]
    /// Debugging function for checking various assumptions.
    fn scan_for_errors(&self) {
        if self.base.is_null() {
            return;
        }

        unsafe {
            let lo = self.source.heap_lo();
            let hi = self.source.heap_hi();
            assert!(self.base == lo);

            let prologue = lo.add(DWORD);
            assert!(block::size(prologue) == DWORD);
            assert!(Word::read(block::header(prologue)).is_allocated());
            assert!(Word::read(block::footer(prologue)).is_allocated());

            // walk every block between the sentinels
            let mut walked_free = 0usize;
            let mut accounted = 2 * DWORD;
            let mut payload = lo.add(2 * DWORD);
            let mut prev_free_untagged = false;
            loop {
                let word = Word::read(block::header(payload));
                if word.size() == 0 {
                    // the epilogue must sit exactly at the break
                    assert!(word.is_allocated());
                    assert!(block::header(payload) as usize + WORD == hi as usize);
                    break;
                }

                assert!(payload as usize % DWORD == 0);
                assert!(word.size() >= MIN_BLOCK && word.size() % DWORD == 0);

                let foot = Word::read(block::footer(payload));
                assert!(word.size() == foot.size());
                assert!(word.is_allocated() == foot.is_allocated());

                if !word.is_allocated() {
                    assert!(!prev_free_untagged, "adjacent free blocks survived coalescing");
                    prev_free_untagged = !word.is_reloc_tagged();
                    walked_free += 1;
                } else {
                    prev_free_untagged = false;
                }

                accounted += word.size();
                payload = block::next_block(payload);
            }
            assert!(accounted == hi as usize - lo as usize);

            // every listed block is free, classed correctly, and sorted
            let mut listed = 0usize;
            for bin in 0..BIN_COUNT {
                let mut last_size = 0;
                let mut node = self.bins.head(self.base, bin);
                while let Some(p) = node {
                    let word = Word::read(block::header(p));
                    assert!(!word.is_allocated());
                    assert!(Bins::bin_of_size(word.size()) == bin);
                    assert!(word.size() >= last_size);
                    last_size = word.size();
                    listed += 1;
                    node = list::resolve(self.base, FreeBlock(p).next());
                }
            }
            assert!(walked_free == listed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A break-pointer oracle that counts how often it is consulted.
    struct CountingSource {
        inner: ArenaSource,
        extends: usize,
    }

    impl MemorySource for CountingSource {
        fn extend(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
            self.extends += 1;
            self.inner.extend(size)
        }
        fn heap_lo(&self) -> *mut u8 {
            self.inner.heap_lo()
        }
        fn heap_hi(&self) -> *mut u8 {
            self.inner.heap_hi()
        }
        fn reset(&mut self) {
            self.inner.reset()
        }
    }

    fn arena_source(size: usize) -> ArenaSource {
        let arena = Box::leak(vec![0u8; size].into_boxed_slice());
        unsafe { ArenaSource::new(Extent::from(&mut arena[..])) }
    }

    fn new_segfit(arena_size: usize) -> Segfit<ArenaSource> {
        let mut segfit = Segfit::new(arena_source(arena_size));
        unsafe { segfit.init().unwrap() };
        segfit
    }

    /// Collects `(size, allocated, tagged)` for every block between the
    /// sentinels, low to high.
    unsafe fn walk<M: MemorySource>(segfit: &Segfit<M>) -> Vec<(usize, bool, bool)> {
        let mut blocks = vec![];
        let mut payload = segfit.base.add(2 * DWORD);
        loop {
            let word = Word::read(block::header(payload));
            if word.size() == 0 {
                break;
            }
            blocks.push((word.size(), word.is_allocated(), word.is_reloc_tagged()));
            payload = block::next_block(payload);
        }
        blocks
    }

    unsafe fn check_stamp(ptr: NonNull<u8>, len: usize, stamp: u8) {
        for i in 0..len {
            assert_eq!(ptr.as_ptr().add(i).read(), stamp);
        }
    }

    #[test]
    fn init_installs_sentinels_and_one_chunk() {
        let segfit = new_segfit(1 << 12);

        assert_eq!(segfit.heap_extent().size(), 2 * DWORD + INIT_CHUNK);
        assert_eq!(unsafe { walk(&segfit) }, [(INIT_CHUNK, false, false)]);
    }

    #[test]
    fn init_fails_on_a_hopeless_arena() {
        let mut segfit = Segfit::new(arena_source(32));
        assert!(unsafe { segfit.init() }.is_err());
        assert!(!segfit.is_initialized());
    }

    #[test]
    fn free_returns_the_heap_to_a_single_block() {
        let mut segfit = new_segfit(1 << 12);

        unsafe {
            let a = segfit.malloc(1).unwrap();
            segfit.free(a);
        }

        assert_eq!(unsafe { walk(&segfit) }, [(INIT_CHUNK, false, false)]);
    }

    #[test]
    fn adjacent_blocks_coalesce_on_free() {
        let mut segfit = new_segfit(1 << 14);

        unsafe {
            let a = segfit.malloc(40).unwrap();
            let b = segfit.malloc(40).unwrap();
            segfit.free(a);
            segfit.free(b);
        }

        // one free block covering both payloads and everything after
        let blocks = unsafe { walk(&segfit) };
        assert_eq!(blocks.len(), 1);
        assert!(!blocks[0].1);
        assert_eq!(blocks[0].0, segfit.heap_extent().size() - 2 * DWORD);
    }

    #[test]
    fn freed_slot_is_reused_first_fit() {
        let mut segfit = new_segfit(1 << 14);

        unsafe {
            let a = segfit.malloc(40).unwrap();
            let _b = segfit.malloc(40).unwrap();
            segfit.free(a);
            let c = segfit.malloc(40).unwrap();
            assert_eq!(c, a);
        }
    }

    #[test]
    fn within_a_class_the_walk_is_best_fit() {
        let mut segfit = new_segfit(1 << 14);

        unsafe {
            // three free blocks of sizes 32, 40, 48, pinned apart by
            // live allocations so they cannot coalesce
            let a = segfit.malloc(24).unwrap(); // block of 32
            let _pin = segfit.malloc(8).unwrap();
            let b = segfit.malloc(40).unwrap(); // block of 48
            let _pin = segfit.malloc(8).unwrap();
            let c = segfit.malloc(32).unwrap(); // block of 40
            let _pin = segfit.malloc(8).unwrap();

            segfit.free(a);
            segfit.free(b);
            segfit.free(c);

            // a 40-byte block fits the request best, despite 32 being
            // nearer the head and 48 having been freed earlier
            let d = segfit.malloc(26).unwrap();
            assert_eq!(d, c);
        }
    }

    #[test]
    fn slack_buffer_absorbs_constant_regrowth() {
        let inner = arena_source(1 << 15);
        let mut segfit = Segfit::new(CountingSource { inner, extends: 0 });

        unsafe {
            segfit.init().unwrap();
            assert_eq!(segfit.source.extends, 2); // sentinels + first chunk

            let a = segfit.malloc(16).unwrap();
            assert_eq!(segfit.source.extends, 2);

            // outgrows its block: extends the heap once, in place
            let b = segfit.realloc(a, 32).unwrap();
            assert_eq!(b, a);
            assert_eq!(segfit.source.extends, 3);

            // absorbed by the slack buffer: the oracle is not consulted
            let c = segfit.realloc(b, 48).unwrap();
            assert_eq!(c, a);
            assert_eq!(segfit.source.extends, 3);
        }
    }

    #[test]
    fn large_requests_are_tail_placed() {
        let mut segfit = new_segfit(1 << 14);

        unsafe {
            let a = segfit.malloc(200).unwrap();
            let b = segfit.malloc(16).unwrap();

            // the large allocation sits at the top of its block, above
            // where the small one lands
            assert!(a.as_ptr() > b.as_ptr());
        }
    }

    #[test]
    fn realloc_keeps_the_pointer_when_slack_suffices() {
        let mut segfit = new_segfit(1 << 15);

        unsafe {
            let a = segfit.malloc(40).unwrap();
            let a = segfit.realloc(a, 150).unwrap(); // grows in place at the break

            // shrinking and modest regrowth never move the block
            for size in [8, 100, 150, 160] {
                assert_eq!(segfit.realloc(a, size).unwrap(), a);
            }
        }
    }

    #[test]
    fn realloc_preserves_contents_when_moving() {
        let mut segfit = new_segfit(1 << 14);

        unsafe {
            let a = segfit.malloc(24).unwrap();
            let _pin = segfit.malloc(8).unwrap(); // block an in-place grow
            a.as_ptr().write_bytes(0xa7, 24);

            let b = segfit.realloc(a, 200).unwrap();
            assert_ne!(a, b);
            check_stamp(b, 24, 0xa7);
        }
    }

    #[test]
    fn tagged_slack_is_skipped_and_not_coalesced() {
        let mut segfit = new_segfit(1 << 15);

        unsafe {
            // build: prologue | a (4160, allocated) | f (4096, free) | epilogue
            let a = segfit.malloc(40).unwrap();
            let a = segfit.realloc(a, 150).unwrap();
            assert_eq!(block::size(a.as_ptr()), 4160);
            let b = segfit.malloc(8).unwrap();
            segfit.free(b);
            assert_eq!(walk(&segfit), [(4160, true, false), (4096, false, false)]);

            // a realloc that leaves little slack reserves the neighbor
            let a2 = segfit.realloc(a, 4010).unwrap();
            assert_eq!(a2, a);
            assert_eq!(walk(&segfit), [(4160, true, false), (4096, false, true)]);

            // the reserved block is not up for allocation: the heap grows
            // instead, and the fresh chunk does not merge leftward into it
            let e = segfit.malloc(8).unwrap();
            assert_eq!(e.as_ptr(), a.as_ptr().add(4160 + 4096));
            assert_eq!(
                walk(&segfit),
                [(4160, true, false), (4096, false, true), (16, true, false), (4080, false, false)]
            );

            // freeing the block after the reserved slack must not merge
            // leftward into it either
            segfit.free(e);
            assert_eq!(
                walk(&segfit),
                [(4160, true, false), (4096, false, true), (4096, false, false)]
            );

            // freeing the protected block releases the slack entirely
            segfit.free(a);
            assert_eq!(walk(&segfit), [(4160 + 4096 + 4096, false, false)]);
        }
    }

    #[test]
    fn zero_sized_requests_are_refused() {
        let mut segfit = new_segfit(1 << 12);

        unsafe {
            assert!(segfit.malloc(0).is_err());

            let a = segfit.malloc(16).unwrap();
            a.as_ptr().write_bytes(0x11, 16);

            // realloc to zero refuses without freeing the block
            assert!(segfit.realloc(a, 0).is_err());
            check_stamp(a, 16, 0x11);
            segfit.free(a);
        }
    }

    #[test]
    fn extension_failure_is_reported_and_survivable() {
        let mut segfit = new_segfit(128);

        unsafe {
            // far larger than the arena can ever provide
            assert!(segfit.malloc(512).is_err());

            // the heap is still fully usable afterwards
            let a = segfit.malloc(40).unwrap();
            assert!(segfit.malloc(40).is_err());
            segfit.free(a);
            let b = segfit.malloc(8).unwrap();
            segfit.free(b);
        }
    }

    #[test]
    fn reset_allows_reinitialization() {
        let mut segfit = new_segfit(1 << 13);

        unsafe {
            let a = segfit.malloc(100).unwrap();
            a.as_ptr().write_bytes(0xff, 100);

            segfit.source.reset();
            segfit.init().unwrap();

            assert_eq!(walk(&segfit), [(INIT_CHUNK, false, false)]);
            let b = segfit.malloc(24).unwrap();
            segfit.free(b);
        }
    }

    #[test]
    fn random_actions_exercise() {
        let mut segfit = new_segfit(1 << 20);
        let mut rng = fastrand::Rng::with_seed(0x5e6f17);

        let mut live: Vec<(NonNull<u8>, usize, u8)> = vec![];
        let mut stamp: u8 = 0;

        for _ in 0..1500 {
            match rng.usize(0..3) {
                0 => {
                    let size = rng.usize(1..600);
                    match unsafe { segfit.malloc(size) } {
                        Ok(p) => {
                            assert_eq!(p.as_ptr() as usize % DWORD, 0);
                            assert!(segfit.heap_extent().contains(p.as_ptr()));
                            stamp = stamp.wrapping_add(1).max(1);
                            unsafe { p.as_ptr().write_bytes(stamp, size) };
                            live.push((p, size, stamp));
                        }
                        Err(()) => {
                            // arena exhausted; make room
                            if !live.is_empty() {
                                let (p, size, s) = live.swap_remove(rng.usize(0..live.len()));
                                unsafe {
                                    check_stamp(p, size, s);
                                    segfit.free(p);
                                }
                            }
                        }
                    }
                }
                1 => {
                    if !live.is_empty() {
                        let (p, size, s) = live.swap_remove(rng.usize(0..live.len()));
                        unsafe {
                            check_stamp(p, size, s);
                            segfit.free(p);
                        }
                    }
                }
                2 => {
                    if !live.is_empty() {
                        let index = rng.usize(0..live.len());
                        let (p, size, s) = live[index];
                        let new_size = rng.usize(1..900);
                        if let Ok(q) = unsafe { segfit.realloc(p, new_size) } {
                            unsafe { check_stamp(q, size.min(new_size), s) };
                            stamp = stamp.wrapping_add(1).max(1);
                            unsafe { q.as_ptr().write_bytes(stamp, new_size) };
                            live[index] = (q, new_size, stamp);
                        }
                    }
                }
                _ => unreachable!(),
            }
        }

        for (p, size, s) in live {
            unsafe {
                check_stamp(p, size, s);
                segfit.free(p);
            }
        }
    }
}

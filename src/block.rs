//! Purely computational primitives over a block's payload pointer.
//!
//! A block is laid out as a header word, the payload (which doubles as the
//! link area while the block is free), and a footer word duplicating the
//! header. The footer lets a block locate its physical predecessor by
//! reading the word immediately before its own header.

use crate::word::Word;
use crate::{DWORD, WORD};

/// Address of the header word of the block at `payload`.
#[inline]
pub(crate) unsafe fn header(payload: *mut u8) -> *mut u8 {
    payload.sub(WORD)
}

/// The block's total size in bytes, read from its header.
#[inline]
pub(crate) unsafe fn size(payload: *mut u8) -> usize {
    Word::read(header(payload)).size()
}

/// Address of the footer word of the block at `payload`.
#[inline]
pub(crate) unsafe fn footer(payload: *mut u8) -> *mut u8 {
    payload.add(size(payload)).sub(DWORD)
}

/// Payload address of the physically next block.
#[inline]
pub(crate) unsafe fn next_block(payload: *mut u8) -> *mut u8 {
    payload.add(size(payload))
}

/// Payload address of the physically previous block, located through
/// its footer, which sits immediately before our header.
#[inline]
pub(crate) unsafe fn prev_block(payload: *mut u8) -> *mut u8 {
    payload.sub(Word::read(payload.sub(DWORD)).size())
}

/// A free block viewed through its payload pointer.
///
/// The first two payload words hold this block's position in its
/// segregated list, as byte offsets from the heap's low address
/// (offset 0 is the null link). This is safe because the block is
/// unreachable from the client while free.
#[derive(Clone, Copy)]
pub(crate) struct FreeBlock(pub *mut u8);

impl FreeBlock {
    /// Link toward larger blocks in the class, away from the list head.
    #[inline]
    pub unsafe fn next(self) -> u32 {
        self.0.cast::<u32>().read()
    }

    #[inline]
    pub unsafe fn set_next(self, off: u32) {
        self.0.cast::<u32>().write(off);
    }

    /// Link toward the list head.
    #[inline]
    pub unsafe fn prev(self) -> u32 {
        self.0.add(WORD).cast::<u32>().read()
    }

    #[inline]
    pub unsafe fn set_prev(self, off: u32) {
        self.0.add(WORD).cast::<u32>().write(off);
    }
}

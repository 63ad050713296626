//! Physical frame allocator.
//!
//! A bitmap of 4 KiB frames with a rotating first-fit cursor. Reference
//! counts for copy-on-write pages are tracked directly here, one `u16` per
//! frame, rather than in a side table keyed by virtual address: the frame
//! number is already the natural key, and COW fault handling needs the
//! count under the same lock that does the allocation/free bookkeeping.

extern crate alloc;

use alloc::vec::Vec;
use spin::Mutex;

use crate::error::{KernelError, KernelResult};

pub const FRAME_SIZE: usize = 4096;

/// Physical frame number (physical address / [`FRAME_SIZE`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn from_phys_addr(addr: u64) -> Self {
        Self(addr / FRAME_SIZE as u64)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn phys_addr(self) -> u64 {
        self.0 * FRAME_SIZE as u64
    }
}

struct Bitmap {
    /// One bit per frame; `1` means free.
    words: Vec<u64>,
    /// Refcount per frame. `0` for unallocated frames, `1` for a normally
    /// mapped page, `>1` while shared copy-on-write.
    refcounts: Vec<u16>,
    total_frames: usize,
    free_frames: usize,
    /// Rotating cursor into `words`, avoids rescanning low memory on every
    /// allocation once it has filled up.
    cursor_word: usize,
}

impl Bitmap {
    fn new(total_frames: usize) -> Self {
        let word_count = total_frames.div_ceil(64);
        Self {
            words: alloc::vec![u64::MAX; word_count],
            refcounts: alloc::vec![0u16; total_frames],
            total_frames,
            free_frames: total_frames,
            cursor_word: 0,
        }
    }

    fn mark_used(&mut self, frame: usize) {
        let (w, b) = (frame / 64, frame % 64);
        if self.words[w] & (1 << b) != 0 {
            self.words[w] &= !(1 << b);
            self.free_frames -= 1;
        }
        self.refcounts[frame] = 1;
    }

    fn alloc_one(&mut self) -> KernelResult<usize> {
        if self.free_frames == 0 {
            return Err(KernelError::OutOfMemory {
                requested: FRAME_SIZE,
                available: 0,
            });
        }
        let word_count = self.words.len();
        for i in 0..word_count {
            let w = (self.cursor_word + i) % word_count;
            if self.words[w] == 0 {
                continue;
            }
            let bit = self.words[w].trailing_zeros() as usize;
            let frame = w * 64 + bit;
            if frame >= self.total_frames {
                continue;
            }
            self.words[w] &= !(1 << bit);
            self.free_frames -= 1;
            self.refcounts[frame] = 1;
            self.cursor_word = w;
            return Ok(frame);
        }
        Err(KernelError::OutOfMemory {
            requested: FRAME_SIZE,
            available: 0,
        })
    }

    fn free_one(&mut self, frame: usize) -> KernelResult<()> {
        if frame >= self.total_frames {
            return Err(KernelError::InvalidAddress {
                addr: frame * FRAME_SIZE,
            });
        }
        let refcount = &mut self.refcounts[frame];
        if *refcount == 0 {
            return Err(KernelError::InvalidState {
                expected: "allocated frame",
                actual: "already free",
            });
        }
        *refcount -= 1;
        if *refcount == 0 {
            let (w, b) = (frame / 64, frame % 64);
            self.words[w] |= 1 << b;
            self.free_frames += 1;
        }
        Ok(())
    }

    fn refcount(&self, frame: usize) -> u16 {
        self.refcounts.get(frame).copied().unwrap_or(0)
    }

    fn bump_refcount(&mut self, frame: usize) -> KernelResult<u16> {
        let refcount = self
            .refcounts
            .get_mut(frame)
            .ok_or(KernelError::InvalidAddress {
                addr: frame * FRAME_SIZE,
            })?;
        *refcount = refcount.checked_add(1).ok_or(KernelError::ResourceExhausted {
            resource: "frame refcount",
        })?;
        Ok(*refcount)
    }
}

pub struct FrameAllocator {
    base: FrameNumber,
    bitmap: Mutex<Bitmap>,
}

impl FrameAllocator {
    /// Builds an allocator over `[base, base + frame_count)`, all frames
    /// initially free. Callers reserve the kernel image, boot page tables,
    /// and other already-occupied regions with [`reserve`] before handing
    /// the allocator out.
    pub fn new(base: FrameNumber, frame_count: usize) -> Self {
        let mut bitmap = Bitmap::new(frame_count);
        // Bitmap::new starts everything free; our callers reserve as needed.
        bitmap.free_frames = frame_count;
        Self {
            base,
            bitmap: Mutex::new(bitmap),
        }
    }

    /// Marks `[start, start+len)` (in frames, relative to `base`) as
    /// permanently allocated, refcount 1.
    pub fn reserve(&self, start: FrameNumber, len: usize) {
        let mut bitmap = self.bitmap.lock();
        let offset = (start.as_u64() - self.base.as_u64()) as usize;
        for i in 0..len {
            bitmap.mark_used(offset + i);
        }
    }

    pub fn alloc(&self) -> KernelResult<FrameNumber> {
        let mut bitmap = self.bitmap.lock();
        let idx = bitmap.alloc_one()?;
        Ok(FrameNumber::new(self.base.as_u64() + idx as u64))
    }

    pub fn free(&self, frame: FrameNumber) -> KernelResult<()> {
        let mut bitmap = self.bitmap.lock();
        let offset = (frame.as_u64() - self.base.as_u64()) as usize;
        bitmap.free_one(offset)
    }

    /// Reference count of `frame`; `0` if unallocated.
    pub fn refcount(&self, frame: FrameNumber) -> u16 {
        let offset = (frame.as_u64() - self.base.as_u64()) as usize;
        self.bitmap.lock().refcount(offset)
    }

    /// Increments `frame`'s refcount (a page is being shared copy-on-write)
    /// and returns the new count.
    pub fn share(&self, frame: FrameNumber) -> KernelResult<u16> {
        let offset = (frame.as_u64() - self.base.as_u64()) as usize;
        self.bitmap.lock().bump_refcount(offset)
    }

    pub fn free_frames(&self) -> usize {
        self.bitmap.lock().free_frames
    }

    pub fn total_frames(&self) -> usize {
        self.bitmap.lock().total_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_round_trips() {
        let fa = FrameAllocator::new(FrameNumber::new(0), 16);
        let f = fa.alloc().unwrap();
        assert_eq!(fa.refcount(f), 1);
        assert_eq!(fa.free_frames(), 15);
        fa.free(f).unwrap();
        assert_eq!(fa.free_frames(), 16);
    }

    #[test]
    fn reserved_frames_are_never_handed_out() {
        let fa = FrameAllocator::new(FrameNumber::new(0), 4);
        fa.reserve(FrameNumber::new(0), 4);
        assert!(fa.alloc().is_err());
    }

    #[test]
    fn shared_frame_requires_two_frees() {
        let fa = FrameAllocator::new(FrameNumber::new(0), 4);
        let f = fa.alloc().unwrap();
        assert_eq!(fa.share(f).unwrap(), 2);
        fa.free(f).unwrap();
        assert_eq!(fa.refcount(f), 1);
        fa.free(f).unwrap();
        assert_eq!(fa.refcount(f), 0);
    }

    #[test]
    fn out_of_memory_when_exhausted() {
        let fa = FrameAllocator::new(FrameNumber::new(0), 1);
        let _f = fa.alloc().unwrap();
        assert!(matches!(fa.alloc(), Err(KernelError::OutOfMemory { .. })));
    }
}

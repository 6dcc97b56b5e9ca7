// SPDX-License-Identifier: CEPL-1.0
//! Linear allocator backing scope-bound query buffers.
//!
//! One arena is created at startup, sized generously, and reset at the top of
//! every render-loop iteration. Allocation borrows `&self` and `reset` takes
//! `&mut self`, so the borrow checker rejects any slice held across a reset.

use std::alloc::{self, Layout};
use std::cell::Cell;
use std::ptr::{self, NonNull};

use bytemuck::Pod;
use thiserror::Error;

const BASE_ALIGN: usize = 16;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArenaError {
    #[error("arena exhausted: requested {requested} bytes, {remaining} remaining")]
    Exhausted { requested: usize, remaining: usize },
    #[error("alignment {0} is not a power of two")]
    BadAlignment(usize),
    #[error("arena capacity {0} is not allocatable")]
    TooLarge(usize),
}

pub struct Arena {
    base: NonNull<u8>,
    layout: Layout,
    capacity: usize,
    used: Cell<usize>,
}

impl Arena {
    pub fn new(capacity: usize) -> Result<Self, ArenaError> {
        let layout = Layout::from_size_align(capacity.max(1), BASE_ALIGN)
            .map_err(|_| ArenaError::TooLarge(capacity))?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        let Some(base) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };
        Ok(Self {
            base,
            layout,
            capacity,
            used: Cell::new(0),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used.get()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.used.get()
    }

    /// Hands out `size` zeroed bytes aligned to `align`.
    ///
    /// A request that does not fit leaves the cursor untouched.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc(&self, size: usize, align: usize) -> Result<&mut [u8], ArenaError> {
        if !align.is_power_of_two() {
            return Err(ArenaError::BadAlignment(align));
        }

        let base = self.base.as_ptr() as usize;
        let used = self.used.get();
        let exhausted = ArenaError::Exhausted {
            requested: size,
            remaining: self.capacity - used,
        };

        let start = (base + used)
            .checked_add(align - 1)
            .map(|a| a & !(align - 1))
            .ok_or_else(|| exhausted.clone())?;
        let offset = start - base;
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= self.capacity)
            .ok_or(exhausted)?;

        self.used.set(end);

        // SAFETY: [offset, end) is inside the allocation and disjoint from every
        // region handed out since the last reset; reset needs &mut self, so no
        // earlier slice outlives it.
        unsafe {
            let ptr = self.base.as_ptr().add(offset);
            ptr::write_bytes(ptr, 0, size);
            Ok(std::slice::from_raw_parts_mut(ptr, size))
        }
    }

    /// Zeroed, properly aligned slice of `len` plain-old-data values.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice<T: Pod>(&self, len: usize) -> Result<&mut [T], ArenaError> {
        let size = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(ArenaError::Exhausted {
                requested: usize::MAX,
                remaining: self.remaining(),
            })?;
        let bytes = self.alloc(size, std::mem::align_of::<T>())?;
        Ok(bytemuck::cast_slice_mut(bytes))
    }

    /// Rewinds the cursor. Memory is not cleared here; allocation zeroes it.
    #[inline]
    pub fn reset(&mut self) {
        self.used.set(0);
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: base was allocated in `new` with this exact layout.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("used", &self.used.get())
            .field("capacity", &self.capacity)
            .finish()
    }
}

// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
// Lock-free single producer/single consumer ring used between the butler
// (producer) and the process thread (consumer).
//
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free circular buffer for streaming samples or events.
///
/// The read and write indices advance monotonically (with wrapping arithmetic)
/// and are reduced modulo the capacity only when touching the backing store, so
/// a full ring and an empty ring are never ambiguous. Only the producer moves
/// the write index and only the consumer moves the read index.
///
/// A number of already-read elements can be kept resident behind the read
/// pointer (the reservation) so the consumer can step backwards without a
/// round trip through the producer.
pub struct PlaybackRingBuffer<T> {
    /// Backing store. Length is always a power of two.
    buffer: Box<[UnsafeCell<T>]>,
    /// capacity - 1, used for index reduction.
    mask: usize,
    /// Total elements written since the last reset (producer).
    write_index: AtomicUsize,
    /// Total elements read since the last reset (consumer).
    read_index: AtomicUsize,
    /// Elements to keep intact behind the read pointer.
    reservation: usize,
}

// The producer and consumer never touch the same slots: the producer only
// writes slots outside [read - reserved, write) and the consumer only reads
// inside it, with the indices published through acquire/release pairs.
unsafe impl<T: Send> Sync for PlaybackRingBuffer<T> {}

impl<T: Copy + Default> PlaybackRingBuffer<T> {
    /// Creates a ring holding at least `capacity` elements. The capacity is
    /// rounded up to the next power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            buffer: Self::allocate(capacity),
            mask: capacity - 1,
            write_index: AtomicUsize::new(0),
            read_index: AtomicUsize::new(0),
            reservation: 0,
        }
    }

    fn allocate(capacity: usize) -> Box<[UnsafeCell<T>]> {
        (0..capacity).map(|_| UnsafeCell::new(T::default())).collect()
    }

    /// Reallocates the backing store and discards all contents. Requires
    /// exclusive access, so it can't race the consumer.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1).next_power_of_two();
        if capacity != self.capacity() {
            self.buffer = Self::allocate(capacity);
            self.mask = capacity - 1;
        }
        self.reservation = self.reservation.min(capacity / 2);
        self.reset();
    }

    /// Discards all contents.
    pub fn reset(&mut self) {
        *self.write_index.get_mut() = 0;
        *self.read_index.get_mut() = 0;
    }

    /// Sets how many already-read elements stay resident behind the read
    /// pointer. Clamped to half the capacity.
    pub fn set_reservation(&mut self, reservation: usize) {
        self.reservation = reservation.min(self.capacity() / 2);
    }

    pub fn reservation(&self) -> usize {
        self.reservation
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Number of elements available to the consumer.
    #[inline]
    pub fn read_space(&self) -> usize {
        let write = self.write_index.load(Ordering::Acquire);
        let read = self.read_index.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Number of already-read elements still intact behind the read pointer.
    #[inline]
    pub fn reserved(&self) -> usize {
        let read = self.read_index.load(Ordering::Acquire);
        self.reservation.min(read)
    }

    /// Number of elements the producer may write without clobbering unread or
    /// reserved data.
    #[inline]
    pub fn write_space(&self) -> usize {
        // One snapshot of the read index for both terms.
        let read = self.read_index.load(Ordering::Acquire);
        let write = self.write_index.load(Ordering::Acquire);
        self.capacity()
            .saturating_sub(write.wrapping_sub(read))
            .saturating_sub(self.reservation.min(read))
    }

    #[inline]
    fn slot(&self, index: usize) -> *mut T {
        UnsafeCell::raw_get(self.buffer.as_ptr()).wrapping_add(index & self.mask)
    }

    /// Copies `count` elements starting at absolute index `from` into `dst`,
    /// handling wraparound.
    fn copy_out(&self, from: usize, dst: &mut [T]) {
        let count = dst.len();
        let start = from & self.mask;
        let first = (self.capacity() - start).min(count);
        unsafe {
            ptr::copy_nonoverlapping(self.slot(start), dst.as_mut_ptr(), first);
            if count > first {
                ptr::copy_nonoverlapping(self.slot(0), dst.as_mut_ptr().add(first), count - first);
            }
        }
    }

    /// Writes as many elements of `src` as fit. Producer only.
    /// Returns the number of elements written.
    pub fn write(&self, src: &[T]) -> usize {
        let to_write = self.write_space().min(src.len());
        if to_write == 0 {
            return 0;
        }
        let write = self.write_index.load(Ordering::Relaxed);
        let start = write & self.mask;
        let first = (self.capacity() - start).min(to_write);
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.slot(start), first);
            if to_write > first {
                ptr::copy_nonoverlapping(src.as_ptr().add(first), self.slot(0), to_write - first);
            }
        }
        self.write_index
            .store(write.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Writes a single element. Producer only.
    pub fn push(&self, value: T) -> bool {
        self.write(std::slice::from_ref(&value)) == 1
    }

    /// Fills `dst` from the ring. Consumer only.
    ///
    /// Never blocks: if fewer elements are resident than requested, the
    /// remainder of `dst` is filled with `T::default()` and the short count is
    /// returned.
    pub fn read(&self, dst: &mut [T]) -> usize {
        let to_read = self.read_space().min(dst.len());
        let read = self.read_index.load(Ordering::Relaxed);
        if to_read > 0 {
            self.copy_out(read, &mut dst[..to_read]);
            self.read_index
                .store(read.wrapping_add(to_read), Ordering::Release);
        }
        dst[to_read..].fill(T::default());
        to_read
    }

    /// Like [`read`](Self::read) but starts `offset` elements past the read
    /// pointer and doesn't consume anything.
    pub fn peek(&self, offset: usize, dst: &mut [T]) -> usize {
        let available = self.read_space().saturating_sub(offset);
        let to_read = available.min(dst.len());
        if to_read > 0 {
            let read = self.read_index.load(Ordering::Relaxed);
            self.copy_out(read.wrapping_add(offset), &mut dst[..to_read]);
        }
        dst[to_read..].fill(T::default());
        to_read
    }

    /// Returns the next element without consuming it. Consumer only.
    pub fn front(&self) -> Option<T> {
        if self.read_space() == 0 {
            return None;
        }
        let read = self.read_index.load(Ordering::Relaxed);
        Some(unsafe { ptr::read(self.slot(read)) })
    }

    /// Consumes the next element. Consumer only.
    pub fn pop(&self) -> Option<T> {
        let value = self.front()?;
        let read = self.read_index.load(Ordering::Relaxed);
        self.read_index
            .store(read.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Skips up to `count` unread elements. Consumer only.
    /// Returns the number skipped.
    pub fn increment_read_ptr(&self, count: usize) -> usize {
        let count = count.min(self.read_space());
        let read = self.read_index.load(Ordering::Relaxed);
        self.read_index
            .store(read.wrapping_add(count), Ordering::Release);
        count
    }

    /// Steps back over `count` already-read elements if they're still
    /// resident. Consumer only.
    pub fn decrement_read_ptr(&self, count: usize) -> bool {
        if count > self.reserved() {
            return false;
        }
        let read = self.read_index.load(Ordering::Relaxed);
        self.read_index
            .store(read.wrapping_sub(count), Ordering::Release);
        true
    }

    /// Returns true if the read pointer can move by `distance` without
    /// leaving resident data.
    pub fn can_seek(&self, distance: i64) -> bool {
        if distance >= 0 {
            distance as u64 <= self.read_space() as u64
        } else {
            distance.unsigned_abs() <= self.reserved() as u64
        }
    }
}

// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Implementation of a ring buffer that owns its elements.
//!
//! Elements need not be `Copy`: the ring stores `Option<T>` slots and moves
//! values in and out, so it can hold transfer requests that carry `'static`
//! buffers. Capacity is the const parameter `N`, all of it usable.

use super::queue::Queue;

pub struct RingBuffer<T, const N: usize> {
    ring: [Option<T>; N],
    head: usize,
    len: usize,
}

impl<T, const N: usize> RingBuffer<T, N> {
    pub const fn new() -> RingBuffer<T, N> {
        RingBuffer {
            ring: [const { None }; N],
            head: 0,
            len: 0,
        }
    }

    fn slot(&self, i: usize) -> usize {
        (self.head + i) % N
    }

    /// Mutable access to the element at the front of the queue.
    pub fn front_mut(&mut self) -> Option<&mut T> {
        if self.len == 0 {
            None
        } else {
            self.ring[self.head].as_mut()
        }
    }

    /// Removes and returns the first element, in queue order, for which `f`
    /// returns true. The remaining elements keep their relative order.
    pub fn remove_first<F>(&mut self, mut f: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let found = (0..self.len).find(|&i| match self.ring[self.slot(i)] {
            Some(ref val) => f(val),
            None => false,
        })?;

        let at = self.slot(found);
        let removed = self.ring[at].take();
        // Close the gap by shifting every later element one slot forward.
        for i in found..self.len - 1 {
            let (src, dst) = (self.slot(i + 1), self.slot(i));
            self.ring[dst] = self.ring[src].take();
        }
        self.len -= 1;
        removed
    }
}

impl<T, const N: usize> Queue<T> for RingBuffer<T, N> {
    fn has_elements(&self) -> bool {
        self.len != 0
    }

    fn is_full(&self) -> bool {
        self.len == N
    }

    fn len(&self) -> usize {
        self.len
    }

    fn enqueue(&mut self, val: T) -> Result<(), T> {
        if self.is_full() {
            Err(val)
        } else {
            let tail = self.slot(self.len);
            self.ring[tail] = Some(val);
            self.len += 1;
            Ok(())
        }
    }

    fn dequeue(&mut self) -> Option<T> {
        if self.has_elements() {
            let val = self.ring[self.head].take();
            self.head = (self.head + 1) % N;
            self.len -= 1;
            val
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::queue::Queue;
    use super::RingBuffer;

    #[test]
    fn test_enqueue_dequeue() {
        const LEN: usize = 10;
        let mut buf: RingBuffer<usize, LEN> = RingBuffer::new();

        for _ in 0..2 * LEN {
            assert_eq!(buf.enqueue(42), Ok(()));
            assert_eq!(buf.len(), 1);
            assert!(buf.has_elements());

            assert_eq!(buf.dequeue(), Some(42));
            assert_eq!(buf.len(), 0);
            assert!(!buf.has_elements());
        }
    }

    // Enqueue integers 1 <= n <= len, checking that it succeeds and that the
    // queue is full at the end.
    fn enqueue_iota<const N: usize>(buf: &mut RingBuffer<usize, N>) {
        for i in 1..=N {
            assert!(!buf.is_full());
            assert_eq!(buf.enqueue(i), Ok(()));
            assert_eq!(buf.len(), i);
        }

        assert!(buf.is_full());
        assert_eq!(buf.enqueue(0), Err(0));
    }

    fn dequeue_iota<const N: usize>(buf: &mut RingBuffer<usize, N>) {
        for i in 1..=N {
            assert_eq!(buf.front_mut().copied(), Some(i));
            assert_eq!(buf.dequeue(), Some(i));
            assert!(!buf.is_full());
        }

        assert!(!buf.has_elements());
        assert_eq!(buf.dequeue(), None);
    }

    #[test]
    fn test_refill_after_wrap() {
        let mut buf: RingBuffer<usize, 4> = RingBuffer::new();

        // Move the head off zero so later fills wrap around the array end.
        for _ in 0..3 {
            assert_eq!(buf.enqueue(0), Ok(()));
            assert_eq!(buf.dequeue(), Some(0));
        }

        for _ in 0..5 {
            enqueue_iota(&mut buf);
            dequeue_iota(&mut buf);
        }
    }

    #[test]
    fn test_remove_first_keeps_order() {
        let mut buf: RingBuffer<usize, 5> = RingBuffer::new();
        assert_eq!(buf.enqueue(9), Ok(()));
        assert_eq!(buf.dequeue(), Some(9));
        enqueue_iota(&mut buf);

        assert_eq!(buf.remove_first(|x| x % 2 == 0), Some(2));
        assert_eq!(buf.remove_first(|&x| x == 7), None);
        assert_eq!(buf.len(), 4);

        assert_eq!(buf.dequeue(), Some(1));
        assert_eq!(buf.dequeue(), Some(3));
        assert_eq!(buf.dequeue(), Some(4));
        assert_eq!(buf.dequeue(), Some(5));
        assert_eq!(buf.dequeue(), None);
    }

    #[test]
    fn test_front_mut_edits_head_in_place() {
        let mut buf: RingBuffer<[u8; 2], 2> = RingBuffer::new();
        assert!(buf.front_mut().is_none());
        assert_eq!(buf.enqueue([1, 2]), Ok(()));
        assert_eq!(buf.enqueue([3, 4]), Ok(()));
        if let Some(head) = buf.front_mut() {
            head[0] = 7;
        }
        assert_eq!(buf.dequeue(), Some([7, 2]));
        assert_eq!(buf.dequeue(), Some([3, 4]));
        assert_eq!(buf.len(), 0);
    }
}

// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use arrayvec::ArrayVec;
use std::fmt::{Debug, Formatter, Result};

// The maximum number of elements a chunk can hold.
const CHUNK_CAP: usize = 60;

/// An append-only queue backed by a list of fixed-capacity chunks.
///
/// Pushing never moves elements that are already stored, so a [`Cursor`]
/// taken before a push can keep draining and will eventually observe the
/// pushed element. The solver relies on this to consume Addr edges and
/// inter-procedural edges that are discovered while it is already running.
pub struct ChunkedQueue<T> {
    chunks: Vec<ArrayVec<T, CHUNK_CAP>>,
    len: usize,
}

impl<T: Debug> Debug for ChunkedQueue<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> Default for ChunkedQueue<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// A detached read position into a [`ChunkedQueue`].
///
/// Cursors are cheap to copy and stay valid across pushes; they only ever
/// move forward.
#[derive(Clone, Copy, Debug, Default)]
pub struct Cursor {
    chunk: usize,
    index: usize,
}

impl<T> ChunkedQueue<T> {
    pub fn new() -> Self {
        ChunkedQueue {
            chunks: vec![ArrayVec::new()],
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends an element to the back of the queue.
    pub fn push(&mut self, elem: T) {
        if self.chunks.last().unwrap().is_full() {
            self.chunks.push(ArrayVec::new());
        }
        self.chunks.last_mut().unwrap().push(elem);
        self.len += 1;
    }

    /// Returns a cursor positioned at the front of the queue.
    #[inline]
    pub fn cursor(&self) -> Cursor {
        Cursor::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.chunks.iter().flat_map(|c| c.iter())
    }
}

impl<T: Copy> ChunkedQueue<T> {
    /// Returns the element under `cursor` and advances it, or `None` when the
    /// cursor has caught up with the tail of the queue.
    pub fn fetch(&self, cursor: &mut Cursor) -> Option<T> {
        loop {
            let chunk = self.chunks.get(cursor.chunk)?;
            if cursor.index < chunk.len() {
                let elem = chunk[cursor.index];
                cursor.index += 1;
                return Some(elem);
            }
            // Only move past a chunk once it can no longer grow.
            if chunk.is_full() {
                cursor.chunk += 1;
                cursor.index = 0;
            } else {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_iterate() {
        let mut queue = ChunkedQueue::new();
        for i in 0..200u32 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 200);
        let collected: Vec<u32> = queue.iter().copied().collect();
        assert_eq!(collected, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn cursor_survives_growth() {
        let mut queue = ChunkedQueue::new();
        let mut cursor = queue.cursor();
        assert_eq!(queue.fetch(&mut cursor), None);

        queue.push(1u32);
        queue.push(2);
        assert_eq!(queue.fetch(&mut cursor), Some(1));

        // Push enough to spill into fresh chunks while the cursor is live.
        for i in 3..150 {
            queue.push(i);
        }
        let mut drained = vec![2];
        while let Some(elem) = queue.fetch(&mut cursor) {
            drained.push(elem);
        }
        assert_eq!(drained, (2..150).collect::<Vec<_>>());
    }

    #[test]
    fn independent_cursors() {
        let mut queue = ChunkedQueue::new();
        for i in 0..10u32 {
            queue.push(i);
        }
        let mut a = queue.cursor();
        let mut b = queue.cursor();
        assert_eq!(queue.fetch(&mut a), Some(0));
        assert_eq!(queue.fetch(&mut a), Some(1));
        assert_eq!(queue.fetch(&mut b), Some(0));
    }
}

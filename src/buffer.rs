//! Fixed pool of reference-counted render buffers.
//!
//! The pool starts with two base buffers. Each mix node donates its own
//! buffer the first time it mixes, so the pool grows with the graph but
//! never allocates on the render thread: the slot vector is reserved up
//! front and every buffer's memory is allocated on the API thread.

use crate::node::NodeId;

/// Number of buffers every pool starts with.
pub const BASE_BUFFERS: usize = 2;

struct SharedBuffer {
    data: Box<[f32]>,
    refs: u32,
    owner: Option<NodeId>,
}

/// A counted reference to a pool buffer.
///
/// Handles are not `Clone`; use [`BufferPool::retain`] for another reference
/// and give each one back with [`BufferPool::release`].
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct BufferHandle(usize);

pub struct BufferPool {
    bufs: Vec<SharedBuffer>,
    buffer_len: usize,
}

impl BufferPool {
    /// Creates a pool of [`BASE_BUFFERS`] buffers of `buffer_len` samples,
    /// with room for `extra` donated buffers.
    pub fn new(buffer_len: usize, extra: usize) -> Self {
        let mut bufs = Vec::with_capacity(BASE_BUFFERS + extra);
        for _ in 0..BASE_BUFFERS {
            bufs.push(SharedBuffer {
                data: vec![0.0; buffer_len].into_boxed_slice(),
                refs: 0,
                owner: None,
            });
        }
        Self { bufs, buffer_len }
    }

    /// Returns the first unreferenced buffer, or `None` if all are in use.
    pub fn acquire(&mut self) -> Option<BufferHandle> {
        match self.bufs.iter().position(|b| b.refs == 0) {
            Some(i) => {
                self.bufs[i].refs = 1;
                Some(BufferHandle(i))
            }
            None => {
                tracing::error!("out of buffers ({} in pool)", self.bufs.len());
                None
            }
        }
    }

    pub fn retain(&mut self, handle: &BufferHandle) -> BufferHandle {
        self.bufs[handle.0].refs += 1;
        BufferHandle(handle.0)
    }

    pub fn release(&mut self, handle: BufferHandle) {
        let buf = &mut self.bufs[handle.0];
        debug_assert!(buf.refs > 0);
        buf.refs = buf.refs.saturating_sub(1);
    }

    #[inline]
    pub fn get(&self, handle: &BufferHandle) -> &[f32] {
        &self.bufs[handle.0].data
    }

    #[inline]
    pub fn get_mut(&mut self, handle: &BufferHandle) -> &mut [f32] {
        &mut self.bufs[handle.0].data
    }

    /// Borrows two distinct buffers at once, `(a, b)`.
    pub fn pair_mut(&mut self, a: &BufferHandle, b: &BufferHandle) -> (&mut [f32], &mut [f32]) {
        assert_ne!(a.0, b.0, "pair_mut on the same buffer");
        if a.0 < b.0 {
            let (lo, hi) = self.bufs.split_at_mut(b.0);
            (&mut lo[a.0].data, &mut hi[0].data)
        } else {
            let (lo, hi) = self.bufs.split_at_mut(a.0);
            (&mut hi[0].data, &mut lo[b.0].data)
        }
    }

    /// Donates a buffer owned by `owner`.
    ///
    /// Hands the buffer back if the pool is at its reserved capacity.
    pub fn add(&mut self, data: Box<[f32]>, owner: NodeId) -> Result<(), Box<[f32]>> {
        if self.bufs.len() == self.bufs.capacity() || data.len() != self.buffer_len {
            return Err(data);
        }
        self.bufs.push(SharedBuffer {
            data,
            refs: 0,
            owner: Some(owner),
        });
        Ok(())
    }

    /// Takes back the buffer donated by `owner`.
    ///
    /// Only call this between render passes; it may move other buffers.
    pub fn remove(&mut self, owner: NodeId) -> Option<Box<[f32]>> {
        let i = self.bufs.iter().position(|b| b.owner == Some(owner))?;
        debug_assert_eq!(self.bufs[i].refs, 0);
        Some(self.bufs.swap_remove(i).data)
    }

    /// Number of buffers currently in the pool.
    #[inline]
    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    /// Number of buffers with outstanding references.
    pub fn in_use(&self) -> usize {
        self.bufs.iter().filter(|b| b.refs > 0).count()
    }

    #[inline]
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(n: u32) -> NodeId {
        NodeId::from_raw(n, 0)
    }

    #[test]
    fn base_pool_is_two_buffers() {
        let mut pool = BufferPool::new(8, 0);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.len(), BASE_BUFFERS);
        pool.release(a);
        let c = pool.acquire().unwrap();
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn retained_buffer_is_not_reacquired() {
        let mut pool = BufferPool::new(4, 0);
        let a = pool.acquire().unwrap();
        let a2 = pool.retain(&a);
        pool.release(a);
        let b = pool.acquire().unwrap();
        assert_ne!(a2, b);
        assert!(pool.acquire().is_none());
        pool.release(a2);
        pool.release(b);
    }

    #[test]
    fn donated_buffers_respect_capacity() {
        let mut pool = BufferPool::new(4, 1);
        assert!(pool.add(vec![0.0; 4].into_boxed_slice(), id(1)).is_ok());
        assert!(pool.add(vec![0.0; 4].into_boxed_slice(), id(2)).is_err());
        assert_eq!(pool.len(), 3);
        assert!(pool.remove(id(1)).is_some());
        assert!(pool.remove(id(1)).is_none());
        assert_eq!(pool.len(), BASE_BUFFERS);
    }

    #[test]
    fn pair_mut_splits() {
        let mut pool = BufferPool::new(2, 0);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        {
            let (x, y) = pool.pair_mut(&b, &a);
            x[0] = 1.0;
            y[0] = 2.0;
        }
        assert_eq!(pool.get(&b)[0], 1.0);
        assert_eq!(pool.get(&a)[0], 2.0);
        pool.release(a);
        pool.release(b);
    }

    proptest! {
        #[test]
        fn never_exceeds_base_buffers(ops in proptest::collection::vec(any::<bool>(), 0..64)) {
            let mut pool = BufferPool::new(16, 0);
            let mut held = Vec::new();
            for acquire in ops {
                if acquire {
                    if let Some(h) = pool.acquire() {
                        held.push(h);
                    }
                } else if let Some(h) = held.pop() {
                    pool.release(h);
                }
                prop_assert!(held.len() <= BASE_BUFFERS);
                prop_assert_eq!(pool.len(), BASE_BUFFERS);
                prop_assert_eq!(pool.in_use(), held.len());
            }
            for h in held {
                pool.release(h);
            }
        }
    }
}

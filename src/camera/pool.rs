use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Fixed-size pool of reusable frame buffers.
///
/// The capture feed acquires one buffer per frame; dropping the
/// [`PooledBuffer`] returns it. When every buffer is checked out the feed has
/// to discard the frame, which bounds memory regardless of how slowly frames
/// are consumed.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
    buffer_len: usize,
    outstanding: AtomicUsize,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers of `buffer_len` bytes each.
    /// Buffers are allocated lazily on first use.
    pub fn new(capacity: usize, buffer_len: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(capacity)),
                capacity,
                buffer_len,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Check out a zero-initialised or recycled buffer, or `None` if the pool
    /// is exhausted.
    pub fn acquire(&self) -> Option<PooledBuffer> {
        let inner = &self.inner;
        inner
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < inner.capacity).then_some(n + 1)
            })
            .ok()?;

        let data = inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; inner.buffer_len]);

        Some(PooledBuffer {
            data,
            pool: Some(Arc::downgrade(&self.inner)),
        })
    }

    /// Number of buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn buffer_len(&self) -> usize {
        self.inner.buffer_len
    }
}

/// Frame storage checked out of a [`BufferPool`], or detached heap storage.
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Option<Weak<PoolInner>>,
}

impl PooledBuffer {
    /// Wrap storage that does not belong to any pool.
    pub fn detached(data: Vec<u8>) -> Self {
        Self { data, pool: None }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(inner) = self.pool.take().and_then(|weak| weak.upgrade()) else {
            return;
        };
        let data = std::mem::take(&mut self.data);
        if data.len() == inner.buffer_len {
            inner.free.lock().push(data);
        }
        inner.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_returns_buffer_of_configured_length() {
        let pool = BufferPool::new(2, 16);
        let buf = pool.acquire().unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn exhausted_pool_returns_none() {
        let pool = BufferPool::new(2, 4);
        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn dropping_buffer_returns_it_to_pool() {
        let pool = BufferPool::new(1, 4);
        {
            let mut buf = pool.acquire().unwrap();
            buf[0] = 7;
        }
        assert_eq!(pool.outstanding(), 0);
        let recycled = pool.acquire().unwrap();
        assert_eq!(recycled[0], 7, "storage should be reused, not reallocated");
    }

    #[test]
    fn detached_buffer_does_not_touch_any_pool() {
        let buf = PooledBuffer::detached(vec![1, 2, 3]);
        assert_eq!(&*buf, &[1, 2, 3]);
    }

    #[test]
    fn buffer_outliving_pool_drops_cleanly() {
        let pool = BufferPool::new(1, 4);
        let buf = pool.acquire().unwrap();
        drop(pool);
        drop(buf);
    }

    #[test]
    fn pool_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BufferPool>();
        assert_send_sync::<PooledBuffer>();
    }
}

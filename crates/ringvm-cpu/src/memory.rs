//! Pinned host memory and the per-stream allocation table.
//!
//! Pinned (page-locked) host memory lets DMA engines copy between host and
//! device without a bounce buffer. Allocations are keyed by the
//! [`LogicalObjectId`] the instruction addressed them with.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use ringvm_core::error::{Result, VmError};
use ringvm_core::LogicalObjectId;

/// Zero-initialized host allocation aligned to `T`.
///
/// Stands in for page-locked memory: the buffer is neither pinned nor
/// page-aligned.
pub struct PinnedMemory<T: Copy> {
    ptr: NonNull<T>,
    len: usize,
    layout: Layout,
    _marker: PhantomData<T>,
}

impl<T: Copy> PinnedMemory<T> {
    /// Allocate `count` zeroed elements.
    pub fn new(count: usize) -> Result<Self> {
        if count == 0 || std::mem::size_of::<T>() == 0 {
            return Err(VmError::InvalidConfig(
                "cannot allocate a zero-sized pinned buffer".to_string(),
            ));
        }

        let layout = Layout::array::<T>(count).map_err(|_| VmError::HostAllocationFailed {
            size: count.saturating_mul(std::mem::size_of::<T>()),
        })?;

        // A platform pinning call (cuMemAllocHost, mlock) would go here.
        // SAFETY: layout has non-zero size, checked above.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw as *mut T).ok_or(VmError::HostAllocationFailed {
            size: layout.size(),
        })?;

        Ok(Self {
            ptr,
            len: count,
            layout,
            _marker: PhantomData,
        })
    }

    /// Allocate and copy `data` in.
    pub fn from_slice(data: &[T]) -> Result<Self> {
        let mut mem = Self::new(data.len())?;
        mem.as_mut_slice().copy_from_slice(data);
        Ok(mem)
    }

    /// Contents.
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: ptr is valid for len initialized elements for our lifetime.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Mutable contents.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as above, and &mut self guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; empty allocations are rejected.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.layout.size()
    }
}

impl<T: Copy> Drop for PinnedMemory<T> {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this exact layout.
        unsafe {
            dealloc(self.ptr.as_ptr() as *mut u8, self.layout);
        }
    }
}

// SAFETY: PinnedMemory owns its allocation exclusively.
unsafe impl<T: Copy + Send> Send for PinnedMemory<T> {}
unsafe impl<T: Copy + Sync> Sync for PinnedMemory<T> {}

/// Pinned host allocations owned by one stream.
#[derive(Default)]
pub struct HostMemoryTable {
    allocations: Mutex<HashMap<LogicalObjectId, PinnedMemory<u8>>>,
    allocated_bytes: AtomicUsize,
}

impl HostMemoryTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `size` bytes for a local object.
    pub fn allocate(&self, object: LogicalObjectId, size: usize) -> Result<()> {
        if object.is_remote() {
            return Err(VmError::RemoteObject(object));
        }

        let mut allocations = self.allocations.lock();
        if allocations.contains_key(&object) {
            return Err(VmError::ObjectAlreadyExists(object));
        }
        let memory = PinnedMemory::<u8>::new(size)?;
        self.allocated_bytes
            .fetch_add(memory.size_bytes(), Ordering::Relaxed);
        allocations.insert(object, memory);
        Ok(())
    }

    /// Release the allocation of `object`.
    pub fn free(&self, object: LogicalObjectId) -> Result<()> {
        let memory = self
            .allocations
            .lock()
            .remove(&object)
            .ok_or(VmError::ObjectNotFound(object))?;
        self.allocated_bytes
            .fetch_sub(memory.size_bytes(), Ordering::Relaxed);
        Ok(())
    }

    /// Run `f` over the bytes of `object`.
    pub fn with_bytes_mut<R>(
        &self,
        object: LogicalObjectId,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        let mut allocations = self.allocations.lock();
        let memory = allocations
            .get_mut(&object)
            .ok_or(VmError::ObjectNotFound(object))?;
        Ok(f(memory.as_mut_slice()))
    }

    /// Check whether `object` is allocated.
    pub fn contains(&self, object: LogicalObjectId) -> bool {
        self.allocations.lock().contains_key(&object)
    }

    /// Number of live allocations.
    pub fn len(&self) -> usize {
        self.allocations.lock().len()
    }

    /// Check if nothing is allocated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total live bytes.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.load(Ordering::Relaxed)
    }
}

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A thread-safe, reference-counted resource container with read-write locking.
///
/// Chunk volumes, mesh build slots and collider result cells are all shared between
/// the coordinating thread and the worker pool through an `MtResource`. Workers take
/// the lock only for the duration of one task; the coordinator never holds a guard
/// across a tick boundary.
///
/// # Type Parameters
/// - `T`: The type of the contained resource, must be `Send + Sync`
///
/// # Examples
///
/// ```
/// use voxel_chunk_pipeline::core::MtResource;
/// # use std::thread;
///
/// let density = MtResource::new(vec![0i16; 4]);
/// let worker_view = density.clone();
///
/// let handle = thread::spawn(move || {
///     worker_view.get_mut()[2] = 100;
/// });
///
/// handle.join().unwrap();
/// assert_eq!(density.get()[2], 100);
/// assert_eq!(density.share_count(), 1);
/// ```
///
/// # Performance Considerations
/// - Read operations (`get()`) can occur concurrently, so several meshing stages
///   can sample the same volume at once
/// - Write operations (`get_mut()`) are exclusive; callers order writes through
///   job handles instead of relying on lock contention
pub struct MtResource<T: Send + Sync> {
    pub resource: Arc<RwLock<T>>,
}

impl<T: Send + Sync + 'static> MtResource<T> {
    /// Creates a new `MtResource` containing the given value.
    ///
    /// # Arguments
    /// * `resource` - The value to be stored in the resource
    ///
    /// # Returns
    /// A new `MtResource` containing the provided value
    pub fn new(resource: T) -> Self {
        Self {
            resource: Arc::new(RwLock::new(resource)),
        }
    }

    /// Returns a read-only guard that allows reading the contained value.
    ///
    /// # Panics
    /// Panics if the lock is poisoned, which only happens after a worker task
    /// panicked while writing.
    pub fn get(&self) -> RwLockReadGuard<'_, T> {
        self.resource.read().unwrap()
    }

    /// Returns a mutable guard that allows modifying the contained value.
    ///
    /// # Panics
    /// Panics if the lock is poisoned.
    pub fn get_mut(&self) -> RwLockWriteGuard<'_, T> {
        self.resource.write().unwrap()
    }

    /// Number of live handles to the underlying value, this one included.
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.resource)
    }

    /// Whether both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.resource, &other.resource)
    }
}

impl<T: Send + Sync + Default + 'static> Default for MtResource<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Send + Sync> Clone for MtResource<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
        }
    }
}

use std::any::Any;
use std::ptr;

/// Backing storage for one cloned parameter graph.
///
/// Every allocation is a separate heap block that is never resized, so
/// pointers handed out stay valid until the arena is dropped, even if the
/// arena itself is moved.
#[derive(Default)]
pub struct CloneArena {
    blocks: Vec<Box<dyn Any>>,
    bytes: usize,
}

// SAFETY: the arena only holds plain-old-data copies of Vulkan structs. After
// cloning completes nothing writes to the blocks, and they are freed only when
// the owning wrapper is dropped.
unsafe impl Send for CloneArena {}
unsafe impl Sync for CloneArena {}

impl CloneArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy one value into the arena.
    pub fn alloc<T: Copy + 'static>(&mut self, value: T) -> *mut T {
        self.alloc_slice(std::slice::from_ref(&value))
    }

    /// Copy a slice into the arena. Empty slices yield a null pointer.
    pub fn alloc_slice<T: Copy + 'static>(&mut self, values: &[T]) -> *mut T {
        if values.is_empty() {
            return ptr::null_mut();
        }
        let mut block: Vec<T> = values.to_vec();
        let data = block.as_mut_ptr();
        self.bytes += std::mem::size_of_val(values);
        self.blocks.push(Box::new(block));
        data
    }

    /// Total payload bytes held.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn allocations(&self) -> usize {
        self.blocks.len()
    }
}

impl std::fmt::Debug for CloneArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneArena")
            .field("allocations", &self.blocks.len())
            .field("bytes", &self.bytes)
            .finish()
    }
}

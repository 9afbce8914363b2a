//! Deep copies of driver-facing parameter structs.
//!
//! Create-info structs handed to the driver point at caller-owned arrays,
//! strings and `p_next` extension chains. A [`Cloned`] value owns a copy of the
//! whole graph in a private [`CloneArena`], so a shadow object can keep it
//! after the call returns.
//!
//! Unrecognized `p_next` links are handled per [`UnknownExtensionPolicy`]:
//! `Skip` splices the link out (the size of an unknown structure cannot be
//! known, so its bytes cannot be copied) and records its `sType`; `Reject`
//! fails the clone.

mod arena;
mod extensions;
mod structs;

use std::ffi::{c_char, c_void, CStr};
use std::ptr;

use ash::vk;
use tracing::warn;
use vkcap_core::UnknownExtensionPolicy;

use crate::error::CloneError;

pub use arena::CloneArena;
pub use extensions::is_known_extension;
pub(crate) use structs::has_immutable_samplers;

/// A struct that can be deep-copied into a [`CloneArena`].
pub trait DeepClone {
    /// The same struct with every borrowed pointer re-targeted at the arena.
    type Owned: Copy + 'static;

    /// # Safety
    /// Every pointer reachable from `self` must be valid for reads according
    /// to the Vulkan valid-usage rules for this struct.
    unsafe fn deep_clone(&self, cloner: &mut Cloner<'_>) -> Result<Self::Owned, CloneError>;
}

/// Cloning context: destination arena plus the unknown-extension policy.
pub struct Cloner<'a> {
    arena: &'a mut CloneArena,
    policy: UnknownExtensionPolicy,
    skipped: Vec<vk::StructureType>,
}

impl<'a> Cloner<'a> {
    pub fn new(arena: &'a mut CloneArena, policy: UnknownExtensionPolicy) -> Self {
        Self {
            arena,
            policy,
            skipped: Vec::new(),
        }
    }

    pub fn alloc<T: Copy + 'static>(&mut self, value: T) -> *mut T {
        self.arena.alloc(value)
    }

    /// Copy a counted array of plain values.
    ///
    /// # Safety
    /// `ptr` must be null or valid for `len` reads.
    pub unsafe fn slice<T: Copy + 'static>(&mut self, ptr: *const T, len: usize) -> *const T {
        if ptr.is_null() || len == 0 {
            return ptr::null();
        }
        let src = unsafe { std::slice::from_raw_parts(ptr, len) };
        self.arena.alloc_slice(src).cast_const()
    }

    /// Copy a single optional plain value.
    ///
    /// # Safety
    /// `ptr` must be null or valid for one read.
    pub unsafe fn one<T: Copy + 'static>(&mut self, ptr: *const T) -> *const T {
        unsafe { self.slice(ptr, 1) }
    }

    /// Deep-copy a counted array of structs that carry their own pointers.
    ///
    /// # Safety
    /// `ptr` must be null or valid for `len` reads, each element satisfying
    /// [`DeepClone::deep_clone`]'s contract.
    pub unsafe fn deep_slice<T: DeepClone>(
        &mut self,
        ptr: *const T,
        len: usize,
    ) -> Result<*const T::Owned, CloneError> {
        if ptr.is_null() || len == 0 {
            return Ok(ptr::null());
        }
        let src = unsafe { std::slice::from_raw_parts(ptr, len) };
        let mut owned = Vec::with_capacity(len);
        for item in src {
            owned.push(unsafe { item.deep_clone(self) }?);
        }
        Ok(self.arena.alloc_slice(&owned).cast_const())
    }

    /// Deep-copy a single optional struct.
    ///
    /// # Safety
    /// As for [`Cloner::deep_slice`] with a length of one.
    pub unsafe fn deep_one<T: DeepClone>(
        &mut self,
        ptr: *const T,
    ) -> Result<*const T::Owned, CloneError> {
        unsafe { self.deep_slice(ptr, 1) }
    }

    /// Copy a null-terminated string, terminator included.
    ///
    /// # Safety
    /// `ptr` must be null or point at a null-terminated string.
    pub unsafe fn cstr(&mut self, ptr: *const c_char) -> *const c_char {
        if ptr.is_null() {
            return ptr::null();
        }
        let bytes = unsafe { CStr::from_ptr(ptr) }.to_bytes_with_nul();
        let chars: Vec<c_char> = bytes.iter().map(|&b| b as c_char).collect();
        self.arena.alloc_slice(&chars).cast_const()
    }

    /// Copy an array of null-terminated strings.
    ///
    /// # Safety
    /// `ptr` must be null or valid for `len` reads of string pointers, each of
    /// which satisfies [`Cloner::cstr`].
    pub unsafe fn cstr_array(
        &mut self,
        ptr: *const *const c_char,
        len: usize,
    ) -> *const *const c_char {
        if ptr.is_null() || len == 0 {
            return ptr::null();
        }
        let src = unsafe { std::slice::from_raw_parts(ptr, len) };
        let mut owned = Vec::with_capacity(len);
        for &s in src {
            owned.push(unsafe { self.cstr(s) });
        }
        self.arena.alloc_slice(&owned).cast_const()
    }

    /// Copy an opaque byte blob (pipeline cache data, specialization data).
    ///
    /// # Safety
    /// `ptr` must be null or valid for `len` byte reads.
    pub unsafe fn bytes(&mut self, ptr: *const c_void, len: usize) -> *const c_void {
        unsafe { self.slice(ptr.cast::<u8>(), len) }.cast()
    }

    /// Copy a `p_next` chain, preserving the order of the links kept.
    ///
    /// # Safety
    /// `p_next` must be null or the head of a valid Vulkan structure chain.
    pub unsafe fn chain(&mut self, p_next: *const c_void) -> Result<*const c_void, CloneError> {
        let mut node = p_next;
        while !node.is_null() {
            if let Some(cloned) = unsafe { extensions::clone_link(self, node) }? {
                return Ok(cloned);
            }
            let base = unsafe { &*node.cast::<vk::BaseInStructure<'_>>() };
            match self.policy {
                UnknownExtensionPolicy::Reject => {
                    return Err(CloneError::UnknownExtension(base.s_type));
                }
                UnknownExtensionPolicy::Skip => {
                    warn!("skipping unrecognized extension {:?} while cloning", base.s_type);
                    self.skipped.push(base.s_type);
                    node = base.p_next.cast();
                }
            }
        }
        Ok(ptr::null())
    }

    fn into_skipped(self) -> Vec<vk::StructureType> {
        self.skipped
    }
}

/// An owned deep copy of a Vulkan struct graph.
pub struct Cloned<T> {
    value: T,
    skipped: Vec<vk::StructureType>,
    arena: CloneArena,
}

// SAFETY: the raw pointers inside `value` only reference `arena`, which is
// owned by this struct and immutable after construction.
unsafe impl<T> Send for Cloned<T> {}
unsafe impl<T> Sync for Cloned<T> {}

impl<T: Copy + 'static> Cloned<T> {
    /// Deep-copy `source` into a fresh arena.
    ///
    /// # Safety
    /// See [`DeepClone::deep_clone`].
    pub unsafe fn new<S>(source: &S, policy: UnknownExtensionPolicy) -> Result<Self, CloneError>
    where
        S: DeepClone<Owned = T> + ?Sized,
    {
        let mut arena = CloneArena::new();
        let mut cloner = Cloner::new(&mut arena, policy);
        let value = unsafe { source.deep_clone(&mut cloner) }?;
        let skipped = cloner.into_skipped();
        Ok(Self {
            value,
            skipped,
            arena,
        })
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Structure types dropped from `p_next` chains under the `Skip` policy.
    pub fn skipped_extensions(&self) -> &[vk::StructureType] {
        &self.skipped
    }

    pub fn arena(&self) -> &CloneArena {
        &self.arena
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Cloned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cloned")
            .field("value", &self.value)
            .field("skipped", &self.skipped)
            .field("arena", &self.arena)
            .finish()
    }
}

/// Structure types of the links in a `p_next` chain, in order.
///
/// # Safety
/// `p_next` must be null or the head of a valid structure chain.
pub unsafe fn chain_types(p_next: *const c_void) -> Vec<vk::StructureType> {
    let mut types = Vec::new();
    let mut node = p_next.cast::<vk::BaseInStructure<'_>>();
    while !node.is_null() {
        let base = unsafe { &*node };
        types.push(base.s_type);
        node = base.p_next;
    }
    types
}

/// Reinterpret a struct under a different lifetime parameter.
///
/// # Safety
/// `S` and `D` must be the same type up to lifetimes.
unsafe fn shallow<S, D>(src: &S) -> D {
    debug_assert_eq!(std::mem::size_of::<S>(), std::mem::size_of::<D>());
    unsafe { ptr::read((src as *const S).cast::<D>()) }
}

//! Non-owning view of caller memory exposed to a script invocation.

use std::ffi::c_void;
use std::ptr::NonNull;

use deno_core::v8;

/// A caller-owned byte region handed to the entry function as an
/// `ArrayBuffer`.
///
/// The view never frees or copies the memory. Whoever creates it promises the
/// region stays valid, and is not touched by anyone else, for every run that
/// observes this binding.
#[derive(Debug, Clone, Copy)]
pub struct ExternalBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the view is only dereferenced by the isolate thread while a run is
// in flight, and the constructor contract gives that thread exclusive access
// for the duration of the run.
unsafe impl Send for ExternalBuffer {}
unsafe impl Sync for ExternalBuffer {}

impl ExternalBuffer {
    /// Wrap `len` bytes starting at `ptr`. Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `ptr..ptr + len` must be valid for reads and writes, and must not be
    /// accessed by the caller, until every run that uses this buffer has
    /// returned.
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, len })
    }

    /// Wrap a mutable slice, detaching it from its borrow.
    ///
    /// # Safety
    ///
    /// Same contract as [`ExternalBuffer::from_raw_parts`]: the slice must
    /// outlive every run that observes this binding.
    pub unsafe fn from_slice(slice: &mut [u8]) -> Self {
        Self {
            // A slice pointer is never null, even when empty.
            ptr: NonNull::new(slice.as_mut_ptr()).unwrap_or(NonNull::dangling()),
            len: slice.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Build a fresh `ArrayBuffer` over this memory with a no-op deleter.
    pub(crate) fn wrap<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
    ) -> v8::Local<'s, v8::ArrayBuffer> {
        if self.is_empty() {
            return v8::ArrayBuffer::new(scope, 0);
        }

        // SAFETY: validity and exclusivity are guaranteed by the constructor
        // contract; the deleter never frees the caller's memory.
        let store = unsafe {
            v8::ArrayBuffer::new_backing_store_from_ptr(
                self.ptr.as_ptr() as *mut c_void,
                self.len,
                leave_memory_alone,
                std::ptr::null_mut(),
            )
        };
        v8::ArrayBuffer::with_backing_store(scope, &store.make_shared())
    }
}

unsafe extern "C" fn leave_memory_alone(
    _data: *mut c_void,
    _len: usize,
    _deleter_data: *mut c_void,
) {
}

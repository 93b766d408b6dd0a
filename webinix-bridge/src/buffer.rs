//! Handing host-produced bytes to the native runtime.
//!
//! The runtime frees file-handler responses itself, so they must live in
//! memory it allocated. The handoff is: allocate exactly `len` bytes through
//! the runtime, copy through the runtime's own copy primitive, then pass the
//! pointer on. [`NativeBuffer`] is consumed by the handoff, so no host
//! reference to the allocation survives it; a buffer dropped before handoff
//! is returned to the runtime allocator.

use std::ffi::c_void;
use std::ptr::NonNull;

use crate::error::BridgeError;
use crate::native::{NativeRuntime, WindowHandle};

/// An allocation in the native runtime's heap, not yet handed off.
pub struct NativeBuffer<'a> {
    native: &'a dyn NativeRuntime,
    ptr: NonNull<c_void>,
    len: usize,
}

impl<'a> NativeBuffer<'a> {
    /// Allocate `bytes.len()` bytes natively and copy `bytes` into them.
    ///
    /// `bytes` must not be empty; a zero-length response has no buffer.
    pub fn copy_from(native: &'a dyn NativeRuntime, bytes: &[u8]) -> Result<Self, BridgeError> {
        debug_assert!(!bytes.is_empty());
        let len = bytes.len();
        let ptr = NonNull::new(native.malloc(len)).ok_or(BridgeError::AllocationFailed(len))?;
        let buffer = Self { native, ptr, len };
        unsafe {
            native.memcpy(buffer.ptr.as_ptr(), bytes.as_ptr().cast(), len);
        }
        Ok(buffer)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pass ownership of the allocation to the runtime as the file-handler
    /// response of `window`.
    pub fn hand_off(self, window: WindowHandle) {
        let this = std::mem::ManuallyDrop::new(self);
        this.native
            .set_file_handler_response(window, this.ptr.as_ptr().cast_const(), this.len);
    }
}

impl Drop for NativeBuffer<'_> {
    fn drop(&mut self) {
        unsafe { self.native.free(self.ptr.as_ptr()) }
    }
}

/// Deliver `body` as the file-handler response of `window`.
///
/// An empty body is answered with a null pointer and length 0, without
/// touching the allocator or the copy primitive. If the native allocation
/// fails, an empty response is still delivered so the request does not
/// hang, and the failure is returned.
pub fn deliver_file_response(
    native: &dyn NativeRuntime,
    window: WindowHandle,
    body: &[u8],
) -> Result<(), BridgeError> {
    if body.is_empty() {
        native.set_file_handler_response(window, std::ptr::null(), 0);
        return Ok(());
    }
    match NativeBuffer::copy_from(native, body) {
        Ok(buffer) => {
            tracing::trace!(window = %window, len = buffer.len(), "file response handed off");
            buffer.hand_off(window);
            Ok(())
        }
        Err(e) => {
            native.set_file_handler_response(window, std::ptr::null(), 0);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRuntime;

    #[test]
    fn allocation_has_exact_length_and_bytes_round_trip() {
        let native = MockRuntime::new();
        let body = "<html>héllo</html>".as_bytes();

        deliver_file_response(&native, WindowHandle(1), body).unwrap();

        assert_eq!(native.malloc_sizes(), vec![body.len()]);
        assert_eq!(native.memcpy_calls(), 1);
        let delivered = native.file_responses();
        assert_eq!(delivered, vec![(WindowHandle(1), body.to_vec())]);
        // Ownership moved to the runtime: nothing was freed by the host.
        assert_eq!(native.free_calls(), 0);
        assert_eq!(native.live_allocations(), 1);
    }

    #[test]
    fn binary_bodies_follow_the_same_path() {
        let native = MockRuntime::new();
        let body = [0u8, 159, 146, 150, 0, 255];
        deliver_file_response(&native, WindowHandle(2), &body).unwrap();
        assert_eq!(native.malloc_sizes(), vec![6]);
        assert_eq!(native.file_responses(), vec![(WindowHandle(2), body.to_vec())]);
    }

    #[test]
    fn empty_body_skips_allocation_and_copy() {
        let native = MockRuntime::new();
        deliver_file_response(&native, WindowHandle(1), b"").unwrap();

        assert!(native.malloc_sizes().is_empty());
        assert_eq!(native.memcpy_calls(), 0);
        assert_eq!(native.file_responses(), vec![(WindowHandle(1), Vec::new())]);
    }

    #[test]
    fn failed_allocation_still_answers() {
        let native = MockRuntime::new();
        native.fail_allocations(true);

        let err = deliver_file_response(&native, WindowHandle(1), b"data").unwrap_err();
        assert!(matches!(err, BridgeError::AllocationFailed(4)));
        assert_eq!(native.memcpy_calls(), 0);
        assert_eq!(native.file_responses(), vec![(WindowHandle(1), Vec::new())]);
    }

    #[test]
    fn buffer_dropped_before_handoff_is_freed() {
        let native = MockRuntime::new();
        {
            let buffer = NativeBuffer::copy_from(&native, b"abc").unwrap();
            assert_eq!(buffer.len(), 3);
        }
        assert_eq!(native.free_calls(), 1);
        assert_eq!(native.live_allocations(), 0);
    }
}

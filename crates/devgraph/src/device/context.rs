//! Thread-local current-stream context.
//!
//! Array operations never take a stream argument: they enqueue onto the current stream of the
//! array's device. The current stream is the most recently pushed stream for that device on this
//! thread, or the device's default stream when none is pushed.
//!
//! ```rust,ignore
//! let side = device.new_stream()?;
//! with_stream(&side, || {
//!     // Everything in this scope is enqueued on `side`.
//!     x.add(&y)
//! })?;
//! ```

use std::cell::RefCell;

use super::stream::Stream;
use super::DeviceId;

thread_local! {
    static STREAM_STACK: RefCell<Vec<Stream>> = const { RefCell::new(Vec::new()) };
}

/// Pops the pushed stream when dropped, also during unwinding.
pub struct StreamGuard {
    active: bool,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.active {
            STREAM_STACK.with(|stack| {
                stack.borrow_mut().pop();
            });
            self.active = false;
        }
    }
}

/// Makes `stream` current for its device on this thread until the guard is dropped.
pub fn push_stream(stream: Stream) -> StreamGuard {
    STREAM_STACK.with(|stack| {
        stack.borrow_mut().push(stream);
    });
    StreamGuard { active: true }
}

/// Runs `f` with `stream` installed as the current stream of its device.
pub fn with_stream<F, R>(stream: &Stream, f: F) -> R
where
    F: FnOnce() -> R,
{
    let guard = push_stream(stream.clone());
    let result = f();
    drop(guard);
    result
}

/// Returns the innermost pushed stream belonging to `device`, if any.
pub(crate) fn pushed_stream(device: DeviceId) -> Option<Stream> {
    STREAM_STACK.with(|stack| {
        stack
            .borrow()
            .iter()
            .rev()
            .find(|stream| stream.device_id() == device)
            .cloned()
    })
}

#[cfg(feature = "loom")]
pub use loom::sync::atomic::{fence, AtomicI32, AtomicPtr, AtomicU32, AtomicUsize, Ordering};
#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{fence, AtomicI32, AtomicPtr, AtomicU32, AtomicUsize, Ordering};

use std::time::Duration;

/// Bounded wait used by every spin-poll site (transient queue links, the
/// pause handshake, the stop handshake). Under loom it becomes a yield so
/// the model checker can schedule the peer thread.
///
/// 每个自旋轮询点（瞬态队列链接、暂停握手、停止握手）使用的有界等待。
/// 在 loom 下它变成 yield，以便模型检查器可以调度对端线程。
#[cfg(feature = "loom")]
pub fn poll_wait(_interval: Duration) {
    loom::thread::yield_now();
}

#[cfg(not(feature = "loom"))]
pub fn poll_wait(interval: Duration) {
    std::thread::sleep(interval);
}

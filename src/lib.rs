//! # rcu-reclaim
//!
//! A deferred-reclamation engine for userspace read-copy-update: producers
//! hand over "run this callback on this object after the next grace period"
//! requests from any thread, and dedicated worker threads execute them, each
//! batch preceded by a full grace-period wait so that no reader can still
//! observe the pre-unlink state of any object in the batch.
//!
//! - Per-worker multi-producer single-consumer **wait-free queues** keep the
//!   producer path free of locks.
//! - An edge-triggered **futex gate** lets idle workers block instead of
//!   spinning, without lost wakeups.
//! - Workers can be **per-CPU** (one pinned worker per core), **per-thread**
//!   (a dedicated worker for a high-priority producer) or the shared
//!   **default** worker, selected in that order.
//! - The lifecycle survives `fork()`: the child inherits pending callbacks
//!   and executes them on a fresh default worker.
//!
//! 一个用于用户态 RCU 的延迟回收引擎：生产者从任意线程递交
//! "在下一个宽限期之后对这个对象运行这个回调"的请求，专用工作线程
//! 执行它们，每批之前都等待一个完整的宽限期，使任何读者都不可能再
//! 观测到批内对象解链前的状态。
//!
//! ## Example
//! ```
//! use rcu_reclaim::ReclaimDomain;
//!
//! let domain = ReclaimDomain::new();
//!
//! // Readers pin themselves while they traverse shared structures.
//! {
//!     let _guard = domain.read_lock();
//!     // ... dereference RCU-protected pointers ...
//! }
//!
//! // A writer unlinks an object, then defers its release.
//! domain.defer_drop(Box::new(vec![1u32, 2, 3]));
//!
//! // Dropping the domain stops the workers and runs every callback.
//! drop(domain);
//! ```

mod defer;
mod domain;
mod error;
mod futex;
mod reader;
mod runner;
mod state;
mod sync;
mod wfq;

#[cfg(test)]
mod tests;

pub use defer::{ReclaimFn, ReclaimHead};
pub use domain::{DeferHandle, ReclaimDomain, ReclaimDomainBuilder};
pub use error::ReclaimError;
pub use reader::ReadGuard;
pub use runner::{CallbackRunner, RunnerFlags};

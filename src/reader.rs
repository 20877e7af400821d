use crate::state::{GraceState, ReaderSlot, INACTIVE_EPOCH};
use crate::sync::{fence, Ordering};
use std::cell::Cell;
use std::sync::Arc;

/// A thread's registration with the grace-period machinery.
///
/// One per thread per domain, created lazily and stored in the domain's
/// thread-local table. It is `!Sync` (due to `Cell`) and is only touched by
/// its owning thread. The pin count makes `read_lock()` reentrant.
///
/// 线程在宽限期机制中的注册。
/// 每个域每个线程一个，惰性创建并存放在域的线程本地表中。
/// 它是 `!Sync` 的（因为 `Cell`），只被其所属线程访问。
/// pin 计数使 `read_lock()` 可重入。
pub(crate) struct ReaderCtx {
    slot: Arc<ReaderSlot>,
    grace: Arc<GraceState>,
    nesting: Cell<usize>,
}

impl ReaderCtx {
    pub(crate) fn new(grace: Arc<GraceState>) -> Self {
        let slot = grace.register();
        ReaderCtx {
            slot,
            grace,
            nesting: Cell::new(0),
        }
    }

    /// Enter a read-side critical section.
    ///
    /// The first pin publishes the current global epoch into the slot and
    /// fences, so a concurrent grace period either observes the pin or is
    /// observed by the pinner's subsequent loads. Nested pins only bump the
    /// count.
    ///
    /// 进入读侧临界区。
    /// 第一次 pin 把当前全局纪元发布到槽里并加 fence，这样并发的宽限期
    /// 要么观测到这次 pin，要么被 pin 者后续的加载观测到。
    /// 嵌套的 pin 只增加计数。
    #[inline]
    pub(crate) fn read_lock(&self) -> ReadGuard<'_> {
        let nesting = self.nesting.get();
        if nesting == 0 {
            let epoch = self.grace.global_epoch.load(Ordering::Relaxed);
            self.slot.active_epoch.store(epoch, Ordering::Relaxed);
            fence(Ordering::SeqCst);
        }
        self.nesting.set(nesting + 1);
        ReadGuard { ctx: self }
    }

    #[inline]
    pub(crate) fn nesting(&self) -> usize {
        self.nesting.get()
    }

    #[inline]
    pub(crate) fn slot_ref(&self) -> &ReaderSlot {
        &self.slot
    }
}

impl Drop for ReaderCtx {
    fn drop(&mut self) {
        // The slot itself is swept from the registry by a later grace
        // period once this Arc is gone.
        // 这个 Arc 消失后，槽本身会被后续的宽限期从注册表中清理。
        self.slot
            .active_epoch
            .store(INACTIVE_EPOCH, Ordering::Release);
    }
}

/// A guard that keeps the current thread inside a read-side critical
/// section.
///
/// Obtained from [`crate::ReclaimDomain::read_lock`] or
/// [`crate::DeferHandle::read_lock`]. While any guard is held, no grace
/// period that started after the first pin can complete, so pointers read
/// from RCU-protected structures stay valid. `!Send` and `!Sync`; cloning
/// re-pins.
///
/// 将当前线程保持在读侧临界区内的守卫。
/// 通过 [`crate::ReclaimDomain::read_lock`] 或
/// [`crate::DeferHandle::read_lock`] 获得。只要持有任一守卫，
/// 在第一次 pin 之后开始的宽限期都无法完成，因此从受 RCU 保护的
/// 结构中读到的指针保持有效。`!Send` 且 `!Sync`；克隆即重新 pin。
#[must_use]
pub struct ReadGuard<'a> {
    ctx: &'a ReaderCtx,
}

impl<'a> Clone for ReadGuard<'a> {
    fn clone(&self) -> Self {
        let nesting = self.ctx.nesting.get();
        assert!(
            nesting > 0,
            "BUG: cloning a ReadGuard in an unpinned state (nesting = 0)"
        );
        self.ctx.nesting.set(nesting + 1);
        ReadGuard { ctx: self.ctx }
    }
}

impl<'a> Drop for ReadGuard<'a> {
    #[inline]
    fn drop(&mut self) {
        let nesting = self.ctx.nesting.get();
        assert!(
            nesting > 0,
            "BUG: dropping a ReadGuard in an unpinned state (nesting = 0)"
        );
        if nesting == 1 {
            self.ctx
                .slot
                .active_epoch
                .store(INACTIVE_EPOCH, Ordering::Release);
        }
        self.ctx.nesting.set(nesting - 1);
    }
}

use crate::sync::{fence, poll_wait, AtomicUsize, Ordering};
use antidote::Mutex;
use crossbeam_queue::SegQueue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::vec::Vec;

/// Represents a reader that is not currently inside a read-side critical
/// section and does not hold the grace-period machinery back.
/// 表示当前不在读侧临界区内、不阻碍宽限期机制的读者。
pub(crate) const INACTIVE_EPOCH: usize = usize::MAX;

/// Default interval for sweeping dead reader slots (in grace periods).
/// 清理死读者槽的默认间隔（以宽限期为单位）。
pub(crate) const DEFAULT_CLEANUP_INTERVAL: usize = 16;

/// Default poll interval for handshakes and transient queue links.
/// 握手和瞬态队列链接的默认轮询间隔。
pub(crate) const DEFAULT_HANDSHAKE_POLL: Duration = Duration::from_millis(1);

/// Default idle poll interval for realtime workers.
/// 实时工作线程的默认空闲轮询间隔。
pub(crate) const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(10);

/// A slot allocated for a reader thread to record its active epoch.
///
/// Cache-aligned to prevent false sharing between readers.
///
/// 为读者线程分配的槽，用于记录其活跃纪元。
/// 缓存对齐以防止读者之间的伪共享。
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct ReaderSlot {
    /// The epoch the reader entered its critical section at, or
    /// `INACTIVE_EPOCH`.
    /// 读者进入临界区时的纪元，或 `INACTIVE_EPOCH`。
    pub(crate) active_epoch: AtomicUsize,
}

impl ReaderSlot {
    pub(crate) fn new() -> Arc<ReaderSlot> {
        Arc::new(ReaderSlot {
            active_epoch: AtomicUsize::new(INACTIVE_EPOCH),
        })
    }
}

/// Grace-period state shared by all readers and workers of one domain.
///
/// New readers announce themselves through the lock-free pending queue so
/// that registration never contends with a grace period in flight; the
/// grace-period scan folds pending slots into the main list before each
/// wait.
///
/// 一个域内所有读者和工作线程共享的宽限期状态。
/// 新读者通过无锁待注册队列宣告自己，注册永远不会与进行中的宽限期
/// 争用；宽限期扫描在每次等待前把待注册槽并入主列表。
#[repr(align(64))]
pub(crate) struct GraceState {
    /// The global monotonic epoch counter.
    /// 全局单调纪元计数器。
    pub(crate) global_epoch: AtomicUsize,
    /// Registration requests from threads that have not been folded in yet.
    /// 尚未并入的线程注册请求。
    pending: SegQueue<Arc<ReaderSlot>>,
    /// All folded-in reader slots. Protected by a Mutex.
    /// 所有已并入的读者槽。由 Mutex 保护。
    readers: Mutex<Vec<Arc<ReaderSlot>>>,
    /// Serializes grace periods.
    /// 串行化宽限期。
    grace_lock: Mutex<()>,
    /// Grace periods completed since the last dead-slot sweep.
    /// 自上次死槽清理以来完成的宽限期数。
    sweep_counter: AtomicUsize,
    cleanup_interval: usize,
    handshake_poll: Duration,
}

impl GraceState {
    pub(crate) fn new(cleanup_interval: usize, handshake_poll: Duration) -> Self {
        GraceState {
            global_epoch: AtomicUsize::new(0),
            pending: SegQueue::new(),
            readers: Mutex::new(Vec::new()),
            grace_lock: Mutex::new(()),
            sweep_counter: AtomicUsize::new(0),
            cleanup_interval,
            handshake_poll,
        }
    }

    /// Register a new reader slot. Wait-free with respect to grace periods.
    /// 注册一个新的读者槽。相对宽限期是 wait-free 的。
    pub(crate) fn register(&self) -> Arc<ReaderSlot> {
        let slot = ReaderSlot::new();
        self.pending.push(Arc::clone(&slot));
        slot
    }

    /// Wait for a full grace period: every reader that was inside a
    /// read-side critical section when this call began has left it by the
    /// time this call returns.
    ///
    /// The scan runs in two phases, each advancing the global epoch and then
    /// waiting for every slot to be inactive or caught up. Two phases close
    /// the window where a reader has loaded the previous epoch but not yet
    /// published its slot. `self_slot` is the caller's own slot, if the
    /// calling thread is registered; it is quiesced for the duration of the
    /// wait so a worker can await a grace period without deadlocking on
    /// itself.
    ///
    /// 等待一个完整的宽限期：本次调用开始时处于读侧临界区内的每个读者，
    /// 在调用返回前都已离开。
    /// 扫描分两个阶段，每阶段推进全局纪元，然后等待每个槽不活跃或
    /// 已跟上。两个阶段关闭了读者已加载旧纪元但尚未发布其槽的窗口。
    /// `self_slot` 是调用线程自己的槽（若已注册）；在等待期间它被置为
    /// 静止，使工作线程等待宽限期时不会与自己死锁。
    pub(crate) fn synchronize(&self, self_slot: Option<&ReaderSlot>) {
        let started = Instant::now();

        // Quiesce the caller before taking the grace lock, not after: a
        // second synchronizer blocked on the lock must not hold the first
        // one's scan back with its own still-pinned slot.
        // 在拿宽限期锁之前而不是之后静止调用者：阻塞在锁上的第二个
        // 同步者不能用自己仍然 pin 住的槽拖住第一个的扫描。
        let saved = self_slot.map(|slot| {
            slot.active_epoch
                .swap(INACTIVE_EPOCH, Ordering::Release)
        });

        let _grace = self.grace_lock.lock();
        fence(Ordering::SeqCst);

        let mut readers = self.readers.lock();
        while let Some(slot) = self.pending.pop() {
            readers.push(slot);
        }

        for _phase in 0..2 {
            let target = self.global_epoch.fetch_add(1, Ordering::AcqRel) + 1;
            for slot in readers.iter() {
                loop {
                    let epoch = slot.active_epoch.load(Ordering::Acquire);
                    if epoch == INACTIVE_EPOCH || epoch >= target {
                        break;
                    }
                    poll_wait(self.handshake_poll);
                }
            }
        }

        // Slots whose owning handle is gone are only referenced by this
        // list; sweep them on the configured interval.
        // 所属句柄已消失的槽只被这个列表引用；按配置的间隔清理。
        let swept = self.sweep_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if self.cleanup_interval > 0 && swept % self.cleanup_interval == 0 {
            readers.retain(|slot| Arc::strong_count(slot) > 1);
        }
        let reader_count = readers.len();
        drop(readers);

        if let (Some(slot), Some(epoch)) = (self_slot, saved) {
            if epoch != INACTIVE_EPOCH {
                slot.active_epoch
                    .store(self.global_epoch.load(Ordering::Relaxed), Ordering::Release);
            }
        }
        fence(Ordering::SeqCst);

        tracing::debug!(
            grace_period_us = started.elapsed().as_micros() as u64,
            readers = reader_count,
            "grace period complete"
        );
    }

    /// Post-fork reset in the child: every thread but the caller is gone, so
    /// every slot but the caller's is stale.
    ///
    /// 子进程中的 fork 后重置：除调用者外所有线程都已消失，
    /// 因此除调用者的槽外所有槽都已失效。
    pub(crate) fn reset_for_child(&self, keep: Option<&ReaderSlot>) {
        let mut readers = self.readers.lock();
        // Fold pending registrations in first so the caller's slot is not
        // lost if it was still in flight.
        // 先并入待注册项，以免调用者的槽还在途中时被丢掉。
        while let Some(slot) = self.pending.pop() {
            readers.push(slot);
        }
        readers.retain(|slot| match keep {
            Some(kept) => std::ptr::eq(Arc::as_ptr(slot), kept),
            None => false,
        });
    }
}

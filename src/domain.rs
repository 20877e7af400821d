use crate::defer::{DeferredDrop, ReclaimFn, ReclaimHead};
use crate::error::ReclaimError;
use crate::reader::{ReadGuard, ReaderCtx};
use crate::runner::{
    worker_main, CallbackRunner, RunnerFlags, FLAG_PAUSE, FLAG_PAUSED, FLAG_STOP, FLAG_STOPPED,
};
use crate::state::{
    GraceState, DEFAULT_CLEANUP_INTERVAL, DEFAULT_HANDSHAKE_POLL, DEFAULT_IDLE_POLL,
};
use crate::sync::{fence, poll_wait, AtomicPtr, Ordering};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::mem;
use std::ptr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use std::vec::Vec;
use thread_local::ThreadLocal;

/// Builder for configuring a [`ReclaimDomain`].
///
/// The poll intervals are empirical; the defaults match long-standing
/// practice (1 ms for handshakes and transient queue links, 10 ms for
/// realtime idle polling) but can be tuned per domain.
///
/// 用于配置 [`ReclaimDomain`] 的构建器。
/// 轮询间隔是经验值；默认值沿用长期实践（握手和瞬态队列链接 1 ms，
/// 实时空闲轮询 10 ms），但可以按域调整。
///
/// # Example
/// ```
/// use rcu_reclaim::ReclaimDomain;
/// use std::time::Duration;
///
/// let domain = ReclaimDomain::builder()
///     .handshake_poll_interval(Duration::from_millis(2))
///     .idle_poll_interval(Duration::from_millis(20))
///     .cleanup_interval(32)
///     .build();
/// domain.defer_drop(Box::new([0u8; 64]));
/// ```
pub struct ReclaimDomainBuilder {
    handshake_poll: Duration,
    idle_poll: Duration,
    cleanup_interval: usize,
}

impl ReclaimDomainBuilder {
    /// Create a new builder with default settings.
    /// 创建一个带有默认设置的新构建器。
    #[inline]
    pub fn new() -> Self {
        ReclaimDomainBuilder {
            handshake_poll: DEFAULT_HANDSHAKE_POLL,
            idle_poll: DEFAULT_IDLE_POLL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }

    /// Poll interval for the stop/pause handshakes and for transiently-null
    /// queue links. Default: 1 ms.
    ///
    /// 停止/暂停握手以及短暂为 null 的队列链接的轮询间隔。默认：1 ms。
    #[inline]
    pub fn handshake_poll_interval(mut self, interval: Duration) -> Self {
        self.handshake_poll = interval;
        self
    }

    /// Sleep between drain attempts for realtime workers. Default: 10 ms.
    /// 实时工作线程两次排空尝试之间的睡眠。默认：10 ms。
    #[inline]
    pub fn idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll = interval;
        self
    }

    /// Sweep dead reader slots every N grace periods; `0` disables the
    /// sweep. Default: 16.
    ///
    /// 每 N 个宽限期清理一次死读者槽；`0` 禁用清理。默认：16。
    #[inline]
    pub fn cleanup_interval(mut self, interval: usize) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Build the domain.
    /// 构建域。
    pub fn build(self) -> ReclaimDomain {
        ReclaimDomain {
            shared: Arc::new(DomainShared {
                grace: Arc::new(GraceState::new(self.cleanup_interval, self.handshake_poll)),
                handshake_poll: self.handshake_poll,
                idle_poll: self.idle_poll,
                registry: Mutex::new(RegistryState {
                    runners: Vec::new(),
                    default: None,
                }),
                default_ptr: AtomicPtr::new(ptr::null_mut()),
                percpu: AtomicPtr::new(ptr::null_mut()),
                local_reader: ThreadLocal::new(),
                thread_runner: ThreadLocal::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl Default for ReclaimDomainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct RegistryState {
    /// Every live runner, the default one included.
    /// 所有存活的运行器，包括默认运行器。
    runners: Vec<Arc<CallbackRunner>>,
    default: Option<Arc<CallbackRunner>>,
}

/// Dense per-CPU runner table, published as a whole via the same
/// reclamation discipline it serves: readers dereference it inside a
/// read-side critical section at zero cost, and a slot's runner is only
/// dropped after a grace period.
///
/// 稠密的每 CPU 运行器表，整体通过它所服务的同一回收纪律发布：
/// 读者在读侧临界区内零开销地解引用它，槽内运行器只在一个宽限期
/// 之后才被 drop。
struct PerCpuTable {
    slots: Box<[AtomicPtr<CallbackRunner>]>,
}

pub(crate) struct DomainShared {
    pub(crate) grace: Arc<GraceState>,
    handshake_poll: Duration,
    idle_poll: Duration,
    registry: Mutex<RegistryState>,
    /// Lock-free view of the default runner; the owning `Arc` lives in the
    /// registry.
    /// 默认运行器的无锁视图；拥有它的 `Arc` 存于注册表中。
    default_ptr: AtomicPtr<CallbackRunner>,
    percpu: AtomicPtr<PerCpuTable>,
    local_reader: ThreadLocal<ReaderCtx>,
    thread_runner: ThreadLocal<RefCell<Option<Arc<CallbackRunner>>>>,
    closed: AtomicBool,
}

impl DomainShared {
    pub(crate) fn grace(&self) -> &GraceState {
        &self.grace
    }

    pub(crate) fn handshake_poll(&self) -> Duration {
        self.handshake_poll
    }

    pub(crate) fn idle_poll(&self) -> Duration {
        self.idle_poll
    }

    pub(crate) fn reader_ctx(&self) -> &ReaderCtx {
        self.local_reader
            .get_or(|| ReaderCtx::new(Arc::clone(&self.grace)))
    }

    pub(crate) fn install_thread_runner(&self, runner: Option<Arc<CallbackRunner>>) {
        *self.thread_runner.get_or(|| RefCell::new(None)).borrow_mut() = runner;
    }

    fn thread_runner_local(&self) -> Option<Arc<CallbackRunner>> {
        self.thread_runner
            .get()
            .and_then(|cell| cell.borrow().clone())
    }

    /// Grace-period wait on behalf of the calling thread. Must not be
    /// called inside a read-side critical section.
    ///
    /// 代表调用线程等待宽限期。不得在读侧临界区内调用。
    pub(crate) fn synchronize(&self) {
        let ctx = self.local_reader.get();
        if let Some(ctx) = ctx {
            assert!(
                ctx.nesting() == 0,
                "synchronize called inside a read-side critical section"
            );
        }
        self.grace.synchronize(ctx.map(|c| c.slot_ref()));
    }

    /// Spawn a worker and register it. Caller holds the registry lock.
    /// 派生一个工作线程并注册它。调用者持有注册表锁。
    fn spawn_runner(
        self: &Arc<Self>,
        registry: &mut RegistryState,
        flags: RunnerFlags,
        cpu: i32,
    ) -> Arc<CallbackRunner> {
        let runner = Arc::new(CallbackRunner::new(flags, cpu));
        let thread_runner = Arc::clone(&runner);
        let thread_shared = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("rcu-reclaim".into())
            .spawn(move || worker_main(thread_runner, thread_shared))
            .expect("failed to spawn reclamation worker thread");
        *runner.join.lock() = Some(handle);
        registry.runners.push(Arc::clone(&runner));
        runner
    }

    /// The default runner, created lazily and never destroyed while the
    /// domain lives.
    /// 默认运行器，惰性创建，在域存续期间永不销毁。
    pub(crate) fn default_runner(self: &Arc<Self>) -> Arc<CallbackRunner> {
        let fast = self.default_ptr.load(Ordering::Acquire);
        if !fast.is_null() {
            // The registry holds the owning Arc until domain teardown, so
            // the allocation outlives every fast-path reader.
            // 注册表在域销毁前一直持有拥有它的 Arc，因此该分配比所有
            // 快路径读者都活得久。
            unsafe {
                Arc::increment_strong_count(fast);
                return Arc::from_raw(fast);
            }
        }
        let mut registry = self.registry.lock();
        if let Some(default) = &registry.default {
            return Arc::clone(default);
        }
        let runner = self.spawn_runner(&mut registry, RunnerFlags::NONE, -1);
        registry.default = Some(Arc::clone(&runner));
        self.default_ptr
            .store(Arc::as_ptr(&runner) as *mut CallbackRunner, Ordering::Release);
        runner
    }

    /// Enqueue one callback against the worker chosen for the calling
    /// thread, inside a read-side critical section so that a concurrent
    /// per-CPU repointing cannot free the chosen worker beneath us.
    ///
    /// 在读侧临界区内，把一个回调入队到为调用线程选择的工作线程上，
    /// 使并发的每 CPU 重新指向无法在我们脚下释放所选的工作线程。
    pub(crate) fn dispatch(self: &Arc<Self>, head: *mut ReclaimHead) {
        assert!(
            !self.closed.load(Ordering::Acquire),
            "defer_reclaim on a shut-down reclamation domain"
        );
        let ctx = self.reader_ctx();
        let _guard = ctx.read_lock();

        // Per-thread override beats per-CPU beats default: an application
        // can dedicate a worker to a high-priority producer, and
        // uncoordinated producers on a many-core box spread across CPUs
        // instead of contending on one queue.
        // 线程级覆盖优先于每 CPU，再优先于默认：应用可以为高优先级
        // 生产者专设工作线程，多核机器上互不协调的生产者按 CPU 分摊
        // 而不是挤在一个队列上。
        if let Some(runner) = self.thread_runner_local() {
            runner.enqueue(head);
            runner.wake();
            return;
        }

        let table = self.percpu.load(Ordering::Acquire);
        if !table.is_null() {
            let cpu = current_cpu();
            if cpu >= 0 {
                let slots = unsafe { &(*table).slots };
                if let Some(slot) = slots.get(cpu as usize) {
                    let runner = slot.load(Ordering::Acquire);
                    if !runner.is_null() {
                        unsafe {
                            (*runner).enqueue(head);
                            (*runner).wake();
                        }
                        return;
                    }
                }
            }
        }

        let runner = self.default_runner();
        runner.enqueue(head);
        runner.wake();
    }

    /// Selection rule of `dispatch`, surfaced as an owned handle.
    /// `dispatch` 的选择规则，以自有句柄形式暴露。
    pub(crate) fn current_runner(self: &Arc<Self>) -> Arc<CallbackRunner> {
        let ctx = self.reader_ctx();
        let _guard = ctx.read_lock();

        if let Some(runner) = self.thread_runner_local() {
            return runner;
        }

        let table = self.percpu.load(Ordering::Acquire);
        if !table.is_null() {
            let cpu = current_cpu();
            if cpu >= 0 {
                let slots = unsafe { &(*table).slots };
                if let Some(slot) = slots.get(cpu as usize) {
                    let runner = slot.load(Ordering::Acquire);
                    if !runner.is_null() {
                        // Safe to take a reference while inside the read
                        // section: the slot's strong count is only released
                        // after a grace period.
                        // 在读侧临界区内取引用是安全的：槽位的强引用只在
                        // 一个宽限期之后才释放。
                        unsafe {
                            Arc::increment_strong_count(runner);
                            return Arc::from_raw(runner);
                        }
                    }
                }
            }
        }

        self.default_runner()
    }

    /// Allocate the per-CPU table if the CPU count can be probed. Caller
    /// holds the registry lock.
    /// 若能探测到 CPU 数量则分配每 CPU 表。调用者持有注册表锁。
    fn ensure_percpu_table(&self) {
        if !self.percpu.load(Ordering::Acquire).is_null() {
            return;
        }
        let maxcpus = probe_max_cpus();
        if maxcpus == 0 {
            return;
        }
        let slots: Vec<AtomicPtr<CallbackRunner>> =
            (0..maxcpus).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        let table = Box::new(PerCpuTable {
            slots: slots.into_boxed_slice(),
        });
        self.percpu
            .store(Box::into_raw(table), Ordering::Release);
    }

    pub(crate) fn cpu_runner(self: &Arc<Self>, cpu: usize) -> Option<Arc<CallbackRunner>> {
        let ctx = self.reader_ctx();
        let _guard = ctx.read_lock();
        let table = self.percpu.load(Ordering::Acquire);
        if table.is_null() {
            return None;
        }
        let slots = unsafe { &(*table).slots };
        let Some(slot) = slots.get(cpu) else {
            tracing::warn!(cpu, maxcpus = slots.len(), "get CPU runner: index out of range");
            return None;
        };
        let runner = slot.load(Ordering::Acquire);
        if runner.is_null() {
            return None;
        }
        unsafe {
            Arc::increment_strong_count(runner);
            Some(Arc::from_raw(runner))
        }
    }

    /// Assign or clear a CPU slot. Allocate, then range-check, then
    /// publish. Clearing returns only after a grace period, at which point
    /// the evicted runner's slot reference is released.
    ///
    /// 分配或清除一个 CPU 槽位。先分配，再检查范围，再发布。
    /// 清除在一个宽限期之后才返回，届时被逐出运行器的槽位引用被释放。
    pub(crate) fn set_cpu_runner(
        self: &Arc<Self>,
        cpu: usize,
        runner: Option<Arc<CallbackRunner>>,
    ) -> Result<(), ReclaimError> {
        let evicted;
        {
            let _registry = self.registry.lock();
            self.ensure_percpu_table();
            let table = self.percpu.load(Ordering::Acquire);
            if table.is_null() {
                return Err(ReclaimError::NoMemory);
            }
            let slots = unsafe { &(*table).slots };
            let Some(slot) = slots.get(cpu) else {
                tracing::warn!(cpu, maxcpus = slots.len(), "set CPU runner: index out of range");
                return Err(ReclaimError::InvalidCpu);
            };
            match runner {
                Some(runner) => {
                    if !slot.load(Ordering::Acquire).is_null() {
                        return Err(ReclaimError::Exists);
                    }
                    slot.store(Arc::into_raw(runner) as *mut CallbackRunner, Ordering::Release);
                    return Ok(());
                }
                None => {
                    let old = slot.swap(ptr::null_mut(), Ordering::AcqRel);
                    if old.is_null() {
                        return Ok(());
                    }
                    evicted = old;
                }
            }
        }
        // In-flight dispatchers may still hold the evicted runner; release
        // the slot's reference only after they are all done.
        // 在途的派发者可能仍持有被逐出的运行器；等它们全部结束后才释放
        // 槽位的引用。
        self.synchronize();
        drop(unsafe { Arc::from_raw(evicted) });
        Ok(())
    }

    /// One worker per CPU, pinned. Idempotent on already-populated slots.
    /// 每 CPU 一个绑定的工作线程。对已填充的槽位幂等。
    pub(crate) fn create_all_cpu_runners(
        self: &Arc<Self>,
        flags: RunnerFlags,
    ) -> Result<(), ReclaimError> {
        let mut registry = self.registry.lock();
        self.ensure_percpu_table();
        let table = self.percpu.load(Ordering::Acquire);
        if table.is_null() {
            return Err(if probe_max_cpus() == 0 {
                ReclaimError::InvalidCpu
            } else {
                ReclaimError::NoMemory
            });
        }
        let slots = unsafe { &(*table).slots };
        for (cpu, slot) in slots.iter().enumerate() {
            if !slot.load(Ordering::Acquire).is_null() {
                continue;
            }
            let runner = self.spawn_runner(&mut registry, flags, cpu as i32);
            slot.store(Arc::into_raw(runner) as *mut CallbackRunner, Ordering::Release);
        }
        Ok(())
    }

    /// Null every slot, wait one grace period, destroy all evicted workers.
    /// 清空所有槽位，等待一个宽限期，销毁所有被逐出的工作线程。
    pub(crate) fn free_all_cpu_runners(self: &Arc<Self>) {
        let mut evicted = Vec::new();
        {
            let _registry = self.registry.lock();
            let table = self.percpu.load(Ordering::Acquire);
            if table.is_null() {
                return;
            }
            let slots = unsafe { &(*table).slots };
            for slot in slots.iter() {
                let old = slot.swap(ptr::null_mut(), Ordering::AcqRel);
                if !old.is_null() {
                    evicted.push(unsafe { Arc::from_raw(old) });
                }
            }
        }
        if evicted.is_empty() {
            return;
        }
        self.synchronize();
        for runner in &evicted {
            self.destroy_runner(runner);
        }
    }

    /// Terminate a worker and migrate its leftovers onto the default
    /// runner. Silent no-op for the default runner itself: with
    /// self-spawning callbacks no worker can be drained in finite time
    /// without a "somewhere else" of last resort, and the default is that
    /// somewhere else.
    ///
    /// 终止一个工作线程并把其剩余回调迁移到默认运行器上。
    /// 对默认运行器本身静默不做任何事：存在自派生回调时，没有一个
    /// 最后兜底的"别处"，任何工作线程都无法在有限时间内排空，
    /// 默认运行器就是那个别处。
    pub(crate) fn destroy_runner(self: &Arc<Self>, runner: &Arc<CallbackRunner>) {
        if self.default_ptr.load(Ordering::Acquire) == Arc::as_ptr(runner) as *mut CallbackRunner {
            return;
        }
        if !runner.flag_test(FLAG_STOPPED) {
            runner.flag_set(FLAG_STOP);
            runner.wake();
            while !runner.flag_test(FLAG_STOPPED) {
                poll_wait(self.handshake_poll);
            }
        }
        if let Some(handle) = runner.join.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("reclamation worker thread panicked");
            }
        }
        self.migrate_orphans(runner);
        let mut registry = self.registry.lock();
        registry.runners.retain(|r| !Arc::ptr_eq(r, runner));
    }

    /// Splice a stopped runner's pending callbacks onto the default queue
    /// as one logical enqueue.
    /// 把已停止运行器的待处理回调作为一次逻辑入队接到默认队列上。
    fn migrate_orphans(self: &Arc<Self>, runner: &Arc<CallbackRunner>) {
        let leftovers = runner.qlen.swap(0, Ordering::Relaxed);
        if let Some(batch) = runner.queue.drain(self.handshake_poll) {
            let default = self.default_runner();
            default.queue.splice(batch);
            default.qlen.fetch_add(leftovers, Ordering::Relaxed);
            tracing::debug!(count = leftovers, "migrated orphan callbacks to the default runner");
            default.wake();
        }
    }

    /// Destroy path for workers whose thread does not exist anymore (the
    /// child side of fork): skip the stop handshake and the join, keep the
    /// splice.
    ///
    /// 线程已不存在的工作线程（fork 的子进程侧）的销毁路径：
    /// 跳过停止握手和 join，保留迁移。
    fn force_destroy(self: &Arc<Self>, runner: &Arc<CallbackRunner>) {
        runner.flag_set(FLAG_STOPPED);
        // Joining a thread that only existed in the parent is undefined;
        // drop the handle instead.
        // join 一个只在父进程中存在过的线程是未定义的；改为丢弃句柄。
        runner.join.lock().take();
        self.migrate_orphans(runner);
        let mut registry = self.registry.lock();
        registry.runners.retain(|r| !Arc::ptr_eq(r, runner));
    }

    /// Quiesce every worker and hold the registry lock across `fork()`.
    /// 使所有工作线程静止，并在 `fork()` 期间持有注册表锁。
    pub(crate) fn before_fork(&self) {
        let guard = self.registry.lock();
        let runners = guard.runners.clone();
        for runner in &runners {
            runner.flag_set(FLAG_PAUSE);
        }
        fence(Ordering::SeqCst);
        for runner in &runners {
            runner.wake();
        }
        for runner in &runners {
            while !runner.flag_test(FLAG_PAUSED | FLAG_STOPPED) {
                poll_wait(self.handshake_poll);
            }
        }
        // The lock stays held until the matching after_fork_* call.
        // 锁一直持有到配对的 after_fork_* 调用。
        mem::forget(guard);
    }

    pub(crate) fn after_fork_parent(&self) {
        let runners = {
            // Still locked from before_fork; reborrow the state through a
            // forced unlock at the end.
            // before_fork 的锁仍然持有；最后通过强制解锁归还。
            let registry = unsafe { &*self.registry.data_ptr() };
            registry.runners.clone()
        };
        for runner in &runners {
            runner.flag_clear(FLAG_PAUSE);
        }
        unsafe { self.registry.force_unlock() };
    }

    /// Rebuild the registry in the child: the parent's worker threads do
    /// not exist here.
    /// 在子进程中重建注册表：父进程的工作线程在这里不存在。
    pub(crate) fn after_fork_child(self: &Arc<Self>) {
        unsafe { self.registry.force_unlock() };
        let stale = {
            let mut registry = self.registry.lock();
            if registry.runners.is_empty() {
                return;
            }
            registry.default = None;
            mem::take(&mut registry.runners)
        };
        self.default_ptr.store(ptr::null_mut(), Ordering::Release);

        // Single-threaded now: the table can be freed without a grace
        // period.
        // 现在是单线程：表可以不经宽限期直接释放。
        let table = self.percpu.swap(ptr::null_mut(), Ordering::AcqRel);
        if !table.is_null() {
            let table = unsafe { Box::from_raw(table) };
            for slot in table.slots.iter() {
                let old = slot.swap(ptr::null_mut(), Ordering::AcqRel);
                if !old.is_null() {
                    drop(unsafe { Arc::from_raw(old) });
                }
            }
        }

        self.install_thread_runner(None);
        self.grace
            .reset_for_child(self.local_reader.get().map(|ctx| ctx.slot_ref()));

        // A fresh default first, so the stale workers have somewhere to
        // shed their leftover callbacks.
        // 先建新的默认运行器，失效的工作线程才有地方卸下剩余回调。
        let _fresh = self.default_runner();
        for runner in &stale {
            self.force_destroy(runner);
        }
    }

    /// Orderly teardown: every worker stopped and joined, every pending
    /// callback executed.
    /// 有序销毁：所有工作线程停止并 join，所有待处理回调执行完毕。
    pub(crate) fn shutdown(self: &Arc<Self>) {
        self.free_all_cpu_runners();
        loop {
            let victim = {
                let registry = self.registry.lock();
                registry
                    .runners
                    .iter()
                    .find(|r| {
                        self.default_ptr.load(Ordering::Acquire)
                            != Arc::as_ptr(r) as *mut CallbackRunner
                    })
                    .cloned()
            };
            match victim {
                Some(runner) => self.destroy_runner(&runner),
                None => break,
            }
        }

        let default = self.registry.lock().default.clone();
        if let Some(default) = default {
            default.flag_set(FLAG_STOP);
            default.wake();
            while !default.flag_test(FLAG_STOPPED) {
                poll_wait(self.handshake_poll);
            }
            if let Some(handle) = default.join.lock().take() {
                if handle.join().is_err() {
                    tracing::warn!("default reclamation worker panicked");
                }
            }
            // Self-spawning callbacks may keep re-enqueuing; drain on this
            // thread until the queue stays empty.
            // 自派生回调可能不断重新入队；在本线程排空直到队列保持为空。
            while let Some(batch) = default.queue.drain(self.handshake_poll) {
                self.synchronize();
                let invoked = unsafe { batch.invoke_all(self.handshake_poll) };
                if invoked > 0 {
                    default.qlen.fetch_sub(invoked, Ordering::Relaxed);
                }
            }
            let mut registry = self.registry.lock();
            registry.default = None;
            registry.runners.clear();
            drop(registry);
            self.default_ptr.store(ptr::null_mut(), Ordering::Release);
        }
        self.closed.store(true, Ordering::Release);

        let table = self.percpu.swap(ptr::null_mut(), Ordering::AcqRel);
        if !table.is_null() {
            drop(unsafe { Box::from_raw(table) });
        }
    }
}

/// A deferred-reclamation domain: a process-wide (or test-local) registry of
/// callback workers plus the grace-period machinery they order against.
///
/// The domain hands out reclamation requests with [`defer_drop`] /
/// [`defer_reclaim`], manages workers (default, per-CPU, per-thread
/// override) and survives `fork()` through the three fork hooks. Dropping
/// the domain stops every worker and runs every pending callback.
///
/// 一个延迟回收域：回调工作线程的进程级（或测试局部）注册表，
/// 加上它们用于排序的宽限期机制。
/// 域通过 [`defer_drop`] / [`defer_reclaim`] 接受回收请求，管理工作线程
/// （默认、每 CPU、线程级覆盖），并通过三个 fork 钩子在 `fork()` 中存活。
/// drop 域会停止所有工作线程并运行所有待处理回调。
///
/// [`defer_drop`]: ReclaimDomain::defer_drop
/// [`defer_reclaim`]: ReclaimDomain::defer_reclaim
///
/// # Example
/// ```
/// use rcu_reclaim::ReclaimDomain;
///
/// let domain = ReclaimDomain::new();
/// domain.defer_drop(Box::new(String::from("retired")));
/// drop(domain); // every pending callback has run by now
/// ```
pub struct ReclaimDomain {
    shared: Arc<DomainShared>,
}

impl ReclaimDomain {
    /// Create a domain with default settings.
    /// 用默认设置创建一个域。
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for configuring the domain.
    /// 创建用于配置域的构建器。
    #[inline]
    pub fn builder() -> ReclaimDomainBuilder {
        ReclaimDomainBuilder::new()
    }

    /// A clonable producer handle sharing this domain.
    /// 共享此域的可克隆生产者句柄。
    #[inline]
    pub fn handle(&self) -> DeferHandle {
        DeferHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Defer dropping `value` until after the next grace period, on the
    /// worker chosen for the calling thread.
    ///
    /// 将 `value` 的 drop 推迟到下一个宽限期之后，在为调用线程选择的
    /// 工作线程上执行。
    #[inline]
    pub fn defer_drop<T: Send + 'static>(&self, value: Box<T>) {
        self.shared.dispatch(DeferredDrop::new(value));
    }

    /// Schedule `func(head)` to run after a following grace period.
    ///
    /// # Safety
    /// `head` must point to a live `ReclaimHead` embedded at offset zero of
    /// its owning allocation, must not be enqueued twice, and must stay
    /// valid until `func` runs; `func` takes ownership of the allocation.
    ///
    /// 安排 `func(head)` 在随后的一个宽限期之后运行。
    ///
    /// # Safety
    /// `head` 必须指向内嵌在其所属分配偏移零处的有效 `ReclaimHead`，
    /// 不得重复入队，且必须在 `func` 运行前保持有效；
    /// `func` 接管该分配的所有权。
    pub unsafe fn defer_reclaim(&self, head: *mut ReclaimHead, func: ReclaimFn) {
        (*head).func = Some(func);
        self.shared.dispatch(head);
    }

    /// Enter a read-side critical section on the calling thread.
    /// 在调用线程上进入读侧临界区。
    #[inline]
    pub fn read_lock(&self) -> ReadGuard<'_> {
        self.shared.reader_ctx().read_lock()
    }

    /// Wait for a full grace period.
    /// 等待一个完整的宽限期。
    pub fn synchronize(&self) {
        self.shared.synchronize();
    }

    /// Create a worker. `cpu < 0` means unpinned.
    /// 创建一个工作线程。`cpu < 0` 表示不绑定。
    pub fn create_runner(&self, flags: RunnerFlags, cpu: i32) -> Arc<CallbackRunner> {
        let mut registry = self.shared.registry.lock();
        self.shared.spawn_runner(&mut registry, flags, cpu)
    }

    /// Terminate a worker, migrating its pending callbacks onto the default
    /// runner. Silent no-op for the default runner. The caller must have
    /// removed the worker from per-CPU or per-thread use first.
    ///
    /// 终止一个工作线程，把其待处理回调迁移到默认运行器。对默认运行器
    /// 静默不做任何事。调用者必须先把它从每 CPU 或线程级使用中移除。
    pub fn destroy_runner(&self, runner: &Arc<CallbackRunner>) {
        self.shared.destroy_runner(runner);
    }

    /// The default worker, created lazily. Never destroyed while the domain
    /// lives.
    /// 默认工作线程，惰性创建。在域存续期间永不销毁。
    pub fn default_runner(&self) -> Arc<CallbackRunner> {
        self.shared.default_runner()
    }

    /// The worker `defer_drop` would use from the calling thread right now.
    /// 此刻从调用线程执行 `defer_drop` 会使用的工作线程。
    pub fn current_runner(&self) -> Arc<CallbackRunner> {
        self.shared.current_runner()
    }

    /// The worker assigned to `cpu`, if any.
    /// 分配给 `cpu` 的工作线程（如有）。
    pub fn cpu_runner(&self, cpu: usize) -> Option<Arc<CallbackRunner>> {
        self.shared.cpu_runner(cpu)
    }

    /// Assign (`Some`) or clear (`None`) the worker for `cpu`. Assignment
    /// fails with [`ReclaimError::Exists`] if the slot is taken. Clearing
    /// waits one grace period before releasing the evicted worker's slot
    /// reference.
    ///
    /// 为 `cpu` 分配（`Some`）或清除（`None`）工作线程。若槽位已被占用，
    /// 分配以 [`ReclaimError::Exists`] 失败。清除会等待一个宽限期后才
    /// 释放被逐出工作线程的槽位引用。
    pub fn set_cpu_runner(
        &self,
        cpu: usize,
        runner: Option<Arc<CallbackRunner>>,
    ) -> Result<(), ReclaimError> {
        self.shared.set_cpu_runner(cpu, runner)
    }

    /// Populate one pinned worker per CPU. Idempotent on populated slots.
    /// 为每个 CPU 填充一个绑定的工作线程。对已填充槽位幂等。
    pub fn create_all_cpu_runners(&self, flags: RunnerFlags) -> Result<(), ReclaimError> {
        self.shared.create_all_cpu_runners(flags)
    }

    /// Null every per-CPU slot, wait one grace period, destroy the evicted
    /// workers.
    /// 清空所有每 CPU 槽位，等待一个宽限期，销毁被逐出的工作线程。
    pub fn free_all_cpu_runners(&self) {
        self.shared.free_all_cpu_runners();
    }

    /// The calling thread's override worker, if set.
    /// 调用线程的覆盖工作线程（若已设置）。
    pub fn thread_runner(&self) -> Option<Arc<CallbackRunner>> {
        self.shared.thread_runner_local()
    }

    /// Set or clear the calling thread's override worker.
    /// 设置或清除调用线程的覆盖工作线程。
    pub fn set_thread_runner(&self, runner: Option<Arc<CallbackRunner>>) {
        self.shared.install_thread_runner(runner);
    }

    /// Quiesce all workers ahead of `fork()`. Pair with
    /// [`after_fork_parent`] or [`after_fork_child`].
    ///
    /// 在 `fork()` 之前使所有工作线程静止。与 [`after_fork_parent`] 或
    /// [`after_fork_child`] 配对。
    ///
    /// [`after_fork_parent`]: ReclaimDomain::after_fork_parent
    /// [`after_fork_child`]: ReclaimDomain::after_fork_child
    pub fn before_fork(&self) {
        self.shared.before_fork();
    }

    /// Resume the workers in the parent after a successful `fork()`.
    /// `fork()` 成功后在父进程中恢复工作线程。
    pub fn after_fork_parent(&self) {
        self.shared.after_fork_parent();
    }

    /// Rebuild the registry in the child after a successful `fork()`:
    /// stale workers are retired and their pending callbacks are executed
    /// by a fresh default worker.
    ///
    /// `fork()` 成功后在子进程中重建注册表：失效的工作线程被淘汰，
    /// 其待处理回调由新的默认工作线程执行。
    pub fn after_fork_child(&self) {
        self.shared.after_fork_child();
    }
}

impl Default for ReclaimDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ReclaimDomain {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

/// A clonable producer-side handle to a [`ReclaimDomain`].
///
/// Useful for producer threads and for callbacks that enqueue further
/// callbacks. The handle does not keep the workers alive: once the owning
/// domain is dropped, deferring through a leftover handle panics.
///
/// [`ReclaimDomain`] 的可克隆生产者侧句柄。
/// 适用于生产者线程以及会继续入队回调的回调。句柄不维持工作线程存活：
/// 拥有它的域被 drop 之后，通过遗留句柄继续延迟回收会 panic。
#[derive(Clone)]
pub struct DeferHandle {
    shared: Arc<DomainShared>,
}

impl DeferHandle {
    /// See [`ReclaimDomain::defer_drop`].
    #[inline]
    pub fn defer_drop<T: Send + 'static>(&self, value: Box<T>) {
        self.shared.dispatch(DeferredDrop::new(value));
    }

    /// See [`ReclaimDomain::defer_reclaim`].
    ///
    /// # Safety
    /// Same contract as [`ReclaimDomain::defer_reclaim`].
    pub unsafe fn defer_reclaim(&self, head: *mut ReclaimHead, func: ReclaimFn) {
        (*head).func = Some(func);
        self.shared.dispatch(head);
    }

    /// See [`ReclaimDomain::read_lock`].
    #[inline]
    pub fn read_lock(&self) -> ReadGuard<'_> {
        self.shared.reader_ctx().read_lock()
    }

    /// See [`ReclaimDomain::synchronize`].
    pub fn synchronize(&self) {
        self.shared.synchronize();
    }

    /// See [`ReclaimDomain::set_thread_runner`].
    pub fn set_thread_runner(&self, runner: Option<Arc<CallbackRunner>>) {
        self.shared.install_thread_runner(runner);
    }

    /// See [`ReclaimDomain::thread_runner`].
    pub fn thread_runner(&self) -> Option<Arc<CallbackRunner>> {
        self.shared.thread_runner_local()
    }
}

#[cfg(target_os = "linux")]
fn current_cpu() -> i32 {
    unsafe { libc::sched_getcpu() }
}

#[cfg(not(target_os = "linux"))]
fn current_cpu() -> i32 {
    // No per-CPU dispatch here; selection falls through to the default.
    // 此平台没有每 CPU 派发；选择落到默认运行器。
    -1
}

#[cfg(unix)]
fn probe_max_cpus() -> usize {
    let cpus = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    if cpus > 0 {
        cpus as usize
    } else {
        0
    }
}

#[cfg(not(unix))]
fn probe_max_cpus() -> usize {
    0
}

use crate::defer::ReclaimHead;
use crate::domain::DomainShared;
use crate::futex::FutexGate;
use crate::sync::{poll_wait, AtomicU32, AtomicUsize, Ordering};
use crate::wfq::WaitFreeQueue;
use std::ops::BitOr;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

/// Realtime worker: never sleeps in the futex, polls at the idle interval.
/// 实时工作线程：从不在 futex 中睡眠，以空闲间隔轮询。
pub(crate) const FLAG_RT: u32 = 0x1;
/// Termination requested.
/// 已请求终止。
pub(crate) const FLAG_STOP: u32 = 0x2;
/// Termination acknowledged; the thread has exited (or unwound).
/// 终止已确认；线程已退出（或已展开）。
pub(crate) const FLAG_STOPPED: u32 = 0x4;
/// Quiescence across fork requested.
/// 已请求跨 fork 静止。
pub(crate) const FLAG_PAUSE: u32 = 0x8;
/// Quiescence acknowledged.
/// 静止已确认。
pub(crate) const FLAG_PAUSED: u32 = 0x10;

/// Creation flags for a [`CallbackRunner`].
///
/// [`CallbackRunner`] 的创建标志。
///
/// # Example
/// ```
/// use rcu_reclaim::{ReclaimDomain, RunnerFlags};
///
/// let domain = ReclaimDomain::new();
/// let runner = domain.create_runner(RunnerFlags::RT, -1);
/// assert!(runner.is_realtime());
/// domain.destroy_runner(&runner);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunnerFlags(pub(crate) u32);

impl RunnerFlags {
    /// No special behavior.
    /// 无特殊行为。
    pub const NONE: RunnerFlags = RunnerFlags(0);
    /// Realtime mode: skip futex sleeps, poll only. For callers that cannot
    /// tolerate futex-syscall tail latency on the producer path.
    /// 实时模式：跳过 futex 睡眠，仅轮询。用于生产者路径上无法容忍
    /// futex 系统调用尾延迟的调用者。
    pub const RT: RunnerFlags = RunnerFlags(FLAG_RT);
}

impl BitOr for RunnerFlags {
    type Output = RunnerFlags;

    fn bitor(self, rhs: RunnerFlags) -> RunnerFlags {
        RunnerFlags(self.0 | rhs.0)
    }
}

/// A worker dedicated to executing deferred reclamation callbacks for one
/// queue.
///
/// Each runner owns a wait-free callback queue, a sleep gate, a flags word
/// and a dedicated OS thread that repeats: drain a batch, wait a full grace
/// period, invoke the batch. Created through
/// [`crate::ReclaimDomain::create_runner`] and friends; destroyed through
/// [`crate::ReclaimDomain::destroy_runner`], which migrates any pending
/// callbacks onto the domain's default runner.
///
/// 专门为一个队列执行延迟回收回调的工作线程。
/// 每个运行器拥有一个 wait-free 回调队列、一个睡眠门、一个标志字和
/// 一个专用的 OS 线程，反复执行：排空一批、等待完整宽限期、调用该批。
/// 通过 [`crate::ReclaimDomain::create_runner`] 等创建；通过
/// [`crate::ReclaimDomain::destroy_runner`] 销毁，后者会把所有待处理
/// 回调迁移到域的默认运行器上。
#[repr(align(64))]
pub struct CallbackRunner {
    pub(crate) queue: WaitFreeQueue,
    pub(crate) flags: AtomicU32,
    pub(crate) gate: FutexGate,
    /// Enqueued minus invoked. Maintained for debugging, not a correctness
    /// signal.
    /// 入队数减去已调用数。仅用于调试，不是正确性信号。
    pub(crate) qlen: AtomicUsize,
    cpu_affinity: i32,
    thread: OnceLock<std::thread::Thread>,
    pub(crate) join: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CallbackRunner {
    pub(crate) fn new(flags: RunnerFlags, cpu_affinity: i32) -> Self {
        CallbackRunner {
            queue: WaitFreeQueue::new(),
            flags: AtomicU32::new(flags.0),
            gate: FutexGate::new(),
            qlen: AtomicUsize::new(0),
            cpu_affinity,
            thread: OnceLock::new(),
            join: parking_lot::Mutex::new(None),
        }
    }

    #[inline]
    pub(crate) fn flag_test(&self, flags: u32) -> bool {
        self.flags.load(Ordering::SeqCst) & flags != 0
    }

    #[inline]
    pub(crate) fn flag_set(&self, flags: u32) {
        self.flags.fetch_or(flags, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn flag_clear(&self, flags: u32) {
        self.flags.fetch_and(!flags, Ordering::SeqCst);
    }

    /// Number of callbacks enqueued but not yet invoked. Debug-only
    /// accounting; reads may race with enqueues and batch completion.
    ///
    /// 已入队但尚未调用的回调数量。仅用于调试的统计；
    /// 读取可能与入队和批次完成竞争。
    #[inline]
    pub fn qlen(&self) -> usize {
        self.qlen.load(Ordering::Relaxed)
    }

    /// Whether this runner was created in realtime mode.
    /// 此运行器是否以实时模式创建。
    #[inline]
    pub fn is_realtime(&self) -> bool {
        self.flag_test(FLAG_RT)
    }

    /// Whether the worker thread has acknowledged termination.
    /// 工作线程是否已确认终止。
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.flag_test(FLAG_STOPPED)
    }

    /// The CPU this worker is pinned to, negative if unpinned.
    /// 此工作线程绑定的 CPU，未绑定时为负。
    #[inline]
    pub fn cpu_affinity(&self) -> i32 {
        self.cpu_affinity
    }

    /// The worker's thread handle, once the thread has started.
    /// 工作线程的线程句柄（线程启动后可用）。
    pub fn thread(&self) -> Option<&std::thread::Thread> {
        self.thread.get()
    }

    pub(crate) fn enqueue(&self, head: *mut ReclaimHead) {
        self.queue.enqueue(head);
        self.qlen.fetch_add(1, Ordering::Relaxed);
    }

    /// Wake the worker if it may be asleep. Realtime workers poll and are
    /// never woken.
    /// 若工作线程可能在睡眠则唤醒它。实时工作线程靠轮询，从不被唤醒。
    pub(crate) fn wake(&self) {
        if !self.flag_test(FLAG_RT) {
            self.gate.wake();
        }
    }
}

/// Sets `STOPPED` (and clears the gate) however the worker exits, so that
/// `destroy_runner` terminates even if a callback panicked the thread.
///
/// 无论工作线程以何种方式退出都会设置 `STOPPED`（并清理睡眠门），
/// 使 `destroy_runner` 即使在回调让线程 panic 时也能结束。
struct StopAck<'a> {
    runner: &'a CallbackRunner,
}

impl Drop for StopAck<'_> {
    fn drop(&mut self) {
        self.runner.gate.reset();
        self.runner.flag_set(FLAG_STOPPED);
    }
}

/// The code run by each worker thread.
/// 每个工作线程运行的代码。
pub(crate) fn worker_main(runner: Arc<CallbackRunner>, shared: Arc<DomainShared>) {
    if runner.cpu_affinity >= 0 {
        if let Err(err) = set_cpu_affinity(runner.cpu_affinity) {
            tracing::error!(cpu = runner.cpu_affinity, %err, "cannot pin reclamation worker");
            std::process::abort();
        }
    }
    let _ = runner.thread.set(std::thread::current());

    // Callbacks that spawn further callbacks land back on this worker.
    // 派生出新回调的回调会落回这个工作线程。
    shared.install_thread_runner(Some(Arc::clone(&runner)));

    let _ack = StopAck { runner: &runner };
    let ctx = shared.reader_ctx();
    let handshake = shared.handshake_poll();
    let idle = shared.idle_poll();
    let realtime = runner.flag_test(FLAG_RT);

    let mut reader = Some(ctx.read_lock());
    loop {
        if runner.flag_test(FLAG_PAUSE) {
            reader.take();
            runner.flag_set(FLAG_PAUSED);
            while runner.flag_test(FLAG_PAUSE) {
                poll_wait(handshake);
            }
            reader = Some(ctx.read_lock());
            runner.flag_clear(FLAG_PAUSED);
        }

        if let Some(batch) = runner.queue.drain(handshake) {
            // The grace period must fall between the snapshot and the
            // invocations: every reader that could observe the pre-unlink
            // state of a batched object has finished by the time its
            // callback frees it.
            // 宽限期必须落在快照和调用之间：所有可能观测到批内对象
            // 解链前状态的读者，在回调释放它之前都已结束。
            shared.grace().synchronize(Some(ctx.slot_ref()));
            let invoked = unsafe { batch.invoke_all(handshake) };
            if invoked > 0 {
                runner.qlen.fetch_sub(invoked, Ordering::Relaxed);
            }
        }

        if runner.flag_test(FLAG_STOP) {
            break;
        }

        reader.take();
        if realtime {
            poll_wait(idle);
        } else {
            runner
                .gate
                .sleep(|| runner.queue.is_empty() && !runner.flag_test(FLAG_STOP | FLAG_PAUSE));
        }
        reader = Some(ctx.read_lock());
    }
    drop(reader);
    // StopAck resets the gate and acknowledges the stop on the way out.
    // StopAck 在退出路径上重置睡眠门并确认停止。
}

#[cfg(target_os = "linux")]
fn set_cpu_affinity(cpu: i32) -> std::io::Result<()> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu as usize, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_cpu_affinity(_cpu: i32) -> std::io::Result<()> {
    // No affinity support here; the runner stays unpinned.
    // 此平台不支持亲和性；运行器保持未绑定。
    Ok(())
}

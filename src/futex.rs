use crate::sync::{fence, AtomicI32, Ordering};

/// Edge-triggered sleep gate for an idle worker.
///
/// The word holds `0` while the worker runs and `-1` once it has committed
/// to sleep. The fence pairing is the whole contract: a producer that
/// enqueued before the worker's fence is seen by the re-check; a producer
/// that enqueued after necessarily observes `-1` and issues the wake.
///
/// 空闲工作线程的边沿触发睡眠门。
/// 工作线程运行时该字为 `0`，承诺睡眠后为 `-1`。fence 配对就是全部契约：
/// 在工作线程 fence 之前入队的生产者会被复查看到；之后入队的生产者
/// 必然观测到 `-1` 并发出唤醒。
pub(crate) struct FutexGate {
    value: AtomicI32,
    #[cfg(all(not(target_os = "linux"), not(feature = "loom")))]
    lock: std::sync::Mutex<()>,
    #[cfg(all(not(target_os = "linux"), not(feature = "loom")))]
    condvar: std::sync::Condvar,
}

impl FutexGate {
    pub(crate) fn new() -> Self {
        FutexGate {
            value: AtomicI32::new(0),
            #[cfg(all(not(target_os = "linux"), not(feature = "loom")))]
            lock: std::sync::Mutex::new(()),
            #[cfg(all(not(target_os = "linux"), not(feature = "loom")))]
            condvar: std::sync::Condvar::new(),
        }
    }

    /// Producer side: fence, observe `-1`, flip to `0`, wake one sleeper.
    /// Any value other than `-1` means the worker is awake and the wake is
    /// skipped.
    ///
    /// 生产者侧：fence、观测到 `-1`、翻转为 `0`、唤醒一个睡眠者。
    /// 除 `-1` 以外的任何值都表示工作线程醒着，唤醒被跳过。
    pub(crate) fn wake(&self) {
        fence(Ordering::SeqCst);
        if self.value.load(Ordering::Relaxed) == -1 {
            self.value.store(0, Ordering::Relaxed);
            self.wake_one();
        }
    }

    /// Consumer side: publish the sleep intent, fence, re-check, then wait.
    /// `still_idle` is evaluated after the fence; if it turns false the gate
    /// backs out without sleeping, which is what closes the race against a
    /// producer (or a stop/pause request) that fired between the caller's
    /// last check and the decrement.
    ///
    /// 消费者侧：发布睡眠意图、fence、复查、然后等待。
    /// `still_idle` 在 fence 之后求值；若变为假，门在不睡眠的情况下退出，
    /// 这正是关闭与在调用者最后一次检查和递减之间触发的生产者
    /// （或停止/暂停请求）竞争的手段。
    pub(crate) fn sleep<F: Fn() -> bool>(&self, still_idle: F) {
        self.value.fetch_sub(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        if !still_idle() {
            self.value.store(0, Ordering::Relaxed);
            return;
        }
        self.wait();
        self.value.store(0, Ordering::Relaxed);
    }

    /// Stop path: the worker is done sleeping for good.
    /// 停止路径：工作线程彻底不再睡眠。
    pub(crate) fn reset(&self) {
        fence(Ordering::SeqCst);
        self.value.store(0, Ordering::Relaxed);
    }

    #[cfg(all(target_os = "linux", not(feature = "loom")))]
    fn wait(&self) {
        // Returns on wake, on a value mismatch, or spuriously; the caller
        // re-checks either way.
        // 在唤醒、值不匹配或虚假唤醒时返回；调用者无论如何都会复查。
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.value.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                -1i32,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null_mut::<u32>(),
                0u32,
            );
        }
    }

    #[cfg(all(target_os = "linux", not(feature = "loom")))]
    fn wake_one(&self) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.value.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                1i32,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null_mut::<u32>(),
                0u32,
            );
        }
    }

    #[cfg(all(not(target_os = "linux"), not(feature = "loom")))]
    fn wait(&self) {
        let mut guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        while self.value.load(Ordering::Relaxed) == -1 {
            guard = self
                .condvar
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    #[cfg(all(not(target_os = "linux"), not(feature = "loom")))]
    fn wake_one(&self) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.condvar.notify_one();
    }

    #[cfg(feature = "loom")]
    fn wait(&self) {
        while self.value.load(Ordering::Relaxed) == -1 {
            loom::thread::yield_now();
        }
    }

    #[cfg(feature = "loom")]
    fn wake_one(&self) {}
}

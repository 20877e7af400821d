/// 生命周期测试模块
/// 测试工作线程的创建、销毁、孤儿迁移、暂停协议和域的销毁
use super::basic_tests::{wait_until, Hit};
use crate::{ReclaimDomain, ReclaimHead, RunnerFlags};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 测试1: 关停排空，10 个回调全部执行且线程被 join
#[test]
fn test_shutdown_drain() {
    let domain = ReclaimDomain::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let runner = domain.create_runner(RunnerFlags::NONE, -1);
    domain.set_thread_runner(Some(Arc::clone(&runner)));

    for _ in 0..10 {
        domain.defer_drop(Hit::new(&hits));
    }

    // 先从线程级使用中移除，再销毁
    domain.set_thread_runner(None);
    domain.destroy_runner(&runner);

    // 回调要么在被销毁的工作线程上执行，要么被迁移到默认运行器
    assert!(runner.is_stopped());
    assert!(runner.join.lock().is_none());
    assert!(wait_until(
        || hits.load(Ordering::SeqCst) == 10,
        Duration::from_secs(10)
    ));
}

/// 测试2: 销毁默认运行器是静默空操作
#[test]
fn test_destroy_default_is_noop() {
    let domain = ReclaimDomain::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let default = domain.default_runner();
    domain.destroy_runner(&default);
    assert!(!default.is_stopped());

    // 默认运行器仍然工作
    domain.defer_drop(Hit::new(&hits));
    assert!(wait_until(
        || hits.load(Ordering::SeqCst) == 1,
        Duration::from_secs(10)
    ));
}

/// 测试3: 重复销毁无害
#[test]
fn test_destroy_twice() {
    let domain = ReclaimDomain::new();

    let runner = domain.create_runner(RunnerFlags::NONE, -1);
    domain.destroy_runner(&runner);
    assert!(runner.is_stopped());
    domain.destroy_runner(&runner);
}

/// 测试4: drop 域会执行所有待处理回调
#[test]
fn test_domain_drop_runs_pending() {
    let hits = Arc::new(AtomicUsize::new(0));
    {
        let domain = ReclaimDomain::new();
        for _ in 0..500 {
            domain.defer_drop(Hit::new(&hits));
        }
    }
    assert_eq!(hits.load(Ordering::SeqCst), 500);
}

/// 测试5: 暂停协议，静止期间回调滞留，恢复后放行
#[test]
fn test_pause_and_resume() {
    let domain = ReclaimDomain::new();
    let hits = Arc::new(AtomicUsize::new(0));

    // 确保有工作线程可以静止
    let runner = domain.default_runner();
    domain.before_fork();

    for _ in 0..3 {
        domain.defer_drop(Hit::new(&hits));
    }

    // 工作线程已确认静止，不可能排空队列
    thread::sleep(Duration::from_millis(100));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(runner.qlen(), 3);

    domain.after_fork_parent();
    assert!(wait_until(
        || hits.load(Ordering::SeqCst) == 3 && runner.qlen() == 0,
        Duration::from_secs(10)
    ));
}

/// 测试6: 回调 panic 后销毁仍能结束
#[test]
fn test_destroy_after_worker_panic() {
    unsafe fn panicking_callback(head: *mut ReclaimHead) {
        drop(Box::from_raw(head));
        panic!("callback failure");
    }

    let domain = ReclaimDomain::new();
    let runner = domain.create_runner(RunnerFlags::NONE, -1);
    domain.set_thread_runner(Some(Arc::clone(&runner)));

    let head = Box::into_raw(Box::new(ReclaimHead::new()));
    unsafe {
        domain.defer_reclaim(head, panicking_callback);
    }

    // 展开路径也要设置 STOPPED，否则这里会永远自旋
    assert!(wait_until(|| runner.is_stopped(), Duration::from_secs(10)));
    domain.set_thread_runner(None);
    domain.destroy_runner(&runner);
}

/// 测试7: 绑定 CPU 的工作线程正常执行回调
#[cfg(target_os = "linux")]
#[test]
fn test_pinned_runner_executes() {
    if !super::basic_tests::all_cpus_pinnable() {
        return;
    }
    let domain = ReclaimDomain::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let runner = domain.create_runner(RunnerFlags::NONE, 0);
    assert_eq!(runner.cpu_affinity(), 0);

    domain.set_thread_runner(Some(Arc::clone(&runner)));
    for _ in 0..10 {
        domain.defer_drop(Hit::new(&hits));
    }
    assert!(wait_until(
        || hits.load(Ordering::SeqCst) == 10,
        Duration::from_secs(10)
    ));

    domain.set_thread_runner(None);
    domain.destroy_runner(&runner);
}

/// 测试8: 线程级覆盖的读写
#[test]
fn test_thread_runner_override() {
    let domain = ReclaimDomain::new();
    assert!(domain.thread_runner().is_none());

    let runner = domain.create_runner(RunnerFlags::NONE, -1);
    domain.set_thread_runner(Some(Arc::clone(&runner)));
    assert!(Arc::ptr_eq(&domain.thread_runner().unwrap(), &runner));
    assert!(Arc::ptr_eq(&domain.current_runner(), &runner));

    // 覆盖只对设置它的线程可见
    let handle = domain.handle();
    thread::spawn(move || {
        assert!(handle.thread_runner().is_none());
    })
    .join()
    .unwrap();

    domain.set_thread_runner(None);
    assert!(domain.thread_runner().is_none());
    domain.destroy_runner(&runner);
}

/// 测试9: 销毁后挂起的回调出现在默认运行器的 qlen 中
#[test]
fn test_orphans_accounted_on_default() {
    let domain = ReclaimDomain::new();
    let hits = Arc::new(AtomicUsize::new(0));

    // 默认运行器先存在，方便观察迁移后的执行
    let default = domain.default_runner();
    let runner = domain.create_runner(RunnerFlags::NONE, -1);
    domain.set_thread_runner(Some(Arc::clone(&runner)));

    for _ in 0..50 {
        domain.defer_drop(Hit::new(&hits));
    }
    domain.set_thread_runner(None);
    domain.destroy_runner(&runner);

    // 不论回调是在被销毁的运行器上执行还是被迁移，最终都恰好执行一次
    assert!(wait_until(
        || hits.load(Ordering::SeqCst) == 50,
        Duration::from_secs(10)
    ));
    assert!(wait_until(|| default.qlen() == 0, Duration::from_secs(10)));
}

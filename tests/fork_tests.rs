//! Fork lifecycle integration test.
//!
//! Kept alone in this binary: it calls `fork()` for real, and the child
//! reports back through its exit status so no assertion machinery crosses
//! the process boundary.

#![cfg(unix)]

use rcu_reclaim::ReclaimDomain;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Hit {
    hits: Arc<AtomicUsize>,
}

impl Drop for Hit {
    fn drop(&mut self) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[test]
fn fork_child_executes_parent_callbacks() {
    let domain = ReclaimDomain::new();
    let hits = Arc::new(AtomicUsize::new(0));

    // Make sure a worker exists before quiescing, then enqueue while every
    // worker is paused: nothing runs until one side of the fork resumes.
    domain.default_runner();
    domain.before_fork();
    for _ in 0..5 {
        domain.defer_drop(Box::new(Hit {
            hits: Arc::clone(&hits),
        }));
    }

    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");

    if pid == 0 {
        // Child: the parent's worker threads do not exist here. The rebuilt
        // registry must execute the five inherited callbacks exactly once.
        domain.after_fork_child();
        let all_ran = wait_until(|| hits.load(Ordering::SeqCst) >= 5, Duration::from_secs(10));
        std::thread::sleep(Duration::from_millis(50));
        let exactly_once = all_ran && hits.load(Ordering::SeqCst) == 5;
        unsafe { libc::_exit(if exactly_once { 0 } else { 1 }) };
    }

    domain.after_fork_parent();

    let mut status = 0;
    let waited = unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(waited, pid);
    assert!(libc::WIFEXITED(status), "child terminated abnormally");
    assert_eq!(
        libc::WEXITSTATUS(status),
        0,
        "child did not execute the inherited callbacks exactly once"
    );

    // The parent's copy of the queue is independent and drains on resume.
    assert!(wait_until(
        || hits.load(Ordering::SeqCst) == 5,
        Duration::from_secs(10)
    ));
    drop(domain);
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}

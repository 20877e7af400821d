use std::error::Error;
use std::fmt;

/// Errors surfaced by the per-CPU runner table.
///
/// Everything else in the engine is either infallible or fatal: allocation
/// and thread-spawn failures during worker construction panic, and an
/// affinity failure inside a worker thread aborts the process, because no
/// sensible recovery exists from within a reclamation engine.
///
/// 每 CPU 运行器表暴露的错误。
/// 引擎中的其他一切要么不会失败，要么是致命的：工作线程构建期间的
/// 分配和线程创建失败会 panic，工作线程内的亲和性设置失败会中止进程，
/// 因为回收引擎内部不存在合理的恢复方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimError {
    /// The CPU index is outside `0..maxcpus`.
    /// CPU 索引超出 `0..maxcpus` 范围。
    InvalidCpu,
    /// The per-CPU table is unavailable (the CPU count could not be probed).
    /// 每 CPU 表不可用（无法探测 CPU 数量）。
    NoMemory,
    /// The per-CPU slot already has a runner assigned.
    /// 该每 CPU 槽位已经分配了运行器。
    Exists,
}

impl fmt::Display for ReclaimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReclaimError::InvalidCpu => write!(f, "CPU index out of range"),
            ReclaimError::NoMemory => write!(f, "per-CPU runner table unavailable"),
            ReclaimError::Exists => write!(f, "CPU slot already has a runner"),
        }
    }
}

impl Error for ReclaimError {}

use crate::sync::AtomicPtr;
use std::boxed::Box;
use std::ptr;

/// Callback invoked after a grace period. The pointer is the `ReclaimHead`
/// that was passed to `defer_reclaim`; the callback owns the embedding
/// allocation from this point on and is expected to free it.
///
/// 在一个宽限期之后调用的回调。指针是传给 `defer_reclaim` 的
/// `ReclaimHead`；从此刻起回调拥有内嵌的分配，并应当释放它。
pub type ReclaimFn = unsafe fn(*mut ReclaimHead);

/// A reclamation request node.
///
/// Users embed a `ReclaimHead` at offset zero of a `#[repr(C)]` struct and
/// recover the embedding object inside the callback by casting the head
/// pointer back. The engine owns the node from enqueue until the callback
/// returns; the callback destroys it.
///
/// A head with no callback is a queue sentinel and is freed by the drain
/// loop instead of being invoked.
///
/// 一个回收请求节点。
/// 用户将 `ReclaimHead` 内嵌在 `#[repr(C)]` 结构体的偏移零处，
/// 并在回调内通过指针转换恢复内嵌对象。从入队到回调返回，
/// 节点由引擎拥有；回调负责销毁它。
/// 没有回调的节点是队列哨兵，由排空循环释放而不是被调用。
#[repr(C)]
pub struct ReclaimHead {
    pub(crate) next: AtomicPtr<ReclaimHead>,
    pub(crate) func: Option<ReclaimFn>,
}

impl ReclaimHead {
    #[inline]
    pub fn new() -> Self {
        ReclaimHead {
            next: AtomicPtr::new(ptr::null_mut()),
            func: None,
        }
    }

    /// Heap-allocate the dummy sentinel of a queue.
    /// 为队列堆分配哨兵节点。
    pub(crate) fn dummy() -> *mut ReclaimHead {
        Box::into_raw(Box::new(ReclaimHead::new()))
    }
}

impl Default for ReclaimHead {
    fn default() -> Self {
        Self::new()
    }
}

/// Generic destructor for deferred drops.
/// Converts the raw pointer back to `Box<T>` and drops it.
///
/// 延迟 drop 的通用析构函数。
/// 将原始指针转换回 `Box<T>` 并将其 drop。
#[inline(always)]
unsafe fn drop_value<T>(ptr: *mut ()) {
    drop(Box::from_raw(ptr as *mut T));
}

/// Owned node backing the safe `defer_drop` API: a callback head plus a
/// type-erased pointer and destructor, allocated as a single `Box`. The
/// callback frees the erased value and then the node itself.
///
/// 支撑安全 `defer_drop` API 的自有节点：一个回调头加上类型擦除的
/// 指针和析构函数，作为单个 `Box` 分配。回调释放被擦除的值，
/// 然后释放节点本身。
#[repr(C)]
pub(crate) struct DeferredDrop {
    head: ReclaimHead,
    ptr: *mut (),
    dtor: unsafe fn(*mut ()),
}

impl DeferredDrop {
    /// Build a node for `value` and return it as a head pointer, with the
    /// callback already installed.
    ///
    /// 为 `value` 构建节点并以头指针形式返回，回调已经安装好。
    pub(crate) fn new<T: Send + 'static>(value: Box<T>) -> *mut ReclaimHead {
        let mut node = Box::new(DeferredDrop {
            head: ReclaimHead::new(),
            ptr: Box::into_raw(value) as *mut (),
            dtor: drop_value::<T>,
        });
        node.head.func = Some(Self::invoke);
        Box::into_raw(node) as *mut ReclaimHead
    }

    /// The reclamation callback: runs the erased destructor, then releases
    /// the node allocation.
    ///
    /// 回收回调：运行被擦除的析构函数，然后释放节点分配。
    unsafe fn invoke(head: *mut ReclaimHead) {
        let node = Box::from_raw(head as *mut DeferredDrop);
        (node.dtor)(node.ptr);
    }
}

use crate::defer::ReclaimHead;
use crate::sync::{AtomicPtr, Ordering};
use std::boxed::Box;
use std::ptr;
use std::time::Duration;

use crate::sync::poll_wait;

/// Multi-producer single-consumer wait-free FIFO of callback nodes.
///
/// `head` points at the oldest node (or null while a producer is mid-link),
/// `tail` points at the `next` field of the newest node, or at `head` itself
/// when the queue is empty. A heap-allocated dummy sentinel keeps the queue
/// non-empty from the producers' perspective at creation; it flows out with
/// the first drained batch and is freed there.
///
/// Enqueue is wait-free: one tail exchange plus one store through the
/// previous slot. Between the two, the link is transiently null and the
/// single consumer spin-polls across it. Dequeue is a whole-batch snapshot,
/// owned exclusively by this queue's consumer.
///
/// 多生产者单消费者的 wait-free 回调节点 FIFO。
/// `head` 指向最老的节点（生产者链接到一半时为 null），`tail` 指向最新
/// 节点的 `next` 字段，队列为空时指向 `head` 本身。堆分配的哨兵节点
/// 使队列在创建时从生产者视角看非空；它随第一批排空流出并在那里释放。
/// 入队是 wait-free 的：一次 tail 交换加一次对前驱槽位的存储。
/// 两者之间链接短暂为 null，唯一的消费者自旋轮询跨过它。
/// 出队是整批快照，由该队列的消费者独占。
#[repr(align(64))]
pub(crate) struct WaitFreeQueue {
    head: AtomicPtr<ReclaimHead>,
    tail: AtomicPtr<AtomicPtr<ReclaimHead>>,
}

// Raw node pointers are handed between producer threads and the consumer
// through the atomics above; node ownership follows the queue protocol.
// 原始节点指针通过上面的原子量在生产者线程和消费者之间传递；
// 节点所有权遵循队列协议。
unsafe impl Send for WaitFreeQueue {}
unsafe impl Sync for WaitFreeQueue {}

/// A drained batch: a singly-linked chain plus the `next` slot of its last
/// node. The consumer that took the snapshot owns every node in it.
///
/// 一个已排空的批次：一条单链加上其最后一个节点的 `next` 槽位。
/// 取得快照的消费者拥有其中的每个节点。
pub(crate) struct Batch {
    head: *mut ReclaimHead,
    tail: *mut AtomicPtr<ReclaimHead>,
}

unsafe impl Send for Batch {}

impl WaitFreeQueue {
    pub(crate) fn new() -> Self {
        let dummy = ReclaimHead::dummy();
        let queue = WaitFreeQueue {
            head: AtomicPtr::new(dummy),
            tail: AtomicPtr::new(ptr::null_mut()),
        };
        // The dummy's next field is heap-stable, so its address can be
        // published before the struct settles at its final location.
        // 哨兵的 next 字段在堆上地址稳定，因此可以在结构体落位前发布。
        queue
            .tail
            .store(unsafe { &(*dummy).next as *const _ as *mut AtomicPtr<ReclaimHead> }, Ordering::Relaxed);
        queue
    }

    #[inline]
    fn head_slot(&self) -> *mut AtomicPtr<ReclaimHead> {
        &self.head as *const AtomicPtr<ReclaimHead> as *mut AtomicPtr<ReclaimHead>
    }

    /// Observed-empty check, usable from both sides.
    /// 两侧均可使用的空队列观测。
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Acquire) == self.head_slot()
    }

    /// Wait-free MPSC enqueue. The tail exchange is the linearization point;
    /// until the store through the previous slot lands, the predecessor's
    /// link is transiently null.
    ///
    /// wait-free 的 MPSC 入队。tail 交换是线性化点；在对前驱槽位的
    /// 存储落地之前，前驱的链接短暂为 null。
    pub(crate) fn enqueue(&self, node: *mut ReclaimHead) {
        unsafe {
            (*node).next.store(ptr::null_mut(), Ordering::Relaxed);
            let slot = &(*node).next as *const _ as *mut AtomicPtr<ReclaimHead>;
            let prev = self.tail.swap(slot, Ordering::AcqRel);
            (*prev).store(node, Ordering::Release);
        }
    }

    /// Single-consumer batch snapshot. Returns `None` when the queue is
    /// observed empty. Spin-polls at `poll` across the window where a
    /// producer has published the tail but not yet linked `head`.
    ///
    /// 单消费者批次快照。队列被观测为空时返回 `None`。
    /// 在生产者已发布 tail 但尚未链接 `head` 的窗口内以 `poll` 自旋轮询。
    pub(crate) fn drain(&self, poll: Duration) -> Option<Batch> {
        if self.is_empty() {
            return None;
        }
        let mut head;
        loop {
            head = self.head.load(Ordering::Acquire);
            if !head.is_null() {
                break;
            }
            poll_wait(poll);
        }
        self.head.store(ptr::null_mut(), Ordering::Relaxed);
        let tail = self.tail.swap(self.head_slot(), Ordering::AcqRel);
        Some(Batch { head, tail })
    }

    /// Install a whole drained batch as one logical enqueue. This is the
    /// orphan-migration path: the only operation that writes into another
    /// worker's queue externally.
    ///
    /// 将整个已排空的批次作为一次逻辑入队安装。这是孤儿迁移路径：
    /// 唯一从外部写入另一个工作线程队列的操作。
    pub(crate) fn splice(&self, batch: Batch) {
        unsafe {
            let prev = self.tail.swap(batch.tail, Ordering::AcqRel);
            (*prev).store(batch.head, Ordering::Release);
        }
    }
}

impl Batch {
    /// Walk the chain, invoking each node's callback and freeing sentinel
    /// nodes. Spin-polls at `poll` on transiently-null links. Returns the
    /// number of callbacks invoked (sentinels excluded).
    ///
    /// # Safety
    /// Single consumer only; every node in the chain must be live and owned
    /// by the caller.
    ///
    /// 遍历链条，调用每个节点的回调并释放哨兵节点。在短暂为 null 的
    /// 链接上以 `poll` 自旋轮询。返回调用的回调数量（不含哨兵）。
    ///
    /// # Safety
    /// 仅限单消费者；链中每个节点必须有效且归调用者所有。
    pub(crate) unsafe fn invoke_all(self, poll: Duration) -> usize {
        let mut invoked = 0;
        let mut node = self.head;
        while !node.is_null() {
            let slot = &(*node).next as *const _ as *mut AtomicPtr<ReclaimHead>;
            while (*node).next.load(Ordering::Acquire).is_null() && slot != self.tail {
                poll_wait(poll);
            }
            let next = (*node).next.load(Ordering::Acquire);
            match (*node).func {
                Some(func) => {
                    func(node);
                    invoked += 1;
                }
                // Queue sentinel: free it here, it never re-enters a queue.
                // 队列哨兵：在这里释放，它不会再进入队列。
                None => drop(Box::from_raw(node)),
            }
            node = next;
        }
        invoked
    }
}

impl Drop for WaitFreeQueue {
    fn drop(&mut self) {
        // By teardown the engine has drained every callback; at most the
        // never-drained sentinel remains.
        // 到销毁时引擎已经排空了所有回调；最多只剩从未被排空的哨兵。
        if self.is_empty() {
            return;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let mut node = self.head.load(Ordering::Relaxed);
        while !node.is_null() {
            unsafe {
                let slot = &(*node).next as *const _ as *mut AtomicPtr<ReclaimHead>;
                let next = (*node).next.load(Ordering::Relaxed);
                debug_assert!((*node).func.is_none(), "callback leaked at queue teardown");
                if (*node).func.is_none() {
                    drop(Box::from_raw(node));
                }
                if slot == tail {
                    break;
                }
                node = next;
            }
        }
    }
}

//! 单次写入的等待槽。
//!
//! - 每次挂起的 `next` 创建一对 `oneshot` 端点：[`Waiter`] 进入缓冲的等待队列，
//!   [`WaiterSlot`] 留在 [`Next`](crate::Next) 中等待兑现；
//! - 兑现会消耗 `Waiter`，因此每个槽位最多被写入一次；
//! - 终止以关闭写入端表达：读取端观察到 `Canceled` 即视为 `Terminated`。
//!   所有缓冲句柄被释放时，尚未兑现的槽位也因此自然收敛为终止。

use futures::channel::oneshot;

/// 等待队列中的写入端。
pub(crate) struct Waiter<T> {
    sender: oneshot::Sender<T>,
}

/// `Next` 持有的读取端。
pub(crate) type WaiterSlot<T> = oneshot::Receiver<T>;

impl<T> Waiter<T> {
    pub(crate) fn pair() -> (Self, WaiterSlot<T>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    /// 以元素兑现槽位；读取端已被丢弃时原样归还元素。
    pub(crate) fn deliver(self, value: T) -> Result<(), T> {
        self.sender.send(value)
    }

    /// 以终止信号兑现槽位。
    pub(crate) fn terminate(self) {
        drop(self.sender);
    }

    /// 读取端是否已被丢弃。
    pub(crate) fn is_abandoned(&self) -> bool {
        self.sender.is_canceled()
    }
}

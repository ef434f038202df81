use core::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use std::sync::Weak;

use futures::future::FusedFuture;

use crate::{buffer::Shared, step::Step, waiter::WaiterSlot};

/// [`Buffer::next`](crate::Buffer::next) 返回的 Future。
///
/// # 契约说明（What）
/// - 调用 `next()` 时即完成“取值或登记等待者”的判定，等待顺序以调用顺序为准，与首次轮询无关；
/// - 已就绪的结果直接返回；登记的等待槽由后续的 `push` 或 `end` 恰好兑现一次；
/// - 在兑现前丢弃该 Future 会放弃对应槽位，之后的 `push` 会跳过它；
/// - 已兑现但尚未被轮询取走时丢弃，元素会归还缓冲：交给下一个存活等待者，
///   或放回值队列头部（即使缓冲已关闭），因此丢弃请求不会丢失元素；
/// - 完成后不应再次轮询，可通过 [`FusedFuture::is_terminated`] 检查。
#[must_use = "futures do nothing unless polled"]
pub struct Next<T> {
    state: NextState<T>,
}

enum NextState<T> {
    Ready(Option<Step<T>>),
    Waiting {
        slot: WaiterSlot<T>,
        home: Weak<Shared<T>>,
    },
}

impl<T> Next<T> {
    pub(crate) fn ready(step: Step<T>) -> Self {
        Self {
            state: NextState::Ready(Some(step)),
        }
    }

    pub(crate) fn waiting(slot: WaiterSlot<T>, home: Weak<Shared<T>>) -> Self {
        Self {
            state: NextState::Waiting { slot, home },
        }
    }
}

// 不做结构化固定：等待槽本身是 `Unpin`，元素只在就绪后按值移出。
impl<T> Unpin for Next<T> {}

impl<T> Future for Next<T> {
    type Output = Step<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let step = match &mut self.state {
            NextState::Ready(step) => step.take().expect("`Next` polled after completion"),
            NextState::Waiting { slot, .. } => match Pin::new(slot).poll(cx) {
                Poll::Ready(Ok(value)) => Step::Yielded(value),
                // 写入端被关闭：缓冲已结束，或所有缓冲句柄均已释放。
                Poll::Ready(Err(_canceled)) => Step::Terminated,
                Poll::Pending => return Poll::Pending,
            },
        };
        self.state = NextState::Ready(None);
        Poll::Ready(step)
    }
}

impl<T> Drop for Next<T> {
    fn drop(&mut self) {
        let NextState::Waiting { slot, home } = &mut self.state else {
            return;
        };
        // 先关闭接收端：此后的 `push` 会把该槽位视为已放弃，已送达的元素只能在这里取回。
        slot.close();
        if let Ok(Some(value)) = slot.try_recv() {
            // 所有缓冲句柄都已释放时无人能再取值，元素随之丢弃。
            if let Some(shared) = home.upgrade() {
                shared.reclaim(value);
            }
        }
    }
}

impl<T> FusedFuture for Next<T> {
    fn is_terminated(&self) -> bool {
        matches!(self.state, NextState::Ready(None))
    }
}

impl<T> fmt::Debug for Next<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            NextState::Ready(Some(Step::Yielded(_))) => "yielded",
            NextState::Ready(Some(Step::Terminated)) => "terminated",
            NextState::Ready(None) => "completed",
            NextState::Waiting { .. } => "waiting",
        };
        f.debug_struct("Next").field("state", &state).finish()
    }
}

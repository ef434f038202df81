use core::{fmt, mem};
use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    config::BufferConfig,
    error::{PushError, TryNextError},
    next::Next,
    step::Step,
    waiter::Waiter,
};

/// 同步生产者与异步消费者之间的无界交接缓冲。
///
/// # 设计背景（Why）
/// - 生产者往往运行在回调、事件循环等无法 `await` 的位置，需要“随时可写、永不阻塞”的入口；
/// - 消费者以异步方式惰性拉取，队列为空时挂起，直到有值或缓冲关闭。
///
/// # 契约说明（What）
/// - **顺序**：元素按 `push` 顺序交付；多个消费者之间按 `next` 调用顺序轮流获得元素；
/// - **互斥**：缓冲值与挂起的等待者不会同时存在，`push` 要么直接交给最早的等待者，要么入队；
/// - **关闭**：[`Buffer::end`] 单调地关闭缓冲并以 `Terminated` 兑现所有等待者，
///   已缓冲的积压仍可继续被 `next` 取走，耗尽后永久返回 `Terminated`；
/// - **拒写**：关闭后的 `push` 返回 [`PushError`]，缓冲状态保持不变。
///
/// # 句柄语义（How）
/// - `Buffer` 是共享状态之上的廉价句柄，`clone` 得到的句柄指向同一缓冲；
/// - 每个句柄作为 [`Stream`](futures::Stream) 使用时各自保存一个在途请求，
///   多个句柄并发迭代时通过等待队列交错取值，而非各自拥有独立游标。
pub struct Buffer<T> {
    shared: Arc<Shared<T>>,
    pub(crate) in_flight: Option<Next<T>>,
}

pub(crate) struct Shared<T> {
    state: Mutex<State<T>>,
    config: BufferConfig,
}

struct State<T> {
    slots: Slots<T>,
    closed: bool,
}

/// 值队列与等待队列的互斥关系由变体本身保证。
enum Slots<T> {
    Idle,
    Buffered(VecDeque<T>),
    Waiting(VecDeque<Waiter<T>>),
}

impl<T> Buffer<T> {
    /// 创建一个空的、开放的缓冲。
    pub fn new() -> Self {
        Self::with_config(BufferConfig::default())
    }

    /// 按给定配置创建缓冲。
    pub fn with_config(config: BufferConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    slots: Slots::Idle,
                    closed: false,
                }),
                config,
            }),
            in_flight: None,
        }
    }

    /// 写入一个元素。
    ///
    /// - 若存在挂起的等待者，元素直接交给最早登记且仍存活的那一个，不经过值队列；
    /// - 否则追加到值队列尾部；
    /// - 缓冲已关闭时返回 [`PushError`] 并归还元素，不修改任何状态。
    ///
    /// 该方法从不阻塞；交付会唤醒对应消费者任务，但不会在本调用内执行它。
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        let mut state = self.shared.state.lock();
        if state.closed {
            drop(state);
            warn!(buffer = %self.label(), "rejected push into closed buffer");
            return Err(PushError(value));
        }

        match state.hand_off(value) {
            Ok(skipped) => {
                let waiting = state.waiting();
                drop(state);
                if skipped > 0 {
                    debug!(buffer = %self.label(), skipped, "skipped abandoned waiters");
                }
                trace!(buffer = %self.label(), waiting, "handed value to waiting consumer");
            }
            Err((value, skipped)) => {
                state.enqueue(value, self.shared.config.initial_capacity);
                let buffered = state.len();
                drop(state);
                if skipped > 0 {
                    debug!(buffer = %self.label(), skipped, "skipped abandoned waiters");
                }
                trace!(buffer = %self.label(), buffered, "buffered value");
            }
        }
        Ok(())
    }

    /// 关闭缓冲，并以 `Terminated` 按 FIFO 顺序兑现所有挂起的等待者。
    ///
    /// 重复调用是无副作用的空操作；已缓冲的元素保持可取。
    pub fn end(&self) {
        let (flushed, backlog, was_closed) = {
            let mut state = self.shared.state.lock();
            let was_closed = state.closed;
            let flushed = state.close();
            (flushed, state.len(), was_closed)
        };

        let flushed_count = flushed.len();
        for waiter in flushed {
            waiter.terminate();
        }

        if !was_closed {
            debug!(
                buffer = %self.label(),
                flushed = flushed_count,
                backlog,
                "buffer closed"
            );
        }
    }

    /// 拉取下一个元素。
    ///
    /// - 值队列非空：立即就绪为 `Yielded`，取出最早的元素；
    /// - 已关闭且无积压：立即就绪为 `Terminated`；
    /// - 否则在调用时登记一个等待者，返回的 Future 挂起直到该等待者被兑现。
    pub fn next(&self) -> Next<T> {
        let mut state = self.shared.state.lock();
        if let Some(value) = state.take() {
            return Next::ready(Step::Yielded(value));
        }
        if state.closed {
            return Next::ready(Step::Terminated);
        }

        let (waiter, slot) = Waiter::pair();
        state.register(waiter);
        let waiting = state.waiting();
        drop(state);
        trace!(buffer = %self.label(), waiting, "consumer waiting for value");
        Next::waiting(slot, Arc::downgrade(&self.shared))
    }

    /// 提前终止迭代：关闭缓冲并直接报告 `Terminated`。
    ///
    /// 仍在值队列中的积压不会被清空，其他句柄继续调用 `next` 依旧能取到；
    /// 调用方若在此后停止迭代，这部分积压即被放弃。
    pub fn terminate(&self) -> Step<T> {
        self.end();
        Step::Terminated
    }

    /// 不挂起地尝试取出下一个元素，从不登记等待者。
    pub fn try_next(&self) -> Result<T, TryNextError> {
        let mut state = self.shared.state.lock();
        match state.take() {
            Some(value) => Ok(value),
            None if state.closed => Err(TryNextError::Terminated),
            None => Err(TryNextError::Empty),
        }
    }

    /// 返回指向同一缓冲的迭代句柄。
    ///
    /// 缓冲本身就是单遍序列：多次调用得到的句柄共享同一份值与等待队列。
    pub fn iterate(&self) -> Self {
        self.clone()
    }

    /// 当前已缓冲、尚未交付的元素数量。
    pub fn len(&self) -> usize {
        self.shared.state.lock().len()
    }

    /// 是否没有已缓冲的元素。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前登记且尚未兑现的等待者数量。
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().waiting()
    }

    /// 缓冲是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// 创建时使用的配置。
    pub fn config(&self) -> &BufferConfig {
        &self.shared.config
    }

    fn label(&self) -> &str {
        &self.shared.config.label
    }
}

impl<T> Shared<T> {
    /// 归还一个已兑现却未被取走的元素。
    ///
    /// 该元素早于值队列中的任何元素写入：有存活等待者时转交给最早的一个，
    /// 否则放回值队列头部。缓冲已关闭时同样放回，留给后续的 `next` 排空。
    pub(crate) fn reclaim(&self, value: T) {
        let mut state = self.state.lock();
        let (handed, skipped) = match state.hand_off(value) {
            Ok(skipped) => (true, skipped),
            Err((value, skipped)) => {
                state.requeue(value, self.config.initial_capacity);
                (false, skipped)
            }
        };
        let buffered = state.len();
        drop(state);
        debug!(
            buffer = %self.config.label,
            handed,
            skipped,
            buffered,
            "reclaimed value from dropped consumer"
        );
    }
}

impl<T> State<T> {
    /// 把元素交给最早的存活等待者。
    ///
    /// 成功时返回跳过的已放弃槽位数；没有存活等待者时归还元素。
    fn hand_off(&mut self, mut value: T) -> Result<usize, (T, usize)> {
        let mut skipped = 0;
        let outcome = match &mut self.slots {
            Slots::Waiting(waiters) => loop {
                let Some(waiter) = waiters.pop_front() else {
                    break Err((value, skipped));
                };
                match waiter.deliver(value) {
                    Ok(()) => break Ok(skipped),
                    Err(returned) => {
                        value = returned;
                        skipped += 1;
                    }
                }
            },
            Slots::Idle | Slots::Buffered(_) => Err((value, 0)),
        };
        self.settle();
        outcome
    }

    fn enqueue(&mut self, value: T, initial_capacity: usize) {
        debug_assert!(!matches!(self.slots, Slots::Waiting(_)));
        if let Slots::Buffered(values) = &mut self.slots {
            values.push_back(value);
            return;
        }
        let mut values = VecDeque::with_capacity(initial_capacity.max(1));
        values.push_back(value);
        self.slots = Slots::Buffered(values);
    }

    /// 放回值队列头部；与 `enqueue` 不同，关闭后依然允许。
    fn requeue(&mut self, value: T, initial_capacity: usize) {
        debug_assert!(!matches!(self.slots, Slots::Waiting(_)));
        if let Slots::Buffered(values) = &mut self.slots {
            values.push_front(value);
            return;
        }
        let mut values = VecDeque::with_capacity(initial_capacity.max(1));
        values.push_back(value);
        self.slots = Slots::Buffered(values);
    }

    fn take(&mut self) -> Option<T> {
        let Slots::Buffered(values) = &mut self.slots else {
            return None;
        };
        let value = values.pop_front();
        self.settle();
        value
    }

    fn register(&mut self, waiter: Waiter<T>) {
        debug_assert!(!self.closed);
        debug_assert!(!matches!(self.slots, Slots::Buffered(_)));
        if let Slots::Waiting(waiters) = &mut self.slots {
            // 只清理队首的已放弃槽位；中间的槽位留给 `push` 跳过或 `end` 清空。
            while waiters.front().is_some_and(Waiter::is_abandoned) {
                waiters.pop_front();
            }
            waiters.push_back(waiter);
            return;
        }
        self.slots = Slots::Waiting(VecDeque::from([waiter]));
    }

    /// 标记关闭并取出全部等待者，值队列原样保留。
    fn close(&mut self) -> VecDeque<Waiter<T>> {
        self.closed = true;
        match mem::replace(&mut self.slots, Slots::Idle) {
            Slots::Waiting(waiters) => waiters,
            other => {
                self.slots = other;
                VecDeque::new()
            }
        }
    }

    /// 队列被取空后回到 `Idle`。
    fn settle(&mut self) {
        let drained = match &self.slots {
            Slots::Idle => false,
            Slots::Buffered(values) => values.is_empty(),
            Slots::Waiting(waiters) => waiters.is_empty(),
        };
        if drained {
            self.slots = Slots::Idle;
        }
    }

    fn len(&self) -> usize {
        match &self.slots {
            Slots::Buffered(values) => values.len(),
            Slots::Idle | Slots::Waiting(_) => 0,
        }
    }

    fn waiting(&self) -> usize {
        match &self.slots {
            Slots::Waiting(waiters) => waiters.len(),
            Slots::Idle | Slots::Buffered(_) => 0,
        }
    }
}

impl<T> Clone for Buffer<T> {
    /// 新句柄共享同一缓冲，但不继承在途的流请求。
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            in_flight: None,
        }
    }
}

impl<T> Default for Buffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Buffer")
            .field("label", &self.shared.config.label)
            .field("len", &state.len())
            .field("waiting", &state.waiting())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures::{
        FutureExt,
        executor::{LocalPool, block_on},
        task::LocalSpawnExt,
    };
    use std::{cell::RefCell, rc::Rc};
    use tracing_test::traced_test;

    use super::*;

    #[test]
    fn push_buffers_when_nobody_waits() {
        let buffer = Buffer::new();
        buffer.push(1).unwrap();
        buffer.push(2).unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.waiting(), 0);
        assert!(!buffer.is_closed());
    }

    #[test]
    fn pending_next_receives_value_without_buffering() {
        let buffer = Buffer::new();
        let pending = buffer.next();
        assert_eq!(buffer.waiting(), 1);

        buffer.push("hello").unwrap();
        assert_eq!(buffer.len(), 0, "直接交付的元素不应出现在值队列中");
        assert_eq!(buffer.waiting(), 0);
        assert_eq!(block_on(pending), Step::Yielded("hello"));
    }

    #[test]
    fn waiters_and_values_never_coexist() {
        let buffer = Buffer::new();
        let first = buffer.next();
        let second = buffer.next();
        buffer.push(1).unwrap();
        assert_eq!((buffer.len(), buffer.waiting()), (0, 1));
        buffer.push(2).unwrap();
        assert_eq!((buffer.len(), buffer.waiting()), (0, 0));
        buffer.push(3).unwrap();
        assert_eq!((buffer.len(), buffer.waiting()), (1, 0));

        assert_eq!(block_on(first), Step::Yielded(1));
        assert_eq!(block_on(second), Step::Yielded(2));
        assert_eq!(buffer.try_next(), Ok(3));
    }

    #[test]
    fn end_flushes_waiters_and_keeps_backlog() {
        let buffer = Buffer::new();
        buffer.push(10).unwrap();
        buffer.end();
        assert!(buffer.is_closed());
        assert_eq!(buffer.len(), 1);

        let buffer = Buffer::<u8>::new();
        let pending = buffer.next();
        buffer.end();
        assert_eq!(buffer.waiting(), 0);
        assert_eq!(block_on(pending), Step::Terminated);
    }

    #[test]
    fn end_is_idempotent() {
        let buffer = Buffer::new();
        buffer.push('a').unwrap();
        buffer.end();
        buffer.end();
        assert!(buffer.is_closed());
        assert_eq!(buffer.try_next(), Ok('a'));
        assert_eq!(buffer.try_next(), Err(TryNextError::Terminated));
    }

    #[test]
    fn rejected_push_leaves_state_untouched() {
        let buffer = Buffer::new();
        buffer.push(1).unwrap();
        buffer.end();

        let error = buffer.push(2).unwrap_err();
        assert_eq!(error.into_inner(), 2);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.waiting(), 0);
        assert!(buffer.is_closed());
    }

    #[test]
    fn try_next_distinguishes_empty_from_terminated() {
        let buffer = Buffer::<u8>::new();
        assert_eq!(buffer.try_next(), Err(TryNextError::Empty));
        assert_eq!(buffer.waiting(), 0, "try_next 不登记等待者");
        buffer.end();
        assert_eq!(buffer.try_next(), Err(TryNextError::Terminated));
    }

    #[test]
    fn dropped_next_does_not_swallow_value() {
        let buffer = Buffer::new();
        let abandoned = buffer.next();
        let live = buffer.next();
        drop(abandoned);

        buffer.push(5).unwrap();
        assert_eq!(block_on(live), Step::Yielded(5));

        let abandoned = buffer.next();
        drop(abandoned);
        buffer.push(6).unwrap();
        assert_eq!(buffer.len(), 1, "只剩已放弃槽位时元素应进入值队列");
        assert_eq!(buffer.try_next(), Ok(6));
    }

    #[test]
    fn registering_prunes_abandoned_waiters() {
        let buffer = Buffer::<u8>::new();
        drop(buffer.next());
        drop(buffer.next());
        let _live = buffer.next();
        assert_eq!(buffer.waiting(), 1);
    }

    #[test]
    fn registering_stops_pruning_at_live_waiter() {
        let buffer = Buffer::new();
        let first = buffer.next();
        let abandoned = buffer.next();
        drop(abandoned);
        let third = buffer.next();
        assert_eq!(buffer.waiting(), 3, "队首存活时不扫描后续槽位");

        buffer.push(1).unwrap();
        buffer.push(2).unwrap();
        assert_eq!(buffer.waiting(), 0);
        assert_eq!(block_on(first), Step::Yielded(1));
        assert_eq!(block_on(third), Step::Yielded(2));
    }

    #[test]
    fn fulfilled_but_unpolled_next_returns_value_on_drop() {
        let buffer = Buffer::new();
        let pending = buffer.next();
        buffer.push(1).unwrap();
        drop(pending);
        buffer.end();

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.try_next(), Ok(1));
        assert_eq!(buffer.try_next(), Err(TryNextError::Terminated));
    }

    #[test]
    fn reclaimed_value_goes_ahead_of_backlog() {
        let buffer = Buffer::new();
        let pending = buffer.next();
        buffer.push(1).unwrap();
        buffer.push(2).unwrap();
        buffer.push(3).unwrap();
        drop(pending);

        assert_eq!(buffer.try_next(), Ok(1));
        assert_eq!(buffer.try_next(), Ok(2));
        assert_eq!(buffer.try_next(), Ok(3));
    }

    #[test]
    fn reclaimed_value_is_handed_to_next_live_waiter() {
        let buffer = Buffer::new();
        let first = buffer.next();
        let second = buffer.next();
        buffer.push(1).unwrap();
        drop(first);

        assert_eq!(buffer.len(), 0);
        assert_eq!(block_on(second), Step::Yielded(1));
    }

    #[test]
    fn pending_next_terminates_when_all_handles_drop() {
        let buffer = Buffer::<u8>::new();
        let pending = buffer.next();
        drop(buffer);
        assert_eq!(block_on(pending), Step::Terminated);
    }

    #[test]
    fn initial_capacity_is_applied_on_first_buffered_value() {
        let buffer = Buffer::with_config(BufferConfig::default().with_initial_capacity(32));
        buffer.push(1_u64).unwrap();
        let state = buffer.shared.state.lock();
        match &state.slots {
            Slots::Buffered(values) => assert!(values.capacity() >= 32),
            _ => panic!("缓冲应处于 Buffered 状态"),
        }
    }

    #[test]
    fn ready_next_is_fused_after_completion() {
        use futures::future::FusedFuture;

        let buffer = Buffer::new();
        buffer.push(1).unwrap();
        let mut next = buffer.next();
        assert!(!next.is_terminated());
        assert_eq!((&mut next).now_or_never(), Some(Step::Yielded(1)));
        assert!(next.is_terminated());
    }

    #[test]
    fn cooperative_consumers_are_served_in_call_order() {
        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        let buffer = Buffer::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for id in 0..2 {
            let consumer = buffer.clone();
            let seen = Rc::clone(&seen);
            spawner
                .spawn_local(async move {
                    while let Step::Yielded(value) = consumer.next().await {
                        seen.borrow_mut().push((id, value));
                    }
                })
                .unwrap();
        }

        pool.run_until_stalled();
        assert_eq!(buffer.waiting(), 2);

        for value in 0..4 {
            buffer.push(value).unwrap();
            pool.run_until_stalled();
        }
        buffer.end();
        pool.run();

        assert_eq!(*seen.borrow(), vec![(0, 0), (1, 1), (0, 2), (1, 3)]);
    }

    #[traced_test]
    #[test]
    fn lifecycle_events_are_logged() {
        let buffer = Buffer::with_config(BufferConfig::default().with_label("ingest"));
        let pending = buffer.next();
        buffer.push(1).unwrap();
        buffer.push(2).unwrap();
        buffer.end();
        assert!(buffer.push(3).is_err());
        assert_eq!(block_on(pending), Step::Yielded(1));

        assert!(logs_contain("consumer waiting for value"));
        assert!(logs_contain("handed value to waiting consumer"));
        assert!(logs_contain("buffered value"));
        assert!(logs_contain("buffer closed"));
        assert!(logs_contain("rejected push into closed buffer"));
        assert!(logs_contain("buffer=ingest"));
    }

    #[traced_test]
    #[test]
    fn reclaimed_value_is_logged() {
        let buffer = Buffer::with_config(BufferConfig::default().with_label("ingest"));
        let pending = buffer.next();
        buffer.push(1).unwrap();
        drop(pending);

        assert_eq!(buffer.try_next(), Ok(1));
        assert!(logs_contain("reclaimed value from dropped consumer"));
        assert!(logs_contain("handed=false"));
    }
}

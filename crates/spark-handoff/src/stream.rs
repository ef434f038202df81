//! 把 [`Buffer`] 暴露为单遍异步序列。
//!
//! - 每次轮询复用句柄上保存的在途 [`Next`](crate::Next)，没有时才发起新的 `next()`；
//! - `Terminated` 映射为 `None`，之后的轮询持续返回 `None`；
//! - 句柄被丢弃时在途请求随之放弃，缓冲会跳过它继续交付后续元素；
//!   若请求已被兑现但尚未取走，元素归还缓冲，由其他句柄继续取得。

use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{Stream, stream::FusedStream};

use crate::buffer::Buffer;

impl<T> Stream for Buffer<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut next = match self.in_flight.take() {
            Some(next) => next,
            None => self.next(),
        };
        match Pin::new(&mut next).poll(cx) {
            Poll::Ready(step) => Poll::Ready(step.into_option()),
            Poll::Pending => {
                self.in_flight = Some(next);
                Poll::Pending
            }
        }
    }
}

impl<T> FusedStream for Buffer<T> {
    fn is_terminated(&self) -> bool {
        self.in_flight.is_none() && self.is_closed() && self.is_empty()
    }
}

#![deny(unsafe_code)]
#![deny(missing_docs)]

//! `spark-handoff` 提供同步生产者与异步消费者之间的交接缓冲 [`Buffer`]。
//!
//! # 模块定位（Why）
//! - 生产者可在任意同步上下文中调用 [`Buffer::push`]，不会阻塞，也不受容量限制；
//! - 消费者通过 [`Buffer::next`] 或 [`futures::Stream`] 惰性拉取元素，队列为空时挂起，
//!   在新值到达或缓冲关闭时自动恢复。
//!
//! # 设计概要（How）
//! - 内部状态是一个三态标签联合：空闲、持有缓冲值、持有等待者；值队列与等待者队列
//!   不可能同时非空；
//! - 每个挂起的 `next` 对应一个单次写入的等待槽（`futures::channel::oneshot`），
//!   由 `push` 或 `end` 按 FIFO 顺序恰好兑现一次；
//! - 所有状态共享同一把 `parking_lot::Mutex`，在单调度器与多线程下都保持不变量。
//!
//! # 使用示例
//!
//! ```
//! use futures::{StreamExt, executor::block_on};
//! use spark_handoff::Buffer;
//!
//! let buffer = Buffer::new();
//! buffer.push(1).unwrap();
//! buffer.push(2).unwrap();
//! buffer.end();
//!
//! let drained: Vec<i32> = block_on(buffer.iterate().collect());
//! assert_eq!(drained, vec![1, 2]);
//! ```

mod buffer;
mod config;
mod error;
mod next;
mod step;
mod stream;
mod waiter;

pub use buffer::Buffer;
pub use config::BufferConfig;
pub use error::{ConfigError, PushError, TryNextError};
pub use next::Next;
pub use step::Step;

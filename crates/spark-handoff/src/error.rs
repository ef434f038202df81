//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 缓冲运行期只有一种错误：关闭之后仍尝试写入（[`PushError`]）；
//! - `next` 在已关闭且为空的缓冲上返回 [`Step::Terminated`](crate::Step)，属于正常终止而非错误；
//! - 非挂起的 [`Buffer::try_next`](crate::Buffer::try_next) 与配置加载各自有独立的错误枚举。
//!
//! ## 设计要求（What）
//! - 全部派生 `thiserror::Error`，可直接参与 `?` 传播；
//! - `PushError<T>` 归还被拒绝的元素，且其 `Debug` 不要求 `T: Debug`。

use core::fmt;

use thiserror::Error;

/// 向已关闭的缓冲写入时返回的错误，携带被拒绝的元素。
///
/// - **契约 (What)**：返回该错误时缓冲状态未被修改；调用方可通过 [`PushError::into_inner`]
///   取回元素自行处理。
#[derive(Error, Clone, Copy, PartialEq, Eq)]
#[error("iterable buffer is already closed")]
pub struct PushError<T>(pub T);

impl<T> PushError<T> {
    /// 取回被拒绝的元素。
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PushError(..)")
    }
}

/// [`Buffer::try_next`](crate::Buffer::try_next) 的失败原因。
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryNextError {
    /// 缓冲暂时为空但仍开放，稍后可能有新值。
    #[error("iterable buffer is empty")]
    Empty,
    /// 缓冲已关闭且积压已耗尽。
    #[error("iterable buffer is terminated")]
    Terminated,
}

/// 加载 [`BufferConfig`](crate::BufferConfig) 失败。
#[derive(Error, Debug)]
pub enum ConfigError {
    /// TOML 文本无法解析为配置结构。
    #[error("failed to parse buffer configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// 字段值不满足约束。
    #[error("invalid buffer configuration field `{field}`: {detail}")]
    Invalid {
        /// 出错字段名。
        field: &'static str,
        /// 人类可读说明。
        detail: String,
    },
}

/// 单次拉取的结果。
///
/// # 契约说明（What）
/// - `Yielded` 携带一个恰好交付一次的元素；
/// - `Terminated` 表示序列已永久结束，之后的拉取只会继续得到 `Terminated`。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Step<T> {
    /// 交付的元素。
    Yielded(T),
    /// 序列结束，不携带值。
    Terminated,
}

impl<T> Step<T> {
    /// 是否为终止结果。
    pub fn is_terminated(&self) -> bool {
        matches!(self, Step::Terminated)
    }

    /// 借用交付的元素。
    pub fn value(&self) -> Option<&T> {
        match self {
            Step::Yielded(value) => Some(value),
            Step::Terminated => None,
        }
    }

    /// 转换为 `Option`，与 `Stream::poll_next` 的 `None` 终止约定对齐。
    pub fn into_option(self) -> Option<T> {
        match self {
            Step::Yielded(value) => Some(value),
            Step::Terminated => None,
        }
    }
}

impl<T> From<Step<T>> for Option<T> {
    fn from(step: Step<T>) -> Self {
        step.into_option()
    }
}

impl<T> From<Option<T>> for Step<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Step::Yielded(value),
            None => Step::Terminated,
        }
    }
}

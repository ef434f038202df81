use serde::Deserialize;

use crate::error::ConfigError;

/// 交接缓冲的静态配置。
///
/// # 契约说明（What）
/// - `label`：写入每条 `tracing` 事件的 `buffer` 字段，用于在多个缓冲并存时区分日志来源；
/// - `initial_capacity`：缓冲首次从空闲转入“持有值”状态时为值队列预留的槽位数，`0` 表示按需增长。
///
/// # 加载方式（How）
/// - 代码内通过 [`BufferConfig::default`] 与链式 setter 构造；
/// - 或从 TOML 文本加载，缺省字段取默认值：
///
/// ```toml
/// label = "ingest"
/// initial_capacity = 64
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    /// 日志标签。
    pub label: String,
    /// 值队列的初始容量。
    pub initial_capacity: usize,
}

impl BufferConfig {
    /// 默认日志标签。
    pub const DEFAULT_LABEL: &'static str = "handoff";

    /// 设置日志标签。
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// 设置值队列的初始容量。
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// 从 TOML 文本解析配置并校验。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: BufferConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验字段约束：标签不能为空白。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.label.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "label",
                detail: "label must not be blank".to_owned(),
            });
        }
        Ok(())
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            label: Self::DEFAULT_LABEL.to_owned(),
            initial_capacity: 0,
        }
    }
}

//! 传播配置

use crate::backend::EntryKind;

/// 两类拦截器共用的传播参数
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropagationConfig {
    /// 消费端开启事务时使用的名称
    pub transaction_label: String,
    /// 出站调用的交换类型（标识这是一次消息交换）
    pub exit_type: String,
    /// 消费端事务的入口类型
    pub entry_kind: EntryKind,
    /// 消费端是否以异步方式续接上游事务
    pub resume_async: bool,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            transaction_label: "CustomInterceptor".to_string(),
            exit_type: "Kafka".to_string(),
            entry_kind: EntryKind::Pojo,
            resume_async: false,
        }
    }
}

impl PropagationConfig {
    pub fn with_transaction_label(mut self, label: impl Into<String>) -> Self {
        self.transaction_label = label.into();
        self
    }

    pub fn with_exit_type(mut self, exit_type: impl Into<String>) -> Self {
        self.exit_type = exit_type.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PropagationConfig::default();
        assert_eq!(config.transaction_label, "CustomInterceptor");
        assert_eq!(config.exit_type, "Kafka");
        assert_eq!(config.entry_kind, EntryKind::Pojo);
        assert!(!config.resume_async);
    }

    #[test]
    fn test_overrides() {
        let config = PropagationConfig::default()
            .with_transaction_label("orders-consumer")
            .with_exit_type("RabbitMQ");
        assert_eq!(config.transaction_label, "orders-consumer");
        assert_eq!(config.exit_type, "RabbitMQ");
    }
}

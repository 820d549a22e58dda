//! 头部访问错误定义
//!
//! 这些错误只在 crate 内部流转：对外的拦截入口会把它们降级为日志，
//! 永远不会传播到宿主流水线。

use thiserror::Error;

/// 动态访问记录头部或其所在对象图时可能出现的错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// 对象的具体类型没有注册所请求的操作
    #[error("type `{type_name}` does not support `{operation}`")]
    UnsupportedShape {
        type_name: &'static str,
        operation: &'static str,
    },

    /// 对象类型已知，但没有注册对应名称的字段/方法
    #[error("type `{type_name}` has no member `{member}`")]
    MissingMember {
        type_name: &'static str,
        member: String,
    },

    /// 头部条目的值不是字节序列
    #[error("header entry of type `{type_name}` is not byte-shaped")]
    NotBytes { type_name: &'static str },

    /// 头部存储已被冻结（例如消息已发送后不可再修改）
    #[error("header store is read-only")]
    ReadOnly,

    /// 头部值不是合法的 UTF-8
    #[error("correlation header is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// 内部访问结果类型
pub type AccessResult<T> = Result<T, AccessError>;

//! 追踪后端契约
//!
//! 令牌的分配、事务的生命周期以及事务与执行上下文的绑定都由后端负责；
//! 拦截器只通过这里的三个 trait 与后端交互。

use crate::token::CorrelationToken;
use std::fmt;

pub mod context;
mod memory;

pub use memory::{
    InMemoryTracer, MemoryExitCall, MemoryTransaction, TraceEvent, DEFAULT_JOURNAL_CAPACITY,
};

/// 事务入口类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EntryKind {
    #[default]
    Pojo,
    Http,
    Messaging,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Pojo => "POJO",
            EntryKind::Http => "HTTP",
            EntryKind::Messaging => "MESSAGING",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 出站调用标记
///
/// 由 [`Transaction::start_exit_call`] 返回，携带要写入消息的关联令牌。
/// `end` 消费标记本身，所以同一个标记不可能被关闭两次。
pub trait ExitCall {
    fn correlation_token(&self) -> Option<CorrelationToken>;

    fn end(self);
}

/// 追踪工作单元
pub trait Transaction {
    type ExitCall: ExitCall;

    fn unique_id(&self) -> String;

    /// 声明即将发生的出站调用；后端拒绝（采样等）时返回 `None`
    fn start_exit_call(
        &self,
        operation: &str,
        target: &str,
        exit_type: &str,
        is_async: bool,
    ) -> Option<Self::ExitCall>;

    fn end(self);
}

/// 关联令牌提供者
pub trait TracingBackend: Send + Sync {
    type Transaction: Transaction;

    /// 当前执行上下文上绑定的事务
    fn current_transaction(&self) -> Option<Self::Transaction>;

    /// 以传播过来的令牌开启（或按 `is_async` 续接）一个事务，并绑定到当前执行上下文
    fn start_transaction(
        &self,
        label: &str,
        token: &CorrelationToken,
        entry: EntryKind,
        is_async: bool,
    ) -> Self::Transaction;
}

/// 某个后端的出站调用标记类型
pub type ExitCallOf<B> = <<B as TracingBackend>::Transaction as Transaction>::ExitCall;

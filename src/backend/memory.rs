//! 进程内追踪后端
//!
//! 不依赖任何外部 APM 代理：分配令牌、把事务绑定到执行上下文，并把每次
//! 生命周期变化写入日志簿，供宿主诊断或测试断言使用。

use super::context;
use super::{EntryKind, ExitCall, Transaction, TracingBackend};
use crate::token::CorrelationToken;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 后端记录的生命周期事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    TransactionStarted {
        id: u64,
        label: String,
        correlation: Option<CorrelationToken>,
        entry: EntryKind,
        is_async: bool,
    },
    TransactionEnded {
        id: u64,
    },
    ExitCallStarted {
        transaction: u64,
        exit_call: u64,
        operation: String,
        target: String,
        exit_type: String,
        token: Option<CorrelationToken>,
    },
    ExitCallEnded {
        exit_call: u64,
    },
}

/// 默认保留的最近事件条数
pub const DEFAULT_JOURNAL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct TracerState {
    next_id: AtomicU64,
    journal: Mutex<VecDeque<TraceEvent>>,
    journal_capacity: usize,
    exit_calls_started: AtomicUsize,
    exit_calls_ended: AtomicUsize,
    decline_exit_calls: AtomicBool,
    omit_tokens: AtomicBool,
}

impl TracerState {
    fn new(journal_capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            journal: Mutex::new(VecDeque::with_capacity(journal_capacity)),
            journal_capacity,
            exit_calls_started: AtomicUsize::new(0),
            exit_calls_ended: AtomicUsize::new(0),
            decline_exit_calls: AtomicBool::new(false),
            omit_tokens: AtomicBool::new(false),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn journal(&self) -> MutexGuard<'_, VecDeque<TraceEvent>> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: TraceEvent) {
        tracing::debug!(?event, "Trace event");
        if self.journal_capacity == 0 {
            return;
        }
        let mut journal = self.journal();
        if journal.len() == self.journal_capacity {
            journal.pop_front();
        }
        journal.push_back(event);
    }
}

/// 进程内追踪后端
///
/// 克隆共享同一份状态。事件日志只保留最近的 [`DEFAULT_JOURNAL_CAPACITY`] 条，
/// 出站调用的开闭计数独立于日志。
///
/// # 示例
/// ```
/// use stream_trace::{ExitCall, InMemoryTracer, Transaction, TracingBackend};
///
/// let tracer = InMemoryTracer::new();
/// let transaction = tracer.begin("checkout");
/// assert!(tracer.current_transaction().is_some());
///
/// let exit_call = transaction.start_exit_call("orders", "orders", "Kafka", false).unwrap();
/// assert!(exit_call.correlation_token().is_some());
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryTracer {
    state: Arc<TracerState>,
}

impl Default for InMemoryTracer {
    fn default() -> Self {
        Self::with_journal_capacity(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl InMemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定事件日志保留的条数；为 0 时不记录事件，也不再触碰日志锁
    pub fn with_journal_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(TracerState::new(capacity)),
        }
    }

    /// 开启一个本地发起的事务并绑定到当前线程
    pub fn begin(&self, label: &str) -> MemoryTransaction {
        let transaction = self.begin_detached(label);
        context::bind(transaction.clone());
        transaction
    }

    /// 开启一个本地发起的事务但不绑定，
    /// 由调用方通过 [`with_transaction`](context::with_transaction) 等作用域进入
    pub fn begin_detached(&self, label: &str) -> MemoryTransaction {
        self.open(label, None, EntryKind::Pojo, false)
    }

    /// 模拟采样：之后的出站调用全部被拒绝
    pub fn decline_exit_calls(&self, decline: bool) {
        self.state.decline_exit_calls.store(decline, Ordering::Relaxed);
    }

    /// 之后开启的出站调用不携带令牌
    pub fn omit_tokens(&self, omit: bool) {
        self.state.omit_tokens.store(omit, Ordering::Relaxed);
    }

    /// 日志中仍保留的事件，按发生顺序
    pub fn events(&self) -> Vec<TraceEvent> {
        self.state.journal().iter().cloned().collect()
    }

    /// 已开启但尚未结束的出站调用数量（不受日志容量影响）
    pub fn open_exit_calls(&self) -> usize {
        let ended = self.state.exit_calls_ended.load(Ordering::Acquire);
        let started = self.state.exit_calls_started.load(Ordering::Acquire);
        started.saturating_sub(ended)
    }

    /// 日志中仍保留的、以关联令牌开启的事务
    pub fn correlated_transactions(&self) -> Vec<(u64, CorrelationToken)> {
        self.state
            .journal()
            .iter()
            .filter_map(|event| match event {
                TraceEvent::TransactionStarted {
                    id,
                    correlation: Some(token),
                    ..
                } => Some((*id, token.clone())),
                _ => None,
            })
            .collect()
    }

    fn open(
        &self,
        label: &str,
        correlation: Option<CorrelationToken>,
        entry: EntryKind,
        is_async: bool,
    ) -> MemoryTransaction {
        let id = self.state.next_id();
        self.state.record(TraceEvent::TransactionStarted {
            id,
            label: label.to_owned(),
            correlation: correlation.clone(),
            entry,
            is_async,
        });
        MemoryTransaction {
            id,
            label: Arc::from(label),
            correlation,
            ended: Arc::new(AtomicBool::new(false)),
            state: Arc::clone(&self.state),
        }
    }
}

impl TracingBackend for InMemoryTracer {
    type Transaction = MemoryTransaction;

    fn current_transaction(&self) -> Option<MemoryTransaction> {
        context::current_transaction()
    }

    fn start_transaction(
        &self,
        label: &str,
        token: &CorrelationToken,
        entry: EntryKind,
        is_async: bool,
    ) -> MemoryTransaction {
        let transaction = self.open(label, Some(token.clone()), entry, is_async);
        context::bind(transaction.clone());
        transaction
    }
}

/// [`InMemoryTracer`] 的事务句柄，克隆指向同一个事务
#[derive(Debug, Clone)]
pub struct MemoryTransaction {
    id: u64,
    label: Arc<str>,
    correlation: Option<CorrelationToken>,
    ended: Arc<AtomicBool>,
    state: Arc<TracerState>,
}

impl MemoryTransaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// 开启该事务时使用的上游令牌
    pub fn correlation(&self) -> Option<&CorrelationToken> {
        self.correlation.as_ref()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }
}

impl Transaction for MemoryTransaction {
    type ExitCall = MemoryExitCall;

    fn unique_id(&self) -> String {
        format!("{}#{}", self.label, self.id)
    }

    fn start_exit_call(
        &self,
        operation: &str,
        target: &str,
        exit_type: &str,
        _is_async: bool,
    ) -> Option<MemoryExitCall> {
        if self.is_ended() || self.state.decline_exit_calls.load(Ordering::Relaxed) {
            return None;
        }

        let token = if self.state.omit_tokens.load(Ordering::Relaxed) {
            None
        } else {
            Some(CorrelationToken::generate())
        };
        let id = self.state.next_id();
        self.state.exit_calls_started.fetch_add(1, Ordering::AcqRel);
        self.state.record(TraceEvent::ExitCallStarted {
            transaction: self.id,
            exit_call: id,
            operation: operation.to_owned(),
            target: target.to_owned(),
            exit_type: exit_type.to_owned(),
            token: token.clone(),
        });

        Some(MemoryExitCall {
            id,
            token,
            state: Arc::clone(&self.state),
        })
    }

    fn end(self) {
        if self.ended.swap(true, Ordering::AcqRel) {
            tracing::warn!(transaction = self.id, "Transaction already ended");
            return;
        }
        context::unbind(self.id);
        self.state.record(TraceEvent::TransactionEnded { id: self.id });
    }
}

/// [`InMemoryTracer`] 的出站调用标记
#[derive(Debug)]
pub struct MemoryExitCall {
    id: u64,
    token: Option<CorrelationToken>,
    state: Arc<TracerState>,
}

impl MemoryExitCall {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl ExitCall for MemoryExitCall {
    fn correlation_token(&self) -> Option<CorrelationToken> {
        self.token.clone()
    }

    fn end(self) {
        self.state.exit_calls_ended.fetch_add(1, Ordering::AcqRel);
        self.state.record(TraceEvent::ExitCallEnded { exit_call: self.id });
    }
}

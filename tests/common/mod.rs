//! 集成测试共用的替身实现

#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use stream_trace::{
    AccessResult, CorrelationToken, EntryKind, ExitCall, HeaderAccessor, ReflectiveAccessor,
    Reflector, Transaction, TracingBackend,
};

/// 总是返回固定令牌的后端，统计出站调用与事务的开闭次数
#[derive(Clone, Default)]
pub struct FixedBackend {
    pub token: Option<String>,
    pub active: Arc<AtomicBool>,
    pub panic_on_lookup: bool,
    pub exit_calls_started: Arc<AtomicUsize>,
    pub exit_calls_ended: Arc<AtomicUsize>,
    pub transactions_started: Arc<AtomicUsize>,
    pub transactions_ended: Arc<AtomicUsize>,
}

impl FixedBackend {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            active: Arc::new(AtomicBool::new(true)),
            ..Default::default()
        }
    }

    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn count(counter: &Arc<AtomicUsize>) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct FixedTransaction {
    backend: FixedBackend,
}

pub struct FixedExitCall {
    token: Option<String>,
    ended: Arc<AtomicUsize>,
}

impl ExitCall for FixedExitCall {
    fn correlation_token(&self) -> Option<CorrelationToken> {
        self.token.as_deref().map(CorrelationToken::from)
    }

    fn end(self) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }
}

impl Transaction for FixedTransaction {
    type ExitCall = FixedExitCall;

    fn unique_id(&self) -> String {
        "fixed".to_string()
    }

    fn start_exit_call(&self, _: &str, _: &str, _: &str, _: bool) -> Option<FixedExitCall> {
        self.backend.exit_calls_started.fetch_add(1, Ordering::SeqCst);
        Some(FixedExitCall {
            token: self.backend.token.clone(),
            ended: Arc::clone(&self.backend.exit_calls_ended),
        })
    }

    fn end(self) {
        self.backend.active.store(false, Ordering::SeqCst);
        self.backend.transactions_ended.fetch_add(1, Ordering::SeqCst);
    }
}

impl TracingBackend for FixedBackend {
    type Transaction = FixedTransaction;

    fn current_transaction(&self) -> Option<FixedTransaction> {
        if self.panic_on_lookup {
            panic!("agent not initialised");
        }
        self.active.load(Ordering::SeqCst).then(|| FixedTransaction {
            backend: self.clone(),
        })
    }

    fn start_transaction(
        &self,
        _: &str,
        _: &CorrelationToken,
        _: EntryKind,
        _: bool,
    ) -> FixedTransaction {
        self.active.store(true, Ordering::SeqCst);
        self.transactions_started.fetch_add(1, Ordering::SeqCst);
        FixedTransaction {
            backend: self.clone(),
        }
    }
}

/// 统计底层访问次数的访问器
#[derive(Clone)]
pub struct CountingAccessor {
    inner: ReflectiveAccessor,
    pub calls: Arc<AtomicUsize>,
}

impl CountingAccessor {
    pub fn new() -> Self {
        Self {
            inner: ReflectiveAccessor::new(Reflector::record_model()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl HeaderAccessor for CountingAccessor {
    fn try_get<'a>(&self, headers: &'a dyn Any, key: &str) -> AccessResult<Option<&'a dyn Any>> {
        self.tick();
        self.inner.try_get(headers, key)
    }

    fn try_set(&self, headers: &mut dyn Any, key: &str, value: &[u8]) -> AccessResult<()> {
        self.tick();
        self.inner.try_set(headers, key, value)
    }

    fn try_remove(&self, headers: &mut dyn Any, key: &str) -> AccessResult<()> {
        self.tick();
        self.inner.try_remove(headers, key)
    }

    fn try_unwrap(&self, entry: &dyn Any) -> AccessResult<Option<Vec<u8>>> {
        self.tick();
        self.inner.try_unwrap(entry)
    }

    fn try_member<'a>(&self, obj: &'a dyn Any, name: &str) -> AccessResult<Option<&'a dyn Any>> {
        self.tick();
        self.inner.try_member(obj, name)
    }
}

/// 安装日志订阅者（重复调用无害）
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

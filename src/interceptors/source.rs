//! 入站（source）拦截器
//!
//! 在记录交给下游处理之前，从头部取出上游令牌并以它开启一个关联事务；
//! 记录处理结束时结束当前事务。

use super::{Interceptor, Invocation, Outcome};
use crate::accessor::{HeaderAccessor, HeaderPath, PathRoot, ReflectiveAccessor};
use crate::backend::{Transaction, TracingBackend};
use crate::config::PropagationConfig;
use crate::reflect::Reflector;
use crate::rules::Rule;
use crate::token::CorrelationToken;
use crate::CORRELATION_HEADER;
use std::any::Any;

/// 入站注入点的位置以及从调用输入到头部存储的路径
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceConfig {
    pub rules: Vec<Rule>,
    pub header_path: HeaderPath,
}

impl SourceConfig {
    /// `SourceNode#process(Object, Object)`：节点 → `context` → `headers`
    pub fn source_node_process() -> Self {
        let rule = Rule::builder("org.apache.kafka.streams.processor.internals.SourceNode")
            .method("process")
            .with_params(["java.lang.Object", "java.lang.Object"])
            .build();
        Self {
            rules: vec![rule],
            header_path: HeaderPath::from_target(&["context", "headers"]),
        }
    }

    /// `ProcessorNode#process`：节点 → `context` → `recordContext` → `headers`
    pub fn processor_node_process() -> Self {
        let rule = Rule::builder("org.apache.kafka.streams.processor.internals.ProcessorNode")
            .method("process")
            .build();
        Self {
            rules: vec![rule],
            header_path: HeaderPath::from_target(&["context", "recordContext", "headers"]),
        }
    }

    /// `ProcessorContextImpl#setRecordContext(ProcessorRecordContext)`：参数 0 → `headers`
    pub fn context_update() -> Self {
        let rule =
            Rule::builder("org.apache.kafka.streams.processor.internals.ProcessorContextImpl")
                .method("setRecordContext")
                .with_params([
                    "org.apache.kafka.streams.processor.internals.ProcessorRecordContext",
                ])
                .build();
        Self {
            rules: vec![rule],
            header_path: HeaderPath::from_param(0, &["headers"]),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::source_node_process()
    }
}

/// 入站拦截器
pub struct SourceInterceptor<B, A = ReflectiveAccessor> {
    backend: B,
    accessor: A,
    config: SourceConfig,
    propagation: PropagationConfig,
}

impl<B: TracingBackend> SourceInterceptor<B> {
    pub fn new(backend: B, reflector: Reflector, config: SourceConfig) -> Self {
        Self::with_accessor(backend, ReflectiveAccessor::new(reflector), config)
    }
}

impl<B, A> SourceInterceptor<B, A>
where
    B: TracingBackend,
    A: HeaderAccessor,
{
    pub fn with_accessor(backend: B, accessor: A, config: SourceConfig) -> Self {
        Self {
            backend,
            accessor,
            config,
            propagation: PropagationConfig::default(),
        }
    }

    pub fn with_propagation(mut self, propagation: PropagationConfig) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// 从路径起点解析头部，找到令牌时开启关联事务
    ///
    /// 返回用于开启事务的令牌；`None` 表示本条记录没有被关联。
    pub fn begin(&self, root: Option<&dyn Any>) -> Option<CorrelationToken> {
        super::contain("source begin", || self.begin_inner(root)).flatten()
    }

    /// 结束当前事务（无论 `begin` 是否开启过）
    pub fn end(&self) {
        super::contain("source end", || match self.backend.current_transaction() {
            Some(transaction) => {
                tracing::info!(transaction = %transaction.unique_id(), "Ending transaction");
                transaction.end();
            }
            None => tracing::warn!("No transaction on intercepted method end"),
        });
    }

    fn begin_inner(&self, root: Option<&dyn Any>) -> Option<CorrelationToken> {
        let token = self.extract(root)?;
        let transaction = self.backend.start_transaction(
            &self.propagation.transaction_label,
            &token,
            self.propagation.entry_kind,
            self.propagation.resume_async,
        );
        tracing::info!(
            transaction = %transaction.unique_id(),
            %token,
            "Started correlated transaction"
        );
        Some(token)
    }

    fn extract(&self, root: Option<&dyn Any>) -> Option<CorrelationToken> {
        let headers = root.and_then(|root| self.config.header_path.resolve(&self.accessor, root));
        let Some(headers) = headers else {
            tracing::info!(path = ?self.config.header_path.members(), "Header store not reachable");
            return None;
        };

        let Some(entry) = self.accessor.get(headers, CORRELATION_HEADER) else {
            tracing::info!("Correlation header not found");
            return None;
        };

        let Some(bytes) = self.accessor.unwrap(entry) else {
            tracing::warn!("Correlation header has no byte payload");
            return None;
        };

        match CorrelationToken::from_utf8(&bytes) {
            Ok(token) => {
                tracing::info!(%token, "Found correlation header");
                Some(token)
            }
            Err(error) => {
                tracing::error!(%error, "Correlation header could not be decoded");
                None
            }
        }
    }
}

impl<B, A> Interceptor for SourceInterceptor<B, A>
where
    B: TracingBackend,
    A: HeaderAccessor,
{
    type State = CorrelationToken;

    fn rules(&self) -> &[Rule] {
        &self.config.rules
    }

    fn on_method_begin(&self, invocation: &mut Invocation<'_>) -> Option<CorrelationToken> {
        tracing::info!(
            class = invocation.class_name(),
            method = invocation.method_name(),
            "Consumer interceptor begin"
        );
        let root = match self.config.header_path.root() {
            PathRoot::Target => invocation.target(),
            PathRoot::Param(index) => invocation.param_ref(index),
        };
        self.begin(root)
    }

    fn on_method_end(
        &self,
        state: Option<CorrelationToken>,
        invocation: &mut Invocation<'_>,
        _outcome: Outcome,
    ) {
        tracing::info!(
            class = invocation.class_name(),
            method = invocation.method_name(),
            correlated = state.is_some(),
            "Consumer interceptor end"
        );
        self.end();
    }
}

//! 出站（sink）拦截器
//!
//! 在消息即将离开拓扑时，为其头部写入一个与当前事务相关联的新令牌，
//! 并开启一个出站调用标记；标记在发送结束时关闭。

use super::{Interceptor, Invocation, Outcome};
use crate::accessor::{HeaderAccessor, ReflectiveAccessor};
use crate::backend::{ExitCall, ExitCallOf, Transaction, TracingBackend};
use crate::config::PropagationConfig;
use crate::error::AccessResult;
use crate::reflect::Reflector;
use crate::rules::Rule;
use crate::token::CorrelationToken;
use crate::CORRELATION_HEADER;
use std::any::Any;

/// 出站注入点的位置与参数布局
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkConfig {
    pub rules: Vec<Rule>,
    /// 目标（topic）参数的位置
    pub destination_param: usize,
    /// 头部存储参数的位置
    pub headers_param: usize,
}

impl SinkConfig {
    /// Kafka Streams `RecordCollectorImpl#send`
    pub fn record_collector_send() -> Self {
        let rule = Rule::builder("org.apache.kafka.streams.processor.internals.RecordCollectorImpl")
            .method("send")
            .with_params([
                "java.lang.String",
                "java.lang.Object",
                "java.lang.Object",
                "org.apache.kafka.common.header.Headers",
                "java.lang.Integer",
                "java.lang.Long",
                "org.apache.kafka.common.serialization.Serializer",
                "org.apache.kafka.common.serialization.Serializer",
            ])
            .build();
        Self {
            rules: vec![rule],
            destination_param: 0,
            headers_param: 3,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::record_collector_send()
    }
}

/// 出站拦截器
pub struct SinkInterceptor<B, A = ReflectiveAccessor> {
    backend: B,
    accessor: A,
    config: SinkConfig,
    propagation: PropagationConfig,
}

impl<B: TracingBackend> SinkInterceptor<B> {
    /// 使用默认注入点和基于注册表的访问器
    pub fn new(backend: B, reflector: Reflector) -> Self {
        Self::with_accessor(backend, ReflectiveAccessor::new(reflector), SinkConfig::default())
    }
}

impl<B, A> SinkInterceptor<B, A>
where
    B: TracingBackend,
    A: HeaderAccessor,
{
    pub fn with_accessor(backend: B, accessor: A, config: SinkConfig) -> Self {
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

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// 发送前：替换关联头并开启出站调用
    ///
    /// 返回的标记必须交给 [`end`](Self::end)；`None` 表示没有需要关闭的东西。
    pub fn begin(&self, destination: &str, headers: Option<&mut dyn Any>) -> Option<ExitCallOf<B>> {
        super::contain("sink begin", || self.begin_inner(destination, headers)).flatten()
    }

    /// 发送后（无论成功与否）：关闭出站调用标记
    pub fn end(&self, state: Option<ExitCallOf<B>>) {
        super::contain("sink end", || match state {
            Some(exit_call) => exit_call.end(),
            None => tracing::debug!("No exit call to end"),
        });
    }

    fn begin_inner(
        &self,
        destination: &str,
        headers: Option<&mut dyn Any>,
    ) -> Option<ExitCallOf<B>> {
        let Some(headers) = headers else {
            tracing::warn!(destination, "Headers argument is absent, nothing to annotate");
            return None;
        };

        let Some(transaction) = self.backend.current_transaction() else {
            tracing::info!(destination, "No active transaction, sending without correlation");
            return None;
        };

        let Some(exit_call) = transaction.start_exit_call(
            destination,
            destination,
            &self.propagation.exit_type,
            false,
        ) else {
            tracing::warn!(destination, "Backend declined the exit call");
            return None;
        };

        // 标记一旦开启就必须交给 end，注入中的 panic 只在这里截住
        super::contain("sink inject", || match exit_call.correlation_token() {
            Some(token) => {
                tracing::info!(destination, %token, "Exit call correlation token");
                if let Err(error) = self.inject(headers, &token) {
                    tracing::error!(destination, %error, "Correlation header injection skipped");
                }
            }
            None => {
                tracing::warn!(
                    destination,
                    "Exit call carries no correlation token, injection skipped"
                );
            }
        });

        Some(exit_call)
    }

    /// 删除旧的关联头后写入新令牌，保证至多一条
    fn inject(&self, headers: &mut dyn Any, token: &CorrelationToken) -> AccessResult<()> {
        let previous = self
            .accessor
            .get(&*headers, CORRELATION_HEADER)
            .and_then(|entry| self.accessor.unwrap(entry))
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        tracing::info!(?previous, "Current correlation header");

        self.accessor.try_remove(headers, CORRELATION_HEADER)?;
        self.accessor.try_set(headers, CORRELATION_HEADER, token.as_bytes())
    }
}

impl<B, A> Interceptor for SinkInterceptor<B, A>
where
    B: TracingBackend,
    A: HeaderAccessor,
{
    type State = ExitCallOf<B>;

    fn rules(&self) -> &[Rule] {
        &self.config.rules
    }

    fn on_method_begin(&self, invocation: &mut Invocation<'_>) -> Option<Self::State> {
        let index = self.config.destination_param;
        let destination = invocation
            .param_as::<String>(index)
            .cloned()
            .or_else(|| invocation.param_as::<&'static str>(index).map(|s| s.to_string()));
        let Some(destination) = destination else {
            tracing::warn!(
                class = invocation.class_name(),
                method = invocation.method_name(),
                "Destination argument is absent"
            );
            return None;
        };

        self.begin(&destination, invocation.param_mut(self.config.headers_param))
    }

    fn on_method_end(
        &self,
        state: Option<Self::State>,
        _invocation: &mut Invocation<'_>,
        _outcome: Outcome,
    ) {
        self.end(state);
    }
}

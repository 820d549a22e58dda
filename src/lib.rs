//! 跨消息边界的关联令牌传播
//!
//! 在流处理拓扑的出站点（sink）把当前追踪事务的关联令牌写入消息头，
//! 在入站点（source）读出令牌并开启关联事务，从而把生产端与消费端的工作单元串联起来。
//! 消息头的具体类型不是编译期依赖：所有读写都经由 [`HeaderAccessor`] 在运行时完成，
//! 任何访问失败都只会变成日志，消息本身照常流转。
//!
//! ## Usage
//!
//! ```
//! use stream_trace::{
//!     InMemoryTracer, ProcessorContext, ProcessorNode, RecordContext, RecordHeaders,
//!     Reflector, SinkInterceptor, SourceConfig, SourceInterceptor, TracingBackend, Transaction,
//! };
//!
//! let tracer = InMemoryTracer::new();
//! let reflector = Reflector::record_model();
//! let sink = SinkInterceptor::new(tracer.clone(), reflector.clone());
//! let source = SourceInterceptor::new(tracer.clone(), reflector, SourceConfig::source_node_process());
//!
//! // 生产端：当前线程上有一个活动事务
//! let producer = tracer.begin("checkout");
//! let mut headers = RecordHeaders::new();
//! let exit_call = sink.begin("orders", Some(&mut headers));
//! // ... 消息被发送 ...
//! sink.end(exit_call);
//! producer.end();
//!
//! // 消费端：记录连同头部到达源节点
//! let node = ProcessorNode {
//!     name: "KSTREAM-SOURCE-0000000000".into(),
//!     context: Some(ProcessorContext {
//!         record_context: Some(RecordContext { headers: Some(headers), ..Default::default() }),
//!     }),
//! };
//! let token = source.begin(Some(&node)).expect("header carries a token");
//! assert_eq!(tracer.current_transaction().unwrap().correlation(), Some(&token));
//! source.end();
//! ```

mod accessor;
mod backend;
mod config;
mod error;
mod interceptors;
mod record;
mod reflect;
mod rules;
mod token;

pub use accessor::{HeaderAccessor, HeaderPath, PathRoot, ReflectiveAccessor};
pub use backend::context::{current_transaction, in_transaction, with_transaction};
pub use backend::{
    EntryKind, ExitCall, ExitCallOf, InMemoryTracer, MemoryExitCall, MemoryTransaction, TraceEvent,
    TracingBackend, Transaction, DEFAULT_JOURNAL_CAPACITY,
};
pub use config::PropagationConfig;
pub use error::{AccessError, AccessResult};
pub use interceptors::{
    intercept, DiagnosticInterceptor, Interceptor, Invocation, Outcome, SinkConfig,
    SinkInterceptor, SourceConfig, SourceInterceptor,
};
pub use record::{Header, ProcessorContext, ProcessorNode, RecordContext, RecordHeaders};
pub use reflect::{Reflector, ReflectorBuilder};
pub use rules::{ClassMatch, MatchPoint, Pin, Rule, RuleBuilder, StringMatch};
pub use token::CorrelationToken;

/// 消息头中保存关联令牌的保留键
pub const CORRELATION_HEADER: &str = "singularityheader";

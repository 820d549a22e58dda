//! Example: correlation token propagation through a two-stage pipeline
//!
//! A producer thread sends records through an intercepted `RecordCollectorImpl#send`,
//! a consumer thread receives them at an intercepted `SourceNode#process`.
//! Run with `RUST_LOG=stream_trace=debug` to see every interceptor decision.

use std::sync::mpsc;
use std::thread;
use stream_trace::{
    intercept, InMemoryTracer, Invocation, ProcessorContext, ProcessorNode, RecordContext,
    RecordHeaders, Reflector, SinkConfig, SinkInterceptor, SourceConfig, SourceInterceptor,
    TraceEvent, TracingBackend, Transaction,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const MESSAGES: usize = 3;

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_thread_names(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let tracer = InMemoryTracer::new();
    let reflector = Reflector::record_model();
    let (sender, receiver) = mpsc::channel::<(String, RecordHeaders)>();

    let producer = {
        let tracer = tracer.clone();
        let sink = SinkInterceptor::new(tracer.clone(), reflector.clone());
        thread::Builder::new()
            .name("producer".into())
            .spawn(move || {
                let config = SinkConfig::record_collector_send();
                let rule = &config.rules[0];
                let types = rule.params().unwrap_or_default();

                for n in 0..MESSAGES {
                    let transaction = tracer.begin("checkout");
                    let mut topic = "orders".to_string();
                    let mut key = format!("order-{n}");
                    let mut value = format!("{{\"order\":{n}}}");
                    let mut headers = RecordHeaders::new();

                    let mut invocation = Invocation::new(rule.class_name(), "send")
                        .param(&types[0], &mut topic)
                        .param(&types[1], &mut key)
                        .param(&types[2], &mut value)
                        .param(&types[3], &mut headers)
                        .null_param(&types[4])
                        .null_param(&types[5])
                        .null_param(&types[6])
                        .null_param(&types[7]);
                    intercept(&sink, &mut invocation, |_| tracing::info!("Record sent"));
                    drop(invocation);

                    transaction.end();
                    if sender.send((key, headers)).is_err() {
                        break;
                    }
                }
            })
            .expect("spawn producer")
    };

    let consumer = {
        let tracer = tracer.clone();
        let config = SourceConfig::source_node_process();
        let source = SourceInterceptor::new(tracer.clone(), reflector, config.clone());
        thread::Builder::new()
            .name("consumer".into())
            .spawn(move || {
                let rule = &config.rules[0];
                let types = rule.params().unwrap_or_default();

                for (mut key, headers) in receiver {
                    let node = ProcessorNode {
                        name: "KSTREAM-SOURCE-0000000000".into(),
                        context: Some(ProcessorContext {
                            record_context: Some(RecordContext {
                                topic: "orders".into(),
                                headers: Some(headers),
                                ..Default::default()
                            }),
                        }),
                    };
                    let mut value = String::new();
                    let mut invocation = Invocation::new(rule.class_name(), "process")
                        .with_target(&node)
                        .param(&types[0], &mut key)
                        .param(&types[1], &mut value);

                    intercept(&source, &mut invocation, |inv| {
                        let correlation = tracer
                            .current_transaction()
                            .and_then(|transaction| transaction.correlation().cloned());
                        tracing::info!(
                            key = ?inv.param_as::<String>(0),
                            ?correlation,
                            "Processing record"
                        );
                    });
                }
            })
            .expect("spawn consumer")
    };

    producer.join().expect("producer panicked");
    consumer.join().expect("consumer panicked");

    for event in tracer.events() {
        if let TraceEvent::TransactionStarted {
            id,
            correlation: Some(token),
            ..
        } = event
        {
            tracing::info!(transaction = id, %token, "Correlated consumer transaction");
        }
    }
}

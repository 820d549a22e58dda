//! 拦截器与织入入口
//!
//! 宿主在每个注入点构造一个 [`Invocation`]，交给 [`intercept`]：
//! 先按规则判断是否命中，再依次执行 `on_method_begin`、被拦截的调用本身、
//! `on_method_end`。拦截器内部的任何 panic 都在这里被截住，
//! 被拦截调用自身的 panic 会在 `on_method_end` 执行完之后原样继续传播。

use crate::rules::Rule;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

mod sink;
mod source;

pub use sink::{SinkConfig, SinkInterceptor};
pub use source::{SourceConfig, SourceInterceptor};

/// 被拦截调用的一个参数
struct Param<'a> {
    type_name: &'a str,
    value: Option<&'a mut dyn Any>,
}

/// 一次被拦截的方法调用
pub struct Invocation<'a> {
    class_name: &'a str,
    supertypes: &'a [&'a str],
    method_name: &'a str,
    target: Option<&'a dyn Any>,
    params: Vec<Param<'a>>,
}

impl<'a> Invocation<'a> {
    pub fn new(class_name: &'a str, method_name: &'a str) -> Self {
        Self {
            class_name,
            supertypes: &[],
            method_name,
            target: None,
            params: Vec::new(),
        }
    }

    /// 方法的接收者
    pub fn with_target(mut self, target: &'a dyn Any) -> Self {
        self.target = Some(target);
        self
    }

    /// 接收者的父类/接口，供 `ExtendsClass`/`ImplementsInterface` 规则匹配
    pub fn with_supertypes(mut self, supertypes: &'a [&'a str]) -> Self {
        self.supertypes = supertypes;
        self
    }

    pub fn param(mut self, type_name: &'a str, value: &'a mut dyn Any) -> Self {
        self.params.push(Param {
            type_name,
            value: Some(value),
        });
        self
    }

    /// 值为空的参数
    pub fn null_param(mut self, type_name: &'a str) -> Self {
        self.params.push(Param {
            type_name,
            value: None,
        });
        self
    }

    pub fn class_name(&self) -> &str {
        self.class_name
    }

    pub fn method_name(&self) -> &str {
        self.method_name
    }

    pub fn target(&self) -> Option<&dyn Any> {
        self.target
    }

    pub fn param_types(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.params.iter().map(|param| param.type_name)
    }

    pub fn param_ref(&self, index: usize) -> Option<&dyn Any> {
        self.params.get(index)?.value.as_deref()
    }

    pub fn param_mut(&mut self, index: usize) -> Option<&mut dyn Any> {
        self.params.get_mut(index)?.value.as_deref_mut()
    }

    pub fn param_as<T: Any>(&self, index: usize) -> Option<&T> {
        self.param_ref(index)?.downcast_ref::<T>()
    }

    pub fn param_as_mut<T: Any>(&mut self, index: usize) -> Option<&mut T> {
        self.param_mut(index)?.downcast_mut::<T>()
    }

    /// 是否命中任意一条规则
    pub fn matches_any(&self, rules: &[Rule]) -> bool {
        rules.iter().any(|rule| {
            rule.matches(
                self.class_name,
                self.supertypes,
                self.method_name,
                self.param_types(),
            )
        })
    }
}

/// 被拦截调用的结局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Returned,
    Panicked,
}

/// 一个注入角色的拦截器
///
/// `on_method_begin` 返回的状态由调用方原样交回 `on_method_end`，
/// 拦截器自身不保存任何跨调用的可变状态。
pub trait Interceptor: Send + Sync {
    type State;

    fn rules(&self) -> &[Rule];

    fn on_method_begin(&self, invocation: &mut Invocation<'_>) -> Option<Self::State>;

    fn on_method_end(
        &self,
        state: Option<Self::State>,
        invocation: &mut Invocation<'_>,
        outcome: Outcome,
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

/// 执行拦截逻辑并截住其中的 panic
pub(crate) fn contain<T>(operation: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            tracing::error!(
                operation,
                panic = panic_message(payload.as_ref()),
                "Interceptor failure contained"
            );
            None
        }
    }
}

/// 在一个注入点上运行拦截器
///
/// 规则不命中时直接执行 `call`。命中时保证 `on_method_end` 恰好执行一次，
/// 即使 `call` 发生 panic。
pub fn intercept<'a, I, R>(
    interceptor: &I,
    invocation: &mut Invocation<'a>,
    call: impl FnOnce(&mut Invocation<'a>) -> R,
) -> R
where
    I: Interceptor + ?Sized,
{
    if !invocation.matches_any(interceptor.rules()) {
        return call(invocation);
    }

    let begun = contain("onMethodBegin", || interceptor.on_method_begin(invocation));
    let state = match begun {
        Some(state) => state,
        None => {
            tracing::warn!(
                class = invocation.class_name(),
                method = invocation.method_name(),
                "Begin state lost; ending without it"
            );
            None
        }
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| call(invocation)));
    let outcome = if result.is_ok() {
        Outcome::Returned
    } else {
        Outcome::Panicked
    };

    contain("onMethodEnd", || interceptor.on_method_end(state, invocation, outcome));

    match result {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// 诊断用拦截器：只记录命中方法的进入与退出
#[derive(Debug, Clone)]
pub struct DiagnosticInterceptor {
    rules: Vec<Rule>,
}

impl DiagnosticInterceptor {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }
}

impl Interceptor for DiagnosticInterceptor {
    type State = ();

    fn rules(&self) -> &[Rule] {
        &self.rules
    }

    fn on_method_begin(&self, invocation: &mut Invocation<'_>) -> Option<()> {
        tracing::info!(
            class = invocation.class_name(),
            method = invocation.method_name(),
            "INTERCEPTOR BEGIN"
        );
        None
    }

    fn on_method_end(&self, _state: Option<()>, invocation: &mut Invocation<'_>, outcome: Outcome) {
        tracing::info!(
            class = invocation.class_name(),
            method = invocation.method_name(),
            ?outcome,
            "INTERCEPTOR END"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CLASS: &str = "com.example.Pipeline";

    #[derive(Default)]
    struct Counting {
        rules: Vec<Rule>,
        begins: AtomicUsize,
        ends: AtomicUsize,
        panic_in_begin: bool,
    }

    impl Interceptor for Counting {
        type State = usize;

        fn rules(&self) -> &[Rule] {
            &self.rules
        }

        fn on_method_begin(&self, _invocation: &mut Invocation<'_>) -> Option<usize> {
            if self.panic_in_begin {
                panic!("begin exploded");
            }
            Some(self.begins.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn on_method_end(
            &self,
            state: Option<usize>,
            _invocation: &mut Invocation<'_>,
            _outcome: Outcome,
        ) {
            assert_eq!(state.is_some(), !self.panic_in_begin);
            self.ends.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting(panic_in_begin: bool) -> Counting {
        Counting {
            rules: vec![Rule::builder(CLASS).method("run").build()],
            panic_in_begin,
            ..Default::default()
        }
    }

    #[test]
    fn test_invocation_params() {
        let mut topic = String::from("orders");
        let mut partition = 3_i32;
        let mut invocation = Invocation::new(CLASS, "send")
            .param("java.lang.String", &mut topic)
            .null_param("java.lang.Object")
            .param("java.lang.Integer", &mut partition);

        assert_eq!(invocation.param_as::<String>(0).unwrap(), "orders");
        assert!(invocation.param_ref(1).is_none());
        assert!(invocation.param_as::<String>(2).is_none(), "类型不符");
        assert!(invocation.param_ref(9).is_none(), "越界");
        *invocation.param_as_mut::<i32>(2).unwrap() += 1;
        assert_eq!(
            invocation.param_types().collect::<Vec<_>>(),
            ["java.lang.String", "java.lang.Object", "java.lang.Integer"]
        );
        drop(invocation);
        assert_eq!(partition, 4);
    }

    #[test]
    fn test_unmatched_rules_never_fire() {
        let interceptor = counting(false);
        let mut invocation = Invocation::new(CLASS, "other");

        let value = intercept(&interceptor, &mut invocation, |_| 7);
        assert_eq!(value, 7);
        assert_eq!(interceptor.begins.load(Ordering::SeqCst), 0);
        assert_eq!(interceptor.ends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_begin_and_end_run_once() {
        let interceptor = counting(false);
        let mut invocation = Invocation::new(CLASS, "run");

        let value = intercept(&interceptor, &mut invocation, |inv| inv.method_name().len());
        assert_eq!(value, 3);
        assert_eq!(interceptor.begins.load(Ordering::SeqCst), 1);
        assert_eq!(interceptor.ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_end_runs_when_call_panics() {
        let interceptor = counting(false);
        let mut invocation = Invocation::new(CLASS, "run");

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            intercept(&interceptor, &mut invocation, |_| -> () { panic!("send failed") })
        }));

        assert!(result.is_err(), "宿主调用的 panic 应继续传播");
        assert_eq!(interceptor.ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_begin_is_contained() {
        let interceptor = counting(true);
        let mut invocation = Invocation::new(CLASS, "run");

        let value = intercept(&interceptor, &mut invocation, |_| "delivered");
        assert_eq!(value, "delivered");
        assert_eq!(interceptor.ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_contain_reports_panic_message() {
        assert_eq!(contain("op", || 1), Some(1));
        assert_eq!(contain::<()>("op", || panic!("boom")), None);

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }

    #[test]
    fn test_diagnostic_interceptor() {
        let rules = vec![Rule::builder(CLASS).method("run").build()];
        let diagnostic = DiagnosticInterceptor::new(rules);
        let mut invocation = Invocation::new(CLASS, "run");
        assert_eq!(intercept(&diagnostic, &mut invocation, |_| 1), 1);
    }
}

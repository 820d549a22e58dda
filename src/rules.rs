//! 注入点声明
//!
//! 规则只描述“观察宿主的哪个方法、在什么时机”，如何把拦截器织入宿主由宿主负责。
//! 声明在运行时解析不到（宿主版本不符）时，对应的拦截器只是永远不会被触发。

/// 类型匹配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassMatch {
    #[default]
    MatchesClass,
    ExtendsClass,
    ImplementsInterface,
}

/// 名称字符串匹配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringMatch {
    #[default]
    Equals,
    StartsWith,
    EndsWith,
    Contains,
}

impl StringMatch {
    pub fn matches(&self, pattern: &str, candidate: &str) -> bool {
        match self {
            StringMatch::Equals => candidate == pattern,
            StringMatch::StartsWith => candidate.starts_with(pattern),
            StringMatch::EndsWith => candidate.ends_with(pattern),
            StringMatch::Contains => candidate.contains(pattern),
        }
    }
}

/// 观察点位于匹配操作之前还是之后
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPoint {
    #[default]
    Before,
    After,
}

/// 把观察点固定到方法体内部的某个位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pin {
    /// 某个局部变量第 N 次被读/写时
    LocalVariable {
        name: String,
        write: bool,
        occurrence: u32,
    },
    /// 方法体内第 N 次调用某个方法时
    MethodInvocation { method: String, occurrence: u32 },
}

/// 一条注入点声明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    class_name: String,
    class_match: ClassMatch,
    class_string_match: StringMatch,
    method_name: String,
    method_string_match: StringMatch,
    params: Option<Vec<String>>,
    point: MatchPoint,
    pin: Option<Pin>,
}

impl Rule {
    pub fn builder(class_name: impl Into<String>) -> RuleBuilder {
        RuleBuilder::new(class_name)
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// 参数签名；`None` 表示不限制参数
    pub fn params(&self) -> Option<&[String]> {
        self.params.as_deref()
    }

    pub fn point(&self) -> MatchPoint {
        self.point
    }

    pub fn pin(&self) -> Option<&Pin> {
        self.pin.as_ref()
    }

    /// 判断一个调用点是否命中本规则
    pub fn matches<'s>(
        &self,
        class_name: &str,
        supertypes: &[&str],
        method_name: &str,
        param_types: impl IntoIterator<Item = &'s str>,
    ) -> bool {
        let class_hit = match self.class_match {
            ClassMatch::MatchesClass => {
                self.class_string_match.matches(&self.class_name, class_name)
            }
            ClassMatch::ExtendsClass | ClassMatch::ImplementsInterface => supertypes
                .iter()
                .any(|supertype| self.class_string_match.matches(&self.class_name, supertype)),
        };
        if !class_hit || !self.method_string_match.matches(&self.method_name, method_name) {
            return false;
        }
        match &self.params {
            None => true,
            Some(expected) => expected.iter().map(String::as_str).eq(param_types),
        }
    }
}

/// [`Rule`] 构建器
///
/// # 示例
/// ```
/// use stream_trace::{MatchPoint, Rule, StringMatch};
///
/// let rule = Rule::builder("org.apache.kafka.streams.processor.internals.SourceNode")
///     .method("process")
///     .method_string_match(StringMatch::Equals)
///     .with_params(["java.lang.Object", "java.lang.Object"])
///     .at(MatchPoint::Before)
///     .build();
///
/// assert!(rule.matches(
///     "org.apache.kafka.streams.processor.internals.SourceNode",
///     &[],
///     "process",
///     ["java.lang.Object", "java.lang.Object"],
/// ));
/// ```
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    rule: Rule,
}

impl RuleBuilder {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            rule: Rule {
                class_name: class_name.into(),
                class_match: ClassMatch::default(),
                class_string_match: StringMatch::default(),
                method_name: String::new(),
                method_string_match: StringMatch::default(),
                params: None,
                point: MatchPoint::default(),
                pin: None,
            },
        }
    }

    pub fn class_match(mut self, class_match: ClassMatch) -> Self {
        self.rule.class_match = class_match;
        self
    }

    pub fn class_string_match(mut self, string_match: StringMatch) -> Self {
        self.rule.class_string_match = string_match;
        self
    }

    pub fn method(mut self, method_name: impl Into<String>) -> Self {
        self.rule.method_name = method_name.into();
        self
    }

    pub fn method_string_match(mut self, string_match: StringMatch) -> Self {
        self.rule.method_string_match = string_match;
        self
    }

    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rule.params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    pub fn at(mut self, point: MatchPoint) -> Self {
        self.rule.point = point;
        self
    }

    pub fn at_local_variable(
        mut self,
        name: impl Into<String>,
        write: bool,
        occurrence: u32,
    ) -> Self {
        self.rule.pin = Some(Pin::LocalVariable {
            name: name.into(),
            write,
            occurrence,
        });
        self
    }

    pub fn at_method_invocation(mut self, method: impl Into<String>, occurrence: u32) -> Self {
        self.rule.pin = Some(Pin::MethodInvocation {
            method: method.into(),
            occurrence,
        });
        self
    }

    pub fn build(self) -> Rule {
        self.rule
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: &str = "org.apache.kafka.streams.processor.internals.SourceNode";

    #[test]
    fn test_exact_match_with_params() {
        let rule = Rule::builder(NODE)
            .method("process")
            .with_params(["java.lang.Object", "java.lang.Object"])
            .build();

        assert!(rule.matches(NODE, &[], "process", ["java.lang.Object", "java.lang.Object"]));
        // 参数数量不同
        assert!(!rule.matches(NODE, &[], "process", ["java.lang.Object"]));
        // 方法名不同
        assert!(!rule.matches(NODE, &[], "init", ["java.lang.Object", "java.lang.Object"]));
        // 类名不同
        assert!(!rule.matches(
            "SinkNode",
            &[],
            "process",
            ["java.lang.Object", "java.lang.Object"]
        ));
    }

    #[test]
    fn test_unconstrained_params() {
        let rule = Rule::builder(NODE).method("process").build();
        assert!(rule.params().is_none());
        assert!(rule.matches(NODE, &[], "process", []));
        assert!(rule.matches(NODE, &[], "process", ["a", "b", "c"]));
    }

    #[test]
    fn test_supertype_and_string_matching() {
        let rule = Rule::builder("org.apache.kafka.streams.processor.internals.ProcessorNode")
            .class_match(ClassMatch::ExtendsClass)
            .method("proc")
            .method_string_match(StringMatch::StartsWith)
            .build();

        let supertypes = ["org.apache.kafka.streams.processor.internals.ProcessorNode"];
        assert!(rule.matches(NODE, &supertypes, "process", []));
        assert!(!rule.matches(NODE, &[], "process", []), "没有父类信息时不应命中");

        let contains = Rule::builder("Collector")
            .class_string_match(StringMatch::Contains)
            .method("send")
            .build();
        assert!(contains.matches("RecordCollectorImpl", &[], "send", []));
        assert!(StringMatch::EndsWith.matches("Impl", "RecordCollectorImpl"));
    }

    #[test]
    fn test_pins_and_points() {
        let rule = Rule::builder("org.apache.kafka.streams.processor.internals.StreamTask")
            .method("process")
            .at_local_variable("record", false, 1)
            .build();
        assert_eq!(
            rule.pin(),
            Some(&Pin::LocalVariable {
                name: "record".to_string(),
                write: false,
                occurrence: 1,
            })
        );
        assert_eq!(rule.point(), MatchPoint::Before);

        let after = Rule::builder("T")
            .method("m")
            .at(MatchPoint::After)
            .at_method_invocation("process", 1)
            .build();
        assert_eq!(after.point(), MatchPoint::After);
        assert!(matches!(after.pin(), Some(Pin::MethodInvocation { occurrence: 1, .. })));
    }
}

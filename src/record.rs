//! 参考记录模型
//!
//! 一组与 Kafka Streams 对象图同构的最小类型：节点 → 处理上下文 → 记录上下文 → 头部。
//! 宿主若直接使用这些类型，调用 [`ReflectorBuilder::with_record_model`] 即可完成登记；
//! 使用自有类型的宿主按同样的成员名登记自己的形状。

use crate::error::{AccessError, AccessResult};
use crate::reflect::{Reflector, ReflectorBuilder};

/// 单条头部记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    key: String,
    value: Option<Vec<u8>>,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// 值为空的头部（Kafka 允许 `null` 值）
    pub fn empty(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&Vec<u8>> {
        self.value.as_ref()
    }
}

/// 有序的多值头部存储
///
/// 同一个键可以出现多次，`last_header` 返回最后写入的一条。
/// 消息发送后存储会被冻结，此时任何写操作都返回 [`AccessError::ReadOnly`]。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordHeaders {
    headers: Vec<Header>,
    read_only: bool,
}

impl RecordHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, header: Header) -> AccessResult<()> {
        self.ensure_writable()?;
        self.headers.push(header);
        Ok(())
    }

    /// 删除某个键下的全部条目；键不存在时什么也不做
    pub fn remove(&mut self, key: &str) -> AccessResult<()> {
        self.ensure_writable()?;
        self.headers.retain(|header| header.key != key);
        Ok(())
    }

    pub fn last_header(&self, key: &str) -> Option<&Header> {
        self.headers.iter().rev().find(|header| header.key == key)
    }

    /// 某个键下的全部条目，按写入顺序
    pub fn headers<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Header> + 'a {
        self.headers.iter().filter(move |header| header.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.headers.iter()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn set_read_only(&mut self) {
        self.read_only = true;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_writable(&self) -> AccessResult<()> {
        if self.read_only {
            return Err(AccessError::ReadOnly);
        }
        Ok(())
    }
}

impl FromIterator<Header> for RecordHeaders {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        Self {
            headers: iter.into_iter().collect(),
            read_only: false,
        }
    }
}

/// 正在处理的记录的元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordContext {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub headers: Option<RecordHeaders>,
}

impl RecordContext {
    pub fn headers(&self) -> Option<&RecordHeaders> {
        self.headers.as_ref()
    }
}

/// 节点可见的处理上下文
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorContext {
    pub record_context: Option<RecordContext>,
}

impl ProcessorContext {
    pub fn record_context(&self) -> Option<&RecordContext> {
        self.record_context.as_ref()
    }

    pub fn headers(&self) -> Option<&RecordHeaders> {
        self.record_context().and_then(RecordContext::headers)
    }
}

/// 拓扑中的处理节点（源节点或普通处理节点）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorNode {
    pub name: String,
    pub context: Option<ProcessorContext>,
}

impl ProcessorNode {
    pub fn context(&self) -> Option<&ProcessorContext> {
        self.context.as_ref()
    }
}

fn add_bytes(headers: &mut RecordHeaders, key: &str, value: &[u8]) -> AccessResult<()> {
    headers.add(Header::new(key, value))
}

impl ReflectorBuilder {
    /// 登记参考记录模型的全部成员与头部能力
    ///
    /// 成员名沿用 Kafka Streams 的命名：`context`、`recordContext`、`headers`、`value`。
    pub fn with_record_model(self) -> Self {
        self.member::<ProcessorNode, ProcessorContext>("context", ProcessorNode::context)
            .member::<ProcessorContext, RecordContext>(
                "recordContext",
                ProcessorContext::record_context,
            )
            .member::<ProcessorContext, RecordHeaders>("headers", ProcessorContext::headers)
            .member::<RecordContext, RecordHeaders>("headers", RecordContext::headers)
            .member::<Header, Vec<u8>>("value", Header::value)
            .last_header::<RecordHeaders, Header>(RecordHeaders::last_header)
            .add_header::<RecordHeaders>(add_bytes)
            .remove_header::<RecordHeaders>(RecordHeaders::remove)
    }
}

impl Reflector {
    /// 只包含参考记录模型的注册表
    pub fn record_model() -> Self {
        ReflectorBuilder::new().with_record_model().build()
    }
}

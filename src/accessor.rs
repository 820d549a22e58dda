//! 头部访问器
//!
//! 拦截器只通过这里的几个动词接触消息头：`get` / `set` / `remove` / `unwrap`，
//! 以及在对象图中逐级前进的 `member`。每个动词都有一个返回 `Result` 的
//! `try_*` 版本和一个“受控”版本；受控版本把任何访问失败记为 error 日志并当作“缺失”处理。

use crate::error::{AccessError, AccessResult};
use crate::reflect::Reflector;
use std::any::Any;

/// 记录访问失败并降级为缺失
fn contained<T>(operation: &'static str, result: AccessResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::error!(operation, %error, "Header access failed, treating as absent");
            None
        }
    }
}

/// 对运行时才确定类型的头部容器的能力抽象
pub trait HeaderAccessor: Send + Sync {
    /// 返回 `key` 下最后一条记录
    fn try_get<'a>(&self, headers: &'a dyn Any, key: &str) -> AccessResult<Option<&'a dyn Any>>;

    /// 追加一条 `(key, value)`，不会删除同名的已有条目
    fn try_set(&self, headers: &mut dyn Any, key: &str, value: &[u8]) -> AccessResult<()>;

    /// 删除 `key` 下的全部条目
    fn try_remove(&self, headers: &mut dyn Any, key: &str) -> AccessResult<()>;

    /// 取出头部条目的原始字节，`Ok(None)` 表示值为空
    fn try_unwrap(&self, entry: &dyn Any) -> AccessResult<Option<Vec<u8>>>;

    /// 沿对象图前进一步
    fn try_member<'a>(&self, obj: &'a dyn Any, name: &str) -> AccessResult<Option<&'a dyn Any>>;

    fn get<'a>(&self, headers: &'a dyn Any, key: &str) -> Option<&'a dyn Any> {
        contained("get", self.try_get(headers, key)).flatten()
    }

    fn set(&self, headers: &mut dyn Any, key: &str, value: &[u8]) {
        contained("set", self.try_set(headers, key, value));
    }

    fn remove(&self, headers: &mut dyn Any, key: &str) {
        contained("remove", self.try_remove(headers, key));
    }

    fn unwrap(&self, entry: &dyn Any) -> Option<Vec<u8>> {
        contained("unwrap", self.try_unwrap(entry)).flatten()
    }

    fn member<'a>(&self, obj: &'a dyn Any, name: &str) -> Option<&'a dyn Any> {
        contained("member", self.try_member(obj, name)).flatten()
    }
}

/// 条目本身就是字节序列时直接取用
fn as_bytes(value: &dyn Any) -> Option<&[u8]> {
    value
        .downcast_ref::<Vec<u8>>()
        .map(Vec::as_slice)
        .or_else(|| value.downcast_ref::<Box<[u8]>>().map(|bytes| &bytes[..]))
}

/// 基于 [`Reflector`] 注册表的访问器
///
/// 注册表构建后只读，因此同一个访问器可以在多个流线程之间共享。
#[derive(Debug, Clone)]
pub struct ReflectiveAccessor {
    reflector: Reflector,
}

impl ReflectiveAccessor {
    pub fn new(reflector: Reflector) -> Self {
        Self { reflector }
    }

    pub fn reflector(&self) -> &Reflector {
        &self.reflector
    }
}

impl HeaderAccessor for ReflectiveAccessor {
    fn try_get<'a>(&self, headers: &'a dyn Any, key: &str) -> AccessResult<Option<&'a dyn Any>> {
        self.reflector.last_header(headers, key)
    }

    fn try_set(&self, headers: &mut dyn Any, key: &str, value: &[u8]) -> AccessResult<()> {
        self.reflector.add(headers, key, value)
    }

    fn try_remove(&self, headers: &mut dyn Any, key: &str) -> AccessResult<()> {
        self.reflector.remove(headers, key)
    }

    fn try_unwrap(&self, entry: &dyn Any) -> AccessResult<Option<Vec<u8>>> {
        if let Some(bytes) = as_bytes(entry) {
            return Ok(Some(bytes.to_vec()));
        }
        match self.reflector.member(entry, "value")? {
            None => Ok(None),
            Some(value) => as_bytes(value)
                .map(|bytes| Some(bytes.to_vec()))
                .ok_or(AccessError::NotBytes {
                    type_name: self.reflector.type_name_of(entry),
                }),
        }
    }

    fn try_member<'a>(&self, obj: &'a dyn Any, name: &str) -> AccessResult<Option<&'a dyn Any>> {
        self.reflector.member(obj, name)
    }
}

/// 头部存储所在对象图的起点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot {
    /// 被拦截方法的接收者
    Target,
    /// 被拦截方法的第 N 个参数
    Param(usize),
}

/// 从起点到头部存储的成员链
///
/// 每一步都是一次独立的可失败查找，任意一步缺失都会让整条链短路为 `None`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPath {
    root: PathRoot,
    members: Vec<&'static str>,
}

impl HeaderPath {
    pub fn new(root: PathRoot, members: &[&'static str]) -> Self {
        Self {
            root,
            members: members.to_vec(),
        }
    }

    pub fn from_target(members: &[&'static str]) -> Self {
        Self::new(PathRoot::Target, members)
    }

    pub fn from_param(index: usize, members: &[&'static str]) -> Self {
        Self::new(PathRoot::Param(index), members)
    }

    pub fn root(&self) -> PathRoot {
        self.root
    }

    pub fn members(&self) -> &[&'static str] {
        &self.members
    }

    /// 从起点开始逐级解析
    pub fn resolve<'a, A>(&self, accessor: &A, start: &'a dyn Any) -> Option<&'a dyn Any>
    where
        A: HeaderAccessor + ?Sized,
    {
        self.members.iter().try_fold(start, |obj, name| {
            let next = accessor.member(obj, name);
            if next.is_none() {
                tracing::debug!(member = *name, "Header path short-circuited");
            }
            next
        })
    }
}

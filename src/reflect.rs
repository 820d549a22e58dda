//! 运行时形状注册表
//!
//! 宿主流水线的具体类型并不是本 crate 的编译期依赖。宿主在启动时把
//! “某类型有哪些字段/方法可读写”登记到 [`ReflectorBuilder`]，构建出只读的
//! [`Reflector`]；之后所有查找都基于 `TypeId` + 成员名在共享表里完成，
//! 可以被任意多个线程同时读取而无需加锁。

use crate::error::{AccessError, AccessResult};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

const UNREGISTERED: &str = "<unregistered>";

type MemberFn = Box<dyn for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync>;
type LookupFn = Box<dyn for<'a, 'k> Fn(&'a dyn Any, &'k str) -> Option<&'a dyn Any> + Send + Sync>;
type AddFn = Box<dyn Fn(&mut dyn Any, &str, &[u8]) -> AccessResult<()> + Send + Sync>;
type RemoveFn = Box<dyn Fn(&mut dyn Any, &str) -> AccessResult<()> + Send + Sync>;

/// 单个类型登记的全部能力
struct Shape {
    type_name: &'static str,
    members: HashMap<&'static str, MemberFn>,
    last_header: Option<LookupFn>,
    add: Option<AddFn>,
    remove: Option<RemoveFn>,
}

impl Shape {
    fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            members: HashMap::new(),
            last_header: None,
            add: None,
            remove: None,
        }
    }
}

// 闭包签名需要由 trait bound 推导，否则返回值的生命周期无法与参数绑定
fn erase_member<F>(f: F) -> MemberFn
where
    F: for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync + 'static,
{
    Box::new(f)
}

fn erase_lookup<F>(f: F) -> LookupFn
where
    F: for<'a, 'k> Fn(&'a dyn Any, &'k str) -> Option<&'a dyn Any> + Send + Sync + 'static,
{
    Box::new(f)
}

fn erase_add<F>(f: F) -> AddFn
where
    F: Fn(&mut dyn Any, &str, &[u8]) -> AccessResult<()> + Send + Sync + 'static,
{
    Box::new(f)
}

fn erase_remove<F>(f: F) -> RemoveFn
where
    F: Fn(&mut dyn Any, &str) -> AccessResult<()> + Send + Sync + 'static,
{
    Box::new(f)
}

/// [`Reflector`] 构建器
///
/// # 示例
/// ```
/// use stream_trace::ReflectorBuilder;
///
/// struct Processor { context: Option<Context> }
/// struct Context { topic: String }
///
/// let reflector = ReflectorBuilder::new()
///     .member::<Processor, Context>("context", |p| p.context.as_ref())
///     .build();
///
/// let processor = Processor { context: Some(Context { topic: "orders".into() }) };
/// let context = reflector.member(&processor, "context").unwrap().unwrap();
/// assert_eq!(context.downcast_ref::<Context>().unwrap().topic, "orders");
/// ```
#[derive(Default)]
pub struct ReflectorBuilder {
    shapes: HashMap<TypeId, Shape>,
}

impl ReflectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn shape_mut<T: Any>(&mut self) -> &mut Shape {
        self.shapes
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Shape::new(type_name::<T>()))
    }

    /// 登记一个只读成员（字段访问或无参方法）
    ///
    /// 成员值可能缺失（例如可空字段），此时 getter 返回 `None`。
    pub fn member<T: Any, U: Any>(
        mut self,
        name: &'static str,
        getter: for<'a> fn(&'a T) -> Option<&'a U>,
    ) -> Self {
        let erased = erase_member(move |obj| {
            obj.downcast_ref::<T>()
                .and_then(getter)
                .map(|value| value as &dyn Any)
        });
        self.shape_mut::<T>().members.insert(name, erased);
        self
    }

    /// 登记头部存储的 `lastHeader(key)` 能力
    pub fn last_header<H: Any, E: Any>(
        mut self,
        lookup: for<'a, 'k> fn(&'a H, &'k str) -> Option<&'a E>,
    ) -> Self {
        let erased = erase_lookup(move |obj, key| {
            obj.downcast_ref::<H>()
                .and_then(|headers| lookup(headers, key))
                .map(|entry| entry as &dyn Any)
        });
        self.shape_mut::<H>().last_header = Some(erased);
        self
    }

    /// 登记头部存储的 `add(key, bytes)` 能力
    pub fn add_header<H: Any>(mut self, add: fn(&mut H, &str, &[u8]) -> AccessResult<()>) -> Self {
        let name = type_name::<H>();
        let erased = erase_add(move |obj, key, value| {
            let headers = obj
                .downcast_mut::<H>()
                .ok_or(AccessError::UnsupportedShape {
                    type_name: name,
                    operation: "add",
                })?;
            add(headers, key, value)
        });
        self.shape_mut::<H>().add = Some(erased);
        self
    }

    /// 登记头部存储的 `remove(key)` 能力
    pub fn remove_header<H: Any>(mut self, remove: fn(&mut H, &str) -> AccessResult<()>) -> Self {
        let name = type_name::<H>();
        let erased = erase_remove(move |obj, key| {
            let headers = obj
                .downcast_mut::<H>()
                .ok_or(AccessError::UnsupportedShape {
                    type_name: name,
                    operation: "remove",
                })?;
            remove(headers, key)
        });
        self.shape_mut::<H>().remove = Some(erased);
        self
    }

    /// 构建只读注册表，之后不再修改
    pub fn build(self) -> Reflector {
        Reflector {
            shapes: Arc::new(self.shapes),
        }
    }
}

/// 只读的类型形状注册表，克隆成本为一次 `Arc` 计数
#[derive(Clone)]
pub struct Reflector {
    shapes: Arc<HashMap<TypeId, Shape>>,
}

impl Reflector {
    pub fn builder() -> ReflectorBuilder {
        ReflectorBuilder::new()
    }

    fn shape(&self, obj: &dyn Any) -> Option<&Shape> {
        self.shapes.get(&obj.type_id())
    }

    /// 对象所属类型的注册名；未注册时返回占位符
    pub fn type_name_of(&self, obj: &dyn Any) -> &'static str {
        self.shape(obj).map_or(UNREGISTERED, |shape| shape.type_name)
    }

    /// 读取成员，`Ok(None)` 表示成员存在但值为空
    pub fn member<'a>(&self, obj: &'a dyn Any, name: &str) -> AccessResult<Option<&'a dyn Any>> {
        let shape = self.shape(obj).ok_or(AccessError::UnsupportedShape {
            type_name: UNREGISTERED,
            operation: "member access",
        })?;
        let getter = shape
            .members
            .get(name)
            .ok_or_else(|| AccessError::MissingMember {
                type_name: shape.type_name,
                member: name.to_owned(),
            })?;
        Ok(getter(obj))
    }

    /// 调用 `lastHeader(key)`
    pub fn last_header<'a>(
        &self,
        headers: &'a dyn Any,
        key: &str,
    ) -> AccessResult<Option<&'a dyn Any>> {
        let lookup = self
            .shape(headers)
            .and_then(|shape| shape.last_header.as_ref())
            .ok_or_else(|| self.unsupported(headers, "lastHeader"))?;
        Ok(lookup(headers, key))
    }

    /// 调用 `add(key, bytes)`
    pub fn add(&self, headers: &mut dyn Any, key: &str, value: &[u8]) -> AccessResult<()> {
        let add = self
            .shape(&*headers)
            .and_then(|shape| shape.add.as_ref())
            .ok_or_else(|| self.unsupported(&*headers, "add"))?;
        add(headers, key, value)
    }

    /// 调用 `remove(key)`
    pub fn remove(&self, headers: &mut dyn Any, key: &str) -> AccessResult<()> {
        let remove = self
            .shape(&*headers)
            .and_then(|shape| shape.remove.as_ref())
            .ok_or_else(|| self.unsupported(&*headers, "remove"))?;
        remove(headers, key)
    }

    fn unsupported(&self, obj: &dyn Any, operation: &'static str) -> AccessError {
        AccessError::UnsupportedShape {
            type_name: self.type_name_of(obj),
            operation,
        }
    }
}

impl fmt::Debug for Reflector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.shapes.values().map(|shape| shape.type_name).collect();
        names.sort_unstable();
        f.debug_struct("Reflector").field("types", &names).finish()
    }
}

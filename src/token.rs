//! 关联令牌定义

use crate::error::AccessResult;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// 机器ID，基于进程ID和启动时间戳生成，确保不同进程/实例生成的令牌不冲突
static MACHINE_ID: LazyLock<u16> = LazyLock::new(|| {
    let pid = std::process::id();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;
    ((pid ^ timestamp) & 0xFFFF) as u16
});

/// 关联令牌
///
/// 不透明的字符串，把生产端的追踪工作单元与消费端的工作单元关联起来。
/// 本 crate 从不解析或校验令牌内容，只负责把它原样写入、读出消息头。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// 生成新的令牌
    ///
    /// 供追踪后端（例如 [`InMemoryTracer`](crate::InMemoryTracer)）在开启出站调用时使用。
    /// 组合方式：timestamp(48位) + machine_id(16位) + counter(32位) + random(32位)，
    /// 输出32字符的小写十六进制。
    #[inline]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        let random_part = fastrand::u32(..);

        let high_64 = ((timestamp & 0xFFFFFFFFFFFF) << 16) | (*MACHINE_ID as u64);
        let low_64 = (counter & 0xFFFFFFFF) << 32 | (random_part as u64);

        Self(format!("{high_64:016x}{low_64:016x}"))
    }

    /// 把消息头里的原始字节解码为令牌
    ///
    /// 只接受合法的 UTF-8；解码失败时返回错误，调用方应放弃本次关联。
    pub fn from_utf8(bytes: &[u8]) -> AccessResult<Self> {
        let text = std::str::from_utf8(bytes)?;
        Ok(Self(text.to_owned()))
    }

    /// 获取令牌字符串
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 令牌写入消息头时使用的原始字节
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<String> for CorrelationToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationToken {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//! 事务与执行上下文的绑定
//!
//! [`InMemoryTracer`](crate::InMemoryTracer) 用两层存储记录“当前事务”：
//! 线程局部的绑定栈（同步流线程上由 `start_transaction` 写入），
//! 以及 `tokio::task_local` 作用域（异步任务通过 [`with_transaction`] 显式进入）。
//! 线程上最近的绑定优先于任务作用域。

use super::memory::MemoryTransaction;
use std::cell::RefCell;
use tokio::task_local;

task_local! {
    static SCOPED_TRANSACTION: MemoryTransaction;
}

thread_local! {
    static BOUND: RefCell<Vec<MemoryTransaction>> = const { RefCell::new(Vec::new()) };
}

/// 获取当前执行上下文上仍未结束的事务
pub fn current_transaction() -> Option<MemoryTransaction> {
    BOUND
        .with(|bound| {
            let mut bound = bound.borrow_mut();
            // 在其他线程上结束的事务只能在这里清理
            bound.retain(|transaction| !transaction.is_ended());
            bound.last().cloned()
        })
        .or_else(|| {
            SCOPED_TRANSACTION
                .try_with(Clone::clone)
                .ok()
                .filter(|transaction| !transaction.is_ended())
        })
}

/// 在指定事务的上下文中执行异步操作
pub async fn with_transaction<F, T>(transaction: MemoryTransaction, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    SCOPED_TRANSACTION.scope(transaction, future).await
}

/// 在指定事务的上下文中执行同步闭包
pub fn in_transaction<F, T>(transaction: MemoryTransaction, f: F) -> T
where
    F: FnOnce() -> T,
{
    SCOPED_TRANSACTION.sync_scope(transaction, f)
}

pub(crate) fn bind(transaction: MemoryTransaction) {
    BOUND.with(|bound| {
        let mut bound = bound.borrow_mut();
        bound.retain(|existing| !existing.is_ended());
        bound.push(transaction);
    });
}

/// 解除绑定，返回该事务是否确实绑定在当前线程上
pub(crate) fn unbind(id: u64) -> bool {
    BOUND.with(|bound| {
        let mut bound = bound.borrow_mut();
        match bound.iter().rposition(|transaction| transaction.id() == id) {
            Some(index) => {
                bound.remove(index);
                true
            }
            None => false,
        }
    })
}

//! 当前逻辑线程
//!
//! 每条载体线程在运行线程体前压入当前线程的标识，结束后弹出。
//! 创建工厂通过这里查询"是谁在创建我"，从而自动记录父线程。

use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::id::ThreadId;

struct Current {
    id: ThreadId,
    phase: Arc<AtomicUsize>,
}

thread_local! {
    static CURRENT: RefCell<Vec<Current>> = const { RefCell::new(Vec::new()) };
}

/// 离开作用域时弹出当前线程
pub(crate) struct CurrentGuard {
    _private: (),
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| {
            c.borrow_mut().pop();
        });
    }
}

/// 把线程标记为当前 OS 线程上正在执行的逻辑线程
pub(crate) fn enter(id: ThreadId, phase: Arc<AtomicUsize>) -> CurrentGuard {
    CURRENT.with(|c| c.borrow_mut().push(Current { id, phase }));
    CurrentGuard { _private: () }
}

/// 当前逻辑线程的 ID
pub fn get_id() -> Option<ThreadId> {
    CURRENT.with(|c| c.borrow().last().map(|cur| cur.id))
}

/// 当前逻辑线程的阶段
pub fn get_phase() -> Option<usize> {
    CURRENT.with(|c| {
        c.borrow()
            .last()
            .map(|cur| cur.phase.load(Ordering::Acquire))
    })
}

/// 当前逻辑线程的 (ID, 阶段)
pub fn current() -> Option<(ThreadId, usize)> {
    CURRENT.with(|c| {
        c.borrow()
            .last()
            .map(|cur| (cur.id, cur.phase.load(Ordering::Acquire)))
    })
}

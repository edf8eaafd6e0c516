//! 线程句柄
//!
//! 句柄只记住 ThreadId，不拥有记录。每次访问都重新解析记录；
//! 记录已被回收时返回约定的降级值，而不是报错。

use std::sync::Arc;

use super::id::ThreadId;
use super::naming::Gid;
use super::pool::ThreadPool;
use super::record::ThreadRecord;
use super::registry;
use super::state::{Tagged, ThreadState, ThreadStateEx};
use crate::config::TERMINATED_DESCRIPTION;
use crate::error::ThreadResult;

/// 线程句柄（用于外部引用）
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Thread {
    id: ThreadId,
}

impl Thread {
    /// 创建新的句柄
    pub fn new(id: ThreadId) -> Self {
        Self { id }
    }

    #[inline]
    fn get(&self) -> Option<Arc<ThreadRecord>> {
        registry::resolve(self.id)
    }

    /// 记录是否仍然存活
    pub fn is_valid(&self) -> bool {
        self.get().is_some()
    }

    /// 线程 ID（记录回收后依然有效）
    #[inline]
    pub fn get_thread_id(&self) -> ThreadId {
        self.id
    }

    pub fn get_thread_phase(&self) -> usize {
        self.get().map_or(0, |t| t.get_thread_phase())
    }

    /// 父线程所在 locality
    pub fn get_parent_locality_prefix(&self) -> u32 {
        self.get().map_or(0, |t| t.get_parent_locality_prefix())
    }

    /// 父线程 ID
    pub fn get_parent_thread_id(&self) -> Option<ThreadId> {
        self.get().and_then(|t| t.get_parent_thread_id())
    }

    /// 创建时父线程的阶段
    pub fn get_parent_thread_phase(&self) -> usize {
        self.get().map_or(0, |t| t.get_parent_thread_phase())
    }

    /// 线程所属组件的地址
    pub fn get_component_id(&self) -> u64 {
        self.get().map_or(0, |t| t.get_component_id())
    }

    /// 查询主状态
    pub fn get_state(&self) -> Tagged<ThreadState> {
        self.get()
            .map_or(Tagged::new(ThreadState::Terminated), |t| t.get_state())
    }

    /// 修改主状态，返回修改前的状态
    ///
    /// 只改变状态字，不改变调度状态
    pub fn set_state(&self, state: ThreadState) -> Tagged<ThreadState> {
        self.get()
            .map_or(Tagged::new(ThreadState::Terminated), |t| t.set_state(state))
    }

    /// 针对已知状态做一次 CAS，失败时 `expected` 被更新为实际状态
    pub fn set_state_tagged(
        &self,
        state: ThreadState,
        expected: &mut Tagged<ThreadState>,
    ) -> Option<Tagged<ThreadState>> {
        self.get().and_then(|t| t.set_state_tagged(state, expected))
    }

    /// 只有状态自 `old` 以来未变时才修改
    pub fn restore_state(&self, state: ThreadState, old: Tagged<ThreadState>) -> bool {
        self.get().map_or(false, |t| t.restore_state(state, old))
    }

    /// 查询扩展状态
    pub fn get_state_ex(&self) -> Tagged<ThreadStateEx> {
        self.get()
            .map_or(Tagged::new(ThreadStateEx::WaitUnknown), |t| t.get_state_ex())
    }

    pub fn set_state_ex(&self, state: ThreadStateEx) -> Tagged<ThreadStateEx> {
        self.get()
            .map_or(Tagged::new(ThreadStateEx::WaitUnknown), |t| t.set_state_ex(state))
    }

    /// 执行线程函数
    ///
    /// 返回调度器此后应使用的状态；记录已回收时返回 `Terminated`
    pub fn execute(&self) -> ThreadResult<ThreadState> {
        match self.get() {
            Some(t) => t.execute(),
            None => Ok(ThreadState::Terminated),
        }
    }

    pub fn get_description(&self) -> String {
        self.get()
            .map_or_else(|| TERMINATED_DESCRIPTION.to_string(), |t| t.get_description())
    }

    pub fn set_description(&self, description: Option<&str>) {
        if let Some(t) = self.get() {
            t.set_description(description);
        }
    }

    pub fn get_lco_description(&self) -> String {
        self.get()
            .map_or_else(|| TERMINATED_DESCRIPTION.to_string(), |t| t.get_lco_description())
    }

    pub fn set_lco_description(&self, description: Option<&str>) {
        if let Some(t) = self.get() {
            t.set_lco_description(description);
        }
    }

    pub fn set_marked_state(&self, mark: Tagged<ThreadState>) {
        if let Some(t) = self.get() {
            t.set_marked_state(mark);
        }
    }

    pub fn get_marked_state(&self) -> Tagged<ThreadState> {
        self.get()
            .map_or(Tagged::new(ThreadState::Unknown), |t| t.get_marked_state())
    }

    pub fn is_created_from(&self, pool: &ThreadPool) -> bool {
        self.get().map_or(false, |t| t.is_created_from(pool))
    }

    /// 全局 ID，首次访问时生成并缓存
    pub fn get_gid(&self) -> Option<Gid> {
        let pool = registry::find_pool(self.id.pool_id())?;
        let record = pool.get(self.id)?;
        Some(record.get_gid(pool.addressing()))
    }

    /// 通过通用回收入口回收记录
    pub fn reclaim(&self) -> bool {
        registry::reclaim(self.id)
    }
}

impl From<Thread> for ThreadId {
    fn from(t: Thread) -> Self {
        t.id
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("state", &self.get_state())
            .finish()
    }
}

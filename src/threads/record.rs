//! 线程记录
//!
//! 一个逻辑线程的内部表示：执行上下文、两个标签状态、谱系和调试信息。
//! 记录只能由池创建，也只能经由池回收。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::context::{Coroutine, CoroutineStatus, ThreadFunction, ThreadSelf};
use super::id::ThreadId;
use super::naming::{Addressing, Gid};
use super::pool::ThreadPool;
use super::state::{Tagged, TaggedState, ThreadState, ThreadStateEx};
use super::this_thread;
use crate::error::{ThreadError, ThreadResult};

/// 谱系：创建者的 locality、ID 和创建时的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lineage {
    /// 0 表示由寻址服务决定
    pub locality: u32,
    /// `None` 表示取当前正在运行的逻辑线程
    pub thread: Option<ThreadId>,
    pub phase: usize,
}

impl Lineage {
    pub fn new(locality: u32, thread: Option<ThreadId>, phase: usize) -> Self {
        Self {
            locality,
            thread,
            phase,
        }
    }

    /// 补全缺省的字段
    fn resolve(mut self, addressing: &dyn Addressing) -> Self {
        if self.thread.is_none() {
            if let Some((id, phase)) = this_thread::current() {
                self.thread = Some(id);
                self.phase = phase;
            }
        }
        if self.locality == 0 {
            self.locality = addressing.locality_prefix();
        }
        self
    }
}

/// 创建线程所需的数据
pub struct ThreadInitData {
    pub func: ThreadFunction,
    pub description: Option<String>,
    /// 线程所属组件的本地地址
    pub lva: u64,
    pub parent: Lineage,
}

impl ThreadInitData {
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce(&mut ThreadSelf, ThreadStateEx) -> ThreadState + Send + 'static,
    {
        Self {
            func: Box::new(func),
            description: None,
            lva: 0,
            parent: Lineage::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_component(mut self, lva: u64) -> Self {
        self.lva = lva;
        self
    }

    pub fn with_parent(mut self, parent: Lineage) -> Self {
        self.parent = parent;
        self
    }
}

impl std::fmt::Debug for ThreadInitData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadInitData")
            .field("description", &self.description)
            .field("lva", &self.lva)
            .field("parent", &self.parent)
            .finish()
    }
}

/// 调试信息（由互斥锁保护）
struct DebugInfo {
    description: String,
    lco_description: String,
    marked_state: Tagged<ThreadState>,
}

/// 线程记录
pub struct ThreadRecord {
    id: ThreadId,
    coroutine: Mutex<Option<Coroutine>>,
    phase: Arc<AtomicUsize>,
    state: TaggedState<ThreadState>,
    state_ex: TaggedState<ThreadStateEx>,
    debug: Mutex<DebugInfo>,
    lineage: Lineage,
    component_id: u64,
    gid: OnceLock<Gid>,
    pool_id: u16,
}

impl ThreadRecord {
    pub(crate) fn new(
        id: ThreadId,
        coroutine: Coroutine,
        description: Option<String>,
        lva: u64,
        parent: Lineage,
        initial_state: ThreadState,
        addressing: &dyn Addressing,
    ) -> Self {
        Self {
            id,
            phase: coroutine.phase_counter(),
            coroutine: Mutex::new(Some(coroutine)),
            state: TaggedState::new(initial_state),
            state_ex: TaggedState::new(ThreadStateEx::WaitSignaled),
            debug: Mutex::new(DebugInfo {
                description: description.unwrap_or_default(),
                lco_description: String::new(),
                marked_state: Tagged::new(ThreadState::Unknown),
            }),
            lineage: parent.resolve(addressing),
            component_id: lva,
            gid: OnceLock::new(),
            pool_id: id.pool_id(),
        }
    }

    /// 恢复线程体，直到它让出或结束
    ///
    /// 同一时刻只允许一个调用者；线程体结束后再调用是使用错误
    pub fn execute(&self) -> ThreadResult<ThreadState> {
        let mut guard = self
            .coroutine
            .try_lock()
            .ok_or(ThreadError::AlreadyRunning(self.id))?;
        // 解析到记录之后被另一个 worker 回收：与句柄解析失败一样降级
        let coroutine = match guard.as_mut() {
            Some(coroutine) => coroutine,
            None => {
                tracing::trace!(thread = %self.id, "execute on reclaimed thread");
                return Ok(ThreadState::Terminated);
            }
        };
        if coroutine.status() == CoroutineStatus::Idle {
            return Err(ThreadError::Finished(self.id));
        }

        // 每次恢复都推进扩展状态的标签，使上一阶段的唤醒信号失效
        let state_ex = self.state_ex.set(ThreadStateEx::WaitSignaled);
        coroutine.resume(state_ex.value())
    }

    /// 取出执行上下文（回收时使用）
    pub(crate) fn take_coroutine(&self) -> Option<Coroutine> {
        self.coroutine.lock().take()
    }

    #[inline]
    pub fn get_thread_id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub fn get_thread_phase(&self) -> usize {
        self.phase.load(Ordering::Acquire)
    }

    #[inline]
    pub fn get_state(&self) -> Tagged<ThreadState> {
        self.state.get()
    }

    pub fn set_state(&self, state: ThreadState) -> Tagged<ThreadState> {
        self.state.set(state)
    }

    pub fn set_state_tagged(
        &self,
        state: ThreadState,
        expected: &mut Tagged<ThreadState>,
    ) -> Option<Tagged<ThreadState>> {
        self.state.set_tagged(state, expected)
    }

    pub fn restore_state(&self, state: ThreadState, old: Tagged<ThreadState>) -> bool {
        self.state.restore(state, old)
    }

    #[inline]
    pub fn get_state_ex(&self) -> Tagged<ThreadStateEx> {
        self.state_ex.get()
    }

    pub fn set_state_ex(&self, state: ThreadStateEx) -> Tagged<ThreadStateEx> {
        self.state_ex.set(state)
    }

    pub fn get_description(&self) -> String {
        self.debug.lock().description.clone()
    }

    /// `None` 清空描述
    pub fn set_description(&self, description: Option<&str>) {
        let mut debug = self.debug.lock();
        debug.description.clear();
        if let Some(d) = description {
            debug.description.push_str(d);
        }
    }

    /// 正在等待的对象的描述
    pub fn get_lco_description(&self) -> String {
        self.debug.lock().lco_description.clone()
    }

    pub fn set_lco_description(&self, description: Option<&str>) {
        let mut debug = self.debug.lock();
        debug.lco_description.clear();
        if let Some(d) = description {
            debug.lco_description.push_str(d);
        }
    }

    #[inline]
    pub fn get_parent_locality_prefix(&self) -> u32 {
        self.lineage.locality
    }

    #[inline]
    pub fn get_parent_thread_id(&self) -> Option<ThreadId> {
        self.lineage.thread
    }

    #[inline]
    pub fn get_parent_thread_phase(&self) -> usize {
        self.lineage.phase
    }

    #[inline]
    pub fn lineage(&self) -> Lineage {
        self.lineage
    }

    #[inline]
    pub fn get_component_id(&self) -> u64 {
        self.component_id
    }

    /// 调度器记账用的标记状态
    pub fn set_marked_state(&self, mark: Tagged<ThreadState>) {
        self.debug.lock().marked_state = mark;
    }

    pub fn get_marked_state(&self) -> Tagged<ThreadState> {
        self.debug.lock().marked_state
    }

    /// 是否由指定的池创建
    #[inline]
    pub fn is_created_from(&self, pool: &ThreadPool) -> bool {
        self.pool_id == pool.id()
    }

    /// 全局 ID，首次访问时由本地地址生成并缓存
    pub fn get_gid(&self, addressing: &dyn Addressing) -> Gid {
        *self
            .gid
            .get_or_init(|| addressing.gid_from_address(u64::from(self.id)).strip_credit())
    }
}

impl std::fmt::Debug for ThreadRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRecord")
            .field("id", &self.id)
            .field("state", &self.get_state())
            .field("state_ex", &self.get_state_ex())
            .field("phase", &self.get_thread_phase())
            .field("parent", &self.lineage)
            .finish()
    }
}

//! 线程池（回收式分配器）
//!
//! 每个调度域（通常是每个 worker）一个池。池负责两件事：
//! - 缓存执行上下文，后进先出地复用，避免每次创建线程都启动新的载体
//! - 在槽位数组里存放线程记录，用（槽位索引，代数）识别记录是否仍然存活

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use super::context::{CarrierConfig, Coroutine};
use super::handle::Thread;
use super::id::{ThreadId, MAX_GENERATION, MAX_SLOTS};
use super::naming::{Addressing, LocalAddressing};
use super::record::{ThreadInitData, ThreadRecord};
use super::registry;
use super::state::ThreadState;
use super::this_thread;
use crate::config::{CARRIER_NAME_PREFIX, DEFAULT_MAX_CACHED_CONTEXTS, DEFAULT_STACK_SIZE};
use crate::error::{ThreadError, ThreadResult};

/// 池配置
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 载体线程栈大小
    pub stack_size: usize,
    /// 最多缓存的空闲执行上下文
    pub max_cached_contexts: usize,
    /// 槽位上限（不超过 `MAX_SLOTS`）
    pub capacity: usize,
    /// 载体线程名前缀
    pub carrier_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            max_cached_contexts: DEFAULT_MAX_CACHED_CONTEXTS,
            capacity: MAX_SLOTS,
            carrier_name: CARRIER_NAME_PREFIX.to_string(),
        }
    }
}

/// 池统计信息
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// 从缓存取出上下文的次数
    pub acquired: u64,
    /// 放回缓存的次数
    pub released: u64,
    /// 最近一次取出耗时
    pub last_acquire: Duration,
    /// 最近一次放回耗时
    pub last_release: Duration,
    /// 当前缓存的上下文数
    pub cached_contexts: usize,
    /// 存活的记录数
    pub live_records: usize,
    /// 累计创建的记录数
    pub created: u64,
    /// 累计回收的记录数
    pub reclaimed: u64,
}

/// 分配计数和计时
#[derive(Debug, Default)]
struct AllocTimings {
    acquired: u64,
    released: u64,
    last_acquire: Duration,
    last_release: Duration,
}

/// 槽位
struct Slot {
    generation: u32,
    record: Option<Arc<ThreadRecord>>,
}

/// 记录存储
#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Arena {
    /// 预留一个槽位（记录尚未放入）
    fn reserve(&mut self, capacity: usize) -> Option<(u32, u32)> {
        if let Some(index) = self.free.pop() {
            let slot = &self.slots[index as usize];
            return Some((index, slot.generation));
        }
        if self.slots.len() >= capacity {
            return None;
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            record: None,
        });
        Some((index, 1))
    }

    /// 取消预留
    fn unreserve(&mut self, index: u32) {
        self.free.push(index);
    }

    fn get(&self, id: ThreadId) -> Option<&Arc<ThreadRecord>> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.record.as_ref()
    }

    /// 移除记录并推进代数；代数用尽的槽位不再复用
    fn remove(&mut self, id: ThreadId) -> Option<Arc<ThreadRecord>> {
        let index = id.index();
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let record = slot.record.take()?;
        self.live -= 1;
        if slot.generation < MAX_GENERATION {
            slot.generation += 1;
            self.free.push(index);
        }
        Some(record)
    }
}

/// 线程池
pub struct ThreadPool {
    id: u16,
    config: PoolConfig,
    addressing: Arc<dyn Addressing>,
    arena: RwLock<Arena>,
    contexts: Mutex<Vec<Coroutine>>,
    timings: Mutex<AllocTimings>,
    created: AtomicU64,
    reclaimed: AtomicU64,
}

impl ThreadPool {
    /// 使用默认配置和单机寻址创建池
    pub fn new() -> ThreadResult<Arc<Self>> {
        Self::with_config(PoolConfig::default(), Arc::new(LocalAddressing::default()))
    }

    /// 使用指定配置创建池，并登记到全局注册表
    pub fn with_config(
        mut config: PoolConfig,
        addressing: Arc<dyn Addressing>,
    ) -> ThreadResult<Arc<Self>> {
        config.capacity = config.capacity.clamp(1, MAX_SLOTS);
        let id = registry::allocate_pool_id()?;
        let pool = Arc::new(Self {
            id,
            config,
            addressing,
            arena: RwLock::new(Arena::default()),
            contexts: Mutex::new(Vec::new()),
            timings: Mutex::new(AllocTimings::default()),
            created: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
        });
        registry::register(&pool);
        tracing::debug!(pool = id, capacity = pool.config.capacity, "thread pool created");
        Ok(pool)
    }

    /// 池 ID
    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[inline]
    pub fn addressing(&self) -> &dyn Addressing {
        &*self.addressing
    }

    /// 取出最近放回的执行上下文，缓存为空时返回 `None`
    pub fn acquire(&self) -> Option<Coroutine> {
        let timer = Instant::now();
        let next = self.contexts.lock().pop()?;

        let mut timings = self.timings.lock();
        timings.last_acquire = timer.elapsed();
        timings.acquired += 1;
        drop(timings);

        tracing::trace!(pool = self.id, carrier = next.carrier(), "context acquired");
        Some(next)
    }

    /// 放回执行上下文
    ///
    /// 仍挂起的上下文先被展开；无法复用或超出缓存上限的上下文直接丢弃
    pub fn release(&self, mut context: Coroutine) {
        let timer = Instant::now();
        if !context.unwind() || !context.is_reusable() {
            tracing::trace!(pool = self.id, carrier = context.carrier(), "context discarded");
            return;
        }

        let mut contexts = self.contexts.lock();
        if contexts.len() >= self.config.max_cached_contexts {
            drop(contexts);
            tracing::trace!(pool = self.id, carrier = context.carrier(), "context cache full");
            return;
        }
        let carrier = context.carrier();
        contexts.push(context);
        drop(contexts);

        let mut timings = self.timings.lock();
        timings.last_release = timer.elapsed();
        timings.released += 1;
        drop(timings);

        tracing::trace!(pool = self.id, carrier, "context released");
    }

    /// 创建线程
    ///
    /// 优先复用缓存的执行上下文；返回的句柄不持有记录
    pub fn create(&self, init: ThreadInitData, initial_state: ThreadState) -> ThreadResult<Thread> {
        let ThreadInitData {
            func,
            description,
            lva,
            parent,
        } = init;

        let (index, generation) = self
            .arena
            .write()
            .reserve(self.config.capacity)
            .ok_or(ThreadError::PoolExhausted {
                pool: self.id,
                capacity: self.config.capacity,
            })?;
        let id = ThreadId::new(self.id, index, generation);

        let coroutine = match self.acquire() {
            Some(mut coroutine) => {
                coroutine.rebind(func, id);
                coroutine
            }
            None => match Coroutine::new(func, id, &self.carrier_config()) {
                Ok(coroutine) => coroutine,
                Err(e) => {
                    self.arena.write().unreserve(index);
                    return Err(e);
                }
            },
        };

        let record = Arc::new(ThreadRecord::new(
            id,
            coroutine,
            description,
            lva,
            parent,
            initial_state,
            &*self.addressing,
        ));

        tracing::debug!(
            thread = %id,
            description = %record.get_description(),
            parent = ?record.get_parent_thread_id(),
            "thread created"
        );

        {
            let mut arena = self.arena.write();
            arena.slots[index as usize].record = Some(record);
            arena.live += 1;
        }
        self.created.fetch_add(1, Ordering::Relaxed);

        Ok(Thread::new(id))
    }

    /// 查找存活的记录
    pub fn get(&self, id: ThreadId) -> Option<Arc<ThreadRecord>> {
        if id.pool_id() != self.id {
            return None;
        }
        self.arena.read().get(id).cloned()
    }

    /// 记录是否由本池创建且仍然存活
    pub fn owns(&self, id: ThreadId) -> bool {
        id.pool_id() == self.id && self.arena.read().get(id).is_some()
    }

    /// 回收记录并把执行上下文放回缓存
    ///
    /// 一般经由 `registry::reclaim` 调用
    pub(crate) fn free(&self, id: ThreadId) -> bool {
        if id.pool_id() != self.id {
            return false;
        }
        // 线程体不能回收自己：它的上下文正被恢复者锁住
        if this_thread::get_id() == Some(id) {
            tracing::warn!(thread = %id, "thread attempted to reclaim itself");
            return false;
        }
        let record = match self.arena.write().remove(id) {
            Some(record) => record,
            None => return false,
        };
        self.reclaimed.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            thread = %id,
            description = %record.get_description(),
            phase = record.get_thread_phase(),
            "thread reclaimed"
        );

        if let Some(coroutine) = record.take_coroutine() {
            self.release(coroutine);
        }
        true
    }

    /// 存活的记录数
    pub fn live_records(&self) -> usize {
        self.arena.read().live
    }

    /// 统计信息快照
    pub fn stats(&self) -> PoolStats {
        let timings = self.timings.lock();
        PoolStats {
            acquired: timings.acquired,
            released: timings.released,
            last_acquire: timings.last_acquire,
            last_release: timings.last_release,
            cached_contexts: self.contexts.lock().len(),
            live_records: self.live_records(),
            created: self.created.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
        }
    }

    fn carrier_config(&self) -> CarrierConfig {
        CarrierConfig {
            stack_size: self.config.stack_size,
            name_prefix: format!("{}-p{}", self.config.carrier_name, self.id),
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("id", &self.id)
            .field("live_records", &self.live_records())
            .field("cached_contexts", &self.contexts.lock().len())
            .finish()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        registry::deregister(self.id);
        tracing::debug!(pool = self.id, "thread pool dropped");
    }
}

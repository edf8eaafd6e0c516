//! 池注册表
//!
//! 回收入口只拿到一个 ThreadId，不知道记录由哪个池创建。
//! 注册表按池 ID 找到候选池，再由池自己确认所有权后释放。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;

use super::id::ThreadId;
use super::pool::ThreadPool;
use super::record::ThreadRecord;
use crate::error::{ThreadError, ThreadResult};

/// 全局池注册表
static POOLS: OnceLock<DashMap<u16, Weak<ThreadPool>>> = OnceLock::new();

/// 池 ID 计数器（0 保留，ID 从不复用）
static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

fn pools() -> &'static DashMap<u16, Weak<ThreadPool>> {
    POOLS.get_or_init(|| DashMap::with_capacity(16))
}

/// 分配新的池 ID
pub(crate) fn allocate_pool_id() -> ThreadResult<u16> {
    let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
    u16::try_from(id).map_err(|_| ThreadError::PoolIdsExhausted)
}

pub(crate) fn register(pool: &Arc<ThreadPool>) {
    pools().insert(pool.id(), Arc::downgrade(pool));
}

pub(crate) fn deregister(id: u16) {
    pools().remove_if(&id, |_, pool| pool.strong_count() == 0);
}

/// 按池 ID 查找池
pub fn find_pool(id: u16) -> Option<Arc<ThreadPool>> {
    // 先克隆 Weak 再释放分片锁，升级后的 Arc 可能在本函数之外被最后释放
    let pool = pools().get(&id).map(|entry| entry.value().clone())?;
    pool.upgrade()
}

/// 找到创建该记录且记录仍存活的池
pub fn owner_of(id: ThreadId) -> Option<Arc<ThreadPool>> {
    find_pool(id.pool_id()).filter(|pool| pool.owns(id))
}

/// 解析存活的记录
pub fn resolve(id: ThreadId) -> Option<Arc<ThreadRecord>> {
    find_pool(id.pool_id())?.get(id)
}

/// 通用回收入口
///
/// 只凭 ID 定位创建它的池并归还存储；记录已被回收或池已不存在时返回 false
pub fn reclaim(id: ThreadId) -> bool {
    match owner_of(id) {
        Some(pool) => pool.free(id),
        None => {
            tracing::trace!(thread = %id, "reclaim of unknown thread ignored");
            false
        }
    }
}

/// 当前登记的池数量
pub fn pool_count() -> usize {
    pools().iter().filter(|entry| entry.value().strong_count() > 0).count()
}

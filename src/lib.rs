//! lwthread：分布式并行运行时中的轻量级用户态线程
//!
//! 提供调度器所需的线程抽象：状态机、协作式执行上下文、谱系信息
//! 以及按 worker 划分的回收式线程池。调度策略、寻址服务和同步原语
//! 都在本 crate 之外。

pub mod config;
pub mod error;
pub mod threads;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{ThreadError, ThreadResult};
pub use threads::{
    reclaim, Gid, Lineage, PoolConfig, PoolStats, Tagged, Thread, ThreadId, ThreadInitData,
    ThreadPool, ThreadSelf, ThreadState, ThreadStateEx,
};

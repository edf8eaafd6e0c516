//! 轻量级用户态线程
//!
//! 少量 worker 线程协作式地运行大量逻辑线程。核心组件：
//! - 标签状态机：主状态和扩展等待状态，CAS 更新，标签防 ABA
//! - 执行上下文：可恢复的线程体，每次恢复推进阶段
//! - 线程记录：上下文 + 状态 + 谱系/调试信息
//! - 线程池：回收执行上下文和记录存储
//! - 线程句柄：不拥有记录，记录回收后降级

pub mod context;
pub mod handle;
pub mod id;
pub mod naming;
pub mod pool;
pub mod record;
pub mod registry;
pub mod state;
pub mod this_thread;

pub use context::{Coroutine, CoroutineStatus, ThreadFunction, ThreadSelf};
pub use handle::Thread;
pub use id::ThreadId;
pub use naming::{Addressing, Gid, LocalAddressing};
pub use pool::{PoolConfig, PoolStats, ThreadPool};
pub use record::{Lineage, ThreadInitData, ThreadRecord};
pub use registry::reclaim;
pub use state::{Tagged, TaggedState, ThreadState, ThreadStateEx};

//! 线程运行时错误

use thiserror::Error;

use crate::threads::ThreadId;

/// 线程操作错误
#[derive(Debug, Error)]
pub enum ThreadError {
    /// 执行上下文正在被另一个调用者恢复
    #[error("thread {0} is already being executed")]
    AlreadyRunning(ThreadId),

    /// 线程体已经返回，不能再次恢复
    #[error("thread {0} has already finished")]
    Finished(ThreadId),

    /// 载体线程已退出
    #[error("carrier of thread {0} is gone")]
    CarrierLost(ThreadId),

    /// 无法启动载体线程
    #[error("failed to spawn carrier thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// 池中没有空闲槽位
    #[error("pool {pool} is exhausted ({capacity} slots)")]
    PoolExhausted { pool: u16, capacity: usize },

    /// 池 ID 已用尽
    #[error("no pool ids left")]
    PoolIdsExhausted,
}

/// 线程操作结果
pub type ThreadResult<T> = Result<T, ThreadError>;

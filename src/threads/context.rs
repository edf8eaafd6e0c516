//! 协作式执行上下文
//!
//! 每个上下文背后是一条专用的载体线程（carrier）。恢复者和线程体之间通过一对
//! 容量为 1 的通道交接控制权，任意时刻只有一方在运行，对调度器而言等价于有栈协程：
//! `resume` 一直阻塞到线程体让出或返回为止。
//!
//! 线程体结束后载体线程并不退出，而是等待绑定下一个函数，这样池可以复用整条栈。

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use super::id::ThreadId;
use super::state::{ThreadState, ThreadStateEx};
use super::this_thread;
use crate::config::MAX_UNWIND_ATTEMPTS;
use crate::error::{ThreadError, ThreadResult};

/// 线程函数
///
/// 第二个参数是本次恢复时的扩展等待状态，返回值是线程结束时的主状态
pub type ThreadFunction =
    Box<dyn FnOnce(&mut ThreadSelf, ThreadStateEx) -> ThreadState + Send + 'static>;

/// 载体线程编号
static CARRIER_SEQ: AtomicUsize = AtomicUsize::new(0);

/// 恢复者 -> 载体
enum Command {
    Start {
        func: ThreadFunction,
        id: ThreadId,
        state_ex: ThreadStateEx,
    },
    Resume(ThreadStateEx),
    Unwind,
    Exit,
}

/// 载体 -> 恢复者
enum Reply {
    Yielded(ThreadState),
    Returned(ThreadState),
    Panicked,
    Unwound,
}

/// 强制展开时使用的 panic 载荷
struct ForcedUnwind;

/// 上下文状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    /// 没有绑定函数（已完成，可复用）
    Idle,
    /// 已绑定函数但尚未开始
    Ready,
    /// 在让出点挂起
    Suspended,
}

/// 载体线程参数
#[derive(Debug, Clone)]
pub struct CarrierConfig {
    /// 载体线程栈大小
    pub stack_size: usize,
    /// 线程名前缀
    pub name_prefix: String,
}

/// 协作式执行上下文
pub struct Coroutine {
    id: ThreadId,
    phase: Arc<AtomicUsize>,
    status: CoroutineStatus,
    func: Option<ThreadFunction>,
    commands: Sender<Command>,
    replies: Receiver<Reply>,
    carrier: usize,
    alive: bool,
}

impl Coroutine {
    /// 启动一条新的载体线程并绑定函数
    pub fn new(func: ThreadFunction, id: ThreadId, config: &CarrierConfig) -> ThreadResult<Self> {
        let (command_tx, command_rx) = bounded(1);
        let (reply_tx, reply_rx) = bounded(1);
        let phase = Arc::new(AtomicUsize::new(0));
        let carrier = CARRIER_SEQ.fetch_add(1, Ordering::Relaxed);

        let carrier_phase = Arc::clone(&phase);
        thread::Builder::new()
            .name(format!("{}-{}", config.name_prefix, carrier))
            .stack_size(config.stack_size)
            .spawn(move || carrier_main(command_rx, reply_tx, carrier_phase))?;

        tracing::trace!(carrier, thread = %id, "carrier started");

        Ok(Self {
            id,
            phase,
            status: CoroutineStatus::Ready,
            func: Some(func),
            commands: command_tx,
            replies: reply_rx,
            carrier,
            alive: true,
        })
    }

    /// 绑定新的函数以便复用（只允许在空闲状态下调用）
    pub(crate) fn rebind(&mut self, func: ThreadFunction, id: ThreadId) {
        assert_eq!(
            self.status,
            CoroutineStatus::Idle,
            "rebinding a context that is still in use"
        );
        self.id = id;
        self.func = Some(func);
        self.status = CoroutineStatus::Ready;
    }

    /// 当前绑定的线程 ID
    #[inline]
    pub fn get_thread_id(&self) -> ThreadId {
        self.id
    }

    /// 当前阶段（每次恢复加 1，上下文存活期间从不重置）
    #[inline]
    pub fn get_thread_phase(&self) -> usize {
        self.phase.load(Ordering::Acquire)
    }

    /// 与记录共享的阶段计数器
    pub(crate) fn phase_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.phase)
    }

    #[inline]
    pub fn status(&self) -> CoroutineStatus {
        self.status
    }

    /// 载体线程编号
    #[inline]
    pub fn carrier(&self) -> usize {
        self.carrier
    }

    /// 是否可以放回池中复用
    #[inline]
    pub fn is_reusable(&self) -> bool {
        self.alive && self.status == CoroutineStatus::Idle
    }

    /// 恢复执行，直到线程体让出或返回
    ///
    /// 返回调度器接下来应记录的主状态
    pub fn resume(&mut self, state_ex: ThreadStateEx) -> ThreadResult<ThreadState> {
        let command = match self.status {
            CoroutineStatus::Idle => return Err(ThreadError::Finished(self.id)),
            CoroutineStatus::Ready => {
                let func = self.func.take().ok_or(ThreadError::Finished(self.id))?;
                Command::Start {
                    func,
                    id: self.id,
                    state_ex,
                }
            }
            CoroutineStatus::Suspended => Command::Resume(state_ex),
        };

        // 先推进阶段，线程体一开始运行就能看到新阶段；没有送达则撤回
        self.phase.fetch_add(1, Ordering::AcqRel);
        if self.commands.send(command).is_err() {
            self.phase.fetch_sub(1, Ordering::AcqRel);
            return Err(self.lost());
        }

        match self.replies.recv() {
            Ok(Reply::Yielded(state)) => {
                self.status = CoroutineStatus::Suspended;
                Ok(state)
            }
            Ok(Reply::Returned(state)) => {
                self.status = CoroutineStatus::Idle;
                Ok(state)
            }
            Ok(Reply::Panicked) | Ok(Reply::Unwound) => {
                self.status = CoroutineStatus::Idle;
                Ok(ThreadState::Terminated)
            }
            Err(_) => Err(self.lost()),
        }
    }

    /// 展开挂起中的线程体，使上下文回到空闲状态
    ///
    /// 线程体反复吞掉展开时返回 false，此时上下文不能再复用
    pub fn unwind(&mut self) -> bool {
        match self.status {
            CoroutineStatus::Idle => return self.alive,
            CoroutineStatus::Ready => {
                self.func = None;
                self.status = CoroutineStatus::Idle;
                return self.alive;
            }
            CoroutineStatus::Suspended => {}
        }

        for _ in 0..MAX_UNWIND_ATTEMPTS {
            if self.commands.send(Command::Unwind).is_err() {
                self.lost();
                return false;
            }
            match self.replies.recv() {
                Ok(Reply::Yielded(_)) => continue,
                Ok(_) => {
                    self.status = CoroutineStatus::Idle;
                    return true;
                }
                Err(_) => {
                    self.lost();
                    return false;
                }
            }
        }

        tracing::warn!(
            thread = %self.id,
            carrier = self.carrier,
            "thread body refused to unwind, discarding its context"
        );
        self.alive = false;
        false
    }

    fn lost(&mut self) -> ThreadError {
        self.alive = false;
        self.status = CoroutineStatus::Idle;
        ThreadError::CarrierLost(self.id)
    }
}

impl std::fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.id)
            .field("phase", &self.get_thread_phase())
            .field("status", &self.status)
            .field("carrier", &self.carrier)
            .finish()
    }
}

impl Drop for Coroutine {
    fn drop(&mut self) {
        if self.status == CoroutineStatus::Suspended {
            self.unwind();
        }
        // 载体线程在通道断开后自行退出，这里不 join
        let _ = self.commands.try_send(Command::Exit);
    }
}

/// 线程体看到的自身句柄
pub struct ThreadSelf {
    id: ThreadId,
    phase: Arc<AtomicUsize>,
    commands: Receiver<Command>,
    replies: Sender<Reply>,
    exit_requested: bool,
}

impl ThreadSelf {
    /// 当前线程 ID
    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// 当前阶段
    #[inline]
    pub fn phase(&self) -> usize {
        self.phase.load(Ordering::Acquire)
    }

    /// 让出执行权
    ///
    /// `state` 是交给调度器的主状态，返回值是下次被恢复时的扩展等待状态。
    /// 如果线程在挂起期间被回收，这里不会返回，而是把线程体展开
    pub fn yield_now(&mut self, state: ThreadState) -> ThreadStateEx {
        if self.replies.send(Reply::Yielded(state)).is_err() {
            self.exit_requested = true;
            panic::resume_unwind(Box::new(ForcedUnwind));
        }
        match self.commands.recv() {
            Ok(Command::Resume(state_ex)) => state_ex,
            Ok(Command::Unwind) => panic::resume_unwind(Box::new(ForcedUnwind)),
            Ok(Command::Exit) | Err(_) => {
                self.exit_requested = true;
                panic::resume_unwind(Box::new(ForcedUnwind))
            }
            Ok(Command::Start { .. }) => panic!("start command delivered to a running thread"),
        }
    }
}

impl std::fmt::Debug for ThreadSelf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSelf")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish()
    }
}

/// 载体线程主循环
fn carrier_main(commands: Receiver<Command>, replies: Sender<Reply>, phase: Arc<AtomicUsize>) {
    while let Ok(command) = commands.recv() {
        let (func, id, state_ex) = match command {
            Command::Start { func, id, state_ex } => (func, id, state_ex),
            Command::Exit => break,
            Command::Resume(_) | Command::Unwind => {
                // 没有挂起的线程体，视为已经结束
                if replies.send(Reply::Unwound).is_err() {
                    break;
                }
                continue;
            }
        };

        let mut this = ThreadSelf {
            id,
            phase: Arc::clone(&phase),
            commands: commands.clone(),
            replies: replies.clone(),
            exit_requested: false,
        };

        let outcome = {
            let _current = this_thread::enter(id, Arc::clone(&phase));
            panic::catch_unwind(AssertUnwindSafe(|| func(&mut this, state_ex)))
        };

        let reply = match outcome {
            Ok(state) => Reply::Returned(state),
            Err(payload) if payload.is::<ForcedUnwind>() => {
                tracing::trace!(thread = %id, "thread body unwound");
                Reply::Unwound
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic>".to_string());
                tracing::error!(thread = %id, %message, "thread body panicked");
                Reply::Panicked
            }
        };

        if this.exit_requested || replies.send(reply).is_err() {
            break;
        }
    }
}

//! lwthread 演示程序
//!
//! 用法：lwthread [workers] [threads] [yields]
//!
//! 每个 worker 拥有一个线程池，逻辑线程轮流在各池中创建，放进共享队列；
//! worker 取出线程执行，挂起的放回队列，结束的经由通用入口回收（可能回收到别的 worker 的池）。

use std::env;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_deque::{Injector, Steal};
use tracing_subscriber::EnvFilter;

use lwthread::config::{LIB_NAME, LOG_ENV, VERSION};
use lwthread::threads::registry;
use lwthread::{Thread, ThreadInitData, ThreadPool, ThreadResult, ThreadState, ThreadStateEx};

/// 命令行参数
#[derive(Debug)]
struct DemoArgs {
    workers: usize,
    threads: usize,
    yields: usize,
}

fn parse_count(arg: Option<String>, default: usize, name: &str) -> Result<usize, String> {
    match arg {
        None => Ok(default),
        Some(s) => match s.parse::<usize>() {
            Ok(0) => Err(format!("{} must be at least 1", name)),
            Ok(n) => Ok(n),
            Err(_) => Err(format!("invalid {}: {}", name, s)),
        },
    }
}

fn parse_args() -> Result<DemoArgs, String> {
    let mut args = env::args().skip(1);
    Ok(DemoArgs {
        workers: parse_count(args.next(), num_cpus::get(), "workers")?,
        threads: parse_count(args.next(), 64, "threads")?,
        yields: parse_count(args.next(), 8, "yields")?,
    })
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}

fn main() {
    init_logging();

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}", msg);
            eprintln!("usage: {} [workers] [threads] [yields]", LIB_NAME);
            process::exit(2);
        }
    };

    tracing::info!(version = VERSION, ?args, "starting {}", LIB_NAME);

    if let Err(e) = run(&args) {
        tracing::error!(error = %e, "demo failed");
        process::exit(1);
    }
}

fn run(args: &DemoArgs) -> ThreadResult<()> {
    let pools = (0..args.workers)
        .map(|_| ThreadPool::new())
        .collect::<ThreadResult<Vec<_>>>()?;

    let queue = Arc::new(Injector::new());
    let remaining = Arc::new(AtomicUsize::new(args.threads));

    for n in 0..args.threads {
        let pool = &pools[n % pools.len()];
        let yields = args.yields;
        let init = ThreadInitData::new(move |this, _| {
            for _ in 0..yields {
                if this.yield_now(ThreadState::Pending) == ThreadStateEx::WaitAbort {
                    break;
                }
            }
            ThreadState::Terminated
        })
        .with_description(format!("demo-{}", n));
        queue.push(pool.create(init, ThreadState::Pending)?);
    }

    let workers = (0..args.workers)
        .map(|w| {
            let queue = Arc::clone(&queue);
            let remaining = Arc::clone(&remaining);
            thread::Builder::new()
                .name(format!("worker-{}", w))
                .spawn(move || worker_loop(w, &queue, &remaining))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut executed = 0;
    for worker in workers {
        match worker.join() {
            Ok(n) => executed += n,
            Err(_) => tracing::error!("worker panicked"),
        }
    }

    for pool in &pools {
        let stats = pool.stats();
        tracing::info!(
            pool = pool.id(),
            created = stats.created,
            reclaimed = stats.reclaimed,
            acquired = stats.acquired,
            released = stats.released,
            cached = stats.cached_contexts,
            last_acquire = ?stats.last_acquire,
            last_release = ?stats.last_release,
            "pool stats"
        );
    }
    tracing::info!(executed, pools = registry::pool_count(), "done");
    Ok(())
}

/// 简单的 FIFO 调度循环
fn worker_loop(worker: usize, queue: &Injector<Thread>, remaining: &AtomicUsize) -> usize {
    let mut executed = 0;
    while remaining.load(Ordering::Acquire) > 0 {
        let t = match queue.steal() {
            Steal::Success(t) => t,
            Steal::Retry => continue,
            Steal::Empty => {
                thread::yield_now();
                continue;
            }
        };

        t.set_state(ThreadState::Active);
        let next = match t.execute() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(thread = %t.get_thread_id(), error = %e, "execute failed");
                ThreadState::Terminated
            }
        };
        executed += 1;
        t.set_state(next);

        match next {
            ThreadState::Terminated | ThreadState::Depleted => {
                t.reclaim();
                remaining.fetch_sub(1, Ordering::AcqRel);
            }
            _ => queue.push(t),
        }
    }
    tracing::debug!(worker, executed, "worker finished");
    executed
}

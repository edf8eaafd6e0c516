mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use crossbeam_channel::bounded;

use lwthread::config::TERMINATED_DESCRIPTION;
use lwthread::threads::{registry, this_thread};
use lwthread::{
    reclaim, Lineage, Tagged, Thread, ThreadInitData, ThreadPool, ThreadState, ThreadStateEx,
};

fn run_to_end(t: &Thread) -> usize {
    let mut resumptions = 0;
    loop {
        let next = t.execute().unwrap();
        resumptions += 1;
        t.set_state(next);
        if next == ThreadState::Terminated {
            return resumptions;
        }
    }
}

#[test]
fn test_child_inherits_lineage_from_running_thread() {
    common::init_test_logging();
    let pool = ThreadPool::new().unwrap();
    let (child_tx, child_rx) = bounded(1);

    let spawner = Arc::clone(&pool);
    let parent = pool
        .create(
            ThreadInitData::new(move |this, _| {
                this.yield_now(ThreadState::Pending);
                // 第二次恢复时创建子线程
                assert_eq!(this_thread::get_phase(), Some(2));
                let child = spawner
                    .create(
                        ThreadInitData::new(|_, _| ThreadState::Terminated),
                        ThreadState::Pending,
                    )
                    .unwrap();
                child_tx.send(child).unwrap();
                ThreadState::Terminated
            }),
            ThreadState::Pending,
        )
        .unwrap();

    assert_eq!(run_to_end(&parent), 2);
    let child = child_rx.recv().unwrap();

    assert_eq!(child.get_parent_thread_id(), Some(parent.get_thread_id()));
    assert_eq!(child.get_parent_thread_phase(), 2);
    assert_eq!(child.get_parent_locality_prefix(), 1);
}

#[test]
fn test_explicit_parent_overrides_current_thread() {
    common::init_test_logging();
    let pool = ThreadPool::new().unwrap();
    let (child_tx, child_rx) = bounded(1);
    let spawner = Arc::clone(&pool);
    let explicit = Lineage::new(42, Some(lwthread::ThreadId::new(9, 3, 1)), 17);

    let parent = pool
        .create(
            ThreadInitData::new(move |_, _| {
                let child = spawner
                    .create(
                        ThreadInitData::new(|_, _| ThreadState::Terminated)
                            .with_parent(explicit),
                        ThreadState::Pending,
                    )
                    .unwrap();
                child_tx.send(child).unwrap();
                ThreadState::Terminated
            }),
            ThreadState::Pending,
        )
        .unwrap();
    run_to_end(&parent);

    let child = child_rx.recv().unwrap();
    assert_eq!(child.get_parent_thread_id(), explicit.thread);
    assert_eq!(child.get_parent_thread_phase(), 17);
    assert_eq!(child.get_parent_locality_prefix(), 42);
}

#[test]
fn test_handle_degrades_after_generic_reclaim() {
    common::init_test_logging();
    let pool = ThreadPool::new().unwrap();
    let t = pool
        .create(
            ThreadInitData::new(|this, _| {
                this.yield_now(ThreadState::Suspended);
                ThreadState::Terminated
            })
            .with_description("suspended forever"),
            ThreadState::Pending,
        )
        .unwrap();
    assert_eq!(t.execute().unwrap(), ThreadState::Suspended);
    assert_eq!(t.get_description(), "suspended forever");

    // 通用回收入口只拿到 ID
    assert!(reclaim(t.get_thread_id()));

    assert_eq!(t.get_state(), Tagged::new(ThreadState::Terminated));
    assert_eq!(t.get_description(), TERMINATED_DESCRIPTION);
    assert_eq!(t.get_state_ex().value(), ThreadStateEx::WaitUnknown);
    assert_eq!(t.execute().unwrap(), ThreadState::Terminated);
    assert_eq!(pool.stats().cached_contexts, 1);
}

#[test]
fn test_execute_on_record_reclaimed_after_resolution() {
    common::init_test_logging();
    let pool = ThreadPool::new().unwrap();
    let t = pool
        .create(
            ThreadInitData::new(|this, _| {
                this.yield_now(ThreadState::Suspended);
                ThreadState::Terminated
            }),
            ThreadState::Pending,
        )
        .unwrap();
    assert_eq!(t.execute().unwrap(), ThreadState::Suspended);

    // 调度器已解析出记录，随后另一个 worker 回收了它
    let record = registry::resolve(t.get_thread_id()).unwrap();
    assert!(reclaim(t.get_thread_id()));

    assert_eq!(record.execute().unwrap(), ThreadState::Terminated);
    assert_eq!(t.execute().unwrap(), ThreadState::Terminated);
}

#[test]
fn test_cross_pool_reclamation() {
    common::init_test_logging();
    let pools: Vec<_> = (0..2).map(|_| ThreadPool::new().unwrap()).collect();
    let threads: Vec<Thread> = (0..8)
        .map(|n| {
            pools[n % 2]
                .create(
                    ThreadInitData::new(|this, _| {
                        this.yield_now(ThreadState::Pending);
                        ThreadState::Terminated
                    }),
                    ThreadState::Pending,
                )
                .unwrap()
        })
        .collect();

    // 另一个 OS 线程执行并回收所有线程，不知道它们来自哪个池
    let worker = {
        let threads = threads.clone();
        thread::spawn(move || {
            for t in &threads {
                run_to_end(t);
                assert!(registry::owner_of(t.get_thread_id()).is_some());
                assert!(reclaim(t.get_thread_id()));
            }
        })
    };
    worker.join().unwrap();

    for pool in &pools {
        let stats = pool.stats();
        assert_eq!(stats.created, 4);
        assert_eq!(stats.reclaimed, 4);
        assert_eq!(stats.live_records, 0);
        assert_eq!(stats.cached_contexts, 4);
    }
    for (n, t) in threads.iter().enumerate() {
        assert!(!t.is_created_from(&pools[n % 2]));
        assert!(!t.is_valid());
    }
}

#[test]
fn test_concurrent_set_state_tagged_through_handles() {
    common::init_test_logging();
    let pool = ThreadPool::new().unwrap();
    let t = pool
        .create(
            ThreadInitData::new(|_, _| ThreadState::Terminated),
            ThreadState::Suspended,
        )
        .unwrap();
    let stale = t.get_state();
    let barrier = Arc::new(Barrier::new(2));

    let racers: Vec<_> = [ThreadState::Pending, ThreadState::Terminated]
        .into_iter()
        .map(|target| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut expected = stale;
                barrier.wait();
                let won = t.set_state_tagged(target, &mut expected);
                (won, expected)
            })
        })
        .collect();
    let results: Vec<_> = racers.into_iter().map(|h| h.join().unwrap()).collect();

    let winners: Vec<_> = results.iter().filter_map(|(won, _)| *won).collect();
    assert_eq!(winners.len(), 1);
    let (_, loser_view) = results.iter().find(|(won, _)| won.is_none()).unwrap();
    assert_eq!(*loser_view, winners[0]);
    assert_eq!(t.get_state(), winners[0]);
    assert_eq!(t.get_state().tag(), stale.tag() + 1);
}

#[test]
fn test_stale_wakeup_is_detectable() {
    common::init_test_logging();
    let pool = ThreadPool::new().unwrap();
    let t = pool
        .create(
            ThreadInitData::new(|this, _| loop {
                if this.yield_now(ThreadState::Suspended) == ThreadStateEx::WaitAbort {
                    return ThreadState::Terminated;
                }
            }),
            ThreadState::Pending,
        )
        .unwrap();

    t.execute().unwrap();
    // 等待者在线程挂起时记下阶段和扩展状态
    let waited_phase = t.get_thread_phase();
    let waited_ex = t.get_state_ex();

    t.execute().unwrap();
    assert_eq!(t.get_thread_phase(), waited_phase + 1);
    assert_ne!(t.get_state_ex(), waited_ex);
    assert!(t.get_state_ex().tag() > waited_ex.tag());

    t.set_state_ex(ThreadStateEx::WaitAbort);
    assert_eq!(t.execute().unwrap(), ThreadState::Terminated);
    assert!(t.reclaim());
}

#[test]
fn test_body_cannot_reclaim_itself() {
    common::init_test_logging();
    let pool = ThreadPool::new().unwrap();
    let (tx, rx) = bounded(1);
    let t = pool
        .create(
            ThreadInitData::new(move |this, _| {
                tx.send(reclaim(this.id())).unwrap();
                ThreadState::Terminated
            }),
            ThreadState::Pending,
        )
        .unwrap();
    assert_eq!(t.execute().unwrap(), ThreadState::Terminated);
    assert!(!rx.recv().unwrap());
    assert!(t.is_valid());
    assert!(t.reclaim());
}

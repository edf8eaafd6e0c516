//! 带标签的原子状态机
//!
//! 状态值和单调递增的标签被打包进同一个 64 位原子字：
//! - 低 8 位：状态值
//! - 高 56 位：标签（每次成功修改加 1，用于区分重复出现的同一状态值）

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

const VALUE_BITS: u32 = 8;
const VALUE_MASK: u64 = (1 << VALUE_BITS) - 1;
const TAG_MASK: u64 = u64::MAX >> VALUE_BITS;

/// 可以放进标签状态机的状态枚举
pub trait StateValue: Copy + Eq + fmt::Debug {
    fn into_raw(self) -> u8;
    fn from_raw(raw: u8) -> Self;
}

/// 线程主状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ThreadState {
    Unknown = 0,
    /// 正在某个 worker 上运行
    Active = 1,
    /// 可运行，等待被调度
    Pending = 2,
    /// 挂起，等待外部唤醒
    Suspended = 3,
    /// 资源耗尽
    Depleted = 4,
    /// 已结束
    Terminated = 5,
    /// 已创建但尚未进入就绪队列
    Staged = 6,
}

impl From<u8> for ThreadState {
    fn from(v: u8) -> Self {
        match v {
            1 => ThreadState::Active,
            2 => ThreadState::Pending,
            3 => ThreadState::Suspended,
            4 => ThreadState::Depleted,
            5 => ThreadState::Terminated,
            6 => ThreadState::Staged,
            _ => ThreadState::Unknown,
        }
    }
}

impl StateValue for ThreadState {
    #[inline]
    fn into_raw(self) -> u8 {
        self as u8
    }

    #[inline]
    fn from_raw(raw: u8) -> Self {
        Self::from(raw)
    }
}

/// 扩展等待状态（线程被唤醒的原因）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ThreadStateEx {
    WaitUnknown = 0,
    /// 正常唤醒
    WaitSignaled = 1,
    /// 等待超时
    WaitTimeout = 2,
    /// 被要求结束
    WaitTerminate = 3,
    /// 被中止
    WaitAbort = 4,
}

impl From<u8> for ThreadStateEx {
    fn from(v: u8) -> Self {
        match v {
            1 => ThreadStateEx::WaitSignaled,
            2 => ThreadStateEx::WaitTimeout,
            3 => ThreadStateEx::WaitTerminate,
            4 => ThreadStateEx::WaitAbort,
            _ => ThreadStateEx::WaitUnknown,
        }
    }
}

impl StateValue for ThreadStateEx {
    #[inline]
    fn into_raw(self) -> u8 {
        self as u8
    }

    #[inline]
    fn from_raw(raw: u8) -> Self {
        Self::from(raw)
    }
}

/// 状态值 + 标签
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tagged<T> {
    value: T,
    tag: u64,
}

impl<T: StateValue> Tagged<T> {
    /// 标签为 0 的状态
    #[inline]
    pub fn new(value: T) -> Self {
        Self { value, tag: 0 }
    }

    /// 指定标签（超出 56 位的部分被截断）
    #[inline]
    pub fn with_tag(value: T, tag: u64) -> Self {
        Self { value, tag: tag & TAG_MASK }
    }

    #[inline]
    pub fn value(&self) -> T {
        self.value
    }

    #[inline]
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// 以当前标签为基础的下一个状态
    #[inline]
    fn next(self, value: T) -> Self {
        Self::with_tag(value, self.tag.wrapping_add(1))
    }

    #[inline]
    fn pack(self) -> u64 {
        (self.tag << VALUE_BITS) | self.value.into_raw() as u64
    }

    #[inline]
    fn unpack(raw: u64) -> Self {
        Self {
            value: T::from_raw((raw & VALUE_MASK) as u8),
            tag: raw >> VALUE_BITS,
        }
    }
}

impl<T: StateValue> From<T> for Tagged<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: StateValue> fmt::Debug for Tagged<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.value, self.tag)
    }
}

/// 原子的标签状态机
///
/// 所有修改都通过 CAS 完成，成功的修改让标签恰好加 1
pub struct TaggedState<T> {
    raw: CachePadded<AtomicU64>,
    _marker: PhantomData<T>,
}

impl<T: StateValue> TaggedState<T> {
    /// 创建标签为 0 的状态机
    pub fn new(value: T) -> Self {
        Self::with_tagged(Tagged::new(value))
    }

    pub fn with_tagged(initial: Tagged<T>) -> Self {
        Self {
            raw: CachePadded::new(AtomicU64::new(initial.pack())),
            _marker: PhantomData,
        }
    }

    /// 读取当前状态（acquire）
    #[inline]
    pub fn get(&self) -> Tagged<T> {
        Tagged::unpack(self.raw.load(Ordering::Acquire))
    }

    /// 无条件写入新状态，返回写入前一刻的状态
    ///
    /// 并发写者之间后写者胜出，输家的意图只体现在各自拿到的返回值里
    pub fn set(&self, value: T) -> Tagged<T> {
        let mut prev = self.get();
        loop {
            match self.raw.compare_exchange_weak(
                prev.pack(),
                prev.next(value).pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return prev,
                Err(actual) => prev = Tagged::unpack(actual),
            }
        }
    }

    /// 针对调用者上次看到的状态做一次 CAS，不重试
    ///
    /// 成功时返回新安装的状态；失败时把实际状态写回 `expected` 并返回 `None`
    pub fn set_tagged(&self, value: T, expected: &mut Tagged<T>) -> Option<Tagged<T>> {
        let new_state = expected.next(value);
        match self.raw.compare_exchange(
            expected.pack(),
            new_state.pack(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Some(new_state),
            Err(actual) => {
                *expected = Tagged::unpack(actual);
                None
            }
        }
    }

    /// 只有当前状态（含标签）仍等于 `old` 时才推进到 `value`
    pub fn restore(&self, value: T, old: Tagged<T>) -> bool {
        self.raw
            .compare_exchange(
                old.pack(),
                old.next(value).pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl<T: StateValue> fmt::Debug for TaggedState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaggedState").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_state_from_u8() {
        assert_eq!(ThreadState::from(5), ThreadState::Terminated);
        assert_eq!(ThreadState::from(200), ThreadState::Unknown);
        assert_eq!(ThreadStateEx::from(4), ThreadStateEx::WaitAbort);
        assert_eq!(ThreadStateEx::from(9), ThreadStateEx::WaitUnknown);
    }

    #[test]
    fn test_tagged_pack_roundtrip() {
        let t = Tagged::with_tag(ThreadState::Suspended, 0x00ab_cdef_0123_4567);
        assert_eq!(Tagged::<ThreadState>::unpack(t.pack()), t);
    }

    #[test]
    fn test_tag_truncated_to_56_bits() {
        let t = Tagged::with_tag(ThreadState::Pending, u64::MAX);
        assert_eq!(t.tag(), TAG_MASK);
        // 标签回绕到 0
        assert_eq!(t.next(ThreadState::Active).tag(), 0);
    }

    #[test]
    fn test_set_returns_previous() {
        let s = TaggedState::new(ThreadState::Pending);
        let prev = s.set(ThreadState::Active);
        assert_eq!(prev, Tagged::new(ThreadState::Pending));

        let now = s.get();
        assert_eq!(now.value(), ThreadState::Active);
        assert_eq!(now.tag(), prev.tag() + 1);

        let prev = s.set(ThreadState::Active);
        assert_eq!(prev, now);
        assert_eq!(s.get().tag(), 2);
    }

    #[test]
    fn test_set_tagged_success_and_failure() {
        let s = TaggedState::new(ThreadState::Pending);
        let mut expected = s.get();

        let installed = s.set_tagged(ThreadState::Active, &mut expected).unwrap();
        assert_eq!(installed, Tagged::with_tag(ThreadState::Active, 1));
        assert_eq!(s.get(), installed);

        // expected 已过期
        let mut stale = Tagged::new(ThreadState::Pending);
        assert!(s.set_tagged(ThreadState::Suspended, &mut stale).is_none());
        assert_eq!(stale, installed);
        assert_eq!(s.get(), installed);

        // 用更新后的 expected 重试
        let installed = s.set_tagged(ThreadState::Suspended, &mut stale).unwrap();
        assert_eq!(installed.tag(), 2);
    }

    #[test]
    fn test_restore() {
        let s = TaggedState::new(ThreadState::Suspended);
        let old = s.get();
        assert!(s.restore(ThreadState::Pending, old));
        assert_eq!(s.get(), Tagged::with_tag(ThreadState::Pending, old.tag() + 1));

        // 同样的值但标签不同：失败且不改变状态
        let before = s.get();
        assert!(!s.restore(ThreadState::Active, Tagged::new(ThreadState::Pending)));
        assert_eq!(s.get(), before);
    }

    #[test]
    fn test_restore_detects_aba() {
        let s = TaggedState::new(ThreadState::Suspended);
        let seen = s.get();
        s.set(ThreadState::Pending);
        s.set(ThreadState::Suspended);
        // 值相同，但中间发生过修改
        assert_eq!(s.get().value(), seen.value());
        assert!(!s.restore(ThreadState::Pending, seen));
    }

    #[test]
    fn test_concurrent_set_counts_every_write() {
        let s = Arc::new(TaggedState::new(ThreadStateEx::WaitUnknown));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&s);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        s.set(ThreadStateEx::WaitSignaled);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(s.get().tag(), 4000);
    }

    #[test]
    fn test_concurrent_set_tagged_single_winner() {
        for _ in 0..50 {
            let s = Arc::new(TaggedState::new(ThreadState::Pending));
            let stale = s.get();
            let barrier = Arc::new(Barrier::new(2));

            let racers: Vec<_> = [ThreadState::Active, ThreadState::Suspended]
                .into_iter()
                .map(|target| {
                    let s = Arc::clone(&s);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        let mut expected = stale;
                        barrier.wait();
                        let result = s.set_tagged(target, &mut expected);
                        (result, expected)
                    })
                })
                .collect();

            let results: Vec<_> = racers.into_iter().map(|h| h.join().unwrap()).collect();
            let winners: Vec<_> = results.iter().filter_map(|(r, _)| *r).collect();
            assert_eq!(winners.len(), 1);

            let winner = winners[0];
            let (_, loser_expected) = results.iter().find(|(r, _)| r.is_none()).unwrap();
            assert_eq!(*loser_expected, winner);
            assert_eq!(s.get(), winner);
        }
    }
}

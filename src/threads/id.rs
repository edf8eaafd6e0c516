//! 线程标识
//!
//! ThreadId 把（池 ID，槽位索引，代数）打包进一个非零 64 位整数：
//! - 高 16 位：池 ID
//! - 中间 20 位：槽位索引
//! - 低 28 位：代数（从 1 开始，所以整个值永不为 0）

use std::fmt;
use std::num::NonZeroU64;

const POOL_SHIFT: u32 = 48;
const INDEX_SHIFT: u32 = 28;
const INDEX_BITS: u32 = POOL_SHIFT - INDEX_SHIFT;
const GENERATION_MASK: u64 = (1 << INDEX_SHIFT) - 1;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

/// 每个池最多的槽位数
pub const MAX_SLOTS: usize = 1 << INDEX_BITS;

/// 槽位代数上限，达到后该槽位不再复用
pub const MAX_GENERATION: u32 = GENERATION_MASK as u32;

/// 线程唯一标识
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(NonZeroU64);

impl ThreadId {
    /// 由池 ID、槽位索引和代数构造
    ///
    /// `generation` 必须在 `1..=MAX_GENERATION` 之间，`index` 必须小于 `MAX_SLOTS`
    pub fn new(pool: u16, index: u32, generation: u32) -> Self {
        assert!((index as usize) < MAX_SLOTS, "slot index {} out of range", index);
        assert!(
            generation != 0 && generation <= MAX_GENERATION,
            "generation {} out of range",
            generation
        );
        let raw = ((pool as u64) << POOL_SHIFT)
            | ((index as u64) << INDEX_SHIFT)
            | generation as u64;
        // 代数非零，raw 一定非零
        match NonZeroU64::new(raw) {
            Some(raw) => Self(raw),
            None => unreachable!("generation is never zero"),
        }
    }

    /// 原始 64 位值，也作为记录的本地地址使用
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }

    /// 所属池 ID
    #[inline]
    pub fn pool_id(self) -> u16 {
        (self.0.get() >> POOL_SHIFT) as u16
    }

    /// 槽位索引
    #[inline]
    pub fn index(self) -> u32 {
        ((self.0.get() >> INDEX_SHIFT) & INDEX_MASK) as u32
    }

    /// 槽位代数
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0.get() & GENERATION_MASK) as u32
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.pool_id(), self.index(), self.generation())
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", self)
    }
}

impl From<ThreadId> for u64 {
    fn from(id: ThreadId) -> Self {
        id.as_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_fields() {
        let id = ThreadId::new(7, 1234, 42);
        assert_eq!(id.pool_id(), 7);
        assert_eq!(id.index(), 1234);
        assert_eq!(id.generation(), 42);
        assert_eq!(id.to_string(), "7:1234@42");
    }

    #[test]
    fn test_thread_id_limits() {
        let id = ThreadId::new(u16::MAX, (MAX_SLOTS - 1) as u32, MAX_GENERATION);
        assert_eq!(id.pool_id(), u16::MAX);
        assert_eq!(id.index() as usize, MAX_SLOTS - 1);
        assert_eq!(id.generation(), MAX_GENERATION);
        assert_eq!(u64::from(id) & GENERATION_MASK, MAX_GENERATION as u64);
    }

    #[test]
    #[should_panic]
    fn test_thread_id_zero_generation_panics() {
        let _ = ThreadId::new(1, 0, 0);
    }
}

//! 分布式寻址接口
//!
//! 线程只需要两样东西：当前 locality 的前缀，以及把本地地址转换成全局 ID 的函数。
//! 真正的寻址服务在运行时之外，这里给出接口和一个单机实现。

use std::fmt;

const LOCALITY_SHIFT: u32 = 32;
const CREDIT_SHIFT: u32 = 16;
const CREDIT_MASK: u64 = 0xffff << CREDIT_SHIFT;

/// 全局唯一标识
///
/// 高位字：高 32 位是 locality 前缀，16..32 位是引用额度（credit）
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Gid {
    msb: u64,
    lsb: u64,
}

impl Gid {
    pub const fn new(msb: u64, lsb: u64) -> Self {
        Self { msb, lsb }
    }

    #[inline]
    pub fn msb(&self) -> u64 {
        self.msb
    }

    #[inline]
    pub fn lsb(&self) -> u64 {
        self.lsb
    }

    /// 所在 locality 前缀
    #[inline]
    pub fn locality_prefix(&self) -> u32 {
        (self.msb >> LOCALITY_SHIFT) as u32
    }

    /// 附带的引用额度
    #[inline]
    pub fn credit(&self) -> u16 {
        ((self.msb & CREDIT_MASK) >> CREDIT_SHIFT) as u16
    }

    /// 去掉引用额度
    #[inline]
    pub fn strip_credit(self) -> Self {
        Self {
            msb: self.msb & !CREDIT_MASK,
            lsb: self.lsb,
        }
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{:016x}, {:016x}}}", self.msb, self.lsb)
    }
}

impl fmt::Debug for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gid{}", self)
    }
}

/// 寻址服务
pub trait Addressing: Send + Sync {
    /// 当前 locality 的前缀（未指定父 locality 时的默认值）
    fn locality_prefix(&self) -> u32;

    /// 把本地地址转换成全局 ID，结果可能带有引用额度
    fn gid_from_address(&self, address: u64) -> Gid;
}

/// 单机寻址：所有地址都属于同一个 locality
#[derive(Debug, Clone)]
pub struct LocalAddressing {
    prefix: u32,
    credit: u16,
}

impl LocalAddressing {
    pub fn new(prefix: u32) -> Self {
        Self { prefix, credit: 0 }
    }

    /// 生成的全局 ID 带上指定的引用额度
    pub fn with_credit(prefix: u32, credit: u16) -> Self {
        Self { prefix, credit }
    }
}

impl Default for LocalAddressing {
    fn default() -> Self {
        // 前缀 0 表示无效 locality
        Self::new(1)
    }
}

impl Addressing for LocalAddressing {
    fn locality_prefix(&self) -> u32 {
        self.prefix
    }

    fn gid_from_address(&self, address: u64) -> Gid {
        let msb = ((self.prefix as u64) << LOCALITY_SHIFT) | ((self.credit as u64) << CREDIT_SHIFT);
        Gid::new(msb, address)
    }
}

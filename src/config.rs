//! 配置常量模块
//!
//! 线程运行时相关的常量都在这里定义，便于后期修改

/// 库名称
pub const LIB_NAME: &str = "lwthread";

/// 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 载体线程默认栈大小：256KB
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// 每个池默认缓存的执行上下文上限
pub const DEFAULT_MAX_CACHED_CONTEXTS: usize = 256;

/// 载体线程名前缀
pub const CARRIER_NAME_PREFIX: &str = "lwt-carrier";

/// 已回收线程的描述占位符
pub const TERMINATED_DESCRIPTION: &str = "<terminated>";

/// 强制展开被线程体吞掉时的最大重试次数
pub const MAX_UNWIND_ATTEMPTS: usize = 8;

/// 日志过滤环境变量
pub const LOG_ENV: &str = "LWTHREAD_LOG";

//! 完全公平调度器（CFS）的就绪队列
//!
//! - [`libs::rbtree`]：以虚拟运行时间为键的红黑树
//! - [`libs::spinlock`]：保护运行队列的自旋锁
//! - [`sched::cfs`]：CFS运行队列以及全局实例
#![no_std]
#![allow(clippy::needless_return)]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;
#[macro_use]
extern crate lazy_static;

pub mod libs;
pub mod sched;

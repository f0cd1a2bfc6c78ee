pub mod rbtree;
pub mod spinlock;

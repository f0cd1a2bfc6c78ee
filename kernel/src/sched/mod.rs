pub mod cfs;

/// 进程表的槽位数，也就是全局CFS运行队列最多容纳的调度实体数
pub const NPROC: usize = 64;

/// nice值，越小优先级越高
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Nice(i32);

impl Nice {
    pub const MIN: i32 = -20;
    pub const MAX: i32 = 19;

    /// 创建一个新的nice值，超出范围时返回None
    pub const fn new(nice: i32) -> Option<Self> {
        if Self::validate(nice) {
            Some(Self(nice))
        } else {
            None
        }
    }

    /// 校验nice值是否合法
    pub const fn validate(nice: i32) -> bool {
        nice >= Self::MIN && nice <= Self::MAX
    }

    pub const fn data(&self) -> i32 {
        self.0
    }
}

impl From<Nice> for i32 {
    fn from(nice: Nice) -> Self {
        nice.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nice_range() {
        assert_eq!(Nice::new(-20).map(|n| n.data()), Some(-20));
        assert_eq!(Nice::new(19).map(|n| n.data()), Some(19));
        assert!(Nice::new(-21).is_none());
        assert!(Nice::new(20).is_none());
        assert_eq!(Nice::default().data(), 0);
        assert_eq!(i32::from(Nice::new(3).unwrap()), 3);
    }
}

#![no_std]
#![allow(clippy::needless_return)]
#![allow(clippy::upper_case_acronyms)]

use num_derive::FromPrimitive;

/// 运行队列各个操作返回的错误码，取值与posix错误码一致
#[repr(i32)]
#[derive(Debug, FromPrimitive, PartialEq, Eq, Clone, Copy)]
#[allow(dead_code, non_camel_case_types)]
pub enum SystemError {
    /// 操作不被允许 Operation not permitted.
    EPERM = 1,
    /// 没有指定的表项 No such entry（节点不在队列中）.
    ENOENT = 2,
    /// 资源不可用，请重试。 Resource unavailable, try again.(may be the same value as [EWOULDBLOCK])
    ///
    /// 操作将被禁止 Operation would block.(may be the same value as [EAGAIN]).
    EAGAIN_OR_EWOULDBLOCK = 11,
    /// 设备或资源忙 Device or resource busy.
    EBUSY = 16,
    /// 已存在 Entry exists.
    EEXIST = 17,
    /// 不可用的参数 Invalid argument.
    EINVAL = 22,
}

impl SystemError {
    /// @brief 把posix错误码转换为系统错误枚举类型。
    pub fn from_posix_errno(errno: i32) -> Option<SystemError> {
        // posix 错误码是小于0的
        if errno >= 0 {
            return None;
        }
        return <Self as num_traits::FromPrimitive>::from_i32(-errno);
    }

    /// @brief 把系统错误枚举类型转换为负数posix错误码。
    pub fn to_posix_errno(&self) -> i32 {
        return -(*self as i32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_works() {
        assert_eq!(SystemError::EPERM.to_posix_errno(), -1);
        assert_eq!(SystemError::EINVAL.to_posix_errno(), -22);
    }

    #[test]
    fn test_from_posix_errno() {
        assert_eq!(SystemError::from_posix_errno(-17), Some(SystemError::EEXIST));
        assert_eq!(
            SystemError::from_posix_errno(-11),
            Some(SystemError::EAGAIN_OR_EWOULDBLOCK)
        );
        assert_eq!(SystemError::from_posix_errno(-3), None);
        assert_eq!(SystemError::from_posix_errno(2), None);
    }
}

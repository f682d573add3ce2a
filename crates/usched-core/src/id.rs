//! Handle types for requests and continuations.
//!
//! Both follow the same NONE-sentinel newtype shape: a 32-bit index into a
//! fixed-size pool, with `u32::MAX` reserved to mean "no handle".

use crate::constants::HANDLE_NONE;
use core::fmt;

macro_rules! handle_type {
    ($name:ident, $none_doc:literal) => {
        #[doc = $none_doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const NONE: $name = $name(HANDLE_NONE);

            #[inline]
            pub const fn new(raw: u32) -> Self {
                $name(raw)
            }

            #[inline]
            pub const fn as_u32(self) -> u32 {
                self.0
            }

            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }

            #[inline]
            pub const fn is_none(self) -> bool {
                self.0 == HANDLE_NONE
            }

            #[inline]
            pub const fn is_some(self) -> bool {
                self.0 != HANDLE_NONE
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::NONE
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(raw: u32) -> Self {
                $name(raw)
            }
        }

        impl From<$name> for u32 {
            #[inline]
            fn from(v: $name) -> u32 {
                v.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_none() {
                    write!(f, concat!(stringify!($name), "(none)"))
                } else {
                    write!(f, concat!(stringify!($name), "({})"), self.0)
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_none() {
                    write!(f, "none")
                } else {
                    write!(f, "{}", self.0)
                }
            }
        }
    };
}

handle_type!(RequestId, "Index into the fixed-size request pool.");
handle_type!(ContinuationId, "Index into the fixed-size continuation pool.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_none_sentinel() {
        assert!(RequestId::NONE.is_none());
        assert!(!RequestId::NONE.is_some());
        assert_eq!(RequestId::default(), RequestId::NONE);
    }

    #[test]
    fn continuation_id_roundtrip() {
        let id = ContinuationId::new(7);
        assert_eq!(id.as_u32(), 7);
        assert_eq!(id.as_usize(), 7);
        assert!(id.is_some());
        let raw: u32 = id.into();
        assert_eq!(raw, 7);
    }
}

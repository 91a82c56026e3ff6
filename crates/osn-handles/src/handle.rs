//! Integer types usable as handles.

use std::fmt::{Debug, Display};
use std::hash::Hash;

/// An unsigned integer usable as a handle.
///
/// `SENTINEL` (the type's maximum) means "no object" and is never handed out.
pub trait HandleValue: Copy + Ord + Hash + Debug + Display + Send + Sync + 'static {
    const ZERO: Self;
    const SENTINEL: Self;

    /// `self + 1`, or `None` on overflow.
    fn next(self) -> Option<Self>;

    /// `self - 1`, or `None` on underflow.
    fn prev(self) -> Option<Self>;

    fn to_u64(self) -> u64;
}

macro_rules! impl_handle_value {
    ($($t:ty),*) => {
        $(
            impl HandleValue for $t {
                const ZERO: Self = 0;
                const SENTINEL: Self = <$t>::MAX;

                fn next(self) -> Option<Self> {
                    self.checked_add(1)
                }

                fn prev(self) -> Option<Self> {
                    self.checked_sub(1)
                }

                fn to_u64(self) -> u64 {
                    self as u64
                }
            }
        )*
    };
}

impl_handle_value!(u32, u64);

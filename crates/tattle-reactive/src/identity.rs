#![forbid(unsafe_code)]

//! Change detection for reactive cells.
//!
//! A write notifies only when the new value is not *identical* to the old
//! one. Identity is shallower than equality on purpose: plain values
//! compare by value, shared handles compare by pointer. Two distinct
//! `Rc`s holding equal payloads are different identities, so a write
//! swapping one for the other notifies even though the payloads are equal.

use std::rc::Rc;

/// Identity comparison used by the write path.
///
/// Implement this for your own value types to make them observable. For
/// aggregate types, prefer wrapping in `Rc` and getting pointer identity
/// over writing a deep comparison here.
pub trait Identity {
    /// Whether `self` and `other` are the same value for notification
    /// purposes.
    fn same(&self, other: &Self) -> bool;
}

macro_rules! identity_by_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Identity for $ty {
                #[inline]
                fn same(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

// Floats use `==`, so a NaN is never the same as itself and a write of
// NaN over NaN counts as a change.
identity_by_value!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char, (),
    String, &'static str,
);

impl<T> Identity for Rc<T> {
    #[inline]
    fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

impl<T: Identity> Identity for Option<T> {
    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same(b),
            _ => false,
        }
    }
}

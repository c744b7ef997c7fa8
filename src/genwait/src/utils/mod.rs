//! Utility
//!
//! **This module is exempt from the API stability guarantee.** It's exposed
//! only because [`klock`](crate::klock) refers to some of its items.
pub mod intrusive_list;
pub(crate) mod panicking;

/// Extract the value of a `Result` whose error type is uninhabited.
#[inline]
pub(crate) fn into_ok<T>(x: Result<T, core::convert::Infallible>) -> T {
    match x {
        Ok(x) => x,
        Err(e) => match e {},
    }
}

//! Compare-and-exchange primitive exposed to control programs.
//!
//! A thin, always-returns-the-previous-value wrapper over the std atomics so
//! programs can build their own cross-thread handshakes.

use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Atomic cell supporting compare-and-exchange.
pub trait CompareExchange {
    /// Value held by the cell.
    type Value: Copy + PartialEq;

    /// Replace the content with `desired` iff it equals `expected`.
    ///
    /// Returns the value observed immediately before the operation.
    fn compare_exchange_value(&self, expected: Self::Value, desired: Self::Value) -> Self::Value;
}

macro_rules! impl_compare_exchange {
    ($($atomic:ty => $value:ty),* $(,)?) => {
        $(
            impl CompareExchange for $atomic {
                type Value = $value;

                #[inline]
                fn compare_exchange_value(&self, expected: $value, desired: $value) -> $value {
                    match self.compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Acquire) {
                        Ok(previous) | Err(previous) => previous,
                    }
                }
            }
        )*
    };
}

impl_compare_exchange!(
    AtomicI32 => i32,
    AtomicI64 => i64,
    AtomicU32 => u32,
    AtomicU64 => u64,
    AtomicUsize => usize,
);

/// Atomically store `desired` in `cell` if it holds `expected`.
///
/// Always returns the previous content; the swap happened iff it equals `expected`.
#[inline]
pub fn compare_exchange<C: CompareExchange>(cell: &C, expected: C::Value, desired: C::Value) -> C::Value {
    cell.compare_exchange_value(expected, desired)
}

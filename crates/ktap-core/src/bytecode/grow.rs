//! Bounded, size-class growth for per-function arrays (constants, locals,
//! upvalues, nested prototypes, code).
//!
//! Growth doubles until half the hard limit is reached, then jumps straight to
//! the limit for one last step. Appending `n` elements therefore costs `O(n)`
//! and performs `O(log(limit / MIN_SIZE))` reallocations.

use tracing::trace;

use crate::{CoreError, CoreResult};

/// Smallest non-empty capacity handed out by [`grow_size`].
pub const MIN_SIZE: usize = 4;

/// Next capacity for a collection currently holding `current` slots.
///
/// Fails with [`CoreError::CapacityExceeded`] once `current` already sits at
/// `limit`. The result never exceeds `limit`.
pub fn grow_size(current: usize, limit: usize, what: &'static str) -> CoreResult<usize> {
    if current >= limit / 2 {
        if current >= limit {
            return Err(CoreError::CapacityExceeded { what, limit });
        }
        // still room for at least one more slot
        Ok(limit)
    } else {
        Ok(current.saturating_mul(2).max(MIN_SIZE).min(limit))
    }
}

/// Append-only array whose capacity follows [`grow_size`].
#[derive(Debug, Clone)]
pub struct GrowBuffer<T> {
    items: Vec<T>,
    capacity: usize,
    limit: usize,
    what: &'static str,
    reallocs: usize,
}

impl<T> GrowBuffer<T> {
    /// Empty buffer for a collection called `what`, bounded by `limit`.
    pub const fn new(what: &'static str, limit: usize) -> Self {
        Self { items: Vec::new(), capacity: 0, limit, what, reallocs: 0 }
    }

    /// Logical length.
    pub fn len(&self) -> usize { self.items.len() }

    /// True when nothing was appended yet.
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    /// Committed capacity (always `>= len()`).
    pub const fn capacity(&self) -> usize { self.capacity }

    /// Hard limit.
    pub const fn limit(&self) -> usize { self.limit }

    /// Number of storage reallocations so far.
    pub const fn reallocations(&self) -> usize { self.reallocs }

    /// Stored elements, in insertion order.
    pub fn as_slice(&self) -> &[T] { &self.items }

    /// Mutable view over the stored elements.
    pub fn as_mut_slice(&mut self) -> &mut [T] { &mut self.items }

    /// Element at `idx`.
    pub fn get(&self, idx: usize) -> Option<&T> { self.items.get(idx) }

    /// Iterate in insertion order.
    pub fn iter(&self) -> core::slice::Iter<'_, T> { self.items.iter() }

    /// Makes room for one more element.
    ///
    /// The new storage is reserved before the capacity is committed, so on
    /// any error the buffer keeps its previous contents and capacity.
    pub fn ensure_capacity(&mut self) -> CoreResult<()> {
        if self.items.len() < self.capacity {
            return Ok(());
        }
        let new_cap = grow_size(self.capacity, self.limit, self.what)?;
        let additional = new_cap - self.items.len();
        self.items
            .try_reserve_exact(additional)
            .map_err(|_| CoreError::AllocationFailure { what: self.what, requested: new_cap })?;
        trace!(what = self.what, from = self.capacity, to = new_cap, "grow");
        self.capacity = new_cap;
        self.reallocs += 1;
        Ok(())
    }

    /// Appends `value` and returns its index.
    pub fn push(&mut self, value: T) -> CoreResult<usize> {
        self.ensure_capacity()?;
        let idx = self.items.len();
        self.items.push(value);
        Ok(idx)
    }

    /// Consumes the buffer, keeping only the elements.
    pub fn into_vec(self) -> Vec<T> { self.items }
}

impl<'a, T> IntoIterator for &'a GrowBuffer<T> {
    type Item = &'a T;
    type IntoIter = core::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter { self.iter() }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_growth_uses_min_size() {
        assert_eq!(grow_size(0, 1000, "constants").unwrap(), MIN_SIZE);
        assert_eq!(grow_size(1, 1000, "constants").unwrap(), MIN_SIZE);
        assert_eq!(grow_size(4, 1000, "constants").unwrap(), 8);
    }

    #[test]
    fn last_step_jumps_to_limit() {
        // 6 >= 10/2: doubling would overshoot, the limit is handed out instead
        assert_eq!(grow_size(6, 10, "locals").unwrap(), 10);
        assert_eq!(grow_size(5, 10, "locals").unwrap(), 10);
        assert_eq!(grow_size(4, 10, "locals").unwrap(), 8);
    }

    #[test]
    fn tiny_limit_is_never_exceeded() {
        assert_eq!(grow_size(0, 3, "upvalues").unwrap(), 3);
    }

    #[test]
    fn growth_at_limit_fails() {
        let err = grow_size(10, 10, "upvalues").unwrap_err();
        assert_eq!(err, CoreError::CapacityExceeded { what: "upvalues", limit: 10 });
        assert_eq!(err.to_string(), "too many upvalues (limit is 10)");
    }

    #[test]
    fn full_buffer_keeps_contents_on_failure() {
        let mut buf = GrowBuffer::new("upvalues", 4);
        for v in 0..4 {
            buf.push(v).unwrap();
        }
        let before = buf.reallocations();
        let err = buf.push(99).unwrap_err();
        assert!(matches!(err, CoreError::CapacityExceeded { limit: 4, .. }));
        assert_eq!(buf.as_slice(), &[0, 1, 2, 3]);
        assert_eq!(buf.capacity(), 4);
        assert_eq!(buf.reallocations(), before);
    }

    #[test]
    fn capacity_sequence_doubles_then_clamps() {
        let mut buf = GrowBuffer::new("constants", 20);
        let mut seen = Vec::new();
        for v in 0..20 {
            buf.push(v).unwrap();
            if seen.last() != Some(&buf.capacity()) {
                seen.push(buf.capacity());
            }
        }
        assert_eq!(seen, vec![4, 8, 16, 20]);
    }

    proptest! {
        #[test]
        fn pushes_are_ordered_and_reallocs_logarithmic(n in 0usize..2000, extra in 0usize..5000) {
            let limit = n + extra + 1;
            let mut buf = GrowBuffer::new("items", limit);
            for v in 0..n {
                prop_assert_eq!(buf.push(v).unwrap(), v);
            }
            prop_assert_eq!(buf.len(), n);
            prop_assert!(buf.len() <= buf.capacity());
            prop_assert!(buf.iter().copied().eq(0..n));

            // doubling from MIN_SIZE, plus the final clamp step
            let bound = (limit as f64 / MIN_SIZE as f64).log2().ceil().max(0.0) as usize + 2;
            prop_assert!(buf.reallocations() <= bound);
        }
    }
}

//! Per-state scratch allocation.
//!
//! Contingency loops allocate many short-lived vectors and sets (lost buses,
//! compensation right-hand sides, removed-term lists). They all live in one
//! [`ArenaContext`] that is reset between contingency states, so the loop does
//! a handful of bump allocations instead of hitting the global allocator.
//!
//! ```
//! use flowsens_algo::arena::ArenaContext;
//!
//! let mut arena = ArenaContext::new();
//! for _state in 0..3 {
//!     let mut lost = arena.alloc_hashset::<usize>();
//!     lost.insert(4);
//!     let mut rhs = arena.alloc_vec::<f64>();
//!     rhs.extend([1.0, -1.0]);
//!     assert!(lost.contains(&4));
//!     drop((lost, rhs));
//!     arena.reset();
//! }
//! ```

use bumpalo::Bump;
use hashbrown::DefaultHashBuilder;
use std::hash::Hash;

pub type ArenaVec<'a, T> = bumpalo::collections::Vec<'a, T>;
pub type ArenaSet<'a, T> = hashbrown::HashSet<T, DefaultHashBuilder, &'a Bump>;
pub type ArenaMap<'a, K, V> = hashbrown::HashMap<K, V, DefaultHashBuilder, &'a Bump>;

pub struct ArenaContext {
    bump: Bump,
}

impl ArenaContext {
    pub fn new() -> Self {
        Self { bump: Bump::new() }
    }

    /// Drop every allocation of the previous state at once.
    ///
    /// Needs `&mut self`, so no arena collection can outlive the call.
    pub fn reset(&mut self) {
        self.bump.reset();
    }

    pub fn alloc_vec<T>(&self) -> ArenaVec<'_, T> {
        bumpalo::collections::Vec::new_in(&self.bump)
    }

    pub fn alloc_vec_filled<T: Clone>(&self, len: usize, value: T) -> ArenaVec<'_, T> {
        let mut v = bumpalo::collections::Vec::with_capacity_in(len, &self.bump);
        v.resize(len, value);
        v
    }

    pub fn alloc_hashset<T: Hash + Eq>(&self) -> ArenaSet<'_, T> {
        hashbrown::HashSet::with_hasher_in(DefaultHashBuilder::default(), &self.bump)
    }

    pub fn alloc_hashmap<K: Hash + Eq, V>(&self) -> ArenaMap<'_, K, V> {
        hashbrown::HashMap::with_hasher_in(DefaultHashBuilder::default(), &self.bump)
    }

    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }
}

impl Default for ArenaContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_is_reusable_after_reset() {
        let mut arena = ArenaContext::new();
        {
            let mut v = arena.alloc_vec_filled(128, 0.0f64);
            v[3] = 1.5;
            assert_eq!(v.len(), 128);
            assert_eq!(v[3], 1.5);
        }
        let used = arena.allocated_bytes();
        assert!(used > 0);
        arena.reset();
        {
            let v = arena.alloc_vec_filled(128, 0.0f64);
            assert!(v.iter().all(|x| *x == 0.0));
        }
        // the chunk is kept, not grown
        assert!(arena.allocated_bytes() <= used);
    }

    #[test]
    fn sets_and_maps_work_in_arena() {
        let arena = ArenaContext::new();
        let mut lost = arena.alloc_hashset::<usize>();
        lost.insert(2);
        lost.insert(2);
        lost.insert(7);
        assert_eq!(lost.len(), 2);

        let mut columns = arena.alloc_hashmap::<usize, f64>();
        columns.insert(1, 0.5);
        *columns.entry(1).or_insert(0.0) += 0.25;
        assert_eq!(columns.get(&1), Some(&0.75));
    }
}

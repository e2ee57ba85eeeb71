//!
//! Allocator of contiguous index ranges over a dense array.
//!
//! The allocator only does bookkeeping: the data lives in the caller's
//! arrays, which are resized and moved through `IndexAllocatorCallbacks`.
//! After `defragment()` the live ranges are packed at the low end, so the
//! data arrays stay dense.
//!

use std::ops::Range;

use crate::base::AnimError;

/// Hooks used by `IndexAllocator` to keep the caller's arrays in sync.
pub trait IndexAllocatorCallbacks {
    /// Data arrays must be resized to `num_indices`.
    fn set_num_indices(&mut self, num_indices: usize);

    /// Data at `source` must be moved to `target..target + source.len()`.
    /// `target < source.start`, the ranges may overlap.
    fn move_index_range(&mut self, source: Range<usize>, target: usize);
}

///
/// Hands out ranges of `count` contiguous indices.
///
/// `counts[i]` is the length of the range that starts at `i`. Indices inside
/// a range hold `-j`, where `j` is the offset from the range start.
///
#[derive(Debug, Clone, Default)]
pub struct IndexAllocator {
    counts: Vec<i32>,
    unused_indices: Vec<usize>,
}

impl IndexAllocator {
    pub fn new() -> IndexAllocator {
        return IndexAllocator::default();
    }

    /// Returns the first index of a range of `count` indices.
    ///
    /// Reuses a freed range of exactly `count` first, then splits the freed
    /// range with the least excess, and only then grows the arrays.
    pub fn alloc(&mut self, count: usize, callbacks: &mut dyn IndexAllocatorCallbacks) -> usize {
        let count = count.max(1);

        let mut least_excess_pos = None;
        let mut least_excess = usize::MAX;
        for (pos, &unused) in self.unused_indices.iter().enumerate() {
            let unused_count = self.count_for_index(unused);
            if unused_count < count {
                continue;
            }
            let excess = unused_count - count;
            if excess == 0 {
                self.unused_indices.swap_remove(pos);
                return unused;
            }
            if excess < least_excess {
                least_excess = excess;
                least_excess_pos = Some(pos);
            }
        }

        if let Some(pos) = least_excess_pos {
            let excess_index = self.unused_indices[pos];
            self.initialize_index(excess_index, count);
            let remainder_index = excess_index + count;
            self.initialize_index(remainder_index, least_excess);
            self.unused_indices[pos] = remainder_index;
            return excess_index;
        }

        let new_index = self.num_indices();
        self.set_num_indices(new_index + count, callbacks);
        self.initialize_index(new_index, count);
        return new_index;
    }

    /// Returns the range starting at `index` to the allocator.
    /// The data stays in place until the next `defragment()`.
    pub fn free(&mut self, index: usize) -> Result<(), AnimError> {
        if !self.valid_index(index) {
            return Err(AnimError::InvalidIndex);
        }
        self.unused_indices.push(index);
        return Ok(());
    }

    /// Packs live ranges at the low end and shrinks the arrays.
    pub fn defragment(&mut self, callbacks: &mut dyn IndexAllocatorCallbacks) {
        if self.unused_indices.is_empty() {
            return;
        }

        loop {
            self.consolidate_unused_indices();
            if self.unused_at_end() {
                break;
            }
            self.backfill_first_unused(callbacks);
        }

        let num_indices = self.unused_indices[0];
        self.set_num_indices(num_indices, callbacks);
        self.unused_indices.clear();
    }

    /// True if all freed indices form one range at the end of the array.
    pub fn unused_at_end(&self) -> bool {
        return self.unused_indices.len() == 1 && self.next_index(self.unused_indices[0]) == self.num_indices();
    }

    /// True if every index is free.
    pub fn empty(&self) -> bool {
        return self.num_indices() == self.num_unused_indices();
    }

    /// True if `index` starts a range that is currently allocated.
    pub fn valid_index(&self, index: usize) -> bool {
        return index < self.num_indices() && self.counts[index] > 0 && !self.unused_indices.contains(&index);
    }

    pub fn num_unused_indices(&self) -> usize {
        return self.unused_indices.iter().map(|&i| self.count_for_index(i)).sum();
    }

    /// Length of the range starting at `index`. Zero if `index` doesn't
    /// start a range.
    pub fn count_for_index(&self, index: usize) -> usize {
        return match self.counts.get(index) {
            Some(&count) if count > 0 => count as usize,
            _ => 0,
        };
    }

    #[inline]
    pub fn num_indices(&self) -> usize {
        return self.counts.len();
    }

    /// Checks that the counts array describes back-to-back ranges.
    pub fn verify_internal_state(&self) -> Result<(), AnimError> {
        let mut i = 0;
        while i < self.num_indices() {
            let count = self.counts[i];
            if count <= 0 {
                return Err(AnimError::Unexcepted);
            }
            for j in 1..count {
                if self.counts.get(i + j as usize) != Some(&-j) {
                    return Err(AnimError::Unexcepted);
                }
            }
            i += count as usize;
        }
        return Ok(());
    }

    #[inline]
    fn next_index(&self, index: usize) -> usize {
        return index + self.count_for_index(index).max(1);
    }

    /// Start of the range that ends at `index`.
    #[inline]
    fn prev_index(&self, index: usize) -> usize {
        let prev_count = self.counts[index - 1];
        return if prev_count > 0 {
            index - 1
        } else {
            (index as i64 - 1 + prev_count as i64) as usize
        };
    }

    fn initialize_index(&mut self, index: usize, count: usize) {
        self.counts[index] = count as i32;
        for i in 1..count {
            self.counts[index + i] = -(i as i32);
        }
    }

    fn set_num_indices(&mut self, num_indices: usize, callbacks: &mut dyn IndexAllocatorCallbacks) {
        self.counts.resize(num_indices, 0);
        callbacks.set_num_indices(num_indices);
    }

    /// Sorts freed ranges and merges neighbours.
    fn consolidate_unused_indices(&mut self) {
        self.unused_indices.sort_unstable();

        let mut new_num_unused = 0;
        let mut i = 0;
        while i < self.unused_indices.len() {
            let unused = self.unused_indices[i];

            let mut j = i + 1;
            while j < self.unused_indices.len() && self.unused_indices[j] == self.next_index(self.unused_indices[j - 1]) {
                j += 1;
            }

            let num_consecutive = j - i;
            if num_consecutive > 1 {
                let consolidated_count = self.next_index(self.unused_indices[j - 1]) - unused;
                self.initialize_index(unused, consolidated_count);
            }

            self.unused_indices[new_num_unused] = unused;
            new_num_unused += 1;
            i += num_consecutive;
        }
        self.unused_indices.truncate(new_num_unused);
    }

    /// Fills the first hole, either with live ranges from the end of the
    /// array that fit, or by shifting the ranges after the hole down.
    fn backfill_first_unused(&mut self, callbacks: &mut dyn IndexAllocatorCallbacks) {
        let unused_start = self.unused_indices[0];
        let unused_range = unused_start..unused_start + self.count_for_index(unused_start);

        let fill = self.last_index_range_smaller_than_hole(unused_range.start);
        let is_fill = fill.is_some();
        let fill_range = fill.unwrap_or_else(|| {
            let next_hole = self.unused_indices.get(1).copied().unwrap_or(self.num_indices());
            unused_range.end..next_hole
        });

        callbacks.move_index_range(fill_range.clone(), unused_range.start);
        self.counts.copy_within(fill_range.clone(), unused_range.start);

        if is_fill {
            self.initialize_index(fill_range.start, fill_range.len());
            self.unused_indices[0] = fill_range.start;

            let hole = unused_range.start + fill_range.len()..unused_range.end;
            if !hole.is_empty() {
                self.initialize_index(hole.start, hole.len());
                self.unused_indices.push(hole.start);
            }
        } else {
            let shift_hole = unused_range.start + fill_range.len()..fill_range.end;
            self.initialize_index(shift_hole.start, shift_hole.len());
            self.unused_indices[0] = shift_hole.start;
        }
    }

    /// Last run of live ranges, after `index`, that fits in the hole at `index`.
    fn last_index_range_smaller_than_hole(&self, index: usize) -> Option<Range<usize>> {
        let count = self.count_for_index(index);

        let mut unused_i = self.unused_indices.len().checked_sub(1)?;
        let mut end = self.num_indices();
        while end > index {
            let unused_start = self.unused_indices[unused_i];
            let unused_end = self.next_index(unused_start);
            if end == unused_end {
                match unused_i.checked_sub(1) {
                    Some(i) => unused_i = i,
                    None => break,
                }
                end = self.prev_index(end);
                continue;
            }

            let mut start = end;
            let mut j = self.prev_index(end);
            while j > index {
                if end - j > count || j == unused_start {
                    break;
                }
                start = j;
                j = self.prev_index(j);
            }

            if start < end {
                return Some(start..end);
            }
            end = self.prev_index(end);
        }
        return None;
    }
}

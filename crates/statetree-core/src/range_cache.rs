//! Cache of one contiguous block of items inside an active window.
//!
//! The cache tracks an active range `[range_start, range_end)` over a larger
//! sequence and keeps at most one contiguous block of populated positions
//! inside it. Narrowing the range evicts populated positions that fall
//! outside, reporting them to the remove listener once per evicted block.
//! Populating positions reports them to the add listener once per call.
//! Growing the range reports nothing: newly covered positions hold no items
//! until they are populated, and each populated position is announced once.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Range;

use crate::error::TreeError;

/// Listener receiving the first index of a block and its items.
pub type RangeListener<T> = Box<dyn FnMut(usize, &[T])>;

pub struct SingleRangeCache<T> {
    range_start: usize,
    range_end: usize,
    data_start: usize,
    data: VecDeque<T>,
    on_added: Option<RangeListener<T>>,
    on_removed: Option<RangeListener<T>>,
}

/// Listener-free copy of a cache's contents.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeCacheState<T> {
    range_start: usize,
    range_end: usize,
    data_start: usize,
    data: VecDeque<T>,
}

impl<T: Clone> SingleRangeCache<T> {
    pub fn new(range_start: usize, range_end: usize) -> Result<Self, TreeError> {
        if range_start > range_end {
            return Err(TreeError::InvalidRange {
                start: range_start,
                end: range_end,
            });
        }
        Ok(Self {
            range_start,
            range_end,
            data_start: range_start,
            data: VecDeque::new(),
            on_added: None,
            on_removed: None,
        })
    }

    pub fn set_added_listener(&mut self, listener: impl FnMut(usize, &[T]) + 'static) {
        self.on_added = Some(Box::new(listener));
    }

    pub fn set_removed_listener(&mut self, listener: impl FnMut(usize, &[T]) + 'static) {
        self.on_removed = Some(Box::new(listener));
    }

    pub fn range_start(&self) -> usize {
        self.range_start
    }

    pub fn range_end(&self) -> usize {
        self.range_end
    }

    pub fn range(&self) -> Range<usize> {
        self.range_start..self.range_end
    }

    /// Positions currently holding an item.
    pub fn data_range(&self) -> Range<usize> {
        self.data_start..self.data_start + self.data.len()
    }

    pub fn set_range_start(&mut self, start: usize) -> Result<(), TreeError> {
        if start > self.range_end {
            return Err(TreeError::InvalidRange {
                start,
                end: self.range_end,
            });
        }
        self.range_start = start;
        self.evict_front(start);
        Ok(())
    }

    pub fn set_range_end(&mut self, end: usize) -> Result<(), TreeError> {
        if end < self.range_start {
            return Err(TreeError::InvalidRange {
                start: self.range_start,
                end,
            });
        }
        self.range_end = end;
        self.evict_back(end);
        Ok(())
    }

    /// Moves both bounds, ordering the updates so the range never inverts.
    pub fn set_range(&mut self, start: usize, end: usize) -> Result<(), TreeError> {
        if start > end {
            return Err(TreeError::InvalidRange { start, end });
        }
        if start > self.range_end {
            self.set_range_start(self.range_end)?;
            self.set_range_end(end)?;
            self.set_range_start(start)
        } else {
            self.set_range_start(start)?;
            self.set_range_end(end)
        }
    }

    /// Item at `index`; `None` when the position is in range but unpopulated.
    pub fn get(&self, index: usize) -> Result<Option<&T>, TreeError> {
        if !self.range().contains(&index) {
            return Err(TreeError::OutsideRange {
                index,
                start: self.range_start,
                end: self.range_end,
            });
        }
        Ok(index
            .checked_sub(self.data_start)
            .and_then(|offset| self.data.get(offset)))
    }

    /// Populates `[index, index + items.len())`.
    ///
    /// Items adjacent to or overlapping the populated block extend it,
    /// overwritten positions are reported as removed first. Items disjoint
    /// from the block replace it entirely.
    pub fn set(&mut self, index: usize, items: Vec<T>) -> Result<(), TreeError> {
        let end = index + items.len();
        if index < self.range_start || end > self.range_end {
            return Err(TreeError::InvalidRange { start: index, end });
        }
        if items.is_empty() {
            return Ok(());
        }
        let data = self.data_range();
        if self.data.is_empty() || end < data.start || index > data.end {
            self.evict_all();
            self.data_start = index;
            self.data.extend(items.iter().cloned());
        } else {
            let overlap = index.max(data.start)..end.min(data.end);
            if !overlap.is_empty() {
                let replaced: Vec<T> = overlap
                    .clone()
                    .map(|position| self.data[position - self.data_start].clone())
                    .collect();
                self.notify_removed(overlap.start, &replaced);
                for position in overlap {
                    self.data[position - self.data_start] = items[position - index].clone();
                }
            }
            for position in (index..data.start.min(end)).rev() {
                self.data.push_front(items[position - index].clone());
            }
            self.data_start = self.data_start.min(index);
            for position in data.end.max(index)..end {
                self.data.push_back(items[position - index].clone());
            }
        }
        if let Some(listener) = self.on_added.as_mut() {
            listener(index, &items);
        }
        Ok(())
    }

    /// Populated part of `[start, end)`, if any.
    pub fn available_range(&self, start: usize, end: usize) -> Option<Range<usize>> {
        let data = self.data_range();
        let available = start.max(data.start)..end.min(data.end);
        (!available.is_empty()).then_some(available)
    }

    pub fn items(&self, range: Range<usize>) -> Vec<T> {
        range
            .filter_map(|index| {
                index
                    .checked_sub(self.data_start)
                    .and_then(|offset| self.data.get(offset))
                    .cloned()
            })
            .collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    pub fn state(&self) -> RangeCacheState<T> {
        RangeCacheState {
            range_start: self.range_start,
            range_end: self.range_end,
            data_start: self.data_start,
            data: self.data.clone(),
        }
    }

    /// Restores a previous [`state`](Self::state) without notifying
    /// listeners.
    pub fn restore(&mut self, state: RangeCacheState<T>) {
        self.range_start = state.range_start;
        self.range_end = state.range_end;
        self.data_start = state.data_start;
        self.data = state.data;
    }

    fn evict_front(&mut self, start: usize) {
        let count = start.saturating_sub(self.data_start).min(self.data.len());
        if count == 0 {
            return;
        }
        let first = self.data_start;
        let evicted: Vec<T> = self.data.drain(..count).collect();
        self.data_start += count;
        if self.data.is_empty() {
            self.data_start = self.range_start;
        }
        self.notify_removed(first, &evicted);
    }

    fn evict_back(&mut self, end: usize) {
        let keep = end.saturating_sub(self.data_start).min(self.data.len());
        if keep == self.data.len() {
            return;
        }
        let first = self.data_start + keep;
        let evicted: Vec<T> = self.data.drain(keep..).collect();
        if self.data.is_empty() {
            self.data_start = self.range_start;
        }
        self.notify_removed(first, &evicted);
    }

    fn evict_all(&mut self) {
        let first = self.data_start;
        let evicted: Vec<T> = self.data.drain(..).collect();
        if !evicted.is_empty() {
            self.notify_removed(first, &evicted);
        }
    }

    fn notify_removed(&mut self, first: usize, items: &[T]) {
        if let Some(listener) = self.on_removed.as_mut() {
            listener(first, items);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SingleRangeCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleRangeCache")
            .field("range", &(self.range_start..self.range_end))
            .field("data_start", &self.data_start)
            .field("data", &self.data)
            .finish()
    }
}

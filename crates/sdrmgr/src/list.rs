// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Generic containers.
//!
//! Two containers back every higher layer:
//!
//! - [`List`]: ordered sequence with head/tail operations (queues, timers)
//! - [`GrowList`]: dynamic array of owned items (control and worker tables)
//!
//! Both carry a persistent iteration cursor, an ordered insert and a linear
//! search. The cursor survives removal of the item it last returned, which
//! lets callers drop entries while walking the list.

use std::cmp::Ordering;
use std::collections::VecDeque;

// ============================================================================
// List
// ============================================================================

/// Ordered sequence with a persistent cursor.
#[derive(Debug, Clone)]
pub struct List<T> {
    items: VecDeque<T>,
    cursor: usize,
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> List<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert at the head. A rewound cursor stays on the new head.
    pub fn push_head(&mut self, item: T) {
        self.items.push_front(item);
        if self.cursor > 0 {
            self.cursor += 1;
        }
    }

    /// Insert at the tail.
    pub fn push_tail(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Remove the head item.
    pub fn pop_head(&mut self) -> Option<T> {
        let item = self.items.pop_front()?;
        self.cursor = self.cursor.saturating_sub(1);
        Some(item)
    }

    /// Remove the tail item.
    pub fn pop_tail(&mut self) -> Option<T> {
        let item = self.items.pop_back()?;
        self.cursor = self.cursor.min(self.items.len());
        Some(item)
    }

    pub fn head(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn tail(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Insert `item` before the first element that compares greater.
    ///
    /// Equal elements keep insertion order.
    pub fn insert_ordered<F>(&mut self, item: T, mut cmp: F) -> usize
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let index = self
            .items
            .iter()
            .position(|other| cmp(&item, other) == Ordering::Less)
            .unwrap_or(self.items.len());
        self.items.insert(index, item);
        if index < self.cursor {
            self.cursor += 1;
        }
        index
    }

    /// Linear search.
    pub fn find<F>(&self, mut pred: F) -> Option<&T>
    where
        F: FnMut(&T) -> bool,
    {
        self.items.iter().find(|item| pred(item))
    }

    /// Linear search returning the position.
    pub fn position<F>(&self, pred: F) -> Option<usize>
    where
        F: FnMut(&T) -> bool,
    {
        self.items.iter().position(pred)
    }

    /// Remove the item at `index`.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        let item = self.items.remove(index)?;
        if index < self.cursor {
            self.cursor -= 1;
        }
        Some(item)
    }

    /// Reset the cursor to the head.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Return the item under the cursor and advance.
    pub fn cursor_next(&mut self) -> Option<&T> {
        let index = self.cursor;
        if index >= self.items.len() {
            return None;
        }
        self.cursor += 1;
        self.items.get(index)
    }

    /// Remove the item last returned by [`cursor_next`](Self::cursor_next).
    pub fn cursor_remove(&mut self) -> Option<T> {
        let index = self.cursor.checked_sub(1)?;
        self.cursor = index;
        self.items.remove(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    /// Remove every item, returning them in order.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.cursor = 0;
        self.items.drain(..)
    }
}

// ============================================================================
// GrowList
// ============================================================================

/// Dynamic array of owned items with a persistent cursor.
#[derive(Debug, Clone)]
pub struct GrowList<T> {
    items: Vec<T>,
    cursor: usize,
}

impl<T> Default for GrowList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GrowList<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            cursor: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append an item, returning its index.
    pub fn push(&mut self, item: T) -> usize {
        self.items.push(item);
        self.items.len() - 1
    }

    /// Insert `item` before the first element that compares greater.
    pub fn insert_ordered<F>(&mut self, item: T, mut cmp: F) -> usize
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let index = self
            .items
            .iter()
            .position(|other| cmp(&item, other) == Ordering::Less)
            .unwrap_or(self.items.len());
        self.items.insert(index, item);
        if index < self.cursor {
            self.cursor += 1;
        }
        index
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    pub fn find<F>(&self, mut pred: F) -> Option<&T>
    where
        F: FnMut(&T) -> bool,
    {
        self.items.iter().find(|item| pred(item))
    }

    pub fn find_mut<F>(&mut self, mut pred: F) -> Option<&mut T>
    where
        F: FnMut(&T) -> bool,
    {
        self.items.iter_mut().find(|item| pred(item))
    }

    pub fn position<F>(&self, pred: F) -> Option<usize>
    where
        F: FnMut(&T) -> bool,
    {
        self.items.iter().position(pred)
    }

    /// Remove the item at `index`, shifting later items down.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index >= self.items.len() {
            return None;
        }
        let item = self.items.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        Some(item)
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Return the item under the cursor and advance.
    pub fn cursor_next(&mut self) -> Option<&mut T> {
        let index = self.cursor;
        if index >= self.items.len() {
            return None;
        }
        self.cursor += 1;
        self.items.get_mut(index)
    }

    /// Remove the item last returned by [`cursor_next`](Self::cursor_next).
    pub fn cursor_remove(&mut self) -> Option<T> {
        let index = self.cursor.checked_sub(1)?;
        if index >= self.items.len() {
            return None;
        }
        self.cursor = index;
        Some(self.items.remove(index))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, T> {
        self.cursor = 0;
        self.items.drain(..)
    }
}

//! Detection order bias.
//!
//! The MRU list holds one `(format, weight)` item per registered format.
//! Items start in registration order with weight 0.  Each successful
//! detection bumps the winner's weight and lets it overtake at most one
//! lighter item closer to the front, so the list drifts toward descending
//! weight without a full sort per hit.

use serde::Serialize;

use super::FormatId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MruItem {
    pub format: FormatId,
    pub weight: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MruList {
    items: Vec<MruItem>,
}

impl MruList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a zero-weight item for a newly registered format.
    pub fn push(&mut self, format: FormatId) {
        self.items.push(MruItem { format, weight: 0 });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<MruItem> {
        self.items.get(position).copied()
    }

    pub fn position(&self, format: FormatId) -> Option<usize> {
        self.items.iter().position(|item| item.format == format)
    }

    pub fn weight(&self, format: FormatId) -> Option<u32> {
        self.position(format).map(|k| self.items[k].weight)
    }

    pub fn as_slice(&self) -> &[MruItem] {
        &self.items
    }

    /// Record a hit for `format`.
    ///
    /// Increments its weight, then swaps it with the first item before it
    /// whose weight is now smaller, and stops there.  Unknown formats are
    /// ignored.
    pub fn promote(&mut self, format: FormatId) {
        let Some(index) = self.position(format) else {
            return;
        };

        self.items[index].weight = self.items[index].weight.saturating_add(1);
        let weight = self.items[index].weight;

        if let Some(k) = self.items[..index].iter().position(|item| item.weight < weight) {
            self.items.swap(k, index);
        }
    }
}

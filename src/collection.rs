use crate::gallery::Item;

/// Items loaded for the current filter session, in arrival order.
///
/// Append-only: once an item has an index it keeps it until the next
/// [`ItemCollection::replace`], which starts a new epoch.
#[derive(Debug, Clone, Default)]
pub struct ItemCollection {
    items: Vec<Item>,
    epoch: u64,
}

impl ItemCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, items: Vec<Item>) {
        self.items = items;
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Appends a page and returns the index its first item now occupies.
    pub fn append(&mut self, items: Vec<Item>) -> usize {
        let start = self.items.len();
        self.items.extend(items);
        start
    }

    pub fn get(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Bumped on every replace so consumers can tell a reset from growth.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Session-state key the active filters are persisted under.
pub const FILTERS_KEY: &str = "galleryFilters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterCategory {
    Platform,
    Category,
    Tags,
    Types,
}

impl FilterCategory {
    pub const ALL: [FilterCategory; 4] = [
        FilterCategory::Platform,
        FilterCategory::Category,
        FilterCategory::Types,
        FilterCategory::Tags,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterCategory::Platform => "platform",
            FilterCategory::Category => "category",
            FilterCategory::Tags => "tags",
            FilterCategory::Types => "types",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FilterCategory::Platform => "Platform",
            FilterCategory::Category => "Category",
            FilterCategory::Tags => "Tags",
            FilterCategory::Types => "Types",
        }
    }
}

impl fmt::Display for FilterCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selected values per category. Serializes to the backend's
/// `{"platform": [..], "category": [..], "tags": [..], "types": [..]}` shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    #[serde(default)]
    pub platform: BTreeSet<String>,
    #[serde(default)]
    pub category: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub types: BTreeSet<String>,
}

impl FilterSet {
    pub fn values(&self, category: FilterCategory) -> &BTreeSet<String> {
        match category {
            FilterCategory::Platform => &self.platform,
            FilterCategory::Category => &self.category,
            FilterCategory::Tags => &self.tags,
            FilterCategory::Types => &self.types,
        }
    }

    fn values_mut(&mut self, category: FilterCategory) -> &mut BTreeSet<String> {
        match category {
            FilterCategory::Platform => &mut self.platform,
            FilterCategory::Category => &mut self.category,
            FilterCategory::Tags => &mut self.tags,
            FilterCategory::Types => &mut self.types,
        }
    }

    pub fn contains(&self, category: FilterCategory, value: &str) -> bool {
        self.values(category).contains(value)
    }

    /// Adds the value if absent, removes it if present. Returns whether the
    /// value is selected afterwards.
    pub fn toggle(&mut self, category: FilterCategory, value: &str) -> bool {
        let values = self.values_mut(category);
        if values.remove(value) {
            false
        } else {
            values.insert(value.to_string());
            true
        }
    }

    pub fn active_count(&self) -> usize {
        FilterCategory::ALL
            .iter()
            .map(|category| self.values(*category).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.active_count() == 0
    }
}

/// Key/value persistence scoped to the current viewing session.
pub trait StateStore: Send + Sync {
    fn load_state(&self, key: &str) -> Result<Option<String>>;
    fn save_state(&self, key: &str, value: &str) -> Result<()>;
    fn remove_state(&self, key: &str) -> Result<()>;
}

pub struct FilterStore {
    active: FilterSet,
    backend: Arc<dyn StateStore>,
}

impl FilterStore {
    /// Restores the persisted filter set. A hard reload drops whatever was
    /// persisted before restoring, so the session starts clean.
    pub fn restore(backend: Arc<dyn StateStore>, hard_reload: bool) -> Self {
        if hard_reload {
            if let Err(err) = backend.remove_state(FILTERS_KEY) {
                tracing::warn!(error = %err, "filters: clear persisted state on hard reload");
            }
        }

        let active = match backend.load_state(FILTERS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<FilterSet>(&raw) {
                Ok(set) => set,
                Err(err) => {
                    tracing::warn!(error = %err, "filters: discard unreadable persisted state");
                    FilterSet::default()
                }
            },
            Ok(None) => FilterSet::default(),
            Err(err) => {
                tracing::warn!(error = %err, "filters: load persisted state");
                FilterSet::default()
            }
        };

        tracing::debug!(active = active.active_count(), hard_reload, "filters restored");
        Self { active, backend }
    }

    pub fn active(&self) -> &FilterSet {
        &self.active
    }

    pub fn active_count(&self) -> usize {
        self.active.active_count()
    }

    pub fn toggle(&mut self, category: FilterCategory, value: &str) -> &FilterSet {
        let selected = self.active.toggle(category, value);
        tracing::debug!(%category, value, selected, "filter toggled");
        self.persist();
        &self.active
    }

    pub fn reset(&mut self) {
        self.active = FilterSet::default();
        if let Err(err) = self.backend.remove_state(FILTERS_KEY) {
            tracing::warn!(error = %err, "filters: clear persisted state");
        }
    }

    fn persist(&self) {
        let result = serde_json::to_string(&self.active)
            .map_err(anyhow::Error::from)
            .and_then(|raw| self.backend.save_state(FILTERS_KEY, &raw));
        if let Err(err) = result {
            tracing::warn!(error = %err, "filters: persist state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryState;

    #[test]
    fn toggle_twice_restores_original() {
        let backend = Arc::new(MemoryState::default());
        let mut store = FilterStore::restore(backend, false);
        store.toggle(FilterCategory::Tags, "rust");
        let before = store.active().clone();

        store.toggle(FilterCategory::Platform, "YouTube");
        assert!(store.active().contains(FilterCategory::Platform, "YouTube"));
        store.toggle(FilterCategory::Platform, "YouTube");

        assert_eq!(store.active(), &before);
    }

    #[test]
    fn values_stay_unique_per_category() {
        let mut set = FilterSet::default();
        set.toggle(FilterCategory::Types, "video");
        set.toggle(FilterCategory::Tags, "video");
        assert_eq!(set.values(FilterCategory::Types).len(), 1);
        assert_eq!(set.active_count(), 2);
    }

    #[test]
    fn reconstruction_observes_latest_state() {
        let backend = Arc::new(MemoryState::default());
        {
            let mut store = FilterStore::restore(backend.clone(), false);
            store.toggle(FilterCategory::Category, "Cooking");
            store.toggle(FilterCategory::Platform, "TikTok");
        }
        let store = FilterStore::restore(backend, false);
        assert!(store.active().contains(FilterCategory::Category, "Cooking"));
        assert!(store.active().contains(FilterCategory::Platform, "TikTok"));
    }

    #[test]
    fn hard_reload_clears_persisted_filters() {
        let backend = Arc::new(MemoryState::default());
        FilterStore::restore(backend.clone(), false).toggle(FilterCategory::Tags, "ai");

        let store = FilterStore::restore(backend.clone(), true);
        assert!(store.active().is_empty());
        assert!(backend.load_state(FILTERS_KEY).unwrap().is_none());
    }

    #[test]
    fn reset_clears_memory_and_storage() {
        let backend = Arc::new(MemoryState::default());
        let mut store = FilterStore::restore(backend.clone(), false);
        store.toggle(FilterCategory::Tags, "ai");
        store.reset();
        assert_eq!(store.active_count(), 0);
        assert!(backend.load_state(FILTERS_KEY).unwrap().is_none());
    }

    #[test]
    fn unreadable_state_starts_empty() {
        let backend = Arc::new(MemoryState::default());
        backend.save_state(FILTERS_KEY, "{not json").unwrap();
        let store = FilterStore::restore(backend, false);
        assert!(store.active().is_empty());
    }

    #[test]
    fn serializes_with_category_keys() {
        let mut set = FilterSet::default();
        set.toggle(FilterCategory::Platform, "Instagram");
        let value = serde_json::to_value(&set).unwrap();
        assert_eq!(value["platform"][0], "Instagram");
        assert!(value["tags"].as_array().unwrap().is_empty());
    }
}

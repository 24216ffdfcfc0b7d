//! Model objects submitted to the pipeline.
//!
//! Items are owned by the document (the external collection). The pipeline
//! only reads them: it never changes geometry, it only tracks transient
//! per-run progress alongside them.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{PoisonError, RwLock};

/// Stable identifier of an item within a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One independently processed model object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Item identifier
    pub id: ItemId,

    /// Number of mesh vertices, used to weight progress
    pub vertex_count: usize,

    /// Tracked but excluded from processing (e.g. a helper object)
    #[serde(default)]
    pub ignore: bool,

    /// Disabled by the user
    #[serde(default)]
    pub disabled: bool,

    /// Output channel annotation (extruder / tool index)
    #[serde(default)]
    pub extruder: Option<u32>,
}

impl Item {
    /// Create an enabled item with the given vertex count.
    pub fn new(id: impl Into<String>, vertex_count: usize) -> Self {
        Self {
            id: ItemId::new(id),
            vertex_count,
            ignore: false,
            disabled: false,
            extruder: None,
        }
    }

    /// Mark the item disabled.
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Whether the item takes part in a run.
    pub fn is_eligible(&self) -> bool {
        !self.ignore && !self.disabled
    }
}

/// Fingerprint of the eligible items, used to decide whether a completed
/// SLICE still matches the document.
pub(crate) fn fingerprint(items: &[Item]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for item in items.iter().filter(|i| i.is_eligible()) {
        item.id.hash(&mut hasher);
        item.vertex_count.hash(&mut hasher);
        item.extruder.hash(&mut hasher);
    }
    hasher.finish()
}

/// Rendering order derived from a selection: item id to position.
pub(crate) fn selection_order(selection: &[ItemId]) -> Option<HashMap<ItemId, usize>> {
    if selection.is_empty() {
        return None;
    }
    Some(
        selection
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect(),
    )
}

/// Read access to the document's items.
pub trait ItemCollection: Send + Sync {
    /// All items in document order.
    fn items(&self) -> Vec<Item>;

    /// Currently selected items, in selection order.
    fn selection(&self) -> Vec<ItemId> {
        Vec::new()
    }
}

/// In-memory item collection.
#[derive(Debug, Default)]
pub struct StaticCollection {
    items: RwLock<Vec<Item>>,
    selection: RwLock<Vec<ItemId>>,
}

impl StaticCollection {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items: RwLock::new(items),
            selection: RwLock::new(Vec::new()),
        }
    }

    /// Replace the items.
    pub fn set_items(&self, items: Vec<Item>) {
        *self.items.write().unwrap_or_else(PoisonError::into_inner) = items;
    }

    /// Replace the selection.
    pub fn select(&self, ids: Vec<ItemId>) {
        *self.selection.write().unwrap_or_else(PoisonError::into_inner) = ids;
    }
}

impl ItemCollection for StaticCollection {
    fn items(&self) -> Vec<Item> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn selection(&self) -> Vec<ItemId> {
        self.selection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

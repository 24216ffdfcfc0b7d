//! Items and the enumerations shared across the pipeline.

mod item;
mod mode;

pub use item::{Item, ItemCollection, ItemId, StaticCollection};
pub use mode::{PreviewMode, ProcessMode, Stage, View};

pub(crate) use item::{fingerprint, selection_order};

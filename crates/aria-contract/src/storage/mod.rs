//! Storage contract: pagination types, field-granular patches, errors, and
//! the per-entity store traits.

mod traits;
mod types;

pub use traits::{
    AssistantStore, EntityStores, MessageStore, RunStepStore, RunStore, ThreadStore,
};
pub use types::{
    paginate_in_memory, AssistantPatch, ListPage, ListQuery, MessagePatch, RunPatch, RunStepPatch,
    SortOrder, StoreError, ThreadPatch,
};

//! Kiln Library - Persistent catalog of finished assets
//!
//! The catalog is a single JSON document that is read fully and rewritten
//! fully on every mutation. `AssetLibrary` is a cloneable handle; all clones
//! share one write lock so overlapping saves never lose updates.

mod library;
mod types;

pub use library::AssetLibrary;
pub use types::{AssetDraft, AssetKind, SavedAsset};

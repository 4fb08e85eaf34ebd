//! Hierarchical key/value store with a stable-cell numeric cache.
//!
//! This crate is the data backbone of the engine: JSON documents addressed by
//! dotted keys with bracketed indices, a cache that hands out address-stable
//! numeric cells for hot-path expression binding, prefix-restricted scoped
//! views, a process-wide cache for external JSONC files, and the pure
//! transformation pipeline behind piped read queries.

pub mod cache;
pub mod capture;
pub mod cell;
pub mod document;
pub mod jsonc;
pub mod key;
pub mod scope;
mod transform;
pub mod value;

pub use cache::DocumentCache;
pub use cell::{CellRef, NumCell};
pub use document::{CommandHook, Document, DocumentLock, EPSILON, EntryState, MemberKind};
pub use scope::{DocScope, ScopeError};
pub use value::{DocValue, SimpleValue};

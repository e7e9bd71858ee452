// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Tag normalization and propagation for book libraries.
//!
//! Tagsmith keeps a library's free-text "tags" field synchronized with a set
//! of custom metadata columns through user-defined alias and implication
//! rules. The engine has two halves:
//!
//! - The __registry builder__ ([`TagRegistry::build`]) folds the distinct
//!   values of every participating column together with the user's rule
//!   document into one canonical tag registry: aliases, implied add tags,
//!   automatic `"Head (Extra)"` splitting, and priority-based
//!   de-duplication across columns.
//! - The __rule applier__ ([`TagRegistry::apply`]) resolves one book's
//!   current tag set against that registry: aliases fold away, implication
//!   graphs close transitively with cycle safety, and the result partitions
//!   deterministically back into the owning columns.
//!
//! The registry lives for one sync run and is never persisted; the rule
//! document ([`SyncRules`]) is the only user-owned state. Library access
//! goes through the [`MetadataStore`] trait, with [`MemoryStore`] as the
//! bundled implementation, and [`sync_books`] drives a whole run.

pub mod config;
pub mod path;
pub mod registry;
pub mod store;
pub mod sync;

pub use config::{ColumnSettings, ConfigError, SyncRules, TagSettings};
pub use path::default_rules_path;
pub use registry::{
    resolve::{ResolveError, MAX_IMPLICATION_DEPTH},
    Tag, TagRegistry,
};
pub use store::{
    BookId, BookRecord, DistinctValue, LibrarySnapshot, MemoryStore, MetadataStore, StoreError,
};
pub use sync::{sync_all_books, sync_books, CancelToken, SkippedBook, SyncError, SyncReport};

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Sync operation driver.
//!
//! One sync run builds the tag registry once from the current column
//! contents and the rule document, then resolves every requested book
//! against that shared registry in a simple sequential loop.
//!
//! # Write Semantics
//!
//! A book's fields are written all-or-nothing: either resolution succeeded
//! and every participating column gets its new list, including empty lists
//! that clear stale values, or nothing at all is written for that book.
//!
//! # Failure Policy
//!
//! A book whose implication chains overrun the depth ceiling is skipped with
//! a warning and recorded in the [`SyncReport`]; the rest of the batch keeps
//! going. Internal invariant violations get the same skip treatment but are
//! logged as errors, since they point at a defect rather than a rule
//! misconfiguration. Configuration problems (no columns included, no books
//! requested, a column that no longer exists) abort the run before any
//! write happens.
//!
//! # Cancellation
//!
//! The run polls a [`CancelToken`] between books. A cancelled run never
//! leaves a half-written book behind.

use crate::{
    config::SyncRules,
    registry::{resolve::ResolveError, TagRegistry},
    store::{BookId, DistinctValue, MetadataStore, StoreError},
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, error, info, instrument, warn};

/// Cooperative cancellation flag shared with the trigger layer.
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Construct new token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The run stops before the next book.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Check whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of one sync run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Books whose fields were rewritten.
    pub synced: Vec<BookId>,

    /// Books skipped with the resolution failure that caused it.
    pub skipped: Vec<SkippedBook>,

    /// Whether the run stopped early on a cancellation request.
    pub cancelled: bool,
}

/// One book left untouched by a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedBook {
    /// The book that was skipped.
    pub book_id: BookId,

    /// Why resolution failed for it.
    pub reason: ResolveError,
}

/// Sync every book in the library.
///
/// Convenience wrapper over [`sync_books`] using the store's full book id
/// listing.
///
/// # Errors
///
/// Same as [`sync_books`].
pub fn sync_all_books<S>(
    store: &mut S,
    rules: &SyncRules,
    cancel: &CancelToken,
) -> Result<SyncReport>
where
    S: MetadataStore,
{
    let book_ids = store.book_ids();
    sync_books(store, rules, &book_ids, cancel)
}

/// Sync a list of books against the current rule document.
///
/// Builds one registry from the included columns' distinct values, then
/// resolves and rewrites each requested book in order.
///
/// # Errors
///
/// - Return [`SyncError::NoColumnsConfigured`] if the rule document includes
///   no columns.
/// - Return [`SyncError::NoBooksSelected`] if `book_ids` is empty.
/// - Return [`SyncError::Store`] if a configured column does not exist, or a
///   requested book cannot be read or written.
#[instrument(skip(store, rules, cancel), level = "debug")]
pub fn sync_books<S>(
    store: &mut S,
    rules: &SyncRules,
    book_ids: &[BookId],
    cancel: &CancelToken,
) -> Result<SyncReport>
where
    S: MetadataStore,
{
    let columns = rules.included_columns();
    if columns.is_empty() {
        return Err(SyncError::NoColumnsConfigured);
    }
    if book_ids.is_empty() {
        return Err(SyncError::NoBooksSelected);
    }

    // Gather every column's distinct values up front so a stale column name
    // aborts the run before any book gets touched.
    let mut column_values: Vec<(String, Vec<DistinctValue>)> = Vec::with_capacity(columns.len());
    for column in &columns {
        let values = store.distinct_field_values(column)?;
        column_values.push((column.to_string(), values));
    }

    let registry = TagRegistry::build(&column_values, rules);
    info!(
        tags = registry.len(),
        columns = columns.len(),
        books = book_ids.len(),
        "registry built, starting sync"
    );

    let mut report = SyncReport::default();
    for &book_id in book_ids {
        if cancel.is_cancelled() {
            info!(book_id, "sync cancelled between books");
            report.cancelled = true;
            break;
        }

        let mut book_values: Vec<(String, Vec<String>)> = Vec::with_capacity(columns.len());
        for column in &columns {
            book_values.push((column.to_string(), store.read_field(book_id, column)?));
        }

        let partitions = match registry.apply(&book_values) {
            Ok(partitions) => partitions,
            Err(reason @ ResolveError::RecursionLimit { .. }) => {
                warn!(book_id, %reason, "book skipped, implication chain too deep");
                report.skipped.push(SkippedBook { book_id, reason });
                continue;
            }
            Err(reason) => {
                error!(
                    book_id,
                    %reason,
                    working_set = ?book_values,
                    "book skipped, resolution violated an internal invariant"
                );
                report.skipped.push(SkippedBook { book_id, reason });
                continue;
            }
        };

        // All participating columns are written, empty ones included, so no
        // stale values survive the rewrite.
        for column in &columns {
            let values = partitions.get(*column).cloned().unwrap_or_default();
            store.write_field(book_id, column, values)?;
        }
        debug!(book_id, "book synced");
        report.synced.push(book_id);
    }

    info!(
        synced = report.synced.len(),
        skipped = report.skipped.len(),
        cancelled = report.cancelled,
        "sync finished"
    );

    Ok(report)
}

/// Sync operation error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Rule document includes no columns to sync.
    #[error("no columns are configured for syncing")]
    NoColumnsConfigured,

    /// Caller requested a sync over zero books.
    #[error("no books were selected for syncing")]
    NoBooksSelected,

    /// Metadata store access failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

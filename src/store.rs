// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Metadata store access.
//!
//! The core never talks to a real book database. It sees the library through
//! the [`MetadataStore`] trait: enumerate book ids, list the distinct values
//! of a field across the library, and read or write one book's field list.
//! No schema beyond "field holds a list of strings" is assumed.
//!
//! [`MemoryStore`] is the bundled implementation. It keeps the whole library
//! in memory and round-trips through [`LibrarySnapshot`], a small TOML layout
//! the CLI uses as its on-disk library file.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Identifier of one book in the library.
pub type BookId = u64;

/// One distinct value of a metadata field across the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinctValue {
    /// Stable identifier of this value within its field.
    pub origin_id: u64,

    /// The value as stored, original casing preserved.
    pub value: String,

    /// Number of books currently carrying this value.
    pub usage_count: u64,
}

/// Layer of indirection for book metadata access.
///
/// Writes replace the field's whole list. Writing an empty list clears the
/// field; callers never need placeholder elements to force an overwrite.
pub trait MetadataStore {
    /// Enumerate all book identifiers in the library.
    fn book_ids(&self) -> Vec<BookId>;

    /// List the distinct values of a field across the whole library.
    ///
    /// Values appear in a stable first-seen order with stable origin ids.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::UnknownField`] if the field does not exist or
    ///   does not hold text values.
    fn distinct_field_values(&self, field: &str) -> Result<Vec<DistinctValue>>;

    /// Read one book's value list for a field.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::UnknownField`] if the field does not exist.
    /// - Return [`StoreError::UnknownBook`] if the book does not exist.
    fn read_field(&self, book_id: BookId, field: &str) -> Result<Vec<String>>;

    /// Replace one book's value list for a field.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::UnknownField`] if the field does not exist.
    /// - Return [`StoreError::UnknownBook`] if the book does not exist.
    fn write_field(&mut self, book_id: BookId, field: &str, values: Vec<String>) -> Result<()>;
}

/// In-memory metadata store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryStore {
    fields: Vec<String>,
    books: BTreeMap<BookId, BTreeMap<String, Vec<String>>>,
}

impl MemoryStore {
    /// Construct new store with a fixed set of text fields.
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            books: BTreeMap::new(),
        }
    }

    /// Insert a book with its field lists. Unknown fields are kept as-is so
    /// a snapshot survives a rules edit that drops a column.
    pub fn insert_book(
        &mut self,
        book_id: BookId,
        fields: impl IntoIterator<Item = (impl Into<String>, Vec<String>)>,
    ) {
        let fields = fields
            .into_iter()
            .map(|(name, values)| (name.into(), values))
            .collect();
        self.books.insert(book_id, fields);
    }

    /// Convert store back into its snapshot layout.
    pub fn into_snapshot(self) -> LibrarySnapshot {
        LibrarySnapshot {
            fields: self.fields,
            books: self
                .books
                .into_iter()
                .map(|(id, fields)| BookRecord { id, fields })
                .collect(),
        }
    }

    fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|name| name == field)
    }
}

impl MetadataStore for MemoryStore {
    fn book_ids(&self) -> Vec<BookId> {
        self.books.keys().copied().collect()
    }

    fn distinct_field_values(&self, field: &str) -> Result<Vec<DistinctValue>> {
        if !self.has_field(field) {
            return Err(StoreError::UnknownField {
                field: field.to_string(),
            });
        }

        // First-seen order over books in id order keeps origin ids stable
        // for as long as the values themselves survive.
        let mut distinct: Vec<DistinctValue> = Vec::new();
        for fields in self.books.values() {
            let Some(values) = fields.get(field) else {
                continue;
            };
            for value in values {
                match distinct.iter_mut().find(|entry| entry.value == *value) {
                    Some(entry) => entry.usage_count += 1,
                    None => distinct.push(DistinctValue {
                        origin_id: distinct.len() as u64 + 1,
                        value: value.clone(),
                        usage_count: 1,
                    }),
                }
            }
        }

        Ok(distinct)
    }

    fn read_field(&self, book_id: BookId, field: &str) -> Result<Vec<String>> {
        if !self.has_field(field) {
            return Err(StoreError::UnknownField {
                field: field.to_string(),
            });
        }

        self.books
            .get(&book_id)
            .map(|fields| fields.get(field).cloned().unwrap_or_default())
            .ok_or(StoreError::UnknownBook { book_id })
    }

    fn write_field(&mut self, book_id: BookId, field: &str, values: Vec<String>) -> Result<()> {
        if !self.has_field(field) {
            return Err(StoreError::UnknownField {
                field: field.to_string(),
            });
        }

        let fields = self
            .books
            .get_mut(&book_id)
            .ok_or(StoreError::UnknownBook { book_id })?;
        fields.insert(field.to_string(), values);

        Ok(())
    }
}

impl From<LibrarySnapshot> for MemoryStore {
    fn from(snapshot: LibrarySnapshot) -> Self {
        let mut store = MemoryStore::new(snapshot.fields);
        for book in snapshot.books {
            store.books.insert(book.id, book.fields);
        }

        store
    }
}

/// On-disk library layout for [`MemoryStore`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LibrarySnapshot {
    /// Names of the text fields the library carries.
    pub fields: Vec<String>,

    /// All books with their field lists.
    #[serde(default, rename = "book")]
    pub books: Vec<BookRecord>,
}

/// One book entry inside a [`LibrarySnapshot`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BookRecord {
    /// Book identifier.
    pub id: BookId,

    /// Field name to value list.
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<String>>,
}

impl FromStr for LibrarySnapshot {
    type Err = StoreError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Ok(toml::de::from_str(data).map_err(StoreError::Deserialize)?)
    }
}

impl Display for LibrarySnapshot {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(StoreError::Serialize)?
                .as_str(),
        )
    }
}

/// Metadata store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Field does not exist or is not text-compatible.
    #[error("field {field:?} does not exist or does not hold text values")]
    UnknownField { field: String },

    /// Book identifier not present in the library.
    #[error("book {book_id} does not exist in the library")]
    UnknownBook { book_id: BookId },

    /// Failed to deserialize library snapshot.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize library snapshot.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),
}

impl From<StoreError> for FmtError {
    fn from(_: StoreError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

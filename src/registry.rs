// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Canonical tag registry.
//!
//! A __tag registry__ is the derived, deduplicated view of every distinct
//! value across all participating metadata columns, enriched with the user's
//! rule overrides. It is rebuilt fresh at the start of every sync run and
//! discarded afterwards; the persisted state is the rule document, never the
//! registry.
//!
//! # Canonical Names
//!
//! Each tag is keyed by its __canonical name__, the lowercase form of the raw
//! column value it was built from. Aliases fold alternate surface strings
//! onto one canonical identity, and add tags form a directed implication
//! graph between canonical identities. Both get resolved by
//! [`TagRegistry::apply`](crate::registry::resolve).
//!
//! # Cross-Column Collisions
//!
//! The same surface string may legitimately live in several columns at once,
//! e.g. "Fantasy" as a plain tag and as a genre column value. The registry
//! needs one deterministic owner per canonical name, so colliding entries are
//! merged by column priority: the higher priority wins, ties keep the entry
//! processed first, and the loser's usage count is folded into the survivor
//! so user-facing counts stay truthful.
//!
//! # Alias Uniqueness
//!
//! One surface string resolving to two different tags would make resolution
//! ambiguous. The builder polices this: the first tag to claim an alias keeps
//! it, later claimants lose the alias with a warning naming both owners.

pub mod resolve;

use crate::{config::SyncRules, store::DistinctValue};

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// A canonical, deduplicated tag identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    /// Lowercase unique key within one registry.
    pub canonical_name: String,

    /// Original-case string shown to users.
    pub display_name: String,

    /// Metadata column this tag belongs to.
    pub source_collection: String,

    /// Identifier of the source column value, absent for tags synthesized
    /// purely from add-tag rules.
    pub origin_id: Option<u64>,

    /// Lowercase surface strings that resolve to this tag.
    pub name_aliases: Vec<String>,

    /// Display names of tags this tag implies.
    pub add_tags: Vec<String>,

    /// Tie-break for cross-column collisions on the same canonical name.
    pub priority: i64,

    /// Number of books currently carrying this value. Informational only.
    pub usage_count: u64,

    /// Whether the parenthetical auto-split runs for this tag.
    pub auto_split_enabled: bool,
}

impl Tag {
    /// Construct new tag from a raw column value.
    pub fn new(
        display_name: impl Into<String>,
        collection: impl Into<String>,
        origin_id: Option<u64>,
    ) -> Self {
        let display_name = display_name.into();

        Self {
            canonical_name: display_name.to_lowercase(),
            display_name,
            source_collection: collection.into(),
            origin_id,
            name_aliases: Vec::new(),
            add_tags: Vec::new(),
            priority: 1,
            usage_count: 0,
            auto_split_enabled: true,
        }
    }

    /// Stable configuration key, present only for tags backed by a real
    /// column value.
    pub fn descriptor(&self) -> Option<String> {
        self.origin_id
            .map(|id| format!("{}:{}", self.source_collection, id))
    }

    /// Record an alias, lowercased, skipping duplicates.
    pub fn push_alias(&mut self, alias: impl AsRef<str>) {
        let alias = alias.as_ref().trim().to_lowercase();
        if alias.is_empty() || self.name_aliases.contains(&alias) {
            return;
        }
        self.name_aliases.push(alias);
    }

    /// Record an implied tag by display name, skipping duplicates.
    pub fn push_add_tag(&mut self, add_tag: impl AsRef<str>) {
        let add_tag = add_tag.as_ref().trim();
        if add_tag.is_empty() || self.add_tags.iter().any(|existing| existing == add_tag) {
            return;
        }
        self.add_tags.push(add_tag.to_string());
    }

    /// Split a `"Head (Extra)"` display name into an automatic alias and an
    /// implied tag.
    ///
    /// The head becomes an alias, so a book tagged "Fire" picks up the full
    /// "Fire (Elemental)" value, and the parenthesized part becomes an add
    /// tag. Display names without a single trailing parenthesized group are
    /// left alone.
    fn apply_auto_split(&mut self) {
        let Some((head, extra)) = split_parenthetical(&self.display_name) else {
            return;
        };

        self.push_alias(&head);
        self.push_add_tag(&extra);
    }
}

/// Parse a display name of the shape `"<head> (<extra>)"`.
///
/// The parenthesized group must be single and trailing. Returns the trimmed
/// lowercase head and the trimmed original-case extra.
fn split_parenthetical(display_name: &str) -> Option<(String, String)> {
    let open = display_name.find('(')?;
    let rest = display_name.get(open + 1..)?;
    let extra = rest.strip_suffix(')')?;
    if extra.contains('(') || extra.contains(')') {
        return None;
    }

    let head = display_name[..open].trim();
    let extra = extra.trim();
    if head.is_empty() || extra.is_empty() {
        return None;
    }

    Some((head.to_lowercase(), extra.to_string()))
}

/// Mapping from canonical name to [`Tag`], scoped to one sync run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagRegistry {
    tags: BTreeMap<String, Tag>,
}

impl TagRegistry {
    /// Build the registry from raw column contents and the rule document.
    ///
    /// `columns` supplies, per participating collection in processing order,
    /// the distinct values currently present in that column. Per value:
    ///
    /// 1. Draft a tag whose canonical name is the lowercase raw value, with
    ///    the column's priority and auto-split setting.
    /// 2. Merge every rule entry matching the value's descriptor or its
    ///    canonical name: union aliases and add tags, apply the split
    ///    override.
    /// 3. Run the parenthetical auto-split if still enabled.
    /// 4. Merge into the registry by canonical name, higher priority wins,
    ///    usage counts accumulate across the collision.
    ///
    /// Finally overlapping aliases are resolved first-owner-wins.
    pub fn build(columns: &[(String, Vec<DistinctValue>)], rules: &SyncRules) -> Self {
        let mut registry = TagRegistry::default();

        for (collection, values) in columns {
            let settings = rules.column_settings(collection);

            for value in values {
                let mut tag = Tag::new(&value.value, collection, Some(value.origin_id));
                tag.priority = settings.prio;
                tag.usage_count = value.usage_count;
                tag.auto_split_enabled = settings.split_tag_auto;

                let descriptor = tag.descriptor();
                for overrides in
                    rules.tag_settings_for(descriptor.as_deref(), &tag.canonical_name)
                {
                    for alias in &overrides.name_aliases {
                        tag.push_alias(alias);
                    }
                    for add_tag in &overrides.add_tags {
                        tag.push_add_tag(add_tag);
                    }
                    if let Some(split) = overrides.split_tag_auto {
                        tag.auto_split_enabled = split;
                    }
                }

                if tag.auto_split_enabled {
                    tag.apply_auto_split();
                }

                registry.merge(tag);
            }
        }

        registry.dedupe_aliases();
        registry
    }

    /// Merge one tag into the registry by canonical name.
    ///
    /// Collisions keep the higher priority entry; ties keep the entry already
    /// present. Either way the usage counts of both entries accumulate into
    /// the survivor.
    fn merge(&mut self, tag: Tag) {
        match self.tags.get_mut(&tag.canonical_name) {
            Some(existing) => {
                let kept = if tag.priority > existing.priority {
                    tag.source_collection.as_str()
                } else {
                    existing.source_collection.as_str()
                };
                debug!(canonical = %tag.canonical_name, kept, "cross-column collision");
                if tag.priority > existing.priority {
                    let carried_over = existing.usage_count;
                    *existing = tag;
                    existing.usage_count += carried_over;
                } else {
                    existing.usage_count += tag.usage_count;
                }
            }
            None => {
                self.tags.insert(tag.canonical_name.clone(), tag);
            }
        }
    }

    /// Drop aliases already claimed by another tag, first owner wins.
    fn dedupe_aliases(&mut self) {
        let mut owners: HashMap<String, String> = HashMap::new();

        for tag in self.tags.values_mut() {
            let canonical_name = tag.canonical_name.clone();
            tag.name_aliases.retain(|alias| {
                if let Some(owner) = owners.get(alias).cloned() {
                    warn!(
                        alias = %alias,
                        owner = %owner,
                        dropped_from = %canonical_name,
                        "overlapping alias ignored"
                    );
                    return false;
                }

                owners.insert(alias.clone(), canonical_name.clone());
                true
            });
        }
    }

    /// Look up a tag by canonical name.
    pub fn get(&self, canonical_name: &str) -> Option<&Tag> {
        self.tags.get(canonical_name)
    }

    /// Iterate all tags in canonical name order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.values()
    }

    /// Number of tags in the registry.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Check whether the registry holds no tags at all.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

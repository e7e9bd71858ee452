// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Tag rule resolution for one book.
//!
//! [`TagRegistry::apply`] takes one book's current field values and computes
//! the fully resolved tag assignment: aliases fold away, implied tags get
//! pulled in transitively, and the result is partitioned back into the
//! owning collections. The whole thing is a pure in-memory transform; the
//! caller persists the returned lists.
//!
//! # Resolution Passes
//!
//! 1. __Flatten__: every participating field value joins one lowercase
//!    working list, first-seen order, no duplicates.
//! 2. __Alias pass__: a value matching some tag's alias is rewritten to that
//!    tag's canonical name. A value equal to the owning tag's own canonical
//!    name is a self-match and never gets removed.
//! 3. __Implication closure__: every value resolves to a tag, and its
//!    add-tag graph is walked depth first with an explicit stack and a
//!    visited set, so cycles terminate. Edge endpoints matching no tag are
//!    synthesized into the parent's collection. The walk refuses to descend
//!    past [`MAX_IMPLICATION_DEPTH`] frames.
//! 4. __Partition__: final canonical names group by owning collection, and
//!    every participating collection gets a list, even an empty one, so the
//!    caller overwrites stale values instead of leaving them behind.
//!
//! # Synthesized Tags
//!
//! Tags synthesized during closure live in an overlay scoped to one `apply`
//! call. The shared registry never changes, so every book in a sync run
//! starts from the same base registry.

use crate::registry::{Tag, TagRegistry};

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

/// Ceiling on implication chain depth.
///
/// A chain this long signals a misconfigured rule set, not a legitimate
/// hierarchy. Exceeding it fails the book's resolution with
/// [`ResolveError::RecursionLimit`].
pub const MAX_IMPLICATION_DEPTH: usize = 30;

/// One flattened book value with enough context to synthesize a tag when the
/// registry has no entry for it.
struct WorkingValue {
    display: String,
    collection: String,
}

impl TagRegistry {
    /// Resolve one book's tag assignment against this registry.
    ///
    /// `book_values` holds the book's current value list for every
    /// participating collection. Returns display-name lists keyed by
    /// collection, one entry per participating collection, empty when the
    /// book ends up with no tags there.
    ///
    /// # Errors
    ///
    /// - Return [`ResolveError::RecursionLimit`] if an implication chain
    ///   runs deeper than [`MAX_IMPLICATION_DEPTH`].
    /// - Return [`ResolveError::UnknownTag`] if a working value cannot be
    ///   resolved or synthesized.
    /// - Return [`ResolveError::UnresolvedCanonicalName`] if a canonical
    ///   name vanishes before partitioning. This is an internal invariant
    ///   violation, not a user error.
    pub fn apply(
        &self,
        book_values: &[(String, Vec<String>)],
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let mut working: Vec<String> = Vec::new();
        let mut origins: HashMap<String, WorkingValue> = HashMap::new();

        // Pass 1: flatten to one lowercase working list. Empty strings are
        // dropped here; stores with placeholder-based clearing semantics
        // leave them behind.
        for (collection, values) in book_values {
            for value in values {
                let name = value.trim().to_lowercase();
                if name.is_empty() || working.contains(&name) {
                    continue;
                }
                origins.insert(
                    name.clone(),
                    WorkingValue {
                        display: value.trim().to_string(),
                        collection: collection.clone(),
                    },
                );
                working.push(name);
            }
        }

        // Pass 2: fold aliases onto canonical names. Index loop because
        // rewritten names join the end of the list and get scanned too.
        let mut removals: HashSet<String> = HashSet::new();
        let mut index = 0;
        while index < working.len() {
            let name = working[index].clone();
            index += 1;

            let Some(owner) = self
                .iter()
                .find(|tag| tag.name_aliases.iter().any(|alias| *alias == name))
            else {
                continue;
            };

            // Self-match: an alias equal to its own tag's canonical name
            // must never strip that tag from the book.
            if owner.canonical_name == name {
                continue;
            }

            trace!(alias = %name, canonical = %owner.canonical_name, "alias folded");
            removals.insert(name);
            if !working.contains(&owner.canonical_name) {
                working.push(owner.canonical_name.clone());
            }
        }
        working.retain(|name| !removals.contains(name));

        // Pass 3: implication closure over every surviving value.
        let mut overlay: BTreeMap<String, Tag> = BTreeMap::new();
        let mut additions: Vec<String> = Vec::new();
        let mut expanded: HashSet<String> = HashSet::new();

        for name in working.clone() {
            let root = match self.get(&name).or_else(|| overlay.get(&name)).cloned() {
                Some(tag) => tag,
                // A value the registry never saw keeps living in the
                // collection the book carries it in.
                None => {
                    let origin = origins.get(&name).ok_or_else(|| ResolveError::UnknownTag {
                        name: name.clone(),
                    })?;
                    let tag = Tag::new(&origin.display, &origin.collection, None);
                    debug!(canonical = %tag.canonical_name, "synthesized tag for unregistered book value");
                    overlay.insert(tag.canonical_name.clone(), tag.clone());
                    tag
                }
            };

            self.close_over(&root, &mut overlay, &mut additions, &mut expanded)?;
        }

        for name in additions {
            if !working.contains(&name) {
                working.push(name);
            }
        }

        // Pass 4: partition by owning collection, all participating
        // collections present even when empty.
        let mut partitions: BTreeMap<String, Vec<String>> = book_values
            .iter()
            .map(|(collection, _)| (collection.clone(), Vec::new()))
            .collect();
        for name in &working {
            let tag = self
                .get(name)
                .or_else(|| overlay.get(name))
                .ok_or_else(|| ResolveError::UnresolvedCanonicalName { name: name.clone() })?;
            partitions
                .entry(tag.source_collection.clone())
                .or_default()
                .push(tag.display_name.clone());
        }

        Ok(partitions)
    }

    /// Walk one tag's add-tag graph depth first.
    ///
    /// `additions` collects every canonical name reached, `expanded` stops
    /// the walk from re-descending into a node it already opened, which is
    /// what makes cycles terminate. Endpoints matching no canonical name and
    /// no alias synthesize a new tag in the parent edge's collection.
    fn close_over(
        &self,
        root: &Tag,
        overlay: &mut BTreeMap<String, Tag>,
        additions: &mut Vec<String>,
        expanded: &mut HashSet<String>,
    ) -> Result<()> {
        struct Frame {
            collection: String,
            pending: VecDeque<String>,
        }

        let mut stack = vec![Frame {
            collection: root.source_collection.clone(),
            pending: root.add_tags.iter().cloned().collect(),
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(edge) = frame.pending.pop_front() else {
                stack.pop();
                continue;
            };
            let parent_collection = frame.collection.clone();
            let name = edge.trim().to_lowercase();
            if name.is_empty() {
                continue;
            }

            let target = self
                .get(&name)
                .or_else(|| overlay.get(&name))
                .or_else(|| self.find_by_alias(&name))
                .or_else(|| overlay.values().find(|tag| tag.name_aliases.contains(&name)))
                .cloned();

            match target {
                Some(tag) => {
                    if !additions.contains(&tag.canonical_name) {
                        additions.push(tag.canonical_name.clone());
                    }
                    if expanded.insert(tag.canonical_name.clone()) {
                        if stack.len() >= MAX_IMPLICATION_DEPTH {
                            return Err(ResolveError::RecursionLimit {
                                name: tag.canonical_name,
                            });
                        }
                        stack.push(Frame {
                            collection: tag.source_collection.clone(),
                            pending: tag.add_tags.iter().cloned().collect(),
                        });
                    }
                }
                None => {
                    let tag = Tag::new(edge.trim(), parent_collection, None);
                    debug!(canonical = %tag.canonical_name, "synthesized tag for add-tag endpoint");
                    if !additions.contains(&tag.canonical_name) {
                        additions.push(tag.canonical_name.clone());
                    }
                    expanded.insert(tag.canonical_name.clone());
                    overlay.insert(tag.canonical_name.clone(), tag);
                }
            }
        }

        Ok(())
    }

    fn find_by_alias(&self, name: &str) -> Option<&Tag> {
        self.iter()
            .find(|tag| tag.name_aliases.iter().any(|alias| alias == name))
    }
}

/// Resolution error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Working value matches no canonical name and cannot be synthesized.
    #[error("no tag registered under canonical name {name:?}")]
    UnknownTag { name: String },

    /// Implication chain ran past [`MAX_IMPLICATION_DEPTH`].
    #[error("implication chain through {name:?} exceeds {MAX_IMPLICATION_DEPTH} levels")]
    RecursionLimit { name: String },

    /// Canonical name vanished between closure and partitioning.
    #[error("canonical name {name:?} unresolved during partitioning")]
    UnresolvedCanonicalName { name: String },
}

/// Friendly result alias :3
pub type Result<T, E = ResolveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SyncRules, config::TagSettings, store::DistinctValue};
    use pretty_assertions::assert_eq;

    fn column(
        collection: &str,
        values: &[&str],
    ) -> (String, Vec<DistinctValue>) {
        (
            collection.to_string(),
            values
                .iter()
                .enumerate()
                .map(|(index, value)| DistinctValue {
                    origin_id: index as u64 + 1,
                    value: (*value).to_string(),
                    usage_count: 1,
                })
                .collect(),
        )
    }

    fn rules_with(entries: &[(&str, TagSettings)]) -> SyncRules {
        let mut rules = SyncRules::default();
        rules.columns.insert(
            "#genre".to_string(),
            crate::config::ColumnSettings {
                include: true,
                prio: 1,
                split_tag_auto: true,
            },
        );
        for (key, settings) in entries {
            rules.tags.insert((*key).to_string(), settings.clone());
        }
        rules
    }

    fn book(values: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        values
            .iter()
            .map(|(collection, tags)| {
                (
                    collection.to_string(),
                    tags.iter().map(|tag| tag.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn alias_folds_to_canonical_across_collections() -> anyhow::Result<()> {
        let rules = rules_with(&[(
            "tags:1",
            TagSettings {
                name: Some("fire".into()),
                name_aliases: vec!["flame".into()],
                add_tags: vec!["Elemental".into()],
                ..Default::default()
            },
        )]);
        let registry = TagRegistry::build(
            &[column("tags", &["Fire"]), column("#genre", &["Elemental"])],
            &rules,
        );

        let result = registry.apply(&book(&[("tags", &["Flame"]), ("#genre", &[])]))?;

        let mut expect = BTreeMap::new();
        expect.insert("tags".to_string(), vec!["Fire".to_string()]);
        expect.insert("#genre".to_string(), vec!["Elemental".to_string()]);
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn self_alias_never_strips_the_tag() -> anyhow::Result<()> {
        let rules = rules_with(&[(
            "tags:1",
            TagSettings {
                name: Some("fire".into()),
                name_aliases: vec!["fire".into()],
                ..Default::default()
            },
        )]);
        let registry = TagRegistry::build(&[column("tags", &["Fire"])], &rules);

        let result = registry.apply(&book(&[("tags", &["Fire"])]))?;
        assert_eq!(result["tags"], vec!["Fire".to_string()]);

        Ok(())
    }

    #[test]
    fn auto_split_head_resolves_to_full_value() -> anyhow::Result<()> {
        let rules = rules_with(&[]);
        let registry = TagRegistry::build(&[column("tags", &["Ice (Elemental)"])], &rules);

        // Book carries the bare head; it folds onto the split tag and pulls
        // in the implied extra.
        let result = registry.apply(&book(&[("tags", &["Ice"])]))?;
        assert_eq!(
            result["tags"],
            vec!["Ice (Elemental)".to_string(), "Elemental".to_string()]
        );

        Ok(())
    }

    #[test]
    fn closure_is_transitive() -> anyhow::Result<()> {
        let rules = rules_with(&[
            (
                "tags:1",
                TagSettings {
                    name: Some("a".into()),
                    add_tags: vec!["B".into()],
                    ..Default::default()
                },
            ),
            (
                "tags:2",
                TagSettings {
                    name: Some("b".into()),
                    add_tags: vec!["C".into()],
                    ..Default::default()
                },
            ),
        ]);
        let registry = TagRegistry::build(&[column("tags", &["A", "B", "C"])], &rules);

        let result = registry.apply(&book(&[("tags", &["A"])]))?;
        assert_eq!(
            result["tags"],
            vec!["A".to_string(), "B".to_string(), "C".to_string()]
        );

        Ok(())
    }

    #[test]
    fn cycles_terminate() -> anyhow::Result<()> {
        let rules = rules_with(&[
            (
                "tags:1",
                TagSettings {
                    name: Some("a".into()),
                    add_tags: vec!["B".into()],
                    ..Default::default()
                },
            ),
            (
                "tags:2",
                TagSettings {
                    name: Some("b".into()),
                    add_tags: vec!["A".into()],
                    ..Default::default()
                },
            ),
        ]);
        let registry = TagRegistry::build(&[column("tags", &["A", "B"])], &rules);

        let result = registry.apply(&book(&[("tags", &["A"])]))?;
        assert_eq!(result["tags"], vec!["A".to_string(), "B".to_string()]);

        Ok(())
    }

    #[test]
    fn self_implication_is_filtered() -> anyhow::Result<()> {
        let rules = rules_with(&[(
            "tags:1",
            TagSettings {
                name: Some("a".into()),
                add_tags: vec!["A".into()],
                ..Default::default()
            },
        )]);
        let registry = TagRegistry::build(&[column("tags", &["A"])], &rules);

        let result = registry.apply(&book(&[("tags", &["A"])]))?;
        assert_eq!(result["tags"], vec!["A".to_string()]);

        Ok(())
    }

    #[test]
    fn unmatched_endpoint_synthesizes_into_parent_collection() -> anyhow::Result<()> {
        let rules = rules_with(&[(
            "#genre:1",
            TagSettings {
                name: Some("fantasy".into()),
                add_tags: vec!["Speculative".into()],
                ..Default::default()
            },
        )]);
        let registry = TagRegistry::build(&[column("#genre", &["Fantasy"])], &rules);

        let result = registry.apply(&book(&[("#genre", &["Fantasy"]), ("tags", &[])]))?;
        assert_eq!(
            result["#genre"],
            vec!["Fantasy".to_string(), "Speculative".to_string()]
        );
        assert_eq!(result["tags"], Vec::<String>::new());

        Ok(())
    }

    #[test]
    fn synthesized_tags_do_not_leak_between_calls() -> anyhow::Result<()> {
        let rules = rules_with(&[(
            "tags:1",
            TagSettings {
                name: Some("a".into()),
                add_tags: vec!["Ghost".into()],
                ..Default::default()
            },
        )]);
        let registry = TagRegistry::build(&[column("tags", &["A"])], &rules);

        let first = registry.apply(&book(&[("tags", &["A"])]))?;
        assert_eq!(first["tags"], vec!["A".to_string(), "Ghost".to_string()]);

        // The base registry must still only know its built tags.
        assert!(registry.get("ghost").is_none());
        assert_eq!(registry.len(), 1);

        Ok(())
    }

    #[test]
    fn recursion_ceiling_fails_pathological_chains() {
        // Chain of MAX_IMPLICATION_DEPTH edges starting at t0.
        let entries: Vec<(String, TagSettings)> = (0..MAX_IMPLICATION_DEPTH)
            .map(|index| {
                (
                    format!("tags:{}", index + 1),
                    TagSettings {
                        name: Some(format!("t{index}")),
                        add_tags: vec![format!("t{}", index + 1)],
                        ..Default::default()
                    },
                )
            })
            .collect();
        let entries: Vec<(&str, TagSettings)> = entries
            .iter()
            .map(|(key, settings)| (key.as_str(), settings.clone()))
            .collect();
        let rules = rules_with(&entries);

        let names: Vec<String> = (0..=MAX_IMPLICATION_DEPTH)
            .map(|index| format!("t{index}"))
            .collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let registry = TagRegistry::build(&[column("tags", &names)], &rules);

        let result = registry.apply(&book(&[("tags", &["t0"])]));
        assert!(matches!(
            result,
            Err(ResolveError::RecursionLimit { .. })
        ));
    }

    #[test]
    fn chain_one_short_of_ceiling_resolves() -> anyhow::Result<()> {
        let entries: Vec<(String, TagSettings)> = (0..MAX_IMPLICATION_DEPTH - 1)
            .map(|index| {
                (
                    format!("tags:{}", index + 1),
                    TagSettings {
                        name: Some(format!("t{index}")),
                        add_tags: vec![format!("t{}", index + 1)],
                        ..Default::default()
                    },
                )
            })
            .collect();
        let entries: Vec<(&str, TagSettings)> = entries
            .iter()
            .map(|(key, settings)| (key.as_str(), settings.clone()))
            .collect();
        let rules = rules_with(&entries);

        let names: Vec<String> = (0..MAX_IMPLICATION_DEPTH)
            .map(|index| format!("t{index}"))
            .collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let registry = TagRegistry::build(&[column("tags", &names)], &rules);

        let result = registry.apply(&book(&[("tags", &["t0"])]))?;
        assert_eq!(result["tags"].len(), MAX_IMPLICATION_DEPTH);

        Ok(())
    }

    #[test]
    fn apply_is_idempotent() -> anyhow::Result<()> {
        let rules = rules_with(&[(
            "tags:1",
            TagSettings {
                name: Some("fire".into()),
                name_aliases: vec!["flame".into()],
                add_tags: vec!["Elemental".into()],
                ..Default::default()
            },
        )]);
        let registry = TagRegistry::build(
            &[
                column("tags", &["Fire", "Ice (Elemental)"]),
                column("#genre", &["Elemental"]),
            ],
            &rules,
        );

        let first = registry.apply(&book(&[
            ("tags", &["Flame", "Ice"]),
            ("#genre", &[]),
        ]))?;

        let second_input: Vec<(String, Vec<String>)> = first
            .iter()
            .map(|(collection, values)| (collection.clone(), values.clone()))
            .collect();
        let second = registry.apply(&second_input)?;

        assert_eq!(first, second);

        Ok(())
    }

    #[test]
    fn no_output_value_is_a_registered_alias() -> anyhow::Result<()> {
        let rules = rules_with(&[(
            "tags:1",
            TagSettings {
                name: Some("fire".into()),
                name_aliases: vec!["flame".into(), "inferno".into()],
                ..Default::default()
            },
        )]);
        let registry = TagRegistry::build(&[column("tags", &["Fire"])], &rules);

        let result = registry.apply(&book(&[("tags", &["Inferno", "Flame"])]))?;

        for values in result.values() {
            for value in values {
                let lowered = value.to_lowercase();
                let owned_by = registry.iter().find(|tag| {
                    tag.name_aliases.contains(&lowered) && tag.canonical_name != lowered
                });
                assert_eq!(owned_by, None, "alias {lowered:?} survived resolution");
            }
        }
        assert_eq!(result["tags"], vec!["Fire".to_string()]);

        Ok(())
    }

    #[test]
    fn partition_covers_working_set_exactly_once() -> anyhow::Result<()> {
        let rules = rules_with(&[(
            "tags:1",
            TagSettings {
                name: Some("a".into()),
                add_tags: vec!["B".into()],
                ..Default::default()
            },
        )]);
        let registry = TagRegistry::build(
            &[column("tags", &["A"]), column("#genre", &["B"])],
            &rules,
        );

        let result = registry.apply(&book(&[("tags", &["A"]), ("#genre", &[])]))?;

        let mut all: Vec<String> = result
            .values()
            .flatten()
            .map(|value| value.to_lowercase())
            .collect();
        all.sort();
        assert_eq!(all, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(result["tags"], vec!["A".to_string()]);
        assert_eq!(result["#genre"], vec!["B".to_string()]);

        Ok(())
    }
}

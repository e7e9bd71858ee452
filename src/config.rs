// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Rule configuration layout.
//!
//! Specify the layout for the sync rule document that tagsmith uses to
//! simplify the process of serialization and deserialization. File I/O is
//! left to the caller to figure out.
//!
//! # General Layout
//!
//! A rule document is composed of two basic parts: column settings, and tag
//! settings. The column settings section decides which metadata columns
//! participate in a sync, and with what priority. The tag settings section
//! holds per-tag overrides: name aliases, implied add tags, and whether the
//! automatic `"Head (Extra)"` split should run for that tag.
//!
//! Tag settings entries are keyed by __descriptor__, a stable
//! `collection:origin_id` pair identifying the source column value the entry
//! was written for. An entry also matches by its stored `name` field, so a
//! rule survives its source value being re-created under a new origin id.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Sync rule document.
///
/// All user-owned state of tagsmith lives here. The derived tag registry is
/// rebuilt from this document plus the current column contents on every sync
/// run, and is never persisted itself.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SyncRules {
    /// Participation and priority settings per metadata column.
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnSettings>,

    /// Per-tag overrides keyed by descriptor.
    #[serde(default)]
    pub tags: BTreeMap<String, TagSettings>,
}

impl SyncRules {
    /// Names of all columns that participate in a sync, in stable order.
    pub fn included_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, settings)| settings.include)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Column settings with defaults for unconfigured columns.
    pub fn column_settings(&self, column: &str) -> ColumnSettings {
        self.columns.get(column).cloned().unwrap_or_default()
    }

    /// All tag settings entries matching a descriptor or canonical name.
    ///
    /// An entry matches when its key equals the descriptor of the source
    /// value, or when its stored `name` equals the canonical name. Every
    /// match is returned so overrides merge with set-union semantics.
    pub fn tag_settings_for<'rules>(
        &'rules self,
        descriptor: Option<&str>,
        canonical_name: &str,
    ) -> Vec<&'rules TagSettings> {
        self.tags
            .iter()
            .filter(|(key, settings)| {
                descriptor.is_some_and(|descriptor| key.as_str() == descriptor)
                    || settings.name.as_deref() == Some(canonical_name)
            })
            .map(|(_, settings)| settings)
            .collect()
    }
}

impl Default for SyncRules {
    /// Construct rule document with the built-in "tags" column included.
    fn default() -> Self {
        let mut columns = BTreeMap::new();
        columns.insert(
            "tags".to_string(),
            ColumnSettings {
                include: true,
                prio: 0,
                split_tag_auto: true,
            },
        );

        Self {
            columns,
            tags: BTreeMap::new(),
        }
    }
}

impl FromStr for SyncRules {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Ok(toml::de::from_str(data).map_err(ConfigError::Deserialize)?)
    }
}

impl Display for SyncRules {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Per-column sync participation settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ColumnSettings {
    /// Whether the column participates in a sync at all.
    #[serde(default)]
    pub include: bool,

    /// Priority for cross-column collisions on the same canonical name.
    #[serde(default = "default_prio")]
    pub prio: i64,

    /// Whether tags from this column get the automatic parenthetical split.
    #[serde(default = "default_split")]
    pub split_tag_auto: bool,
}

impl Default for ColumnSettings {
    fn default() -> Self {
        Self {
            include: false,
            prio: default_prio(),
            split_tag_auto: default_split(),
        }
    }
}

/// Per-tag rule overrides.
#[derive(Debug, Default, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct TagSettings {
    /// Original-case display name the entry was saved for.
    pub display_name: Option<String>,

    /// Canonical name used for matching when the descriptor went stale.
    pub name: Option<String>,

    /// Alternate surface strings that resolve to this tag.
    #[serde(default)]
    pub name_aliases: Vec<String>,

    /// Display names of tags implied by this tag.
    #[serde(default)]
    pub add_tags: Vec<String>,

    /// Override for the automatic parenthetical split. Absent means keep
    /// the column-level default.
    pub split_tag_auto: Option<bool>,
}

fn default_prio() -> i64 {
    1
}

fn default_split() -> bool {
    true
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize rule document.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize rule document.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserialize_sync_rules() -> anyhow::Result<()> {
        let result: SyncRules = r##"
            [columns.tags]
            include = true
            prio = 0

            [columns."#genre"]
            include = true
            prio = 2
            split_tag_auto = false

            [tags."tags:12"]
            display_name = "Fire"
            name = "fire"
            name_aliases = ["flame"]
            add_tags = ["Elemental"]
        "##
        .parse()?;

        let mut columns = BTreeMap::new();
        columns.insert(
            "tags".to_string(),
            ColumnSettings {
                include: true,
                prio: 0,
                split_tag_auto: true,
            },
        );
        columns.insert(
            "#genre".to_string(),
            ColumnSettings {
                include: true,
                prio: 2,
                split_tag_auto: false,
            },
        );

        let mut tags = BTreeMap::new();
        tags.insert(
            "tags:12".to_string(),
            TagSettings {
                display_name: Some("Fire".into()),
                name: Some("fire".into()),
                name_aliases: vec!["flame".into()],
                add_tags: vec!["Elemental".into()],
                split_tag_auto: None,
            },
        );

        let expect = SyncRules { columns, tags };
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn rules_round_trip() -> anyhow::Result<()> {
        let mut rules = SyncRules::default();
        rules.tags.insert(
            "tags:3".to_string(),
            TagSettings {
                display_name: Some("Ice (Elemental)".into()),
                name: Some("ice (elemental)".into()),
                name_aliases: vec![],
                add_tags: vec![],
                split_tag_auto: Some(false),
            },
        );

        let result: SyncRules = rules.to_string().parse()?;
        assert_eq!(result, rules);

        Ok(())
    }

    #[test]
    fn default_rules_include_tags_column() {
        let rules = SyncRules::default();
        assert_eq!(rules.included_columns(), vec!["tags"]);
        assert_eq!(rules.column_settings("tags").prio, 0);
        assert_eq!(rules.column_settings("#genre").prio, 1);
    }

    #[test]
    fn tag_settings_match_by_descriptor_or_name() {
        let mut rules = SyncRules::default();
        rules.tags.insert(
            "tags:12".to_string(),
            TagSettings {
                name: Some("fire".into()),
                name_aliases: vec!["flame".into()],
                ..Default::default()
            },
        );

        // Stale descriptor, live name.
        let matched = rules.tag_settings_for(Some("tags:99"), "fire");
        assert_eq!(matched.len(), 1);

        // Live descriptor, renamed value.
        let matched = rules.tag_settings_for(Some("tags:12"), "inferno");
        assert_eq!(matched.len(), 1);

        let matched = rules.tag_settings_for(Some("tags:99"), "water");
        assert!(matched.is_empty());
    }
}

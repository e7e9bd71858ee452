// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::PathBuf;

/// Determine default absolute path to the sync rule document.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/tagsmith/rules.toml` as
/// the default absolute path for the rule document. Does not check if the
/// path returned actually exists.
///
/// # Errors
///
/// - Return [`NoConfigHome`] if the configuration directory path cannot be
///   determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_rules_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("tagsmith").join("rules.toml"))
        .ok_or(NoConfigHome)
}

/// No way to determine user's configuration directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration directory")]
pub struct NoConfigHome;

/// Friendly result alias :3
pub type Result<T, E = NoConfigHome> = std::result::Result<T, E>;

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Resolve a session or logger configuration path given on the command
/// line. Relative paths are anchored at the working directory and the
/// result is canonicalized, so a later parse error names the file that
/// was actually read.
pub fn resolve_config_path(rel: impl AsRef<Path>) -> Result<PathBuf> {
    let given = rel.as_ref();

    let abs = if given.is_absolute() {
        given.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot resolve the working directory")?
            .join(given)
    };

    abs.canonicalize()
        .with_context(|| format!("config path {} does not resolve", abs.display()))
}

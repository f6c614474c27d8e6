/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Applies a manifest's update policy to a staged install.
//!
//! The staged tree starts out as the unpacked package. Merging copies files
//! from the live install into it so that, once swapped in, the result is what
//! the policy asks for:
//!
//! | policy           | package file exists locally | local-only file |
//! |------------------|-----------------------------|-----------------|
//! | `replace_all`    | package wins                | dropped         |
//! | `merge`          | package wins                | kept            |
//! | `preserve_local` | local wins                  | kept            |
//! | `selective`      | package wins unless preserved | kept only if preserved |

use crate::error::AgentError;
use crate::tree;
use courier_models::models::manifests::UpdatePolicy;
use std::path::Path;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    /// Local files carried into the staged tree.
    pub kept_local: usize,
}

/// True when `relative` equals a preserved path or lies below one.
pub fn is_preserved(relative: &str, preserved_paths: &[String]) -> bool {
    preserved_paths.iter().any(|preserved| {
        let preserved = preserved.trim_matches('/');
        !preserved.is_empty()
            && (relative == preserved
                || relative
                    .strip_prefix(preserved)
                    .is_some_and(|rest| rest.starts_with('/')))
    })
}

pub fn apply_policy(
    policy: UpdatePolicy,
    preserved_paths: &[String],
    live: &Path,
    staged: &Path,
) -> Result<MergeSummary, AgentError> {
    let mut summary = MergeSummary::default();
    if policy == UpdatePolicy::ReplaceAll {
        return Ok(summary);
    }
    let staged_files = tree::list_files(staged)?;
    for (relative, local_path) in tree::list_files(live)? {
        let in_package = staged_files.contains_key(&relative);
        let keep = match policy {
            UpdatePolicy::ReplaceAll => false,
            UpdatePolicy::Merge => !in_package,
            UpdatePolicy::PreserveLocal => true,
            UpdatePolicy::Selective => is_preserved(&relative, preserved_paths),
        };
        if keep {
            tree::copy_file(&local_path, &tree::join_relative(staged, &relative))?;
            summary.kept_local += 1;
        }
    }
    Ok(summary)
}

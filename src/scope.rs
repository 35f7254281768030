//! Ignore patterns and selective-sync scoping
//!
//! A path takes part in sync only when its basename clears the ignore
//! globs, it is not a state file, it sits outside every excluded subtree,
//! and (when include prefixes are configured) inside at least one of them.

use glob::Pattern;

/// Decides which relative paths the engine looks at
#[derive(Debug, Clone)]
pub struct ScopeFilter {
    ignore: Vec<Pattern>,
    sync_folders: Vec<String>,
    exclude_folders: Vec<String>,
}

impl ScopeFilter {
    /// Build a filter from config values. Unparseable glob patterns are
    /// skipped with a warning rather than failing the whole filter.
    pub fn new(
        ignore_patterns: &[String],
        sync_folders: &[String],
        exclude_folders: &[String],
    ) -> Self {
        let ignore = ignore_patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pat) => Some(pat),
                Err(e) => {
                    tracing::warn!("Skipping invalid ignore pattern {p:?}: {e}");
                    None
                }
            })
            .collect();

        Self {
            ignore,
            sync_folders: normalize_prefixes(sync_folders),
            exclude_folders: normalize_prefixes(exclude_folders),
        }
    }

    /// True iff the path participates in sync
    pub fn should_sync(&self, rel_path: &str) -> bool {
        !self.is_ignored(rel_path) && self.in_scope(rel_path)
    }

    /// Basename matches an ignore glob, or names a state file
    pub fn is_ignored(&self, rel_path: &str) -> bool {
        let basename = rel_path.rsplit('/').next().unwrap_or(rel_path);

        if basename == "sync_state.json" || basename.starts_with(".sync_state") {
            return true;
        }

        self.ignore.iter().any(|p| p.matches(basename))
    }

    /// Inside the include prefixes (if any) and outside every exclude prefix
    pub fn in_scope(&self, rel_path: &str) -> bool {
        if self
            .exclude_folders
            .iter()
            .any(|p| under_prefix(rel_path, p))
        {
            return false;
        }

        if self.sync_folders.is_empty() {
            return true;
        }

        self.sync_folders.iter().any(|p| under_prefix(rel_path, p))
    }
}

fn normalize_prefixes(prefixes: &[String]) -> Vec<String> {
    prefixes
        .iter()
        .map(|p| p.trim().trim_matches('/').to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// `rel_path == prefix` or `rel_path` starts with `prefix + "/"`
fn under_prefix(rel_path: &str, prefix: &str) -> bool {
    rel_path == prefix || rel_path.starts_with(&format!("{prefix}/"))
}

use super::SyncError;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use log::{trace, warn};
use std::path::Path;

const GITIGNORE_FILE: &str = ".gitignore";

/// Paths that are never touched in the destination.
///
/// The rules use gitignore syntax and are rooted at the source directory.
/// A path is ignored if it or any of its parent directories match.
pub struct IgnoreRules {
    matcher: Gitignore,
}

impl IgnoreRules {
    /// Rules that ignore nothing.
    pub fn empty() -> Self {
        IgnoreRules {
            matcher: Gitignore::empty(),
        }
    }

    /// Build the rules from a list of gitignore patterns.
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self, SyncError> {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in patterns {
            builder.add_line(None, pattern)?;
        }

        Ok(IgnoreRules {
            matcher: builder.build()?,
        })
    }

    /// Build the rules from the `.gitignore` at the root of the source and
    /// the additional patterns.
    pub fn from_source(source: &Path, patterns: &[String]) -> Result<Self, SyncError> {
        let mut builder = GitignoreBuilder::new(source);

        let gitignore = source.join(GITIGNORE_FILE);
        if gitignore.is_file() {
            trace!("Loading ignore rules from {}.", gitignore.display());
            if let Some(err) = builder.add(&gitignore) {
                warn!("Some rules in {} are invalid: {err}.", gitignore.display());
            }
        }
        for pattern in patterns {
            builder.add_line(None, pattern)?;
        }

        Ok(IgnoreRules {
            matcher: builder.build()?,
        })
    }

    /// Check whether a path relative to the synchronized roots is ignored.
    pub fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        if relative.as_os_str().is_empty() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::empty()
    }
}

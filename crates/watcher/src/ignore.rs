//! Ignore pattern matching
//!
//! A configured pattern excludes a path when either:
//! 1. it glob-matches the path's base name (`*.tmp`, `.DS_Store`), or
//! 2. it contains no glob metacharacters and occurs anywhere in the full
//!    path (`.git` excludes everything below a `.git` directory).
//!
//! Paths under an excluded root (the backup root) are always ignored so a
//! backup directory nested inside the source tree cannot feed itself.

use ::ignore::gitignore::{Gitignore, GitignoreBuilder};
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Compiled ignore rules
pub struct IgnoreRules {
    /// Base-name globs
    globs: Gitignore,
    /// Literal patterns matched as substrings of the full path
    literals: Vec<String>,
    /// Roots whose whole subtree is ignored
    excluded_roots: Vec<PathBuf>,
}

impl IgnoreRules {
    /// Compile `patterns`
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GitignoreBuilder::new("");
        let mut literals = Vec::new();

        for pattern in patterns {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            builder.add_line(None, pattern)?;
            if !has_glob_meta(pattern) {
                literals.push(pattern.to_string());
            }
        }

        Ok(Self {
            globs: builder.build()?,
            literals,
            excluded_roots: Vec::new(),
        })
    }

    /// Additionally ignore everything under `root`
    pub fn exclude(mut self, root: PathBuf) -> Self {
        self.excluded_roots.push(root);
        self
    }

    /// Check if `path` should be ignored, consulting the filesystem to tell
    /// directories apart
    pub fn should_ignore(&self, path: &Path) -> bool {
        self.matches(path, path.is_dir())
    }

    /// Check if `path` should be ignored, given whether it is a directory
    pub fn matches(&self, path: &Path, is_dir: bool) -> bool {
        if self.excluded_roots.iter().any(|root| path.starts_with(root)) {
            return true;
        }

        if let Some(name) = path.file_name() {
            if self.globs.matched(Path::new(name), is_dir).is_ignore() {
                return true;
            }
        }

        let full = path.to_string_lossy();
        self.literals.iter().any(|literal| full.contains(literal.as_str()))
    }

    /// Number of configured patterns
    pub fn pattern_count(&self) -> usize {
        self.globs.num_ignores() as usize
    }
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

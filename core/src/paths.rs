//! Root-confined path resolution.
//!
//! Every path the agent names passes through [`PathRegistry::sanitize`]
//! before any read or write. Normalization is purely lexical so that paths
//! which do not exist yet (file creation, move targets) can still be
//! validated against the root set.

use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::NtsError;
use crate::error::Result;

#[derive(Debug)]
pub struct PathRegistry {
    roots: RwLock<Roots>,
}

#[derive(Debug, Clone)]
struct Roots {
    primary: PathBuf,
    all: Vec<PathBuf>,
}

impl PathRegistry {
    pub fn new(primary: PathBuf, additional: &[PathBuf]) -> Self {
        let primary = normalize(&primary);
        let mut all = vec![primary.clone()];
        all.extend(additional.iter().map(|p| normalize(p)));
        Self {
            roots: RwLock::new(Roots { primary, all }),
        }
    }

    pub fn primary_root(&self) -> PathBuf {
        self.read().primary.clone()
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.read().all.clone()
    }

    /// Replace the whole root set, e.g. after client roots negotiation. The
    /// swap is atomic; there are no partial updates.
    pub fn replace_roots(&self, primary: PathBuf, additional: &[PathBuf]) {
        let primary = normalize(&primary);
        let mut all = vec![primary.clone()];
        all.extend(additional.iter().map(|p| normalize(p)));
        match self.roots.write() {
            Ok(mut guard) => *guard = Roots { primary, all },
            Err(poisoned) => *poisoned.into_inner() = Roots { primary, all },
        }
    }

    /// Resolve `input` (absolute or relative to the primary root) to an
    /// absolute normalized path confined to the root set.
    pub fn sanitize(&self, input: &Path, must_exist: bool) -> Result<PathBuf> {
        let roots = self.read();
        let absolute = if input.is_absolute() {
            input.to_path_buf()
        } else {
            roots.primary.join(input)
        };
        let normalized = normalize(&absolute);

        if !roots.all.iter().any(|root| normalized.starts_with(root)) {
            return Err(NtsError::PathEscape { path: normalized });
        }
        if must_exist && !normalized.exists() {
            return Err(NtsError::NotFound { path: normalized });
        }
        Ok(normalized)
    }

    fn read(&self) -> Roots {
        match self.roots.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Lexical normalization: resolves `.` and `..` components without touching
/// the filesystem, so escape checks cannot be bypassed through parent hops.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::RootDir);
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn relative_paths_resolve_under_primary_root() {
        let dir = tempdir().unwrap();
        let registry = PathRegistry::new(dir.path().to_path_buf(), &[]);
        let resolved = registry.sanitize(Path::new("src/main.rs"), false).unwrap();
        assert!(resolved.starts_with(dir.path()));
        assert!(resolved.ends_with("src/main.rs"));
    }

    #[test]
    fn parent_hops_cannot_escape() {
        let dir = tempdir().unwrap();
        let registry = PathRegistry::new(dir.path().to_path_buf(), &[]);
        let err = registry
            .sanitize(Path::new("../../../etc/passwd"), false)
            .unwrap_err();
        assert!(matches!(err, NtsError::PathEscape { .. }));
    }

    #[test]
    fn must_exist_rejects_missing_files() {
        let dir = tempdir().unwrap();
        let registry = PathRegistry::new(dir.path().to_path_buf(), &[]);
        let err = registry.sanitize(Path::new("ghost.txt"), true).unwrap_err();
        assert!(matches!(err, NtsError::NotFound { .. }));
    }

    #[test]
    fn additional_roots_are_honoured_after_swap() {
        let dir = tempdir().unwrap();
        let extra = tempdir().unwrap();
        let registry = PathRegistry::new(dir.path().to_path_buf(), &[]);
        let outside = extra.path().join("a.txt");
        assert!(registry.sanitize(&outside, false).is_err());

        registry.replace_roots(
            dir.path().to_path_buf(),
            &[extra.path().to_path_buf()],
        );
        assert!(registry.sanitize(&outside, false).is_ok());
        assert_eq!(registry.roots().len(), 2);
    }
}

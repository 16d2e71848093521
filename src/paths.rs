//! Path normalization.
//!
//! Every path the daemon stores or compares follows the convention of the
//! root it lives under: roots given as absolute paths produce absolute keys,
//! roots given relative to the working directory produce minimal relative
//! keys. All rewriting here is lexical; nothing touches the filesystem.

use std::path::{Component, Path, PathBuf};

use crate::error::{IndexError, Result};

/// Lexically clean a path: drop `.` components, fold `..` into the preceding
/// component where possible and collapse `/..` at the root to `/`.
///
/// An empty result becomes `.`.
pub fn clean(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Express `target` relative to `base`. Both must be absolute or both
/// relative; the result is cleaned.
pub fn relative(base: &Path, target: &Path) -> Result<PathBuf> {
    let base = clean(base);
    let target = clean(target);
    if base.is_absolute() != target.is_absolute() {
        return Err(IndexError::RelativePath { base, target });
    }

    let base_parts: Vec<Component> = base.components().filter(|c| *c != Component::CurDir).collect();
    let target_parts: Vec<Component> = target.components().filter(|c| *c != Component::CurDir).collect();

    let common = base_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for part in &base_parts[common..] {
        if *part == Component::ParentDir {
            // Climbing out of an unknown directory cannot be undone.
            return Err(IndexError::RelativePath { base, target });
        }
        out.push("..");
    }
    for part in &target_parts[common..] {
        out.push(part.as_os_str());
    }
    Ok(clean(&out))
}

/// Maps paths into the convention of the root that contains them.
#[derive(Debug, Clone)]
pub struct PathConvention {
    cwd: PathBuf,
    roots: Vec<PathBuf>,
}

impl PathConvention {
    /// Build a convention for the given roots using the process working
    /// directory.
    pub fn from_roots(roots: &[PathBuf]) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(IndexError::WorkingDir)?;
        Ok(Self::with_cwd(cwd, roots))
    }

    pub fn with_cwd(cwd: PathBuf, roots: &[PathBuf]) -> Self {
        Self {
            cwd: clean(&cwd),
            roots: roots.iter().map(|r| clean(r)).collect(),
        }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Roots, cleaned but otherwise exactly as given.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Absolute, cleaned form of `path`.
    pub fn absolutize(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            clean(path)
        } else {
            clean(&self.cwd.join(path))
        }
    }

    /// Rewrite `path` into the absolute or relative form `root` was given in.
    pub fn for_root(&self, root: &Path, path: &Path) -> Result<PathBuf> {
        if root.is_absolute() {
            Ok(self.absolutize(path))
        } else if path.is_absolute() {
            relative(&self.cwd, path)
        } else {
            Ok(clean(path))
        }
    }

    /// Normalize `path` into the convention of the first root containing it.
    /// Paths outside every root are only cleaned.
    pub fn normalize(&self, path: &Path) -> PathBuf {
        let absolute = self.absolutize(path);
        for root in &self.roots {
            if absolute.starts_with(self.absolutize(root)) {
                if let Ok(p) = self.for_root(root, &absolute) {
                    return p;
                }
            }
        }
        clean(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean() {
        assert_eq!(clean(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(clean(Path::new("./a.c")), PathBuf::from("a.c"));
        assert_eq!(clean(Path::new("")), PathBuf::from("."));
        assert_eq!(clean(Path::new(".")), PathBuf::from("."));
        assert_eq!(clean(Path::new("../x/../../y")), PathBuf::from("../../y"));
        assert_eq!(clean(Path::new("/proj/../inc")), PathBuf::from("/inc"));
        assert_eq!(clean(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(clean(Path::new("a/b/")), PathBuf::from("a/b"));
    }

    #[test]
    fn test_relative() {
        let rel = relative(Path::new("/home/u"), Path::new("/home/u/proj/a.c")).unwrap();
        assert_eq!(rel, PathBuf::from("proj/a.c"));

        let rel = relative(Path::new("/home/u/proj"), Path::new("/home/inc")).unwrap();
        assert_eq!(rel, PathBuf::from("../../inc"));

        let rel = relative(Path::new("/a"), Path::new("/a")).unwrap();
        assert_eq!(rel, PathBuf::from("."));

        assert!(relative(Path::new("/a"), Path::new("b")).is_err());
        assert!(relative(Path::new("../a"), Path::new("b")).is_err());
    }

    #[test]
    fn test_absolute_and_relative_inputs_normalize_to_same_key() {
        let relative_root = PathConvention::with_cwd(PathBuf::from("/work"), &[PathBuf::from("proj")]);
        assert_eq!(
            relative_root.normalize(Path::new("/work/proj/src/a.c")),
            PathBuf::from("proj/src/a.c")
        );
        assert_eq!(
            relative_root.normalize(Path::new("./proj/src/../src/a.c")),
            PathBuf::from("proj/src/a.c")
        );

        let absolute_root = PathConvention::with_cwd(PathBuf::from("/work"), &[PathBuf::from("/work/proj")]);
        assert_eq!(
            absolute_root.normalize(Path::new("proj/src/a.c")),
            PathBuf::from("/work/proj/src/a.c")
        );
        assert_eq!(
            absolute_root.normalize(Path::new("/work/proj/src/a.c")),
            PathBuf::from("/work/proj/src/a.c")
        );
    }

    #[test]
    fn test_for_root_rewrites_into_root_convention() {
        let conv = PathConvention::with_cwd(PathBuf::from("/work"), &[PathBuf::from(".")]);
        assert_eq!(
            conv.for_root(Path::new("."), Path::new("/work/inc")).unwrap(),
            PathBuf::from("inc")
        );
        assert_eq!(
            conv.for_root(Path::new("/work"), Path::new("inc")).unwrap(),
            PathBuf::from("/work/inc")
        );
    }
}

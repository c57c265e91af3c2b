//! Mapping between local directories and namespace paths.

use std::path::{Path, PathBuf};

use compact_str::CompactString;
use globset::{Glob, GlobSet, GlobSetBuilder};

use assetreg_core::{MountPoint, RegistryError, normalize_path};

/// Registered mount points plus the namespace deny list.
#[derive(Debug, Clone)]
pub struct MountTable {
    /// Sorted so the deepest local path is tried first.
    mounts: Vec<MountPoint>,
    deny: GlobSet,
    deny_patterns: Vec<String>,
}

impl Default for MountTable {
    fn default() -> Self {
        Self {
            mounts: Vec::new(),
            deny: GlobSet::empty(),
            deny_patterns: Vec::new(),
        }
    }
}

/// Canonicalize the longest existing prefix of `path`, keeping the rest.
fn canonical(path: &Path) -> PathBuf {
    for ancestor in path.ancestors() {
        if let Ok(base) = ancestor.canonicalize() {
            return match path.strip_prefix(ancestor) {
                Ok(rest) if !rest.as_os_str().is_empty() => base.join(rest),
                _ => base,
            };
        }
    }
    path.to_path_buf()
}

impl MountTable {
    /// Create a table with the given deny globs.
    pub fn new(deny_patterns: &[String]) -> Result<Self, RegistryError> {
        let deny = deny_patterns
            .iter()
            .map(|p| {
                Glob::new(p).map_err(|e| RegistryError::InvalidConfig {
                    message: format!("bad deny pattern {p:?}: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .fold(&mut GlobSetBuilder::new(), |builder, glob| builder.add(glob))
            .build()
            .map_err(|e| RegistryError::InvalidConfig {
                message: e.to_string(),
            })?;
        Ok(Self {
            mounts: Vec::new(),
            deny,
            deny_patterns: deny_patterns.to_vec(),
        })
    }

    /// Register a mount point.
    ///
    /// The local path must be an existing directory. Returns `false` if the
    /// same local path is already mounted.
    pub fn add(&mut self, local: &Path, namespace: &str) -> Result<bool, RegistryError> {
        let namespace = normalize_path(namespace);
        if namespace.is_empty() {
            return Err(RegistryError::InvalidMountPoint {
                path: local.to_path_buf(),
                message: "namespace must name a root like /Game".to_string(),
            });
        }
        let local = local
            .canonicalize()
            .map_err(|e| RegistryError::InvalidMountPoint {
                path: local.to_path_buf(),
                message: e.to_string(),
            })?;
        if !local.is_dir() {
            return Err(RegistryError::InvalidMountPoint {
                path: local,
                message: "not a directory".to_string(),
            });
        }
        if self.mounts.iter().any(|m| m.local_path == local) {
            return Ok(false);
        }
        self.mounts.push(MountPoint::new(local, namespace));
        self.mounts.sort_by(|a, b| {
            b.local_path
                .components()
                .count()
                .cmp(&a.local_path.components().count())
                .then_with(|| a.local_path.cmp(&b.local_path))
        });
        Ok(true)
    }

    /// Unregister the mount point rooted at `local`.
    pub fn remove(&mut self, local: &Path) -> Option<MountPoint> {
        let local = canonical(local);
        let idx = self.mounts.iter().position(|m| m.local_path == local)?;
        Some(self.mounts.remove(idx))
    }

    /// Registered mount points.
    pub fn mounts(&self) -> &[MountPoint] {
        &self.mounts
    }

    /// Deny patterns this table was built with.
    pub fn deny_patterns(&self) -> &[String] {
        &self.deny_patterns
    }

    /// Namespace path for a local directory or container file.
    ///
    /// Container files lose their extension: `<mount>/Maps/L1.asset` maps to
    /// `/Game/Maps/L1`.
    pub fn to_namespace(&self, local: &Path) -> Option<CompactString> {
        let local = canonical(local);
        let mount = self
            .mounts
            .iter()
            .find(|m| local.starts_with(&m.local_path))?;
        let relative = local.strip_prefix(&mount.local_path).ok()?;

        let mut out = mount.namespace.clone();
        let count = relative.components().count();
        for (i, component) in relative.components().enumerate() {
            let segment = component.as_os_str().to_string_lossy();
            out.push('/');
            if i + 1 == count && local.is_file() {
                let stem = Path::new(segment.as_ref())
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| segment.to_string());
                out.push_str(&stem);
            } else {
                out.push_str(&segment);
            }
        }
        Some(out)
    }

    /// Local directory for a namespace directory path.
    pub fn to_local(&self, namespace: &str) -> Option<PathBuf> {
        let namespace = normalize_path(namespace);
        self.mounts.iter().find_map(|m| {
            let rest = namespace.strip_prefix(m.namespace.as_str())?;
            if !rest.is_empty() && !rest.starts_with('/') {
                return None;
            }
            let mut path = m.local_path.clone();
            for segment in rest.split('/').filter(|s| !s.is_empty()) {
                path.push(segment);
            }
            Some(path)
        })
    }

    /// Whether a local path falls under some mount point.
    pub fn is_mounted(&self, local: &Path) -> bool {
        let local = canonical(local);
        self.mounts.iter().any(|m| local.starts_with(&m.local_path))
    }

    /// Whether a namespace path matches the deny list.
    pub fn is_denied(&self, namespace: &str) -> bool {
        !self.deny.is_empty() && self.deny.is_match(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_namespace_mapping() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Maps")).unwrap();
        fs::write(temp.path().join("Maps/L1.asset"), "{}").unwrap();

        let mut table = MountTable::default();
        assert!(table.add(temp.path(), "/Game/").unwrap());
        assert!(!table.add(temp.path(), "/Game").unwrap());

        assert_eq!(table.to_namespace(temp.path()).unwrap(), "/Game");
        assert_eq!(
            table.to_namespace(&temp.path().join("Maps")).unwrap(),
            "/Game/Maps"
        );
        assert_eq!(
            table.to_namespace(&temp.path().join("Maps/L1.asset")).unwrap(),
            "/Game/Maps/L1"
        );
        assert_eq!(
            table.to_local("/Game/Maps").unwrap(),
            temp.path().canonicalize().unwrap().join("Maps")
        );
        assert!(table.to_local("/Gameplay").is_none());
    }

    #[test]
    fn test_nested_mount_wins() {
        let temp = TempDir::new().unwrap();
        let plugin = temp.path().join("Plugins/Water");
        fs::create_dir_all(&plugin).unwrap();

        let mut table = MountTable::default();
        table.add(temp.path(), "/Game").unwrap();
        table.add(&plugin, "/Water").unwrap();

        assert_eq!(table.to_namespace(&plugin.join("Content")).unwrap(), "/Water/Content");
        assert!(table.remove(&plugin).is_some());
        assert_eq!(
            table.to_namespace(&plugin).unwrap(),
            "/Game/Plugins/Water"
        );
    }

    #[test]
    fn test_invalid_mount() {
        let mut table = MountTable::default();
        assert!(table.add(Path::new("/definitely/not/here"), "/Game").is_err());

        let temp = TempDir::new().unwrap();
        assert!(table.add(temp.path(), "/").is_err());
    }

    #[test]
    fn test_deny_list() {
        let table = MountTable::new(&["/Game/Developers/**".to_string()]).unwrap();
        assert!(table.is_denied("/Game/Developers/alice/Test"));
        assert!(!table.is_denied("/Game/Maps/L1"));
        assert!(MountTable::new(&["[".to_string()]).is_err());
    }
}

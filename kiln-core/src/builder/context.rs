//! Build-context resolution.
//!
//! The build backend can only read files inside the directory it is handed,
//! so kiln exposes the smallest directory that still contains every local
//! file a provisioner references.

use crate::builder::compile::detect_collection_root;
use crate::error::{KilnError, Result};
use crate::paths;
use crate::provision::{Step, StepKind};
use crate::types::provisioner::Provisioner;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Compute the build context for a list of provisioners.
///
/// Shell and unknown provisioners reference no files. A playbook that lives
/// inside an Ansible collection also pulls in the collection root. With no
/// references at all the context is `"."`.
pub fn resolve_context(provisioners: &[Provisioner]) -> Result<PathBuf> {
    let mut roots = Vec::new();

    for step in provisioners.iter().filter_map(Step::from_provisioner) {
        for file in &step.files {
            let expanded = paths::expand_path(file)?;
            roots.push(context_root(&expanded));
        }

        if let StepKind::Ansible { playbook, .. } = &step.kind {
            if playbook.is_empty() {
                continue;
            }
            if let Some(collection) = detect_collection_root(&paths::expand_path(playbook)?) {
                debug!(
                    collection = %collection.display(),
                    "Including Ansible collection in build context"
                );
                roots.push(collection);
            }
        }
    }

    let Some((first, rest)) = roots.split_first() else {
        debug!("No local file references, using current directory as build context");
        return Ok(PathBuf::from("."));
    };

    let context = rest.iter().fold(first.clone(), |acc, root| common_ancestor(&acc, root));

    info!(files = roots.len(), context = %context.display(), "Calculated build context");
    Ok(context)
}

/// Directories are their own root; anything else (including paths that do
/// not exist yet) contributes its parent.
fn context_root(path: &Path) -> PathBuf {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => path.to_path_buf(),
        _ => path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/")),
    }
}

/// Longest shared ancestor of two paths, compared component by component
/// after making both absolute. Returns `/` when nothing is shared.
pub fn common_ancestor(a: &Path, b: &Path) -> PathBuf {
    let (Ok(a), Ok(b)) = (paths::absolutize(a), paths::absolutize(b)) else {
        return PathBuf::from("/");
    };

    let shared: Vec<Component<'_>> = a
        .components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect();

    if shared.is_empty() {
        return PathBuf::from("/");
    }
    shared.iter().collect()
}

/// Re-express a template path relative to the build context.
///
/// Paths that escape the context are rejected since the backend cannot see them.
pub fn make_relative(path: &str, context: &Path) -> Result<PathBuf> {
    let absolute = paths::expand_path(path)?;
    let context_abs = paths::absolutize(context)
        .map_err(|e| KilnError::IoError { path: context.to_path_buf(), source: e })?;

    let relative = absolute.strip_prefix(&context_abs).map_err(|_| KilnError::OutsideContext {
        path: absolute.clone(),
        context: context_abs.clone(),
    })?;

    if relative.as_os_str().is_empty() {
        Ok(PathBuf::from("."))
    } else {
        Ok(relative.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::provisioner::{PowerShellProvisioner, ScriptProvisioner};

    #[test]
    fn test_common_ancestor_siblings() {
        let ancestor = common_ancestor(
            Path::new("/home/user/project/src"),
            Path::new("/home/user/project/test"),
        );
        assert_eq!(ancestor, PathBuf::from("/home/user/project"));
    }

    #[test]
    fn test_common_ancestor_identical() {
        let dir = Path::new("/home/user/project/src");
        assert_eq!(common_ancestor(dir, dir), dir.to_path_buf());
    }

    #[test]
    fn test_common_ancestor_nested() {
        let ancestor = common_ancestor(Path::new("/a/b"), Path::new("/a/b/c/d"));
        assert_eq!(ancestor, PathBuf::from("/a/b"));
    }

    #[test]
    fn test_common_ancestor_disjoint_is_root() {
        assert_eq!(common_ancestor(Path::new("/opt/x"), Path::new("/srv/y")), PathBuf::from("/"));
    }

    #[test]
    fn test_no_files_is_current_dir() {
        let provisioners = vec![
            Provisioner::shell(["echo hi"]),
            Provisioner::Unknown { kind: "chef".to_string() },
        ];
        assert_eq!(resolve_context(&provisioners).unwrap(), PathBuf::from("."));
    }

    #[test]
    fn test_single_file_uses_parent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("motd");
        std::fs::write(&file, "hello").unwrap();

        let provisioners = vec![Provisioner::file(file.to_str().unwrap(), "/etc/motd")];
        assert_eq!(resolve_context(&provisioners).unwrap(), dir.path());
    }

    #[test]
    fn test_single_directory_is_its_own_root() {
        let dir = tempfile::tempdir().unwrap();
        let configs = dir.path().join("configs");
        std::fs::create_dir(&configs).unwrap();

        let provisioners = vec![Provisioner::file(configs.to_str().unwrap(), "/etc/app")];
        assert_eq!(resolve_context(&provisioners).unwrap(), configs);
    }

    #[test]
    fn test_missing_file_degrades_to_parent() {
        let provisioners = vec![Provisioner::Script(ScriptProvisioner {
            scripts: vec!["/nonexistent/kiln/setup.sh".to_string()],
        })];
        assert_eq!(resolve_context(&provisioners).unwrap(), PathBuf::from("/nonexistent/kiln"));
    }

    #[test]
    fn test_multiple_files_fold_to_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("scripts")).unwrap();
        std::fs::create_dir_all(dir.path().join("windows")).unwrap();
        let script = dir.path().join("scripts/setup.sh");
        let ps = dir.path().join("windows/setup.ps1");
        std::fs::write(&script, "#!/bin/sh").unwrap();
        std::fs::write(&ps, "Write-Host hi").unwrap();

        let provisioners = vec![
            Provisioner::Script(ScriptProvisioner {
                scripts: vec![script.to_str().unwrap().to_string()],
            }),
            Provisioner::PowerShell(PowerShellProvisioner {
                scripts: vec![ps.to_str().unwrap().to_string()],
                execution_policy: None,
            }),
        ];
        assert_eq!(resolve_context(&provisioners).unwrap(), dir.path());
    }

    #[test]
    fn test_ansible_collection_root_widens_context() {
        let dir = tempfile::tempdir().unwrap();
        let collection = dir.path().join("coll");
        std::fs::create_dir_all(collection.join("playbooks")).unwrap();
        std::fs::write(collection.join("galaxy.yml"), "namespace: acme").unwrap();
        let playbook = collection.join("playbooks/site.yml");
        std::fs::write(&playbook, "- hosts: all").unwrap();

        let provisioners = vec![Provisioner::ansible(playbook.to_str().unwrap())];
        assert_eq!(resolve_context(&provisioners).unwrap(), collection);
    }

    #[test]
    fn test_make_relative() {
        let rel = make_relative("/home/user/project/files/motd", Path::new("/home/user/project"))
            .unwrap();
        assert_eq!(rel, PathBuf::from("files/motd"));
    }

    #[test]
    fn test_make_relative_context_itself() {
        let rel = make_relative("/srv/ctx", Path::new("/srv/ctx")).unwrap();
        assert_eq!(rel, PathBuf::from("."));
    }

    #[test]
    fn test_make_relative_outside_context() {
        let err = make_relative("/etc/passwd", Path::new("/home/user")).unwrap_err();
        assert!(matches!(err, KilnError::OutsideContext { .. }));
    }
}

//! Centralized path configuration for kiln.
//!
//! All configuration and data paths go through this module, as does the
//! expansion of user-supplied file references found in templates.

use crate::error::{KilnError, Result};
use std::path::{Path, PathBuf};

/// Get the kiln configuration directory.
///
/// Resolution order:
/// 1. `KILN_CONFIG_DIR` environment variable
/// 2. `<platform config dir>/kiln` (e.g. `~/.config/kiln`)
/// 3. `~/.kiln`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("KILN_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::config_dir()
        .map(|d| d.join("kiln"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".kiln")))
        .unwrap_or_else(|| PathBuf::from(".kiln"))
}

/// Get the kiln data directory.
///
/// Resolution order:
/// 1. `KILN_DATA_DIR` environment variable
/// 2. `<platform data dir>/kiln`
/// 3. `~/.kiln`
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("KILN_DATA_DIR") {
        return PathBuf::from(dir);
    }

    dirs::data_dir()
        .map(|d| d.join("kiln"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".kiln")))
        .unwrap_or_else(|| PathBuf::from(".kiln"))
}

/// Get the directory build reports are written to by default.
pub fn reports_dir() -> PathBuf {
    data_dir().join("reports")
}

/// Expand environment variables and `~`, then make the path absolute.
///
/// `$VAR` and `${VAR}` are replaced with the variable's value (empty when
/// unset). A leading `~` or `~/` resolves against the home directory; failing
/// to determine the home directory is the only error.
pub fn expand_path(path: &str) -> Result<PathBuf> {
    let expanded = expand_env(path);

    let expanded = if expanded == "~" || expanded.starts_with("~/") {
        let home = dirs::home_dir().ok_or_else(|| KilnError::PathExpansion {
            path: path.to_string(),
            reason: "home directory could not be determined".to_string(),
        })?;
        if expanded == "~" {
            home
        } else {
            home.join(&expanded[2..])
        }
    } else {
        PathBuf::from(expanded)
    };

    absolutize(&expanded).map_err(|e| KilnError::PathExpansion {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Make a path absolute against the current directory without touching the filesystem.
pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    let joined =
        if path.is_absolute() { path.to_path_buf() } else { std::env::current_dir()?.join(path) };
    Ok(normalize(&joined))
}

/// Lexically clean a path: drop `.` components and fold `..` into the parent.
pub fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Replace `$VAR` and `${VAR}` references with values from the process environment.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let name: String = if chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            if !closed {
                out.push_str("${");
                out.push_str(&name);
                continue;
            }
            name
        } else {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
                continue;
            }
            name
        };

        out.push_str(&std::env::var(&name).unwrap_or_default());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_absolute_unchanged() {
        let path = expand_path("/opt/data/file.txt").unwrap();
        assert_eq!(path, PathBuf::from("/opt/data/file.txt"));
    }

    #[test]
    fn test_expand_relative_is_absolute() {
        let path = expand_path("scripts/setup.sh").unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("scripts/setup.sh"));
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_path("~").unwrap(), normalize(&home));
        assert_eq!(expand_path("~/work/a.yml").unwrap(), normalize(&home.join("work/a.yml")));
    }

    #[test]
    fn test_expand_env_braced_and_bare() {
        std::env::set_var("KILN_TEST_EXPAND_DIR", "/srv/kiln");
        assert_eq!(
            expand_path("${KILN_TEST_EXPAND_DIR}/a").unwrap(),
            PathBuf::from("/srv/kiln/a")
        );
        assert_eq!(expand_path("$KILN_TEST_EXPAND_DIR/b").unwrap(), PathBuf::from("/srv/kiln/b"));
    }

    #[test]
    fn test_expand_env_unset_is_empty() {
        assert_eq!(expand_env("/x/$KILN_TEST_DEFINITELY_UNSET/y"), "/x//y");
        assert_eq!(expand_env("cost: $"), "cost: $");
    }

    #[test]
    fn test_normalize_parent_components() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
    }
}

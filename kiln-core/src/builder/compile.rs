//! Compile a [`BuildConfig`] into a build graph.
//!
//! Provisioners are lowered to [`Step`]s and rendered in order on top of the
//! base image. Steps that have nothing to do leave the state unchanged, and
//! unknown provisioner kinds are logged and skipped.

use crate::builder::context::make_relative;
use crate::builder::graph::{CacheMount, GraphState, Platform};
use crate::error::{KilnError, Result};
use crate::observability::metrics;
use crate::paths;
use crate::provision::{ScriptHost, Step, StepKind};
use crate::types::build_config::BuildConfig;
use crate::types::provisioner::Provisioner;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// `PATH` seeded into the running environment used for `$VAR` expansion.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

const SCRIPT_DIR: &str = "/tmp/kiln-scripts";
const PLAYBOOK_PATH: &str = "/tmp/playbook.yml";
const REQUIREMENTS_PATH: &str = "/tmp/requirements.yml";
const COLLECTION_PATH: &str = "/tmp/ansible-collection";
const COLLECTION_INSTALL_DIR: &str = "/usr/share/ansible/collections";
const COLLECTION_MANIFEST: &str = "galaxy.yml";

/// Package-manager cache directories, keyed by the command substrings that trigger them.
const CACHE_RULES: &[(&[&str], &[(&str, &str)])] = &[
    (
        &["apt-get"],
        &[("/var/cache/apt", "kiln-apt-cache"), ("/var/lib/apt/lists", "kiln-apt-lists")],
    ),
    (
        &["yum", "dnf"],
        &[("/var/cache/yum", "kiln-yum-cache"), ("/var/cache/dnf", "kiln-dnf-cache")],
    ),
    (&["apk"], &[("/var/cache/apk", "kiln-apk-cache")]),
    (&["pip"], &[("/root/.cache/pip", "kiln-pip-cache")]),
    (&["npm", "yarn"], &[("/root/.npm", "kiln-npm-cache"), ("/root/.yarn", "kiln-yarn-cache")]),
    (
        &["go ", "go get", "go build"],
        &[("/go/pkg/mod", "kiln-go-mod-cache"), ("/root/.cache/go-build", "kiln-go-build-cache")],
    ),
];

/// Split an `os/arch` platform string. Exactly one separator is accepted.
pub fn parse_platform(platform: &str) -> Result<(String, String)> {
    let invalid = || KilnError::InvalidPlatform { platform: platform.to_string() };

    let (os, arch) = platform.split_once('/').ok_or_else(invalid)?;
    if os.is_empty() || arch.is_empty() || arch.contains('/') {
        return Err(invalid());
    }
    Ok((os.to_string(), arch.to_string()))
}

/// Resolve the platform to build for: the base image platform when it
/// parses, else `linux/<first architecture>`.
pub fn resolve_platform(config: &BuildConfig) -> Result<Platform> {
    match parse_platform(&config.base.platform) {
        Ok((os, arch)) => Ok(Platform::new(os, arch)),
        Err(err) => match config.architectures.first() {
            Some(arch) => {
                debug!(platform = %config.base.platform, "Falling back to first architecture");
                Ok(Platform::new("linux", arch.clone()))
            }
            None => Err(KilnError::NoPlatform { reason: err.to_string() }),
        },
    }
}

/// Compile a config into a graph rooted at its base image.
///
/// `context_dir` is the build context the graph's copy operations read from.
/// The first failing provisioner aborts compilation with its index attached.
pub fn compile(config: &BuildConfig, context_dir: &Path) -> Result<GraphState> {
    let platform = resolve_platform(config)?;

    let mut state = GraphState::image(config.base.image.clone(), platform);

    for (key, value) in &config.base.env {
        state = state.add_env(key, value);
    }
    for (key, value) in &config.build_args {
        state = state.add_env(key, value);
    }

    state = apply_changes(state, &config.base.changes);

    let compiler = GraphCompiler { context_dir };
    for (index, provisioner) in config.provisioners.iter().enumerate() {
        state = compiler.apply(state, provisioner).map_err(|e| e.at_provisioner(index))?;
    }

    Ok(apply_changes(state, &config.post_changes))
}

/// Apply Dockerfile-style `ENV`, `WORKDIR` and `USER` instructions.
///
/// Anything else, and any entry with fewer than two tokens, is skipped.
pub fn apply_changes(mut state: GraphState, changes: &[String]) -> GraphState {
    let mut env = BTreeMap::from([("PATH".to_string(), DEFAULT_PATH.to_string())]);

    for change in changes {
        let parts: Vec<&str> = change.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        match parts[0] {
            "ENV" => {
                let (key, value) = match parts[1].split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None if parts.len() >= 3 => (parts[1].to_string(), parts[2..].join(" ")),
                    None => continue,
                };
                let value = expand_vars(&value, &env);
                state = state.add_env(key.clone(), value.clone());
                env.insert(key, value);
            }
            "WORKDIR" => state = state.dir(parts[1]),
            "USER" => state = state.user(parts[1]),
            other => debug!(instruction = other, "Skipping unsupported change"),
        }
    }

    state
}

/// Replace `$KEY` with its value for every key in `env`.
///
/// This is a plain substring replacement in key order, so `$HOME` also
/// matches the start of `$HOMEPAGE`.
pub fn expand_vars(input: &str, env: &BTreeMap<String, String>) -> String {
    env.iter().fold(input.to_string(), |acc, (key, value)| acc.replace(&format!("${}", key), value))
}

/// Cache mounts implied by a shell command.
pub fn cache_mounts_for(command: &str) -> Vec<CacheMount> {
    CACHE_RULES
        .iter()
        .filter(|(triggers, _)| triggers.iter().any(|t| command.contains(t)))
        .flat_map(|(_, mounts)| mounts.iter().map(|(target, id)| CacheMount::shared(target, id)))
        .collect()
}

fn apt_mounts() -> Vec<CacheMount> {
    cache_mounts_for("apt-get")
}

struct GraphCompiler<'a> {
    context_dir: &'a Path,
}

impl GraphCompiler<'_> {
    fn apply(&self, state: GraphState, provisioner: &Provisioner) -> Result<GraphState> {
        let Some(step) = Step::from_provisioner(provisioner) else {
            warn!(kind = provisioner.kind(), "Unsupported provisioner type, skipping");
            return Ok(state);
        };

        let next = match &step.kind {
            StepKind::Shell { commands } => self.shell(state, commands),
            StepKind::Copy { source, destination, mode } => {
                self.copy(state, source, destination, mode.as_deref())?
            }
            StepKind::Scripts { scripts, host } => self.scripts(state, scripts, host)?,
            StepKind::Ansible { playbook, galaxy_file, extra_vars, .. } => {
                self.ansible(state, playbook, galaxy_file.as_deref(), extra_vars)?
            }
        };

        metrics::record_provisioner_compiled(step.kind_name());
        Ok(next)
    }

    fn shell(&self, state: GraphState, commands: &[String]) -> GraphState {
        if commands.is_empty() {
            return state;
        }
        let combined = commands.join(" && ");
        let mounts = cache_mounts_for(&combined);
        state.run_shell(combined, mounts)
    }

    fn copy(
        &self,
        state: GraphState,
        source: &str,
        destination: &str,
        mode: Option<&str>,
    ) -> Result<GraphState> {
        if source.is_empty() || destination.is_empty() {
            return Ok(state);
        }

        let relative = make_relative(source, self.context_dir)?;
        let on_disk = self.context_dir.join(&relative);
        let meta = std::fs::metadata(&on_disk)
            .map_err(|e| KilnError::SourceNotFound { path: on_disk.clone(), source: e })?;

        let target = if meta.is_dir() {
            let name = on_disk.file_name().map(PathBuf::from).unwrap_or_default();
            Path::new(destination).join(name).to_string_lossy().into_owned()
        } else {
            destination.to_string()
        };

        let mut state = state.copy_from_context(path_str(&relative), target.clone());
        if let Some(mode) = mode {
            state = state.run_shell(format!("chmod {} {}", mode, target), Vec::new());
        }
        Ok(state)
    }

    fn scripts(
        &self,
        mut state: GraphState,
        scripts: &[String],
        host: &ScriptHost,
    ) -> Result<GraphState> {
        for script in scripts {
            let relative = make_relative(script, self.context_dir)?;
            let name = relative.file_name().map(PathBuf::from).unwrap_or_else(|| relative.clone());
            let target = format!("{}/{}", SCRIPT_DIR, name.display());

            state = state.copy_from_context(path_str(&relative), target.clone());
            state = match host {
                ScriptHost::Shell => {
                    state.run_shell(format!("chmod +x {0} && {0}", target), Vec::new())
                }
                ScriptHost::PowerShell { .. } => state.run_shell(
                    format!("pwsh -NoProfile -ExecutionPolicy Bypass -File {}", target),
                    Vec::new(),
                ),
            };
        }
        Ok(state)
    }

    fn ansible(
        &self,
        state: GraphState,
        playbook: &str,
        galaxy_file: Option<&str>,
        extra_vars: &BTreeMap<String, String>,
    ) -> Result<GraphState> {
        if playbook.is_empty() {
            return Ok(state);
        }

        let relative = make_relative(playbook, self.context_dir)?;
        let mut state = state.copy_from_context(path_str(&relative), PLAYBOOK_PATH);

        if let Some(root) = detect_collection_root(&paths::expand_path(playbook)?) {
            match make_relative(&root.to_string_lossy(), self.context_dir) {
                Ok(rel_root) => {
                    state = state.copy_from_context(path_str(&rel_root), COLLECTION_PATH);
                    state = state.run_shell(
                        format!(
                            "ansible-galaxy collection install {}/ -p {}",
                            COLLECTION_PATH, COLLECTION_INSTALL_DIR
                        ),
                        Vec::new(),
                    );
                }
                Err(err) => warn!(error = %err, "Failed to resolve collection root, skipping"),
            }
        }

        if let Some(galaxy) = galaxy_file {
            let relative = make_relative(galaxy, self.context_dir)?;
            state = state.copy_from_context(path_str(&relative), REQUIREMENTS_PATH);
            state = state
                .run_shell(format!("ansible-galaxy install -r {}", REQUIREMENTS_PATH), Vec::new());
        }

        let mut command = format!("ansible-playbook {} -i localhost, -c local", PLAYBOOK_PATH);
        for (key, value) in extra_vars {
            command.push_str(&format!(" -e {}={}", key, value));
        }

        Ok(state.run_shell(command, apt_mounts()))
    }
}

/// Find the Ansible collection a playbook belongs to.
///
/// Only playbooks under a `/playbooks/` or `/roles/` directory are
/// considered; the collection root is the nearest ancestor holding `galaxy.yml`.
pub fn detect_collection_root(playbook: &Path) -> Option<PathBuf> {
    let text = playbook.to_string_lossy();
    if !text.contains("/playbooks/") && !text.contains("/roles/") {
        return None;
    }

    playbook
        .ancestors()
        .skip(1)
        .take_while(|dir| {
            *dir != Path::new("/") && *dir != Path::new(".") && !dir.as_os_str().is_empty()
        })
        .find(|dir| dir.join(COLLECTION_MANIFEST).is_file())
        .map(Path::to_path_buf)
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

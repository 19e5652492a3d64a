//! Provisioner intermediate representation.
//!
//! Each [`Provisioner`] is lowered exactly once into a [`Step`]. The build
//! graph renderer (`builder::compile`) and the component document renderer
//! (`ami::document`) both consume steps and match [`StepKind`] exhaustively,
//! so a new kind cannot be added without teaching both backends about it.
//! The build-context resolver only needs [`Step::files`].

use crate::types::provisioner::Provisioner;
use std::collections::BTreeMap;

/// Extra var that switches Ansible into Windows mode.
pub const ANSIBLE_SHELL_TYPE_VAR: &str = "ansible_shell_type";

/// Operating system a step is meant to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Linux,
    Windows,
}

impl TargetOs {
    /// Platform name used by the image pipeline.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetOs::Linux => "Linux",
            TargetOs::Windows => "Windows",
        }
    }
}

impl std::fmt::Display for TargetOs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interpreter for a list of local scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptHost {
    Shell,
    PowerShell { execution_policy: Option<String> },
}

/// What a step does, independent of backend.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Shell {
        commands: Vec<String>,
    },
    Copy {
        source: String,
        destination: String,
        mode: Option<String>,
    },
    Scripts {
        scripts: Vec<String>,
        host: ScriptHost,
    },
    Ansible {
        playbook: String,
        galaxy_file: Option<String>,
        extra_vars: BTreeMap<String, String>,
        inventory: Option<String>,
    },
}

/// A provisioner lowered into backend-neutral form.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub kind: StepKind,
    /// Local file references, as written in the template, in declaration order.
    pub files: Vec<String>,
    /// Environment exported before the step runs.
    pub env: BTreeMap<String, String>,
    pub target: TargetOs,
}

impl Step {
    /// Lower a provisioner. Returns `None` for kinds kiln does not know.
    pub fn from_provisioner(provisioner: &Provisioner) -> Option<Step> {
        let step = match provisioner {
            Provisioner::Shell(shell) => Step {
                kind: StepKind::Shell { commands: shell.inline.clone() },
                files: Vec::new(),
                env: shell.environment.clone(),
                target: TargetOs::Linux,
            },
            Provisioner::File(file) => Step {
                kind: StepKind::Copy {
                    source: file.source.clone(),
                    destination: file.destination.clone(),
                    mode: file.mode.clone(),
                },
                files: non_empty(std::iter::once(&file.source)),
                env: BTreeMap::new(),
                target: TargetOs::Linux,
            },
            Provisioner::Script(script) => Step {
                kind: StepKind::Scripts {
                    scripts: script.scripts.clone(),
                    host: ScriptHost::Shell,
                },
                files: non_empty(&script.scripts),
                env: BTreeMap::new(),
                target: TargetOs::Linux,
            },
            Provisioner::PowerShell(ps) => Step {
                kind: StepKind::Scripts {
                    scripts: ps.scripts.clone(),
                    host: ScriptHost::PowerShell { execution_policy: ps.execution_policy.clone() },
                },
                files: non_empty(&ps.scripts),
                env: BTreeMap::new(),
                target: TargetOs::Windows,
            },
            Provisioner::Ansible(ansible) => {
                let shell_type = ansible.extra_vars.get(ANSIBLE_SHELL_TYPE_VAR);
                let target = match shell_type.map(String::as_str) {
                    Some("powershell") | Some("cmd") => TargetOs::Windows,
                    _ => TargetOs::Linux,
                };
                Step {
                    kind: StepKind::Ansible {
                        playbook: ansible.playbook_path.clone(),
                        galaxy_file: ansible.galaxy_file.clone(),
                        extra_vars: ansible.extra_vars.clone(),
                        inventory: ansible.inventory.clone(),
                    },
                    files: non_empty(
                        std::iter::once(&ansible.playbook_path).chain(ansible.galaxy_file.iter()),
                    ),
                    env: BTreeMap::new(),
                    target,
                }
            }
            Provisioner::Unknown { .. } => return None,
        };
        Some(step)
    }

    /// Short name of the step kind, matching the template `type` tag.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            StepKind::Shell { .. } => "shell",
            StepKind::Copy { .. } => "file",
            StepKind::Scripts { host: ScriptHost::Shell, .. } => "script",
            StepKind::Scripts { host: ScriptHost::PowerShell { .. }, .. } => "powershell",
            StepKind::Ansible { .. } => "ansible",
        }
    }
}

fn non_empty<'a>(paths: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    paths.into_iter().filter(|p| !p.is_empty()).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::provisioner::{AnsibleProvisioner, PowerShellProvisioner};

    #[test]
    fn test_unknown_has_no_step() {
        let prov = Provisioner::Unknown { kind: "chef".to_string() };
        assert!(Step::from_provisioner(&prov).is_none());
    }

    #[test]
    fn test_shell_has_no_files() {
        let step = Step::from_provisioner(&Provisioner::shell(["echo hi"])).unwrap();
        assert!(step.files.is_empty());
        assert_eq!(step.target, TargetOs::Linux);
        assert_eq!(step.kind_name(), "shell");
    }

    #[test]
    fn test_file_references_source() {
        let step = Step::from_provisioner(&Provisioner::file("./motd", "/etc/motd")).unwrap();
        assert_eq!(step.files, vec!["./motd"]);
    }

    #[test]
    fn test_powershell_targets_windows() {
        let prov = Provisioner::PowerShell(PowerShellProvisioner {
            scripts: vec!["a.ps1".to_string(), "b.ps1".to_string()],
            execution_policy: None,
        });
        let step = Step::from_provisioner(&prov).unwrap();
        assert_eq!(step.target, TargetOs::Windows);
        assert_eq!(step.files, vec!["a.ps1", "b.ps1"]);
        assert_eq!(step.kind_name(), "powershell");
    }

    #[test]
    fn test_ansible_files_and_target() {
        let mut extra_vars = BTreeMap::new();
        extra_vars.insert(ANSIBLE_SHELL_TYPE_VAR.to_string(), "cmd".to_string());
        let prov = Provisioner::Ansible(AnsibleProvisioner {
            playbook_path: "site.yml".to_string(),
            galaxy_file: Some("requirements.yml".to_string()),
            extra_vars,
            inventory: None,
        });

        let step = Step::from_provisioner(&prov).unwrap();
        assert_eq!(step.files, vec!["site.yml", "requirements.yml"]);
        assert_eq!(step.target, TargetOs::Windows);
    }

    #[test]
    fn test_ansible_linux_by_default() {
        let step = Step::from_provisioner(&Provisioner::ansible("site.yml")).unwrap();
        assert_eq!(step.target, TargetOs::Linux);
    }
}

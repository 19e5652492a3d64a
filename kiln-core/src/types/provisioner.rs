//! Provisioner domain types.
//!
//! A provisioner is one declarative unit of machine customization. Templates
//! carry a free-form `type` string; anything kiln does not recognize is kept
//! as [`Provisioner::Unknown`] rather than rejected, so both backends can pass
//! it through.

use serde::Deserialize;
use std::collections::BTreeMap;

/// A single provisioning step from a template.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawProvisioner")]
pub enum Provisioner {
    Shell(ShellProvisioner),
    File(FileProvisioner),
    Script(ScriptProvisioner),
    PowerShell(PowerShellProvisioner),
    Ansible(AnsibleProvisioner),
    /// A `type` kiln has no renderer for.
    Unknown { kind: String },
}

/// Inline shell commands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShellProvisioner {
    pub inline: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

/// Copy of a local file or directory into the image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileProvisioner {
    pub source: String,
    pub destination: String,
    /// Octal mode applied after the copy, e.g. `0755`.
    pub mode: Option<String>,
}

/// Local shell scripts executed in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptProvisioner {
    pub scripts: Vec<String>,
}

/// Local PowerShell scripts executed in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerShellProvisioner {
    pub scripts: Vec<String>,
    pub execution_policy: Option<String>,
}

/// An Ansible playbook run against the machine being built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnsibleProvisioner {
    pub playbook_path: String,
    pub galaxy_file: Option<String>,
    pub extra_vars: BTreeMap<String, String>,
    pub inventory: Option<String>,
}

impl Provisioner {
    /// The template `type` tag for this provisioner.
    pub fn kind(&self) -> &str {
        match self {
            Provisioner::Shell(_) => "shell",
            Provisioner::File(_) => "file",
            Provisioner::Script(_) => "script",
            Provisioner::PowerShell(_) => "powershell",
            Provisioner::Ansible(_) => "ansible",
            Provisioner::Unknown { kind } => kind,
        }
    }

    pub fn shell<I, S>(inline: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Provisioner::Shell(ShellProvisioner {
            inline: inline.into_iter().map(Into::into).collect(),
            environment: BTreeMap::new(),
        })
    }

    pub fn file(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Provisioner::File(FileProvisioner {
            source: source.into(),
            destination: destination.into(),
            mode: None,
        })
    }

    pub fn ansible(playbook_path: impl Into<String>) -> Self {
        Provisioner::Ansible(AnsibleProvisioner {
            playbook_path: playbook_path.into(),
            ..Default::default()
        })
    }
}

/// Flat wire shape of a provisioner as written in templates.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawProvisioner {
    #[serde(rename = "type")]
    kind: String,
    inline: Vec<String>,
    environment: BTreeMap<String, String>,
    source: String,
    destination: String,
    mode: Option<String>,
    scripts: Vec<String>,
    ps_scripts: Vec<String>,
    execution_policy: Option<String>,
    playbook_path: String,
    galaxy_file: Option<String>,
    extra_vars: BTreeMap<String, String>,
    inventory: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl From<RawProvisioner> for Provisioner {
    fn from(raw: RawProvisioner) -> Self {
        match raw.kind.as_str() {
            "shell" => Provisioner::Shell(ShellProvisioner {
                inline: raw.inline,
                environment: raw.environment,
            }),
            "file" => Provisioner::File(FileProvisioner {
                source: raw.source,
                destination: raw.destination,
                mode: non_empty(raw.mode),
            }),
            "script" => Provisioner::Script(ScriptProvisioner { scripts: raw.scripts }),
            "powershell" => Provisioner::PowerShell(PowerShellProvisioner {
                scripts: raw.ps_scripts,
                execution_policy: non_empty(raw.execution_policy),
            }),
            "ansible" => Provisioner::Ansible(AnsibleProvisioner {
                playbook_path: raw.playbook_path,
                galaxy_file: non_empty(raw.galaxy_file),
                extra_vars: raw.extra_vars,
                inventory: non_empty(raw.inventory),
            }),
            _ => Provisioner::Unknown { kind: raw.kind },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_shell() {
        let prov: Provisioner = serde_yaml::from_str(
            "type: shell\ninline:\n  - apt-get update\n\
             environment:\n  DEBIAN_FRONTEND: noninteractive\n",
        )
        .unwrap();
        match prov {
            Provisioner::Shell(shell) => {
                assert_eq!(shell.inline, vec!["apt-get update"]);
                assert_eq!(shell.environment["DEBIAN_FRONTEND"], "noninteractive");
            }
            other => panic!("expected shell, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_powershell_uses_ps_scripts() {
        let prov: Provisioner =
            serde_yaml::from_str("type: powershell\nps_scripts: [a.ps1]\nexecution_policy: ''\n")
                .unwrap();
        assert_eq!(
            prov,
            Provisioner::PowerShell(PowerShellProvisioner {
                scripts: vec!["a.ps1".to_string()],
                execution_policy: None,
            })
        );
    }

    #[test]
    fn test_unknown_type_is_kept() {
        let prov: Provisioner = serde_yaml::from_str("type: chef\nrun_list: [x]\n").unwrap();
        assert_eq!(prov, Provisioner::Unknown { kind: "chef".to_string() });
        assert_eq!(prov.kind(), "chef");
    }

    #[test]
    fn test_missing_type_is_unknown() {
        let prov: Provisioner = serde_json::from_str(r#"{"inline": ["true"]}"#).unwrap();
        assert_eq!(prov.kind(), "");
    }
}

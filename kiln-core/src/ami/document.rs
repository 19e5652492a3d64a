//! Component document rendering.
//!
//! Renders a provisioner [`Step`] into the YAML document the image pipeline
//! runs inside the build instance. Linux steps use the Bash engine, Windows
//! steps the PowerShell engine. Local files (scripts, playbooks, galaxy
//! requirements) are read here and embedded in the document.

use crate::ami::powershell;
use crate::error::{KilnError, Result};
use crate::paths;
use crate::provision::{ScriptHost, Step, StepKind, TargetOs, ANSIBLE_SHELL_TYPE_VAR};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const ACTION_BASH: &str = "ExecuteBash";
pub const ACTION_POWERSHELL: &str = "ExecutePowerShell";
pub const ACTION_REBOOT: &str = "Reboot";

/// Extra vars that steer how Ansible connects to the host, not the play itself.
/// They are dropped when the playbook runs locally on Windows.
const WINDOWS_CONNECTION_VARS: &[&str] = &[
    "ansible_connection",
    ANSIBLE_SHELL_TYPE_VAR,
    "ansible_aws_ssm_bucket_name",
    "ansible_aws_ssm_region",
];

/// Image pipeline component document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDocument {
    pub schema_version: f64,
    pub name: String,
    pub description: String,
    pub phases: Vec<Phase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub steps: Vec<ComponentStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStep {
    pub name: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<StepInputs>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInputs {
    pub commands: Vec<String>,
}

impl ComponentStep {
    fn run(name: impl Into<String>, action: &str, commands: Vec<String>) -> Self {
        Self {
            name: name.into(),
            action: action.to_string(),
            inputs: Some(StepInputs { commands }),
        }
    }
}

impl ComponentDocument {
    /// A single-phase (`build`) document.
    pub fn build(name: &str, description: &str, steps: Vec<ComponentStep>) -> Self {
        Self {
            schema_version: 1.0,
            name: name.to_string(),
            description: description.to_string(),
            phases: vec![Phase { name: "build".to_string(), steps }],
        }
    }

    /// All steps across phases, in order.
    pub fn steps(&self) -> impl Iterator<Item = &ComponentStep> {
        self.phases.iter().flat_map(|phase| phase.steps.iter())
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| KilnError::Serialization {
            reason: format!("failed to marshal component document: {}", e),
        })
    }
}

/// Render a step into a component document.
///
/// `default_policy` is the PowerShell execution policy used when the step
/// does not name one. File copies have no component equivalent.
pub fn render(step: &Step, default_policy: &str) -> Result<ComponentDocument> {
    match &step.kind {
        StepKind::Shell { commands } => render_shell(commands, &step.env),
        StepKind::Scripts { scripts, host: ScriptHost::Shell } => render_scripts(scripts),
        StepKind::Scripts { scripts, host: ScriptHost::PowerShell { execution_policy } } => {
            let policy = execution_policy.as_deref().unwrap_or(default_policy);
            render_powershell(scripts, policy)
        }
        StepKind::Ansible { playbook, galaxy_file, extra_vars, inventory } => {
            if playbook.is_empty() {
                return Err(KilnError::EmptyPlaybook);
            }
            match step.target {
                TargetOs::Linux => render_ansible_linux(
                    playbook,
                    galaxy_file.as_deref(),
                    extra_vars,
                    inventory.as_deref(),
                ),
                TargetOs::Windows => {
                    render_ansible_windows(playbook, galaxy_file.as_deref(), extra_vars)
                }
            }
        }
        StepKind::Copy { .. } => Err(KilnError::UnsupportedProvisioner {
            kind: step.kind_name().to_string(),
            target: "AMI component".to_string(),
        }),
    }
}

fn render_shell(commands: &[String], env: &BTreeMap<String, String>) -> Result<ComponentDocument> {
    if commands.is_empty() {
        return Err(KilnError::EmptyShell);
    }

    let lines = env
        .iter()
        .map(|(key, value)| format!("export {}={}", key, value))
        .chain(commands.iter().cloned())
        .collect();

    Ok(ComponentDocument::build(
        "ShellProvisioner",
        "Shell provisioner component",
        vec![ComponentStep::run("ExecuteShellCommands", ACTION_BASH, lines)],
    ))
}

fn render_scripts(scripts: &[String]) -> Result<ComponentDocument> {
    if scripts.is_empty() {
        return Err(KilnError::EmptyScripts { kind: "script".to_string() });
    }

    let contents = scripts
        .iter()
        .map(|script| {
            read_local(script, "script").map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ComponentDocument::build(
        "ScriptProvisioner",
        "Script provisioner component",
        vec![ComponentStep::run("ExecuteScripts", ACTION_BASH, contents)],
    ))
}

fn render_powershell(scripts: &[String], policy: &str) -> Result<ComponentDocument> {
    if scripts.is_empty() {
        return Err(KilnError::EmptyScripts { kind: "powershell".to_string() });
    }

    let mut steps = Vec::new();
    for (i, script) in scripts.iter().enumerate() {
        let content = powershell::normalize_script(&read_local(script, "PowerShell script")?);
        powershell::validate_syntax(&content).map_err(|e| KilnError::PowerShellSyntax {
            path: PathBuf::from(script),
            source: Box::new(e),
        })?;

        steps.push(ComponentStep::run(
            format!("ExecutePowerShellScript_{}", i),
            ACTION_POWERSHELL,
            vec![powershell::wrap_with_error_handling(&content, policy)],
        ));

        if powershell::needs_reboot(&content) {
            steps.push(ComponentStep {
                name: format!("RebootAfterScript_{}", i),
                action: ACTION_REBOOT.to_string(),
                inputs: None,
            });
        }
    }

    Ok(ComponentDocument::build("PowerShellProvisioner", "PowerShell provisioner component", steps))
}

fn render_ansible_linux(
    playbook: &str,
    galaxy_file: Option<&str>,
    extra_vars: &BTreeMap<String, String>,
    inventory: Option<&str>,
) -> Result<ComponentDocument> {
    let playbook_content = read_local(playbook, "playbook")?;

    let mut commands: Vec<String> = vec![
        "# Install Ansible".into(),
        "if ! command -v ansible-playbook &> /dev/null; then".into(),
        "  apt-get update && apt-get install -y ansible || yum install -y ansible".into(),
        "fi".into(),
    ];

    // Embedded as base64 so the pipeline leaves Jinja2 syntax alone.
    if let Some(galaxy) = galaxy_file {
        let content = read_local(galaxy, "galaxy file")?;
        commands.push(format!(
            "echo '{}' | base64 -d > /tmp/requirements.yml",
            STANDARD.encode(content)
        ));
        commands.push("ansible-galaxy install -r /tmp/requirements.yml".into());
    }

    let name = file_name(playbook);
    commands.push(format!(
        "echo '{}' | base64 -d > /tmp/{}",
        STANDARD.encode(playbook_content),
        name
    ));

    let mut command = format!("ansible-playbook /tmp/{}", name);
    if !extra_vars.is_empty() {
        command.push_str(&format!(" -e '{}'", join_vars(extra_vars.iter())));
    }
    match inventory {
        Some(inventory) => command.push_str(&format!(" -i {}", inventory)),
        None => command.push_str(" --connection=local -i localhost,"),
    }
    commands.push(command);

    Ok(ComponentDocument::build(
        "AnsibleProvisioner",
        "Ansible provisioner component",
        vec![ComponentStep::run("ExecuteAnsible", ACTION_BASH, commands)],
    ))
}

fn render_ansible_windows(
    playbook: &str,
    galaxy_file: Option<&str>,
    extra_vars: &BTreeMap<String, String>,
) -> Result<ComponentDocument> {
    let playbook_content = read_local(playbook, "playbook")?;

    let mut commands: Vec<String> = [
        "$ErrorActionPreference = 'Stop'",
        "$ProgressPreference = 'SilentlyContinue'",
        "",
        "# Chocolatey works on older Windows Server releases",
        "if (-not (Get-Command python -ErrorAction SilentlyContinue)) {",
        "    if (-not (Get-Command choco -ErrorAction SilentlyContinue)) {",
        "        Set-ExecutionPolicy Bypass -Scope Process -Force",
        "        [System.Net.ServicePointManager]::SecurityProtocol = [System.Net.ServicePointManager]::SecurityProtocol -bor 3072",
        "        Invoke-Expression ((New-Object System.Net.WebClient).DownloadString('https://community.chocolatey.org/install.ps1'))",
        "    }",
        "    choco install python311 -y --no-progress",
        "    $env:Path = [System.Environment]::GetEnvironmentVariable('Path','Machine') + ';' + [System.Environment]::GetEnvironmentVariable('Path','User')",
        "    refreshenv",
        "}",
        "",
        "python -m pip install --upgrade pip",
        "python -m pip install ansible pywinrm",
        "",
        "New-Item -ItemType Directory -Force -Path 'C:\\temp' | Out-Null",
        "",
    ]
    .iter()
    .map(|line| line.to_string())
    .collect();

    if let Some(galaxy) = galaxy_file {
        let content = read_local(galaxy, "galaxy file")?;
        commands.push(format!("$requirementsBase64 = '{}'", STANDARD.encode(content)));
        commands.push(
            "[System.Text.Encoding]::UTF8.GetString([System.Convert]::FromBase64String($requirementsBase64)) | Out-File -FilePath 'C:\\temp\\requirements.yml' -Encoding UTF8"
                .into(),
        );
        commands.push("ansible-galaxy install -r C:\\temp\\requirements.yml".into());
        commands.push(String::new());
    }

    let name = file_name(playbook);
    commands.push(format!("$playbookBase64 = '{}'", STANDARD.encode(playbook_content)));
    commands.push(format!(
        "[System.Text.Encoding]::UTF8.GetString([System.Convert]::FromBase64String($playbookBase64)) | Out-File -FilePath 'C:\\temp\\{}' -Encoding UTF8",
        name
    ));
    commands.push(String::new());

    let mut command = format!("ansible-playbook 'C:\\temp\\{}'", name);
    let play_vars: Vec<_> = extra_vars
        .iter()
        .filter(|(key, _)| !WINDOWS_CONNECTION_VARS.contains(&key.as_str()))
        .collect();
    if !play_vars.is_empty() {
        command.push_str(&format!(" -e '{}'", join_vars(play_vars.into_iter())));
    }
    command.push_str(" --connection=local -i 'localhost,'");
    commands.push(command);

    Ok(ComponentDocument::build(
        "AnsibleProvisioner",
        "Ansible provisioner component for Windows",
        vec![ComponentStep::run("ExecuteAnsible", ACTION_POWERSHELL, commands)],
    ))
}

fn join_vars<'a>(vars: impl Iterator<Item = (&'a String, &'a String)>) -> String {
    vars.map(|(key, value)| format!("{}={}", key, value)).collect::<Vec<_>>().join(" ")
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn read_local(path: &str, kind: &str) -> Result<Vec<u8>> {
    let expanded = paths::expand_path(path)?;
    std::fs::read(&expanded).map_err(|e| KilnError::ScriptRead {
        kind: kind.to_string(),
        path: expanded,
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::provisioner::{
        AnsibleProvisioner, PowerShellProvisioner, Provisioner, ScriptProvisioner, ShellProvisioner,
    };

    fn step(provisioner: Provisioner) -> Step {
        Step::from_provisioner(&provisioner).unwrap()
    }

    fn commands(doc: &ComponentDocument, index: usize) -> &[String] {
        &doc.steps().nth(index).unwrap().inputs.as_ref().unwrap().commands
    }

    #[test]
    fn test_shell_with_env_exports() {
        let prov = Provisioner::Shell(ShellProvisioner {
            inline: vec!["apt-get update".to_string()],
            environment: BTreeMap::from([(
                "DEBIAN_FRONTEND".to_string(),
                "noninteractive".to_string(),
            )]),
        });
        let doc = render(&step(prov), "Bypass").unwrap();

        assert_eq!(doc.name, "ShellProvisioner");
        assert_eq!(doc.phases[0].name, "build");
        let only = doc.steps().next().unwrap();
        assert_eq!(only.name, "ExecuteShellCommands");
        assert_eq!(only.action, ACTION_BASH);
        assert_eq!(commands(&doc, 0), &["export DEBIAN_FRONTEND=noninteractive", "apt-get update"]);
    }

    #[test]
    fn test_empty_shell_is_error() {
        let err = render(&step(Provisioner::shell(Vec::<String>::new())), "Bypass").unwrap_err();
        assert_eq!(err.to_string(), "shell provisioner has no inline commands");
    }

    #[test]
    fn test_script_contents_inlined() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("setup.sh");
        std::fs::write(&script, "#!/bin/bash\necho setup").unwrap();

        let prov = Provisioner::Script(ScriptProvisioner {
            scripts: vec![script.to_str().unwrap().to_string()],
        });
        let doc = render(&step(prov), "Bypass").unwrap();
        assert_eq!(commands(&doc, 0), &["#!/bin/bash\necho setup"]);
    }

    #[test]
    fn test_missing_script_is_read_error() {
        let prov = Provisioner::Script(ScriptProvisioner {
            scripts: vec!["/nonexistent/kiln/setup.sh".to_string()],
        });
        let err = render(&step(prov), "Bypass").unwrap_err();
        assert!(matches!(err, KilnError::ScriptRead { .. }));
        assert!(err.to_string().starts_with("failed to read script"));
    }

    #[test]
    fn test_empty_script_lists() {
        let prov = Provisioner::Script(ScriptProvisioner { scripts: Vec::new() });
        assert!(matches!(render(&step(prov), "Bypass"), Err(KilnError::EmptyScripts { .. })));

        let prov = Provisioner::PowerShell(PowerShellProvisioner::default());
        let err = render(&step(prov), "Bypass").unwrap_err();
        assert_eq!(err.to_string(), "powershell provisioner has no scripts");
    }

    #[test]
    fn test_powershell_steps_and_reboot() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("features.ps1");
        let second = dir.path().join("hello.ps1");
        std::fs::write(
            &first,
            b"\xEF\xBB\xBFInstall-WindowsFeature Web-Server\r\nRestart-Computer -Force\r\n",
        )
        .unwrap();
        std::fs::write(&second, "Write-Host 'hi'").unwrap();

        let prov = Provisioner::PowerShell(PowerShellProvisioner {
            scripts: vec![
                first.to_str().unwrap().to_string(),
                second.to_str().unwrap().to_string(),
            ],
            execution_policy: None,
        });
        let doc = render(&step(prov), "Bypass").unwrap();

        let names: Vec<&str> = doc.steps().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["ExecutePowerShellScript_0", "RebootAfterScript_0", "ExecutePowerShellScript_1"]
        );

        let reboot = doc.steps().nth(1).unwrap();
        assert_eq!(reboot.action, ACTION_REBOOT);
        assert!(reboot.inputs.is_none());

        let wrapped = &commands(&doc, 0)[0];
        assert!(wrapped.contains("-ExecutionPolicy Bypass"));
        assert!(wrapped.contains("Install-WindowsFeature Web-Server\nRestart-Computer -Force\n"));
        assert!(!wrapped.contains('\r'));
        assert!(!wrapped.contains('\u{feff}'));
    }

    #[test]
    fn test_powershell_policy_override() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("a.ps1");
        std::fs::write(&script, "Write-Host 'a'").unwrap();

        let prov = Provisioner::PowerShell(PowerShellProvisioner {
            scripts: vec![script.to_str().unwrap().to_string()],
            execution_policy: Some("RemoteSigned".to_string()),
        });
        let doc = render(&step(prov), "Bypass").unwrap();
        assert!(commands(&doc, 0)[0].contains("-ExecutionPolicy RemoteSigned"));
    }

    #[test]
    fn test_powershell_syntax_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("broken.ps1");
        std::fs::write(&script, "if ($true) { Write-Host 'x'").unwrap();

        let prov = Provisioner::PowerShell(PowerShellProvisioner {
            scripts: vec![script.to_str().unwrap().to_string()],
            execution_policy: None,
        });
        let err = render(&step(prov), "Bypass").unwrap_err();
        assert!(err.to_string().contains("has syntax issues: unbalanced braces"));
    }

    #[test]
    fn test_ansible_linux() {
        let dir = tempfile::tempdir().unwrap();
        let playbook = dir.path().join("site.yml");
        let galaxy = dir.path().join("requirements.yml");
        std::fs::write(&playbook, "- hosts: all").unwrap();
        std::fs::write(&galaxy, "roles: []").unwrap();

        let prov = Provisioner::Ansible(AnsibleProvisioner {
            playbook_path: playbook.to_str().unwrap().to_string(),
            galaxy_file: Some(galaxy.to_str().unwrap().to_string()),
            extra_vars: BTreeMap::from([
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ]),
            inventory: None,
        });
        let doc = render(&step(prov), "Bypass").unwrap();
        let lines = commands(&doc, 0);

        assert_eq!(doc.steps().next().unwrap().action, ACTION_BASH);
        assert_eq!(lines[0], "# Install Ansible");
        assert_eq!(
            lines[4],
            format!("echo '{}' | base64 -d > /tmp/requirements.yml", STANDARD.encode("roles: []"))
        );
        assert_eq!(lines[5], "ansible-galaxy install -r /tmp/requirements.yml");
        assert_eq!(
            lines[6],
            format!("echo '{}' | base64 -d > /tmp/site.yml", STANDARD.encode("- hosts: all"))
        );
        assert_eq!(
            lines[7],
            "ansible-playbook /tmp/site.yml -e 'a=1 b=2' --connection=local -i localhost,"
        );
    }

    #[test]
    fn test_ansible_linux_explicit_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let playbook = dir.path().join("site.yml");
        std::fs::write(&playbook, "- hosts: all").unwrap();

        let prov = Provisioner::Ansible(AnsibleProvisioner {
            playbook_path: playbook.to_str().unwrap().to_string(),
            inventory: Some("/etc/ansible/hosts".to_string()),
            ..Default::default()
        });
        let doc = render(&step(prov), "Bypass").unwrap();
        assert_eq!(
            commands(&doc, 0).last().unwrap(),
            "ansible-playbook /tmp/site.yml -i /etc/ansible/hosts"
        );
    }

    #[test]
    fn test_ansible_windows_filters_connection_vars() {
        let dir = tempfile::tempdir().unwrap();
        let playbook = dir.path().join("win.yml");
        std::fs::write(&playbook, "- hosts: all").unwrap();

        let prov = Provisioner::Ansible(AnsibleProvisioner {
            playbook_path: playbook.to_str().unwrap().to_string(),
            extra_vars: BTreeMap::from([
                ("ansible_connection".to_string(), "aws_ssm".to_string()),
                ("ansible_shell_type".to_string(), "powershell".to_string()),
                ("ansible_aws_ssm_region".to_string(), "us-east-1".to_string()),
                ("app_version".to_string(), "2".to_string()),
            ]),
            ..Default::default()
        });
        let doc = render(&step(prov), "Bypass").unwrap();

        assert_eq!(doc.description, "Ansible provisioner component for Windows");
        let only = doc.steps().next().unwrap();
        assert_eq!(only.action, ACTION_POWERSHELL);

        let lines = commands(&doc, 0);
        assert!(lines.iter().any(|l| l.contains("choco install python311")));
        assert_eq!(
            lines.last().unwrap(),
            "ansible-playbook 'C:\\temp\\win.yml' -e 'app_version=2' --connection=local -i 'localhost,'"
        );
    }

    #[test]
    fn test_ansible_empty_playbook() {
        let err = render(&step(Provisioner::ansible("")), "Bypass").unwrap_err();
        assert_eq!(err.to_string(), "ansible provisioner has no playbook path");
    }

    #[test]
    fn test_file_is_unsupported() {
        let err = render(&step(Provisioner::file("a", "/b")), "Bypass").unwrap_err();
        assert!(matches!(err, KilnError::UnsupportedProvisioner { .. }));
    }

    #[test]
    fn test_yaml_shape() {
        let doc = render(&step(Provisioner::shell(["echo hi"])), "Bypass").unwrap();
        let yaml = doc.to_yaml().unwrap();
        assert!(yaml.contains("schemaVersion: 1.0"));
        assert!(yaml.contains("action: ExecuteBash"));

        let parsed: ComponentDocument = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, doc);
    }
}

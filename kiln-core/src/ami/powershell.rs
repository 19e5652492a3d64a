//! PowerShell script preparation.
//!
//! Scripts are normalized (UTF-8 BOM stripped, CRLF folded to LF), checked
//! for balanced braces and parentheses, and wrapped so that any terminating
//! error fails the component step.

use crate::error::{KilnError, Result};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Markers that mean a script expects the machine to restart afterwards.
const REBOOT_MARKERS: &[&str] =
    &["restart-computer", "shutdown /r", "shutdown -r", "#requires_reboot", "# requires_reboot"];

/// Strip a leading UTF-8 byte-order mark and normalize line endings.
pub fn normalize_script(content: &[u8]) -> String {
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
    String::from_utf8_lossy(content).replace("\r\n", "\n")
}

/// Check brace then parenthesis balance.
pub fn validate_syntax(script: &str) -> Result<()> {
    check_balance(script, '{', '}', "braces")?;
    check_balance(script, '(', ')', "parentheses")
}

fn check_balance(script: &str, open: char, close: char, name: &str) -> Result<()> {
    let mut depth: i64 = 0;
    for c in script.chars() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth < 0 {
                return Err(KilnError::UnbalancedSyntax {
                    name: name.to_string(),
                    detail: format!("unexpected '{}'", close),
                });
            }
        }
    }

    if depth != 0 {
        return Err(KilnError::UnbalancedSyntax {
            name: name.to_string(),
            detail: format!("{} unclosed '{}'", depth, open),
        });
    }
    Ok(())
}

/// Wrap a script so it runs under `execution_policy` and exits non-zero on error.
pub fn wrap_with_error_handling(script: &str, execution_policy: &str) -> String {
    format!(
        "# Set execution policy for this session\n\
         Set-ExecutionPolicy -ExecutionPolicy {policy} -Scope Process -Force\n\
         \n\
         $ErrorActionPreference = 'Stop'\n\
         $VerbosePreference = 'Continue'\n\
         \n\
         try {{\n\
         {script}\n\
         }} catch {{\n    \
         Write-Error \"Script failed with error: $_\"\n    \
         Write-Error \"Stack trace: $($_.ScriptStackTrace)\"\n    \
         exit 1\n\
         }}",
        policy = execution_policy,
        script = script,
    )
}

/// Whether a script asks for a reboot. Case-insensitive.
pub fn needs_reboot(script: &str) -> bool {
    let lower = script.to_lowercase();
    REBOOT_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_reboot() {
        assert!(needs_reboot("Install-WindowsFeature\nRestart-Computer -Force"));
        assert!(needs_reboot("RESTART-COMPUTER"));
        assert!(needs_reboot("shutdown /r /t 0"));
        assert!(needs_reboot("# Requires_Reboot"));
        assert!(!needs_reboot("Write-Host 'hi'"));
    }

    #[test]
    fn test_balanced_script_passes() {
        assert!(validate_syntax("if ($true) { Write-Host 'x' }").is_ok());
    }

    #[test]
    fn test_unclosed_brace() {
        let err = validate_syntax("if ($true) { Write-Host 'x'").unwrap_err();
        assert_eq!(err.to_string(), "unbalanced braces: 1 unclosed '{'");
    }

    #[test]
    fn test_unexpected_paren() {
        let err = validate_syntax("Get-Process )").unwrap_err();
        assert_eq!(err.to_string(), "unbalanced parentheses: unexpected ')'");
    }

    #[test]
    fn test_braces_checked_before_parens() {
        let err = validate_syntax("}(").unwrap_err();
        assert!(err.to_string().starts_with("unbalanced braces"));
    }

    #[test]
    fn test_normalize_strips_bom_and_crlf() {
        let raw = b"\xEF\xBB\xBFWrite-Host 'a'\r\nWrite-Host 'b'\r\n";
        assert_eq!(normalize_script(raw), "Write-Host 'a'\nWrite-Host 'b'\n");
        assert_eq!(normalize_script(b"plain"), "plain");
    }

    #[test]
    fn test_wrap_with_error_handling() {
        let wrapped = wrap_with_error_handling("Write-Host 'hi'", "RemoteSigned");
        assert!(wrapped.starts_with("# Set execution policy for this session\n"));
        assert!(wrapped
            .contains("Set-ExecutionPolicy -ExecutionPolicy RemoteSigned -Scope Process -Force"));
        assert!(wrapped.contains("try {\nWrite-Host 'hi'\n} catch {\n    Write-Error"));
        assert!(wrapped.ends_with("    exit 1\n}"));
    }
}

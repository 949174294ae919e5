use regex::Regex;

use crate::error::{CoreError, Result};
use crate::models::ScriptType;

use super::patterns::{
    BASH_BLOCKLIST, GO_BLOCKLIST, JAVASCRIPT_BLOCKED_CALLS, JAVASCRIPT_DANGEROUS_MODULES,
    PYTHON_BLOCKED_CALLS, PYTHON_DANGEROUS_MODULES, UNIVERSAL_BLOCKLIST,
};

/// Enforces the script security rules in §6, per-language, ahead of
/// container creation. A reject here never reaches the container
/// runtime: cheaper and auditable independent of it.
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    python_import_patterns: Vec<(&'static str, Regex)>,
    javascript_require_patterns: Vec<Regex>,
}

impl SecurityValidator {
    pub fn new() -> Result<Self> {
        let python_import_patterns = PYTHON_DANGEROUS_MODULES
            .iter()
            .map(|module| {
                let regex = Regex::new(&format!(r"(?i)\b(import\s+{module}\b|from\s+{module}\b)"))
                    .map_err(|e| CoreError::Internal(format!("invalid security regex: {e}")))?;
                Ok((*module, regex))
            })
            .collect::<Result<Vec<_>>>()?;

        let javascript_require_patterns = JAVASCRIPT_DANGEROUS_MODULES
            .iter()
            .map(|module| {
                Regex::new(&format!(r#"require\(\s*['"]{module}['"]\s*\)"#))
                    .map_err(|e| CoreError::Internal(format!("invalid security regex: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            python_import_patterns,
            javascript_require_patterns,
        })
    }

    pub fn validate_script(&self, script_type: ScriptType, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(CoreError::SecurityRejected(
                "script content must not be empty".to_string(),
            ));
        }

        self.check_blocklist(content, UNIVERSAL_BLOCKLIST)?;

        match script_type {
            ScriptType::Python => self.check_python(content),
            ScriptType::Bash => self.check_bash(content),
            ScriptType::JavaScript => self.check_javascript(content),
            ScriptType::Go => self.check_go(content),
        }
    }

    fn check_blocklist(&self, content: &str, blocklist: &[&str]) -> Result<()> {
        let lowered = content.to_lowercase();
        for pattern in blocklist {
            if lowered.contains(&pattern.to_lowercase()) {
                return Err(CoreError::SecurityRejected(format!(
                    "script contains blocked pattern: {pattern}"
                )));
            }
        }
        Ok(())
    }

    fn check_python(&self, content: &str) -> Result<()> {
        self.check_blocklist(content, PYTHON_BLOCKED_CALLS)?;
        for (module, pattern) in &self.python_import_patterns {
            if let Some(found) = pattern.find(content) {
                let form = if found.as_str().to_lowercase().trim_start().starts_with("from") {
                    "from"
                } else {
                    "import"
                };
                return Err(CoreError::SecurityRejected(format!(
                    "dangerous Python import detected: {form} {module}"
                )));
            }
        }
        Ok(())
    }

    fn check_bash(&self, content: &str) -> Result<()> {
        self.check_blocklist(content, BASH_BLOCKLIST)
    }

    fn check_javascript(&self, content: &str) -> Result<()> {
        self.check_blocklist(content, JAVASCRIPT_BLOCKED_CALLS)?;
        for pattern in &self.javascript_require_patterns {
            if pattern.is_match(content) {
                return Err(CoreError::SecurityRejected(format!(
                    "script requires a disallowed module: {}",
                    pattern.as_str()
                )));
            }
        }
        Ok(())
    }

    fn check_go(&self, content: &str) -> Result<()> {
        self.check_blocklist(&content.to_lowercase(), GO_BLOCKLIST)
    }
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new().expect("security pattern regexes must compile")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SecurityValidator {
        SecurityValidator::new().unwrap()
    }

    #[test]
    fn accepts_benign_python() {
        let v = validator();
        assert!(v
            .validate_script(ScriptType::Python, "import math\nprint(math.sqrt(4))")
            .is_ok());
    }

    #[test]
    fn rejects_python_os_import() {
        let v = validator();
        let err = v
            .validate_script(ScriptType::Python, "import os\nos.system('ls')")
            .unwrap_err();
        assert!(
            err.to_string().contains("dangerous Python import detected: import os"),
            "unexpected message: {err}"
        );
    }

    #[test]
    fn rejects_python_eval() {
        let v = validator();
        assert!(v.validate_script(ScriptType::Python, "eval('1+1')").is_err());
    }

    #[test]
    fn rejects_universal_rm_rf_in_any_language() {
        let v = validator();
        assert!(v.validate_script(ScriptType::Bash, "rm -rf /").is_err());
    }

    #[test]
    fn rejects_bash_backtick_substitution() {
        let v = validator();
        assert!(v
            .validate_script(ScriptType::Bash, "echo `whoami`")
            .is_err());
    }

    #[test]
    fn accepts_bash_dollar_paren_substitution() {
        let v = validator();
        assert!(v
            .validate_script(ScriptType::Bash, "echo $(date +%s)")
            .is_ok());
    }

    #[test]
    fn rejects_javascript_fs_require() {
        let v = validator();
        assert!(v
            .validate_script(ScriptType::JavaScript, "const fs = require('fs');")
            .is_err());
    }

    #[test]
    fn accepts_javascript_safe_require() {
        let v = validator();
        assert!(v
            .validate_script(ScriptType::JavaScript, "const crypto = require('crypto');")
            .is_ok());
    }

    #[test]
    fn rejects_go_os_exec_import() {
        let v = validator();
        assert!(v
            .validate_script(ScriptType::Go, "import \"os/exec\"\nfunc main() {}")
            .is_err());
    }

    #[test]
    fn rejects_empty_script() {
        let v = validator();
        assert!(v.validate_script(ScriptType::Bash, "   ").is_err());
    }
}

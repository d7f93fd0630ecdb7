use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::process::Command;
use validator::Validate;

pub static ENV_BACKUP_OK: &str = "BACKUP_OK";
pub static ENV_BACKUP_ARTIFACT: &str = "BACKUP_ARTIFACT";

/// An external program run around a backup.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct HookCommand {
    #[validate(length(min = 1))]
    #[builder(into)]
    program: String,
    #[serde(default)]
    #[builder(default, into)]
    args: Vec<String>,
}

impl HookCommand {
    /// Runs the program to completion. A spawn failure or a non-zero exit
    /// status is an error.
    pub fn run(&self, envs: &[(&str, String)]) -> Result<()> {
        tracing::info!("Running hook {:?} {:?}", self.program, self.args);
        Command::new(&self.program)
            .args(&self.args)
            .envs(envs.iter().map(|(k, v)| (*k, v.as_str())))
            .status()
            .map_err(Error::from)
            .and_then(|status| {
                if status.success() {
                    Ok(())
                } else {
                    Err(Error::from(std::io::Error::other(format!(
                        "exited with {status}"
                    ))))
                }
            })
            .add_msg(format!("Hook {:?}", self.program))
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, Builder, Getters)]
#[getset(get = "pub")]
pub struct Hooks {
    pre_backup: Option<HookCommand>,
    post_backup: Option<HookCommand>,
}

impl Hooks {
    pub fn validate_commands(&self) -> std::result::Result<(), validator::ValidationErrors> {
        self.pre_backup.iter().chain(self.post_backup.iter()).try_for_each(Validate::validate)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> HookCommand {
        HookCommand::builder()
            .program("sh")
            .args(vec!["-c".to_string(), script.to_string()])
            .build()
    }

    #[test]
    fn test_exit_status() {
        assert!(sh("exit 0").run(&[]).is_ok());
        assert!(sh("exit 3").run(&[]).is_err());
    }

    #[test]
    fn test_environment_is_passed() {
        let hook = sh(r#"test "$BACKUP_OK" = true && test "$BACKUP_ARTIFACT" = a.zip"#);
        let envs = [
            (ENV_BACKUP_OK, "true".to_string()),
            (ENV_BACKUP_ARTIFACT, "a.zip".to_string()),
        ];
        assert!(hook.run(&envs).is_ok());
    }

    #[test]
    fn test_missing_program() {
        let hook = HookCommand::builder()
            .program("/nonexistent/definitely-not-here")
            .build();
        assert!(hook.run(&[]).is_err());
    }

    #[test]
    fn test_empty_program_invalid() {
        let hooks = Hooks::builder().pre_backup(HookCommand::builder().program("").build()).build();
        assert!(hooks.validate_commands().is_err());
    }
}

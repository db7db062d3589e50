use std::path::Path;
use std::process::Command;

use log::info;
use serde::{Deserialize, Serialize};

use super::error::InstallError;

/// External build step run inside the formatted directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for BuildCommand {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: vec![
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
                ".".to_string(),
            ],
        }
    }
}

impl BuildCommand {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Runs `command` in `dir` and waits for it. A failed build is reported with
/// its exit status and stderr; it is not retried.
pub fn install(dir: &Path, command: &BuildCommand) -> Result<(), InstallError> {
    info!(
        "building {} with {} {}",
        dir.display(),
        command.program,
        command.args.join(" ")
    );
    let output = Command::new(&command.program)
        .args(&command.args)
        .current_dir(dir)
        .output()
        .map_err(|source| InstallError::Spawn {
            program: command.program.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(InstallError::BuildFailed {
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    info!("installed {}", dir.display());
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn failing_build_reports_status_and_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let command = BuildCommand::new("sh", ["-c", "echo broken >&2; exit 3"]);
        let err = install(tmp.path(), &command).unwrap_err();
        match err {
            InstallError::BuildFailed { status, stderr } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn build_runs_inside_the_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let command = BuildCommand::new("sh", ["-c", "test -f setup.py"]);
        assert!(install(tmp.path(), &command).is_err());
        std::fs::write(tmp.path().join("setup.py"), "").unwrap();
        install(tmp.path(), &command).unwrap();
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let tmp = tempfile::tempdir().unwrap();
        let command = BuildCommand::new("lbmgen-no-such-program", Vec::<String>::new());
        assert!(matches!(
            install(tmp.path(), &command),
            Err(InstallError::Spawn { .. })
        ));
    }
}

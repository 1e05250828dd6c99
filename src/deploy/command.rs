use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

/// Failure running an external CLI.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Runs `program args...` to completion and returns its stdout.
pub(crate) fn run_command(program: &str, args: &[&str]) -> Result<String, CommandError> {
    let command = format!("{} {}", program, args.join(" "));
    debug!("Running `{}`", command);

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(CommandError::Failed {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_spawn_error() {
        let err = run_command("definitely-not-a-real-program-xyz", &["--version"]).unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}

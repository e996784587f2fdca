use std::path::PathBuf;

use tokio::process::Command;
use tracing::info;
use which::which;

use crate::config::{ArtifactLocation, RequestConfig};
use crate::errors::{AppError, Result};
use crate::secrets::Credentials;

/// Worker count handed to pg_dump; parallelism stays inside the tool.
const DUMP_JOBS: u32 = 8;
const DUMP_COMPRESSION: u32 = 1;

fn find_pg_dump_executable() -> Result<PathBuf> {
    which("pg_dump").map_err(|e| AppError::Subprocess {
        program: "pg_dump".into(),
        detail: format!("not found in PATH: {}", e),
    })
}

/// Dumps the requested database in directory format into the local dump
/// directory for this backup. The password travels only through the child
/// environment.
pub async fn dump_database(
    request: &RequestConfig,
    credentials: &Credentials,
    location: &ArtifactLocation,
) -> Result<()> {
    let pg_dump = find_pg_dump_executable()?;
    let out_dir = location.local_dir();

    info!(
        "Backing up {} database from cluster {}",
        request.database, request.endpoint
    );

    let output = Command::new(&pg_dump)
        .arg("-Fd")
        .arg(format!("--host={}", request.endpoint))
        .arg(format!("--username={}", credentials.username))
        .arg("--no-password")
        .arg(format!("--port={}", credentials.port))
        .arg("-Z")
        .arg(DUMP_COMPRESSION.to_string())
        .arg("-j")
        .arg(DUMP_JOBS.to_string())
        .arg("-f")
        .arg(&out_dir)
        .arg(&request.database)
        .env("PGPASSWORD", &credentials.password)
        .output()
        .await
        .map_err(|e| AppError::Subprocess {
            program: "pg_dump".into(),
            detail: format!("failed to spawn: {}", e),
        })?;

    check_exit("pg_dump", &output)?;

    info!(
        "Dumped {} into {}",
        request.database,
        out_dir.display()
    );
    Ok(())
}

fn check_exit(program: &str, output: &std::process::Output) -> Result<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(AppError::Subprocess {
            program: program.into(),
            detail: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Output};

    fn fake_output(code: i32, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn zero_exit_is_success() {
        assert!(check_exit("pg_dump", &fake_output(0, "")).is_ok());
    }

    #[test]
    fn non_zero_exit_carries_stderr() {
        let err = check_exit("pg_dump", &fake_output(1, "connection refused\n")).unwrap_err();
        match err {
            AppError::Subprocess { program, detail } => {
                assert_eq!(program, "pg_dump");
                assert!(detail.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

use std::path::PathBuf;

use tokio::process::Command;
use tracing::info;
use which::which;

use crate::config::{self, ArtifactLocation, RequestConfig};
use crate::errors::{AppError, Result};
use crate::secrets::Credentials;

fn find_pg_restore_executable() -> Result<PathBuf> {
    which("pg_restore").map_err(|e| AppError::Subprocess {
        program: "pg_restore".into(),
        detail: format!("not found in PATH: {}", e),
    })
}

/// Restores the downloaded directory-format dump through the
/// administrative database; `--create` recreates the target database
/// itself.
pub async fn restore_database(
    request: &RequestConfig,
    credentials: &Credentials,
    location: &ArtifactLocation,
) -> Result<()> {
    let pg_restore = find_pg_restore_executable()?;
    let dump_dir = location.local_dir();

    info!(
        "Restoring {} database to cluster {} on port {}",
        request.database, request.endpoint, credentials.port
    );

    let output = Command::new(&pg_restore)
        .arg("--create")
        .arg(format!("--host={}", request.endpoint))
        .arg(format!("--username={}", credentials.username))
        .arg("--no-password")
        .arg(format!("--port={}", credentials.port))
        .arg("-v")
        .arg("-d")
        .arg(config::ADMIN_DATABASE)
        .arg(&dump_dir)
        .env("PGPASSWORD", &credentials.password)
        .output()
        .await
        .map_err(|e| AppError::Subprocess {
            program: "pg_restore".into(),
            detail: format!("failed to spawn: {}", e),
        })?;

    if !output.status.success() {
        return Err(AppError::Subprocess {
            program: "pg_restore".into(),
            detail: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    info!(
        "Restored {} from {}",
        request.database,
        dump_dir.display()
    );
    Ok(())
}

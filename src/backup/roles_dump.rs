use std::path::PathBuf;
use std::process::Stdio;

use aws_config::SdkConfig;
use aws_sdk_s3 as s3;
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use tokio::process::Command;
use tracing::info;
use which::which;

use crate::config::{ArtifactLocation, RequestConfig};
use crate::errors::{AppError, Result};
use crate::secrets::Credentials;

fn find_pg_dumpall_executable() -> Result<PathBuf> {
    which("pg_dumpall").map_err(|e| AppError::Subprocess {
        program: "pg_dumpall".into(),
        detail: format!("not found in PATH: {}", e),
    })
}

/// Role-only metadata dump for the whole cluster, streamed straight into
/// object storage without touching local disk. The subprocess stage and
/// the upload stage form one pipeline: if either fails, the roles backup
/// failed.
pub async fn backup_roles(
    sdk_config: &SdkConfig,
    request: &RequestConfig,
    credentials: &Credentials,
    location: &ArtifactLocation,
) -> Result<()> {
    let payload = run_roles_dump(request, credentials).await?;
    upload_roles_dump(sdk_config, request, location, payload).await
}

async fn run_roles_dump(request: &RequestConfig, credentials: &Credentials) -> Result<Vec<u8>> {
    let pg_dumpall = find_pg_dumpall_executable()?;

    info!("Backing up roles from cluster {}", request.endpoint);

    let child = Command::new(&pg_dumpall)
        .arg(format!("--host={}", request.endpoint))
        .arg(format!("--username={}", credentials.username))
        .arg("--no-password")
        .arg(format!("--port={}", credentials.port))
        .arg("--no-role-passwords")
        .arg("--roles-only")
        .env("PGPASSWORD", &credentials.password)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AppError::Subprocess {
            program: "pg_dumpall".into(),
            detail: format!("failed to spawn: {}", e),
        })?;

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(AppError::Subprocess {
            program: "pg_dumpall".into(),
            detail: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(output.stdout)
}

async fn upload_roles_dump(
    sdk_config: &SdkConfig,
    request: &RequestConfig,
    location: &ArtifactLocation,
    payload: Vec<u8>,
) -> Result<()> {
    let key = location.roles_key();
    info!(
        "Uploading roles dump ({} bytes) to s3://{}/{}",
        payload.len(),
        request.bucket,
        key
    );

    let client = s3::Client::new(sdk_config);
    client
        .put_object()
        .bucket(&request.bucket)
        .key(&key)
        .body(ByteStream::from(payload))
        .send()
        .await
        .map_err(|e| {
            AppError::Transfer(format!(
                "roles dump upload to {} failed: {}",
                key,
                DisplayErrorContext(&e)
            ))
        })?;

    Ok(())
}

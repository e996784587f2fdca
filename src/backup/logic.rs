use anyhow::{Context, Result};
use aws_config::SdkConfig;
use tracing::info;

use super::{db_dump, roles_dump, s3_upload};
use crate::config::{self, ArtifactLocation, RequestConfig};
use crate::secrets::Credentials;

/// Backup sequence: dump the database, dump cluster roles, upload the dump
/// directory, then remove it locally. Steps run strictly in order; the
/// first hard failure aborts the flow.
pub async fn perform_backup_orchestration(
    sdk_config: &SdkConfig,
    request: &RequestConfig,
    credentials: &Credentials,
) -> Result<()> {
    let timestamp = config::current_timestamp();
    let location = ArtifactLocation::from_request(request, &timestamp);

    info!(
        "Backing up single database of: {}, on host: {}",
        request.database, request.endpoint
    );

    db_dump::dump_database(request, credentials, &location)
        .await
        .context("database dump failed")?;

    roles_dump::backup_roles(sdk_config, request, credentials, &location)
        .await
        .context("roles backup failed")?;

    let summary = s3_upload::upload_backup_dir(sdk_config, &request.bucket, &location)
        .await
        .context("backup upload failed")?;

    let local_dir = location.local_dir();
    if s3_upload::finalize_local_artifacts(&summary, &local_dir)
        .context("local cleanup failed")?
    {
        info!("Removed local dump directory {}", local_dir.display());
    } else {
        anyhow::bail!(
            "{} of {} backup files failed to upload; local dump kept at {}",
            summary.failed,
            summary.total(),
            local_dir.display()
        );
    }

    info!(
        "Backup of {} complete, timestamp of: {}",
        request.database, timestamp
    );
    Ok(())
}

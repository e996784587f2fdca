use anyhow::{Context, Result};
use aws_config::SdkConfig;
use tracing::{info, warn};

use super::{db_restore, s3_download};
use crate::config::{ArtifactLocation, RequestConfig};
use crate::errors::AppError;
use crate::maintenance;
use crate::secrets::Credentials;

/// Restore sequence: existence check, gated table drop, download,
/// pg_restore, vacuum. The drop only ever runs when the check positively
/// confirmed the database exists; an unreachable endpoint skips it and
/// lets the restore surface the real connectivity problem.
pub async fn perform_restore_orchestration(
    sdk_config: &SdkConfig,
    request: &RequestConfig,
    credentials: &Credentials,
) -> Result<()> {
    let timestamp = request
        .timestamp
        .as_deref()
        .context("restore requires a backup timestamp")?;
    let location = ArtifactLocation::from_request(request, timestamp);

    info!(
        "Restoring single database of: {}, on host: {}, backup timestamp of: {}",
        request.database, request.endpoint, timestamp
    );

    let existence =
        maintenance::database_exists(&request.endpoint, credentials, &request.database).await;
    match &existence {
        Ok(true) => info!("Database {} exists", request.database),
        Ok(false) => info!(
            "Database {} not present on target; skipping table drop",
            request.database
        ),
        Err(e) => warn!(
            "Could not check for existing database {}: {}; skipping table drop",
            request.database, e
        ),
    }

    if should_drop_tables(&existence) {
        match maintenance::drop_public_tables(&request.endpoint, credentials, &request.database)
            .await
        {
            Ok(count) => info!("Dropped {} tables from {}", count, request.database),
            Err(e) => warn!("Dropping tables on {} failed: {}", request.database, e),
        }
    }

    s3_download::download_backup_dir(sdk_config, &request.bucket, &location)
        .await
        .context("backup download failed")?;

    db_restore::restore_database(request, credentials, &location)
        .await
        .context("database restore failed")?;

    match maintenance::vacuum_analyze_tables(&request.endpoint, credentials, &request.database)
        .await
    {
        Ok(count) => info!("Vacuum and analyze completed for {} tables", count),
        Err(e) => warn!(
            "Post-restore vacuum on {} failed: {}",
            request.database, e
        ),
    }

    info!(
        "Restore of {} from timestamp {} complete",
        request.database, timestamp
    );
    Ok(())
}

/// The destructive drop is gated on a positive existence check; both "not
/// found" and "could not check" skip it.
fn should_drop_tables(existence: &std::result::Result<bool, AppError>) -> bool {
    matches!(existence, Ok(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_runs_only_on_a_confirmed_database() {
        assert!(should_drop_tables(&Ok(true)));
    }

    #[test]
    fn drop_is_skipped_when_the_database_is_absent() {
        assert!(!should_drop_tables(&Ok(false)));
    }

    #[test]
    fn drop_is_skipped_when_the_check_itself_failed() {
        let unreachable = Err(AppError::Connection(sqlx::Error::PoolTimedOut));
        assert!(!should_drop_tables(&unreachable));
    }
}

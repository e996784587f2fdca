mod db_dump;
mod logic;
mod roles_dump;
pub(crate) mod s3_upload;

use anyhow::Result;
use aws_config::SdkConfig;

use crate::config::RequestConfig;
use crate::secrets::Credentials;

/// Public entry point for the backup flow: dump the database, dump the
/// cluster roles, upload everything, then clean up locally.
pub async fn run_backup_flow(
    sdk_config: &SdkConfig,
    request: &RequestConfig,
    credentials: &Credentials,
) -> Result<()> {
    logic::perform_backup_orchestration(sdk_config, request, credentials).await
}

mod db_restore;
mod logic;
pub(crate) mod s3_download;

use anyhow::Result;
use aws_config::SdkConfig;

use crate::config::RequestConfig;
use crate::secrets::Credentials;

/// Public entry point for the restore flow: check for the existing
/// database, drop its tables, download the backup, restore it, vacuum.
pub async fn run_restore_flow(
    sdk_config: &SdkConfig,
    request: &RequestConfig,
    credentials: &Credentials,
) -> Result<()> {
    logic::perform_restore_orchestration(sdk_config, request, credentials).await
}

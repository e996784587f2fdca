use std::path::Path;

use aws_config::SdkConfig;
use aws_sdk_s3 as s3;
use futures::stream::{self, StreamExt};
use s3::error::DisplayErrorContext;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::ArtifactLocation;
use crate::errors::{AppError, Result};

use crate::backup::s3_upload::TRANSFER_WORKERS;

/// Downloads every object under the backup's key prefix into the local
/// dump directory. Per-object failures are logged and skipped, but the
/// restore must not run against an incomplete dump, so the final count is
/// checked against the listing before returning.
pub async fn download_backup_dir(
    sdk_config: &SdkConfig,
    bucket: &str,
    location: &ArtifactLocation,
) -> Result<usize> {
    let client = s3::Client::new(sdk_config);
    let prefix = location.object_prefix();

    info!("Downloading from s3 prefix of {}", prefix);

    let mut keys: Vec<String> = Vec::new();
    let mut pages = client
        .list_objects_v2()
        .bucket(bucket)
        .prefix(&prefix)
        .into_paginator()
        .send();
    while let Some(page) = pages.next().await {
        let page = page.map_err(|e| {
            AppError::Transfer(format!(
                "listing of {} failed: {}",
                prefix,
                DisplayErrorContext(&e)
            ))
        })?;
        for object in page.contents() {
            if let Some(key) = object.key() {
                if !key.ends_with('/') {
                    keys.push(key.to_string());
                }
            }
        }
    }

    if keys.is_empty() {
        return Err(AppError::Transfer(format!(
            "no backup objects found under {}",
            prefix
        )));
    }

    let local_dir = location.local_dir();
    tokio::fs::create_dir_all(&local_dir).await?;

    let outcomes = stream::iter(keys.iter().cloned().map(|key| {
        let client = client.clone();
        let bucket = bucket.to_string();
        let local_dir = local_dir.clone();
        async move {
            match download_object(&client, &bucket, &key, &local_dir).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Download of {} failed: {}", key, e);
                    false
                }
            }
        }
    }))
    .buffer_unordered(TRANSFER_WORKERS)
    .collect::<Vec<bool>>()
    .await;

    let downloaded = outcomes.iter().filter(|ok| **ok).count();
    verify_download_complete(keys.len(), downloaded)?;

    info!(
        "Downloaded {} backup files into {}",
        downloaded,
        local_dir.display()
    );
    Ok(downloaded)
}

async fn download_object(
    client: &s3::Client,
    bucket: &str,
    key: &str,
    local_dir: &Path,
) -> Result<()> {
    let file_name = object_file_name(key)
        .ok_or_else(|| AppError::Transfer(format!("object key {} has no file name", key)))?;
    let destination = local_dir.join(file_name);

    let mut object = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| {
            AppError::Transfer(format!(
                "get of {} failed: {}",
                key,
                DisplayErrorContext(&e)
            ))
        })?;

    let mut file = tokio::fs::File::create(&destination).await?;
    while let Some(chunk) = object
        .body
        .try_next()
        .await
        .map_err(|e| AppError::Transfer(format!("read of {} failed: {}", key, e)))?
    {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

/// Objects land in the flat dump directory under their final key segment.
fn object_file_name(key: &str) -> Option<&str> {
    key.rsplit('/').next().filter(|name| !name.is_empty())
}

fn verify_download_complete(expected: usize, downloaded: usize) -> Result<()> {
    if downloaded < expected {
        return Err(AppError::Transfer(format!(
            "incomplete download: {} of {} objects",
            downloaded, expected
        )));
    }
    Ok(())
}

use std::fs;
use std::path::{Path, PathBuf};

use aws_config::SdkConfig;
use aws_sdk_s3 as s3;
use futures::stream::{self, StreamExt};
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use s3::types::{CompletedMultipartUpload, CompletedPart};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::ArtifactLocation;
use crate::errors::{AppError, Result};

/// Files above this size go through multipart transfer. Parts must be at
/// least 5 MiB except the last.
const MULTIPART_THRESHOLD: u64 = 8 * 1024 * 1024;
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Fixed worker count for concurrent object transfers.
pub(crate) const TRANSFER_WORKERS: usize = 8;

const BACKUP_CONTENT_TYPE: &str = "application/x-compressed";

/// Outcome of one directory transfer. Per-file failures do not abort the
/// batch; they are counted here and decide whether local cleanup may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub uploaded: usize,
    pub failed: usize,
}

impl TransferSummary {
    pub fn total(&self) -> usize {
        self.uploaded + self.failed
    }

    pub fn complete(&self) -> bool {
        self.failed == 0
    }
}

/// Uploads every file under the local dump directory to the backup's key
/// prefix. Individual failures are logged and skipped.
pub async fn upload_backup_dir(
    sdk_config: &SdkConfig,
    bucket: &str,
    location: &ArtifactLocation,
) -> Result<TransferSummary> {
    let local_dir = location.local_dir();
    info!(
        "Uploading backup files from {} to s3://{}/{}",
        local_dir.display(),
        bucket,
        location.object_prefix()
    );

    let mut files: Vec<(PathBuf, String)> = Vec::new();
    for entry in WalkDir::new(&local_dir) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            let file_name = entry.file_name().to_string_lossy().to_string();
            files.push((entry.into_path(), location.key_for(&file_name)));
        }
    }

    let client = s3::Client::new(sdk_config);
    let outcomes = stream::iter(files.into_iter().map(|(path, key)| {
        let client = client.clone();
        let bucket = bucket.to_string();
        async move {
            match upload_file(&client, &bucket, &key, &path).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Upload of {} to {} failed: {}", path.display(), key, e);
                    false
                }
            }
        }
    }))
    .buffer_unordered(TRANSFER_WORKERS)
    .collect::<Vec<bool>>()
    .await;

    let uploaded = outcomes.iter().filter(|ok| **ok).count();
    let summary = TransferSummary {
        uploaded,
        failed: outcomes.len() - uploaded,
    };
    info!(
        "Uploaded {} of {} backup files",
        summary.uploaded,
        summary.total()
    );
    Ok(summary)
}

/// Removes the local dump directory once its contents are safely stored.
/// A partial upload keeps the directory so nothing is lost; returns
/// whether the cleanup ran.
pub fn finalize_local_artifacts(summary: &TransferSummary, local_dir: &Path) -> Result<bool> {
    if !summary.complete() {
        return Ok(false);
    }
    fs::remove_dir_all(local_dir)?;
    Ok(true)
}

async fn upload_file(client: &s3::Client, bucket: &str, key: &str, path: &Path) -> Result<()> {
    let size = tokio::fs::metadata(path).await?.len();
    if size > MULTIPART_THRESHOLD {
        upload_multipart(client, bucket, key, path).await
    } else {
        let body = ByteStream::from_path(path).await.map_err(|e| {
            AppError::Transfer(format!("failed to read {}: {}", path.display(), e))
        })?;
        client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(BACKUP_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                AppError::Transfer(format!(
                    "put of {} failed: {}",
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}

async fn upload_multipart(
    client: &s3::Client,
    bucket: &str,
    key: &str,
    path: &Path,
) -> Result<()> {
    let created = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(key)
        .content_type(BACKUP_CONTENT_TYPE)
        .send()
        .await
        .map_err(|e| {
            AppError::Transfer(format!(
                "multipart create for {} failed: {}",
                key,
                DisplayErrorContext(&e)
            ))
        })?;
    let upload_id = created
        .upload_id()
        .ok_or_else(|| AppError::Transfer(format!("no upload id returned for {}", key)))?
        .to_string();

    let file = tokio::fs::File::open(path).await?;
    let mut reader = tokio::io::BufReader::new(file);
    let mut part_number: i32 = 1;
    let mut completed_parts = Vec::new();

    loop {
        let mut buffer = vec![0u8; PART_SIZE];
        let mut filled = 0;
        while filled < buffer.len() {
            let n = reader.read(&mut buffer[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        buffer.truncate(filled);

        match client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .part_number(part_number)
            .body(ByteStream::from(buffer))
            .send()
            .await
        {
            Ok(part) => {
                completed_parts.push(
                    CompletedPart::builder()
                        .part_number(part_number)
                        .e_tag(part.e_tag().unwrap_or_default())
                        .build(),
                );
            }
            Err(e) => {
                // Leave no half-open upload behind; the part itself is not retried.
                let _ = client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                return Err(AppError::Transfer(format!(
                    "part {} of {} failed: {}",
                    part_number,
                    key,
                    DisplayErrorContext(&e)
                )));
            }
        }
        part_number += 1;
    }

    client
        .complete_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(&upload_id)
        .multipart_upload(
            CompletedMultipartUpload::builder()
                .set_parts(Some(completed_parts))
                .build(),
        )
        .send()
        .await
        .map_err(|e| {
            AppError::Transfer(format!(
                "multipart complete for {} failed: {}",
                key,
                DisplayErrorContext(&e)
            ))
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populate(dir: &Path, count: usize) {
        for i in 0..count {
            fs::write(dir.join(format!("{}.dat", i)), b"chunk").unwrap();
        }
    }

    #[test]
    fn cleanup_runs_only_after_a_complete_upload() {
        let scratch = tempfile::tempdir().unwrap();
        let dump_dir = scratch.path().join("clu02-db3-20260101T000000Z");
        fs::create_dir(&dump_dir).unwrap();
        populate(&dump_dir, 5);

        // One of five files failed: the directory must survive.
        let partial = TransferSummary {
            uploaded: 4,
            failed: 1,
        };
        assert!(!finalize_local_artifacts(&partial, &dump_dir).unwrap());
        assert!(dump_dir.exists());

        let complete = TransferSummary {
            uploaded: 5,
            failed: 0,
        };
        assert!(finalize_local_artifacts(&complete, &dump_dir).unwrap());
        assert!(!dump_dir.exists());
    }

    #[test]
    fn summary_accounting() {
        let summary = TransferSummary {
            uploaded: 4,
            failed: 1,
        };
        assert_eq!(summary.total(), 5);
        assert!(!summary.complete());
        assert!(TransferSummary {
            uploaded: 0,
            failed: 0
        }
        .complete());
    }
}

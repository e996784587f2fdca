use std::fmt;
use std::path::{Path, PathBuf};

use aws_config::{BehaviorVersion, Region, SdkConfig};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::errors::{AppError, Result};

/// Namespace tag distinguishing invocation categories within the storage
/// key scheme. Scheduled invocations would use a different tag; every
/// current caller is manual.
pub const BACKUP_TYPE: &str = "manual";

/// Administrative database used for `pg_restore --create` connections.
pub const ADMIN_DATABASE: &str = "postgres";

/// Root under which dump directories are created and consumed.
pub const LOCAL_WORK_ROOT: &str = "/tmp";

/// Relative path of the discovery record consumed by the provisioning step.
pub const DISCOVERY_OUTPUT_PATH: &str = "tmp/db.json";

pub const DEFAULT_REGION: &str = "us-east-1";

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Parser)]
#[command(name = "auroraops", version, about = "Aurora cluster backup/restore operations")]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a backup or restore against a cluster endpoint
    Operate(OperateArgs),
    /// Resolve the cluster endpoint, availability zone and subnet
    Discover(DiscoverArgs),
    /// Submit the operation to a remote instance and wait for completion
    Dispatch(DispatchArgs),
}

#[derive(Debug, Clone, Args)]
pub struct OperateArgs {
    /// Database name
    #[arg(short, long)]
    pub database: String,

    /// Operation type
    #[arg(short, long, value_enum)]
    pub operation: OperationKind,

    /// Bucket holding backup artifacts
    #[arg(short, long)]
    pub bucket: String,

    /// Secret id for the cluster credentials
    #[arg(short, long)]
    pub secret: String,

    /// Cluster name
    #[arg(short, long)]
    pub cluster: String,

    /// Cluster endpoint to connect to
    #[arg(short, long)]
    pub endpoint: String,

    /// AWS region for the cluster
    #[arg(short, long, default_value = DEFAULT_REGION)]
    pub region: String,

    /// Backup timestamp to restore
    #[arg(short, long, required_if_eq("operation", "restore"))]
    pub timestamp: Option<String>,
}

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// Cluster name
    #[arg(short, long)]
    pub cluster: String,

    /// Operation the endpoint is resolved for
    #[arg(short, long, value_enum)]
    pub operation: OperationKind,

    /// AWS region for the cluster
    #[arg(short, long, default_value = DEFAULT_REGION)]
    pub region: String,
}

#[derive(Debug, Args)]
pub struct DispatchArgs {
    #[command(flatten)]
    pub request: OperateArgs,

    /// EC2 instance id to run the operation on
    #[arg(short, long)]
    pub instance: String,

    /// Maximum seconds to wait for the remote command to finish
    #[arg(long, default_value_t = 1800)]
    pub max_wait: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OperationKind {
    Backup,
    Restore,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Backup => write!(f, "backup"),
            OperationKind::Restore => write!(f, "restore"),
        }
    }
}

/// Immutable description of one backup/restore invocation. Built once from
/// CLI input and passed through every operation unchanged.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub cluster: String,
    pub database: String,
    pub operation: OperationKind,
    pub bucket: String,
    pub secret_id: String,
    pub endpoint: String,
    pub region: String,
    pub timestamp: Option<String>,
}

impl RequestConfig {
    pub fn from_args(args: &OperateArgs) -> Result<Self> {
        if args.operation == OperationKind::Restore && args.timestamp.is_none() {
            return Err(AppError::InvalidInput(
                "restore requires --timestamp of the backup to restore".into(),
            ));
        }
        Ok(RequestConfig {
            cluster: args.cluster.clone(),
            database: args.database.clone(),
            operation: args.operation,
            bucket: args.bucket.clone(),
            secret_id: args.secret.clone(),
            endpoint: args.endpoint.clone(),
            region: args.region.clone(),
            timestamp: args.timestamp.clone(),
        })
    }
}

/// Where the artifacts of one backup live, both locally and in object
/// storage. Upload derives this from the current timestamp, restore from
/// the supplied one; both go through the same derivation so a restore reads
/// back exactly what the backup wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    cluster: String,
    database: String,
    timestamp: String,
}

impl ArtifactLocation {
    pub fn new(cluster: &str, database: &str, timestamp: &str) -> Self {
        ArtifactLocation {
            cluster: cluster.to_string(),
            database: database.to_string(),
            timestamp: timestamp.to_string(),
        }
    }

    pub fn from_request(request: &RequestConfig, timestamp: &str) -> Self {
        Self::new(&request.cluster, &request.database, timestamp)
    }

    /// Key prefix all data files of this backup share.
    pub fn object_prefix(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            BACKUP_TYPE, self.cluster, self.database, self.timestamp
        )
    }

    pub fn key_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.object_prefix(), file_name)
    }

    /// Fixed key of the cluster-wide role dump taken alongside this backup.
    pub fn roles_key(&self) -> String {
        format!(
            "{}/{}/roles/{}/roles.dump",
            BACKUP_TYPE, self.cluster, self.timestamp
        )
    }

    pub fn local_dir(&self) -> PathBuf {
        self.local_dir_under(Path::new(LOCAL_WORK_ROOT))
    }

    pub fn local_dir_under(&self, root: &Path) -> PathBuf {
        root.join(format!(
            "{}-{}-{}",
            self.cluster, self.database, self.timestamp
        ))
    }
}

/// UTC timestamp naming a fresh backup, e.g. `20260806T114500Z`.
pub fn current_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

pub async fn load_sdk_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    fn sample_args(operation: OperationKind, timestamp: Option<&str>) -> OperateArgs {
        OperateArgs {
            database: "db3".to_string(),
            operation,
            bucket: "backup-aurora-prod-us-east-1".to_string(),
            secret: "/aurora/clu02/postgres".to_string(),
            cluster: "clu02".to_string(),
            endpoint: "clu02.cluster-ro-example.us-east-1.rds.amazonaws.com".to_string(),
            region: DEFAULT_REGION.to_string(),
            timestamp: timestamp.map(str::to_string),
        }
    }

    #[test]
    fn restore_request_requires_timestamp() {
        let err = RequestConfig::from_args(&sample_args(OperationKind::Restore, None)).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let ok = RequestConfig::from_args(&sample_args(
            OperationKind::Restore,
            Some("20260101T000000Z"),
        ));
        assert!(ok.is_ok());
    }

    #[test]
    fn backup_request_needs_no_timestamp() {
        let request = RequestConfig::from_args(&sample_args(OperationKind::Backup, None)).unwrap();
        assert_eq!(request.cluster, "clu02");
        assert_eq!(request.timestamp, None);
    }

    #[test]
    fn artifact_location_layout() {
        let location = ArtifactLocation::new("clu02", "db3", "20260101T000000Z");
        assert_eq!(location.object_prefix(), "manual/clu02/db3/20260101T000000Z");
        assert_eq!(
            location.key_for("toc.dat"),
            "manual/clu02/db3/20260101T000000Z/toc.dat"
        );
        assert_eq!(
            location.roles_key(),
            "manual/clu02/roles/20260101T000000Z/roles.dump"
        );
        assert_eq!(
            location.local_dir(),
            PathBuf::from("/tmp/clu02-db3-20260101T000000Z")
        );
    }

    #[test]
    fn upload_and_download_prefixes_round_trip() {
        let request = RequestConfig::from_args(&sample_args(OperationKind::Backup, None)).unwrap();
        let timestamp = current_timestamp();

        let written = ArtifactLocation::from_request(&request, &timestamp);
        let read_back = ArtifactLocation::new("clu02", "db3", &timestamp);

        assert_eq!(written, read_back);
        assert_eq!(written.object_prefix(), read_back.object_prefix());
        assert_eq!(written.local_dir(), read_back.local_dir());
    }

    #[test]
    fn timestamps_are_utc_compact() {
        let timestamp = current_timestamp();
        assert_eq!(timestamp.len(), 16);
        assert!(timestamp.ends_with('Z'));
        assert_eq!(timestamp.as_bytes()[8], b'T');
    }
}

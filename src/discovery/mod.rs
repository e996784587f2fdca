use std::fs;
use std::path::Path;

use aws_config::SdkConfig;
use aws_sdk_rds as rds;
use rds::error::DisplayErrorContext;
use rds::types::{DbClusterMember, Subnet};
use serde::Serialize;
use tracing::info;

use crate::config::OperationKind;
use crate::errors::{AppError, Result};

/// Connection details for the cluster member an operation should run
/// against: the reader side for backups, the writer for restores.
#[derive(Debug, Clone)]
pub struct ClusterTarget {
    pub endpoint: String,
    pub instance_id: String,
    pub az: String,
    pub subnet_id: String,
    pub port: i32,
}

/// JSON record consumed by the downstream provisioning step.
#[derive(Serialize)]
struct DiscoveryRecord<'a> {
    az: &'a str,
    endpoint: &'a str,
    subnet_id: &'a str,
}

pub async fn resolve_cluster_target(
    sdk_config: &SdkConfig,
    cluster_id: &str,
    operation: OperationKind,
) -> Result<ClusterTarget> {
    let client = rds::Client::new(sdk_config);

    let clusters = client
        .describe_db_clusters()
        .db_cluster_identifier(cluster_id)
        .send()
        .await
        .map_err(|e| {
            AppError::Discovery(format!(
                "failed to describe cluster {}: {}",
                cluster_id,
                DisplayErrorContext(&e)
            ))
        })?;

    let cluster = clusters
        .db_clusters()
        .first()
        .ok_or_else(|| AppError::Discovery(format!("cluster {} not found", cluster_id)))?;

    let port = cluster.port().unwrap_or(5432);

    let endpoint = match operation {
        OperationKind::Backup => cluster.reader_endpoint(),
        OperationKind::Restore => cluster.endpoint(),
    }
    .ok_or_else(|| {
        AppError::Discovery(format!(
            "cluster {} exposes no {} endpoint",
            cluster_id, operation
        ))
    })?
    .to_string();

    let instance_id = select_member(cluster.db_cluster_members(), operation)
        .ok_or_else(|| {
            AppError::Discovery(format!(
                "cluster {} has no member suitable for {}",
                cluster_id, operation
            ))
        })?
        .to_string();

    let (az, subnet_id) = resolve_instance_placement(&client, &instance_id).await?;

    info!(
        "Found {} endpoint of: {}, port {}, instance: {}, in az: {}",
        operation, endpoint, port, instance_id, az
    );

    Ok(ClusterTarget {
        endpoint,
        instance_id,
        az,
        subnet_id,
        port,
    })
}

/// Backups run against a replica, restores against the primary.
fn select_member(members: &[DbClusterMember], operation: OperationKind) -> Option<&str> {
    let want_writer = operation == OperationKind::Restore;
    members
        .iter()
        .find(|member| member.is_cluster_writer().unwrap_or(false) == want_writer)
        .and_then(|member| member.db_instance_identifier())
}

async fn resolve_instance_placement(
    client: &rds::Client,
    instance_id: &str,
) -> Result<(String, String)> {
    let instances = client
        .describe_db_instances()
        .db_instance_identifier(instance_id)
        .send()
        .await
        .map_err(|e| {
            AppError::Discovery(format!(
                "failed to describe instance {}: {}",
                instance_id,
                DisplayErrorContext(&e)
            ))
        })?;

    let instance = instances
        .db_instances()
        .first()
        .ok_or_else(|| AppError::Discovery(format!("instance {} not found", instance_id)))?;

    let az = instance
        .availability_zone()
        .ok_or_else(|| {
            AppError::Discovery(format!("instance {} reports no availability zone", instance_id))
        })?
        .to_string();

    let subnets = instance
        .db_subnet_group()
        .map(|group| group.subnets())
        .unwrap_or_default();

    let subnet_id = subnet_in_zone(&az, subnets).ok_or_else(|| {
        AppError::Discovery(format!(
            "instance {} has no subnet in zone {}",
            instance_id, az
        ))
    })?;

    Ok((az, subnet_id))
}

/// Picks the subnet whose availability-zone field equals the target zone.
fn subnet_in_zone(az: &str, subnets: &[Subnet]) -> Option<String> {
    subnets
        .iter()
        .find(|subnet| {
            subnet
                .subnet_availability_zone()
                .and_then(|zone| zone.name())
                == Some(az)
        })
        .and_then(|subnet| subnet.subnet_identifier())
        .map(str::to_string)
}

pub fn write_discovery_output(path: &Path, target: &ClusterTarget) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let record = DiscoveryRecord {
        az: &target.az,
        endpoint: &target.endpoint,
        subnet_id: &target.subnet_id,
    };
    fs::write(path, serde_json::to_string(&record)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rds::types::AvailabilityZone;

    fn member(id: &str, writer: bool) -> DbClusterMember {
        DbClusterMember::builder()
            .db_instance_identifier(id)
            .is_cluster_writer(writer)
            .build()
    }

    fn subnet(id: &str, az: &str) -> Subnet {
        Subnet::builder()
            .subnet_identifier(id)
            .subnet_availability_zone(AvailabilityZone::builder().name(az).build())
            .build()
    }

    #[test]
    fn backup_selects_a_non_writer_member() {
        let members = vec![member("writer-1", true), member("reader-1", false)];
        assert_eq!(
            select_member(&members, OperationKind::Backup),
            Some("reader-1")
        );
    }

    #[test]
    fn restore_selects_the_writer_member() {
        let members = vec![member("reader-1", false), member("writer-1", true)];
        assert_eq!(
            select_member(&members, OperationKind::Restore),
            Some("writer-1")
        );
    }

    #[test]
    fn no_member_matches_in_single_role_cluster() {
        let members = vec![member("writer-1", true)];
        assert_eq!(select_member(&members, OperationKind::Backup), None);
    }

    #[test]
    fn subnet_match_is_structural_not_substring() {
        let subnets = vec![
            subnet("subnet-b", "us-east-1b"),
            subnet("subnet-ab", "us-east-1ab"),
            subnet("subnet-a", "us-east-1a"),
        ];
        // "us-east-1a" is a substring of "us-east-1ab"; only the exact zone
        // may match.
        assert_eq!(subnet_in_zone("us-east-1a", &subnets), Some("subnet-a".into()));
        assert_eq!(subnet_in_zone("us-east-1c", &subnets), None);
    }

    #[test]
    fn discovery_output_is_the_provisioning_contract() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmp/db.json");
        let target = ClusterTarget {
            endpoint: "clu02.cluster-ro-example.us-east-1.rds.amazonaws.com".into(),
            instance_id: "clu02-instance-2".into(),
            az: "us-east-1a".into(),
            subnet_id: "subnet-a".into(),
            port: 5432,
        };

        write_discovery_output(&path, &target).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["az"], "us-east-1a");
        assert_eq!(
            value["endpoint"],
            "clu02.cluster-ro-example.us-east-1.rds.amazonaws.com"
        );
        assert_eq!(value["subnet_id"], "subnet-a");
    }
}

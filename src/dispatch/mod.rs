use std::fmt;
use std::future::Future;
use std::time::Duration;

use aws_config::SdkConfig;
use aws_sdk_ssm as ssm;
use ssm::error::DisplayErrorContext;
use ssm::types::{CloudWatchOutputConfig, CommandInvocationStatus};
use tokio::time::Instant;
use tracing::info;

use crate::config::RequestConfig;
use crate::errors::{AppError, Result};

const RUN_REMOTE_SCRIPT_DOCUMENT: &str = "AWS-RunRemoteScript";
const REMOTE_SCRIPT_KEY: &str = "ec2-scripts/prepare-execute.sh";
const COMMAND_LOG_GROUP: &str = "/aws/ssm/aurora-backup";

/// The remote service reports the invocation a short moment after
/// submission; polling immediately races command registration.
const SUBMIT_SETTLE_DELAY: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Status of one remote command invocation, owned by the dispatcher for
/// the lifetime of its polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Cancelled,
    TimedOut,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandStatus::Success
                | CommandStatus::Failed
                | CommandStatus::Cancelled
                | CommandStatus::TimedOut
        )
    }

    fn from_sdk(status: Option<&CommandInvocationStatus>) -> Self {
        match status {
            Some(CommandInvocationStatus::Success) => CommandStatus::Success,
            Some(CommandInvocationStatus::Failed) => CommandStatus::Failed,
            Some(CommandInvocationStatus::Cancelled) => CommandStatus::Cancelled,
            Some(CommandInvocationStatus::TimedOut) => CommandStatus::TimedOut,
            Some(CommandInvocationStatus::InProgress)
            | Some(CommandInvocationStatus::Cancelling) => CommandStatus::InProgress,
            _ => CommandStatus::Pending,
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CommandStatus::Pending => "Pending",
            CommandStatus::InProgress => "InProgress",
            CommandStatus::Success => "Success",
            CommandStatus::Failed => "Failed",
            CommandStatus::Cancelled => "Cancelled",
            CommandStatus::TimedOut => "TimedOut",
        };
        write!(f, "{}", label)
    }
}

/// Submits the operate workflow as a remote script invocation on
/// `instance` and waits for a terminal status, at most `max_wait`.
pub async fn run_dispatch_flow(
    sdk_config: &SdkConfig,
    request: &RequestConfig,
    instance: &str,
    max_wait: Duration,
) -> Result<CommandStatus> {
    let client = ssm::Client::new(sdk_config);

    let command_line = build_command_line(request);
    let source_info = script_source_info(&request.bucket);
    info!("Submitting remote command: {}", command_line);

    let submitted = client
        .send_command()
        .instance_ids(instance)
        .document_name(RUN_REMOTE_SCRIPT_DOCUMENT)
        .parameters("sourceType", vec!["S3".to_string()])
        .parameters("sourceInfo", vec![source_info])
        .parameters("commandLine", vec![command_line])
        .cloud_watch_output_config(
            CloudWatchOutputConfig::builder()
                .cloud_watch_log_group_name(COMMAND_LOG_GROUP)
                .cloud_watch_output_enabled(true)
                .build(),
        )
        .send()
        .await
        .map_err(|e| {
            AppError::Dispatch(format!(
                "failed to submit command to instance {}: {}",
                instance,
                DisplayErrorContext(&e)
            ))
        })?;

    let command_id = submitted
        .command()
        .and_then(|command| command.command_id())
        .ok_or_else(|| AppError::Dispatch("submission returned no command id".into()))?
        .to_string();

    info!("Remote command in progress, ID: {}", command_id);
    tokio::time::sleep(SUBMIT_SETTLE_DELAY).await;

    let status = poll_until_terminal(POLL_INTERVAL, max_wait, || {
        let client = client.clone();
        let command_id = command_id.clone();
        let instance = instance.to_string();
        async move {
            let invocation = client
                .get_command_invocation()
                .command_id(&command_id)
                .instance_id(&instance)
                .send()
                .await
                .map_err(|e| {
                    AppError::Dispatch(format!(
                        "failed to poll command {}: {}",
                        command_id,
                        DisplayErrorContext(&e)
                    ))
                })?;
            Ok(CommandStatus::from_sdk(invocation.status()))
        }
    })
    .await?;

    info!("Remote command complete, ID: {}, status of: {}", command_id, status);
    Ok(status)
}

/// Polls `poll` on a fixed interval until it reports a terminal status,
/// failing once `max_wait` has elapsed without one.
pub async fn poll_until_terminal<F, Fut>(
    interval: Duration,
    max_wait: Duration,
    mut poll: F,
) -> Result<CommandStatus>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<CommandStatus>>,
{
    let deadline = Instant::now() + max_wait;
    loop {
        let status = poll().await?;
        if status.is_terminal() {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            return Err(AppError::Dispatch(format!(
                "command still {} after {}s",
                status,
                max_wait.as_secs()
            )));
        }
        tokio::time::sleep(interval).await;
    }
}

/// Command line handed to the remote preparation script; the timestamp
/// slot is filled with `notime` for operations that carry none.
fn build_command_line(request: &RequestConfig) -> String {
    format!(
        "prepare-execute.sh -c {} -d {} -o {} -b {} -s {} -e {} -r {} -t {}",
        request.cluster,
        request.database,
        request.operation,
        request.bucket,
        request.secret_id,
        request.endpoint,
        request.region,
        request.timestamp.as_deref().unwrap_or("notime")
    )
}

fn script_source_info(bucket: &str) -> String {
    format!(
        "{{\"path\": \"https://{}.s3.amazonaws.com/{}\"}}",
        bucket, REMOTE_SCRIPT_KEY
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use crate::config::OperationKind;

    fn sample_request(timestamp: Option<&str>) -> RequestConfig {
        RequestConfig {
            cluster: "clu02".into(),
            database: "db3".into(),
            operation: OperationKind::Backup,
            bucket: "backup-aurora-prod-us-east-1".into(),
            secret_id: "/aurora/clu02/postgres".into(),
            endpoint: "clu02.cluster-ro-example.us-east-1.rds.amazonaws.com".into(),
            region: "us-east-1".into(),
            timestamp: timestamp.map(str::to_string),
        }
    }

    #[test]
    fn command_line_embeds_all_parameters() {
        let line = build_command_line(&sample_request(None));
        assert_eq!(
            line,
            "prepare-execute.sh -c clu02 -d db3 -o backup -b backup-aurora-prod-us-east-1 \
             -s /aurora/clu02/postgres \
             -e clu02.cluster-ro-example.us-east-1.rds.amazonaws.com -r us-east-1 -t notime"
        );
    }

    #[test]
    fn command_line_carries_the_restore_timestamp() {
        let line = build_command_line(&sample_request(Some("20260101T000000Z")));
        assert!(line.ends_with("-t 20260101T000000Z"));
    }

    #[test]
    fn script_source_points_into_the_bucket() {
        assert_eq!(
            script_source_info("backup-bucket"),
            "{\"path\": \"https://backup-bucket.s3.amazonaws.com/ec2-scripts/prepare-execute.sh\"}"
        );
    }

    #[test]
    fn terminal_states_are_exactly_the_four() {
        assert!(CommandStatus::Success.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
        assert!(CommandStatus::Cancelled.is_terminal());
        assert!(CommandStatus::TimedOut.is_terminal());
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(!CommandStatus::InProgress.is_terminal());
    }

    fn scripted_poller(
        statuses: Vec<CommandStatus>,
    ) -> (
        Arc<Mutex<VecDeque<CommandStatus>>>,
        Arc<Mutex<usize>>,
    ) {
        (
            Arc::new(Mutex::new(statuses.into())),
            Arc::new(Mutex::new(0)),
        )
    }

    #[tokio::test]
    async fn polling_stops_at_the_first_terminal_state() {
        let (script, calls) = scripted_poller(vec![
            CommandStatus::Pending,
            CommandStatus::InProgress,
            CommandStatus::Failed,
            CommandStatus::Success,
        ]);

        let status = poll_until_terminal(Duration::ZERO, Duration::from_secs(60), || {
            let script = script.clone();
            let calls = calls.clone();
            async move {
                *calls.lock().unwrap() += 1;
                Ok(script.lock().unwrap().pop_front().unwrap())
            }
        })
        .await
        .unwrap();

        assert_eq!(status, CommandStatus::Failed);
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn polling_gives_up_at_the_deadline() {
        let err = poll_until_terminal(Duration::ZERO, Duration::ZERO, || async {
            Ok(CommandStatus::InProgress)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Dispatch(_)));
    }

    #[tokio::test]
    async fn polling_surfaces_poll_errors() {
        let err = poll_until_terminal(Duration::ZERO, Duration::from_secs(60), || async {
            Err(AppError::Dispatch("invocation does not exist".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Dispatch(_)));
    }

    #[test]
    fn sdk_statuses_map_onto_the_taxonomy() {
        assert_eq!(
            CommandStatus::from_sdk(Some(&CommandInvocationStatus::Success)),
            CommandStatus::Success
        );
        assert_eq!(
            CommandStatus::from_sdk(Some(&CommandInvocationStatus::Cancelling)),
            CommandStatus::InProgress
        );
        assert_eq!(
            CommandStatus::from_sdk(Some(&CommandInvocationStatus::Pending)),
            CommandStatus::Pending
        );
        assert_eq!(CommandStatus::from_sdk(None), CommandStatus::Pending);
    }
}

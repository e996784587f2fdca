use std::fmt;

use aws_config::SdkConfig;
use aws_sdk_secretsmanager as secretsmanager;
use secretsmanager::error::DisplayErrorContext;
use serde_json::Value;

use crate::errors::{AppError, Result};

/// Cluster credentials resolved once per invocation and held in memory
/// only. The password never appears on a command line or in logs; it
/// reaches subprocesses via the child environment.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub port: u16,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// Fetches the credential bundle for `secret_id`. Secret failures are not
/// transient, so they surface immediately without retry.
pub async fn resolve_credentials(sdk_config: &SdkConfig, secret_id: &str) -> Result<Credentials> {
    let client = secretsmanager::Client::new(sdk_config);

    let response = client
        .get_secret_value()
        .secret_id(secret_id)
        .send()
        .await
        .map_err(|e| {
            AppError::SecretAccess(format!(
                "failed to fetch secret {}: {}",
                secret_id,
                DisplayErrorContext(&e)
            ))
        })?;

    let payload = if let Some(text) = response.secret_string() {
        text.as_bytes().to_vec()
    } else if let Some(blob) = response.secret_binary() {
        blob.as_ref().to_vec()
    } else {
        return Err(AppError::SecretAccess(format!(
            "secret {} carries neither a string nor a binary payload",
            secret_id
        )));
    };

    parse_secret_payload(&payload)
}

fn parse_secret_payload(payload: &[u8]) -> Result<Credentials> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| AppError::SecretAccess(format!("secret payload is not valid JSON: {}", e)))?;

    let username = required_str(&value, "username")?;
    let password = required_str(&value, "password")?;

    // Managed secrets store the port as either a number or a string.
    let port = match value.get("port") {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| AppError::SecretAccess("secret field 'port' is out of range".into()))?,
        Some(Value::String(s)) => s
            .parse::<u16>()
            .map_err(|_| AppError::SecretAccess("secret field 'port' is not a valid port".into()))?,
        _ => {
            return Err(AppError::SecretAccess(
                "secret payload is missing field 'port'".into(),
            ));
        }
    };

    Ok(Credentials {
        username,
        password,
        port,
    })
}

fn required_str(value: &Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::SecretAccess(format!("secret payload is missing field '{}'", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_payload_with_numeric_port() {
        let creds = parse_secret_payload(
            br#"{"username": "postgres", "password": "hunter2", "port": 5432}"#,
        )
        .unwrap();
        assert_eq!(creds.username, "postgres");
        assert_eq!(creds.password, "hunter2");
        assert_eq!(creds.port, 5432);
    }

    #[test]
    fn parses_payload_with_string_port() {
        let creds = parse_secret_payload(
            br#"{"username": "postgres", "password": "hunter2", "port": "5432"}"#,
        )
        .unwrap();
        assert_eq!(creds.port, 5432);
    }

    #[test]
    fn rejects_missing_fields() {
        let err = parse_secret_payload(br#"{"username": "postgres"}"#).unwrap_err();
        assert!(matches!(err, AppError::SecretAccess(_)));
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn rejects_non_json_payload() {
        let err = parse_secret_payload(b"not-json").unwrap_err();
        assert!(matches!(err, AppError::SecretAccess(_)));
    }

    #[test]
    fn rejects_out_of_range_port() {
        let err = parse_secret_payload(
            br#"{"username": "u", "password": "p", "port": 99999}"#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::SecretAccess(_)));
    }

    #[test]
    fn debug_output_redacts_password() {
        let creds = Credentials {
            username: "postgres".into(),
            password: "hunter2".into(),
            port: 5432,
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}

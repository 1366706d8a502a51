//! Temporary session credentials and the timestamp format used to persist their expiry.

use anyhow::{Context, Result};
use aws_sdk_sts::types;
use chrono::{DateTime, FixedOffset, Utc};

/// Format of `aws_session_expiration` values written to the credentials file,
/// e.g. `2026-10-18 21:04:05+0000`.
pub const EXPIRATION_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

/// Credentials returned by STS `GetSessionToken`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl SessionCredentials {
    pub fn formatted_expiration(&self) -> String {
        self.expiration.format(EXPIRATION_FORMAT).to_string()
    }
}

impl TryFrom<&types::Credentials> for SessionCredentials {
    type Error = anyhow::Error;

    fn try_from(credentials: &types::Credentials) -> Result<Self> {
        Ok(Self {
            access_key_id: credentials.access_key_id().to_owned(),
            secret_access_key: credentials.secret_access_key().to_owned(),
            session_token: credentials.session_token().to_owned(),
            expiration: to_utc(credentials.expiration())?,
        })
    }
}

fn to_utc(timestamp: &aws_smithy_types::DateTime) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
        .with_context(|| format!("Session expiration out of range: {}s", timestamp.secs()))
}

/// Parses a stored expiration. Accepts the format this tool writes as well as RFC 3339,
/// which other credential helpers tend to use.
pub fn parse_expiration(value: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    DateTime::parse_from_str(value, EXPIRATION_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn formats_expiration_with_numeric_offset() {
        let credentials = SessionCredentials {
            access_key_id: "ASIAEXAMPLE".into(),
            secret_access_key: "secret".into(),
            session_token: "token".into(),
            expiration: Utc.with_ymd_and_hms(2026, 10, 18, 21, 4, 5).unwrap(),
        };

        assert_eq!(credentials.formatted_expiration(), "2026-10-18 21:04:05+0000");
    }

    #[test]
    fn parses_written_format_and_rfc3339() {
        let expected = Utc.with_ymd_and_hms(2026, 10, 18, 21, 4, 5).unwrap();

        assert_eq!(parse_expiration("2026-10-18 21:04:05+0000").unwrap(), expected);
        assert_eq!(parse_expiration("2026-10-18T23:04:05+02:00").unwrap(), expected);
        assert_eq!(parse_expiration("2026-10-18T21:04:05Z").unwrap(), expected);
    }

    #[test]
    fn rejects_garbage_expiration() {
        assert!(parse_expiration("tomorrow").is_err());
        assert!(parse_expiration("2026-10-18 21:04:05").is_err());
    }

    #[test]
    fn converts_sts_credentials() {
        let sts = types::Credentials::builder()
            .access_key_id("ASIAEXAMPLE")
            .secret_access_key("secret")
            .session_token("token")
            .expiration(aws_smithy_types::DateTime::from_secs(1_792_357_445))
            .build()
            .unwrap();

        let credentials = SessionCredentials::try_from(&sts).unwrap();

        assert_eq!(credentials.access_key_id, "ASIAEXAMPLE");
        assert_eq!(credentials.secret_access_key, "secret");
        assert_eq!(credentials.session_token, "token");
        assert_eq!(credentials.expiration.timestamp(), 1_792_357_445);
    }
}

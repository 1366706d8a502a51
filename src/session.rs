//! Remote half of the refresh: who am I, which MFA device do I have, and the
//! `GetSessionToken` exchange itself.

use anyhow::{Context, Result};
use aws_config::{Region, SdkConfig};
use log::{debug, info};

use crate::{credentials::SessionCredentials, error::MfaError};

/// Region used for the STS/IAM clients when the profile doesn't configure one.
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// The three AWS calls the refresh depends on.
pub trait SessionService {
    /// ARN of the identity behind the source profile.
    async fn caller_arn(&self) -> Result<String>;

    /// Serial numbers of the MFA devices registered for `user_name`.
    async fn mfa_devices(&self, user_name: &str) -> Result<Vec<String>>;

    async fn session_token(
        &self,
        serial_number: &str,
        token_code: &str,
        duration: Option<u32>,
    ) -> Result<SessionCredentials>;
}

/// [`SessionService`] backed by the STS and IAM SDK clients.
pub struct AwsSessionService {
    sts: aws_sdk_sts::Client,
    iam: aws_sdk_iam::Client,
}

impl AwsSessionService {
    /// Builds clients authenticated as `profile`. Nothing is sent over the network until
    /// one of the [`SessionService`] methods is awaited.
    pub async fn for_profile(profile: &str) -> Self {
        let config = load_config(profile).await;
        Self {
            sts: aws_sdk_sts::Client::new(&config),
            iam: aws_sdk_iam::Client::new(&config),
        }
    }
}

async fn load_config(profile: &str) -> SdkConfig {
    let config = aws_config::from_env().profile_name(profile).load().await;
    if let Some(region) = config.region() {
        debug!("Using region {region}");
        return config;
    }

    debug!("No region configured for profile {profile}, using {DEFAULT_AWS_REGION}");
    aws_config::from_env()
        .profile_name(profile)
        .region(Region::new(DEFAULT_AWS_REGION))
        .load()
        .await
}

impl SessionService for AwsSessionService {
    async fn caller_arn(&self) -> Result<String> {
        self.sts
            .get_caller_identity()
            .send()
            .await
            .context("Failed to get caller identity")?
            .arn()
            .map(str::to_owned)
            .context("No ARN returned for caller identity")
    }

    async fn mfa_devices(&self, user_name: &str) -> Result<Vec<String>> {
        let output = self
            .iam
            .list_mfa_devices()
            .user_name(user_name)
            .send()
            .await
            .with_context(|| format!("Failed to list MFA devices of {user_name}"))?;

        Ok(output
            .mfa_devices()
            .iter()
            .map(|device| device.serial_number().to_owned())
            .collect())
    }

    async fn session_token(
        &self,
        serial_number: &str,
        token_code: &str,
        duration: Option<u32>,
    ) -> Result<SessionCredentials> {
        let output = self
            .sts
            .get_session_token()
            .serial_number(serial_number)
            .token_code(token_code)
            .set_duration_seconds(duration.map(|seconds| seconds as i32))
            .send()
            .await
            .context("Failed to get session token")?;

        output
            .credentials()
            .context("No credentials returned")?
            .try_into()
    }
}

/// Extracts the user name from an IAM user ARN such as
/// `arn:aws:iam::123456789012:user/division/alice`.
pub fn user_name(arn: &str) -> Result<&str, MfaError> {
    arn.split_once('/')
        .and_then(|(_, path)| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| MfaError::UnexpectedArn(arn.to_owned()))
}

fn single_device(user: &str, mut devices: Vec<String>) -> Result<String, MfaError> {
    match devices.len() {
        0 => Err(MfaError::NoMfaDevice {
            user: user.to_owned(),
        }),
        1 => Ok(devices.remove(0)),
        count => Err(MfaError::MultipleMfaDevices {
            user: user.to_owned(),
            count,
        }),
    }
}

/// Resolves the caller's MFA device and trades `token_code` for session credentials.
///
/// Fails without requesting a session token unless the caller has exactly one device.
pub async fn exchange<S: SessionService>(
    service: &S,
    token_code: &str,
    duration: Option<u32>,
) -> Result<SessionCredentials> {
    let arn = service.caller_arn().await?;
    let user = user_name(&arn)?;
    debug!("Caller {arn} resolved to user {user}");

    let serial_number = single_device(user, service.mfa_devices(user).await?)?;
    match duration {
        Some(seconds) => info!("Fetching credentials with {serial_number} - Duration: {seconds}s"),
        None => info!("Fetching credentials with {serial_number}"),
    }

    service
        .session_token(&serial_number, token_code, duration)
        .await
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use chrono::{DateTime, Duration, Utc};

    use super::*;

    /// In-memory [`SessionService`] that records every call it receives.
    pub struct FakeSessionService {
        pub arn: String,
        pub devices: Vec<String>,
        pub expiration: DateTime<Utc>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeSessionService {
        pub fn with_devices(devices: &[&str]) -> Self {
            Self {
                arn: "arn:aws:iam::123456789012:user/alice".into(),
                devices: devices.iter().map(|d| d.to_string()).collect(),
                expiration: Utc::now() + Duration::hours(12),
                calls: RefCell::default(),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        pub fn requested_session(&self) -> bool {
            self.calls
                .borrow()
                .iter()
                .any(|call| call.starts_with("session_token"))
        }
    }

    impl SessionService for FakeSessionService {
        async fn caller_arn(&self) -> Result<String> {
            self.calls.borrow_mut().push("caller_arn".into());
            Ok(self.arn.clone())
        }

        async fn mfa_devices(&self, user_name: &str) -> Result<Vec<String>> {
            self.calls
                .borrow_mut()
                .push(format!("mfa_devices {user_name}"));
            Ok(self.devices.clone())
        }

        async fn session_token(
            &self,
            serial_number: &str,
            token_code: &str,
            duration: Option<u32>,
        ) -> Result<SessionCredentials> {
            self.calls.borrow_mut().push(format!(
                "session_token {serial_number} {token_code} {duration:?}"
            ));
            Ok(SessionCredentials {
                access_key_id: "ASIAFAKE".into(),
                secret_access_key: "fake-secret".into(),
                session_token: "fake-token".into(),
                expiration: self.expiration,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::FakeSessionService, *};

    const DEVICE: &str = "arn:aws:iam::123456789012:mfa/alice";

    #[test]
    fn user_name_from_user_arn() {
        assert_eq!(
            user_name("arn:aws:iam::123456789012:user/alice").unwrap(),
            "alice"
        );
        assert_eq!(
            user_name("arn:aws:iam::123456789012:user/division/alice").unwrap(),
            "alice"
        );
    }

    #[test]
    fn user_name_requires_a_path_segment() {
        let err = user_name("arn:aws:iam::123456789012:root").unwrap_err();
        assert!(matches!(err, MfaError::UnexpectedArn(_)));
        assert!(user_name("arn:aws:iam::123456789012:user/").is_err());
    }

    #[tokio::test]
    async fn exchanges_token_with_the_only_device() {
        let service = FakeSessionService::with_devices(&[DEVICE]);

        let session = exchange(&service, "123456", Some(3600)).await.unwrap();

        assert_eq!(session.access_key_id, "ASIAFAKE");
        assert_eq!(
            service.calls(),
            [
                "caller_arn".to_string(),
                "mfa_devices alice".to_string(),
                format!("session_token {DEVICE} 123456 Some(3600)"),
            ]
        );
    }

    #[tokio::test]
    async fn no_device_stops_before_session_request() {
        let service = FakeSessionService::with_devices(&[]);

        let err = exchange(&service, "123456", None).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<MfaError>(),
            Some(MfaError::NoMfaDevice { user }) if user == "alice"
        ));
        assert!(!service.requested_session());
    }

    #[tokio::test]
    async fn several_devices_stop_before_session_request() {
        let service = FakeSessionService::with_devices(&[DEVICE, "arn:aws:iam::123456789012:mfa/backup"]);

        let err = exchange(&service, "123456", None).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<MfaError>(),
            Some(MfaError::MultipleMfaDevices { count: 2, .. })
        ));
        assert!(!service.requested_session());
    }

    #[tokio::test]
    async fn unexpected_arn_stops_before_device_lookup() {
        let mut service = FakeSessionService::with_devices(&[DEVICE]);
        service.arn = "arn:aws:iam::123456789012:root".into();

        assert!(exchange(&service, "123456", None).await.is_err());
        assert_eq!(service.calls(), ["caller_arn"]);
    }
}

//! Command-line interface definitions.

use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser};

use crate::error::MfaError;

/// Get temporary AWS credentials with MFA.
///
/// Uses the long-term credentials of `--profile` to request an MFA-protected session token
/// and stores the temporary credentials as `--name` (`<profile>-mfa` by default) in the AWS
/// credentials file. Nothing is fetched while the stored session is still valid.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// AWS profile used to request the session
    #[arg(short, long, env = "AWS_PROFILE", default_value = "default")]
    pub profile: String,

    /// OTP code from the MFA device [default: prompt]
    #[arg(short, long)]
    pub otp: Option<String>,

    /// Path to AWS credentials file [default: ~/.aws/credentials]
    #[arg(short, long, env = "AWS_SHARED_CREDENTIALS_FILE")]
    pub credentials: Option<PathBuf>,

    /// Profile to store the temporary credentials in [default: <profile>-mfa]
    #[arg(short, long)]
    pub name: Option<String>,

    /// Session duration in seconds (900-129600) [default: decided by STS]
    #[arg(
        short,
        long,
        env = "AWS_SESSION_DURATION",
        value_parser = clap::value_parser!(u32).range(900..=129_600)
    )]
    pub duration: Option<u32>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Fully resolved run configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub profile: String,
    pub target: String,
    pub credentials_path: PathBuf,
    pub otp: Option<String>,
    pub duration: Option<u32>,
}

impl Args {
    /// Applies defaults and runs the startup checks, reporting every failed check at once.
    pub fn resolve(self, home: Option<PathBuf>) -> Result<Settings, MfaError> {
        let mut problems = Vec::new();

        let target = self.name.unwrap_or_else(|| format!("{}-mfa", self.profile));
        check_profile_name("source profile", &self.profile, &mut problems);
        check_profile_name("target profile", &target, &mut problems);

        let credentials_path = self
            .credentials
            .or_else(|| home.map(|home| home.join(".aws").join("credentials")));
        match &credentials_path {
            Some(path) => check_credentials_path(path, &mut problems),
            None => problems.push(
                "Could not determine home directory, pass --credentials explicitly".to_string(),
            ),
        }

        match credentials_path {
            Some(credentials_path) if problems.is_empty() => Ok(Settings {
                profile: self.profile,
                target,
                credentials_path,
                otp: self.otp,
                duration: self.duration,
            }),
            _ => Err(MfaError::Preflight(problems)),
        }
    }
}

fn check_profile_name(role: &str, name: &str, problems: &mut Vec<String>) {
    if name.trim().is_empty() {
        problems.push(format!("The {role} name is empty"));
    } else if name.contains(['[', ']', '\n', '\r']) {
        problems.push(format!("The {role} name `{name}` cannot be used as a section header"));
    }
}

fn check_credentials_path(path: &Path, problems: &mut Vec<String>) {
    if path.file_name().is_none() {
        problems.push(format!("{} does not name a file", path.display()));
    }
    if path.exists() && !path.is_file() {
        problems.push(format!("{} exists but is not a regular file", path.display()));
    }
    if let Some(parent) = path.parent().filter(|p| p.exists() && !p.is_dir()) {
        problems.push(format!("{} is not a directory", parent.display()));
    }
}

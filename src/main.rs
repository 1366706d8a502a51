//! AWS MFA Profile Manager
//!
//! Fetches short-lived, MFA-protected AWS credentials and stores them as a named profile in
//! the shared credentials file.
//!
//! The program performs the following operations:
//! 1. Parses command-line arguments and runs the startup checks
//! 2. Skips the refresh while the stored session profile is still valid
//! 3. Asks for the OTP code unless it was passed with `--otp`
//! 4. Resolves the caller's single MFA device and requests a session token
//! 5. Backs up the credentials file and writes the session profile into it

use std::{
    io::{self, Write},
    process::ExitCode,
};

use anyhow::{Result, ensure};
use clap::Parser;
use log::{LevelFilter, error, info};

mod cli;
mod credentials;
mod error;
mod session;
mod store;
mod updater;

use cli::{Args, Settings};
use session::AwsSessionService;
use updater::{AwsMfaUpdater, Outcome};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Info by default so progress is visible; RUST_LOG still wins over -v.
    env_logger::Builder::new()
        .filter_level(level_filter(args.verbose))
        .parse_default_env()
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn level_filter(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

async fn run(args: Args) -> Result<()> {
    let settings = args.resolve(dirs::home_dir())?;
    let Settings {
        profile,
        target,
        otp,
        ..
    } = &settings;

    let service = AwsSessionService::for_profile(profile).await;
    let updater = AwsMfaUpdater::new(&settings);

    let outcome = updater
        .update_credentials(&service, || match otp {
            Some(otp) => Ok(otp.clone()),
            None => prompt_otp(profile),
        })
        .await?;

    match outcome {
        Outcome::StillValid { until } => {
            info!("No need to refresh yet, {target} is still valid until {until}");
        }
        Outcome::Refreshed { expiration, backup } => {
            if let Some(backup) = backup {
                info!("Previous credentials saved to {}", backup.display());
            }
            info!("Added/refreshed {target}, credentials expire at {expiration}");
        }
    }

    Ok(())
}

/// Reads the OTP code for `profile` from stdin.
fn prompt_otp(profile: &str) -> Result<String> {
    print!("Enter your OTP code for profile {profile}: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let otp = input.trim().to_string();
    ensure!(!otp.is_empty(), "No OTP code entered");
    Ok(otp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_level() {
        assert_eq!(level_filter(0), LevelFilter::Info);
        assert_eq!(level_filter(1), LevelFilter::Debug);
        assert_eq!(level_filter(5), LevelFilter::Trace);
    }
}

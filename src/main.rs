mod api_client;
mod config;
mod error;
mod profile;
mod reconcile;
mod record;
mod retry;
mod runner;
mod service_account;
mod sheets;
mod table;
mod table_store;
#[cfg(test)]
mod test_support;
mod transform;

use api_client::DateWindow;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::Config;
use error::Error;
use log::error;
use profile::Profile;

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the report and merge it into the table store (default)
    Sync {
        #[arg(long, requires = "until", help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        since: Option<NaiveDate>,

        #[arg(long, requires = "since", help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        until: Option<NaiveDate>,
    },
    /// Validate the profile and print the query it would send
    Check,
}

fn validate_date(s: &str) -> Result<NaiveDate, String> {
    let error_message = "Invalid date, expected YYYY-MM-DD";

    let parts = s
        .split("-")
        .map(|part| part.parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| error_message)?;

    match parts.as_slice() {
        &[year, month, day] if month <= 12 && day <= 31 => {
            Ok(
                NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .ok_or(error_message)?,
            )
        }
        _ => Err(error_message.to_string()),
    }
}

fn check(profile: &Profile) -> Result<(), Error> {
    let query = profile.query(None)?;
    println!(
        "Profile '{}' is valid: {} {} for {:?}, {} columns keyed on {:?}.",
        profile.name,
        query.level,
        query.account_id,
        query.date_window,
        profile.columns.len(),
        profile.key.fields()
    );
    Ok(())
}

async fn run(args: Args) -> Result<(), Error> {
    let profile = Profile::load(&args.config.profile)?;

    match args.command.unwrap_or(Command::Sync {
        since: None,
        until: None,
    }) {
        Command::Sync { since, until } => {
            let window = match (since, until) {
                (Some(since), Some(until)) => Some(DateWindow::Range { since, until }),
                _ => None,
            };
            let outcome = runner::sync_report(&args.config, &profile, window).await?;
            println!("{outcome}");
        }
        Command::Check => check(&profile)?,
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::init();

    if let Err(err) = run(args).await {
        let kind = err.kind();
        error!("{} failure: {}", kind, err);
        std::process::exit(kind.exit_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_date() {
        assert_eq!(
            validate_date("2024-01-31"),
            Ok(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
        );
        assert!(validate_date("2024-02-30").is_err());
        assert!(validate_date("2024-13-01").is_err());
        assert!(validate_date("2024/01/01").is_err());
        assert!(validate_date("yesterday").is_err());
    }

    #[test]
    fn test_args_default_to_sync_from_env_style_flags() {
        let args = Args::try_parse_from([
            "ads-sheet-sync",
            "--access-token",
            "token",
            "--store",
            "parquet",
        ])
        .unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.config.store, config::StoreBackend::Parquet);
    }

    #[test]
    fn test_sync_range_requires_both_ends() {
        let result = Args::try_parse_from([
            "ads-sheet-sync",
            "--access-token",
            "token",
            "sync",
            "--since",
            "2024-01-01",
        ]);
        assert!(result.is_err());
    }
}

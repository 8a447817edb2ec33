use crate::error::Error;
use clap::{Args as ClapArgs, ValueEnum};
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_GRAPH_API_URL: &str = "https://graph.facebook.com/v19.0";
const DEFAULT_SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4";
const DEFAULT_DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";
const DEFAULT_PROFILE: &str = "profiles/ad_report.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// A worksheet in a Google spreadsheet
    Sheets,
    /// A local parquet file
    Parquet,
}

/// Process-wide settings, built once at startup from the environment and
/// passed by reference to the clients that need them.
#[derive(ClapArgs, Clone)]
pub struct Config {
    #[arg(long, env = "FB_ACCESS_TOKEN", hide_env_values = true)]
    pub(crate) access_token: String,

    #[arg(long, env = "FB_APP_ID")]
    pub(crate) app_id: Option<String>,

    #[arg(long, env = "FB_APP_SECRET", hide_env_values = true)]
    pub(crate) app_secret: Option<String>,

    #[arg(long, default_value = DEFAULT_GRAPH_API_URL, env = "GRAPH_API_URL")]
    pub(crate) graph_api_url: String,

    /// Service account key JSON, required for the sheets store
    #[arg(long, env = "GOOGLE_SHEET_CREDS", hide_env_values = true)]
    pub(crate) google_sheet_creds: Option<String>,

    #[arg(long, default_value = DEFAULT_SHEETS_API_URL, env = "SHEETS_API_URL")]
    pub(crate) sheets_api_url: String,

    #[arg(long, default_value = DEFAULT_DRIVE_API_URL, env = "DRIVE_API_URL")]
    pub(crate) drive_api_url: String,

    /// Pipeline profile (JSON) describing the report, columns and key policy
    #[arg(long, default_value = DEFAULT_PROFILE, env = "PIPELINE_PROFILE")]
    pub(crate) profile: PathBuf,

    #[arg(long, value_enum, default_value_t = StoreBackend::Sheets, env = "TABLE_STORE")]
    pub(crate) store: StoreBackend,

    /// Target file for the parquet store
    #[arg(long, env = "PARQUET_TABLE_PATH")]
    pub(crate) parquet_path: Option<PathBuf>,

    /// Retries for transient network failures, per request
    #[arg(long, default_value_t = 3, env = "MAX_RETRIES")]
    pub(crate) max_retries: usize,

    /// Upper bound on a single HTTP request, in seconds
    #[arg(long, default_value_t = 20, env = "REQUEST_TIMEOUT_SECS")]
    pub(crate) request_timeout_secs: u64,
}

impl Config {
    /// Builds the HTTP client used for every request of a run. Each request
    /// is bounded by `request_timeout_secs`.
    pub fn http_client(&self) -> Result<Client, Error> {
        if self.request_timeout_secs == 0 {
            return Err(Error::configuration(
                "REQUEST_TIMEOUT_SECS must be greater than zero",
            ));
        }

        Client::builder()
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))
    }
}

use crate::api_client::{DateWindow, GraphApiClient, InsightsQuery, ReportingSource};
use crate::config::{Config, StoreBackend};
use crate::error::Error;
use crate::profile::Profile;
use crate::reconcile::reconcile;
use crate::sheets::GoogleSheetsStore;
use crate::table_store::{ParquetTableStore, TableStore};
use crate::transform::transform;
use log::{info, warn};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The fetch returned nothing; the store was not touched.
    NoNewData,
    Updated {
        appended: usize,
        replaced: usize,
        total: usize,
    },
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::NoNewData => {
                write!(f, "No new data returned from the reporting API; table not modified.")
            }
            SyncOutcome::Updated {
                appended,
                replaced,
                total,
            } => write!(
                f,
                "Report updated with {appended} new rows ({replaced} replaced, {total} total)."
            ),
        }
    }
}

async fn open_store(config: &Config, profile: &Profile) -> Result<Box<dyn TableStore>, Error> {
    match config.store {
        StoreBackend::Sheets => Ok(Box::new(
            GoogleSheetsStore::connect(config, &profile.sheet).await?,
        )),
        StoreBackend::Parquet => {
            let path = config.parquet_path.as_ref().ok_or_else(|| {
                Error::configuration("PARQUET_TABLE_PATH is required for the parquet store")
            })?;
            let store = ParquetTableStore::new(path)?;
            info!("using parquet table at {}", store.path().display());
            Ok(Box::new(store))
        }
    }
}

/// Fetches the profile's report and merges it into the configured store.
pub async fn sync_report(
    config: &Config,
    profile: &Profile,
    date_window: Option<DateWindow>,
) -> Result<SyncOutcome, Error> {
    let query = profile.query(date_window)?;
    let source = GraphApiClient::new(config)?;
    let store = open_store(config, profile).await?;

    fetch_and_reconcile(&source, store.as_ref(), profile, &query).await
}

/// One pipeline pass: fetch, transform, reconcile against the stored table,
/// then replace the stored table in full.
///
/// Nothing is written when the fetch is empty. The store is re-read right
/// before writing and the run aborts if another writer changed it meanwhile.
pub async fn fetch_and_reconcile(
    source: &dyn ReportingSource,
    store: &dyn TableStore,
    profile: &Profile,
    query: &InsightsQuery,
) -> Result<SyncOutcome, Error> {
    let records = source.fetch_insights(query).await?;
    let batch = transform(&records, &profile.columns)?;

    if batch.is_empty() {
        warn!("reporting API returned no rows for profile '{}'", profile.name);
        return Ok(SyncOutcome::NoNewData);
    }

    let current = store.read_all().await?;
    let merged = reconcile(&current, &batch, &profile.key)?;
    info!(
        "profile '{}': {} existing rows, {} replaced, {} appended",
        profile.name,
        current.len(),
        merged.replaced,
        merged.appended
    );

    if store.read_all().await? != current {
        return Err(Error::ConcurrentModification);
    }
    store.replace_all(&merged.table).await?;

    Ok(SyncOutcome::Updated {
        appended: merged.appended,
        replaced: merged.replaced,
        total: merged.table.len(),
    })
}

use crate::config::Config;
use crate::error::Error;
use crate::profile::SheetTarget;
use crate::retry::{send_with_retry, BackoffPolicy};
use crate::service_account::{ServiceAccountKey, SHEETS_SCOPES};
use crate::table::{OutputRow, Table};
use crate::table_store::TableStore;
use log::{debug, info};
use reqwest::{header::AUTHORIZATION, Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";

/// A worksheet used as the persisted table: first row is the header, every
/// following row a record.
pub struct GoogleSheetsStore {
    client: Client,
    sheets_api_url: String,
    bearer: String,
    spreadsheet_id: String,
    worksheet: String,
    backoff: BackoffPolicy,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRangeUpdate<'a> {
    range: &'a str,
    major_dimension: &'a str,
    values: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct DriveFiles {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

/// Quotes a worksheet title for A1 notation: `Sheet1` -> `'Sheet1'`.
fn a1_sheet(worksheet: &str) -> String {
    format!("'{}'", worksheet.replace('\'', "''"))
}

fn cell_to_string(value: &Value, row: usize, column: usize) -> Result<String, Error> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Value::Array(_) | Value::Object(_) => Err(Error::store(format!(
            "cell at row {}, column {} holds a nested value",
            row + 1,
            column + 1
        ))),
    }
}

/// Turns the raw worksheet grid into a table. Rows shorter than the header
/// are padded; rows wider than the header mean the sheet is not a table.
pub(crate) fn grid_to_table(values: &[Vec<Value>]) -> Result<Table, Error> {
    let Some((header, records)) = values.split_first() else {
        return Ok(Table::empty());
    };

    let columns = header
        .iter()
        .enumerate()
        .map(|(c, v)| cell_to_string(v, 0, c))
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::with_capacity(records.len());
    for (r, record) in records.iter().enumerate() {
        if record.len() > columns.len() {
            return Err(Error::store(format!(
                "row {} has {} cells but the header has {} columns",
                r + 2,
                record.len(),
                columns.len()
            )));
        }
        let mut row = record
            .iter()
            .enumerate()
            .map(|(c, v)| cell_to_string(v, r + 1, c))
            .collect::<Result<OutputRow, _>>()?;
        row.resize(columns.len(), String::new());
        rows.push(row);
    }

    Table::new(columns, rows).map_err(|e| Error::store(format!("worksheet is not a table: {e}")))
}

/// Lays out `table` as a grid of at least `min_rows` x `min_columns`, so
/// that writing it from A1 also blanks whatever the previous contents
/// covered beyond the new table.
pub(crate) fn table_to_grid(table: &Table, min_rows: usize, min_columns: usize) -> Vec<Vec<String>> {
    let width = table.columns().len().max(min_columns);
    let height = (table.len() + 1).max(min_rows);

    let mut grid = Vec::with_capacity(height);
    grid.push(table.columns().to_vec());
    grid.extend(table.rows().iter().cloned());
    grid.resize(height, Vec::new());
    for row in grid.iter_mut() {
        row.resize(width, String::new());
    }
    grid
}

impl GoogleSheetsStore {
    /// Authenticates with the configured service account and resolves the
    /// target spreadsheet.
    pub async fn connect(config: &Config, target: &SheetTarget) -> Result<Self, Error> {
        let raw_key = config.google_sheet_creds.as_deref().ok_or_else(|| {
            Error::configuration("GOOGLE_SHEET_CREDS is required for the sheets store")
        })?;
        let key = ServiceAccountKey::from_json(raw_key)?;

        let client = config.http_client()?;
        let backoff = BackoffPolicy::with_max_retries(config.max_retries);
        let token = key
            .fetch_access_token(&client, SHEETS_SCOPES, &backoff)
            .await?;
        let bearer = format!("Bearer {token}");

        let spreadsheet_id = match (&target.spreadsheet_id, &target.spreadsheet) {
            (Some(id), _) => id.clone(),
            (None, Some(name)) => {
                find_spreadsheet(&client, &config.drive_api_url, &bearer, name, &backoff).await?
            }
            (None, None) => {
                return Err(Error::configuration(
                    "sheet target names no spreadsheet",
                ))
            }
        };
        info!(
            "using spreadsheet {} worksheet '{}' as {}",
            spreadsheet_id, target.worksheet, key.client_email
        );

        Ok(GoogleSheetsStore {
            client,
            sheets_api_url: config.sheets_api_url.clone(),
            bearer,
            spreadsheet_id,
            worksheet: target.worksheet.clone(),
            backoff,
        })
    }

    fn values_url(&self, range: &str) -> Result<Url, Error> {
        let mut url = Url::parse(&self.sheets_api_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .pop_if_empty()
            .extend(&["spreadsheets", self.spreadsheet_id.as_str(), "values", range]);
        Ok(url)
    }

    async fn fetch_grid(&self) -> Result<Vec<Vec<Value>>, Error> {
        let mut url = self.values_url(&a1_sheet(&self.worksheet))?;
        url.query_pairs_mut()
            .append_pair("majorDimension", "ROWS")
            .append_pair("valueRenderOption", "UNFORMATTED_VALUE")
            .append_pair("dateTimeRenderOption", "FORMATTED_STRING");

        let resp = send_with_retry(&self.backoff, "worksheet read", || {
            self.client
                .get(url.clone())
                .header(AUTHORIZATION, &self.bearer)
        })
        .await
        .map_err(Error::StoreRequest)?;

        let resp = ensure_success(resp, "reading the worksheet").await?;
        let range = resp
            .json::<ValueRange>()
            .await
            .map_err(|e| Error::store(format!("worksheet values are malformed: {e}")))?;
        Ok(range.values)
    }
}

async fn ensure_success(resp: Response, doing: &str) -> Result<Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::store(format!(
        "{doing} failed with {status}: {}",
        body.chars().take(300).collect::<String>()
    )))
}

async fn find_spreadsheet(
    client: &Client,
    drive_api_url: &str,
    bearer: &str,
    name: &str,
    backoff: &BackoffPolicy,
) -> Result<String, Error> {
    let mut url = Url::parse(drive_api_url)?;
    url.path_segments_mut()
        .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
        .pop_if_empty()
        .push("files");
    url.query_pairs_mut()
        .append_pair(
            "q",
            &format!(
                "name = '{}' and mimeType = '{}' and trashed = false",
                name.replace('\\', "\\\\").replace('\'', "\\'"),
                SPREADSHEET_MIME_TYPE
            ),
        )
        .append_pair("fields", "files(id,name)")
        .append_pair("supportsAllDrives", "true")
        .append_pair("includeItemsFromAllDrives", "true");

    let resp = send_with_retry(backoff, "spreadsheet lookup", || {
        client.get(url.clone()).header(AUTHORIZATION, bearer)
    })
    .await
    .map_err(Error::StoreRequest)?;
    let resp = ensure_success(resp, "looking up the spreadsheet").await?;
    let found = resp.json::<DriveFiles>().await.map_err(Error::StoreRequest)?;

    let file = found.files.into_iter().next().ok_or_else(|| {
        Error::store(format!(
            "spreadsheet '{name}' was not found or is not shared with the service account"
        ))
    })?;
    debug!("spreadsheet '{}' resolved to {}", file.name, file.id);
    Ok(file.id)
}

#[async_trait::async_trait]
impl TableStore for GoogleSheetsStore {
    async fn read_all(&self) -> Result<Table, Error> {
        let grid = self.fetch_grid().await?;
        let table = grid_to_table(&grid)?;
        debug!(
            "worksheet '{}' holds {} rows across {} columns",
            self.worksheet,
            table.len(),
            table.columns().len()
        );
        Ok(table)
    }

    async fn replace_all(&self, table: &Table) -> Result<(), Error> {
        if table.columns().is_empty() {
            return Err(Error::store("refusing to write a table without columns"));
        }

        let previous = self.fetch_grid().await?;
        let previous_width = previous.iter().map(Vec::len).max().unwrap_or(0);
        let grid = table_to_grid(table, previous.len(), previous_width);

        let range = format!("{}!A1", a1_sheet(&self.worksheet));
        let mut url = self.values_url(&range)?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        let body = ValueRangeUpdate {
            range: &range,
            major_dimension: "ROWS",
            values: grid,
        };

        let resp = send_with_retry(&self.backoff, "worksheet write", || {
            self.client
                .put(url.clone())
                .header(AUTHORIZATION, &self.bearer)
                .json(&body)
        })
        .await
        .map_err(Error::StoreRequest)?;
        ensure_success(resp, "writing the worksheet").await?;

        info!(
            "wrote {} rows to worksheet '{}'",
            table.len(),
            self.worksheet
        );
        Ok(())
    }
}

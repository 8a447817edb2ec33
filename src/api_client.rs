use crate::config::Config;
use crate::error::Error;
use crate::record::Record;
use crate::retry::{send_with_retry, BackoffPolicy};
use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use log::{debug, info};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Graph error code for an invalid parameter, e.g. a field that cannot be
/// combined with the requested breakdowns.
const INVALID_PARAMETER_CODE: i64 = 100;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ReportingSource: Send + Sync + 'static {
    /// Fetches every record for the query's date window.
    ///
    /// Either all pages are returned or the call fails; partial results are
    /// never handed back.
    async fn fetch_insights(&self, query: &InsightsQuery) -> Result<Vec<Record>, Error>;
}

/// Which days a report covers: a named preset such as `last_3d`, or an
/// explicit inclusive range.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DateWindow {
    Preset { preset: String },
    Range { since: NaiveDate, until: NaiveDate },
}

#[derive(Serialize)]
struct TimeRange {
    since: String,
    until: String,
}

/// A fully resolved insights request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightsQuery {
    pub account_id: String,
    pub level: String,
    pub fields: Vec<String>,
    pub date_window: DateWindow,
    pub time_increment: u32,
    pub breakdowns: Vec<String>,
    pub action_breakdowns: Vec<String>,
    pub limit: u32,
}

impl InsightsQuery {
    fn account_path_segment(&self) -> String {
        if self.account_id.starts_with("act_") {
            self.account_id.clone()
        } else {
            format!("act_{}", self.account_id)
        }
    }

    fn query_pairs(&self) -> Result<Vec<(&'static str, String)>, Error> {
        let mut pairs = vec![
            ("fields", self.fields.join(",")),
            ("level", self.level.clone()),
            ("time_increment", self.time_increment.to_string()),
            ("limit", self.limit.to_string()),
        ];

        match &self.date_window {
            DateWindow::Preset { preset } => pairs.push(("date_preset", preset.clone())),
            DateWindow::Range { since, until } => {
                let range = TimeRange {
                    since: since.format("%Y-%m-%d").to_string(),
                    until: until.format("%Y-%m-%d").to_string(),
                };
                let encoded = serde_json::to_string(&range)
                    .map_err(|e| Error::configuration(format!("invalid time range: {e}")))?;
                pairs.push(("time_range", encoded));
            }
        }

        if !self.breakdowns.is_empty() {
            pairs.push(("breakdowns", self.breakdowns.join(",")));
        }
        if !self.action_breakdowns.is_empty() {
            pairs.push(("action_breakdowns", self.action_breakdowns.join(",")));
        }

        Ok(pairs)
    }
}

#[derive(Clone)]
pub struct GraphApiClient {
    client: Client,
    base_url: String,
    access_token: String,
    appsecret_proof: Option<String>,
    backoff: BackoffPolicy,
}

#[derive(Deserialize)]
struct InsightsPage {
    #[serde(default)]
    data: Vec<Record>,
    paging: Option<Paging>,
}

#[derive(Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Deserialize)]
struct GraphErrorBody {
    error: GraphError,
}

#[derive(Deserialize)]
struct GraphError {
    message: String,
    #[serde(default)]
    code: i64,
    #[serde(rename = "type", default)]
    kind: String,
}

impl GraphError {
    fn describe(&self) -> String {
        if self.kind.is_empty() {
            format!("{} (code {})", self.message, self.code)
        } else {
            format!("{} ({} {})", self.message, self.kind, self.code)
        }
    }
}

/// `appsecret_proof` as required by apps that enforce it: hex HMAC-SHA256 of
/// the access token keyed by the app secret.
pub fn appsecret_proof(access_token: &str, app_secret: &str) -> Result<String, Error> {
    let mut mac = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes())
        .map_err(|e| Error::configuration(format!("invalid app secret: {e}")))?;
    mac.update(access_token.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Maps a non-success Graph response to an error. Invalid-parameter errors are
/// query configuration problems; anything else is a fetch failure.
fn graph_error(status: StatusCode, body: &str) -> Error {
    match serde_json::from_str::<GraphErrorBody>(body) {
        Ok(GraphErrorBody { error }) if error.code == INVALID_PARAMETER_CODE => {
            Error::configuration(format!(
                "reporting API rejected the query: {}",
                error.describe()
            ))
        }
        Ok(GraphErrorBody { error }) => Error::ApiResponse {
            status: status.as_u16(),
            message: error.describe(),
        },
        Err(_) => Error::ApiResponse {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        },
    }
}

impl GraphApiClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let appsecret_proof = config
            .app_secret
            .as_deref()
            .map(|secret| appsecret_proof(&config.access_token, secret))
            .transpose()?;

        if let Some(app_id) = &config.app_id {
            debug!("reporting API calls on behalf of app {}", app_id);
        }

        Ok(GraphApiClient {
            client: config.http_client()?,
            base_url: config.graph_api_url.to_string(),
            access_token: config.access_token.to_string(),
            appsecret_proof,
            backoff: BackoffPolicy::with_max_retries(config.max_retries),
        })
    }

    fn insights_url(&self, query: &InsightsQuery) -> Result<Url, Error> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .pop_if_empty()
            .extend(&[query.account_path_segment().as_str(), "insights"]);

        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query.query_pairs()? {
                pairs.append_pair(name, &value);
            }
            pairs.append_pair("access_token", &self.access_token);
            if let Some(proof) = &self.appsecret_proof {
                pairs.append_pair("appsecret_proof", proof);
            }
        }

        Ok(url)
    }

    async fn fetch_page(&self, url: &Url) -> Result<InsightsPage, Error> {
        let resp = send_with_retry(&self.backoff, "insights request", || {
            self.client.get(url.clone())
        })
        .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(graph_error(status, &body));
        }

        Ok(resp.json::<InsightsPage>().await?)
    }
}

#[async_trait::async_trait]
impl ReportingSource for GraphApiClient {
    async fn fetch_insights(&self, query: &InsightsQuery) -> Result<Vec<Record>, Error> {
        let mut url = self.insights_url(query)?;
        let mut records = vec![];
        let mut pages = 0;

        loop {
            let page = self.fetch_page(&url).await?;
            pages += 1;
            debug!("page {} carried {} records", pages, page.data.len());
            records.extend(page.data);

            match page.paging.and_then(|p| p.next) {
                Some(next) => {
                    url = Url::parse(&next).map_err(|source| Error::PagingLink {
                        link: next.clone(),
                        source,
                    })?
                }
                None => break,
            }
        }

        info!(
            "fetched {} records in {} pages for {}",
            records.len(),
            pages,
            query.account_path_segment()
        );

        Ok(records)
    }
}

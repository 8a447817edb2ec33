use crate::api_client::{DateWindow, InsightsQuery};
use crate::error::Error;
use crate::reconcile::KeyPolicy;
use crate::transform::ColumnSpec;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

const LEVELS: &[&str] = &["account", "campaign", "adset", "ad"];

const DATE_PRESETS: &[&str] = &[
    "today",
    "yesterday",
    "this_month",
    "last_month",
    "this_quarter",
    "maximum",
    "data_maximum",
    "last_3d",
    "last_7d",
    "last_14d",
    "last_28d",
    "last_30d",
    "last_90d",
    "last_week_mon_sun",
    "last_week_sun_sat",
    "last_quarter",
    "last_year",
    "this_week_mon_today",
    "this_week_sun_today",
    "this_year",
];

/// Fields the reporting API returns on every record regardless of the
/// requested field list.
const IMPLICIT_FIELDS: &[&str] = &["date_start", "date_stop"];

const ACTIONS_FIELD: &str = "actions";

/// Everything that differs between one report-to-sheet sync and another.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Profile {
    pub name: String,
    pub report: ReportSpec,
    pub columns: Vec<ColumnSpec>,
    pub key: KeyPolicy,
    pub sheet: SheetTarget,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportSpec {
    pub account_id: String,
    pub level: String,
    pub fields: Vec<String>,
    pub date_window: DateWindow,
    #[serde(default = "default_time_increment")]
    pub time_increment: u32,
    #[serde(default)]
    pub breakdowns: Vec<String>,
    #[serde(default)]
    pub action_breakdowns: Vec<String>,
    pub limit: u32,
}

fn default_time_increment() -> u32 {
    1
}

/// Where the sheets store reads and writes. Exactly one of `spreadsheet`
/// (looked up by name) or `spreadsheet_id` must be set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SheetTarget {
    #[serde(default)]
    pub spreadsheet: Option<String>,
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    pub worksheet: String,
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = fs::read_to_string(path).map_err(|source| Error::ProfileRead {
            path: path.display().to_string(),
            source,
        })?;
        let profile: Profile = serde_json::from_str(&raw).map_err(|source| Error::ProfileParse {
            path: path.display().to_string(),
            source,
        })?;
        profile.validate()?;
        Ok(profile)
    }

    /// Rejects profiles whose query or column layout cannot work, before any
    /// network call is made.
    pub fn validate(&self) -> Result<(), Error> {
        let report = &self.report;

        if report.account_id.trim().is_empty() {
            return Err(Error::configuration("report.account_id is empty"));
        }
        if !LEVELS.contains(&report.level.as_str()) {
            return Err(Error::configuration(format!(
                "report.level '{}' is not one of {:?}",
                report.level, LEVELS
            )));
        }
        if report.fields.is_empty() {
            return Err(Error::configuration("report.fields is empty"));
        }
        if let Some(duplicate) = first_duplicate(&report.fields) {
            return Err(Error::configuration(format!(
                "report.fields lists '{duplicate}' more than once"
            )));
        }
        if let Some(breakdown) = report.breakdowns.iter().find(|b| report.fields.contains(*b)) {
            return Err(Error::configuration(format!(
                "breakdown '{breakdown}' cannot also be requested as a field"
            )));
        }
        if report.limit == 0 {
            return Err(Error::configuration("report.limit must be at least 1"));
        }
        if !(1..=90).contains(&report.time_increment) {
            return Err(Error::configuration(format!(
                "report.time_increment {} is outside 1..=90",
                report.time_increment
            )));
        }
        validate_date_window(&report.date_window)?;

        self.validate_columns()?;
        self.validate_key()?;
        self.validate_sheet()
    }

    fn validate_columns(&self) -> Result<(), Error> {
        let report = &self.report;

        if self.columns.is_empty() {
            return Err(Error::configuration("profile declares no columns"));
        }

        let destinations: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.destination().to_string())
            .collect();
        if let Some(duplicate) = first_duplicate(&destinations) {
            return Err(Error::configuration(format!(
                "column '{duplicate}' is declared more than once"
            )));
        }

        for column in &self.columns {
            match column {
                ColumnSpec::Field {
                    destination, field, ..
                } => {
                    let available = report.fields.contains(field)
                        || report.breakdowns.contains(field)
                        || IMPLICIT_FIELDS.contains(&field.as_str());
                    if !available {
                        return Err(Error::configuration(format!(
                            "column '{destination}' reads '{field}', which is neither a requested field nor a breakdown"
                        )));
                    }
                }
                ColumnSpec::Action { destination, .. } => {
                    if !report.fields.iter().any(|f| f == ACTIONS_FIELD) {
                        return Err(Error::configuration(format!(
                            "column '{destination}' counts actions but report.fields does not request '{ACTIONS_FIELD}'"
                        )));
                    }
                }
                ColumnSpec::Placeholder { .. } => {}
            }
        }

        Ok(())
    }

    fn validate_key(&self) -> Result<(), Error> {
        if self.key.fields().is_empty() {
            return Err(Error::configuration("key policy names no columns"));
        }
        for field in self.key.fields() {
            let declared = self.columns.iter().any(|c| c.destination() == field);
            if !declared {
                return Err(Error::configuration(format!(
                    "key column '{field}' is not one of the declared columns"
                )));
            }
        }
        Ok(())
    }

    fn validate_sheet(&self) -> Result<(), Error> {
        let sheet = &self.sheet;
        match (&sheet.spreadsheet, &sheet.spreadsheet_id) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => {
                return Err(Error::configuration(
                    "sheet must set exactly one of 'spreadsheet' or 'spreadsheet_id'",
                ))
            }
        }
        if sheet.worksheet.trim().is_empty() {
            return Err(Error::configuration("sheet.worksheet is empty"));
        }
        Ok(())
    }

    /// Builds the request for this profile, optionally overriding its date
    /// window.
    pub fn query(&self, date_window: Option<DateWindow>) -> Result<InsightsQuery, Error> {
        let date_window = date_window.unwrap_or_else(|| self.report.date_window.clone());
        validate_date_window(&date_window)?;

        Ok(InsightsQuery {
            account_id: self.report.account_id.clone(),
            level: self.report.level.clone(),
            fields: self.report.fields.clone(),
            date_window,
            time_increment: self.report.time_increment,
            breakdowns: self.report.breakdowns.clone(),
            action_breakdowns: self.report.action_breakdowns.clone(),
            limit: self.report.limit,
        })
    }
}

fn validate_date_window(window: &DateWindow) -> Result<(), Error> {
    match window {
        DateWindow::Preset { preset } if !DATE_PRESETS.contains(&preset.as_str()) => {
            Err(Error::configuration(format!(
                "date preset '{preset}' is not supported by the reporting API"
            )))
        }
        DateWindow::Range { since, until } if since > until => Err(Error::StartDateAfterEndDate {
            start_date: since.to_string(),
            end_date: until.to_string(),
        }),
        _ => Ok(()),
    }
}

fn first_duplicate(values: &[String]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(values.len());
    values
        .iter()
        .find(|v| !seen.insert(v.as_str()))
        .map(String::as_str)
}

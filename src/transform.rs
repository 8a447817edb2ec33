use crate::error::Error;
use crate::record::{extract_with_fallback, Record};
use crate::table::{OutputRow, Table};
use serde::Deserialize;

/// How one destination column is produced from a fetched [`Record`].
///
/// A profile lists these in output order; the resulting table carries exactly
/// these columns, in this order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum ColumnSpec {
    /// Copies (and possibly renames) a scalar source field. A record missing
    /// the field is a schema error unless the column is declared optional.
    Field {
        destination: String,
        field: String,
        #[serde(default)]
        optional: bool,
    },
    /// Counts one action type, trying each fallback in order while the
    /// count is exactly zero.
    Action {
        destination: String,
        action_type: String,
        #[serde(default)]
        fallback: Vec<String>,
    },
    /// Always emitted empty; filled by formulas in the destination sheet.
    Placeholder { destination: String },
}

impl ColumnSpec {
    pub fn destination(&self) -> &str {
        match self {
            ColumnSpec::Field { destination, .. }
            | ColumnSpec::Action { destination, .. }
            | ColumnSpec::Placeholder { destination } => destination,
        }
    }

    fn cell(&self, record: &Record, index: usize) -> Result<String, Error> {
        match self {
            ColumnSpec::Field {
                destination,
                field,
                optional,
            } => match record.scalar(field)? {
                Some(value) => Ok(value),
                None if *optional => Ok(String::new()),
                None => Err(Error::schema(format!(
                    "record {index} is missing source field '{field}' for column '{destination}'"
                ))),
            },
            ColumnSpec::Action {
                action_type,
                fallback,
                ..
            } => Ok(extract_with_fallback(record, action_type, fallback)?.to_string()),
            ColumnSpec::Placeholder { .. } => Ok(String::new()),
        }
    }
}

/// Flattens fetched records into a table with the declared destination schema.
pub fn transform(records: &[Record], columns: &[ColumnSpec]) -> Result<Table, Error> {
    let header = columns
        .iter()
        .map(|spec| spec.destination().to_string())
        .collect();
    let mut table = Table::new(header, Vec::with_capacity(records.len()))
        .map_err(|e| Error::schema(format!("invalid column layout: {e}")))?;

    for (index, record) in records.iter().enumerate() {
        let row = columns
            .iter()
            .map(|spec| spec.cell(record, index))
            .collect::<Result<OutputRow, _>>()?;
        table
            .push_row(row)
            .map_err(|e| Error::schema(e.to_string()))?;
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn record(value: Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    fn ad_report_columns() -> Vec<ColumnSpec> {
        serde_json::from_value(json!([
            { "from": "field", "destination": "date_start", "field": "date_start" },
            { "from": "field", "destination": "campaign", "field": "campaign_name" },
            { "from": "field", "destination": "spend", "field": "spend" },
            { "from": "field", "destination": "cpc", "field": "cpc", "optional": true },
            {
                "from": "action",
                "destination": "leads",
                "action_type": "lead",
                "fallback": ["onsite_conversion.lead_grouped"]
            },
            { "from": "action", "destination": "chats", "action_type": "onsite_web_chat" },
            { "from": "placeholder", "destination": "cost_per_lead" }
        ]))
        .unwrap()
    }

    #[test]
    fn test_transform_produces_declared_schema_in_order() {
        let records = vec![
            record(json!({
                "date_start": "2024-01-01",
                "campaign_name": "Spring",
                "spend": "10.5",
                "cpc": "0.42",
                "actions": [
                    { "action_type": "onsite_conversion.lead_grouped", "value": "5" },
                    { "action_type": "onsite_web_chat", "value": "2" }
                ]
            })),
            record(json!({
                "campaign_name": "Spring",
                "date_start": "2024-01-02",
                "spend": "3"
            })),
        ];

        let table = transform(&records, &ad_report_columns()).unwrap();

        assert_eq!(
            table.columns(),
            &["date_start", "campaign", "spend", "cpc", "leads", "chats", "cost_per_lead"]
        );
        assert_eq!(
            table.rows()[0],
            vec!["2024-01-01", "Spring", "10.5", "0.42", "5", "2", ""]
        );
        assert_eq!(
            table.rows()[1],
            vec!["2024-01-02", "Spring", "3", "", "0", "0", ""]
        );
    }

    #[test]
    fn test_transform_missing_required_field_is_schema_error() {
        let records = vec![record(json!({ "date_start": "2024-01-01", "spend": "1" }))];

        let err = transform(&records, &ad_report_columns()).unwrap_err();
        match err {
            Error::Schema { message } => {
                assert!(message.contains("campaign_name"), "{message}");
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_transform_rejects_nested_field() {
        let columns = vec![ColumnSpec::Field {
            destination: "actions".to_string(),
            field: "actions".to_string(),
            optional: false,
        }];
        let records = vec![record(json!({ "actions": [] }))];

        assert!(matches!(
            transform(&records, &columns).unwrap_err(),
            Error::Schema { .. }
        ));
    }

    #[test]
    fn test_transform_empty_batch_keeps_header() {
        let table = transform(&[], &ad_report_columns()).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns().len(), 7);
    }

    #[test]
    fn test_transform_duplicate_destination_is_schema_error() {
        let columns = vec![
            ColumnSpec::Placeholder {
                destination: "x".to_string(),
            },
            ColumnSpec::Placeholder {
                destination: "x".to_string(),
            },
        ];
        assert!(matches!(
            transform(&[], &columns).unwrap_err(),
            Error::Schema { .. }
        ));
    }
}

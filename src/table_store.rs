use crate::error::Error;
use crate::table::Table;
use datafusion::arrow::array::{Array, ArrayRef, RecordBatch, StringArray};
use datafusion::arrow::compute::{cast_with_options, CastOptions};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::parquet::arrow::ArrowWriter;
use datafusion::prelude::{ParquetReadOptions, SessionContext};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TableStore: Send + Sync + 'static {
    /// Loads the whole persisted table.
    ///
    /// A store that holds nothing yet yields an empty table. A store holding
    /// data that cannot be read as a table is an error.
    async fn read_all(&self) -> Result<Table, Error>;

    /// Replaces the persisted table wholesale. On failure the previous
    /// contents are left in place.
    async fn replace_all(&self, table: &Table) -> Result<(), Error>;
}

/// Keeps the table in a single parquet file, every column stored as UTF-8.
#[derive(Clone)]
pub struct ParquetTableStore {
    path: PathBuf,
}

impl ParquetTableStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
            return Err(Error::configuration(format!(
                "parquet table path {} must end in .parquet",
                path.display()
            )));
        }
        Ok(ParquetTableStore { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn partial_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".partial");
        self.path.with_file_name(name)
    }

    fn path_str(&self) -> Result<&str, Error> {
        self.path.to_str().ok_or_else(|| {
            Error::configuration(format!(
                "parquet table path {} is not valid UTF-8",
                self.path.display()
            ))
        })
    }
}

fn to_utf8(column: &ArrayRef) -> Result<ArrayRef, Error> {
    if column.data_type() == &DataType::Utf8 {
        return Ok(column.clone());
    }
    Ok(cast_with_options(
        column.as_ref(),
        &DataType::Utf8,
        &CastOptions::default(),
    )?)
}

fn table_to_batch(table: &Table) -> Result<RecordBatch, Error> {
    let schema = Arc::new(Schema::new(
        table
            .columns()
            .iter()
            .map(|name| Field::new(name.clone(), DataType::Utf8, false))
            .collect::<Vec<_>>(),
    ));

    let arrays = (0..table.columns().len())
        .map(|i| {
            let values = table.rows().iter().map(|row| row[i].as_str());
            Arc::new(StringArray::from_iter_values(values)) as ArrayRef
        })
        .collect();

    Ok(RecordBatch::try_new(schema, arrays)?)
}

#[async_trait::async_trait]
impl TableStore for ParquetTableStore {
    async fn read_all(&self) -> Result<Table, Error> {
        if fs::metadata(&self.path).is_err() {
            info!(
                "no table at {}, starting from an empty table",
                self.path.display()
            );
            return Ok(Table::empty());
        }

        let ctx = SessionContext::new();
        let df = ctx
            .read_parquet(self.path_str()?, ParquetReadOptions::default())
            .await?;
        let columns: Vec<String> = df
            .schema()
            .fields()
            .iter()
            .map(|field| field.name().to_string())
            .collect();

        let mut rows = vec![];
        for batch in df.collect().await? {
            let utf8 = batch
                .columns()
                .iter()
                .map(to_utf8)
                .collect::<Result<Vec<_>, _>>()?;
            let strings = utf8
                .iter()
                .map(|array| {
                    array
                        .as_any()
                        .downcast_ref::<StringArray>()
                        .ok_or_else(|| Error::store("column did not cast to UTF-8"))
                })
                .collect::<Result<Vec<_>, _>>()?;

            for i in 0..batch.num_rows() {
                rows.push(
                    strings
                        .iter()
                        .map(|sa| {
                            if sa.is_valid(i) {
                                sa.value(i).to_string()
                            } else {
                                String::new()
                            }
                        })
                        .collect(),
                );
            }
        }

        Table::new(columns, rows).map_err(|e| {
            Error::store(format!("malformed table in {}: {e}", self.path.display()))
        })
    }

    async fn replace_all(&self, table: &Table) -> Result<(), Error> {
        if table.columns().is_empty() {
            return Err(Error::store("refusing to write a table without columns"));
        }

        let batch = table_to_batch(table)?;
        let partial = self.partial_path();

        let written = (|| -> Result<(), Error> {
            let file = fs::File::create(&partial)?;
            let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
            writer.write(&batch)?;
            writer.close()?;
            fs::rename(&partial, &self.path)?;
            Ok(())
        })();

        if written.is_err() {
            let _ = fs::remove_file(&partial);
        }
        written?;

        info!("wrote {} rows to {}", table.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_table() -> Table {
        Table::new(
            vec!["date_start".to_string(), "spend".to_string()],
            vec![
                vec!["2024-01-01".to_string(), "10".to_string()],
                vec!["2024-01-02".to_string(), String::new()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_non_parquet_path() {
        assert!(matches!(
            ParquetTableStore::new("/tmp/table.csv"),
            Err(Error::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = ParquetTableStore::new(temp_dir.path().join("report.parquet")).unwrap();

        let table = store.read_all().await.unwrap();
        assert_eq!(table, Table::empty());
    }

    #[tokio::test]
    async fn test_replace_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let store = ParquetTableStore::new(temp_dir.path().join("report.parquet")).unwrap();

        store.replace_all(&sample_table()).await.unwrap();
        assert_eq!(store.read_all().await.unwrap(), sample_table());

        let smaller = Table::new(
            vec!["date_start".to_string()],
            vec![vec!["2024-02-01".to_string()]],
        )
        .unwrap();
        store.replace_all(&smaller).await.unwrap();
        assert_eq!(store.read_all().await.unwrap(), smaller);
        assert!(!store.partial_path().exists());
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("report.parquet");
        fs::write(&path, "dummy data").unwrap();
        let store = ParquetTableStore::new(&path).unwrap();

        let err = store.read_all().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Store);
    }

    #[tokio::test]
    async fn test_refuses_table_without_columns() {
        let temp_dir = TempDir::new().unwrap();
        let store = ParquetTableStore::new(temp_dir.path().join("report.parquet")).unwrap();

        assert!(store.replace_all(&Table::empty()).await.is_err());
        assert!(!store.path().exists());
    }
}

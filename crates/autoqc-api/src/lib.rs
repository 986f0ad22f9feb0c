use std::path::PathBuf;

use anyhow::{anyhow, Result};
use autoqc_core::{TestCatalog, DEFAULT_CATEGORY_COLUMN};
use autoqc_store_sqlite::{CategorySummary, ResultStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const API_CONTRACT_VERSION: &str = "analysis.v1";

pub const DEFAULT_DATABASE: &str = "iquod.db";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalysisSettings {
    pub database: PathBuf,
    /// Test columns every results table carries, in column order.
    pub tests: Vec<String>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self { database: PathBuf::from(DEFAULT_DATABASE), tests: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryRequest {
    pub table: String,
    pub metadata: Vec<String>,
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub contract_version: String,
    pub table: String,
    pub columns: Vec<String>,
    pub records: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WhyFlagRequest {
    pub table: String,
    pub uid: i64,
    pub expressions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WhyFlagResult {
    pub contract_version: String,
    pub table: String,
    pub uid: i64,
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppendCategoryRequest {
    pub table: String,
    /// Defaults to [`DEFAULT_CATEGORY_COLUMN`].
    pub column: Option<String>,
    pub expressions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppendCategoryResult {
    pub contract_version: String,
    pub summary: CategorySummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DumpRowResult {
    pub contract_version: String,
    pub table: String,
    pub uid: i64,
    pub columns: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct QcAnalysisApi {
    db_path: PathBuf,
    catalog: TestCatalog,
}

impl QcAnalysisApi {
    #[must_use]
    pub fn new(db_path: PathBuf, catalog: TestCatalog) -> Self {
        Self { db_path, catalog }
    }

    /// Build the facade from deserialized settings.
    ///
    /// # Errors
    /// Returns an error when the configured test names do not form a valid catalog.
    pub fn from_settings(settings: &AnalysisSettings) -> Result<Self> {
        let catalog = TestCatalog::new(&settings.tests)?;
        Ok(Self::new(settings.database.clone(), catalog))
    }

    #[must_use]
    pub fn catalog(&self) -> &TestCatalog {
        &self.catalog
    }

    fn open_store(&self) -> Result<ResultStore> {
        ResultStore::open(&self.db_path)
    }

    /// Project metadata plus every catalog test from one table.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened, the projection is
    /// invalid, or a stored value cannot be decoded.
    pub fn query_frame(&self, input: QueryRequest) -> Result<QueryResult> {
        let store = self.open_store()?;
        let frame =
            store.project(&input.table, &input.metadata, input.filter.as_deref(), &self.catalog)?;
        Ok(QueryResult {
            contract_version: API_CONTRACT_VERSION.to_string(),
            table: input.table,
            records: frame.to_records(),
            columns: frame.columns,
        })
    }

    /// Explain which expressions flag one profile.
    ///
    /// # Errors
    /// Returns an error when the expressions do not compile or the row is missing.
    pub fn why_flag(&self, input: WhyFlagRequest) -> Result<WhyFlagResult> {
        let store = self.open_store()?;
        let triggers = store.why_flag(&input.table, input.uid, &input.expressions, &self.catalog)?;
        Ok(WhyFlagResult {
            contract_version: API_CONTRACT_VERSION.to_string(),
            table: input.table,
            uid: input.uid,
            triggers,
        })
    }

    /// Categorize every row of a table and persist the result as a new column.
    ///
    /// # Errors
    /// Returns an error when the column already exists, truth is missing, or
    /// persistence fails part-way.
    pub fn append_category(&self, input: AppendCategoryRequest) -> Result<AppendCategoryResult> {
        let mut store = self.open_store()?;
        let column = input.column.as_deref().unwrap_or(DEFAULT_CATEGORY_COLUMN);
        let summary =
            store.append_category(&input.table, column, &input.expressions, &self.catalog)?;
        Ok(AppendCategoryResult { contract_version: API_CONTRACT_VERSION.to_string(), summary })
    }

    /// Every stored column for one uid.
    ///
    /// # Errors
    /// Returns an error when no row has `uid` or a cell cannot be decoded.
    pub fn dump_row(&self, table: &str, uid: i64) -> Result<DumpRowResult> {
        let store = self.open_store()?;
        let columns = store
            .dump_row(table, uid, &self.catalog)?
            .ok_or_else(|| anyhow!("no row with uid {uid} in {table}"))?;
        Ok(DumpRowResult {
            contract_version: API_CONTRACT_VERSION.to_string(),
            table: table.to_string(),
            uid,
            columns,
        })
    }
}

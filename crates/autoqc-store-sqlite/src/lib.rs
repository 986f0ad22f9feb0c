//! SQLite row store for per-profile QC decisions.
//!
//! One table per run, keyed by `uid`. Every catalog test is a TEXT column
//! holding a stored decision and `truth` holds the packed per-level ground
//! truth. Domain failures are raised as [`QcError`] inside the `anyhow`
//! chain so callers can `downcast_ref::<QcError>()`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use autoqc_core::{
    categorize, decode_stored_decision, decode_stored_integer, encode_stored_decision,
    pack_truth, truth_any, unpack_truth, unpack_truth_bytes, validate_identifier,
    CategoryAssignment, CategoryCounts, DecisionFrame, DecisionRow, DecodeError, Discriminator,
    QcError, TestCatalog, LEVEL_TRUTH_COLUMN, TRUTH_COLUMN, UID_COLUMN,
};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Profile metadata columns created alongside the test columns.
pub const RESULT_METADATA_COLUMNS: [(&str, &str); 11] = [
    ("year", "INTEGER"),
    ("month", "INTEGER"),
    ("day", "INTEGER"),
    ("time", "REAL"),
    ("lat", "REAL"),
    ("long", "REAL"),
    ("country", "TEXT"),
    ("cruise", "INTEGER"),
    ("ocdb", "TEXT"),
    ("probe", "INTEGER"),
    ("training", "INTEGER"),
];

pub struct ResultStore {
    conn: Connection,
}

/// One profile's results as written by the batch runner.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultRow {
    pub uid: i64,
    pub metadata: Map<String, Value>,
    pub decisions: BTreeMap<String, bool>,
    pub level_truth: Option<Vec<bool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryWriteReport {
    pub rows_written: usize,
    /// Assignments whose uid matched no stored row.
    pub unmatched_uids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategorySummary {
    pub table: String,
    pub column: String,
    pub counts: CategoryCounts,
    pub rows_written: usize,
    pub unmatched_uids: Vec<i64>,
}

impl ResultStore {
    /// Open a SQLite-backed result store and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Create a results table with the metadata columns, `truth`, and one
    /// TEXT column per catalog test. Existing tables are left untouched.
    ///
    /// # Errors
    /// Returns [`QcError::InvalidIdentifier`] for a bad table name or a test
    /// that collides with a metadata column, or the `SQLite` failure.
    pub fn create_results_table(&self, table: &str, catalog: &TestCatalog) -> Result<()> {
        validate_identifier(table)?;

        let mut columns = vec![format!("{UID_COLUMN} INTEGER PRIMARY KEY")];
        for (name, kind) in RESULT_METADATA_COLUMNS {
            columns.push(format!("{name} {kind}"));
        }
        columns.push(format!("{TRUTH_COLUMN} TEXT"));
        for test in catalog.tests() {
            if RESULT_METADATA_COLUMNS.iter().any(|(name, _)| name.eq_ignore_ascii_case(test)) {
                return Err(QcError::InvalidIdentifier(test.clone()).into());
            }
            columns.push(format!("{test} TEXT"));
        }

        self.conn
            .execute_batch(&format!("CREATE TABLE IF NOT EXISTS {table} ({});", columns.join(", ")))
            .with_context(|| format!("failed to create results table {table}"))?;
        debug!(table, tests = catalog.len(), "results table ready");
        Ok(())
    }

    /// Insert or replace one profile's results.
    ///
    /// # Errors
    /// Returns [`QcError::UnknownTest`] for decisions outside `catalog`,
    /// [`QcError::InvalidIdentifier`] for bad metadata keys, or the `SQLite`
    /// failure.
    pub fn write_result_row(
        &self,
        table: &str,
        row: &ResultRow,
        catalog: &TestCatalog,
    ) -> Result<()> {
        insert_result_row(&self.conn, table, row, catalog)
    }

    /// Insert or replace many rows inside one transaction.
    ///
    /// # Errors
    /// Returns the first row failure; no row is written in that case.
    pub fn write_result_rows(
        &mut self,
        table: &str,
        rows: &[ResultRow],
        catalog: &TestCatalog,
    ) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        for row in rows {
            insert_result_row(&tx, table, row, catalog)?;
        }
        tx.commit().context("failed to commit result rows")?;
        Ok(())
    }

    /// Column names of `table` in declaration order; empty when the table
    /// does not exist.
    ///
    /// # Errors
    /// Returns an error when the table metadata cannot be read.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        validate_identifier(table)?;
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .with_context(|| format!("failed to inspect table_info for {table}"))?;
        let mut rows = stmt.query([])?;

        let mut columns = Vec::new();
        while let Some(row) = rows.next()? {
            columns.push(row.get::<_, String>(1)?);
        }
        Ok(columns)
    }

    /// Project `metadata_fields` plus every catalog test from `table`.
    ///
    /// `filter` is spliced verbatim as the body of a `WHERE` clause. When
    /// `truth` is among the fields its packed levels land in
    /// [`DecisionRow::level_truth`] and the row's truth is their OR.
    ///
    /// # Errors
    /// Returns [`QcError::InvalidIdentifier`] for bad or clashing field
    /// names, [`QcError::Decode`] for undecodable cells, or the `SQLite`
    /// failure.
    pub fn project<S: AsRef<str>>(
        &self,
        table: &str,
        metadata_fields: &[S],
        filter: Option<&str>,
        catalog: &TestCatalog,
    ) -> Result<DecisionFrame> {
        validate_identifier(table)?;
        let fields = metadata_fields.iter().map(AsRef::as_ref).collect::<Vec<&str>>();
        let mut seen = BTreeSet::new();
        for field in &fields {
            validate_identifier(field)?;
            if *field == LEVEL_TRUTH_COLUMN || catalog.contains(field) || !seen.insert(*field) {
                return Err(QcError::InvalidIdentifier((*field).to_string()).into());
            }
        }

        let selected = fields
            .iter()
            .copied()
            .chain(catalog.tests().iter().map(String::as_str))
            .collect::<Vec<&str>>();
        if selected.is_empty() {
            return Err(anyhow!("projection over {table} selects no columns"));
        }

        let mut sql = format!("SELECT {} FROM {table}", selected.join(", "));
        if let Some(filter) = filter.map(str::trim).filter(|filter| !filter.is_empty()) {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }

        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("failed to prepare projection: {sql}"))?;
        let mut rows = stmt.query([]).with_context(|| format!("failed to run projection: {sql}"))?;

        let wants_truth = fields.contains(&TRUTH_COLUMN);
        let mut frame = DecisionFrame {
            columns: selected.iter().map(|column| (*column).to_string()).collect(),
            rows: Vec::new(),
        };
        if wants_truth {
            frame.columns.push(LEVEL_TRUTH_COLUMN.to_string());
        }

        let mut ordinal = 0_usize;
        while let Some(row) = rows.next()? {
            let mut decoded = DecisionRow::default();
            for (index, field) in fields.iter().enumerate() {
                let value = row.get_ref(index)?;
                if *field == TRUTH_COLUMN {
                    let levels = decode_truth(value)
                        .map_err(QcError::from)
                        .with_context(|| format!("failed to decode truth in row {ordinal}"))?;
                    decoded.truth = levels.as_deref().map(truth_any);
                    decoded.level_truth = levels;
                } else {
                    decoded.metadata.insert((*field).to_string(), json_from_sql(value));
                }
            }

            for (offset, test) in catalog.tests().iter().enumerate() {
                let value = row.get_ref(fields.len() + offset)?;
                let flagged = decode_decision(value).map_err(QcError::from).with_context(|| {
                    format!("failed to decode {test} in row {ordinal} of {table}")
                })?;
                decoded.decisions.insert(test.clone(), flagged);
            }

            frame.rows.push(decoded);
            ordinal += 1;
        }

        debug!(table, rows = frame.len(), "projected decision frame");
        Ok(frame)
    }

    /// Add an empty INTEGER column.
    ///
    /// # Errors
    /// Returns [`QcError::SchemaConflict`] when the column already exists.
    pub fn add_integer_column(&self, table: &str, column: &str) -> Result<()> {
        validate_identifier(table)?;
        validate_identifier(column)?;
        if self.table_columns(table)?.iter().any(|name| name.eq_ignore_ascii_case(column)) {
            return Err(QcError::SchemaConflict {
                table: table.to_string(),
                column: column.to_string(),
            }
            .into());
        }

        self.conn
            .execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} INTEGER;"))
            .with_context(|| format!("failed to add column {column} to {table}"))?;
        Ok(())
    }

    /// Add `column` and store each assignment's category code by uid.
    ///
    /// The column is added on its own; the updates then run in a single
    /// transaction. If that transaction fails the column stays behind with
    /// no values and the failure is reported, never retried.
    ///
    /// # Errors
    /// Returns [`QcError::MissingUid`] before any schema change when an
    /// assignment cannot be keyed, [`QcError::SchemaConflict`] when the
    /// column exists and [`QcError::PersistencePartialFailure`] when any
    /// update fails.
    pub fn write_categories(
        &mut self,
        table: &str,
        column: &str,
        assignments: &[CategoryAssignment],
    ) -> Result<CategoryWriteReport> {
        let keyed = assignments
            .iter()
            .enumerate()
            .map(|(index, assignment)| {
                assignment
                    .uid
                    .map(|uid| (uid, assignment.category.code()))
                    .ok_or(QcError::MissingUid(index))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.add_integer_column(table, column)?;

        match update_categories(&mut self.conn, table, column, &keyed) {
            Ok(report) => Ok(report),
            Err(err) => {
                warn!(table, column, error = %format!("{err:#}"), "category update rolled back");
                Err(QcError::PersistencePartialFailure {
                    table: table.to_string(),
                    column: column.to_string(),
                    written: 0,
                    total: assignments.len(),
                    message: format!("{err:#}"),
                }
                .into())
            }
        }
    }

    /// Categorize every row of `table` against `expressions` and persist the
    /// result into a new `column`.
    ///
    /// # Errors
    /// Returns configuration errors before touching the schema, then the
    /// projection, categorization or persistence failure.
    pub fn append_category<S: AsRef<str>>(
        &mut self,
        table: &str,
        column: &str,
        expressions: &[S],
        catalog: &TestCatalog,
    ) -> Result<CategorySummary> {
        let discriminator = Discriminator::compile(expressions, catalog)?;
        let frame = self.project(table, &[TRUTH_COLUMN, UID_COLUMN], None, catalog)?;
        let assignments = categorize(&frame.rows, &discriminator)?;
        let report = self.write_categories(table, column, &assignments)?;
        let counts = CategoryCounts::tally(&assignments);

        info!(
            table,
            column,
            true_positive = counts.true_positive,
            true_negative = counts.true_negative,
            false_positive = counts.false_positive,
            false_negative = counts.false_negative,
            unmatched = report.unmatched_uids.len(),
            "categories appended"
        );

        Ok(CategorySummary {
            table: table.to_string(),
            column: column.to_string(),
            counts,
            rows_written: report.rows_written,
            unmatched_uids: report.unmatched_uids,
        })
    }

    /// Expressions that flag the profile stored under `uid`.
    ///
    /// # Errors
    /// Returns an error when the expressions do not compile, no row has
    /// `uid`, or the row cannot be decoded.
    pub fn why_flag<S: AsRef<str>>(
        &self,
        table: &str,
        uid: i64,
        expressions: &[S],
        catalog: &TestCatalog,
    ) -> Result<Vec<String>> {
        let discriminator = Discriminator::compile(expressions, catalog)?;
        let filter = format!("{UID_COLUMN} = {uid}");
        let frame = self.project::<&str>(table, &[], Some(&filter), catalog)?;
        let row = frame.rows.first().ok_or_else(|| anyhow!("no row with uid {uid} in {table}"))?;
        Ok(discriminator.triggers(row)?)
    }

    /// Every stored column for `uid`, with test columns decoded to booleans
    /// and `truth` reduced to whether any level is flagged.
    ///
    /// # Errors
    /// Returns an error when the query fails or a test or truth cell cannot
    /// be decoded.
    pub fn dump_row(
        &self,
        table: &str,
        uid: i64,
        catalog: &TestCatalog,
    ) -> Result<Option<Map<String, Value>>> {
        validate_identifier(table)?;
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {table} WHERE {UID_COLUMN} = ?1"))
            .with_context(|| format!("failed to prepare row dump for {table}"))?;
        let names = stmt.column_names().into_iter().map(str::to_string).collect::<Vec<_>>();
        let mut rows = stmt.query(params![uid])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let mut dump = Map::new();
        for (index, name) in names.iter().enumerate() {
            let value = row.get_ref(index)?;
            let decoded = if name == TRUTH_COLUMN {
                let levels = decode_truth(value)
                    .map_err(QcError::from)
                    .with_context(|| format!("failed to decode truth for uid {uid}"))?;
                levels.as_deref().map_or(Value::Null, |levels| Value::Bool(truth_any(levels)))
            } else if catalog.find_column(name).is_some() {
                let flagged = decode_decision(value)
                    .map_err(QcError::from)
                    .with_context(|| format!("failed to decode {name} for uid {uid}"))?;
                Value::Bool(flagged)
            } else {
                json_from_sql(value)
            };
            dump.insert(name.clone(), decoded);
        }
        Ok(Some(dump))
    }
}

fn insert_result_row(
    conn: &Connection,
    table: &str,
    row: &ResultRow,
    catalog: &TestCatalog,
) -> Result<()> {
    validate_identifier(table)?;

    let mut columns = vec![UID_COLUMN.to_string()];
    let mut values = vec![SqlValue::Integer(row.uid)];
    for (key, value) in &row.metadata {
        validate_identifier(key)?;
        if [UID_COLUMN, TRUTH_COLUMN, LEVEL_TRUTH_COLUMN].contains(&key.as_str())
            || catalog.contains(key)
        {
            return Err(QcError::InvalidIdentifier(key.clone()).into());
        }
        columns.push(key.clone());
        values.push(sql_from_json(value));
    }
    if let Some(levels) = &row.level_truth {
        columns.push(TRUTH_COLUMN.to_string());
        values.push(SqlValue::Text(pack_truth(levels)));
    }
    for (test, flagged) in &row.decisions {
        if !catalog.contains(test) {
            return Err(QcError::UnknownTest(test.clone()).into());
        }
        columns.push(test.clone());
        values.push(SqlValue::Text(encode_stored_decision(*flagged).to_string()));
    }

    let placeholders = (1..=values.len()).map(|slot| format!("?{slot}")).collect::<Vec<_>>();
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        ),
        params_from_iter(values.iter()),
    )
    .with_context(|| format!("failed to write results for uid {} into {table}", row.uid))?;
    Ok(())
}

fn update_categories(
    conn: &mut Connection,
    table: &str,
    column: &str,
    keyed: &[(i64, i64)],
) -> Result<CategoryWriteReport> {
    let tx = conn.transaction().context("failed to start transaction")?;
    let mut report = CategoryWriteReport { rows_written: 0, unmatched_uids: Vec::new() };

    {
        let mut stmt = tx
            .prepare(&format!("UPDATE {table} SET {column} = ?1 WHERE {UID_COLUMN} = ?2"))
            .with_context(|| format!("failed to prepare category update for {table}"))?;
        for &(uid, code) in keyed {
            let changed = stmt
                .execute(params![code, uid])
                .with_context(|| format!("failed to write category for uid {uid}"))?;
            if changed == 0 {
                report.unmatched_uids.push(uid);
            } else {
                report.rows_written += changed;
            }
        }
    }

    tx.commit().context("failed to commit category updates")?;
    Ok(report)
}

fn decode_decision(value: ValueRef<'_>) -> Result<bool, DecodeError> {
    match value {
        ValueRef::Null => Err(DecodeError::NullDecision),
        ValueRef::Integer(raw) => decode_stored_integer(raw),
        ValueRef::Real(raw) => Err(DecodeError::InvalidStoredDecision(raw.to_string())),
        ValueRef::Text(raw) | ValueRef::Blob(raw) => {
            decode_stored_decision(&String::from_utf8_lossy(raw))
        }
    }
}

fn decode_truth(value: ValueRef<'_>) -> Result<Option<Vec<bool>>, DecodeError> {
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Text(raw) => unpack_truth(&String::from_utf8_lossy(raw)).map(Some),
        ValueRef::Blob(raw) => unpack_truth_bytes(raw).map(Some),
        ValueRef::Integer(raw) => Err(DecodeError::InvalidStoredDecision(raw.to_string())),
        ValueRef::Real(raw) => Err(DecodeError::InvalidStoredDecision(raw.to_string())),
    }
}

fn json_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(raw) => Value::from(raw),
        ValueRef::Real(raw) => serde_json::Number::from_f64(raw).map_or(Value::Null, Value::Number),
        ValueRef::Text(raw) => Value::String(String::from_utf8_lossy(raw).into_owned()),
        ValueRef::Blob(raw) => Value::Array(raw.iter().map(|byte| Value::from(*byte)).collect()),
    }
}

fn sql_from_json(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match (number.as_i64(), number.as_f64()) {
            (Some(integer), _) => SqlValue::Integer(integer),
            (None, Some(real)) => SqlValue::Real(real),
            (None, None) => SqlValue::Text(number.to_string()),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use autoqc_core::ConfusionCategory;
    use serde_json::json;
    use ulid::Ulid;

    use super::*;

    const TABLE: &str = "quota";

    fn catalog() -> TestCatalog {
        match TestCatalog::new(&["spike", "gradient", "range"]) {
            Ok(catalog) => catalog,
            Err(err) => panic!("fixture catalog should build: {err}"),
        }
    }

    fn mk_row(uid: i64, spike: bool, gradient: bool, range: bool, levels: &[bool]) -> ResultRow {
        let mut metadata = Map::new();
        metadata.insert("cruise".to_string(), json!(uid * 10));
        metadata.insert("lat".to_string(), json!(-12.5));
        ResultRow {
            uid,
            metadata,
            decisions: BTreeMap::from([
                ("spike".to_string(), spike),
                ("gradient".to_string(), gradient),
                ("range".to_string(), range),
            ]),
            level_truth: Some(levels.to_vec()),
        }
    }

    fn seeded_store() -> Result<ResultStore> {
        let mut store = ResultStore::open(Path::new(":memory:"))?;
        let catalog = catalog();
        store.create_results_table(TABLE, &catalog)?;
        store.write_result_rows(
            TABLE,
            &[
                mk_row(1, true, false, false, &[false, true]),
                mk_row(2, false, false, false, &[false, false]),
                mk_row(3, false, true, true, &[false, false, false]),
                mk_row(4, false, false, false, &[true]),
            ],
            &catalog,
        )?;
        Ok(store)
    }

    fn qc_error(err: &anyhow::Error) -> QcError {
        match err.downcast_ref::<QcError>() {
            Some(qc) => qc.clone(),
            None => panic!("expected a QcError, got: {err:#}"),
        }
    }

    #[test]
    fn projection_decodes_tests_and_unpacks_truth() -> Result<()> {
        let store = seeded_store()?;
        let frame = store.project(TABLE, &["truth", "uid"], None, &catalog())?;

        assert_eq!(frame.columns, vec!["truth", "uid", "spike", "gradient", "range", "leveltruth"]);
        assert_eq!(frame.len(), 4);

        let first = &frame.rows[0];
        assert_eq!(first.uid(), Some(1));
        assert_eq!(first.truth, Some(true));
        assert_eq!(first.level_truth, Some(vec![false, true]));
        assert_eq!(first.decisions.get("spike"), Some(&true));
        assert_eq!(first.decisions.get("gradient"), Some(&false));
        assert!(!first.metadata.contains_key("truth"));

        assert_eq!(frame.rows[1].truth, Some(false));
        Ok(())
    }

    #[test]
    fn projection_without_truth_has_no_level_column() -> Result<()> {
        let store = seeded_store()?;
        let frame = store.project(TABLE, &["uid", "cruise", "lat"], None, &catalog())?;

        assert_eq!(frame.columns, vec!["uid", "cruise", "lat", "spike", "gradient", "range"]);
        assert_eq!(frame.rows[2].metadata.get("cruise"), Some(&json!(30)));
        assert_eq!(frame.rows[2].metadata.get("lat"), Some(&json!(-12.5)));
        assert_eq!(frame.rows[2].truth, None);
        assert_eq!(frame.rows[2].level_truth, None);
        Ok(())
    }

    #[test]
    fn filter_is_applied_verbatim() -> Result<()> {
        let store = seeded_store()?;
        let frame = store.project(TABLE, &["uid"], Some("cruise >= 20 AND uid != 4"), &catalog())?;
        let uids = frame.rows.iter().filter_map(DecisionRow::uid).collect::<Vec<_>>();
        assert_eq!(uids, vec![2, 3]);
        Ok(())
    }

    #[test]
    fn reprojection_is_idempotent() -> Result<()> {
        let store = seeded_store()?;
        let first = store.project(TABLE, &["truth", "uid"], None, &catalog())?;
        let second = store.project(TABLE, &["truth", "uid"], None, &catalog())?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn legacy_text_and_integer_decisions_decode() -> Result<()> {
        let store = seeded_store()?;
        store.conn.execute(
            &format!(
                "UPDATE {TABLE} SET spike = 'True', gradient = 1, range = 'False' WHERE uid = 2"
            ),
            [],
        )?;

        let frame = store.project(TABLE, &["uid"], Some("uid = 2"), &catalog())?;
        let row = &frame.rows[0];
        assert_eq!(row.decisions.get("spike"), Some(&true));
        assert_eq!(row.decisions.get("gradient"), Some(&true));
        assert_eq!(row.decisions.get("range"), Some(&false));
        Ok(())
    }

    #[test]
    fn undecodable_decision_is_a_decode_error() -> Result<()> {
        let store = seeded_store()?;
        store.conn.execute(&format!("UPDATE {TABLE} SET spike = 'maybe' WHERE uid = 3"), [])?;

        let err = match store.project(TABLE, &["uid"], None, &catalog()) {
            Ok(_) => panic!("projection should fail on an invalid decision"),
            Err(err) => err,
        };
        assert_eq!(
            qc_error(&err),
            QcError::Decode(DecodeError::InvalidStoredDecision("maybe".to_string()))
        );
        Ok(())
    }

    #[test]
    fn null_decision_is_a_decode_error() -> Result<()> {
        let store = seeded_store()?;
        store.conn.execute(&format!("UPDATE {TABLE} SET range = NULL WHERE uid = 1"), [])?;

        let err = match store.project(TABLE, &["uid"], None, &catalog()) {
            Ok(_) => panic!("projection should fail on a null decision"),
            Err(err) => err,
        };
        assert_eq!(qc_error(&err), QcError::Decode(DecodeError::NullDecision));
        Ok(())
    }

    #[test]
    fn blob_truth_and_bad_truth_markers() -> Result<()> {
        let store = seeded_store()?;
        store.conn.execute(
            &format!("UPDATE {TABLE} SET truth = ?1 WHERE uid = 2"),
            params![vec![0_u8, 0, 1]],
        )?;
        let frame = store.project(TABLE, &["truth"], Some("uid = 2"), &catalog())?;
        assert_eq!(frame.rows[0].level_truth, Some(vec![false, false, true]));
        assert_eq!(frame.rows[0].truth, Some(true));

        store.conn.execute(&format!("UPDATE {TABLE} SET truth = '01x' WHERE uid = 2"), [])?;
        let err = match store.project(TABLE, &["truth"], Some("uid = 2"), &catalog()) {
            Ok(_) => panic!("projection should fail on a bad truth marker"),
            Err(err) => err,
        };
        assert_eq!(qc_error(&err), QcError::Decode(DecodeError::InvalidTruthMarker('x', 2)));
        Ok(())
    }

    #[test]
    fn projection_rejects_unsafe_and_clashing_fields() -> Result<()> {
        let store = seeded_store()?;
        let cases: [(&str, &[&str]); 4] = [
            ("quota; DROP TABLE quota", &["uid"]),
            (TABLE, &["uid, truth"]),
            (TABLE, &["spike"]),
            (TABLE, &["uid", "uid"]),
        ];
        for (table, fields) in cases {
            let err = match store.project(table, fields, None, &catalog()) {
                Ok(_) => panic!("projection of {fields:?} from {table} should fail"),
                Err(err) => err,
            };
            assert!(matches!(qc_error(&err), QcError::InvalidIdentifier(_)));
        }
        Ok(())
    }

    #[test]
    fn unknown_decision_is_rejected_on_write() -> Result<()> {
        let store = seeded_store()?;
        let mut row = mk_row(9, true, true, true, &[true]);
        row.decisions.insert("salinity_spike".to_string(), true);

        let err = match store.write_result_row(TABLE, &row, &catalog()) {
            Ok(()) => panic!("unknown decision should be rejected"),
            Err(err) => err,
        };
        assert_eq!(qc_error(&err), QcError::UnknownTest("salinity_spike".to_string()));
        Ok(())
    }

    #[test]
    fn append_category_covers_all_four_outcomes() -> Result<()> {
        let mut store = seeded_store()?;
        let summary =
            store.append_category(TABLE, "category", &["spike", "gradient&range"], &catalog())?;

        assert_eq!(summary.rows_written, 4);
        assert!(summary.unmatched_uids.is_empty());
        assert_eq!(summary.counts.total(), 4);

        let mut stmt =
            store.conn.prepare(&format!("SELECT uid, category FROM {TABLE} ORDER BY uid"))?;
        let stored = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        assert_eq!(
            stored,
            vec![
                (1, ConfusionCategory::TruePositive.code()),
                (2, ConfusionCategory::TrueNegative.code()),
                (3, ConfusionCategory::FalsePositive.code()),
                (4, ConfusionCategory::FalseNegative.code()),
            ]
        );
        Ok(())
    }

    #[test]
    fn append_category_twice_is_a_schema_conflict() -> Result<()> {
        let mut store = seeded_store()?;
        store.append_category(TABLE, "category", &["spike"], &catalog())?;

        let err = match store.append_category(TABLE, "category", &["spike"], &catalog()) {
            Ok(_) => panic!("second append should conflict"),
            Err(err) => err,
        };
        assert_eq!(
            qc_error(&err),
            QcError::SchemaConflict { table: TABLE.to_string(), column: "category".to_string() }
        );
        Ok(())
    }

    #[test]
    fn bad_expression_leaves_schema_untouched() -> Result<()> {
        let mut store = seeded_store()?;
        let err = match store.append_category(TABLE, "category", &["spike&density"], &catalog()) {
            Ok(_) => panic!("unknown test should fail to compile"),
            Err(err) => err,
        };
        assert_eq!(qc_error(&err), QcError::UnknownTest("density".to_string()));
        assert!(!store.table_columns(TABLE)?.contains(&"category".to_string()));
        Ok(())
    }

    #[test]
    fn failed_updates_report_partial_failure() -> Result<()> {
        let mut store = seeded_store()?;
        store.conn.execute_batch(&format!(
            "CREATE TRIGGER quota_read_only BEFORE UPDATE ON {TABLE}
             BEGIN SELECT RAISE(ABORT, 'quota is read only'); END;"
        ))?;

        let err = match store.append_category(TABLE, "category", &["spike"], &catalog()) {
            Ok(_) => panic!("updates should be aborted by the trigger"),
            Err(err) => err,
        };
        match qc_error(&err) {
            QcError::PersistencePartialFailure { written, total, message, .. } => {
                assert_eq!(written, 0);
                assert_eq!(total, 4);
                assert!(message.contains("read only"), "unexpected message: {message}");
            }
            other => panic!("expected PersistencePartialFailure, got {other:?}"),
        }
        assert!(store.table_columns(TABLE)?.contains(&"category".to_string()));

        let nulls: i64 = store.conn.query_row(
            &format!("SELECT COUNT(*) FROM {TABLE} WHERE category IS NULL"),
            [],
            |row| row.get(0),
        )?;
        assert_eq!(nulls, 4);
        Ok(())
    }

    #[test]
    fn unmatched_assignments_are_reported() -> Result<()> {
        let mut store = seeded_store()?;
        let assignments = vec![
            CategoryAssignment {
                uid: Some(1),
                verdict: true,
                truth: true,
                category: ConfusionCategory::TruePositive,
            },
            CategoryAssignment {
                uid: Some(404),
                verdict: false,
                truth: false,
                category: ConfusionCategory::TrueNegative,
            },
        ];

        let report = store.write_categories(TABLE, "verdict", &assignments)?;
        assert_eq!(report, CategoryWriteReport { rows_written: 1, unmatched_uids: vec![404] });
        Ok(())
    }

    #[test]
    fn assignment_without_uid_is_rejected_before_schema_change() -> Result<()> {
        let mut store = seeded_store()?;
        let assignments = vec![
            CategoryAssignment {
                uid: Some(1),
                verdict: true,
                truth: true,
                category: ConfusionCategory::TruePositive,
            },
            CategoryAssignment {
                uid: None,
                verdict: false,
                truth: true,
                category: ConfusionCategory::FalseNegative,
            },
        ];

        let err = match store.write_categories(TABLE, "verdict", &assignments) {
            Ok(report) => panic!("unkeyed assignment should fail, got {report:?}"),
            Err(err) => err,
        };
        assert_eq!(qc_error(&err), QcError::MissingUid(1));
        assert!(!store.table_columns(TABLE)?.contains(&"verdict".to_string()));
        Ok(())
    }

    #[test]
    fn text_uid_tables_are_categorized() -> Result<()> {
        let mut store = ResultStore::open(Path::new(":memory:"))?;
        store.conn.execute_batch(
            "CREATE TABLE ext (uid TEXT, truth TEXT, spike TEXT);
             INSERT INTO ext (uid, truth, spike) VALUES ('1', '01', '1'), ('2', '00', '0');",
        )?;
        let catalog = TestCatalog::new(&["spike"])?;

        let summary = store.append_category("ext", "category", &["spike"], &catalog)?;
        assert_eq!(summary.rows_written, 2);
        assert!(summary.unmatched_uids.is_empty());

        let mut stmt = store.conn.prepare("SELECT uid, category FROM ext ORDER BY uid")?;
        let stored = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        assert_eq!(
            stored,
            vec![
                ("1".to_string(), Some(ConfusionCategory::TruePositive.code())),
                ("2".to_string(), Some(ConfusionCategory::TrueNegative.code())),
            ]
        );
        Ok(())
    }

    #[test]
    fn why_flag_lists_fired_expressions() -> Result<()> {
        let store = seeded_store()?;
        let expressions = ["spike", "gradient&range", "range"];

        assert_eq!(store.why_flag(TABLE, 1, &expressions, &catalog())?, vec!["spike"]);
        assert_eq!(
            store.why_flag(TABLE, 3, &expressions, &catalog())?,
            vec!["gradient&range", "range"]
        );
        assert!(store.why_flag(TABLE, 2, &expressions, &catalog())?.is_empty());
        assert!(store.why_flag(TABLE, 77, &expressions, &catalog()).is_err());
        Ok(())
    }

    #[test]
    fn dump_row_decodes_tests_and_reduces_truth() -> Result<()> {
        let store = seeded_store()?;
        let dump = match store.dump_row(TABLE, 1, &catalog())? {
            Some(dump) => dump,
            None => panic!("uid 1 should exist"),
        };

        assert_eq!(dump.get("uid"), Some(&json!(1)));
        assert_eq!(dump.get("cruise"), Some(&json!(10)));
        assert_eq!(dump.get("year"), Some(&Value::Null));
        assert_eq!(dump.get("truth"), Some(&json!(true)));
        assert_eq!(dump.get("spike"), Some(&json!(true)));
        assert_eq!(dump.get("range"), Some(&json!(false)));
        assert_eq!(dump.keys().next().map(String::as_str), Some("uid"));

        assert!(store.dump_row(TABLE, 404, &catalog())?.is_none());
        Ok(())
    }

    #[test]
    fn results_persist_across_reopen() -> Result<()> {
        let db_file = std::env::temp_dir().join(format!("autoqc-results-{}.sqlite3", Ulid::new()));
        let catalog = catalog();
        {
            let mut store = ResultStore::open(&db_file)?;
            store.create_results_table(TABLE, &catalog)?;
            let rows = [mk_row(7, true, true, false, &[true, false])];
            store.write_result_rows(TABLE, &rows, &catalog)?;
        }

        let reopened = ResultStore::open(&db_file)?;
        let frame = reopened.project(TABLE, &["uid", "truth"], None, &catalog)?;
        assert_eq!(frame.rows.len(), 1);
        assert_eq!(frame.rows[0].uid(), Some(7));
        assert_eq!(frame.rows[0].level_truth, Some(vec![true, false]));
        drop(reopened);

        fs::remove_file(&db_file)
            .with_context(|| format!("failed to remove test database {}", db_file.display()))?;
        Ok(())
    }
}

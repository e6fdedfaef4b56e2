//! Postgres backend using the pgvector extension.
//!
//! One table per store: `(id TEXT PK, vector VECTOR(d), metadata JSONB,
//! namespace TEXT, created_at, updated_at)` with a GIN index on
//! metadata. Upsert batches run inside one transaction via
//! `INSERT … ON CONFLICT (id) DO UPDATE`. Filters compile to SQL over
//! the JSONB column; the database provides isolation.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::{BTreeMap, HashMap};

use lattice_core::{Error, Result};

use crate::backend::{BatchUpserter, IndexOps, NamespaceOps, StatsProvider, VectorBackend};
use crate::filter::{list_values, value_number, value_text, Condition, Filter, FilterOp};
use crate::score::Metric;
use crate::types::{
    BatchFailure, BatchUpsertReport, DeleteOptions, FetchOptions, IndexKind, QueryMatch,
    QueryRequest, StoreStats, UpsertOptions, Vector,
};

#[derive(Debug, Clone)]
pub struct PgBackendConfig {
    pub table: String,
    pub dimension: usize,
    pub metric: Metric,
}

impl PgBackendConfig {
    pub fn new(table: impl Into<String>, dimension: usize) -> Self {
        Self {
            table: table.into(),
            dimension,
            metric: Metric::Cosine,
        }
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }
}

pub struct PgVectorBackend {
    pool: PgPool,
    table: String,
    dimension: usize,
    metric: Metric,
}

fn db_err(err: sqlx::Error) -> Error {
    Error::external("database operation failed").with_source(err)
}

/// Table names are interpolated into DDL/DML, so they must be plain
/// identifiers.
fn validate_table_name(table: &str) -> Result<()> {
    let ok = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());
    if !ok {
        return Err(Error::validation("invalid table name").with_detail("table", table));
    }
    Ok(())
}

impl PgVectorBackend {
    /// Connect a pool and initialize the schema.
    pub async fn connect(url: &str, config: PgBackendConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await
            .map_err(db_err)?;
        Self::new(pool, config).await
    }

    /// Build on an existing pool (the pool may be shared with other
    /// stores) and initialize the schema.
    pub async fn new(pool: PgPool, config: PgBackendConfig) -> Result<Self> {
        validate_table_name(&config.table)?;
        let backend = Self {
            pool,
            table: config.table,
            dimension: config.dimension,
            metric: config.metric,
        };
        backend.ensure_schema().await?;
        Ok(backend)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        let create = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                vector VECTOR({dim}),
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                namespace TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            table = self.table,
            dim = self.dimension,
        );
        sqlx::query(&create).execute(&self.pool).await.map_err(db_err)?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {t}_metadata_idx ON {t} USING GIN (metadata)",
            t = self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {t}_namespace_idx ON {t} (namespace)",
            t = self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    fn distance_operator(&self) -> &'static str {
        match self.metric {
            Metric::Cosine => "<=>",
            Metric::DotProduct => "<#>",
            Metric::Euclidean => "<->",
        }
    }

    fn operator_class(&self) -> &'static str {
        match self.metric {
            Metric::Cosine => "vector_cosine_ops",
            Metric::DotProduct => "vector_ip_ops",
            Metric::Euclidean => "vector_l2_ops",
        }
    }

    fn check_dimension(&self, id: &str, values: &[f32]) -> Result<()> {
        if values.len() != self.dimension {
            return Err(Error::validation("vector dimension mismatch")
                .with_detail("id", id)
                .with_detail("expected_dim", self.dimension)
                .with_detail("got_dim", values.len()));
        }
        Ok(())
    }

    async fn upsert_tx(&self, vectors: &[Vector], namespace: &str) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {t} (id, vector, metadata, namespace, created_at, updated_at)
            VALUES ($1, $2::vector, $3::jsonb, $4, now(), now())
            ON CONFLICT (id) DO UPDATE SET
                vector = EXCLUDED.vector,
                metadata = EXCLUDED.metadata,
                namespace = EXCLUDED.namespace,
                updated_at = now()
            "#,
            t = self.table
        );
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for vector in vectors {
            let metadata = Value::Object(vector.metadata.clone()).to_string();
            sqlx::query(&sql)
                .bind(&vector.id)
                .bind(format_vector_literal(&vector.values))
                .bind(metadata)
                .bind(namespace)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)
    }
}

#[async_trait]
impl VectorBackend for PgVectorBackend {
    async fn upsert(&self, vectors: Vec<Vector>, opts: &UpsertOptions) -> Result<()> {
        for vector in &vectors {
            self.check_dimension(&vector.id, &vector.values)?;
        }
        self.upsert_tx(&vectors, &opts.namespace).await
    }

    async fn query(&self, req: &QueryRequest) -> Result<Vec<QueryMatch>> {
        self.check_dimension("query", &req.vector)?;

        let op = self.distance_operator();
        let mut args: Vec<SqlArg> = vec![
            SqlArg::Text(format_vector_literal(&req.vector)),
            SqlArg::Text(req.namespace.clone()),
        ];
        let mut where_clause = "namespace = $2".to_string();
        if let Some(filter) = req.filter.as_ref().filter(|f| !f.is_empty()) {
            let clause = compile_filter(filter, &mut args)?;
            where_clause.push_str(" AND ");
            where_clause.push_str(&clause);
        }

        let sql = format!(
            r#"
            SELECT id, metadata::text AS metadata_text, vector::text AS vector_text,
                   (vector {op} $1::vector) AS distance
            FROM {t}
            WHERE {where_clause}
            ORDER BY vector {op} $1::vector
            LIMIT {limit}
            "#,
            t = self.table,
            limit = req.top_k,
        );

        let rows = bind_args(sqlx::query(&sql), &args)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(db_err)?;
            let distance: f64 = row.try_get("distance").map_err(db_err)?;
            let values = if req.include_values {
                let text: String = row.try_get("vector_text").map_err(db_err)?;
                Some(parse_vector_literal(&text)?)
            } else {
                None
            };
            let metadata = if req.include_metadata {
                let text: String = row.try_get("metadata_text").map_err(db_err)?;
                Some(parse_metadata(&text)?)
            } else {
                None
            };
            matches.push(QueryMatch {
                id,
                score: self.metric.score(distance as f32),
                values,
                metadata,
            });
        }
        Ok(matches)
    }

    async fn delete(&self, ids: &[String], opts: &DeleteOptions) -> Result<()> {
        let sql = format!(
            "DELETE FROM {t} WHERE namespace = $1 AND id = ANY($2)",
            t = self.table
        );
        sqlx::query(&sql)
            .bind(&opts.namespace)
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn fetch(&self, ids: &[String], opts: &FetchOptions) -> Result<Vec<Vector>> {
        let sql = format!(
            "SELECT id, vector::text AS vector_text, metadata::text AS metadata_text \
             FROM {t} WHERE namespace = $1 AND id = ANY($2)",
            t = self.table
        );
        let rows = sqlx::query(&sql)
            .bind(&opts.namespace)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut by_id: HashMap<String, Vector> = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(db_err)?;
            let vector_text: String = row.try_get("vector_text").map_err(db_err)?;
            let metadata_text: String = row.try_get("metadata_text").map_err(db_err)?;
            by_id.insert(
                id.clone(),
                Vector {
                    id,
                    values: parse_vector_literal(&vector_text)?,
                    metadata: parse_metadata(&metadata_text)?,
                    sparse: None,
                },
            );
        }

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match by_id.remove(id) {
                Some(vector) => out.push(vector),
                None => {
                    return Err(Error::not_found("vector not found")
                        .with_detail("id", id)
                        .with_detail("namespace", &opts.namespace));
                }
            }
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }
}

#[async_trait]
impl BatchUpserter for PgVectorBackend {
    async fn upsert_batch(
        &self,
        vectors: Vec<Vector>,
        opts: &UpsertOptions,
    ) -> Result<BatchUpsertReport> {
        let mut report = BatchUpsertReport::default();
        let mut valid = Vec::with_capacity(vectors.len());
        for vector in vectors {
            match self.check_dimension(&vector.id, &vector.values) {
                Ok(()) => valid.push(vector),
                Err(err) => report.failures.push(BatchFailure {
                    id: vector.id,
                    error: err.to_string(),
                }),
            }
        }
        if !valid.is_empty() {
            report.upserted = valid.len();
            self.upsert_tx(&valid, &opts.namespace).await?;
        }
        Ok(report)
    }
}

#[async_trait]
impl NamespaceOps for PgVectorBackend {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT namespace FROM {t} ORDER BY namespace",
            t = self.table
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(db_err)?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("namespace").map_err(db_err))
            .collect()
    }

    async fn create_namespace(&self, _namespace: &str) -> Result<()> {
        // Namespaces are defined by the rows that carry them; nothing to
        // pre-create in SQL.
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let sql = format!("DELETE FROM {t} WHERE namespace = $1", t = self.table);
        sqlx::query(&sql)
            .bind(namespace)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl IndexOps for PgVectorBackend {
    async fn create_index(&self, kind: &IndexKind) -> Result<()> {
        let opclass = self.operator_class();
        let sql = match kind {
            IndexKind::IvfFlat { lists } => format!(
                "CREATE INDEX {t}_vector_idx ON {t} USING ivfflat (vector {opclass}) WITH (lists = {lists})",
                t = self.table
            ),
            IndexKind::Hnsw { m, ef_construction } => format!(
                "CREATE INDEX {t}_vector_idx ON {t} USING hnsw (vector {opclass}) WITH (m = {m}, ef_construction = {ef_construction})",
                t = self.table
            ),
        };
        sqlx::query(&sql).execute(&self.pool).await.map_err(|err| {
            if is_duplicate_object(&err) {
                Error::conflict("vector index already exists")
                    .with_detail("index", format!("{}_vector_idx", self.table))
            } else {
                db_err(err)
            }
        })?;
        Ok(())
    }

    async fn drop_index(&self) -> Result<()> {
        let sql = format!("DROP INDEX IF EXISTS {t}_vector_idx", t = self.table);
        sqlx::query(&sql).execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl StatsProvider for PgVectorBackend {
    async fn stats(&self) -> Result<StoreStats> {
        let sql = format!(
            "SELECT namespace, count(*) AS n FROM {t} GROUP BY namespace",
            t = self.table
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(db_err)?;
        let mut namespaces = BTreeMap::new();
        let mut total = 0usize;
        for row in rows {
            let namespace: String = row.try_get("namespace").map_err(db_err)?;
            let count: i64 = row.try_get("n").map_err(db_err)?;
            total += count as usize;
            namespaces.insert(namespace, count as usize);
        }
        Ok(StoreStats {
            dimension: self.dimension,
            vector_count: total,
            namespaces,
        })
    }
}

fn is_duplicate_object(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("42P07")
    )
}

/// pgvector literal: `[v1,v2,…]`.
pub fn format_vector_literal(values: &[f32]) -> String {
    let mut out = String::with_capacity(values.len() * 8 + 2);
    out.push('[');
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    out
}

pub fn parse_vector_literal(text: &str) -> Result<Vec<f32>> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| Error::internal("malformed vector literal").with_detail("text", text))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|_| Error::internal("malformed vector literal").with_detail("text", text))
        })
        .collect()
}

fn parse_metadata(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::internal("metadata column is not a JSON object")
            .with_detail("got", other.to_string())),
    }
}

// ============================================================================
// Filter -> SQL compilation
// ============================================================================

/// Bindable argument produced by filter compilation.
#[derive(Debug, Clone, PartialEq)]
enum SqlArg {
    Text(String),
    Num(f64),
    TextList(Vec<String>),
}

fn bind_args<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    args: &'q [SqlArg],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    let mut query = query;
    for arg in args {
        query = match arg {
            SqlArg::Text(s) => query.bind(s),
            SqlArg::Num(n) => query.bind(n),
            SqlArg::TextList(items) => query.bind(items),
        };
    }
    query
}

/// Guard pattern: the stored text parses as a number.
const NUMERIC_GUARD: &str = r"^-?[0-9]+(\.[0-9]+)?([eE][-+]?[0-9]+)?$";

/// Compile a filter to one SQL boolean expression over the `metadata`
/// JSONB column. Placeholders continue from `args.len()`; every field
/// and value is bound, never interpolated.
fn compile_filter(filter: &Filter, args: &mut Vec<SqlArg>) -> Result<String> {
    let mut clauses = Vec::new();
    for condition in &filter.must {
        clauses.push(condition_sql(condition, args)?);
    }
    if !filter.should.is_empty() {
        let ors: Vec<String> = filter
            .should
            .iter()
            .map(|c| condition_sql(c, args))
            .collect::<Result<_>>()?;
        clauses.push(format!("({})", ors.join(" OR ")));
    }
    for condition in &filter.must_not {
        clauses.push(format!("NOT ({})", condition_sql(condition, args)?));
    }
    Ok(clauses.join(" AND "))
}

fn condition_sql(condition: &Condition, args: &mut Vec<SqlArg>) -> Result<String> {
    let mut push = |arg: SqlArg, args: &mut Vec<SqlArg>| -> String {
        args.push(arg);
        format!("${}", args.len())
    };

    let field = push(SqlArg::Text(condition.field.clone()), args);
    if condition.op == FilterOp::Exists {
        return Ok(format!("metadata ? {field}"));
    }

    let text = format!("metadata->>{field}");
    let clause = match condition.op {
        FilterOp::Eq | FilterOp::Ne | FilterOp::Gt | FilterOp::Lt | FilterOp::Gte
        | FilterOp::Lte => {
            let sql_op = match condition.op {
                FilterOp::Eq => "=",
                FilterOp::Ne => "<>",
                FilterOp::Gt => ">",
                FilterOp::Lt => "<",
                FilterOp::Gte => ">=",
                FilterOp::Lte => "<=",
                _ => unreachable!(),
            };
            match value_number(&condition.value) {
                Some(number) => {
                    let value = push(SqlArg::Num(number), args);
                    format!(
                        "({text} ~ '{NUMERIC_GUARD}' AND ({text})::numeric {sql_op} {value})"
                    )
                }
                None => {
                    let value = push(SqlArg::Text(value_text(&condition.value)), args);
                    format!("{text} {sql_op} {value}")
                }
            }
        }
        FilterOp::In | FilterOp::Nin => {
            let items: Vec<String> = list_values(&condition.value)
                .iter()
                .map(value_text)
                .collect();
            let value = push(SqlArg::TextList(items), args);
            if condition.op == FilterOp::In {
                format!("{text} = ANY({value})")
            } else {
                format!("NOT ({text} = ANY({value}))")
            }
        }
        FilterOp::Contains => {
            let pattern = format!("%{}%", escape_like(&value_text(&condition.value)));
            let value = push(SqlArg::Text(pattern), args);
            format!("{text} ILIKE {value}")
        }
        FilterOp::Exists => unreachable!(),
    };
    // Key presence is part of every non-exists condition so that nin on
    // a missing key stays false, matching the in-process evaluator.
    Ok(format!("(metadata ? {field} AND {clause})"))
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Condition;
    use serde_json::json;

    #[test]
    fn vector_literal_round_trip() {
        let values = vec![1.0, -0.5, 0.25];
        let text = format_vector_literal(&values);
        assert_eq!(text, "[1,-0.5,0.25]");
        assert_eq!(parse_vector_literal(&text).unwrap(), values);
        assert_eq!(parse_vector_literal("[]").unwrap(), Vec::<f32>::new());
        assert!(parse_vector_literal("1,2,3").is_err());
    }

    #[test]
    fn table_names_are_validated() {
        assert!(validate_table_name("documents_v2").is_ok());
        assert!(validate_table_name("docs; DROP TABLE x").is_err());
        assert!(validate_table_name("1docs").is_err());
        assert!(validate_table_name("").is_err());
    }

    #[test]
    fn numeric_condition_compiles_with_guard() {
        let mut args = vec![SqlArg::Text("[1]".into()), SqlArg::Text(String::new())];
        let filter = Filter::new().must(Condition::gt("pages", 10));
        let sql = compile_filter(&filter, &mut args).unwrap();
        assert!(sql.contains("metadata ? $3"));
        assert!(sql.contains("(metadata->>$3)::numeric > $4"));
        assert_eq!(args.len(), 4);
        assert_eq!(args[3], SqlArg::Num(10.0));
    }

    #[test]
    fn string_condition_compiles_to_text_compare() {
        let mut args = Vec::new();
        let filter = Filter::new().must(Condition::eq("kind", "report"));
        let sql = compile_filter(&filter, &mut args).unwrap();
        assert!(sql.contains("metadata->>$1 = $2"));
        assert_eq!(args[1], SqlArg::Text("report".into()));
    }

    #[test]
    fn in_list_binds_a_text_array() {
        let mut args = Vec::new();
        let filter = Filter::new().must(Condition::is_in(
            "source",
            vec![json!("upload"), json!("crawl")],
        ));
        let sql = compile_filter(&filter, &mut args).unwrap();
        assert!(sql.contains("= ANY($2)"));
        assert_eq!(
            args[1],
            SqlArg::TextList(vec!["upload".into(), "crawl".into()])
        );
    }

    #[test]
    fn contains_escapes_like_wildcards() {
        let mut args = Vec::new();
        let filter = Filter::new().must(Condition::contains("title", "50%_done"));
        compile_filter(&filter, &mut args).unwrap();
        assert_eq!(args[1], SqlArg::Text("%50\\%\\_done%".into()));
    }

    #[test]
    fn should_and_must_not_combine() {
        let mut args = Vec::new();
        let filter = Filter::new()
            .should(Condition::eq("lang", "en"))
            .should(Condition::eq("lang", "de"))
            .must_not(Condition::exists("deleted_at"));
        let sql = compile_filter(&filter, &mut args).unwrap();
        assert!(sql.contains(" OR "));
        assert!(sql.contains("NOT (metadata ? $5)"));
    }
}

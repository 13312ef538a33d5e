use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::error::StoreError;
use crate::pipeline::{Collection, Document, Predicate};
use crate::seed::sample_documents;
use crate::store::DocumentSource;
use crate::window::parse_instant;

const SCHEMA: &str = "traffic_insights";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Upsert the sample dataset. Returns the number of documents written.
pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let mut written = 0usize;
    for (collection, doc) in sample_documents() {
        upsert_document(pool, collection, doc)
            .await
            .with_context(|| format!("failed to seed {collection}"))?;
        written += 1;
    }
    Ok(written)
}

/// Insert or replace one document keyed by its `_id`.
async fn upsert_document(pool: &PgPool, collection: Collection, doc: Value) -> anyhow::Result<()> {
    let Value::Object(mut doc) = doc else {
        anyhow::bail!("{collection}: documents must be JSON objects");
    };
    let id = match doc.remove("_id") {
        Some(Value::String(id)) => id,
        _ => anyhow::bail!("{collection}: documents need a string _id"),
    };
    let date = document_date(&doc);

    sqlx::query(&format!(
        r#"
        INSERT INTO {SCHEMA}.{table} (id, date, doc)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO UPDATE
        SET date = EXCLUDED.date, doc = EXCLUDED.doc
        "#,
        table = collection.table_name(),
    ))
    .bind(id)
    .bind(date)
    .bind(Json(Value::Object(doc)))
    .execute(pool)
    .await?;

    Ok(())
}

fn document_date(doc: &Document) -> Option<DateTime<Utc>> {
    doc.get("date")?.as_str().and_then(parse_instant)
}

/// Import daily page-metric rows. Rows are keyed by url and date, so
/// re-importing the same file inserts nothing.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        date: NaiveDate,
        url: String,
        visits: i64,
        #[serde(default)]
        dyf_yes: i64,
        #[serde(default)]
        dyf_no: i64,
        #[serde(default)]
        fwylf_cant_find_info: i64,
        #[serde(default)]
        fwylf_error: i64,
        #[serde(default)]
        fwylf_hard_to_understand: i64,
        #[serde(default)]
        fwylf_other: i64,
        #[serde(default)]
        gsc_total_clicks: i64,
        #[serde(default)]
        gsc_total_impressions: i64,
        gsc_total_ctr: Option<f64>,
        gsc_total_position: Option<f64>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let page = sqlx::query(&format!(
            r#"
            SELECT id, doc FROM {SCHEMA}.pages
            WHERE doc ->> 'url' = $1 OR doc -> 'all_urls' @> to_jsonb($1::text)
            ORDER BY id
            LIMIT 1
            "#
        ))
        .bind(&row.url)
        .fetch_optional(pool)
        .await?;

        let (page_id, tasks, projects) = match page {
            Some(page) => {
                let id: String = page.get("id");
                let Json(doc): Json<Value> = page.get("doc");
                (Value::from(id), doc["tasks"].clone(), doc["projects"].clone())
            }
            None => {
                tracing::warn!(url = %row.url, "no page matches url, importing unlinked");
                (Value::Null, json!([]), json!([]))
            }
        };

        let doc = json!({
            "date": row.date.to_string(),
            "url": row.url,
            "page": page_id,
            "tasks": tasks,
            "projects": projects,
            "visits": row.visits,
            "dyf_yes": row.dyf_yes,
            "dyf_no": row.dyf_no,
            "fwylf_cant_find_info": row.fwylf_cant_find_info,
            "fwylf_error": row.fwylf_error,
            "fwylf_hard_to_understand": row.fwylf_hard_to_understand,
            "fwylf_other": row.fwylf_other,
            "gsc_total_clicks": row.gsc_total_clicks,
            "gsc_total_impressions": row.gsc_total_impressions,
            "gsc_total_ctr": row.gsc_total_ctr,
            "gsc_total_position": row.gsc_total_position,
        });

        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {SCHEMA}.page_metrics (id, date, doc)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#
        ))
        .bind(format!("{}-{}", row.url, row.date))
        .bind(row.date.and_hms_opt(0, 0, 0).map(|midnight| midnight.and_utc()))
        .bind(Json(doc))
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Postgres-backed document source. Each collection is a table of JSONB
/// documents; leading match predicates are compiled into the WHERE clause.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentSource for PgStore {
    async fn fetch(
        &self,
        collection: Collection,
        predicates: &[Predicate],
    ) -> Result<Vec<Document>, StoreError> {
        let mut query = select_documents(collection, predicates);
        tracing::trace!(sql = query.sql(), "fetching documents");

        let rows: Vec<Json<Document>> = query
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|Json(doc)| doc).collect())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

/// Compile a collection scan narrowed by the predicates Postgres can check.
///
/// Windows on fields other than `date` are left to the in-memory pass.
fn select_documents(collection: Collection, predicates: &[Predicate]) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new("SELECT doc || jsonb_build_object('_id', id) AS doc FROM ");
    query.push(SCHEMA).push(".").push(collection.table_name());

    let mut separator = " WHERE ";
    for predicate in predicates {
        match predicate {
            Predicate::In { path, values } if path == "_id" => {
                let ids: Vec<String> = values
                    .iter()
                    .filter_map(|value| value.as_str().map(String::from))
                    .collect();
                query.push(separator).push("id = ANY(").push_bind(ids).push(")");
            }
            Predicate::Between { path, window } if path == "date" => {
                query
                    .push(separator)
                    .push("date >= ")
                    .push_bind(window.start)
                    .push(" AND date <= ")
                    .push_bind(window.end);
            }
            Predicate::In { path, values } => {
                let segments: Vec<String> = path.split('.').map(String::from).collect();
                let candidates: Vec<Json<Value>> = values.iter().cloned().map(Json).collect();
                query
                    .push(separator)
                    .push("doc #> ")
                    .push_bind(segments)
                    .push(" @> ANY(")
                    .push_bind(candidates)
                    .push(")");
            }
            Predicate::Between { .. } => continue,
        }
        separator = " AND ";
    }

    query.push(" ORDER BY id");
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::DateWindow;
    use serde_json::json;

    fn window() -> DateWindow {
        DateWindow::parse("2025-01-01/2025-01-31").unwrap()
    }

    #[test]
    fn unfiltered_scan_reads_whole_table() {
        let query = select_documents(Collection::Tasks, &[]);
        assert_eq!(
            query.sql(),
            "SELECT doc || jsonb_build_object('_id', id) AS doc FROM traffic_insights.tasks ORDER BY id"
        );
    }

    #[test]
    fn window_and_membership_are_pushed_down() {
        let predicates = [
            Predicate::Between {
                path: "date".into(),
                window: window(),
            },
            Predicate::In {
                path: "url".into(),
                values: vec![json!("/a"), json!("/b")],
            },
        ];
        let query = select_documents(Collection::PageMetrics, &predicates);
        assert_eq!(
            query.sql(),
            "SELECT doc || jsonb_build_object('_id', id) AS doc FROM traffic_insights.page_metrics \
             WHERE date >= $1 AND date <= $2 AND doc #> $3 @> ANY($4) ORDER BY id"
        );
    }

    #[test]
    fn ids_use_the_primary_key() {
        let predicates = [Predicate::In {
            path: "_id".into(),
            values: vec![json!("t1")],
        }];
        let query = select_documents(Collection::Tasks, &predicates);
        assert!(query.sql().contains("WHERE id = ANY($1)"));
    }

    #[test]
    fn other_windows_are_filtered_in_memory() {
        let predicates = [Predicate::Between {
            path: "reviewed_at".into(),
            window: window(),
        }];
        let query = select_documents(Collection::Feedback, &predicates);
        assert!(!query.sql().contains("WHERE"));
    }

    #[test]
    fn document_date_accepts_plain_dates() {
        let doc = json!({ "date": "2025-02-03" });
        let date = document_date(doc.as_object().unwrap()).unwrap();
        assert_eq!(date.to_rfc3339(), "2025-02-03T00:00:00+00:00");
    }
}

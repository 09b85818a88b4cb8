//! Database-backed traffic store (SQLite and PostgreSQL).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectOptions, ConnectionTrait, Database,
    DatabaseConnection, DbBackend as OrmBackend, EntityTrait, Order, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, Statement,
};

use omniproxy_capture::Record;
use omniproxy_observability::Metrics;

use crate::dburl::{DbBackend, DbUrl};
use crate::entities::{org, proxy, traffic};
use crate::error::{Result, StorageError};
use crate::store::{
    TrafficDetail, TrafficFilter, TrafficQuerier, TrafficStats, TrafficStore, TrafficSummary,
};

/// Rows sampled for method/status/duration aggregation in `stats`.
const STATS_SAMPLE_LIMIT: u64 = 10_000;

/// Database store configuration.
#[derive(Debug, Clone)]
pub struct DatabaseStoreConfig {
    /// Database URL (`sqlite://...` or `postgres://...`).
    pub url: String,
    /// Proxy identity row to attribute traffic to; created if absent.
    pub proxy_name: String,
    pub metrics: Option<Arc<Metrics>>,
}

impl DatabaseStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            proxy_name: "default".to_string(),
            metrics: None,
        }
    }
}

/// Traffic store backed by a relational database.
pub struct DatabaseTrafficStore {
    conn: DatabaseConnection,
    proxy_id: i64,
    closed: AtomicBool,
    metrics: Option<Arc<Metrics>>,
}

impl DatabaseTrafficStore {
    /// Opens the database, runs the idempotent schema bootstrap, and
    /// ensures the default org and proxy rows exist.
    pub async fn open(config: DatabaseStoreConfig) -> Result<Self> {
        let dburl = DbUrl::parse(&config.url)?;

        if let Some(path) = dburl.path.as_deref() {
            if !dburl.is_memory() {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
            }
        }

        tracing::info!(url = %dburl, "opening traffic database");
        let mut options = ConnectOptions::new(dburl.dsn());
        if dburl.is_memory() {
            // One pooled connection, or each checkout would see its own
            // empty in-memory database.
            options.max_connections(1).min_connections(1);
        }
        let conn = Database::connect(options).await?;

        if dburl.backend == DbBackend::Sqlite {
            for pragma in ["PRAGMA journal_mode=WAL", "PRAGMA foreign_keys=ON"] {
                conn.execute(Statement::from_string(OrmBackend::Sqlite, pragma.to_string()))
                    .await?;
            }
        }

        create_schema(&conn, &dburl.backend).await?;
        let proxy_id = ensure_proxy(&conn, &config.proxy_name).await?;

        Ok(Self {
            conn,
            proxy_id,
            closed: AtomicBool::new(false),
            metrics: config.metrics,
        })
    }

    /// The proxy identity row traffic is attributed to.
    pub fn proxy_id(&self) -> i64 {
        self.proxy_id
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn to_active_model(&self, rec: &Record) -> traffic::ActiveModel {
        let request = &rec.request;
        let response = &rec.response;

        traffic::ActiveModel {
            proxy_id: Set(self.proxy_id),
            method: Set(request.method.clone()),
            url: Set(request.url.clone()),
            scheme: Set(request.scheme.clone()),
            host: Set(request.host.clone()),
            path: Set(request.path.clone()),
            query: Set(some_json(&request.query)),
            request_headers: Set(some_json(&request.headers)),
            request_body: Set(request
                .body
                .as_ref()
                .and_then(|b| serde_json::to_vec(b).ok())),
            request_body_size: Set(request.body_size),
            request_is_binary: Set(request.is_binary),
            content_type: Set(none_if_empty(&request.content_type)),
            status_code: Set(i32::from(response.status)),
            status_text: Set(none_if_empty(&response.status_text)),
            response_headers: Set(some_json(&response.headers)),
            response_body: Set(response
                .body
                .as_ref()
                .and_then(|b| serde_json::to_vec(b).ok())),
            response_body_size: Set(response.size),
            response_is_binary: Set(response.is_binary),
            response_content_type: Set(none_if_empty(&response.content_type)),
            started_at: Set(rec.start_time),
            duration_ms: Set(rec.duration_ms),
            ttfb_ms: Set(None),
            client_ip: Set(None),
            error: Set(rec.error.clone()),
            tags: Set(None),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
    }

    fn record_outcome(&self, ok: bool, n: usize) {
        if let Some(m) = &self.metrics {
            for _ in 0..n {
                if ok {
                    m.record_traffic_stored();
                } else {
                    m.record_traffic_store_error();
                }
            }
        }
    }
}

#[async_trait]
impl TrafficStore for DatabaseTrafficStore {
    async fn store(&self, rec: &Record) -> Result<()> {
        self.ensure_open()?;

        let result = self.to_active_model(rec).insert(&self.conn).await;
        self.record_outcome(result.is_ok(), 1);
        result?;
        Ok(())
    }

    async fn store_batch(&self, recs: &[Record]) -> Result<()> {
        self.ensure_open()?;
        if recs.is_empty() {
            return Ok(());
        }

        let models: Vec<traffic::ActiveModel> =
            recs.iter().map(|r| self.to_active_model(r)).collect();
        let result = traffic::Entity::insert_many(models).exec(&self.conn).await;
        self.record_outcome(result.is_ok(), recs.len());
        result?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // The connection pool is dropped with the store; nothing further to
        // release explicitly.
        Ok(())
    }
}

#[async_trait]
impl TrafficQuerier for DatabaseTrafficStore {
    async fn query(&self, filter: &TrafficFilter) -> Result<Vec<TrafficSummary>> {
        self.ensure_open()?;

        let mut select = traffic::Entity::find().filter(filter_condition(filter));

        let (column, order) = order_of(filter);
        select = select.order_by(column, order);

        if let Some(offset) = filter.offset {
            select = select.offset(offset);
        }
        if let Some(limit) = filter.limit {
            select = select.limit(limit);
        }

        let rows = select.all(&self.conn).await?;
        Ok(rows.into_iter().map(summary_of).collect())
    }

    async fn get_by_id(&self, id: i64) -> Result<TrafficDetail> {
        self.ensure_open()?;

        let row = traffic::Entity::find_by_id(id)
            .one(&self.conn)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        Ok(detail_of(row))
    }

    async fn count(&self, filter: &TrafficFilter) -> Result<u64> {
        self.ensure_open()?;

        Ok(traffic::Entity::find()
            .filter(filter_condition(filter))
            .count(&self.conn)
            .await?)
    }

    async fn stats(&self, filter: &TrafficFilter) -> Result<TrafficStats> {
        self.ensure_open()?;

        let total = self.count(filter).await?;

        // Errors keep the time range and host subset of the caller filter.
        let error_filter = TrafficFilter {
            start_time: filter.start_time,
            end_time: filter.end_time,
            hosts: filter.hosts.clone(),
            min_status: Some(400),
            ..TrafficFilter::default()
        };
        let errors = self.count(&error_filter).await?;

        // Aggregates are computed over a bounded sample.
        let sample = self
            .query(&TrafficFilter {
                start_time: filter.start_time,
                end_time: filter.end_time,
                hosts: filter.hosts.clone(),
                limit: Some(STATS_SAMPLE_LIMIT),
                ..TrafficFilter::default()
            })
            .await?;

        let mut by_method: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_status: BTreeMap<u16, u64> = BTreeMap::new();
        let mut hosts = std::collections::BTreeSet::new();
        let mut total_duration = 0.0;

        for row in &sample {
            *by_method.entry(row.method.clone()).or_insert(0) += 1;
            *by_status.entry(row.status).or_insert(0) += 1;
            hosts.insert(row.host.clone());
            total_duration += row.duration_ms;
        }

        let avg_duration_ms = if sample.is_empty() {
            0.0
        } else {
            total_duration / sample.len() as f64
        };

        Ok(TrafficStats {
            total,
            errors,
            avg_duration_ms,
            requests_by_method: by_method,
            requests_by_status: by_status,
            unique_hosts: hosts.len() as u64,
        })
    }
}

/// Builds the WHERE condition shared by query and count: time range,
/// method IN, status range, status IN, host IN.
fn filter_condition(filter: &TrafficFilter) -> Condition {
    let mut cond = Condition::all();

    if let Some(start) = filter.start_time {
        cond = cond.add(traffic::Column::StartedAt.gte(start));
    }
    if let Some(end) = filter.end_time {
        cond = cond.add(traffic::Column::StartedAt.lte(end));
    }
    if !filter.methods.is_empty() {
        cond = cond.add(traffic::Column::Method.is_in(filter.methods.clone()));
    }
    if let Some(min) = filter.min_status {
        cond = cond.add(traffic::Column::StatusCode.gte(i32::from(min)));
    }
    if let Some(max) = filter.max_status {
        cond = cond.add(traffic::Column::StatusCode.lte(i32::from(max)));
    }
    if !filter.status_codes.is_empty() {
        let codes: Vec<i32> = filter.status_codes.iter().map(|&c| i32::from(c)).collect();
        cond = cond.add(traffic::Column::StatusCode.is_in(codes));
    }
    if !filter.hosts.is_empty() {
        cond = cond.add(traffic::Column::Host.is_in(filter.hosts.clone()));
    }

    cond
}

fn order_of(filter: &TrafficFilter) -> (traffic::Column, Order) {
    match filter.order_by.as_deref() {
        Some(name) => {
            let column = match name {
                "id" => traffic::Column::Id,
                "method" => traffic::Column::Method,
                "host" => traffic::Column::Host,
                "status_code" => traffic::Column::StatusCode,
                "duration_ms" => traffic::Column::DurationMs,
                _ => traffic::Column::StartedAt,
            };
            let order = if filter.descending { Order::Desc } else { Order::Asc };
            (column, order)
        }
        // Default: newest first.
        None => (traffic::Column::StartedAt, Order::Desc),
    }
}

fn summary_of(row: traffic::Model) -> TrafficSummary {
    TrafficSummary {
        id: row.id,
        method: row.method,
        url: row.url,
        host: row.host,
        path: row.path,
        status: row.status_code.clamp(0, i32::from(u16::MAX)) as u16,
        duration_ms: row.duration_ms,
        started_at: row.started_at,
        error: row.error,
    }
}

fn detail_of(row: traffic::Model) -> TrafficDetail {
    let request_body = match (row.request_is_binary, &row.request_body) {
        (false, Some(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    };
    let response_body = match (row.response_is_binary, &row.response_body) {
        (false, Some(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    };

    TrafficDetail {
        request_headers: row
            .request_headers
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok()),
        response_headers: row
            .response_headers
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok()),
        tags: row
            .tags
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok()),
        scheme: row.scheme.clone(),
        query: row.query.clone(),
        request_body,
        request_body_size: row.request_body_size,
        request_is_binary: row.request_is_binary,
        request_content_type: row.content_type.clone(),
        status_text: row.status_text.clone(),
        response_body,
        response_body_size: row.response_body_size,
        response_is_binary: row.response_is_binary,
        response_content_type: row.response_content_type.clone(),
        ttfb_ms: row.ttfb_ms,
        client_ip: row.client_ip.clone(),
        summary: summary_of(row),
    }
}

fn some_json<T: serde::Serialize>(map: &BTreeMap<String, T>) -> Option<String> {
    if map.is_empty() {
        return None;
    }
    serde_json::to_string(map).ok()
}

fn none_if_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Idempotent schema bootstrap.
async fn create_schema(conn: &DatabaseConnection, backend: &DbBackend) -> Result<()> {
    let (pk, blob, timestamp, real) = match backend {
        DbBackend::Sqlite => ("INTEGER PRIMARY KEY AUTOINCREMENT", "BLOB", "TEXT", "REAL"),
        DbBackend::Postgres => ("BIGSERIAL PRIMARY KEY", "BYTEA", "TIMESTAMPTZ", "DOUBLE PRECISION"),
    };
    let orm_backend = match backend {
        DbBackend::Sqlite => OrmBackend::Sqlite,
        DbBackend::Postgres => OrmBackend::Postgres,
    };

    let statements = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS org (
                id {pk},
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                plan TEXT NOT NULL DEFAULT 'free',
                traffic_retention_days INTEGER NOT NULL DEFAULT 30,
                max_proxies INTEGER NOT NULL DEFAULT 10,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at {timestamp} NOT NULL,
                updated_at {timestamp} NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS proxy (
                id {pk},
                org_id BIGINT NOT NULL REFERENCES org(id),
                name TEXT NOT NULL,
                slug TEXT NOT NULL,
                mode TEXT NOT NULL DEFAULT 'forward',
                port INTEGER NOT NULL DEFAULT 0,
                host TEXT NOT NULL DEFAULT '',
                mitm_enabled BOOLEAN NOT NULL DEFAULT TRUE,
                skip_hosts TEXT NOT NULL DEFAULT '[]',
                include_hosts TEXT NOT NULL DEFAULT '[]',
                exclude_hosts TEXT NOT NULL DEFAULT '[]',
                include_paths TEXT NOT NULL DEFAULT '[]',
                exclude_paths TEXT NOT NULL DEFAULT '[]',
                upstream TEXT NOT NULL DEFAULT '',
                skip_binary BOOLEAN NOT NULL DEFAULT TRUE,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                last_started_at {timestamp},
                created_at {timestamp} NOT NULL,
                updated_at {timestamp} NOT NULL,
                UNIQUE (slug, org_id)
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS traffic (
                id {pk},
                proxy_id BIGINT NOT NULL REFERENCES proxy(id),
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                scheme TEXT NOT NULL DEFAULT '',
                host TEXT NOT NULL,
                path TEXT NOT NULL,
                query TEXT,
                request_headers TEXT,
                request_body {blob},
                request_body_size BIGINT NOT NULL DEFAULT 0,
                request_is_binary BOOLEAN NOT NULL DEFAULT FALSE,
                content_type TEXT,
                status_code INTEGER NOT NULL DEFAULT 0,
                status_text TEXT,
                response_headers TEXT,
                response_body {blob},
                response_body_size BIGINT NOT NULL DEFAULT 0,
                response_is_binary BOOLEAN NOT NULL DEFAULT FALSE,
                response_content_type TEXT,
                started_at {timestamp} NOT NULL,
                duration_ms {real} NOT NULL DEFAULT 0,
                ttfb_ms {real},
                client_ip TEXT,
                error TEXT,
                tags TEXT,
                created_at {timestamp} NOT NULL
            )"
        ),
        "CREATE INDEX IF NOT EXISTS idx_traffic_host ON traffic (host)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_traffic_path ON traffic (path)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_traffic_method ON traffic (method)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_traffic_status_code ON traffic (status_code)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_traffic_started_at ON traffic (started_at)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_traffic_host_path ON traffic (host, path)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_traffic_method_host_path ON traffic (method, host, path)"
            .to_string(),
    ];

    for sql in statements {
        conn.execute(Statement::from_string(orm_backend, sql)).await?;
    }

    Ok(())
}

/// Finds or creates the proxy row (and its org) by name; returns its id.
async fn ensure_proxy(conn: &DatabaseConnection, name: &str) -> Result<i64> {
    if let Some(existing) = proxy::Entity::find()
        .filter(proxy::Column::Name.eq(name))
        .one(conn)
        .await?
    {
        return Ok(existing.id);
    }

    let org_id = ensure_org(conn).await?;
    let now = Utc::now();

    let inserted = proxy::ActiveModel {
        org_id: Set(org_id),
        name: Set(name.to_string()),
        slug: Set(name.to_string()),
        mode: Set("forward".to_string()),
        port: Set(0),
        host: Set(String::new()),
        mitm_enabled: Set(true),
        skip_hosts: Set("[]".to_string()),
        include_hosts: Set("[]".to_string()),
        exclude_hosts: Set("[]".to_string()),
        include_paths: Set("[]".to_string()),
        exclude_paths: Set("[]".to_string()),
        upstream: Set(String::new()),
        skip_binary: Set(true),
        active: Set(true),
        last_started_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    Ok(inserted.id)
}

async fn ensure_org(conn: &DatabaseConnection) -> Result<i64> {
    if let Some(existing) = org::Entity::find()
        .filter(org::Column::Slug.eq("default"))
        .one(conn)
        .await?
    {
        return Ok(existing.id);
    }

    let now = Utc::now();
    let inserted = org::ActiveModel {
        name: Set("Default".to_string()),
        slug: Set("default".to_string()),
        plan: Set("free".to_string()),
        traffic_retention_days: Set(30),
        max_proxies: Set(10),
        active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    Ok(inserted.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use omniproxy_capture::{BodyValue, RequestRecord, ResponseRecord};

    async fn memory_store() -> DatabaseTrafficStore {
        DatabaseTrafficStore::open(DatabaseStoreConfig::new("sqlite::memory:"))
            .await
            .unwrap()
    }

    fn record(host: &str, method: &str, status: u16) -> Record {
        let mut rec = Record::started(RequestRecord {
            method: method.to_string(),
            url: format!("http://{host}/p"),
            host: host.to_string(),
            path: "/p".to_string(),
            scheme: "http".to_string(),
            body: Some(BodyValue::Text("ping".into())),
            body_size: 4,
            content_type: "text/plain".into(),
            ..RequestRecord::default()
        });
        rec.response = ResponseRecord {
            status,
            status_text: "OK".into(),
            body: Some(BodyValue::Parsed(serde_json::json!({"pong": true}))),
            size: 14,
            content_type: "application/json".into(),
            ..ResponseRecord::default()
        };
        rec.finish_timing();
        rec
    }

    #[tokio::test]
    async fn open_creates_default_org_and_proxy() {
        let store = memory_store().await;
        assert!(store.proxy_id() > 0);

        // Reopening against the same schema keeps it idempotent; a second
        // in-memory store is a distinct database, so just verify open works.
        let again = memory_store().await;
        assert!(again.proxy_id() > 0);
    }

    #[tokio::test]
    async fn store_and_count() {
        let store = memory_store().await;
        store.store(&record("a.test", "GET", 200)).await.unwrap();
        store.store(&record("b.test", "POST", 404)).await.unwrap();

        let n = store.count(&TrafficFilter::default()).await.unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn batch_insert_counts_every_record() {
        let store = memory_store().await;
        let recs: Vec<Record> = (0..25).map(|_| record("h.test", "GET", 200)).collect();
        store.store_batch(&recs).await.unwrap();
        assert_eq!(store.count(&TrafficFilter::default()).await.unwrap(), 25);
    }

    #[tokio::test]
    async fn query_filters_by_host_exactly() {
        let store = memory_store().await;
        store.store(&record("a.test", "GET", 200)).await.unwrap();
        store.store(&record("sub.a.test", "GET", 200)).await.unwrap();

        let rows = store
            .query(&TrafficFilter {
                hosts: vec!["a.test".into()],
                ..TrafficFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].host, "a.test");
    }

    #[tokio::test]
    async fn query_filters_by_status_range_and_method() {
        let store = memory_store().await;
        store.store(&record("h", "GET", 200)).await.unwrap();
        store.store(&record("h", "GET", 404)).await.unwrap();
        store.store(&record("h", "POST", 500)).await.unwrap();

        let errors = store
            .query(&TrafficFilter {
                min_status: Some(400),
                ..TrafficFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(errors.len(), 2);

        let posts = store
            .query(&TrafficFilter {
                methods: vec!["POST".into()],
                ..TrafficFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].status, 500);
    }

    #[tokio::test]
    async fn pagination_covers_without_duplicates() {
        let store = memory_store().await;
        for _ in 0..10 {
            store.store(&record("h", "GET", 200)).await.unwrap();
        }

        let order = TrafficFilter {
            order_by: Some("id".into()),
            ..TrafficFilter::default()
        };

        let first = store
            .query(&TrafficFilter {
                limit: Some(5),
                offset: Some(0),
                ..order.clone()
            })
            .await
            .unwrap();
        let second = store
            .query(&TrafficFilter {
                limit: Some(5),
                offset: Some(5),
                ..order
            })
            .await
            .unwrap();

        assert_eq!(first.len(), 5);
        assert_eq!(second.len(), 5);

        let mut ids: Vec<i64> = first.iter().chain(second.iter()).map(|r| r.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[tokio::test]
    async fn default_order_is_started_at_desc() {
        let store = memory_store().await;
        store.store(&record("h", "GET", 200)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.store(&record("h", "GET", 201)).await.unwrap();

        let rows = store.query(&TrafficFilter::default()).await.unwrap();
        assert!(rows[0].started_at >= rows[1].started_at);
    }

    #[tokio::test]
    async fn get_by_id_returns_bodies_for_text() {
        let store = memory_store().await;
        store.store(&record("h", "GET", 200)).await.unwrap();

        let rows = store.query(&TrafficFilter::default()).await.unwrap();
        let detail = store.get_by_id(rows[0].id).await.unwrap();

        assert_eq!(detail.scheme, "http");
        assert_eq!(detail.request_body.as_deref(), Some("\"ping\""));
        assert_eq!(detail.response_body.as_deref(), Some("{\"pong\":true}"));
        assert!(!detail.request_is_binary);
        assert!(detail.request_headers.is_none());
    }

    #[tokio::test]
    async fn get_by_id_hides_binary_bodies() {
        let store = memory_store().await;
        let mut rec = record("h", "POST", 200);
        rec.request.is_binary = true;
        rec.request.body = Some(BodyValue::Binary);
        store.store(&rec).await.unwrap();

        let rows = store.query(&TrafficFilter::default()).await.unwrap();
        let detail = store.get_by_id(rows[0].id).await.unwrap();
        assert!(detail.request_is_binary);
        assert!(detail.request_body.is_none());
    }

    #[tokio::test]
    async fn get_by_id_missing_is_not_found() {
        let store = memory_store().await;
        let err = store.get_by_id(12345).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn stats_aggregates() {
        let store = memory_store().await;
        store.store(&record("a.test", "GET", 200)).await.unwrap();
        store.store(&record("a.test", "GET", 200)).await.unwrap();
        store.store(&record("b.test", "POST", 500)).await.unwrap();

        let stats = store.stats(&TrafficFilter::default()).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.requests_by_method["GET"], 2);
        assert_eq!(stats.requests_by_status[&500], 1);
        assert_eq!(stats.unique_hosts, 2);
    }

    #[tokio::test]
    async fn closed_store_rejects_operations() {
        let store = memory_store().await;
        store.close().await.unwrap();
        store.close().await.unwrap(); // idempotent

        assert!(matches!(
            store.store(&record("h", "GET", 200)).await.unwrap_err(),
            StorageError::Closed
        ));
        assert!(matches!(
            store.count(&TrafficFilter::default()).await.unwrap_err(),
            StorageError::Closed
        ));
    }
}

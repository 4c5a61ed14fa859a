//! PostgreSQL integration tests using testcontainers
//!
//! These tests require Docker to be running. Run with:
//!
//! ```bash
//! cargo test -p coinstash-ingest --test postgres_integration_test -- --ignored --nocapture
//! ```

mod common;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use coinstash_ingest::config::IngestConfig;
use coinstash_ingest::connection::{is_transient, ConnectError, ConnectionProvider, RetryPolicy};
use coinstash_ingest::store::{Connect, PgConnector};
use coinstash_ingest::{Dataset, LoadResult, Pipeline};
use common::{base_time, dataset, init_test_tracing, record};
use sqlx::{Connection, PgConnection};
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    config: IngestConfig,
}

impl TestPostgres {
    async fn start() -> Self {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .expect("Failed to start PostgreSQL container");

        let host = container.get_host().await.expect("Failed to get container host");
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .expect("Failed to get container port");

        let host = host.to_string();
        let port = port.to_string();
        let config = IngestConfig::from_lookup(|key| {
            match key {
                "DB_HOST" => Some(host.clone()),
                "DB_PORT" => Some(port.clone()),
                "DB_USER" | "DB_PASS" | "DB_NAME" => Some("postgres".to_string()),
                "ETL_CHUNK_SIZE" => Some("1000".to_string()),
                "ETL_PAGE_SIZE" => Some("100".to_string()),
                "ETL_WORKERS" => Some("2".to_string()),
                _ => None,
            }
        })
        .expect("Invalid test configuration");

        Self {
            _container: container,
            config,
        }
    }

    async fn connect(&self) -> PgConnection {
        PgConnection::connect_with(&self.config.store.connect_options())
            .await
            .expect("Failed to connect to PostgreSQL")
    }

    async fn count(&self) -> i64 {
        let mut conn = self.connect().await;
        sqlx::query_scalar("SELECT COUNT(*) FROM crypto_price")
            .fetch_one(&mut conn)
            .await
            .expect("Count query failed")
    }

    async fn price(&self, id: &str, last_updated: DateTime<Utc>) -> Option<BigDecimal> {
        let mut conn = self.connect().await;
        sqlx::query_scalar("SELECT current_price FROM crypto_price WHERE id = $1 AND last_updated = $2")
            .bind(id)
            .bind(last_updated)
            .fetch_optional(&mut conn)
            .await
            .expect("Price query failed")
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_load_upserts_into_postgres() {
    init_test_tracing();
    let pg = TestPostgres::start().await;

    let pipeline = Pipeline::postgres(&pg.config);
    pipeline.prepare().await.expect("Schema bootstrap failed");
    // Idempotent
    pipeline.prepare().await.expect("Second schema bootstrap failed");

    let data = dataset(2500);
    let report = pipeline.load(&data).await;
    assert_eq!(report.result(), LoadResult::Success);
    assert_eq!(report.batch_count(), 3);
    assert_eq!(pg.count().await, 2500);

    // Same batches again: no new rows
    assert_eq!(pipeline.load(&data).await.result(), LoadResult::Success);
    assert_eq!(pg.count().await, 2500);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_conflict_overwrites_and_new_timestamp_appends() {
    init_test_tracing();
    let pg = TestPostgres::start().await;

    let pipeline = Pipeline::postgres(&pg.config);
    pipeline.prepare().await.expect("Schema bootstrap failed");

    let ts = base_time();
    let first = Dataset::new(ts, vec![record("bitcoin", "64000.00", ts), record("ethereum", "2400.00", ts)]);
    assert!(pipeline.load(&first).await.result().is_success());

    let update = Dataset::new(ts, vec![record("bitcoin", "65000.25", ts)]);
    assert!(pipeline.load(&update).await.result().is_success());

    assert_eq!(pg.price("bitcoin", ts).await, Some("65000.25".parse().unwrap()));
    assert_eq!(pg.price("ethereum", ts).await, Some("2400.00".parse().unwrap()));

    let later = ts + Duration::minutes(5);
    let next_run = Dataset::new(later, vec![record("bitcoin", "65100.00", later)]);
    assert!(pipeline.load(&next_run).await.result().is_success());

    assert_eq!(pg.count().await, 3);
    assert_eq!(pg.price("bitcoin", ts).await, Some("65000.25".parse().unwrap()));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_bad_password_is_terminal() {
    init_test_tracing();
    let pg = TestPostgres::start().await;

    let mut store = pg.config.store.clone();
    store.password = Some("wrong".to_string());
    let connector = PgConnector::new(store.connect_options());

    let raw_err = connector.connect().await.err().expect("Connection should fail");
    assert!(!is_transient(&raw_err));

    let provider = ConnectionProvider::new(connector, RetryPolicy::default());
    assert!(matches!(
        provider.acquire().await.err(),
        Some(ConnectError::Terminal { .. })
    ));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_failing_later_page_rolls_back_batch() {
    init_test_tracing();
    let pg = TestPostgres::start().await;

    let pipeline = Pipeline::postgres(&pg.config);
    pipeline.prepare().await.expect("Schema bootstrap failed");

    // 150 rows in one batch, two pages of 100; row 120 overflows NUMERIC(20, 2)
    let ts = base_time();
    let records = (0..150)
        .map(|i| {
            let price = if i == 120 { "1e30" } else { "1.00" };
            record(&format!("coin-{i}"), price, ts - Duration::seconds(i))
        })
        .collect();
    let report = pipeline.load(&Dataset::new(ts, records)).await;

    assert_eq!(
        report.result(),
        LoadResult::PartialFailure {
            failed_batch_indices: vec![1]
        }
    );
    assert_eq!(pg.count().await, 0);

    // The same connection settings still work afterwards
    assert!(pipeline.load(&dataset(10)).await.result().is_success());
    assert_eq!(pg.count().await, 10);
}

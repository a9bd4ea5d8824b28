//! Hand-rolled test doubles for the `Db`/`Queue` seam, in the shape of the
//! runtime crate's `MockPublisher`: an in-memory double behind a `Mutex`,
//! recording or serving exactly what the trait promises and nothing more.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use jacobine_core::config::Config;
use jacobine_core::error::{TransportError, UsageError};
use jacobine_core::sql::SqlValue;
use jacobine_db::{Db, SqlRow, UsageOrDatabaseError};
use jacobine_fetch::HttpFetcher;
use jacobine_queue::Queue;
use jacobine_runtime::StageDeps;
use tokio::sync::Mutex;

/// An in-memory table set. Rows are matched against a predicate by plain
/// equality, same semantics as the gateway's generated `WHERE` clause.
#[derive(Default)]
pub struct MockDb {
    tables: BTreeMap<String, Vec<SqlRow>>,
    next_id: i64,
}

impl MockDb {
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn seed(mut self, table: &str, row: SqlRow) -> Self {
        self.tables.entry(table.to_string()).or_default().push(row);
        self
    }

    fn matches(row: &SqlRow, predicate: &BTreeMap<String, SqlValue>) -> bool {
        predicate.iter().all(|(col, val)| row.get(col) == Some(val))
    }
}

#[async_trait]
impl Db for MockDb {
    async fn select(
        &mut self,
        table: &str,
        predicate: &BTreeMap<String, SqlValue>,
        _group_by: Option<&str>,
        _order_by: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Vec<SqlRow>, UsageOrDatabaseError> {
        if table.is_empty() {
            return Err(UsageOrDatabaseError::Usage(UsageError::EmptyTable));
        }
        let rows = self.tables.get(table).cloned().unwrap_or_default();
        let mut matched: Vec<SqlRow> = rows.into_iter().filter(|r| Self::matches(r, predicate)).collect();
        if let Some(limit) = limit {
            matched.truncate(limit as usize);
        }
        Ok(matched)
    }

    async fn insert(&mut self, table: &str, values: &BTreeMap<String, SqlValue>) -> Result<String, UsageOrDatabaseError> {
        if values.is_empty() {
            return Err(UsageOrDatabaseError::Usage(UsageError::EmptyValues));
        }
        let id = self.next_id;
        self.next_id += 1;
        let mut row = values.clone();
        row.insert("id".to_string(), SqlValue::Int(id));
        self.tables.entry(table.to_string()).or_default().push(row);
        Ok(id.to_string())
    }

    async fn update(
        &mut self,
        table: &str,
        values: &BTreeMap<String, SqlValue>,
        predicate: &BTreeMap<String, SqlValue>,
    ) -> Result<u64, UsageOrDatabaseError> {
        let mut affected = 0u64;
        if let Some(rows) = self.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| Self::matches(r, predicate)) {
                for (col, val) in values {
                    row.insert(col.clone(), val.clone());
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&mut self, table: &str, predicate: &BTreeMap<String, SqlValue>) -> Result<u64, UsageOrDatabaseError> {
        let Some(rows) = self.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !Self::matches(r, predicate));
        Ok((before - rows.len()) as u64)
    }
}

/// Wraps a `MockDb` behind an `Arc<Mutex<_>>` so a test can hold its own
/// handle to peek at table state after `process()` has taken ownership of
/// the `Box<dyn Db>` half.
#[derive(Clone, Default)]
pub struct SharedMockDb(Arc<Mutex<MockDb>>);

impl SharedMockDb {
    pub fn new(db: MockDb) -> Self {
        Self(Arc::new(Mutex::new(db)))
    }

    pub async fn row(&self, table: &str, id: i64) -> SqlRow {
        let mut predicate = BTreeMap::new();
        predicate.insert("id".to_string(), SqlValue::Int(id));
        let mut db = self.0.lock().await;
        db.select(table, &predicate, None, None, Some(1))
            .await
            .expect("select")
            .pop()
            .expect("row present")
    }
}

#[async_trait]
impl Db for SharedMockDb {
    async fn select(
        &mut self,
        table: &str,
        predicate: &BTreeMap<String, SqlValue>,
        group_by: Option<&str>,
        order_by: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Vec<SqlRow>, UsageOrDatabaseError> {
        self.0.lock().await.select(table, predicate, group_by, order_by, limit).await
    }

    async fn insert(&mut self, table: &str, values: &BTreeMap<String, SqlValue>) -> Result<String, UsageOrDatabaseError> {
        self.0.lock().await.insert(table, values).await
    }

    async fn update(
        &mut self,
        table: &str,
        values: &BTreeMap<String, SqlValue>,
        predicate: &BTreeMap<String, SqlValue>,
    ) -> Result<u64, UsageOrDatabaseError> {
        self.0.lock().await.update(table, values, predicate).await
    }

    async fn delete(&mut self, table: &str, predicate: &BTreeMap<String, SqlValue>) -> Result<u64, UsageOrDatabaseError> {
        self.0.lock().await.delete(table, predicate).await
    }
}

pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

#[derive(Default)]
pub struct MockQueue {
    published: Mutex<Vec<PublishedMessage>>,
    pub fail_next: Mutex<bool>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail_next: Mutex::new(false),
        }
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.drain(..).collect()
    }
}

#[async_trait]
impl Queue for MockQueue {
    async fn publish_bytes(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), TransportError> {
        let mut fail = self.fail_next.lock().await;
        if *fail {
            *fail = false;
            return Err(TransportError("mock publish failure".to_string()));
        }
        self.published.lock().await.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
        });
        Ok(())
    }

    async fn ack(&self, _delivery_tag: u64) -> Result<(), TransportError> {
        Ok(())
    }

    async fn nack_requeue(&self, _delivery_tag: u64) -> Result<(), TransportError> {
        Ok(())
    }

    async fn reject_no_requeue(&self, _delivery_tag: u64) -> Result<(), TransportError> {
        Ok(())
    }
}

const TEST_CONFIG: &str = r#"
RabbitMQ:
  host: localhost
  port: 5672
  user: guest
  password: guest
  vhost: /
MySQL:
  host: localhost
  port: 3306
  user: root
  password: secret
Various:
  requests_timeout: 30
  downloads_timeout: 3600
Application:
  tar:
    path: tar
  git:
    path: git
Projects:
  TYPO3:
    MySQL:
      database: typo3
    RabbitMQ:
      exchange: JacobineAnalysis
    releases_path: /tmp/jacobine-test-releases
    git_checkout_path: /tmp/jacobine-test-git
    analyzers:
      - analysis.cvsanaly
      - analysis.phploc
"#;

/// A `StageDeps` wired to `MockDb`/`MockQueue`, project `TYPO3`, config
/// parsed from a fixed in-memory YAML document. Good enough to exercise
/// every `Stage::process()` precondition and idempotence branch without a
/// live broker or database. Returns the `MockQueue` handle alongside the
/// deps so a test can inspect what got published after `process()` runs.
pub fn test_deps(db: MockDb, queue: MockQueue) -> (StageDeps, Arc<MockQueue>) {
    let config = Arc::new(Config::from_yaml(TEST_CONFIG).expect("parse test config"));
    let fetcher = Arc::new(HttpFetcher::new().expect("build http client"));
    let queue = Arc::new(queue);
    let deps = StageDeps::new(Box::new(db), queue.clone(), fetcher, config, "TYPO3".to_string());
    (deps, queue)
}

/// Same as [`test_deps`], but hands back a [`SharedMockDb`] handle so a
/// test can inspect table state after `process()` returns.
pub fn test_deps_shared(db: MockDb, queue: MockQueue) -> (StageDeps, Arc<MockQueue>, SharedMockDb) {
    let config = Arc::new(Config::from_yaml(TEST_CONFIG).expect("parse test config"));
    let fetcher = Arc::new(HttpFetcher::new().expect("build http client"));
    let queue = Arc::new(queue);
    let shared = SharedMockDb::new(db);
    let deps = StageDeps::new(Box::new(shared.clone()), queue.clone(), fetcher, config, "TYPO3".to_string());
    (deps, queue, shared)
}

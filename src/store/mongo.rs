use anyhow::{Context, Result};
use futures_util::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Client, Collection};

use super::{CallRecord, RecordStore, Window};
use crate::config::StoreConfig;

/// Document field holding the report insert time in epoch milliseconds.
pub const INSERT_TIME_FIELD: &str = "insertTime";
/// Document field holding the session id.
pub const SESSION_ID_FIELD: &str = "sid";
/// Sub-document whose string values are the raw diagnostic lines.
pub const CALL_LOG_FIELD: &str = "callBaseLog";

/// Call report store backed by a MongoDB collection.
///
/// The client keeps its own connection pool, which is reused across cycles.
pub struct MongoStore {
    collection: Collection<Document>,
}

impl MongoStore {
    /// Connects to the configured deployment and verifies it with a ping.
    pub async fn connect(cfg: &StoreConfig) -> Result<Self> {
        let client = Client::with_uri_str(&cfg.uri)
            .await
            .context("parsing MongoDB connection string")?;

        let database = client.database(&cfg.database);
        database
            .run_command(doc! { "ping": 1 })
            .await
            .context("pinging MongoDB")?;

        tracing::info!(
            database = %cfg.database,
            collection = %cfg.collection,
            "MongoDB store connected",
        );

        Ok(Self {
            collection: database.collection(&cfg.collection),
        })
    }
}

impl RecordStore for MongoStore {
    async fn latest_insert_time(&self) -> Result<Option<i64>> {
        let latest = self
            .collection
            .find_one(doc! {})
            .sort(doc! { "insertTime": -1 })
            .projection(doc! { "insertTime": 1 })
            .await
            .context("querying latest insert time")?;

        Ok(latest.as_ref().and_then(insert_time))
    }

    async fn fetch_records(&self, window: &Window) -> Result<Vec<CallRecord>> {
        let mut cursor = self
            .collection
            .find(window_filter(window))
            .projection(doc! { "callBaseLog": 1, "sid": 1 })
            .await
            .context("querying call reports")?;

        let mut records = Vec::new();
        while let Some(document) = cursor
            .try_next()
            .await
            .context("reading call report cursor")?
        {
            records.push(record_from_document(&document));
        }

        Ok(records)
    }
}

/// Builds the find filter for `window`.
pub fn window_filter(window: &Window) -> Document {
    let upper_op = if window.upper_inclusive { "$lte" } else { "$lt" };

    let mut range = doc! { "$gt": window.lower };
    range.insert(upper_op, window.upper);

    let mut filter = Document::new();
    filter.insert(INSERT_TIME_FIELD, range);
    filter.insert(CALL_LOG_FIELD, doc! { "$exists": true });
    filter
}

/// Reads the insert time, accepting any numeric BSON encoding.
pub fn insert_time(document: &Document) -> Option<i64> {
    match document.get(INSERT_TIME_FIELD)? {
        Bson::Int64(v) => Some(*v),
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Double(v) if v.is_finite() => Some(*v as i64),
        _ => None,
    }
}

/// Converts a projected report document into a [`CallRecord`].
///
/// Non-string values inside the log sub-document are skipped.
pub fn record_from_document(document: &Document) -> CallRecord {
    let session_id = document
        .get_str(SESSION_ID_FIELD)
        .unwrap_or_default()
        .to_string();

    let diagnostic_lines = document
        .get_document(CALL_LOG_FIELD)
        .map(|log| {
            log.values()
                .filter_map(Bson::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    CallRecord {
        session_id,
        diagnostic_lines,
    }
}

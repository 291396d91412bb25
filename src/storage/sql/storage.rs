use std::borrow::Cow;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{FromRow, SqlitePool, query, query_as};
use tokio::{runtime::Handle, task};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::data::{NewRequest, Request, RequestId};
use crate::storage::{Storage, StorageError, check_matchable};

use super::util::ResultExt as _;

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn open(url: &Url) -> sqlx::Result<Self> {
        info!(%url, "loading sql request data");

        let opts: SqliteConnectOptions = url.as_str().parse()?;
        let opts = opts
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePool::connect_with(opts).await?;
        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn fetch_request(&self, id: RequestId) -> sqlx::Result<Option<Request>> {
        let request = block_async_in_place(
            query_as::<_, SqlRequest>(
                "
                    SELECT
                        id,
                        recipient,
                        amount,
                        reason,
                        message,
                        matched_transaction_uuid,
                        date_sent
                    FROM requests
                    WHERE id = ?
                ",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )?;
        Ok(request.map(Request::from))
    }
}

#[derive(FromRow)]
struct SqlRequest {
    id: RequestId,
    recipient: String,
    amount: Option<String>,
    reason: Option<String>,
    message: String,
    matched_transaction_uuid: Option<Uuid>,
    date_sent: DateTime<Utc>,
}

impl From<SqlRequest> for Request {
    fn from(request: SqlRequest) -> Self {
        let SqlRequest {
            id,
            recipient,
            amount,
            reason,
            message,
            matched_transaction_uuid,
            date_sent,
        } = request;
        Self {
            id,
            recipient,
            amount,
            reason,
            message,
            matched_transaction: matched_transaction_uuid,
            date_sent,
        }
    }
}

impl Storage for SqliteStorage {
    fn requests(&self) -> Box<dyn Iterator<Item = Cow<'_, Request>> + '_> {
        let requests = block_async_in_place(
            query_as::<_, SqlRequest>(
                "
                    SELECT
                        id,
                        recipient,
                        amount,
                        reason,
                        message,
                        matched_transaction_uuid,
                        date_sent
                    FROM requests
                    ORDER BY id ASC
                ",
            )
            .fetch_all(&self.pool),
        );
        Box::new(
            requests
                .ok_logged()
                .into_iter()
                .flatten()
                .map(|request| Cow::Owned(request.into())),
        )
    }

    fn request(&self, id: RequestId) -> Option<Cow<'_, Request>> {
        self.fetch_request(id).ok_logged()?.map(Cow::Owned)
    }

    fn store_request(&mut self, request: NewRequest) -> Result<Cow<'_, Request>, StorageError> {
        let inserted = block_async_in_place(
            query(
                "
                    INSERT INTO requests(recipient, amount, reason, message, date_sent)
                    VALUES (?, ?, ?, ?, ?)
                ",
            )
            .bind(&request.recipient)
            .bind(&request.amount)
            .bind(&request.reason)
            .bind(&request.message)
            .bind(request.date_sent)
            .execute(&self.pool),
        )?;
        let id = RequestId(inserted.last_insert_rowid());
        debug!(%id, "stored new request");
        Ok(Cow::Owned(request.into_request(id)))
    }

    fn match_transaction(
        &mut self,
        id: RequestId,
        transaction: Uuid,
    ) -> Result<Cow<'_, Request>, StorageError> {
        // conditional update, so that a concurrent match can't be overwritten
        let updated = block_async_in_place(
            query(
                "
                    UPDATE requests
                    SET matched_transaction_uuid = ?1
                    WHERE id = ?2
                        AND (matched_transaction_uuid IS NULL OR matched_transaction_uuid = ?1)
                ",
            )
            .bind(transaction)
            .bind(id)
            .execute(&self.pool),
        )?;
        let request = self.fetch_request(id)?.ok_or(StorageError::NotFound(id))?;
        if updated.rows_affected() == 0 {
            check_matchable(&request, transaction)?;
        }
        debug!(%id, %transaction, "matched request");
        Ok(Cow::Owned(request))
    }

    fn unmatched_requests(&self) -> Box<dyn Iterator<Item = Cow<'_, Request>> + '_> {
        let requests = block_async_in_place(
            query_as::<_, SqlRequest>(
                "
                    SELECT
                        id,
                        recipient,
                        amount,
                        reason,
                        message,
                        matched_transaction_uuid,
                        date_sent
                    FROM requests
                    WHERE matched_transaction_uuid IS NULL
                    ORDER BY id ASC
                ",
            )
            .fetch_all(&self.pool),
        );
        Box::new(
            requests
                .ok_logged()
                .into_iter()
                .flatten()
                .map(|request| Cow::Owned(request.into())),
        )
    }

    fn requests_to<'a>(
        &'a self,
        recipient: &'a str,
    ) -> Box<dyn Iterator<Item = Cow<'a, Request>> + 'a> {
        let requests = block_async_in_place(
            query_as::<_, SqlRequest>(
                "
                    SELECT
                        id,
                        recipient,
                        amount,
                        reason,
                        message,
                        matched_transaction_uuid,
                        date_sent
                    FROM requests
                    WHERE recipient = ?
                    ORDER BY id ASC
                ",
            )
            .bind(recipient)
            .fetch_all(&self.pool),
        );
        Box::new(
            requests
                .ok_logged()
                .into_iter()
                .flatten()
                .map(|request| Cow::Owned(request.into())),
        )
    }
}

/// Runs and waits for the given future to complete in a synchronous context.
///
/// Note that even though this function is called in a synchronous context, at some point down the
/// stack it must be called in a multi-threaded asynchronous context. In particular, tests must be
/// asynchronous and of flavor `multi_thread`.
fn block_async_in_place<F>(task: F) -> F::Output
where
    F: Future,
{
    task::block_in_place(|| Handle::current().block_on(task))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::storage::tests::{TRANSACTION, check_storage};

    async fn in_memory() -> SqliteStorage {
        let url: Url = "sqlite::memory:".parse().unwrap();
        SqliteStorage::open(&url).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sqlite_storage() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let mut storage = in_memory().await;
        check_storage(&mut storage);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sqlite_storage_round_trips_fields() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let mut storage = in_memory().await;

        let new_request = NewRequest::new("+15551234567", "Hi, please send")
            .with_amount("1,000")
            .with_reason("rent");
        let stored = storage.store_request(new_request).unwrap().into_owned();

        let loaded = storage.request(stored.id).unwrap().into_owned();
        assert_eq!(loaded.recipient, "+15551234567");
        assert_eq!(loaded.amount.as_deref(), Some("1,000"));
        assert_eq!(loaded.reason.as_deref(), Some("rent"));
        assert_eq!(loaded.message, "Hi, please send");
        assert_eq!(loaded.matched_transaction, None);
        assert_eq!(loaded.date_sent, stored.date_sent);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sqlite_storage_default_date_sent() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let storage = in_memory().await;

        let before = Utc::now().timestamp() - 1;
        query("INSERT INTO requests(recipient, message) VALUES ('+15551234567', 'hello')")
            .execute(&storage.pool)
            .await
            .unwrap();

        let request = storage.requests().next().unwrap().into_owned();
        assert!(request.date_sent.timestamp() >= before);
        assert!(request.date_sent <= Utc::now());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sqlite_storage_persists() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let tempdir = tempdir().unwrap();
        let path = tempdir.path().join("requests.db");
        let url: Url = format!("sqlite://{}", path.display()).parse().unwrap();

        let id = {
            let mut storage = SqliteStorage::open(&url).await.unwrap();
            let id = storage
                .store_request(NewRequest::new("+15551234567", "hello"))
                .unwrap()
                .id;
            storage.match_transaction(id, TRANSACTION).unwrap();
            storage.close().await;
            id
        };

        let storage = SqliteStorage::open(&url).await.unwrap();
        let request = storage.request(id).unwrap();
        assert_eq!(request.matched_transaction, Some(TRANSACTION));
        assert_eq!(storage.unmatched_requests().count(), 0);
    }
}

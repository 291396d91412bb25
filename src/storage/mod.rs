mod memory;
mod sql;

use std::borrow::Cow;

use uuid::Uuid;

use crate::data::{NewRequest, Request, RequestId};

pub use memory::InMemoryStorage;
pub use sql::SqliteStorage;

/// Storage of payment requests.
///
/// ## Implementation note
///
/// The implementer can choose whether to return owning or borrowed objects from the storage. This
/// depends whether the objects are stored as is, or are converted and/or serialized.
pub trait Storage {
    /// Requests sorted by id in ascending order
    fn requests(&self) -> Box<dyn Iterator<Item = Cow<'_, Request>> + '_>;

    /// Gets the request by id
    fn request(&self, id: RequestId) -> Option<Cow<'_, Request>>;

    /// Stores a new request under a freshly generated id and returns it back
    fn store_request(&mut self, request: NewRequest) -> Result<Cow<'_, Request>, StorageError>;

    /// Links the request to the settled `transaction`
    ///
    /// Fails if the request is already linked to a different transaction. Linking the same
    /// transaction again is a no-op.
    fn match_transaction(
        &mut self,
        id: RequestId,
        transaction: Uuid,
    ) -> Result<Cow<'_, Request>, StorageError>;

    /// Requests which are not linked to any transaction yet
    fn unmatched_requests(&self) -> Box<dyn Iterator<Item = Cow<'_, Request>> + '_> {
        Box::new(self.requests().filter(|request| !request.is_matched()))
    }

    /// Requests sent to exactly this `recipient`
    fn requests_to<'a>(
        &'a self,
        recipient: &'a str,
    ) -> Box<dyn Iterator<Item = Cow<'a, Request>> + 'a> {
        Box::new(
            self.requests()
                .filter(move |request| request.recipient == recipient),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no request with id {0}")]
    NotFound(RequestId),
    #[error("request {id} is already matched to transaction {existing}")]
    AlreadyMatched { id: RequestId, existing: Uuid },
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// Checks that `transaction` can be linked to `request`
fn check_matchable(request: &Request, transaction: Uuid) -> Result<(), StorageError> {
    match request.matched_transaction {
        Some(existing) if existing != transaction => Err(StorageError::AlreadyMatched {
            id: request.id,
            existing,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use uuid::uuid;

    use super::*;

    pub(crate) const TRANSACTION: Uuid = uuid!("966960e0-a8cd-43f1-ac7a-2c986dd470cd");
    pub(crate) const OTHER_TRANSACTION: Uuid = uuid!("a955d20f-6b83-4e69-846e-a99b1779ff7a");

    /// Checks the storage contract on an empty storage
    pub(crate) fn check_storage(storage: &mut dyn Storage) {
        assert_eq!(storage.requests().count(), 0);

        let first = storage
            .store_request(NewRequest::new("+15551234567", "pay me").with_amount("12.50"))
            .unwrap()
            .into_owned();
        let second = storage
            .store_request(NewRequest::new("+15557654321", "lunch").with_reason("lunch"))
            .unwrap()
            .into_owned();
        assert_ne!(first.id, second.id);
        assert!(first.id < second.id);

        let ids: Vec<_> = storage.requests().map(|request| request.id).collect();
        assert_eq!(ids, [first.id, second.id]);
        assert_eq!(storage.request(first.id).unwrap().as_ref(), &first);
        assert_eq!(storage.request(RequestId(first.id.0 + 100)), None);

        let to: Vec<_> = storage
            .requests_to("+15557654321")
            .map(|request| request.id)
            .collect();
        assert_eq!(to, [second.id]);

        let matched = storage
            .match_transaction(first.id, TRANSACTION)
            .unwrap()
            .into_owned();
        assert_eq!(matched.matched_transaction, Some(TRANSACTION));
        assert_eq!(matched.message, first.message);

        // idempotent
        storage.match_transaction(first.id, TRANSACTION).unwrap();

        // never overwritten
        let error = storage
            .match_transaction(first.id, OTHER_TRANSACTION)
            .unwrap_err();
        assert!(
            matches!(error, StorageError::AlreadyMatched { id, existing } if id == first.id && existing == TRANSACTION)
        );
        assert_eq!(
            storage.request(first.id).unwrap().matched_transaction,
            Some(TRANSACTION)
        );

        let error = storage
            .match_transaction(RequestId(first.id.0 + 100), TRANSACTION)
            .unwrap_err();
        assert!(matches!(error, StorageError::NotFound(_)));

        let unmatched: Vec<_> = storage
            .unmatched_requests()
            .map(|request| request.id)
            .collect();
        assert_eq!(unmatched, [second.id]);
    }
}

use std::borrow::Cow;
use std::collections::BTreeMap;

use uuid::Uuid;

use crate::data::{NewRequest, Request, RequestId};

use super::{Storage, StorageError, check_matchable};

/// Storage which keeps requests in memory only
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    requests: BTreeMap<RequestId, Request>,
    last_id: i64,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Storage for InMemoryStorage {
    fn requests(&self) -> Box<dyn Iterator<Item = Cow<'_, Request>> + '_> {
        Box::new(self.requests.values().map(Cow::Borrowed))
    }

    fn request(&self, id: RequestId) -> Option<Cow<'_, Request>> {
        self.requests.get(&id).map(Cow::Borrowed)
    }

    fn store_request(&mut self, request: NewRequest) -> Result<Cow<'_, Request>, StorageError> {
        self.last_id += 1;
        let id = RequestId(self.last_id);
        let request = self
            .requests
            .entry(id)
            .or_insert_with(|| request.into_request(id));
        Ok(Cow::Borrowed(&*request))
    }

    fn match_transaction(
        &mut self,
        id: RequestId,
        transaction: Uuid,
    ) -> Result<Cow<'_, Request>, StorageError> {
        let request = self
            .requests
            .get_mut(&id)
            .ok_or(StorageError::NotFound(id))?;
        check_matchable(request, transaction)?;
        request.matched_transaction = Some(transaction);
        Ok(Cow::Borrowed(&*request))
    }
}

//! Payment requests and contacts

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a stored request, generated by the storage
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct RequestId(pub i64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RequestId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A payment request sent to a recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub recipient: String,
    /// Kept as entered to preserve formatting
    pub amount: Option<String>,
    pub reason: Option<String>,
    pub message: String,
    /// Settled transaction this request was correlated with
    ///
    /// Once set, it is never overwritten.
    pub matched_transaction: Option<Uuid>,
    pub date_sent: DateTime<Utc>,
}

impl Request {
    pub fn is_matched(&self) -> bool {
        self.matched_transaction.is_some()
    }
}

/// A request which is not stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
    pub recipient: String,
    pub amount: Option<String>,
    pub reason: Option<String>,
    pub message: String,
    pub date_sent: DateTime<Utc>,
}

impl NewRequest {
    /// Creates a new request dated now
    pub fn new(recipient: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            amount: None,
            reason: None,
            message: message.into(),
            date_sent: Utc::now(),
        }
    }

    pub fn with_amount(self, amount: impl Into<String>) -> Self {
        Self {
            amount: Some(amount.into()),
            ..self
        }
    }

    pub fn with_reason(self, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..self
        }
    }

    pub(crate) fn into_request(self, id: RequestId) -> Request {
        let Self {
            recipient,
            amount,
            reason,
            message,
            date_sent,
        } = self;
        Request {
            id,
            recipient,
            amount,
            reason,
            message,
            matched_transaction: None,
            date_sent,
        }
    }
}

/// Known contact a request can be sent to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    /// Phone number like account number, in any format
    pub account_number: String,
}

impl Contact {
    pub fn new(id: i64, account_number: impl Into<String>) -> Self {
        Self {
            id,
            account_number: account_number.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_is_dated_now() {
        let before = Utc::now();
        let request = NewRequest::new("+15551234567", "please pay")
            .with_amount("1,000.00")
            .with_reason("lunch");
        assert!(before <= request.date_sent && request.date_sent <= Utc::now());
        assert_eq!(request.amount.as_deref(), Some("1,000.00"));

        let request = request.into_request(RequestId(7));
        assert_eq!(request.id, RequestId(7));
        assert_eq!(request.reason.as_deref(), Some("lunch"));
        assert!(!request.is_matched());
    }

    #[test]
    fn test_request_id_from_str() {
        assert_eq!("42".parse::<RequestId>().unwrap(), RequestId(42));
        assert!("x".parse::<RequestId>().is_err());
    }
}

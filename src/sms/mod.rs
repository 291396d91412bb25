//! Watching a message store for sent SMS

mod memory;
mod store;
mod watcher;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::data::Contact;
use crate::phone::PhoneMatcher;

pub use memory::InMemoryMessageStore;
pub use store::{MessageStore, Registration};
pub use watcher::{SMS_SENT_EVENT, SentSmsWatcher, WatchHandle, WatchOutcome, WatchState};

/// Direction or delivery state of a stored message
///
/// Serialized as the numeric message type used by SMS providers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(from = "i32", into = "i32")]
pub enum MessageKind {
    #[strum(to_string = "received", serialize = "inbox")]
    Received,
    Sent,
    Draft,
    Outbox,
    Failed,
    Queued,
    /// Any message type not known to us
    #[strum(serialize = "unknown", to_string = "unknown({0})")]
    Unknown(i32),
}

impl MessageKind {
    /// Converts from the numeric message type used by SMS providers
    pub fn from_i32(i: i32) -> Self {
        match i {
            1 => Self::Received,
            2 => Self::Sent,
            3 => Self::Draft,
            4 => Self::Outbox,
            5 => Self::Failed,
            6 => Self::Queued,
            i => Self::Unknown(i),
        }
    }

    pub fn to_i32(self) -> i32 {
        match self {
            Self::Received => 1,
            Self::Sent => 2,
            Self::Draft => 3,
            Self::Outbox => 4,
            Self::Failed => 5,
            Self::Queued => 6,
            Self::Unknown(i) => i,
        }
    }
}

impl From<i32> for MessageKind {
    fn from(i: i32) -> Self {
        Self::from_i32(i)
    }
}

impl From<MessageKind> for i32 {
    fn from(kind: MessageKind) -> Self {
        kind.to_i32()
    }
}

/// The part of a stored message the watcher looks at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsEntry {
    /// Destination address for outgoing and source address for incoming messages
    pub address: String,
    pub kind: MessageKind,
}

impl SmsEntry {
    pub fn new(address: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            address: address.into(),
            kind,
        }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseEntryError {
    #[error("expected `<address> <kind>`")]
    MissingKind,
    #[error("unknown message kind: {0}")]
    UnknownKind(String),
}

/// Parses `<address> <kind>`, where kind is a name like `sent` or a numeric message type
///
/// The address may contain spaces.
impl FromStr for SmsEntry {
    type Err = ParseEntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, kind) = s
            .trim()
            .rsplit_once(char::is_whitespace)
            .ok_or(ParseEntryError::MissingKind)?;
        let kind = match kind.parse::<i32>() {
            Ok(i) => MessageKind::from_i32(i),
            Err(_) => kind
                .parse()
                .map_err(|_| ParseEntryError::UnknownKind(kind.to_owned()))?,
        };
        Ok(Self::new(address.trim(), kind))
    }
}

/// Returns the recipient the `entry` was sent to, if any
///
/// Only messages which are actually sent are considered; received, queued or failed ones never
/// match.
pub fn match_recipient<'a>(
    entry: &SmsEntry,
    recipients: &'a [Contact],
    matcher: &PhoneMatcher,
) -> Option<&'a Contact> {
    if entry.kind != MessageKind::Sent {
        return None;
    }
    recipients
        .iter()
        .find(|contact| matcher.matches(&entry.address, &contact.account_number))
}

#[cfg(test)]
mod tests {
    use phonenumber::country;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    use super::*;

    fn recipients() -> Vec<Contact> {
        vec![
            Contact::new(1, "+15551234567"),
            Contact::new(2, "+1 (555) 765-4321"),
        ]
    }

    fn matcher() -> PhoneMatcher {
        PhoneMatcher::new(Some(country::Id::US))
    }

    #[test]
    fn test_match_sent_to_recipient() {
        let recipients = recipients();
        let entry = SmsEntry::new("5551234567", MessageKind::Sent);
        let contact = match_recipient(&entry, &recipients, &matcher()).unwrap();
        assert_eq!(contact.id, 1);

        let entry = SmsEntry::new("555-765-4321", MessageKind::Sent);
        let contact = match_recipient(&entry, &recipients, &matcher()).unwrap();
        assert_eq!(contact.id, 2);
    }

    #[test]
    fn test_no_match_for_other_kinds() {
        let recipients = recipients();
        for kind in [
            MessageKind::Received,
            MessageKind::Draft,
            MessageKind::Outbox,
            MessageKind::Failed,
            MessageKind::Queued,
            MessageKind::Unknown(0),
            MessageKind::Unknown(7),
        ] {
            let entry = SmsEntry::new("5551234567", kind);
            assert_eq!(match_recipient(&entry, &recipients, &matcher()), None);
        }
    }

    #[test]
    fn test_no_match_for_unknown_address() {
        let entry = SmsEntry::new("5551234568", MessageKind::Sent);
        assert_eq!(match_recipient(&entry, &recipients(), &matcher()), None);
        assert_eq!(match_recipient(&entry, &[], &matcher()), None);
    }

    #[test]
    fn test_message_kind_conversions() {
        assert_eq!(MessageKind::from_i32(2), MessageKind::Sent);
        assert_eq!(MessageKind::from_i32(42), MessageKind::Unknown(42));
        assert_eq!(MessageKind::Queued.to_i32(), 6);
        assert_eq!(MessageKind::Sent.to_string(), "sent");
        assert_eq!(MessageKind::Received.to_string(), "received");
        assert_eq!("inbox".parse::<MessageKind>().unwrap(), MessageKind::Received);
        assert_eq!("SENT".parse::<MessageKind>().unwrap(), MessageKind::Sent);
        assert_eq!(MessageKind::Unknown(7).to_string(), "unknown(7)");
    }

    #[test]
    fn test_unknown_kind_keeps_its_number() {
        for i in [-1, 0, 7, 42] {
            assert_eq!(MessageKind::from_i32(i).to_i32(), i);
        }
        assert_eq!(
            "5551234567 7".parse::<SmsEntry>().unwrap().kind,
            MessageKind::Unknown(7)
        );
    }

    #[quickcheck]
    fn test_numeric_kind_round_trips(i: i32) -> bool {
        MessageKind::from_i32(i).to_i32() == i
    }

    #[test]
    fn test_parse_entry() {
        assert_eq!(
            "5551234567 sent".parse::<SmsEntry>().unwrap(),
            SmsEntry::new("5551234567", MessageKind::Sent)
        );
        assert_eq!(
            "+1 555 123 4567   1".parse::<SmsEntry>().unwrap(),
            SmsEntry::new("+1 555 123 4567", MessageKind::Received)
        );
        assert_eq!(
            "5551234567".parse::<SmsEntry>(),
            Err(ParseEntryError::MissingKind)
        );
        assert_eq!(
            "5551234567 delivered".parse::<SmsEntry>(),
            Err(ParseEntryError::UnknownKind("delivered".to_owned()))
        );
    }

    #[derive(Debug, Clone)]
    struct NotSent(SmsEntry);

    impl Arbitrary for NotSent {
        fn arbitrary(g: &mut Gen) -> Self {
            let kinds = [
                MessageKind::Received,
                MessageKind::Draft,
                MessageKind::Outbox,
                MessageKind::Failed,
                MessageKind::Queued,
                MessageKind::Unknown(9),
            ];
            let numbers = ["+15551234567", "5551234567", "+1 (555) 765-4321"];
            Self(SmsEntry::new(
                *g.choose(&numbers).unwrap(),
                *g.choose(&kinds).unwrap(),
            ))
        }
    }

    #[quickcheck]
    fn test_only_sent_messages_match(entry: NotSent) -> bool {
        match_recipient(&entry.0, &recipients(), &matcher()).is_none()
    }
}

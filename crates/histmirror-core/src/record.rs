//! Records: everything a mirrored conversation stores.
//!
//! History items ([`Message`], [`ServiceEvent`]) are immutable once fetched.
//! Side entities ([`Sender`], [`Group`], [`Channel`]) carry profile data that
//! changes over time and are always merged with replace semantics.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::error::CoreError;
use crate::types::Table;

/// An opaque protocol blob together with its kind discriminator.
///
/// The store keeps `bytes` verbatim and `kind` in a separate column, so
/// questions such as "which messages have photos" are answered without
/// decoding the blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Payload {
    /// Protocol-defined constructor/kind number.
    pub kind: u32,
    /// Encoded protocol object.
    pub bytes: Bytes,
}

impl Payload {
    /// Create a payload from raw parts.
    pub fn new(kind: u32, bytes: impl Into<Bytes>) -> Self {
        Self {
            kind,
            bytes: bytes.into(),
        }
    }

    /// Encode a protocol value with the given codec.
    pub fn encode_with<T, C: Codec<T>>(kind: u32, codec: &C, value: &T) -> Result<Self, CoreError> {
        Ok(Self::new(kind, codec.encode(value)?))
    }

    /// Decode the blob back into a protocol value.
    pub fn decode_with<T, C: Codec<T>>(&self, codec: &C) -> Result<T, CoreError> {
        codec.decode(&self.bytes)
    }

    /// Decode a CBOR blob without an explicit codec value.
    pub fn decode_cbor<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        ciborium::from_reader(self.bytes.as_ref()).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

/// A regular message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    /// Message text, or the media caption when the message has no text.
    pub text: Option<String>,
    pub sender_id: Option<i64>,
    /// Whether the account itself sent the message.
    pub outgoing: bool,
    /// Unix seconds.
    pub date: i64,
    pub edit_date: Option<i64>,
    /// Forward header, opaque.
    pub forward: Option<Bytes>,
    pub via_bot_id: Option<i64>,
    pub reply_to: Option<i64>,
    pub media: Option<Payload>,
    /// Formatting entities, opaque.
    pub entities: Option<Bytes>,
}

impl Message {
    /// Create a bare message with only an ID and a date.
    pub fn new(id: i64, date: i64) -> Self {
        Self {
            id,
            text: None,
            sender_id: None,
            outgoing: false,
            date,
            edit_date: None,
            forward: None,
            via_bot_id: None,
            reply_to: None,
            media: None,
            entities: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_sender(mut self, sender_id: i64) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    pub fn with_outgoing(mut self, outgoing: bool) -> Self {
        self.outgoing = outgoing;
        self
    }

    pub fn with_edit_date(mut self, edit_date: i64) -> Self {
        self.edit_date = Some(edit_date);
        self
    }

    pub fn with_reply_to(mut self, reply_to: i64) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn with_forward(mut self, forward: impl Into<Bytes>) -> Self {
        self.forward = Some(forward.into());
        self
    }

    pub fn with_via_bot(mut self, bot_id: i64) -> Self {
        self.via_bot_id = Some(bot_id);
        self
    }

    pub fn with_media(mut self, media: Payload) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_entities(mut self, entities: impl Into<Bytes>) -> Self {
        self.entities = Some(entities.into());
        self
    }
}

/// A service event (member joined, title changed, pinned, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub id: i64,
    pub sender_id: Option<i64>,
    pub outgoing: bool,
    /// Unix seconds.
    pub date: i64,
    pub reply_to: Option<i64>,
    pub action: Option<Payload>,
}

impl ServiceEvent {
    pub fn new(id: i64, date: i64) -> Self {
        Self {
            id,
            sender_id: None,
            outgoing: false,
            date,
            reply_to: None,
            action: None,
        }
    }

    pub fn with_sender(mut self, sender_id: i64) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    pub fn with_action(mut self, action: Payload) -> Self {
        self.action = Some(action);
        self
    }
}

/// A message author.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: i64,
    pub access_hash: Option<i64>,
    pub is_self: bool,
    pub is_contact: bool,
    pub is_mutual_contact: bool,
    pub is_deleted: bool,
    pub is_bot: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub photo: Option<Bytes>,
}

impl Sender {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, first: impl Into<String>, last: Option<&str>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = last.map(str::to_owned);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Human-readable name: "first last", falling back to the username.
    pub fn display_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => self.username.clone(),
        }
    }
}

/// A small group chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub created_at: Option<i64>,
    pub is_creator: bool,
    pub title: Option<String>,
    pub participants_count: Option<i64>,
    pub photo: Option<Bytes>,
}

impl Group {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: Some(title.into()),
            ..Self::default()
        }
    }
}

/// A broadcast channel or supergroup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub access_hash: Option<i64>,
    pub is_megagroup: bool,
    pub created_at: Option<i64>,
    pub is_creator: bool,
    pub title: Option<String>,
    pub username: Option<String>,
    pub photo: Option<Bytes>,
}

impl Channel {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: Some(title.into()),
            ..Self::default()
        }
    }
}

/// Every kind of stored entity.
///
/// Storage operates generically over this type and switches on the variant
/// only when mapping to and from table rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    Message(Message),
    ServiceEvent(ServiceEvent),
    Sender(Sender),
    Group(Group),
    Channel(Channel),
}

impl Record {
    /// The record's ID within its table.
    pub fn id(&self) -> i64 {
        match self {
            Record::Message(m) => m.id,
            Record::ServiceEvent(s) => s.id,
            Record::Sender(s) => s.id,
            Record::Group(g) => g.id,
            Record::Channel(c) => c.id,
        }
    }

    /// The table this record lives in.
    pub fn table(&self) -> Table {
        match self {
            Record::Message(_) | Record::ServiceEvent(_) => Table::Messages,
            Record::Sender(_) => Table::Senders,
            Record::Group(_) => Table::Groups,
            Record::Channel(_) => Table::Channels,
        }
    }

    /// Whether this is a history item (message or service event).
    pub fn is_history_item(&self) -> bool {
        self.table() == Table::Messages
    }

    /// Date of a history item; creation date of a group or channel.
    pub fn date(&self) -> Option<i64> {
        match self {
            Record::Message(m) => Some(m.date),
            Record::ServiceEvent(s) => Some(s.date),
            Record::Sender(_) => None,
            Record::Group(g) => g.created_at,
            Record::Channel(c) => c.created_at,
        }
    }

    /// Short variant name, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Record::Message(_) => "message",
            Record::ServiceEvent(_) => "service_event",
            Record::Sender(_) => "sender",
            Record::Group(_) => "group",
            Record::Channel(_) => "channel",
        }
    }
}

impl From<Message> for Record {
    fn from(m: Message) -> Self {
        Record::Message(m)
    }
}

impl From<ServiceEvent> for Record {
    fn from(s: ServiceEvent) -> Self {
        Record::ServiceEvent(s)
    }
}

impl From<Sender> for Record {
    fn from(s: Sender) -> Self {
        Record::Sender(s)
    }
}

impl From<Group> for Record {
    fn from(g: Group) -> Self {
        Record::Group(g)
    }
}

impl From<Channel> for Record {
    fn from(c: Channel) -> Self {
        Record::Channel(c)
    }
}

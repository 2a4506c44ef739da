//! # histmirror Core
//!
//! Pure primitives for histmirror: typed records, opaque payloads, codecs,
//! and canonical encoding.
//!
//! This crate contains no I/O, no storage, no networking. It describes what a
//! mirrored conversation is made of; the store and sync crates decide how it
//! is persisted and fetched.
//!
//! ## Key Types
//!
//! - [`Record`] - Closed tagged variant over every kind of stored entity
//! - [`Message`] / [`ServiceEvent`] - History items (share the `messages` table)
//! - [`Sender`] / [`Group`] / [`Channel`] - Side entities with mutable profiles
//! - [`Payload`] - Opaque protocol blob plus its kind discriminator
//! - [`Codec`] - Encode/decode capability supplied by the protocol layer
//! - [`Table`] - The four logical tables of a conversation store
//!
//! ## Canonicalization
//!
//! Records are encoded to CBOR in field declaration order. See [`canonical`].

pub mod canonical;
pub mod codec;
pub mod error;
pub mod record;
pub mod types;
pub mod validation;

pub use canonical::{canonical_bytes, record_digest, RecordDigest};
pub use codec::{CborCodec, Codec};
pub use error::{CoreError, ValidationError};
pub use record::{Channel, Group, Message, Payload, Record, Sender, ServiceEvent};
pub use types::{ConversationId, Table};
pub use validation::{validate_history_items, validate_record, validate_side_entity};

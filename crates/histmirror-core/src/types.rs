//! Strong type definitions for histmirror.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Identifier of a mirrored conversation (a user dialog, group or channel).
///
/// The numeric value is the remote peer ID. `0` is reserved for the
/// account's own "saved messages" dialog. The decimal form doubles as the
/// name of the conversation's storage directory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub i64);

impl ConversationId {
    /// The account's own dialog.
    pub const SELF: Self = Self(0);

    /// Get the raw peer ID.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConversationId({})", self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConversationId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<i64> for ConversationId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// The logical tables of a conversation store.
///
/// Messages and service events share [`Table::Messages`]; they are told apart
/// by a discriminator column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Messages,
    Senders,
    Groups,
    Channels,
}

impl Table {
    /// Every table, in schema order.
    pub const ALL: [Table; 4] = [Table::Messages, Table::Senders, Table::Groups, Table::Channels];

    /// SQL table name.
    pub const fn name(self) -> &'static str {
        match self {
            Table::Messages => "messages",
            Table::Senders => "senders",
            Table::Groups => "groups",
            Table::Channels => "channels",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_id_display_roundtrip() {
        let id = ConversationId(-1001234567890);
        let parsed: ConversationId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_conversation_id_debug() {
        let debug = format!("{:?}", ConversationId(42));
        assert_eq!(debug, "ConversationId(42)");
    }

    #[test]
    fn test_table_names_are_distinct() {
        let names: std::collections::HashSet<_> = Table::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(names.len(), Table::ALL.len());
    }
}

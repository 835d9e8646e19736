//! User-facing prompts raised by protocol steps.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{encoded::Encoded, ids::Identity};

/// Opaque identifier of one prompt instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DialogId(Uuid);

impl DialogId {
    /// Build a version 4 id from 16 random bytes.
    pub fn from_random_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for DialogId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Prompt shapes a step can show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialog {
    /// We invited `contact`; the user may cancel.
    OneToOneInvitationSent {
        /// Invited contact
        contact: Identity,
    },
    /// `contact` invited us; the user may accept or decline.
    OneToOneInvitationReceived {
        /// Inviting contact
        contact: Identity,
    },
}

/// Payload of a dialog channel message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogContent {
    /// Show or update the prompt.
    Show(Dialog),
    /// Dismiss the prompt.
    Delete,
}

impl DialogContent {
    /// Whether this is the delete sentinel.
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

/// "This message answers dialog X with user response Y".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogResponse {
    /// Prompt being answered
    pub dialog_id: DialogId,
    /// Encoded user answer
    pub response: Encoded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_produce_v4_ids() {
        let id = DialogId::from_random_bytes([7u8; 16]);
        assert_eq!(id.as_uuid().get_version_num(), 4);
    }
}

//! Channel kinds for outbound and inbound messages.
//!
//! Outbound messages name a [`SendChannel`]: a set of contacts reached over
//! their confirmed secure channels, the other devices of the owned identity,
//! a local dialog, or the engine itself. Inbound messages carry
//! [`ReceptionInfo`], attached by the transport and never by a sender.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    dialog::{DialogContent, DialogId},
    ids::Identity,
};

/// Routing/trust class of a delivery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Generated by this engine (programmatic start, dialog answer, replay).
    Local,
    /// Confirmed secure channel with a contact's device.
    Contact,
    /// Confirmed secure channel with another device of the owned identity.
    OwnedDevice,
    /// Prompt shown to the local user.
    UserInterface,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Contact => "contact",
            Self::OwnedDevice => "owned-device",
            Self::UserInterface => "user-interface",
        };
        f.write_str(name)
    }
}

/// Where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendChannel {
    /// All confirmed secure channels with these contacts.
    Contacts(BTreeSet<Identity>),
    /// All confirmed secure channels with the other devices of the owned
    /// identity.
    OwnedDevices,
    /// Show, update or dismiss a prompt.
    UserInterface {
        /// Prompt instance
        dialog_id: DialogId,
        /// Prompt to show, or the delete sentinel
        content: DialogContent,
    },
    /// Loop back into this engine.
    Local,
}

impl SendChannel {
    /// Channel to a single contact.
    pub fn contact(identity: Identity) -> Self {
        Self::Contacts(BTreeSet::from([identity]))
    }

    /// Kind of this channel.
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Contacts(_) => ChannelKind::Contact,
            Self::OwnedDevices => ChannelKind::OwnedDevice,
            Self::UserInterface { .. } => ChannelKind::UserInterface,
            Self::Local => ChannelKind::Local,
        }
    }
}

/// Transport-attached metadata describing how an inbound message arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceptionInfo {
    /// Channel the message came through
    pub channel: ChannelKind,
    /// Remote identity behind the channel, when the transport knows it
    pub remote: Option<Identity>,
}

impl ReceptionInfo {
    /// Message produced by this engine.
    pub const fn local() -> Self {
        Self { channel: ChannelKind::Local, remote: None }
    }

    /// Message received from a contact.
    pub const fn from_contact(remote: Identity) -> Self {
        Self { channel: ChannelKind::Contact, remote: Some(remote) }
    }

    /// Message received from another device of the owned identity.
    pub const fn from_owned_device(owned: Identity) -> Self {
        Self { channel: ChannelKind::OwnedDevice, remote: Some(owned) }
    }
}

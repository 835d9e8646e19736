//! Per-device contact book.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use parley_core::{IdentityDelegate, IdentityError, StatusChange};
use parley_proto::Identity;

#[derive(Debug, Default)]
struct BookState {
    /// contact -> one-to-one
    contacts: BTreeMap<Identity, bool>,
    other_devices: usize,
}

/// Contact book of one device.
///
/// Clones share state: the world keeps one handle to inspect and edit the
/// book while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct SimIdentityBook {
    state: Arc<Mutex<BookState>>,
}

impl SimIdentityBook {
    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, BookState> {
        self.state.lock().expect("identity book mutex poisoned")
    }

    /// Add `contact` if absent; existing status is kept.
    pub fn add_contact(&self, contact: Identity) {
        self.lock().contacts.entry(contact).or_insert(false);
    }

    /// Delete `contact` and everything known about them.
    pub fn remove_contact(&self, contact: &Identity) {
        self.lock().contacts.remove(contact);
    }

    /// Overwrite a contact's one-to-one status behind the engine's back.
    pub fn set_one_to_one(&self, contact: Identity, one_to_one: bool) {
        self.lock().contacts.insert(contact, one_to_one);
    }

    /// `None` if `contact` is unknown.
    pub fn one_to_one(&self, contact: &Identity) -> Option<bool> {
        self.lock().contacts.get(contact).copied()
    }

    /// All contacts with their status.
    pub fn contacts(&self) -> BTreeMap<Identity, bool> {
        self.lock().contacts.clone()
    }

    pub(crate) fn set_other_devices(&self, count: usize) {
        self.lock().other_devices = count;
    }
}

impl IdentityDelegate for SimIdentityBook {
    fn is_contact_of(&self, _owned: &Identity, contact: &Identity) -> Result<bool, IdentityError> {
        Ok(self.lock().contacts.contains_key(contact))
    }

    fn is_one_to_one_contact(
        &self,
        _owned: &Identity,
        contact: &Identity,
    ) -> Result<bool, IdentityError> {
        Ok(self.one_to_one(contact).unwrap_or(false))
    }

    fn reset_one_to_one_contact_status(
        &mut self,
        _owned: &Identity,
        contact: &Identity,
        one_to_one: bool,
    ) -> Result<StatusChange, IdentityError> {
        let mut state = self.lock();
        let Some(current) = state.contacts.get_mut(contact) else {
            return Ok(StatusChange::Unchanged);
        };
        let change = match (*current, one_to_one) {
            (false, true) => StatusChange::Upgraded,
            (true, false) => StatusChange::Downgraded,
            _ => StatusChange::Unchanged,
        };
        *current = one_to_one;
        Ok(change)
    }

    fn other_device_count(&self, _owned: &Identity) -> Result<usize, IdentityError> {
        Ok(self.lock().other_devices)
    }
}

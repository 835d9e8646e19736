//! Standard invariant checks.
//!
//! These must hold after every event the world processes, whatever order
//! messages arrive in.

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Every waiting record points at a live instance on the same device.
///
/// Records are deleted in the transaction that deletes their instance. A
/// record without an instance would replay into a fresh `Initial` run.
pub struct NoDanglingWaitingRecords;

impl Invariant for NoDanglingWaitingRecords {
    fn name(&self) -> &'static str {
        "NoDanglingWaitingRecords"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for device in &state.devices {
            for record in &device.waiting {
                let key = record.instance_key();
                if !device.has_instance(&key) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "device {}: waiting record on {} for missing instance {key}",
                            device.id, record.remote
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// No row is ever stored in a terminal state.
pub struct NoTerminalRows;

impl Invariant for NoTerminalRows {
    fn name(&self) -> &'static str {
        "NoTerminalRows"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for device in &state.devices {
            if let Some(instance) = device.instances.iter().find(|i| i.terminal) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "device {}: instance {} persisted in terminal state {}",
                        device.id, instance.key, instance.state
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Every prompt on screen belongs to a live instance of that device.
///
/// A step that finishes an instance must take its prompt down in the same
/// execution.
pub struct DialogsMatchInstances;

impl Invariant for DialogsMatchInstances {
    fn name(&self) -> &'static str {
        "DialogsMatchInstances"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for device in &state.devices {
            for (dialog_id, shown) in &device.dialogs {
                let key = shown.key(device.owned);
                if !device.has_instance(&key) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "device {}: dialog {dialog_id} still shown for finished instance {key}",
                            device.id
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// No execution failed.
///
/// Only meaningful for scenarios whose collaborators never refuse anything.
pub struct NoEngineErrors;

impl Invariant for NoEngineErrors {
    fn name(&self) -> &'static str {
        "NoEngineErrors"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for device in &state.devices {
            if let Some(first) = device.errors.first() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "device {}: {} engine error(s), first: {first}",
                        device.id,
                        device.errors.len()
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parley_core::{InstanceKey, WaitingRecord};
    use parley_proto::{
        Dialog, DialogId, Identity, InstanceId, MessageKind, ProtocolId, StateKind,
    };

    use super::*;
    use crate::{
        invariants::{DeviceSnapshot, InstanceSnapshot},
        world::{DeviceId, ShownDialog},
    };

    fn owned() -> Identity {
        Identity::from_bytes([1; 32])
    }

    fn key() -> InstanceKey {
        InstanceKey {
            protocol: ProtocolId(15),
            instance: InstanceId::from_bytes([4; 32]),
            owned: owned(),
        }
    }

    fn instance(terminal: bool) -> InstanceSnapshot {
        InstanceSnapshot { key: key(), state: StateKind(1), revision: 1, terminal }
    }

    fn device() -> DeviceSnapshot {
        DeviceSnapshot::new(DeviceId(0), owned())
    }

    fn waiting() -> WaitingRecord {
        WaitingRecord {
            owned: owned(),
            remote: Identity::from_bytes([2; 32]),
            protocol: key().protocol,
            instance: key().instance,
            pending: MessageKind(8),
        }
    }

    fn dialog() -> ShownDialog {
        ShownDialog {
            protocol: key().protocol,
            instance: key().instance,
            answer: MessageKind(2),
            dialog: Dialog::OneToOneInvitationSent { contact: Identity::from_bytes([2; 32]) },
        }
    }

    #[test]
    fn dangling_record_is_reported() {
        let mut device = device();
        device.waiting.push(waiting());
        let snapshot = SystemSnapshot::from_devices(vec![device.clone()]);
        assert!(NoDanglingWaitingRecords.check(&snapshot).is_err());

        device.instances.push(instance(false));
        let snapshot = SystemSnapshot::from_devices(vec![device]);
        assert!(NoDanglingWaitingRecords.check(&snapshot).is_ok());
    }

    #[test]
    fn terminal_row_is_reported() {
        let mut device = device();
        device.instances.push(instance(true));
        let snapshot = SystemSnapshot::from_devices(vec![device]);
        let violation = NoTerminalRows.check(&snapshot).unwrap_err();
        assert_eq!(violation.invariant, "NoTerminalRows");
    }

    #[test]
    fn dialog_without_instance_is_reported() {
        let mut device = device();
        device.dialogs.insert(DialogId::from_random_bytes([7; 16]), dialog());
        let snapshot = SystemSnapshot::from_devices(vec![device.clone()]);
        assert!(DialogsMatchInstances.check(&snapshot).is_err());

        device.instances.push(instance(false));
        assert!(DialogsMatchInstances.check(&SystemSnapshot::from_devices(vec![device])).is_ok());
    }

    #[test]
    fn engine_errors_are_reported() {
        let mut device = device();
        device.errors.push("step error: boom".to_string());
        assert!(NoEngineErrors.check(&SystemSnapshot::from_devices(vec![device])).is_err());
    }
}

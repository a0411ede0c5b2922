//! Bluetooth UUIDs for the vibration sensor.
//!
//! The sensor exposes a single custom service with three characteristics:
//! a write-only control slot and two notify-only slots (status and data).

use uuid::{Uuid, uuid};

/// Custom vibration-sensor service UUID. Advertisements are filtered on
/// this value during scanning.
pub const SENSOR_SERVICE: Uuid = uuid!("96540000-d6a3-4d5b-8145-e5855fd090a7");

/// Control characteristic (host → sensor, write with response).
pub const CONTROL_CHARACTERISTIC: Uuid = uuid!("96540001-d6a3-4d5b-8145-e5855fd090a7");

/// Status characteristic (sensor → host, notify).
pub const STATUS_CHARACTERISTIC: Uuid = uuid!("96540002-d6a3-4d5b-8145-e5855fd090a7");

/// Data characteristic (sensor → host, notify).
pub const DATA_CHARACTERISTIC: Uuid = uuid!("96540003-d6a3-4d5b-8145-e5855fd090a7");

/// Client Characteristic Configuration descriptor (standard BLE).
pub const CCC_DESCRIPTOR: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// The role a characteristic plays in the sensor protocol.
///
/// Control is write-only; Status and Data are notify-only. Notification
/// subscriptions are established in the order [`Status`](Self::Status),
/// [`Data`](Self::Data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CharacteristicRole {
    /// Configuration writes from the host.
    Control,
    /// Configuration echoes and rate reports from the sensor.
    Status,
    /// Measurement frames from the sensor.
    Data,
}

impl CharacteristicRole {
    /// The well-known UUID backing this role.
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        match self {
            CharacteristicRole::Control => CONTROL_CHARACTERISTIC,
            CharacteristicRole::Status => STATUS_CHARACTERISTIC,
            CharacteristicRole::Data => DATA_CHARACTERISTIC,
        }
    }

    /// Map a characteristic UUID back to its role, if it is one of ours.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        if uuid == CONTROL_CHARACTERISTIC {
            Some(CharacteristicRole::Control)
        } else if uuid == STATUS_CHARACTERISTIC {
            Some(CharacteristicRole::Status)
        } else if uuid == DATA_CHARACTERISTIC {
            Some(CharacteristicRole::Data)
        } else {
            None
        }
    }

    /// Notify-capable roles, in subscription order.
    #[must_use]
    pub const fn notify_roles() -> [Self; 2] {
        [CharacteristicRole::Status, CharacteristicRole::Data]
    }

    /// Whether the sensor pushes notifications on this characteristic.
    #[must_use]
    pub const fn is_notify(self) -> bool {
        matches!(self, CharacteristicRole::Status | CharacteristicRole::Data)
    }
}

impl core::fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CharacteristicRole::Control => write!(f, "control"),
            CharacteristicRole::Status => write!(f, "status"),
            CharacteristicRole::Data => write!(f, "data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_uuid() {
        let expected = "96540000-d6a3-4d5b-8145-e5855fd090a7";
        assert_eq!(SENSOR_SERVICE.to_string(), expected);
    }

    #[test]
    fn test_characteristic_uuids_share_service_base() {
        for role in [
            CharacteristicRole::Control,
            CharacteristicRole::Status,
            CharacteristicRole::Data,
        ] {
            let s = role.uuid().to_string();
            assert!(s.starts_with("9654"), "UUID {} should start with 9654", s);
            assert!(s.ends_with("d6a3-4d5b-8145-e5855fd090a7"));
        }
    }

    #[test]
    fn test_characteristic_uuids_are_distinct() {
        assert_ne!(CONTROL_CHARACTERISTIC, STATUS_CHARACTERISTIC);
        assert_ne!(STATUS_CHARACTERISTIC, DATA_CHARACTERISTIC);
        assert_ne!(CONTROL_CHARACTERISTIC, DATA_CHARACTERISTIC);
    }

    #[test]
    fn test_role_round_trip() {
        for role in [
            CharacteristicRole::Control,
            CharacteristicRole::Status,
            CharacteristicRole::Data,
        ] {
            assert_eq!(CharacteristicRole::from_uuid(role.uuid()), Some(role));
        }
        assert_eq!(CharacteristicRole::from_uuid(CCC_DESCRIPTOR), None);
    }

    #[test]
    fn test_notify_roles_exclude_control() {
        let roles = CharacteristicRole::notify_roles();
        assert_eq!(roles.len(), 2);
        assert!(roles.iter().all(|r| r.is_notify()));
        assert!(!CharacteristicRole::Control.is_notify());
    }
}

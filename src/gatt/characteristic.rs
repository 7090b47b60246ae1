//! Discovered characteristics and their declared properties

use super::{Handle, HandleRange, ShortUuid};
use crate::GattError;
use bt_hci::param::ConnHandle;
use heapless::Vec;

/// Characteristic Properties bit field
///
/// Seven independent capability flags taken from the properties byte of a
/// characteristic declaration. The extended properties bit is not tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharacteristicProperties {
    raw: u8,
}

impl CharacteristicProperties {
    /// Broadcasting of the value permitted
    pub const BROADCAST: u8 = 0x01;
    /// Reading the value permitted
    pub const READ: u8 = 0x02;
    /// Writing the value with Write Command permitted
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    /// Writing the value with Write Request permitted
    pub const WRITE: u8 = 0x08;
    /// Notifications of the value permitted
    pub const NOTIFY: u8 = 0x10;
    /// Indications of the value permitted
    pub const INDICATE: u8 = 0x20;
    /// Writing the value with Signed Write Command permitted
    pub const AUTHENTICATED_SIGNED_WRITE: u8 = 0x40;

    const MASK: u8 = 0x7F;

    /// Create from the raw properties byte
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        Self {
            raw: raw & Self::MASK,
        }
    }

    /// Get raw value
    #[must_use]
    pub const fn raw(&self) -> u8 {
        self.raw
    }

    /// Check if broadcasting is permitted
    #[must_use]
    pub const fn broadcast(&self) -> bool {
        (self.raw & Self::BROADCAST) != 0
    }

    /// Check if reading is permitted
    #[must_use]
    pub const fn read(&self) -> bool {
        (self.raw & Self::READ) != 0
    }

    /// Check if Write Command is permitted
    #[must_use]
    pub const fn write_without_response(&self) -> bool {
        (self.raw & Self::WRITE_WITHOUT_RESPONSE) != 0
    }

    /// Check if Write Request is permitted
    #[must_use]
    pub const fn write(&self) -> bool {
        (self.raw & Self::WRITE) != 0
    }

    /// Check if notifications are permitted
    #[must_use]
    pub const fn notify(&self) -> bool {
        (self.raw & Self::NOTIFY) != 0
    }

    /// Check if indications are permitted
    #[must_use]
    pub const fn indicate(&self) -> bool {
        (self.raw & Self::INDICATE) != 0
    }

    /// Check if Signed Write Command is permitted
    #[must_use]
    pub const fn authenticated_signed_write(&self) -> bool {
        (self.raw & Self::AUTHENTICATED_SIGNED_WRITE) != 0
    }

    /// Get descriptions of all set flags
    #[must_use]
    pub fn descriptions(&self) -> Vec<&'static str, 7> {
        let mut flags = Vec::new();

        if self.broadcast() {
            let _ = flags.push("Broadcast");
        }
        if self.read() {
            let _ = flags.push("Read");
        }
        if self.write_without_response() {
            let _ = flags.push("Write Without Response");
        }
        if self.write() {
            let _ = flags.push("Write");
        }
        if self.notify() {
            let _ = flags.push("Notify");
        }
        if self.indicate() {
            let _ = flags.push("Indicate");
        }
        if self.authenticated_signed_write() {
            let _ = flags.push("Authenticated Signed Write");
        }

        flags
    }
}

impl From<u8> for CharacteristicProperties {
    fn from(raw: u8) -> Self {
        Self::from_raw(raw)
    }
}

/// A characteristic found inside a service's handle range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveredCharacteristic {
    /// Characteristic type
    pub uuid: ShortUuid,
    /// Declared capabilities
    pub properties: CharacteristicProperties,
    /// Handle of the characteristic declaration
    pub declaration_handle: Handle,
    /// Handle of the characteristic value
    pub value_handle: Handle,
}

impl DiscoveredCharacteristic {
    /// Create a new discovered characteristic
    #[must_use]
    pub const fn new(
        uuid: ShortUuid,
        properties: CharacteristicProperties,
        declaration_handle: Handle,
        value_handle: Handle,
    ) -> Self {
        Self {
            uuid,
            properties,
            declaration_handle,
            value_handle,
        }
    }
}

/// One page of characteristic discovery results
#[derive(Debug, Clone, Copy)]
pub struct CharacteristicDiscoveryResponse<'a> {
    /// Connection the response arrived on
    pub conn: ConnHandle,
    /// Characteristics in ascending handle order
    pub characteristics: &'a [DiscoveredCharacteristic],
}

impl<'a> CharacteristicDiscoveryResponse<'a> {
    /// Create a new response
    #[must_use]
    pub const fn new(conn: ConnHandle, characteristics: &'a [DiscoveredCharacteristic]) -> Self {
        Self {
            conn,
            characteristics,
        }
    }

    /// Check the page against the requested handle range
    ///
    /// Each declaration precedes its value, both lie inside `range`, and every
    /// declaration comes after the previous characteristic's value.
    ///
    /// # Errors
    ///
    /// Returns `GattError::InvalidHandleRange` on the first violation.
    pub fn validate(&self, range: HandleRange) -> Result<(), GattError> {
        let mut previous_value: Option<Handle> = None;
        for characteristic in self.characteristics {
            let ordered = previous_value.is_none_or(|value| characteristic.declaration_handle > value);
            if !ordered
                || characteristic.declaration_handle >= characteristic.value_handle
                || !range.contains(characteristic.declaration_handle)
                || !range.contains(characteristic.value_handle)
            {
                return Err(GattError::InvalidHandleRange);
            }
            previous_value = Some(characteristic.value_handle);
        }
        Ok(())
    }
}

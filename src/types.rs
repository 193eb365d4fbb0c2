use serde::Deserialize;

/// Session privilege levels, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PrivilegeLevel {
    /// Callback privilege.
    Callback = 0x01,
    /// User privilege.
    User = 0x02,
    /// Operator privilege.
    Operator = 0x03,
    /// Administrator privilege.
    Administrator = 0x04,
    /// OEM-defined privilege.
    Oem = 0x05,
}

impl PrivilegeLevel {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode the low nibble of a privilege byte. `0` and reserved values yield `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value & 0x0F {
            0x01 => Some(Self::Callback),
            0x02 => Some(Self::User),
            0x03 => Some(Self::Operator),
            0x04 => Some(Self::Administrator),
            0x05 => Some(Self::Oem),
            _ => None,
        }
    }
}

/// IPMI v1.5 session authentication types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AuthType {
    /// No authentication code is carried.
    None = 0x00,
    /// MD2 digest.
    Md2 = 0x01,
    /// MD5 digest.
    Md5 = 0x02,
    /// The password itself is the authentication code.
    Password = 0x04,
    /// OEM proprietary.
    Oem = 0x05,
}

impl AuthType {
    /// Raw wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a session header auth type byte.
    ///
    /// `0x06` (RMCP+) and reserved values yield `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::None),
            0x01 => Some(Self::Md2),
            0x02 => Some(Self::Md5),
            0x04 => Some(Self::Password),
            0x05 => Some(Self::Oem),
            _ => None,
        }
    }

    /// Bit used for this type in the Get Channel Authentication Capabilities mask.
    pub(crate) fn capability_bit(self) -> u8 {
        1 << self.as_u8()
    }
}

/// Chassis control operations (Chassis Control request byte 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChassisControl {
    /// Power down the system.
    PowerDown,
    /// Power up the system.
    PowerUp,
    /// Power cycle the system.
    PowerCycle,
    /// Hard reset the system.
    HardReset,
    /// Pulse diagnostic interrupt.
    PulseDiagnostic,
    /// ACPI soft shutdown.
    AcpiSoft,
}

impl ChassisControl {
    /// Raw control code.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::PowerDown => 0x00,
            Self::PowerUp => 0x01,
            Self::PowerCycle => 0x02,
            Self::HardReset => 0x03,
            Self::PulseDiagnostic => 0x04,
            Self::AcpiSoft => 0x05,
        }
    }

    /// Decode a control code. Reserved codes, including any with high bits set, yield `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::PowerDown),
            0x01 => Some(Self::PowerUp),
            0x02 => Some(Self::PowerCycle),
            0x03 => Some(Self::HardReset),
            0x04 => Some(Self::PulseDiagnostic),
            0x05 => Some(Self::AcpiSoft),
            _ => None,
        }
    }
}

/// Current power state bits (Get Chassis Status byte 1).
pub mod power_state {
    /// System power is on.
    pub const POWER_ON: u8 = 0x01;
    /// Power overload.
    pub const POWER_OVERLOAD: u8 = 0x02;
    /// Power interlock active.
    pub const INTERLOCK: u8 = 0x04;
    /// Main power subsystem fault.
    pub const POWER_FAULT: u8 = 0x08;
    /// Power control fault: the controller could not drive or read the power state.
    pub const POWER_CONTROL_FAULT: u8 = 0x10;
}

/// Response body of `Get Chassis Status`.
///
/// Each byte is an independent bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChassisStatus {
    /// Current power state, see [`power_state`].
    pub current_power_state: u8,
    /// Last power event. Always zero: targets do not report why power changed.
    pub last_power_event: u8,
    /// Miscellaneous chassis state.
    pub misc_chassis_state: u8,
    /// Front panel button capabilities.
    pub front_panel_button_capabilities: u8,
}

impl ChassisStatus {
    /// Status of a target with the given running state and nothing else to report.
    pub fn from_running(running: bool) -> Self {
        let mut status = Self::default();
        if running {
            status.current_power_state |= power_state::POWER_ON;
        }
        status
    }

    /// Whether bit 0 of the current power state is set.
    pub fn is_power_on(&self) -> bool {
        self.current_power_state & power_state::POWER_ON != 0
    }

    /// Wire form, in field order.
    pub fn to_bytes(self) -> [u8; 4] {
        [
            self.current_power_state,
            self.last_power_event,
            self.misc_chassis_state,
            self.front_panel_button_capabilities,
        ]
    }

    /// Parse the wire form. At least four bytes are required.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [a, b, c, d, ..] => Some(Self {
                current_power_state: *a,
                last_power_event: *b,
                misc_chassis_state: *c,
                front_panel_button_capabilities: *d,
            }),
            _ => None,
        }
    }
}

/// Boot device selector from the boot flags parameter of `Set System Boot Options`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDevice {
    /// Keep the target's own boot order.
    NoOverride,
    /// Network (PXE).
    Pxe,
    /// Default hard drive.
    Disk,
    /// Default hard drive, safe mode.
    DiskSafeMode,
    /// Diagnostic partition.
    Diagnostic,
    /// CD/DVD.
    Cdrom,
    /// BIOS setup.
    BiosSetup,
    /// Floppy or primary removable media.
    Floppy,
    /// Any other selector value.
    Other(u8),
}

impl BootDevice {
    /// Decode the 4-bit device selector (bits 5:2 of boot flags byte 2, already shifted).
    pub fn from_selector(selector: u8) -> Self {
        match selector & 0x0F {
            0x00 => Self::NoOverride,
            0x01 => Self::Pxe,
            0x02 => Self::Disk,
            0x03 => Self::DiskSafeMode,
            0x04 => Self::Diagnostic,
            0x05 => Self::Cdrom,
            0x06 => Self::BiosSetup,
            0x0F => Self::Floppy,
            other => Self::Other(other),
        }
    }
}

/// Identity reported by `Get Device ID`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceIdentity {
    /// Device ID (BMC-defined).
    pub device_id: u8,
    /// Device revision (low 4 bits).
    pub device_revision: u8,
    /// Firmware major revision (7 bits).
    pub firmware_major: u8,
    /// Firmware minor revision (BCD).
    pub firmware_minor: u8,
    /// IANA manufacturer ID (20 bits).
    pub manufacturer_id: u32,
    /// Product ID.
    pub product_id: u16,
    /// Auxiliary firmware revision.
    pub aux_firmware_revision: [u8; 4],
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            device_id: 0x20,
            device_revision: 0x01,
            firmware_major: 0x01,
            firmware_minor: 0x00,
            manufacturer_id: 0,
            product_id: 0,
            aux_firmware_revision: [0; 4],
        }
    }
}

impl DeviceIdentity {
    /// IPMI version field: 1.5, BCD with the minor digit in the high nibble.
    pub const IPMI_VERSION: u8 = 0x51;

    /// Additional device support: chassis device.
    pub const ADDITIONAL_SUPPORT: u8 = 0x80;

    /// Response body of `Get Device ID` (after the completion code).
    pub fn to_bytes(&self) -> [u8; 15] {
        let m = self.manufacturer_id.to_le_bytes();
        let p = self.product_id.to_le_bytes();
        let aux = self.aux_firmware_revision;
        [
            self.device_id,
            self.device_revision & 0x0F,
            self.firmware_major & 0x7F,
            self.firmware_minor,
            Self::IPMI_VERSION,
            Self::ADDITIONAL_SUPPORT,
            m[0],
            m[1],
            m[2] & 0x0F,
            p[0],
            p[1],
            aux[0],
            aux[1],
            aux[2],
            aux[3],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chassis_status_from_running_only_sets_power_bit() {
        assert_eq!(ChassisStatus::from_running(true).to_bytes(), [0x01, 0, 0, 0]);
        assert_eq!(ChassisStatus::from_running(false).to_bytes(), [0, 0, 0, 0]);
        assert!(ChassisStatus::from_running(true).is_power_on());
        let parsed = ChassisStatus::from_bytes(&[0x11, 0, 0, 0, 0xAA]).expect("status");
        assert!(parsed.is_power_on());
        assert_eq!(parsed.current_power_state & power_state::POWER_CONTROL_FAULT, 0x10);
        assert_eq!(ChassisStatus::from_bytes(&[0x01, 0]), None);
    }

    #[test]
    fn chassis_control_codes() {
        for code in 0x00..=0x05 {
            let control = ChassisControl::from_u8(code).expect("known code");
            assert_eq!(control.as_u8(), code);
        }
        for reserved in [0x06, 0x0F, 0x10, 0x11, 0x13, 0xF5] {
            assert_eq!(ChassisControl::from_u8(reserved), None, "code {reserved:#04x}");
        }
    }

    #[test]
    fn privilege_ordering_follows_wire_values() {
        assert!(PrivilegeLevel::Administrator > PrivilegeLevel::Operator);
        assert!(PrivilegeLevel::User > PrivilegeLevel::Callback);
        assert_eq!(PrivilegeLevel::from_u8(0x00), None);
        assert_eq!(PrivilegeLevel::from_u8(0x14), Some(PrivilegeLevel::Administrator));
    }

    #[test]
    fn auth_type_rejects_rmcp_plus() {
        assert_eq!(AuthType::from_u8(0x06), None);
        assert_eq!(AuthType::from_u8(0x02), Some(AuthType::Md5));
        assert_eq!(AuthType::Password.capability_bit(), 0x10);
    }

    #[test]
    fn device_identity_layout() {
        let identity = DeviceIdentity {
            device_id: 0x20,
            device_revision: 0x81,
            firmware_major: 0x82,
            firmware_minor: 0x43,
            manufacturer_id: 0x0002A2,
            product_id: 0x0100,
            aux_firmware_revision: [0x00, 0x06, 0x2B, 0x2B],
        };
        assert_eq!(
            identity.to_bytes(),
            [
                0x20, 0x01, 0x02, 0x43, 0x51, 0x80, 0xA2, 0x02, 0x00, 0x00, 0x01, 0x00, 0x06,
                0x2B, 0x2B,
            ]
        );
    }

    #[test]
    fn boot_device_selectors() {
        assert_eq!(BootDevice::from_selector(0x01), BootDevice::Pxe);
        assert_eq!(BootDevice::from_selector(0x05), BootDevice::Cdrom);
        assert_eq!(BootDevice::from_selector(0x0B), BootDevice::Other(0x0B));
    }
}

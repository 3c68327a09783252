//! Connection modes, device roles and the role → device-name bindings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::config::DevicesConfig;

/// Which physical transport path is active for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionMode {
    /// Everything goes to the Bluetooth-bridged virtual port.
    #[default]
    Bluetooth,
    /// Both USB controllers attached; channel 1 reaches its device directly and a relay
    /// forwards CH2 → CH1 traffic.
    UsbDirect,
    /// CH2 controller attached over USB; CH1 traffic goes direct when possible,
    /// otherwise it is rerouted through CH2.
    Hybrid,
    /// A manually chosen device is the only sink.
    Custom,
}

impl ConnectionMode {
    pub const ALL: [ConnectionMode; 4] = [
        ConnectionMode::Bluetooth,
        ConnectionMode::UsbDirect,
        ConnectionMode::Hybrid,
        ConnectionMode::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::Bluetooth => "BLUETOOTH",
            ConnectionMode::UsbDirect => "USB_DIRECT",
            ConnectionMode::Hybrid => "HYBRID",
            ConnectionMode::Custom => "CUSTOM",
        }
    }

    /// Whether this mode runs over the USB controllers (and can therefore fail over).
    pub fn is_usb(&self) -> bool {
        matches!(self, ConnectionMode::UsbDirect | ConnectionMode::Hybrid)
    }

    /// Whether this mode bridges CH2 → CH1 through the external relay.
    pub fn needs_relay(&self) -> bool {
        matches!(self, ConnectionMode::UsbDirect)
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bluetooth" | "bt" => Ok(ConnectionMode::Bluetooth),
            "usb_direct" | "usb-direct" | "usb" | "direct" => Ok(ConnectionMode::UsbDirect),
            "hybrid" => Ok(ConnectionMode::Hybrid),
            "custom" => Ok(ConnectionMode::Custom),
            other => Err(format!("unknown connection mode '{}'", other)),
        }
    }
}

/// Logical device slot that a command is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceRole {
    Bluetooth,
    Channel1,
    Channel2,
}

/// Role → physical device name, fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleBindings {
    bluetooth: String,
    channel1: String,
    channel2: String,
}

impl RoleBindings {
    pub fn new(
        bluetooth: impl Into<String>,
        channel1: impl Into<String>,
        channel2: impl Into<String>,
    ) -> Self {
        Self {
            bluetooth: bluetooth.into(),
            channel1: channel1.into(),
            channel2: channel2.into(),
        }
    }

    /// Build the bindings for one run.
    ///
    /// In CUSTOM mode the chosen device takes the Bluetooth slot, since that slot is the
    /// sole sink in both modes.
    pub fn for_run(
        devices: &DevicesConfig,
        mode: ConnectionMode,
        custom_device: Option<&str>,
    ) -> Self {
        let bluetooth = match (mode, custom_device) {
            (ConnectionMode::Custom, Some(device)) if !device.is_empty() => device.to_string(),
            _ => devices.bluetooth.clone(),
        };
        Self::new(bluetooth, devices.channel1.clone(), devices.channel2.clone())
    }

    pub fn device(&self, role: DeviceRole) -> &str {
        match role {
            DeviceRole::Bluetooth => &self.bluetooth,
            DeviceRole::Channel1 => &self.channel1,
            DeviceRole::Channel2 => &self.channel2,
        }
    }

    /// Devices that must all be present for `mode` to keep running.
    ///
    /// Empty for modes that never fail over.
    pub fn required_for(&self, mode: ConnectionMode) -> BTreeSet<&str> {
        match mode {
            ConnectionMode::UsbDirect => [self.channel1.as_str(), self.channel2.as_str()]
                .into_iter()
                .collect(),
            ConnectionMode::Hybrid => [self.channel2.as_str()].into_iter().collect(),
            ConnectionMode::Bluetooth | ConnectionMode::Custom => BTreeSet::new(),
        }
    }

    /// Devices watched while in BLUETOOTH mode before offering a return to USB.
    pub fn failback_candidates(&self) -> BTreeSet<&str> {
        [self.channel1.as_str(), self.channel2.as_str()]
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> RoleBindings {
        RoleBindings::new("loopMIDI Port", "Quad Cortex", "MC8 Pro")
    }

    #[test]
    fn test_mode_parse_aliases() {
        assert_eq!("bt".parse::<ConnectionMode>(), Ok(ConnectionMode::Bluetooth));
        assert_eq!("USB_DIRECT".parse::<ConnectionMode>(), Ok(ConnectionMode::UsbDirect));
        assert_eq!(" Hybrid ".parse::<ConnectionMode>(), Ok(ConnectionMode::Hybrid));
        assert!("serial".parse::<ConnectionMode>().is_err());
    }

    #[test]
    fn test_mode_serde_names() {
        let json = serde_json::to_string(&ConnectionMode::UsbDirect).unwrap();
        assert_eq!(json, "\"USB_DIRECT\"");
        let mode: ConnectionMode = serde_json::from_str("\"HYBRID\"").unwrap();
        assert_eq!(mode, ConnectionMode::Hybrid);
    }

    #[test]
    fn test_required_sets() {
        let b = bindings();
        assert_eq!(b.required_for(ConnectionMode::UsbDirect).len(), 2);
        assert!(b.required_for(ConnectionMode::Hybrid).contains("MC8 Pro"));
        assert!(!b.required_for(ConnectionMode::Hybrid).contains("Quad Cortex"));
        assert!(b.required_for(ConnectionMode::Bluetooth).is_empty());
        assert!(b.required_for(ConnectionMode::Custom).is_empty());
    }

    #[test]
    fn test_custom_device_takes_bluetooth_slot() {
        let devices = DevicesConfig {
            bluetooth: "loopMIDI Port".into(),
            channel1: "Quad Cortex".into(),
            channel2: "MC8 Pro".into(),
        };

        let custom = RoleBindings::for_run(&devices, ConnectionMode::Custom, Some("IAC Bus 2"));
        assert_eq!(custom.device(DeviceRole::Bluetooth), "IAC Bus 2");

        // Only CUSTOM honours the stored device
        let bt = RoleBindings::for_run(&devices, ConnectionMode::Bluetooth, Some("IAC Bus 2"));
        assert_eq!(bt.device(DeviceRole::Bluetooth), "loopMIDI Port");
    }
}

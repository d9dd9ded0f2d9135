//! Device descriptor types.

use std::fmt;
use std::path::{Path, PathBuf};

/// A USB serial-capable device reported by the host backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbDevice {
    /// Opaque platform identifier (device node or bus path).
    pub name: String,
    /// USB vendor ID.
    pub vendor_id: u16,
    /// USB product ID.
    pub product_id: u16,
}

impl UsbDevice {
    /// Creates a new USB device descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            name: name.into(),
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for UsbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:04x}:{:04x})",
            self.name, self.vendor_id, self.product_id
        )
    }
}

/// An addressable candidate device, before connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceDescriptor {
    /// USB serial adapter; requires an access grant before opening.
    Usb(UsbDevice),
    /// UART character device, opened directly by path.
    Uart {
        /// Filesystem path of the character device.
        path: PathBuf,
    },
}

impl DeviceDescriptor {
    /// Creates a UART descriptor.
    #[must_use]
    pub fn uart(path: impl Into<PathBuf>) -> Self {
        Self::Uart { path: path.into() }
    }

    /// Returns the transport this device is reached through.
    #[must_use]
    pub const fn kind(&self) -> super::TransportKind {
        match self {
            Self::Usb(_) => super::TransportKind::Usb,
            Self::Uart { .. } => super::TransportKind::Uart,
        }
    }

    /// Returns the identifier unique within one enumeration snapshot.
    #[must_use]
    pub fn identifier(&self) -> String {
        match self {
            Self::Usb(device) => device.name.clone(),
            Self::Uart { path } => path.display().to_string(),
        }
    }

    /// Returns the UART path, if this is a UART descriptor.
    #[must_use]
    pub fn uart_path(&self) -> Option<&Path> {
        match self {
            Self::Uart { path } => Some(path),
            Self::Usb(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransportKind;

    #[test]
    fn test_descriptor_identity() {
        let usb = DeviceDescriptor::Usb(UsbDevice::new("/dev/bus/usb/001/004", 0x0403, 0x6001));
        assert_eq!(usb.kind(), TransportKind::Usb);
        assert_eq!(usb.identifier(), "/dev/bus/usb/001/004");
        assert!(usb.uart_path().is_none());

        let uart = DeviceDescriptor::uart("/dev/ttyS1");
        assert_eq!(uart.kind(), TransportKind::Uart);
        assert_eq!(uart.identifier(), "/dev/ttyS1");
        assert_eq!(uart.uart_path(), Some(Path::new("/dev/ttyS1")));
    }

    #[test]
    fn test_usb_display() {
        let device = UsbDevice::new("ttyACM0", 0x2341, 0x43);
        assert_eq!(device.to_string(), "ttyACM0 (2341:0043)");
    }
}

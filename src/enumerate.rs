//! Device enumeration.
//!
//! USB devices come from the host backend, in the order it discovers them.
//! UART devices are the entries of a device directory whose names contain
//! one of the configured patterns, sorted by path. Neither source can fail
//! the listing: an error on one side just yields no devices for it.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::transport::UsbHost;
use crate::types::{DeviceDescriptor, UsbDevice};

/// Lists candidate devices across both transports.
pub struct DeviceEnumerator {
    usb: Arc<dyn UsbHost>,
    device_dir: PathBuf,
    patterns: Vec<String>,
}

impl DeviceEnumerator {
    /// Creates an enumerator over `usb` and the UART devices in `device_dir`.
    #[must_use]
    pub fn new(usb: Arc<dyn UsbHost>, device_dir: impl Into<PathBuf>, patterns: &[String]) -> Self {
        Self {
            usb,
            device_dir: device_dir.into(),
            patterns: patterns.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Returns USB devices first, then UART devices sorted by path.
    ///
    /// No identifier appears twice: a UART path equal to a USB device name
    /// is reported only as USB.
    #[must_use]
    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        let usb = self.usb_devices();
        let taken: HashSet<PathBuf> = usb.iter().map(|d| PathBuf::from(&d.name)).collect();

        let mut devices: Vec<DeviceDescriptor> =
            usb.into_iter().map(DeviceDescriptor::Usb).collect();
        devices.extend(
            self.uart_paths()
                .into_iter()
                .filter(|path| !taken.contains(path))
                .map(DeviceDescriptor::uart),
        );

        tracing::debug!("found {} device(s)", devices.len());
        devices
    }

    /// Resolves a USB device name against a fresh snapshot.
    #[must_use]
    pub fn find_usb(&self, name: &str) -> Option<UsbDevice> {
        self.usb_devices().into_iter().find(|d| d.name == name)
    }

    fn usb_devices(&self) -> Vec<UsbDevice> {
        let devices = match self.usb.devices() {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!("USB enumeration failed: {}", e);
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        devices
            .into_iter()
            .filter(|d| seen.insert(d.name.clone()))
            .collect()
    }

    fn uart_paths(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.device_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("cannot read {}: {}", self.device_dir.display(), e);
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| {
                entry.file_name().to_str().is_some_and(|name| {
                    let name = name.to_lowercase();
                    self.patterns.iter().any(|p| name.contains(p.as_str()))
                })
            })
            .map(|entry| entry.path())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::error::{Error, Result};
    use crate::transport::{BoxedStream, LoopbackUsbHost, PermissionReply};
    use crate::types::{SerialFraming, TransportKind};
    use futures::future::BoxFuture;

    fn patterns() -> Vec<String> {
        vec!["ttyS".into(), "ttyUSB".into()]
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    struct BrokenHost;

    impl UsbHost for BrokenHost {
        fn devices(&self) -> Result<Vec<UsbDevice>> {
            Err(Error::Io(std::io::Error::other("usb subsystem unavailable")))
        }

        fn has_permission(&self, _device: &UsbDevice) -> bool {
            false
        }

        fn request_permission(&self, _device: &UsbDevice, _reply: PermissionReply) -> Result<()> {
            Ok(())
        }

        fn open(&self, _device: &UsbDevice, _framing: SerialFraming) -> BoxFuture<'_, Result<BoxedStream>> {
            Box::pin(async { Err(Error::NoActiveConnection) })
        }
    }

    #[test]
    fn test_empty_everything() {
        let dir = tempfile::tempdir().unwrap();
        let enumerator = DeviceEnumerator::new(Arc::new(LoopbackUsbHost::new()), dir.path(), &patterns());
        assert!(enumerator.list_devices().is_empty());
    }

    #[test]
    fn test_missing_directory_and_broken_usb() {
        let enumerator = DeviceEnumerator::new(
            Arc::new(BrokenHost),
            "/nonexistent/device/dir",
            &patterns(),
        );
        assert!(enumerator.list_devices().is_empty());
        assert!(enumerator.find_usb("anything").is_none());
    }

    #[test]
    fn test_usb_first_then_sorted_uart() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ttyS3", "ttyUSB0", "ttys5", "null", "ttyACM0", "ttyS1"] {
            touch(dir.path(), name);
        }

        let host = LoopbackUsbHost::new();
        host.attach(UsbDevice::new("usb-b", 0x10c4, 0xea60));
        host.attach(UsbDevice::new("usb-a", 0x0403, 0x6001));

        let enumerator = DeviceEnumerator::new(Arc::new(host), dir.path(), &patterns());
        let devices = enumerator.list_devices();

        let ids: Vec<String> = devices.iter().map(DeviceDescriptor::identifier).collect();
        let expected: Vec<String> = ["ttyS1", "ttyS3", "ttyUSB0", "ttys5"]
            .iter()
            .map(|n| dir.path().join(n).display().to_string())
            .collect();

        assert_eq!(&ids[..2], &["usb-b".to_string(), "usb-a".to_string()]);
        assert_eq!(&ids[2..], &expected[..]);
        assert!(devices[..2].iter().all(|d| d.kind() == TransportKind::Usb));
        assert!(devices[2..].iter().all(|d| d.kind() == TransportKind::Uart));
    }

    #[test]
    fn test_no_aliasing() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "ttyUSB0");
        touch(dir.path(), "ttyS0");
        let usb_path = dir.path().join("ttyUSB0").display().to_string();

        let host = LoopbackUsbHost::new();
        host.attach(UsbDevice::new(usb_path.clone(), 0x0403, 0x6001));
        host.attach(UsbDevice::new(usb_path.clone(), 0x0403, 0x6001));

        let enumerator = DeviceEnumerator::new(Arc::new(host), dir.path(), &patterns());
        let devices = enumerator.list_devices();

        let mut keys: Vec<(TransportKind, String)> =
            devices.iter().map(|d| (d.kind(), d.identifier())).collect();
        let before = keys.len();
        keys.sort_by(|a, b| a.1.cmp(&b.1));
        keys.dedup_by(|a, b| a.1 == b.1);

        assert_eq!(before, 2);
        assert_eq!(keys.len(), 2);
        assert_eq!(devices[0], DeviceDescriptor::Usb(UsbDevice::new(usb_path, 0x0403, 0x6001)));
    }

    #[test]
    fn test_find_usb() {
        let host = LoopbackUsbHost::new();
        host.attach(UsbDevice::new("usb0", 1, 2));
        let enumerator = DeviceEnumerator::new(Arc::new(host), "/nonexistent", &patterns());

        assert_eq!(enumerator.find_usb("usb0"), Some(UsbDevice::new("usb0", 1, 2)));
        assert_eq!(enumerator.find_usb("usb1"), None);
    }
}

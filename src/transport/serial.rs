//! System transports backed by `tokio-serial`.
//!
//! [`SystemUsbHost`] lists USB serial adapters through the serial port
//! enumeration of the OS, and [`SystemUart`] opens character devices by path.
//! Desktop platforms have no interactive USB access prompt: access is
//! decided by device node permissions, so a prompt re-checks the node and
//! resolves immediately. The check never opens the node: opening a tty can
//! toggle modem lines and reset the attached board.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tokio_serial::{SerialPortBuilderExt, SerialPortType};

use crate::error::{Error, Result};
use crate::transport::{BoxedStream, PermissionReply, UartOpener, UsbHost};
use crate::types::{SerialFraming, UsbDevice};

/// Returns false only if the node denies read or write access to this
/// process. Other failures are left for the real open to report.
#[cfg(unix)]
fn has_access(path: &Path) -> bool {
    use rustix::fs::{Access, access};
    use rustix::io::Errno;

    match access(path, Access::READ_OK | Access::WRITE_OK) {
        Ok(()) => true,
        Err(e) if e == Errno::ACCESS || e == Errno::PERM || e == Errno::ROFS => false,
        Err(e) => {
            tracing::trace!("access check for {} failed: {}", path.display(), e);
            true
        }
    }
}

#[cfg(not(unix))]
fn has_access(_path: &Path) -> bool {
    true
}

/// USB host backed by the OS serial port list.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUsbHost;

impl SystemUsbHost {
    /// Creates a new system USB host.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl UsbHost for SystemUsbHost {
    fn devices(&self) -> Result<Vec<UsbDevice>> {
        let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
        Ok(ports
            .into_iter()
            .filter_map(|port| match port.port_type {
                SerialPortType::UsbPort(usb) => {
                    Some(UsbDevice::new(port.port_name, usb.vid, usb.pid))
                }
                _ => None,
            })
            .collect())
    }

    fn has_permission(&self, device: &UsbDevice) -> bool {
        has_access(Path::new(&device.name))
    }

    fn request_permission(&self, device: &UsbDevice, reply: PermissionReply) -> Result<()> {
        let granted = has_access(Path::new(&device.name));
        tracing::debug!(
            "access prompt for {} resolved from node permissions: {}",
            device.name,
            granted
        );
        reply.resolve(granted);
        Ok(())
    }

    fn open(&self, device: &UsbDevice, framing: SerialFraming) -> BoxFuture<'_, Result<BoxedStream>> {
        let builder = tokio_serial::new(device.name.clone(), framing.baud_rate)
            .data_bits(framing.data_bits.into())
            .stop_bits(framing.stop_bits.into())
            .parity(framing.parity.into());
        let name = device.name.clone();

        Box::pin(async move {
            tracing::info!("opening USB serial port: {} @ {}", name, framing.baud_rate);
            let stream = builder.open_native_async().map_err(Error::Serial)?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

/// UART opener backed by `tokio-serial`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUart;

impl SystemUart {
    /// Creates a new system UART opener.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl UartOpener for SystemUart {
    fn open(&self, path: &Path, baud_rate: u32) -> BoxFuture<'_, Result<BoxedStream>> {
        let path: PathBuf = path.to_path_buf();

        Box::pin(async move {
            tracing::info!("opening UART: {} @ {}", path.display(), baud_rate);
            let stream = tokio_serial::new(path.to_string_lossy(), baud_rate)
                .open_native_async()
                .map_err(Error::Serial)?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

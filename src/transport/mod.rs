//! Transport layer for serial communication.
//!
//! This module provides the abstraction over the two platform backends the
//! bridge talks to: a USB host, which enumerates devices, owns access grants
//! and opens ports, and a UART opener, which opens character devices by path.
//! Both hand back a [`BoxedStream`] that the connection manager splits into a
//! read half for the relay and a write half for [`send`](crate::ConnectionManager::send).

pub mod loopback;
pub mod serial;

use std::path::Path;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::permission::PermissionEvent;
use crate::types::{SerialFraming, UsbDevice};

/// A bidirectional byte stream to an open device.
pub trait SerialIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SerialIo for T {}

/// An open transport handle.
pub type BoxedStream = Box<dyn SerialIo>;

/// One-shot handle through which a host delivers the outcome of a
/// permission prompt.
///
/// Consuming `self` on [`resolve`](Self::resolve) means each prompt answers
/// at most once. Dropping the reply without resolving leaves the request
/// pending.
#[derive(Debug)]
pub struct PermissionReply {
    device: String,
    tx: mpsc::UnboundedSender<PermissionEvent>,
}

impl PermissionReply {
    pub(crate) const fn new(device: String, tx: mpsc::UnboundedSender<PermissionEvent>) -> Self {
        Self { device, tx }
    }

    /// Returns the device the prompt was issued for.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Delivers the grant or denial.
    pub fn resolve(self, granted: bool) {
        let event = PermissionEvent {
            device: self.device,
            granted,
        };
        if self.tx.send(event).is_err() {
            tracing::debug!("permission result dropped, manager is gone");
        }
    }
}

/// Platform USB backend.
pub trait UsbHost: Send + Sync {
    /// Lists serial-capable USB devices in discovery order.
    fn devices(&self) -> Result<Vec<UsbDevice>>;

    /// Returns true if the platform already granted access to the device.
    fn has_permission(&self, device: &UsbDevice) -> bool;

    /// Issues an access prompt. The result arrives later through `reply`.
    fn request_permission(&self, device: &UsbDevice, reply: PermissionReply) -> Result<()>;

    /// Opens the device's first serial port with the given framing.
    fn open(&self, device: &UsbDevice, framing: SerialFraming) -> BoxFuture<'_, Result<BoxedStream>>;
}

/// Platform UART backend.
pub trait UartOpener: Send + Sync {
    /// Opens the character device at `path`; framing is the driver default.
    fn open(&self, path: &Path, baud_rate: u32) -> BoxFuture<'_, Result<BoxedStream>>;
}

pub use loopback::{LoopbackDevice, LoopbackUart, LoopbackUsbHost};
pub use serial::{SystemUart, SystemUsbHost};

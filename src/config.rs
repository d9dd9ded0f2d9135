//! Bridge configuration.
//!
//! [`BridgeConfig`] is built with chained setters, or loaded from a JSON
//! file where every field is optional and falls back to its default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{DEFAULT_BAUD_RATE, TransportKind};

/// Default directory scanned for UART character devices.
pub const DEFAULT_DEVICE_DIR: &str = "/dev";

/// Default UART port for `connectLoRa` calls without a path.
pub const DEFAULT_UART_PATH: &str = "/dev/ttyS1";

/// Default bound on a USB write.
pub const DEFAULT_USB_WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default relay read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

fn default_uart_patterns() -> Vec<String> {
    vec!["ttyS".into(), "ttyUSB".into()]
}

/// Configuration for the connection manager and enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Directory scanned for UART character devices.
    pub device_dir: PathBuf,
    /// File name fragments identifying UART devices (matched case-insensitively).
    pub uart_patterns: Vec<String>,
    /// Baud rate for USB connections when the caller gives none.
    pub usb_baud_rate: u32,
    /// UART path when the caller gives none.
    pub uart_path: PathBuf,
    /// UART baud rate when the caller gives none.
    pub uart_baud_rate: u32,
    /// Bound on a USB write, in milliseconds. `None` waits indefinitely.
    pub usb_write_timeout_ms: Option<u64>,
    /// Bound on a UART write, in milliseconds. `None` waits indefinitely.
    pub uart_write_timeout_ms: Option<u64>,
    /// Relay read buffer size in bytes.
    pub read_buffer_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device_dir: PathBuf::from(DEFAULT_DEVICE_DIR),
            uart_patterns: default_uart_patterns(),
            usb_baud_rate: DEFAULT_BAUD_RATE,
            uart_path: PathBuf::from(DEFAULT_UART_PATH),
            uart_baud_rate: DEFAULT_BAUD_RATE,
            usb_write_timeout_ms: Some(
                u64::try_from(DEFAULT_USB_WRITE_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            ),
            uart_write_timeout_ms: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl BridgeConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        tracing::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Checks values that would make the bridge unusable.
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(Error::Config("readBufferSize must be non-zero".into()));
        }
        if self.usb_baud_rate == 0 {
            return Err(Error::Config("usbBaudRate must be non-zero".into()));
        }
        Ok(())
    }

    /// Sets the device directory.
    #[must_use]
    pub fn device_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.device_dir = dir.into();
        self
    }

    /// Sets the UART name patterns.
    #[must_use]
    pub fn uart_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uart_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the default USB baud rate.
    #[must_use]
    pub const fn usb_baud_rate(mut self, rate: u32) -> Self {
        self.usb_baud_rate = rate;
        self
    }

    /// Sets the write timeout for a transport. `None` disables the bound.
    #[must_use]
    pub fn write_timeout(mut self, kind: TransportKind, timeout: Option<Duration>) -> Self {
        let millis = timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        match kind {
            TransportKind::Usb => self.usb_write_timeout_ms = millis,
            TransportKind::Uart => self.uart_write_timeout_ms = millis,
        }
        self
    }

    /// Sets the relay read buffer size.
    #[must_use]
    pub const fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Returns the write bound for a transport.
    #[must_use]
    pub fn write_timeout_for(&self, kind: TransportKind) -> Option<Duration> {
        match kind {
            TransportKind::Usb => self.usb_write_timeout_ms,
            TransportKind::Uart => self.uart_write_timeout_ms,
        }
        .map(Duration::from_millis)
    }
}

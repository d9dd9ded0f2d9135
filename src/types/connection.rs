//! Connection and framing types.

use std::fmt;

/// Default baud rate for both transports.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Baud rates a UART connection can be opened at.
pub const SUPPORTED_UART_BAUD_RATES: [u32; 5] = [9600, 19_200, 38_400, 57_600, 115_200];

/// Maps a requested UART baud rate onto the supported set.
///
/// Rates outside [`SUPPORTED_UART_BAUD_RATES`] fall back to
/// [`DEFAULT_BAUD_RATE`].
#[must_use]
pub fn uart_baud_rate(requested: u32) -> u32 {
    if SUPPORTED_UART_BAUD_RATES.contains(&requested) {
        requested
    } else {
        DEFAULT_BAUD_RATE
    }
}

/// The kind of transport a connection runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Permissioned USB serial adapter.
    Usb,
    /// Raw UART character device.
    Uart,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb => f.write_str("USB"),
            Self::Uart => f.write_str("UART"),
        }
    }
}

/// Lifecycle state of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Nothing open.
    #[default]
    Closed,
    /// Waiting for a USB access grant.
    Opening,
    /// A transport is open and its relay is running.
    Open,
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => Self::Five,
            DataBits::Six => Self::Six,
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

/// Line settings for a USB serial port.
///
/// The default is 9600 baud, 8 data bits, 1 stop bit, no parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialFraming {
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits.
    pub data_bits: DataBits,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Parity.
    pub parity: Parity,
}

impl SerialFraming {
    /// 8N1 framing at the given baud rate.
    #[must_use]
    pub fn with_baud(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }
}

impl Default for SerialFraming {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::default(),
            stop_bits: StopBits::default(),
            parity: Parity::default(),
        }
    }
}

/// Description of an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Transport kind.
    pub kind: TransportKind,
    /// Device name (USB) or path (UART).
    pub device: String,
    /// Effective baud rate.
    pub baud_rate: u32,
    /// Byte framing; `None` for UART, which uses the driver default.
    pub framing: Option<SerialFraming>,
}

/// Result of a successful [`send`](crate::ConnectionManager::send).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// Transport the bytes went out on.
    pub transport: TransportKind,
    /// Number of bytes written.
    pub bytes_written: usize,
}

//! Data types shared across the bridge.
//!
//! This module contains the core data structures used throughout the library:
//! - Device descriptors produced by enumeration
//! - Connection descriptions, states and line framing

pub mod connection;
pub mod device;

pub use connection::{
    ConnectionInfo, ConnectionState, DEFAULT_BAUD_RATE, DataBits, Parity,
    SUPPORTED_UART_BAUD_RATES, SendReceipt, SerialFraming, StopBits, TransportKind,
    uart_baud_rate,
};
pub use device::{DeviceDescriptor, UsbDevice};

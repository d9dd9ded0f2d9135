//! # serial-bridge
//!
//! Dual-transport serial connection manager with a push event stream.
//!
//! The bridge keeps at most one open connection, either to a permissioned
//! USB serial adapter or to a raw UART character device (typically a LoRa
//! radio), and forwards everything the device sends as text events.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Device enumeration across both transports
//! - USB access prompts that complete the connect when granted
//! - Single-subscriber event stream for data, errors and disconnects
//!
//! ## Quick Start
//!
//! ```no_run
//! use serial_bridge::{BridgeConfig, ConnectionManager, Event};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), serial_bridge::Error> {
//!     let manager = ConnectionManager::system(BridgeConfig::default());
//!     let mut events = manager.subscribe();
//!
//!     for device in manager.list_devices() {
//!         println!("found {}", device.identifier());
//!     }
//!
//!     manager.connect_uart("/dev/ttyS1", 115_200).await?;
//!     manager.send(b"AT\r\n").await?;
//!
//!     if let Some(Event::Data(text)) = events.recv().await {
//!         println!("received: {text}");
//!     }
//!
//!     manager.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`types`] - Device descriptors, connection info and framing
//! - [`transport`] - USB host and UART backends (system and loopback)
//! - [`enumerate`] - Device discovery
//! - [`permission`] - USB access negotiation
//! - [`manager`] - The [`ConnectionManager`] session
//! - [`relay`] - Inbound read loop
//! - [`event`] - Event sink and subscription
//! - [`bridge`] - Method-call front end and status text

pub mod bridge;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod event;
pub mod logging;
pub mod manager;
pub mod permission;
pub mod relay;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use bridge::{Bridge, MethodCall, Reply};
pub use config::BridgeConfig;
pub use enumerate::DeviceEnumerator;
pub use error::{Error, Result};
pub use event::{Event, EventSink, Subscription};
pub use manager::{ConnectOutcome, ConnectionManager};
pub use permission::{PermissionEvent, PermissionNegotiator, PermissionStatus};
pub use transport::{SystemUart, SystemUsbHost, UartOpener, UsbHost};
pub use types::{
    ConnectionInfo, ConnectionState, DeviceDescriptor, SendReceipt, SerialFraming, TransportKind,
    UsbDevice,
};

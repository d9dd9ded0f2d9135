//! Connection manager.
//!
//! The [`ConnectionManager`] owns the single session of the bridge. A session
//! holds at most one open connection, USB or UART; opening a new one always
//! closes the old one first. Every transition happens under one lock on the
//! session, including the two that do not come from the caller: a USB access
//! grant finishing a pending connect, and a relay failing.

use std::path::Path;
use std::sync::{Arc, Weak};

use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::enumerate::DeviceEnumerator;
use crate::error::{Error, Result};
use crate::event::{Event, EventSink, Subscription};
use crate::permission::{PermissionEvent, PermissionNegotiator, PermissionStatus};
use crate::relay;
use crate::transport::{BoxedStream, SystemUart, SystemUsbHost, UartOpener, UsbHost};
use crate::types::{
    ConnectionInfo, ConnectionState, DeviceDescriptor, SendReceipt, SerialFraming, TransportKind,
    UsbDevice, uart_baud_rate,
};

/// Outcome of a USB connect that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The device is open.
    Connected(ConnectionInfo),
    /// An access prompt is outstanding; the connect completes when it is
    /// granted.
    PermissionPending,
}

struct ActiveConnection {
    id: u64,
    info: ConnectionInfo,
    writer: WriteHalf<BoxedStream>,
    relay: JoinHandle<()>,
}

impl ActiveConnection {
    /// Stops the relay and closes the transport.
    ///
    /// Once this returns the relay can deliver no further events.
    async fn close(self) {
        self.relay.abort();
        if let Err(e) = self.relay.await {
            if !e.is_cancelled() {
                tracing::warn!("relay for {} ended abnormally: {}", self.info.device, e);
            }
        }
        Self::shutdown(self.writer, &self.info).await;
    }

    /// Closes the transport from inside the relay task itself.
    async fn release(self) {
        Self::shutdown(self.writer, &self.info).await;
    }

    async fn shutdown(mut writer: WriteHalf<BoxedStream>, info: &ConnectionInfo) {
        if let Err(e) = writer.shutdown().await {
            tracing::warn!("error while closing {}: {}", info.device, e);
        }
    }
}

#[derive(Default)]
struct Session {
    active: Option<ActiveConnection>,
    next_id: u64,
}

impl Session {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn install(&mut self, connection: ActiveConnection) -> ConnectionState {
        debug_assert!(self.active.is_none(), "previous connection not closed");
        self.active = Some(connection);
        ConnectionState::Open
    }

    fn take(&mut self) -> Option<ActiveConnection> {
        self.active.take()
    }

    fn take_if_current(&mut self, id: u64) -> Option<ActiveConnection> {
        if self.active.as_ref().is_some_and(|a| a.id == id) {
            self.active.take()
        } else {
            None
        }
    }
}

struct Inner {
    config: BridgeConfig,
    usb: Arc<dyn UsbHost>,
    uart: Arc<dyn UartOpener>,
    enumerator: DeviceEnumerator,
    negotiator: PermissionNegotiator,
    sink: EventSink,
    session: Mutex<Session>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(active) = self.session.get_mut().active.take() {
            active.relay.abort();
        }
    }
}

/// Manages the single serial connection of the bridge.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Creates a manager over the OS serial backends.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn system(config: BridgeConfig) -> Self {
        Self::new(config, Arc::new(SystemUsbHost::new()), Arc::new(SystemUart::new()))
    }

    /// Creates a manager over the given backends.
    ///
    /// Must be called from within a Tokio runtime: the task that receives
    /// USB permission results is spawned here.
    #[must_use]
    pub fn new(config: BridgeConfig, usb: Arc<dyn UsbHost>, uart: Arc<dyn UartOpener>) -> Self {
        let (negotiator, permissions) = PermissionNegotiator::new();
        let enumerator =
            DeviceEnumerator::new(Arc::clone(&usb), &config.device_dir, &config.uart_patterns);

        let inner = Arc::new(Inner {
            config,
            usb,
            uart,
            enumerator,
            negotiator,
            sink: EventSink::new(),
            session: Mutex::new(Session::default()),
        });

        tokio::spawn(listen_for_permissions(Arc::downgrade(&inner), permissions));

        Self { inner }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Attaches the event subscriber, replacing any previous one.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.inner.sink.subscribe()
    }

    /// Detaches the event subscriber.
    pub fn unsubscribe(&self) {
        self.inner.sink.unsubscribe();
    }

    /// Lists candidate devices: USB first, then UART sorted by path.
    #[must_use]
    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.inner.enumerator.list_devices()
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> ConnectionState {
        let session = self.inner.session.lock().await;
        if session.active.is_some() {
            ConnectionState::Open
        } else if self.inner.negotiator.has_pending() {
            ConnectionState::Opening
        } else {
            ConnectionState::Closed
        }
    }

    /// Returns the open connection, if any.
    pub async fn connection_info(&self) -> Option<ConnectionInfo> {
        let session = self.inner.session.lock().await;
        session.active.as_ref().map(|a| a.info.clone())
    }

    /// Connects to a USB device at the configured default baud rate.
    pub async fn connect_usb(&self, name: &str) -> Result<ConnectOutcome> {
        self.connect_usb_with_baud(name, self.inner.config.usb_baud_rate)
            .await
    }

    /// Connects to a USB device with 8N1 framing at `baud_rate`.
    ///
    /// Without an access grant this prompts and returns
    /// [`ConnectOutcome::PermissionPending`]; the connect is re-run when the
    /// grant arrives.
    pub async fn connect_usb_with_baud(&self, name: &str, baud_rate: u32) -> Result<ConnectOutcome> {
        self.connect_usb_device(name, baud_rate, false).await
    }

    /// `from_grant` marks the connect re-run by a permission grant, which
    /// leaves an existing connection to the same device alone.
    async fn connect_usb_device(
        &self,
        name: &str,
        baud_rate: u32,
        from_grant: bool,
    ) -> Result<ConnectOutcome> {
        let Some(device) = self.inner.enumerator.find_usb(name) else {
            tracing::warn!("USB device not found: {}", name);
            return Err(Error::DeviceNotFound { name: name.into() });
        };

        match self
            .inner
            .negotiator
            .ensure_permission(self.inner.usb.as_ref(), &device, baud_rate)
        {
            PermissionStatus::Granted => {}
            PermissionStatus::Requested => return Ok(ConnectOutcome::PermissionPending),
            PermissionStatus::Denied => {
                return Err(Error::PermissionDenied { name: name.into() });
            }
        }

        let info = self
            .open_usb(&device, SerialFraming::with_baud(baud_rate), from_grant)
            .await?;
        Ok(ConnectOutcome::Connected(info))
    }

    async fn open_usb(
        &self,
        device: &UsbDevice,
        framing: SerialFraming,
        from_grant: bool,
    ) -> Result<ConnectionInfo> {
        let mut session = self.inner.session.lock().await;
        if from_grant {
            if let Some(active) = session.active.as_ref().filter(|a| {
                a.info.kind == TransportKind::Usb && a.info.device == device.name
            }) {
                tracing::debug!("{} already connected, ignoring grant", device.name);
                return Ok(active.info.clone());
            }
        }
        self.close_for_replacement(&mut session).await;

        let stream = self
            .inner
            .usb
            .open(device, framing)
            .await
            .map_err(|e| {
                let e = e.into_open_failure();
                tracing::error!("USB connection failed: {}", e);
                e
            })?;

        let info = ConnectionInfo {
            kind: TransportKind::Usb,
            device: device.name.clone(),
            baud_rate: framing.baud_rate,
            framing: Some(framing),
        };
        self.inner.negotiator.forget(&device.name);
        self.start(&mut session, info.clone(), stream);

        tracing::info!("connected to USB: {}", device);
        Ok(info)
    }

    /// Opens a UART character device.
    ///
    /// Baud rates outside the supported set fall back to 9600.
    pub async fn connect_uart(&self, path: impl AsRef<Path>, baud_rate: u32) -> Result<ConnectionInfo> {
        let path = path.as_ref();
        let effective = uart_baud_rate(baud_rate);
        if effective != baud_rate {
            tracing::warn!("unsupported UART baud rate {}, using {}", baud_rate, effective);
        }

        let mut session = self.inner.session.lock().await;
        self.close_for_replacement(&mut session).await;

        let stream = self
            .inner
            .uart
            .open(path, effective)
            .await
            .map_err(|e| {
                let e = e.into_open_failure();
                tracing::error!("UART connection failed: {}", e);
                e
            })?;

        let info = ConnectionInfo {
            kind: TransportKind::Uart,
            device: path.display().to_string(),
            baud_rate: effective,
            framing: None,
        };
        self.start(&mut session, info.clone(), stream);

        tracing::info!("UART connected on {} @ {}", info.device, effective);
        Ok(info)
    }

    /// Writes `data` to the open transport.
    ///
    /// The write is bounded by the transport's configured timeout, if any.
    /// A failed write leaves the connection open.
    pub async fn send(&self, data: &[u8]) -> Result<SendReceipt> {
        let mut session = self.inner.session.lock().await;
        let active = session.active.as_mut().ok_or(Error::NoActiveConnection)?;
        let transport = active.info.kind;

        let writer = &mut active.writer;
        let write = async {
            writer.write_all(data).await?;
            writer.flush().await
        };

        let result = match self.inner.config.write_timeout_for(transport) {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("write timed out after {}ms", limit.as_millis())),
            },
            None => write.await.map_err(|e| e.to_string()),
        };

        if let Err(reason) = result {
            tracing::warn!("error sending {} data: {}", transport, reason);
            return Err(Error::WriteFailed { transport, reason });
        }

        tracing::debug!("sent {} bytes to {}", data.len(), transport);
        Ok(SendReceipt {
            transport,
            bytes_written: data.len(),
        })
    }

    /// Closes whatever is open and cancels pending USB prompts.
    ///
    /// Idempotent and infallible: close errors are logged. Always pushes
    /// [`Event::Disconnected`].
    pub async fn disconnect(&self) {
        self.inner.negotiator.cancel_all();

        let mut session = self.inner.session.lock().await;
        if let Some(active) = session.take() {
            tracing::info!("disconnecting {} device {}", active.info.kind, active.info.device);
            active.close().await;
        }
        self.inner.sink.emit(Event::Disconnected);
        tracing::info!("disconnected all devices");
    }

    /// Handles the answer to a USB access prompt.
    ///
    /// A grant re-runs the connect that prompted, once. Grants nobody is
    /// waiting on, or for the device already open, change nothing.
    pub async fn handle_permission_result(&self, event: PermissionEvent) {
        let request = self.inner.negotiator.resolve(&event);
        self.inner.sink.emit(Event::Permission {
            device: event.device.clone(),
            granted: event.granted,
        });

        if !event.granted {
            return;
        }
        let Some(request) = request else {
            tracing::debug!("no connect waiting on {}, ignoring grant", event.device);
            return;
        };

        match self
            .connect_usb_device(&request.device, request.baud_rate, true)
            .await
        {
            Ok(ConnectOutcome::Connected(_)) => {}
            Ok(ConnectOutcome::PermissionPending) => {
                tracing::debug!("{} still waiting for permission", request.device);
            }
            Err(e) => tracing::error!("connect after permission grant failed: {}", e),
        }
    }

    async fn close_for_replacement(&self, session: &mut Session) {
        if let Some(active) = session.take() {
            tracing::info!(
                "closing {} device {} before opening another",
                active.info.kind,
                active.info.device
            );
            active.close().await;
            self.inner.sink.emit(Event::Disconnected);
        }
    }

    fn start(&self, session: &mut Session, info: ConnectionInfo, stream: BoxedStream) {
        let id = session.allocate_id();
        let (reader, writer) = tokio::io::split(stream);
        let sink = self.inner.sink.clone();
        let buffer_size = self.inner.config.read_buffer_size;
        let weak = Arc::downgrade(&self.inner);

        // The caller holds the session lock, so a relay that fails at once
        // still finds its connection installed.
        let relay = tokio::spawn(async move {
            let error = relay::run(reader, buffer_size, sink).await;
            if let Some(inner) = weak.upgrade() {
                Self { inner }.relay_failed(id, error).await;
            }
        });

        let state = session.install(ActiveConnection {
            id,
            info,
            writer,
            relay,
        });
        tracing::debug!("session {} is {:?}", id, state);
    }

    async fn relay_failed(&self, id: u64, error: Error) {
        let mut session = self.inner.session.lock().await;
        let Some(active) = session.take_if_current(id) else {
            tracing::debug!("stale relay {} ended: {}", id, error);
            return;
        };

        tracing::error!("serial run error on {}: {}", active.info.device, error);
        active.release().await;

        let detail = match error {
            Error::ReadFailed { reason } => reason,
            other => other.to_string(),
        };
        self.inner.sink.emit(Event::run_error(detail));
    }
}

async fn listen_for_permissions(
    inner: Weak<Inner>,
    mut permissions: mpsc::UnboundedReceiver<PermissionEvent>,
) {
    while let Some(event) = permissions.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        ConnectionManager { inner }
            .handle_permission_result(event)
            .await;
    }
    tracing::trace!("permission listener stopped");
}

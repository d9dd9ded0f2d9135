//! In-memory transports.
//!
//! A [`LoopbackDevice`] stands in for a physical serial device: every open
//! hands out one end of a [`tokio::io::duplex`] pipe while a background task
//! plays the device on the other end, echoing what it receives. Tests and
//! demos drive it to inject unsolicited data, stall the device, or make it
//! vanish mid-session. [`LoopbackUsbHost`] and [`LoopbackUart`] put devices
//! behind the two backend traits, including scriptable permission prompts.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::{BoxedStream, PermissionReply, UartOpener, UsbHost};
use crate::types::{SerialFraming, UsbDevice};

/// Default pipe capacity between host and device.
pub const DEFAULT_PIPE_CAPACITY: usize = 4096;

enum Control {
    Inject(Vec<u8>),
    Stall(bool),
    Fail,
}

struct DeviceInner {
    echo: bool,
    capacity: usize,
    stalled: bool,
    control: Mutex<Option<mpsc::UnboundedSender<Control>>>,
    received: Arc<Mutex<Vec<u8>>>,
    session: Arc<AtomicUsize>,
    opens: AtomicUsize,
}

/// A simulated serial device.
#[derive(Clone)]
pub struct LoopbackDevice {
    inner: Arc<DeviceInner>,
}

impl Default for LoopbackDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDevice {
    /// Creates an echoing device.
    #[must_use]
    pub fn new() -> Self {
        Self::build(true, DEFAULT_PIPE_CAPACITY, false)
    }

    /// Creates a device that records writes without echoing them.
    #[must_use]
    pub fn silent() -> Self {
        Self::build(false, DEFAULT_PIPE_CAPACITY, false)
    }

    /// Creates an echoing device that starts out stalled, with a pipe of
    /// `capacity` bytes. Host writes beyond that block until
    /// [`stall(false)`](Self::stall).
    #[must_use]
    pub fn unresponsive(capacity: usize) -> Self {
        Self::build(true, capacity, true)
    }

    fn build(echo: bool, capacity: usize, stalled: bool) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                echo,
                capacity,
                stalled,
                control: Mutex::new(None),
                received: Arc::new(Mutex::new(Vec::new())),
                session: Arc::new(AtomicUsize::new(0)),
                opens: AtomicUsize::new(0),
            }),
        }
    }

    /// Opens the device, returning the host end of the pipe.
    ///
    /// A previous session on the same device is torn down.
    #[must_use]
    pub fn open(&self) -> BoxedStream {
        let (host, port) = tokio::io::duplex(self.inner.capacity);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.control.lock() = Some(tx);
        let id = self.inner.opens.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.session.store(id, Ordering::SeqCst);

        tokio::spawn(run_device(
            port,
            rx,
            self.inner.echo,
            self.inner.stalled,
            Arc::clone(&self.inner.received),
            Arc::clone(&self.inner.session),
            id,
        ));

        Box::new(HostEnd {
            pipe: host,
            session: Arc::clone(&self.inner.session),
            id,
        })
    }

    /// Sends bytes to the host as if the device produced them.
    pub fn inject(&self, data: impl Into<Vec<u8>>) {
        self.control(Control::Inject(data.into()));
    }

    /// Stops (or resumes) reading from the host, so host writes back up.
    pub fn stall(&self, stalled: bool) {
        self.control(Control::Stall(stalled));
    }

    /// Makes the device vanish; the host sees end-of-stream.
    pub fn fail(&self) {
        self.control(Control::Fail);
    }

    /// Returns true while a session is live: the host still holds its end
    /// and the device has not gone away.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.session.load(Ordering::SeqCst) != 0
    }

    /// Returns how many times the device was opened.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// Returns everything the host wrote to the device so far.
    #[must_use]
    pub fn received(&self) -> Vec<u8> {
        self.inner.received.lock().clone()
    }

    fn control(&self, msg: Control) {
        if let Some(tx) = self.inner.control.lock().as_ref() {
            let _ = tx.send(msg);
        }
    }
}

/// Host end of a session. Dropping it ends the session at once.
struct HostEnd {
    pipe: DuplexStream,
    session: Arc<AtomicUsize>,
    id: usize,
}

impl Drop for HostEnd {
    fn drop(&mut self) {
        end_session(&self.session, self.id);
    }
}

impl AsyncRead for HostEnd {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_read(cx, buf)
    }
}

impl AsyncWrite for HostEnd {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.pipe).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_shutdown(cx)
    }
}

// A newer session may already own the device.
fn end_session(session: &AtomicUsize, id: usize) {
    let _ = session.compare_exchange(id, 0, Ordering::SeqCst, Ordering::SeqCst);
}

async fn run_device(
    mut port: DuplexStream,
    mut control: mpsc::UnboundedReceiver<Control>,
    echo: bool,
    mut stalled: bool,
    received: Arc<Mutex<Vec<u8>>>,
    session: Arc<AtomicUsize>,
    id: usize,
) {
    let mut buf = [0u8; 256];

    loop {
        tokio::select! {
            msg = control.recv() => match msg {
                Some(Control::Inject(data)) => {
                    if port.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Some(Control::Stall(on)) => stalled = on,
                Some(Control::Fail) | None => break,
            },
            read = port.read(&mut buf), if !stalled => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    received.lock().extend_from_slice(&buf[..n]);
                    if echo && port.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            },
        }
    }

    end_session(&session, id);
}

type OpenHook = Arc<dyn Fn(&UsbDevice) + Send + Sync>;

#[derive(Default)]
struct UsbHostState {
    devices: Vec<(UsbDevice, LoopbackDevice)>,
    granted: HashSet<String>,
    prompts: HashMap<String, PermissionReply>,
    prompt_count: usize,
    refuse_prompts: bool,
    framings: HashMap<String, SerialFraming>,
    on_open: Option<OpenHook>,
}

/// A USB host with simulated devices and scriptable access prompts.
#[derive(Clone, Default)]
pub struct LoopbackUsbHost {
    state: Arc<Mutex<UsbHostState>>,
}

impl LoopbackUsbHost {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an echoing device.
    pub fn attach(&self, device: UsbDevice) -> LoopbackDevice {
        self.attach_with(device, LoopbackDevice::new())
    }

    /// Attaches the given simulated device.
    pub fn attach_with(&self, device: UsbDevice, port: LoopbackDevice) -> LoopbackDevice {
        self.state.lock().devices.push((device, port.clone()));
        port
    }

    /// Detaches a device; later opens fail.
    pub fn detach(&self, name: &str) {
        self.state.lock().devices.retain(|(d, _)| d.name != name);
    }

    /// Records an access grant, as if given in an earlier session.
    pub fn grant(&self, name: &str) {
        self.state.lock().granted.insert(name.to_string());
    }

    /// Makes `request_permission` fail, as when no prompt can be shown.
    pub fn refuse_prompts(&self, refuse: bool) {
        self.state.lock().refuse_prompts = refuse;
    }

    /// Answers the outstanding prompt for `name`.
    ///
    /// Returns false if no prompt was outstanding.
    pub fn answer(&self, name: &str, granted: bool) -> bool {
        let reply = {
            let mut state = self.state.lock();
            if granted {
                state.granted.insert(name.to_string());
            }
            state.prompts.remove(name)
        };
        match reply {
            Some(reply) => {
                reply.resolve(granted);
                true
            }
            None => false,
        }
    }

    /// Returns how many prompts were issued.
    #[must_use]
    pub fn prompt_count(&self) -> usize {
        self.state.lock().prompt_count
    }

    /// Runs `hook` at the start of every open, before the device is looked up.
    pub fn on_open(&self, hook: impl Fn(&UsbDevice) + Send + Sync + 'static) {
        self.state.lock().on_open = Some(Arc::new(hook));
    }

    /// Returns the framing of the most recent open of `name`.
    #[must_use]
    pub fn last_framing(&self, name: &str) -> Option<SerialFraming> {
        self.state.lock().framings.get(name).copied()
    }
}

impl UsbHost for LoopbackUsbHost {
    fn devices(&self) -> Result<Vec<UsbDevice>> {
        Ok(self
            .state
            .lock()
            .devices
            .iter()
            .map(|(d, _)| d.clone())
            .collect())
    }

    fn has_permission(&self, device: &UsbDevice) -> bool {
        self.state.lock().granted.contains(&device.name)
    }

    fn request_permission(&self, device: &UsbDevice, reply: PermissionReply) -> Result<()> {
        let mut state = self.state.lock();
        if state.refuse_prompts {
            return Err(Error::PermissionDenied {
                name: device.name.clone(),
            });
        }
        state.prompt_count += 1;
        state.prompts.insert(reply.device().to_string(), reply);
        Ok(())
    }

    fn open(&self, device: &UsbDevice, framing: SerialFraming) -> BoxFuture<'_, Result<BoxedStream>> {
        let hook = self.state.lock().on_open.clone();
        if let Some(hook) = hook {
            hook(device);
        }

        let name = device.name.clone();
        Box::pin(async move {
            let mut state = self.state.lock();
            let port = state
                .devices
                .iter()
                .find(|(d, _)| d.name == name)
                .map(|(_, p)| p.clone())
                .ok_or_else(|| Error::TransportOpenFailed {
                    reason: format!("{name}: device detached"),
                })?;
            state.framings.insert(name, framing);
            Ok(port.open())
        })
    }
}

#[derive(Default)]
struct UartState {
    ports: HashMap<PathBuf, LoopbackDevice>,
    bauds: HashMap<PathBuf, u32>,
}

/// A UART opener with simulated character devices.
#[derive(Clone, Default)]
pub struct LoopbackUart {
    state: Arc<Mutex<UartState>>,
}

impl LoopbackUart {
    /// Creates an opener with no devices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an echoing device at `path`.
    pub fn add(&self, path: impl Into<PathBuf>) -> LoopbackDevice {
        self.add_with(path, LoopbackDevice::new())
    }

    /// Adds the given simulated device at `path`.
    pub fn add_with(&self, path: impl Into<PathBuf>, port: LoopbackDevice) -> LoopbackDevice {
        self.state.lock().ports.insert(path.into(), port.clone());
        port
    }

    /// Returns the baud rate of the most recent open of `path`.
    #[must_use]
    pub fn last_baud(&self, path: impl AsRef<Path>) -> Option<u32> {
        self.state.lock().bauds.get(path.as_ref()).copied()
    }
}

impl UartOpener for LoopbackUart {
    fn open(&self, path: &Path, baud_rate: u32) -> BoxFuture<'_, Result<BoxedStream>> {
        let path = path.to_path_buf();
        Box::pin(async move {
            let mut state = self.state.lock();
            let port = state.ports.get(&path).cloned().ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{}: No such file or directory", path.display()),
                ))
            })?;
            state.bauds.insert(path, baud_rate);
            Ok(port.open())
        })
    }
}

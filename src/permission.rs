//! USB access negotiation.
//!
//! USB devices need a platform access grant before they can be opened. The
//! [`PermissionNegotiator`] checks for an existing grant, otherwise asks the
//! host to prompt and remembers the request. The host answers later, from
//! whatever context the platform delivers it on, by sending a
//! [`PermissionEvent`] into the negotiator's channel; the connection manager
//! drains that channel and finishes the connect.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::transport::{PermissionReply, UsbHost};
use crate::types::UsbDevice;

/// Outcome of [`PermissionNegotiator::ensure_permission`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    /// Access is already granted.
    Granted,
    /// A prompt is outstanding; the result arrives as a [`PermissionEvent`].
    Requested,
    /// The host could not prompt.
    Denied,
}

/// Grant or denial delivered by the host for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionEvent {
    /// Device name the prompt was issued for.
    pub device: String,
    /// Whether access was granted.
    pub granted: bool,
}

/// A connect waiting on a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPermissionRequest {
    /// Device name.
    pub device: String,
    /// Baud rate the connect asked for.
    pub baud_rate: u32,
    /// When the prompt was issued.
    pub requested_at: Instant,
}

/// Tracks outstanding USB access prompts.
pub struct PermissionNegotiator {
    pending: Mutex<HashMap<String, PendingPermissionRequest>>,
    tx: mpsc::UnboundedSender<PermissionEvent>,
}

impl PermissionNegotiator {
    /// Creates a negotiator and the receiver its results arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PermissionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                pending: Mutex::new(HashMap::new()),
                tx,
            },
            rx,
        )
    }

    /// Checks for a grant, prompting if there is none.
    ///
    /// A device with a prompt already outstanding is not prompted again.
    pub fn ensure_permission(
        &self,
        host: &dyn UsbHost,
        device: &UsbDevice,
        baud_rate: u32,
    ) -> PermissionStatus {
        if host.has_permission(device) {
            return PermissionStatus::Granted;
        }

        let mut pending = self.pending.lock();
        if let Some(request) = pending.get_mut(&device.name) {
            tracing::debug!("permission prompt for {} already outstanding", device.name);
            request.baud_rate = baud_rate;
            return PermissionStatus::Requested;
        }

        let reply = PermissionReply::new(device.name.clone(), self.tx.clone());
        match host.request_permission(device, reply) {
            Ok(()) => {
                tracing::info!("requesting USB permission for {}", device.name);
                pending.insert(
                    device.name.clone(),
                    PendingPermissionRequest {
                        device: device.name.clone(),
                        baud_rate,
                        requested_at: Instant::now(),
                    },
                );
                PermissionStatus::Requested
            }
            Err(e) => {
                tracing::warn!("cannot request USB permission for {}: {}", device.name, e);
                PermissionStatus::Denied
            }
        }
    }

    /// Removes and returns the request a result answers.
    ///
    /// Returns `None` for results nobody is waiting on, so a repeated
    /// notification resolves nothing.
    pub fn resolve(&self, event: &PermissionEvent) -> Option<PendingPermissionRequest> {
        let request = self.pending.lock().remove(&event.device);
        let waited = request
            .as_ref()
            .map(|r| format!(" after {:?}", r.requested_at.elapsed()))
            .unwrap_or_default();
        if event.granted {
            tracing::info!("USB permission granted: {}{}", event.device, waited);
        } else {
            tracing::warn!("USB permission denied for: {}{}", event.device, waited);
        }
        request
    }

    /// Returns true if any prompt is outstanding.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Returns true if a prompt for `device` is outstanding.
    #[must_use]
    pub fn is_pending(&self, device: &str) -> bool {
        self.pending.lock().contains_key(device)
    }

    /// Drops the request for `device`, if any.
    ///
    /// Called once the device is open by another path, so a late result for
    /// it does not reconnect.
    pub fn forget(&self, device: &str) {
        if self.pending.lock().remove(device).is_some() {
            tracing::debug!("dropped pending permission request for {}", device);
        }
    }

    /// Forgets every outstanding prompt; later results resolve nothing.
    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            tracing::debug!("cancelling {} pending permission request(s)", pending.len());
            pending.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackUsbHost;

    fn setup() -> (LoopbackUsbHost, UsbDevice) {
        let host = LoopbackUsbHost::new();
        let device = UsbDevice::new("/dev/bus/usb/001/002", 0x1a86, 0x7523);
        host.attach(device.clone());
        (host, device)
    }

    #[tokio::test]
    async fn test_existing_grant() {
        let (host, device) = setup();
        host.grant(&device.name);
        let (negotiator, _rx) = PermissionNegotiator::new();

        let status = negotiator.ensure_permission(&host, &device, 9600);
        assert_eq!(status, PermissionStatus::Granted);
        assert_eq!(host.prompt_count(), 0);
        assert!(!negotiator.has_pending());
    }

    #[tokio::test]
    async fn test_prompt_once_and_resolve() {
        let (host, device) = setup();
        let (negotiator, mut rx) = PermissionNegotiator::new();

        assert_eq!(
            negotiator.ensure_permission(&host, &device, 9600),
            PermissionStatus::Requested
        );
        assert_eq!(
            negotiator.ensure_permission(&host, &device, 115_200),
            PermissionStatus::Requested
        );
        assert_eq!(host.prompt_count(), 1);
        assert!(negotiator.is_pending(&device.name));

        host.answer(&device.name, true);
        let event = rx.recv().await.unwrap();

        let request = negotiator.resolve(&event).unwrap();
        assert_eq!(request.device, device.name);
        assert!(request.requested_at.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(request.baud_rate, 115_200);
        assert!(negotiator.resolve(&event).is_none());
        assert!(!negotiator.has_pending());
    }

    #[tokio::test]
    async fn test_refused_prompt_is_denied() {
        let (host, device) = setup();
        host.refuse_prompts(true);
        let (negotiator, _rx) = PermissionNegotiator::new();

        assert_eq!(
            negotiator.ensure_permission(&host, &device, 9600),
            PermissionStatus::Denied
        );
        assert!(!negotiator.has_pending());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let (host, device) = setup();
        let (negotiator, _rx) = PermissionNegotiator::new();
        negotiator.ensure_permission(&host, &device, 9600);

        negotiator.cancel_all();
        assert!(!negotiator.has_pending());
        let event = PermissionEvent {
            device: device.name.clone(),
            granted: true,
        };
        assert!(negotiator.resolve(&event).is_none());
    }

    #[tokio::test]
    async fn test_forget_one_device() {
        let (host, device) = setup();
        let other = UsbDevice::new("/dev/bus/usb/001/003", 0x0403, 0x6015);
        host.attach(other.clone());
        let (negotiator, _rx) = PermissionNegotiator::new();

        negotiator.ensure_permission(&host, &device, 9600);
        negotiator.ensure_permission(&host, &other, 9600);
        negotiator.forget(&device.name);

        assert!(!negotiator.is_pending(&device.name));
        assert!(negotiator.is_pending(&other.name));
    }
}

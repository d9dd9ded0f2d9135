//! Method-call front end.
//!
//! Translates named method calls into [`ConnectionManager`] operations and
//! their structured results into the status strings the application shell
//! displays. Events are rendered to JSON here as well.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Error;
use crate::event::Event;
use crate::manager::{ConnectOutcome, ConnectionManager};
use crate::types::{DeviceDescriptor, TransportKind};

/// A method call from the application shell.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MethodCall {
    /// Method name, e.g. `connectUsb`.
    pub method: String,
    /// Named arguments; absent means none.
    #[serde(default)]
    pub args: Value,
}

impl MethodCall {
    /// Creates a call with the given arguments.
    #[must_use]
    pub fn new(method: impl Into<String>, args: Value) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    fn u32_arg(&self, key: &str) -> Option<u32> {
        self.args
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }
}

/// Result of a method call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Reply {
    /// Status text for a known method.
    Success(String),
    /// The method name is not recognized.
    NotImplemented(String),
}

/// Dispatches method calls to a connection manager.
#[derive(Clone)]
pub struct Bridge {
    manager: ConnectionManager,
}

impl Bridge {
    /// Creates a bridge over `manager`.
    #[must_use]
    pub const fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Returns the underlying connection manager.
    #[must_use]
    pub const fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Handles one method call.
    pub async fn handle(&self, call: &MethodCall) -> Reply {
        tracing::debug!("method call: {}", call.method);
        let text = match call.method.as_str() {
            "listDevices" => self.list_devices(),
            "connectUsb" => self.connect_usb(call.str_arg("deviceName")).await,
            "connectLoRa" => self.connect_lora(call).await,
            "disconnect" => {
                self.manager.disconnect().await;
                "Disconnected".to_string()
            }
            "sendData" => self.send_data(call.str_arg("data")).await,
            other => {
                tracing::debug!("method not implemented: {}", other);
                return Reply::NotImplemented(other.to_string());
            }
        };
        Reply::Success(text)
    }

    fn list_devices(&self) -> String {
        let devices: Vec<Value> = self
            .manager
            .list_devices()
            .iter()
            .map(device_json)
            .collect();
        Value::Array(devices).to_string()
    }

    async fn connect_usb(&self, name: Option<&str>) -> String {
        let Some(name) = name else {
            return "Invalid device".into();
        };
        match self.manager.connect_usb(name).await {
            Ok(ConnectOutcome::Connected(_)) => format!("Connected to USB: {name}"),
            Ok(ConnectOutcome::PermissionPending) => "Requesting USB permission...".into(),
            Err(Error::DeviceNotFound { .. }) => "USB device not found".into(),
            Err(e) => format!("Error: {e}"),
        }
    }

    async fn connect_lora(&self, call: &MethodCall) -> String {
        let config = self.manager.config();
        let path = call
            .str_arg("path")
            .map_or_else(|| config.uart_path.clone(), Into::into);
        let baud_rate = call.u32_arg("baudRate").unwrap_or(config.uart_baud_rate);

        match self.manager.connect_uart(&path, baud_rate).await {
            Ok(info) => format!("LoRa connected on {}", info.device),
            Err(e) => format!("Error: {e}"),
        }
    }

    async fn send_data(&self, data: Option<&str>) -> String {
        let Some(data) = data else {
            return "No data".into();
        };
        match self.manager.send(data.as_bytes()).await {
            Ok(receipt) => format!("Sent to {}: {data}", label(receipt.transport)),
            Err(Error::NoActiveConnection) => "No connected serial device".into(),
            Err(Error::WriteFailed { transport, reason }) => {
                format!("Error sending {} data: {reason}", label(transport))
            }
            Err(e) => format!("Error: {e}"),
        }
    }
}

/// Name a transport goes by in status text.
const fn label(kind: TransportKind) -> &'static str {
    match kind {
        TransportKind::Usb => "USB",
        TransportKind::Uart => "LoRa",
    }
}

fn device_json(device: &DeviceDescriptor) -> Value {
    match device {
        DeviceDescriptor::Usb(usb) => json!({
            "type": "usb",
            "name": usb.name,
            "vendorId": usb.vendor_id,
            "productId": usb.product_id,
        }),
        DeviceDescriptor::Uart { path } => json!({
            "type": "uart",
            "path": path.display().to_string(),
        }),
    }
}

/// Renders an event the way the shell receives it.
#[must_use]
pub fn event_payload(event: &Event) -> Value {
    match event {
        Event::Data(text) => Value::String(text.clone()),
        Event::Error {
            code,
            message,
            detail,
        } => json!({
            "code": code,
            "message": message,
            "details": detail,
        }),
        Event::Disconnected => Value::String("Disconnected".into()),
        Event::Permission { device, granted } => json!({
            "permission": { "device": device, "granted": granted },
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::BridgeConfig;
    use crate::event::Subscription;
    use crate::transport::{LoopbackUart, LoopbackUsbHost};
    use crate::types::UsbDevice;

    const USB: &str = "/dev/bus/usb/002/007";

    fn setup() -> (Bridge, LoopbackUsbHost, LoopbackUart, Subscription) {
        let usb = LoopbackUsbHost::new();
        let uart = LoopbackUart::new();
        let manager = ConnectionManager::new(
            BridgeConfig::default().device_dir("/nonexistent/dev"),
            Arc::new(usb.clone()),
            Arc::new(uart.clone()),
        );
        let events = manager.subscribe();
        (Bridge::new(manager), usb, uart, events)
    }

    fn call(method: &str, args: Value) -> MethodCall {
        MethodCall::new(method, args)
    }

    fn success(text: &str) -> Reply {
        Reply::Success(text.into())
    }

    #[test]
    fn test_parse_method_call() {
        let parsed: MethodCall =
            serde_json::from_str(r#"{"method":"sendData","args":{"data":"hi"}}"#).unwrap();
        assert_eq!(parsed, call("sendData", json!({"data": "hi"})));

        let parsed: MethodCall = serde_json::from_str(r#"{"method":"disconnect"}"#).unwrap();
        assert_eq!(parsed.args, Value::Null);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (bridge, ..) = setup();
        assert_eq!(
            bridge.handle(&call("reboot", Value::Null)).await,
            Reply::NotImplemented("reboot".into())
        );
    }

    #[tokio::test]
    async fn test_argument_checks() {
        let (bridge, ..) = setup();
        assert_eq!(
            bridge.handle(&call("connectUsb", Value::Null)).await,
            success("Invalid device")
        );
        assert_eq!(
            bridge.handle(&call("sendData", json!({}))).await,
            success("No data")
        );
        assert_eq!(
            bridge.handle(&call("sendData", json!({"data": "x"}))).await,
            success("No connected serial device")
        );
    }

    #[tokio::test]
    async fn test_list_devices_json() {
        let (bridge, usb, ..) = setup();
        usb.attach(UsbDevice::new(USB, 0x0403, 0x6001));

        let Reply::Success(text) = bridge.handle(&call("listDevices", Value::Null)).await else {
            panic!("listDevices not handled");
        };
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            parsed,
            json!([{"type": "usb", "name": USB, "vendorId": 1027, "productId": 24577}])
        );
    }

    #[tokio::test]
    async fn test_usb_flow() {
        let (bridge, usb, _uart, mut events) = setup();
        usb.attach(UsbDevice::new(USB, 0x0403, 0x6001));

        assert_eq!(
            bridge.handle(&call("connectUsb", json!({"deviceName": "nope"}))).await,
            success("USB device not found")
        );
        assert_eq!(
            bridge.handle(&call("connectUsb", json!({"deviceName": USB}))).await,
            success("Requesting USB permission...")
        );

        usb.answer(USB, true);
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event_payload(&event),
            json!({"permission": {"device": USB, "granted": true}})
        );

        tokio::time::timeout(Duration::from_secs(2), async {
            while bridge.manager().connection_info().await.is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            bridge.handle(&call("sendData", json!({"data": "hello"}))).await,
            success("Sent to USB: hello")
        );
        assert_eq!(
            bridge.handle(&call("connectUsb", json!({"deviceName": USB}))).await,
            success(&format!("Connected to USB: {USB}"))
        );
    }

    #[tokio::test]
    async fn test_lora_flow() {
        let (bridge, _usb, uart, _events) = setup();
        uart.add("/dev/ttyS1");
        uart.add("/dev/ttyS4");

        assert_eq!(
            bridge.handle(&call("connectLoRa", Value::Null)).await,
            success("LoRa connected on /dev/ttyS1")
        );
        assert_eq!(uart.last_baud("/dev/ttyS1"), Some(9600));

        assert_eq!(
            bridge
                .handle(&call("connectLoRa", json!({"path": "/dev/ttyS4", "baudRate": 115_200})))
                .await,
            success("LoRa connected on /dev/ttyS4")
        );
        assert_eq!(uart.last_baud("/dev/ttyS4"), Some(115_200));

        assert_eq!(
            bridge.handle(&call("sendData", json!({"data": "msg"}))).await,
            success("Sent to LoRa: msg")
        );
        assert_eq!(
            bridge.handle(&call("disconnect", Value::Null)).await,
            success("Disconnected")
        );

        let Reply::Success(text) = bridge
            .handle(&call("connectLoRa", json!({"path": "/dev/ttyS9"})))
            .await
        else {
            panic!("connectLoRa not handled");
        };
        assert!(text.starts_with("Error: "), "{text}");
    }

    #[test]
    fn test_event_payloads() {
        assert_eq!(event_payload(&Event::Data("abc".into())), json!("abc"));
        assert_eq!(event_payload(&Event::Disconnected), json!("Disconnected"));
        assert_eq!(
            event_payload(&Event::run_error("serial port closed")),
            json!({
                "code": "ERROR",
                "message": "Serial run error",
                "details": "serial port closed",
            })
        );
    }

    #[test]
    fn test_reply_serialization() {
        assert_eq!(
            serde_json::to_value(Reply::Success("Disconnected".into())).unwrap(),
            json!({"success": "Disconnected"})
        );
        assert_eq!(
            serde_json::to_value(Reply::NotImplemented("x".into())).unwrap(),
            json!({"notImplemented": "x"})
        );
    }
}

//! Inbound data relay.
//!
//! One relay runs per open connection. It forwards every read result to the
//! event sink as one text event, without delimiter framing. A multi-byte
//! character cut off at the end of a read is held back and completed by the
//! next read. Invalid UTF-8 is replaced with U+FFFD rather than ending the
//! relay.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Error;
use crate::event::{Event, EventSink};

/// Runs the read loop until the transport fails or reaches end-of-stream.
///
/// This should be spawned as a separate task; it only returns on a fatal
/// error, which it hands back instead of reporting so the caller can decide
/// whether the connection is still current.
pub async fn run<R>(mut reader: R, buffer_size: usize, sink: EventSink) -> Error
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut decoder = Utf8Decoder::default();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("serial port closed");
                if let Some(text) = decoder.finish() {
                    sink.emit(Event::Data(text));
                }
                return Error::ReadFailed {
                    reason: "serial port closed".into(),
                };
            }
            Ok(n) => n,
            Err(e) => {
                tracing::error!("serial read error: {}", e);
                return Error::ReadFailed {
                    reason: e.to_string(),
                };
            }
        };

        tracing::trace!("received {} bytes", n);
        let text = decoder.decode(&buf[..n]);
        if !text.is_empty() {
            sink.emit(Event::Data(text));
        }
    }
}

/// Incremental UTF-8 decoder.
///
/// Holds back an incomplete trailing sequence (at most 3 bytes) until the
/// rest of it arrives.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();
        let mut rest = self.pending.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // Checked by from_utf8 above.
                    text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);
        text
    }

    /// Flushes a sequence the stream ended in the middle of.
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_each_read_is_one_event() {
        let (mut device, host) = tokio::io::duplex(64);
        let sink = EventSink::new();
        let mut sub = sink.subscribe();
        let relay = tokio::spawn(run(host, 64, sink.clone()));

        device.write_all(b"hello").await.unwrap();
        assert_eq!(sub.recv().await, Some(Event::Data("hello".into())));

        device.write_all("grüße".as_bytes()).await.unwrap();
        assert_eq!(sub.recv().await, Some(Event::Data("grüße".into())));

        drop(device);
        let err = relay.await.unwrap();
        assert!(matches!(err, Error::ReadFailed { .. }));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let (mut device, host) = tokio::io::duplex(64);
        let sink = EventSink::new();
        let mut sub = sink.subscribe();
        tokio::spawn(run(host, 64, sink.clone()));

        device.write_all(&[b'o', b'k', 0xff, 0xfe]).await.unwrap();
        assert_eq!(
            sub.recv().await,
            Some(Event::Data("ok\u{fffd}\u{fffd}".into()))
        );
    }

    #[tokio::test]
    async fn test_reads_split_at_buffer_size() {
        let (mut device, host) = tokio::io::duplex(64);
        let sink = EventSink::new();
        let mut sub = sink.subscribe();
        tokio::spawn(run(host, 4, sink.clone()));

        device.write_all(b"abcdef").await.unwrap();
        assert_eq!(sub.recv().await, Some(Event::Data("abcd".into())));
        assert_eq!(sub.recv().await, Some(Event::Data("ef".into())));
    }

    #[tokio::test]
    async fn test_character_split_across_reads() {
        let (mut device, host) = tokio::io::duplex(64);
        let sink = EventSink::new();
        let mut sub = sink.subscribe();
        tokio::spawn(run(host, 64, sink.clone()));

        let bytes = "aü".as_bytes();
        device.write_all(&bytes[..2]).await.unwrap();
        assert_eq!(sub.recv().await, Some(Event::Data("a".into())));

        device.write_all(&bytes[2..]).await.unwrap();
        assert_eq!(sub.recv().await, Some(Event::Data("ü".into())));
    }

    #[tokio::test]
    async fn test_truncated_character_at_end_of_stream() {
        let (mut device, host) = tokio::io::duplex(64);
        let sink = EventSink::new();
        let mut sub = sink.subscribe();
        let relay = tokio::spawn(run(host, 64, sink.clone()));

        device.write_all(&[b'x', 0xe2, 0x82]).await.unwrap();
        assert_eq!(sub.recv().await, Some(Event::Data("x".into())));

        drop(device);
        assert_eq!(sub.recv().await, Some(Event::Data("\u{fffd}".into())));
        assert!(matches!(relay.await.unwrap(), Error::ReadFailed { .. }));
    }

    #[test]
    fn test_decoder_keeps_only_incomplete_tail() {
        let mut decoder = Utf8Decoder::default();
        let euro = "€".as_bytes();

        assert_eq!(decoder.decode(&[0xff, b'a', euro[0]]), "\u{fffd}a");
        assert_eq!(decoder.decode(&euro[1..2]), "");
        assert_eq!(decoder.decode(&[euro[2], b'b']), "€b");
        assert_eq!(decoder.decode(&[0xc3, b'z']), "\u{fffd}z");
        assert!(decoder.finish().is_none());
    }
}

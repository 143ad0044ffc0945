//! Packet delivery between publisher and viewer.
//!
//! [`VideoTransport`] abstracts how encoded packets travel: the
//! publish loop hands each packet to `publish`, and every consumer
//! gets its own receive queue from `subscribe`. Two implementations
//! ship:
//!
//! - [`LocalBus`] routes packets between tasks in the same process,
//!   keyed by topic name.
//! - [`UdpTransport`] sends each packet as a single bincode datagram
//!   to a fixed remote endpoint.
//!
//! Delivery is best-effort in both cases: a packet published with no
//! subscriber listening is dropped, and a datagram that fails to
//! decode is skipped without disturbing the receive loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, trace, warn};

use crate::error::StreamError;
use crate::packet::VideoPacket;

// ── Constants ────────────────────────────────────────────────────

/// Packets buffered per subscriber before the oldest is overwritten.
const SUBSCRIBER_QUEUE: usize = 16;

/// Largest datagram a UDP socket can carry (16-bit length field).
const MAX_DATAGRAM: usize = 65_535;

// ── VideoTransport ───────────────────────────────────────────────

/// Best-effort pub/sub delivery of [`VideoPacket`]s.
///
/// Implementations must be shareable across tasks; the publish loop
/// and any number of subscribers hold the same `Arc<dyn VideoTransport>`.
#[async_trait]
pub trait VideoTransport: Send + Sync {
    /// Publish one packet on `topic`.
    ///
    /// Returns `Ok(())` even when nobody is subscribed; only transport
    /// faults (socket errors, unserializable packets) are reported.
    async fn publish(&self, topic: &str, packet: &VideoPacket) -> Result<(), StreamError>;

    /// Open a receive queue for `topic`.
    ///
    /// Packets published after this call flow into the returned
    /// channel. Dropping the receiver tears the subscription down.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<VideoPacket>, StreamError>;
}

// ── LocalBus ─────────────────────────────────────────────────────

/// In-process transport backed by per-topic broadcast channels.
///
/// Every subscriber of a topic receives every packet published to it
/// after subscribing. A slow subscriber loses the oldest buffered
/// packets rather than stalling the publisher.
pub struct LocalBus {
    topics: RwLock<HashMap<String, broadcast::Sender<VideoPacket>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Number of topics that have ever been subscribed to.
    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoTransport for LocalBus {
    async fn publish(&self, topic: &str, packet: &VideoPacket) -> Result<(), StreamError> {
        let topics = self.topics.read().await;
        match topics.get(topic) {
            Some(tx) => {
                // send() fails only when every receiver is gone, which
                // for a best-effort feed is the same as having none.
                if tx.send(packet.clone()).is_err() {
                    trace!(topic, "no live subscribers, packet dropped");
                }
            }
            None => trace!(topic, "no subscribers for topic, packet dropped"),
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<VideoPacket>, StreamError> {
        let mut rx = {
            let mut topics = self.topics.write().await;
            topics
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(SUBSCRIBER_QUEUE).0)
                .subscribe()
        };

        let (tx, out) = mpsc::channel(SUBSCRIBER_QUEUE);
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(packet) => {
                        if tx.send(packet).await.is_err() {
                            break; // subscriber dropped its receiver
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = %topic, skipped, "subscriber lagging, packets dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            trace!(topic = %topic, "subscription closed");
        });

        Ok(out)
    }
}

// ── UdpTransport ─────────────────────────────────────────────────

/// Point-to-point UDP transport.
///
/// Each packet is serialized whole into one datagram and sent to the
/// configured remote address, so the serialized size must stay under
/// the datagram limit; [`VideoPacket::validate`] is checked before
/// every send. The topic name has no wire representation here and is
/// ignored on both sides.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    remote_addr: SocketAddr,
    /// Total bytes sent since construction (for bandwidth estimation).
    bytes_sent: AtomicU64,
}

impl UdpTransport {
    /// Wrap an already-bound `UdpSocket` targeting `remote_addr`.
    pub fn new(socket: UdpSocket, remote_addr: SocketAddr) -> Self {
        Self {
            socket: Arc::new(socket),
            remote_addr,
            bytes_sent: AtomicU64::new(0),
        }
    }

    /// Bind a fresh socket on `local_addr` targeting `remote_addr`.
    pub async fn bind(
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> Result<Self, StreamError> {
        let socket = UdpSocket::bind(local_addr).await?;
        Ok(Self::new(socket, remote_addr))
    }

    /// Total bytes sent across all packets.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// The local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, StreamError> {
        Ok(self.socket.local_addr()?)
    }

    /// The remote address this transport targets.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

#[async_trait]
impl VideoTransport for UdpTransport {
    async fn publish(&self, _topic: &str, packet: &VideoPacket) -> Result<(), StreamError> {
        packet.validate()?;
        let bytes = packet.to_bytes()?;

        let sent = self
            .socket
            .send_to(&bytes, self.remote_addr)
            .await
            .map_err(|e| StreamError::Publish(format!("send to {}: {e}", self.remote_addr)))?;
        self.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn subscribe(&self, _topic: &str) -> Result<mpsc::Receiver<VideoPacket>, StreamError> {
        let socket = Arc::clone(&self.socket);
        let (tx, out) = mpsc::channel(SUBSCRIBER_QUEUE);

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(recv) => recv,
                    Err(e) => {
                        warn!(error = %e, "UDP receive failed, stopping subscription");
                        break;
                    }
                };

                match VideoPacket::from_bytes(&buf[..len]) {
                    Ok(packet) => {
                        if tx.send(packet).await.is_err() {
                            break; // subscriber dropped its receiver
                        }
                    }
                    Err(e) => {
                        debug!(%from, len, error = %e, "dropping malformed datagram");
                    }
                }
            }
        });

        Ok(out)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::MAX_PAYLOAD_BYTES;

    fn packet(source: u32, fill: u8, len: usize) -> VideoPacket {
        VideoPacket::new(source, vec![fill; len], 1_000)
    }

    #[tokio::test]
    async fn local_bus_delivers_to_subscriber() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe("video").await.unwrap();

        bus.publish("video", &packet(3, 0xAB, 512)).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.source, 3);
        assert_eq!(received.data.len(), 512);
        assert!(received.data.iter().all(|&b| b == 0xAB));
    }

    #[tokio::test]
    async fn local_bus_publish_without_subscribers_is_ok() {
        let bus = LocalBus::new();
        bus.publish("video", &packet(0, 0x00, 64)).await.unwrap();
        assert_eq!(bus.topic_count().await, 0);
    }

    #[tokio::test]
    async fn local_bus_fans_out_to_every_subscriber() {
        let bus = LocalBus::new();
        let mut rx_a = bus.subscribe("video").await.unwrap();
        let mut rx_b = bus.subscribe("video").await.unwrap();

        bus.publish("video", &packet(1, 0x11, 32)).await.unwrap();

        assert_eq!(rx_a.recv().await.unwrap().source, 1);
        assert_eq!(rx_b.recv().await.unwrap().source, 1);
    }

    #[tokio::test]
    async fn local_bus_topics_are_isolated() {
        let bus = LocalBus::new();
        let mut rx_video = bus.subscribe("video").await.unwrap();
        let mut rx_other = bus.subscribe("other").await.unwrap();

        bus.publish("video", &packet(7, 0x22, 16)).await.unwrap();

        assert_eq!(rx_video.recv().await.unwrap().source, 7);
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn udp_transport_send_receive() {
        // Bind two sockets on localhost.
        let sender_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let sender_addr = sender_sock.local_addr().unwrap();
        let receiver_addr = receiver_sock.local_addr().unwrap();

        let sender = UdpTransport::new(sender_sock, receiver_addr);
        let receiver = UdpTransport::new(receiver_sock, sender_addr);

        let mut rx = receiver.subscribe("video").await.unwrap();

        let sent = packet(9, 0xCD, 5_000);
        sender.publish("video", &sent).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.source, 9);
        assert_eq!(received.timestamp_ns, sent.timestamp_ns);
        assert_eq!(received.data.len(), 5_000);
        assert!(received.data.iter().all(|&b| b == 0xCD));
        assert!(sender.bytes_sent() > 5_000);
    }

    #[tokio::test]
    async fn udp_transport_skips_malformed_datagrams() {
        let sender_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_addr = receiver_sock.local_addr().unwrap();

        let sender_addr = sender_sock.local_addr().unwrap();
        let sender = UdpTransport::new(sender_sock, receiver_addr);
        let receiver = UdpTransport::new(receiver_sock, sender_addr);

        let mut rx = receiver.subscribe("video").await.unwrap();

        // Raw garbage first, then a well-formed packet.
        let garbage_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        garbage_sock
            .send_to(&[0xFF, 0x00, 0xFF], receiver_addr)
            .await
            .unwrap();
        sender.publish("video", &packet(2, 0x55, 128)).await.unwrap();

        // The garbage is skipped; the valid packet still arrives.
        let received = rx.recv().await.unwrap();
        assert_eq!(received.source, 2);
        assert_eq!(received.data.len(), 128);
    }

    #[tokio::test]
    async fn udp_transport_rejects_oversize_before_sending() {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote = sock.local_addr().unwrap();
        let transport = UdpTransport::new(sock, remote);

        let oversize = packet(0, 0x00, MAX_PAYLOAD_BYTES + 1);
        let err = transport.publish("video", &oversize).await.unwrap_err();
        assert!(matches!(err, StreamError::PayloadTooLarge { .. }));
        assert_eq!(transport.bytes_sent(), 0);
    }

    #[tokio::test]
    async fn udp_transport_send_failure_surfaces_as_publish_error() {
        // Port 0 is never a valid destination; the kernel rejects the
        // datagram at send time.
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = UdpTransport::new(sock, "127.0.0.1:0".parse().unwrap());

        let err = transport.publish("video", &packet(0, 0x00, 64)).await.unwrap_err();
        assert!(matches!(err, StreamError::Publish(_)));
        assert!(err.to_string().contains("publish failed"));
        assert_eq!(transport.bytes_sent(), 0);
    }
}

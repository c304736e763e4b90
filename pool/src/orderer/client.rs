//! Streaming client for a single ordering node.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use num::{BigUint, Zero};
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{DistributionHandle, CONNECT_TIMEOUT};
use crate::error::TransportError;
use crate::wire::{ack_status, read_frame, write_frame, Envelope, FRAME_ACK, FRAME_ENVELOPE, STATUS_SUCCESS};

/// Split halves of the live stream. Both sit behind the send mutex so a
/// send and its acknowledgement always belong to the same caller.
#[derive(Debug)]
struct StreamHalves {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

/// Accounting snapshot for one orderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrdererInfo {
    /// Orderer name.
    pub name: String,
    /// Batches consumed since startup, decimal string.
    pub order_count: String,
    /// Total fee credited, decimal string.
    pub total_tax: String,
    /// The distribution rule in force.
    pub rule: String,
    /// Batches per second of lifetime, integer string.
    pub speed: String,
}

/// One connection to an ordering node, plus its fee accounting.
///
/// The send mutex guards the stream halves: a broadcast writes the envelope
/// and awaits the acknowledgement concurrently under the same guard, so
/// replies can never be attributed to the wrong send. Accounting fields use
/// their own fine-grained locks and never contend with the stream.
#[derive(Debug)]
pub struct OrdererClient {
    name: String,
    addr: String,
    /// Unix seconds at construction.
    join_time: u64,
    /// Batch size this orderer requests per pull. Runtime-mutable.
    capacity: AtomicU32,
    total_tax: Mutex<BigUint>,
    order_count: Mutex<BigUint>,
    rule: DistributionHandle,
    stream: tokio::sync::Mutex<Option<StreamHalves>>,
}

impl OrdererClient {
    /// Dials the orderer and constructs its client. Accounting starts at
    /// zero and `join_time` at the current wall clock.
    pub async fn connect(
        name: &str,
        addr: &str,
        capacity: u32,
        rule: DistributionHandle,
    ) -> Result<Self, TransportError> {
        let halves = dial(addr).await?;
        Ok(Self {
            name: name.to_string(),
            addr: addr.to_string(),
            join_time: unix_now(),
            capacity: AtomicU32::new(capacity),
            total_tax: Mutex::new(BigUint::zero()),
            order_count: Mutex::new(BigUint::zero()),
            rule,
            stream: tokio::sync::Mutex::new(Some(halves)),
        })
    }

    /// Client with no live stream, for exercising accounting and dispatch
    /// without an orderer process.
    #[cfg(test)]
    pub(crate) fn detached(name: &str, capacity: u32, rule: DistributionHandle) -> Self {
        Self {
            name: name.to_string(),
            addr: String::new(),
            join_time: unix_now(),
            capacity: AtomicU32::new(capacity),
            total_tax: Mutex::new(BigUint::zero()),
            order_count: Mutex::new(BigUint::zero()),
            rule,
            stream: tokio::sync::Mutex::new(None),
        }
    }

    /// Orderer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current requested batch size.
    pub fn capacity(&self) -> u32 {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Updates the requested batch size. Takes effect on the next pull.
    pub fn set_capacity(&self, capacity: u32) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    /// Credits fee to this orderer's account.
    pub fn add_tax(&self, tax: &BigUint) {
        *self.total_tax.lock() += tax;
    }

    /// Total fee credited so far.
    pub fn total_tax(&self) -> BigUint {
        self.total_tax.lock().clone()
    }

    /// Records one consumed order.
    pub fn deal_order(&self) {
        *self.order_count.lock() += 1u32;
    }

    /// Orders consumed so far.
    pub fn order_count(&self) -> BigUint {
        self.order_count.lock().clone()
    }

    /// Sends one transaction on the stream and waits for its
    /// acknowledgement. The blob is decoded first so a corrupt transaction
    /// fails locally; the bytes on the wire are the original blob.
    pub async fn broadcast(&self, tx: &[u8]) -> Result<(), TransportError> {
        Envelope::decode(tx)?;

        let mut guard = self.stream.lock().await;
        let halves = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let StreamHalves { reader, writer } = halves;

        let send = async {
            write_frame(writer, FRAME_ENVELOPE, tx)
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        };
        let ack = async {
            let (frame_type, body) = read_frame(reader)
                .await
                .map_err(|e| TransportError::RecvFailed(e.to_string()))?;
            if frame_type != FRAME_ACK {
                return Err(TransportError::RecvFailed(format!(
                    "expected ack frame, got type {frame_type}"
                )));
            }
            let status = ack_status(&body).map_err(|e| TransportError::RecvFailed(e.to_string()))?;
            if status != STATUS_SUCCESS {
                return Err(TransportError::AckStatus(status));
            }
            Ok(())
        };
        tokio::try_join!(send, ack)?;
        Ok(())
    }

    /// Redials the orderer and swaps the stream in place. Waits for any
    /// in-flight send to finish first, so the replacement is atomic from
    /// the senders' point of view.
    pub async fn reset_connect(&self) -> Result<(), TransportError> {
        let halves = dial(&self.addr).await;
        match halves {
            Ok(halves) => {
                *self.stream.lock().await = Some(halves);
                info!(orderer = %self.name, addr = %self.addr, "reconnected orderer stream");
                Ok(())
            }
            Err(err) => {
                warn!(orderer = %self.name, addr = %self.addr, error = %err, "reconnect failed");
                Err(err)
            }
        }
    }

    /// Accounting snapshot: name, order count, total tax, the live
    /// distribution rule, and consumption speed in orders per second of
    /// lifetime.
    pub fn calc_info(&self) -> OrdererInfo {
        let live_secs = unix_now().saturating_sub(self.join_time).max(1);
        let speed = self.order_count() / BigUint::from(live_secs);
        OrdererInfo {
            name: self.name.clone(),
            order_count: self.order_count().to_string(),
            total_tax: self.total_tax().to_string(),
            rule: self.rule.read().to_string(),
            speed: speed.to_string(),
        }
    }

    /// Human-readable accounting line for the admin surface.
    pub fn report(&self) -> String {
        let info = self.calc_info();
        format!(
            "orderer {}: orders {}, tax {}, distribution rule '{}', speed {}/s",
            info.name, info.order_count, info.total_tax, info.rule, info.speed
        )
    }
}

/// Dials the orderer with the connect timeout and splits the stream.
async fn dial(addr: &str) -> Result<StreamHalves, TransportError> {
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::ReconnectFailed {
            addr: addr.to_string(),
            reason: "connect timed out".into(),
        })?
        .map_err(|e| TransportError::ReconnectFailed {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
    let (reader, writer) = stream.into_split();
    Ok(StreamHalves { reader, writer })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{distribution_handle, DistributionRule};
    use crate::wire::{ack_body, Payload, STATUS_SERVICE_UNAVAILABLE};
    use tokio::net::TcpListener;

    fn envelope(fee: u64) -> Vec<u8> {
        Envelope::new(
            &Payload {
                tx_id: format!("tx-{fee}"),
                fee,
                data: b"invoke:transfer".to_vec(),
            },
            vec![],
        )
        .encode()
    }

    /// Mock orderer: acks every envelope with the given status, then hangs
    /// up after `max_frames` frames.
    async fn mock_orderer(status: u32, max_frames: usize) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    for _ in 0..max_frames {
                        let Ok((frame_type, _body)) = read_frame(&mut socket).await else {
                            return;
                        };
                        assert_eq!(frame_type, FRAME_ENVELOPE);
                        if write_frame(&mut socket, FRAME_ACK, &ack_body(status))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn broadcast_succeeds_on_success_ack() {
        let addr = mock_orderer(STATUS_SUCCESS, 16).await;
        let rule = distribution_handle(DistributionRule::AllToOne);
        let client = OrdererClient::connect("orderer0", &addr.to_string(), 10, rule)
            .await
            .unwrap();

        client.broadcast(&envelope(5)).await.unwrap();
        client.broadcast(&envelope(6)).await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_surfaces_non_success_status() {
        let addr = mock_orderer(STATUS_SERVICE_UNAVAILABLE, 16).await;
        let rule = distribution_handle(DistributionRule::AllToOne);
        let client = OrdererClient::connect("orderer0", &addr.to_string(), 10, rule)
            .await
            .unwrap();

        let err = client.broadcast(&envelope(5)).await.unwrap_err();
        assert!(matches!(err, TransportError::AckStatus(s) if s == STATUS_SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn broadcast_rejects_undecodable_blob() {
        let rule = distribution_handle(DistributionRule::AllToOne);
        let client = OrdererClient::detached("orderer0", 10, rule);
        let err = client.broadcast(b"garbage").await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[tokio::test]
    async fn detached_client_reports_not_connected() {
        let rule = distribution_handle(DistributionRule::AllToOne);
        let client = OrdererClient::detached("orderer0", 10, rule);
        let err = client.broadcast(&envelope(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn reset_connect_recovers_after_server_hangup() {
        // The mock hangs up after one frame; the second broadcast fails,
        // reconnect replaces the stream, the retry succeeds.
        let addr = mock_orderer(STATUS_SUCCESS, 1).await;
        let rule = distribution_handle(DistributionRule::AllToOne);
        let client = OrdererClient::connect("orderer0", &addr.to_string(), 10, rule)
            .await
            .unwrap();

        client.broadcast(&envelope(1)).await.unwrap();
        let err = client.broadcast(&envelope(2)).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::RecvFailed(_) | TransportError::SendFailed(_)
        ));

        client.reset_connect().await.unwrap();
        client.broadcast(&envelope(3)).await.unwrap();
    }

    #[tokio::test]
    async fn accounting_tracks_tax_and_orders() {
        let rule = distribution_handle(DistributionRule::EqualSplit);
        let client = OrdererClient::detached("orderer0", 10, rule);

        client.add_tax(&BigUint::from(7u32));
        client.add_tax(&BigUint::from(5u32));
        client.deal_order();
        client.deal_order();
        client.deal_order();

        assert_eq!(client.total_tax(), BigUint::from(12u32));
        assert_eq!(client.order_count(), BigUint::from(3u32));

        let info = client.calc_info();
        assert_eq!(info.total_tax, "12");
        assert_eq!(info.order_count, "3");
        assert_eq!(info.rule, "average");
        assert!(client.report().contains("tax 12"));
    }

    #[tokio::test]
    async fn capacity_is_runtime_mutable() {
        let rule = distribution_handle(DistributionRule::AllToOne);
        let client = OrdererClient::detached("orderer0", 10, rule);
        assert_eq!(client.capacity(), 10);
        client.set_capacity(25);
        assert_eq!(client.capacity(), 25);
    }
}

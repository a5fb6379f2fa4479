//! An in-memory, paired-duplex transport for tests and the in-repo demo.
//!
//! Grounded on the teacher's `transport::mock::MockTransport` — a
//! same-process stand-in that lets a client and server exchange
//! envelopes without a real pipe, socket, or subprocess. Not intended
//! for production use; see spec.md §1 on concrete transports being out
//! of scope for this crate.

use super::{Transport, TransportError};
use crate::protocol::Envelope;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// One end of an in-memory duplex channel carrying [`Envelope`]s.
pub struct DuplexTransport {
    tx: mpsc::Sender<Envelope>,
    rx: mpsc::Receiver<Envelope>,
    closed: bool,
}

impl DuplexTransport {
    /// Create a connected pair: writes on one end arrive as reads on the
    /// other, FIFO, matching spec.md §4.2's serialization guarantee.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::channel(128);
        let (tx_b, rx_a) = mpsc::channel(128);
        (
            DuplexTransport {
                tx: tx_a,
                rx: rx_a,
                closed: false,
            },
            DuplexTransport {
                tx: tx_b,
                rx: rx_b,
                closed: false,
            },
        )
    }
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn read_message(&mut self) -> Result<Option<Envelope>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(self.rx.recv().await)
    }

    async fn write_message(&mut self, message: Envelope) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::WriteFailed("peer dropped".to_string()))
    }

    async fn close_gracefully(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}

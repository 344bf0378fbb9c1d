//! Mesh fragment reassembly
//!
//! Fragments are buffered per correlation id in arrival order. Once as many
//! fragments as announced have arrived, they must number exactly `1..=total`;
//! anything else drops the whole buffer.

use crate::error::{GatewayError, Result};
use bytes::{Bytes, BytesMut};
use garden_shared::codec::{CorrelationId, Fragment};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, Instant};
use tracing::{debug, trace, warn};

struct BufferedFragment {
    arrived_at: Instant,
    fragment: Fragment,
}

/// Outcome of feeding one fragment into the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// Still waiting for more fragments
    Pending { received: usize, total: u8 },
    /// The full message; `topic` is absent if fragment #1 had no separator
    Complete {
        topic: Option<String>,
        payload: Bytes,
    },
}

/// Buffers in-flight mesh messages, keyed by correlation id
pub struct FragmentBuffer {
    buffers: Mutex<HashMap<CorrelationId, Vec<BufferedFragment>>>,
    ttl: Duration,
}

impl FragmentBuffer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Buffer a fragment and try to complete its message.
    ///
    /// A numbering violation releases the buffer and returns
    /// [`GatewayError::Sequence`].
    pub async fn accept(&self, fragment: Fragment) -> Result<Reassembly> {
        let correlation = fragment.correlation;
        let mut buffers = self.buffers.lock().await;

        let entry = buffers.entry(correlation).or_default();
        entry.push(BufferedFragment {
            arrived_at: Instant::now(),
            fragment,
        });

        // The first fragment carries the authoritative total
        let total = entry
            .iter()
            .find(|b| b.fragment.number == 1)
            .or_else(|| entry.first())
            .map(|b| b.fragment.total)
            .unwrap_or_default();

        let received = entry.len();
        trace!("[mesh] {}: {}/{} fragments", correlation, received, total);

        if received < total as usize {
            return Ok(Reassembly::Pending { received, total });
        }

        // Either way this buffer is finished
        let mut fragments = buffers.remove(&correlation).unwrap_or_default();
        drop(buffers);

        fragments.sort_by_key(|b| b.fragment.number);

        if fragments.len() != total as usize {
            return Err(GatewayError::Sequence(format!(
                "{}: {} fragments buffered for a total of {}",
                correlation,
                fragments.len(),
                total
            )));
        }

        for (i, buffered) in fragments.iter().enumerate() {
            let expected = i + 1;
            if buffered.fragment.number as usize != expected {
                return Err(GatewayError::Sequence(format!(
                    "{}: expected fragment {} but found {}",
                    correlation, expected, buffered.fragment.number
                )));
            }
        }

        let mut topic = None;
        let mut payload = BytesMut::new();
        for buffered in fragments {
            if buffered.fragment.number == 1 {
                topic = buffered.fragment.topic;
            }
            payload.extend_from_slice(&buffered.fragment.payload);
        }

        debug!(
            "[mesh] {}: reassembled {} bytes from {} fragments",
            correlation,
            payload.len(),
            total
        );

        Ok(Reassembly::Complete {
            topic,
            payload: payload.freeze(),
        })
    }

    /// Drop buffers whose first fragment is older than the TTL
    pub async fn evict_stale(&self) -> Vec<CorrelationId> {
        let mut buffers = self.buffers.lock().await;
        let ttl = self.ttl;

        let stale: Vec<CorrelationId> = buffers
            .iter()
            .filter(|(_, fragments)| {
                fragments
                    .first()
                    .is_some_and(|b| b.arrived_at.elapsed() > ttl)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            buffers.remove(id);
        }
        stale
    }

    /// Number of correlation ids still waiting for fragments
    pub async fn pending(&self) -> usize {
        self.buffers.lock().await.len()
    }
}

/// Periodically evicts abandoned fragment buffers
pub struct FragmentSweeper {
    buffer: Arc<FragmentBuffer>,
    check_interval: Duration,
}

impl FragmentSweeper {
    pub fn new(buffer: Arc<FragmentBuffer>, check_interval: Duration) -> Self {
        Self {
            buffer,
            check_interval,
        }
    }

    /// Start the sweep loop
    pub async fn run(&self) {
        let mut ticker = interval(self.check_interval);

        loop {
            ticker.tick().await;

            for id in self.buffer.evict_stale().await {
                warn!("[mesh] {}: incomplete message expired, dropping fragments", id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(correlation: [u8; 3], number: u8, total: u8, payload: &[u8]) -> Fragment {
        Fragment {
            correlation: CorrelationId(correlation),
            number,
            total,
            topic: (number == 1).then(|| "garden/module/84cca8abcdef/tele/data".to_string()),
            payload: Bytes::copy_from_slice(payload),
        }
    }

    fn buffer() -> FragmentBuffer {
        FragmentBuffer::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_single_fragment_completes() {
        let buffer = buffer();
        let result = buffer.accept(fragment([1, 1, 1], 1, 1, b"{}")).await.unwrap();

        assert_eq!(
            result,
            Reassembly::Complete {
                topic: Some("garden/module/84cca8abcdef/tele/data".into()),
                payload: Bytes::from_static(b"{}"),
            }
        );
        assert_eq!(buffer.pending().await, 0);
    }

    #[tokio::test]
    async fn test_out_of_order_arrival() {
        let buffer = buffer();
        let id = [7, 7, 7];

        assert!(matches!(
            buffer.accept(fragment(id, 3, 3, b"ghi")).await.unwrap(),
            Reassembly::Pending { received: 1, .. }
        ));
        assert!(matches!(
            buffer.accept(fragment(id, 1, 3, b"abc")).await.unwrap(),
            Reassembly::Pending { received: 2, total: 3 }
        ));

        match buffer.accept(fragment(id, 2, 3, b"def")).await.unwrap() {
            Reassembly::Complete { payload, .. } => assert_eq!(&payload[..], b"abcdefghi"),
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_fragment_never_completes() {
        let buffer = buffer();
        let id = [2, 2, 2];

        buffer.accept(fragment(id, 1, 3, b"a")).await.unwrap();
        let result = buffer.accept(fragment(id, 3, 3, b"c")).await.unwrap();

        assert!(matches!(result, Reassembly::Pending { received: 2, total: 3 }));
        assert_eq!(buffer.pending().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_aborts_and_buffer_restarts() {
        let buffer = buffer();
        let id = [3, 3, 3];

        buffer.accept(fragment(id, 1, 3, b"a")).await.unwrap();
        buffer.accept(fragment(id, 2, 3, b"b")).await.unwrap();
        let result = buffer.accept(fragment(id, 2, 3, b"b")).await;

        assert!(matches!(result, Err(GatewayError::Sequence(_))));
        assert_eq!(buffer.pending().await, 0);

        // A late fragment starts over instead of completing the old message
        let result = buffer.accept(fragment(id, 3, 3, b"c")).await.unwrap();
        assert!(matches!(result, Reassembly::Pending { received: 1, .. }));
    }

    #[tokio::test]
    async fn test_correlation_ids_are_independent() {
        let buffer = buffer();

        buffer.accept(fragment([1, 0, 0], 1, 2, b"a")).await.unwrap();
        buffer.accept(fragment([2, 0, 0], 1, 2, b"x")).await.unwrap();
        let done = buffer.accept(fragment([1, 0, 0], 2, 2, b"b")).await.unwrap();

        assert!(matches!(done, Reassembly::Complete { .. }));
        assert_eq!(buffer.pending().await, 1);
    }

    #[tokio::test]
    async fn test_stale_buffers_are_evicted() {
        let buffer = FragmentBuffer::new(Duration::from_millis(20));
        buffer.accept(fragment([9, 9, 9], 1, 2, b"a")).await.unwrap();

        assert!(buffer.evict_stale().await.is_empty());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(buffer.evict_stale().await, vec![CorrelationId([9, 9, 9])]);
        assert_eq!(buffer.pending().await, 0);
    }
}

//! Cache telemetry event bus.
//!
//! The engine does not render anything itself; it broadcasts hit, miss,
//! store and eviction events for whatever metrics sink or UI subscribes.

use serde::Serialize;
use tokio::sync::broadcast;

use super::eviction::EvictionReason;

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HitKind {
    /// Identical normalized prompt and context.
    Exact,
    /// Signature similarity above the strategy threshold.
    Approximate,
}

/// Events emitted by the response cache.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    Hit {
        key: String,
        kind: HitKind,
        confidence: f64,
        tokens_saved: u32,
    },
    Miss {
        key: String,
    },
    Stored {
        key: String,
        strategy: String,
    },
    /// No strategy admitted the content.
    Rejected {
        key: String,
    },
    Evicted {
        key: String,
        strategy: String,
        reason: EvictionReason,
    },
}

/// Broadcast-based bus for cache events.
#[derive(Clone)]
pub struct CacheEventBus {
    tx: broadcast::Sender<CacheEvent>,
}

impl CacheEventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send an event to all subscribers. Silently drops if no subscribers.
    pub fn send(&self, event: CacheEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for CacheEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for CacheEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEventBus")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_send_receive() {
        let bus = CacheEventBus::new(16);
        let mut rx = bus.subscribe();
        bus.send(CacheEvent::Stored {
            key: "abc".into(),
            strategy: "simple_commands".into(),
        });
        match rx.recv().await.unwrap() {
            CacheEvent::Stored { key, strategy } => {
                assert_eq!(key, "abc");
                assert_eq!(strategy, "simple_commands");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_event_bus_no_subscribers_no_panic() {
        let bus = CacheEventBus::new(16);
        bus.send(CacheEvent::Miss { key: "k".into() });
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn test_cache_event_serialization() {
        let event = CacheEvent::Hit {
            key: "k".into(),
            kind: HitKind::Approximate,
            confidence: 0.75,
            tokens_saved: 120,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"hit""#));
        assert!(json.contains(r#""kind":"approximate""#));
        assert!(json.contains(r#""tokens_saved":120"#));

        let evicted = CacheEvent::Evicted {
            key: "k".into(),
            strategy: "s".into(),
            reason: EvictionReason::Capacity,
        };
        let json = serde_json::to_string(&evicted).unwrap();
        assert!(json.contains(r#""reason":"capacity""#));
    }
}

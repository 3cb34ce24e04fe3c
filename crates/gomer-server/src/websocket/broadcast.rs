//! Envelope fan-out to registered viewers.
//!
//! One broadcast serializes its envelope once, takes a registry snapshot,
//! dispatches one task per recipient on a [`JoinSet`] and waits for all of
//! them. A failing recipient never stops delivery to the others.

use std::sync::Arc;

use gomer_core::{ConnectionId, Envelope};
use metrics::counter;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::connection::{ClientConnection, SendError};
use super::registry::ConnectionRegistry;
use crate::metrics::{BROADCASTS_TOTAL, WS_SEND_FAILURES_TOTAL};

/// Every recipient in the snapshot got the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections targeted.
    pub recipients: usize,
    /// Connections whose send completed.
    pub delivered: usize,
}

/// One recipient's failed send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// The target, when the failed task could still be attributed.
    pub connection: Option<ConnectionId>,
    /// Why the send failed.
    pub error: SendError,
}

/// A broadcast that did not reach every recipient.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The envelope could not be encoded; nothing was sent.
    #[error("failed to serialize {kind} envelope: {source}")]
    Serialize {
        /// Envelope kind.
        kind: &'static str,
        /// Encoder error.
        #[source]
        source: serde_json::Error,
    },
    /// Some sends failed; the rest were delivered.
    #[error("{} of {recipients} sends failed", failures.len())]
    Delivery {
        /// Connections targeted.
        recipients: usize,
        /// Connections whose send completed.
        delivered: usize,
        /// Every failed send.
        failures: Vec<DeliveryFailure>,
    },
}

/// Sends envelopes to the connections in a [`ConnectionRegistry`].
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Broadcast over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Send `envelope` to every registered connection except `exclude`.
    ///
    /// Returns once every dispatched send has completed or failed. Connections
    /// registered after the call starts are not included.
    pub async fn broadcast(
        &self,
        envelope: &Envelope,
        exclude: Option<&ConnectionId>,
    ) -> Result<BroadcastReport, BroadcastError> {
        let kind = envelope.kind();
        let json = serde_json::to_string(envelope)
            .map(Arc::new)
            .map_err(|source| BroadcastError::Serialize { kind, source })?;

        let targets: Vec<Arc<ClientConnection>> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|c| exclude != Some(&c.id))
            .collect();
        let recipients = targets.len();
        counter!(BROADCASTS_TOTAL, "kind" => kind).increment(1);

        let mut tasks = JoinSet::new();
        for conn in targets {
            let json = Arc::clone(&json);
            let _ = tasks.spawn(async move {
                let result = conn.send(json).await;
                (conn.id.clone(), result)
            });
        }

        let mut delivered = 0;
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => delivered += 1,
                Ok((id, Err(error))) => {
                    warn!(connection_id = %id, kind, error = %error, "failed to send to viewer");
                    failures.push(DeliveryFailure {
                        connection: Some(id),
                        error,
                    });
                }
                Err(e) => {
                    warn!(kind, error = %e, "broadcast dispatch task failed");
                    failures.push(DeliveryFailure {
                        connection: None,
                        error: SendError::Aborted(e.to_string()),
                    });
                }
            }
        }

        debug!(kind, recipients, delivered, "broadcast complete");
        if failures.is_empty() {
            Ok(BroadcastReport {
                recipients,
                delivered,
            })
        } else {
            counter!(WS_SEND_FAILURES_TOTAL).increment(failures.len() as u64);
            Err(BroadcastError::Delivery {
                recipients,
                delivered,
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;

    fn add(
        registry: &ConnectionRegistry,
        id: &str,
        capacity: usize,
    ) -> mpsc::Receiver<Arc<String>> {
        let (tx, rx) = mpsc::channel(capacity);
        registry.add(Arc::new(ClientConnection::new(
            id.into(),
            tx,
            Duration::from_millis(50),
        )));
        rx
    }

    fn setup() -> (Arc<ConnectionRegistry>, Broadcaster) {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        (registry, broadcaster)
    }

    #[tokio::test]
    async fn reaches_every_connection() {
        let (registry, broadcaster) = setup();
        let mut rx1 = add(&registry, "c1", 4);
        let mut rx2 = add(&registry, "c2", 4);

        let report = broadcaster
            .broadcast(&Envelope::run_result("hi\n"), None)
            .await
            .unwrap();
        assert_eq!(
            report,
            BroadcastReport {
                recipients: 2,
                delivered: 2
            }
        );

        for rx in [&mut rx1, &mut rx2] {
            let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(frame["type"], "runResult");
            assert_eq!(frame["data"]["output"], "hi\n");
        }
    }

    #[tokio::test]
    async fn excludes_sender() {
        let (registry, broadcaster) = setup();
        let mut sender = add(&registry, "sender", 4);
        let mut other = add(&registry, "other", 4);

        let report = broadcaster
            .broadcast(&Envelope::code_update("x"), Some(&"sender".into()))
            .await
            .unwrap();
        assert_eq!(report.recipients, 1);
        assert!(other.try_recv().is_ok());
        assert!(sender.try_recv().is_err());
    }

    #[tokio::test]
    async fn removed_connection_is_not_targeted() {
        let (registry, broadcaster) = setup();
        let mut receivers: Vec<_> = (0..4).map(|i| add(&registry, &format!("c{i}"), 4)).collect();
        let _ = registry.remove(&"c2".into());

        let report = broadcaster
            .broadcast(&Envelope::run_result("x"), None)
            .await
            .unwrap();
        assert_eq!(report.delivered, 3);
        assert!(receivers[2].try_recv().is_err());
        for (i, rx) in receivers.iter_mut().enumerate() {
            if i != 2 {
                assert!(rx.try_recv().is_ok());
            }
        }
    }

    #[tokio::test]
    async fn empty_registry_is_ok() {
        let (_registry, broadcaster) = setup();
        let report = broadcaster
            .broadcast(&Envelope::run_result("x"), None)
            .await
            .unwrap();
        assert_eq!(report.recipients, 0);
    }

    #[tokio::test]
    async fn failures_are_collected_without_stopping_others() {
        let (registry, broadcaster) = setup();
        drop(add(&registry, "gone-a", 4));
        drop(add(&registry, "gone-b", 4));
        let mut healthy = add(&registry, "healthy", 4);

        let err = broadcaster
            .broadcast(&Envelope::run_result("x"), None)
            .await
            .unwrap_err();
        let BroadcastError::Delivery {
            recipients,
            delivered,
            failures,
        } = err
        else {
            panic!("expected delivery error");
        };
        assert_eq!(recipients, 3);
        assert_eq!(delivered, 1);
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| f.error == SendError::Closed));
        assert!(healthy.try_recv().is_ok());
    }

    #[tokio::test]
    async fn slow_viewer_times_out() {
        let (registry, broadcaster) = setup();
        let _stalled = add(&registry, "stalled", 1);
        registry
            .get(&"stalled".into())
            .unwrap()
            .send(Arc::new("filler".into()))
            .await
            .unwrap();

        let err = broadcaster
            .broadcast(&Envelope::run_result("x"), None)
            .await
            .unwrap_err();
        let BroadcastError::Delivery { failures, .. } = err else {
            panic!("expected delivery error");
        };
        assert_eq!(failures[0].connection, Some("stalled".into()));
        assert!(matches!(failures[0].error, SendError::Timeout(_)));
    }

    #[test]
    fn delivery_error_display() {
        let err = BroadcastError::Delivery {
            recipients: 3,
            delivered: 1,
            failures: vec![
                DeliveryFailure {
                    connection: Some("a".into()),
                    error: SendError::Closed,
                },
                DeliveryFailure {
                    connection: None,
                    error: SendError::Aborted("panicked".into()),
                },
            ],
        };
        assert_eq!(err.to_string(), "2 of 3 sends failed");
    }
}

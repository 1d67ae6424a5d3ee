//! Row-change notifications. Writers publish after a write succeeds; every
//! subscriber gets its own receiver. A subscriber that falls behind loses the
//! oldest events (last write observed wins on the client).

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::types::{ChangeAction, ChangeEvent, Table};

#[derive(Clone)]
pub struct Realtime {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Realtime {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish a change. Having no subscribers is not an error.
    pub fn publish<T: Serialize>(&self, table: Table, action: ChangeAction, record: &T) {
        let record = match serde_json::to_value(record) {
            Ok(v) => v,
            Err(e) => {
                warn!(%table, "Dropping change event, record not serializable: {e}");
                return;
            }
        };
        let event = ChangeEvent { table, action, record };
        match self.tx.send(event) {
            Ok(n) => debug!(%table, ?action, subscribers = n, "Change published"),
            Err(_) => debug!(%table, ?action, "Change published with no subscribers"),
        }
    }
}

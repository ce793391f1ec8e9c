//! Append-only history recording.

use catalog::{CatalogStore, NewHistoryRecord};

/// Appends one immutable audit record per fulfilled line item.
///
/// A failed write is logged and counted but never invalidates a sale: by the
/// time history is written the inventory row has already transitioned, and
/// the inventory row is the source of truth.
#[derive(Debug, Clone)]
pub struct HistoryRecorder<S> {
    store: S,
}

impl<S: CatalogStore> HistoryRecorder<S> {
    /// Creates a recorder over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Appends the entry. Returns whether the write succeeded.
    pub async fn record(&self, entry: NewHistoryRecord) -> bool {
        let transaction_id = entry.generated_id.clone();
        match self.store.insert_history(entry).await {
            Ok(()) => true,
            Err(e) => {
                metrics::counter!("history_write_failures_total").increment(1);
                tracing::error!(
                    %transaction_id,
                    error = %e,
                    "history write failed; sale remains valid"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use catalog::{CatalogStore, InMemoryCatalogStore};
    use common::TransactionId;

    use super::*;

    #[tokio::test]
    async fn record_appends_to_history() {
        let store = InMemoryCatalogStore::new();
        let recorder = HistoryRecorder::new(store.clone());

        let recorded = recorder
            .record(NewHistoryRecord::success(
                "b@y.com",
                "Netflix Premium",
                "NFX-01",
                TransactionId::new("NFX-0000000001"),
            ))
            .await;

        assert!(recorded);
        assert_eq!(store.history_count().await, 1);
        let records = store.recent_history(10).await.unwrap();
        assert_eq!(records[0].product_name, "Netflix Premium");
    }
}

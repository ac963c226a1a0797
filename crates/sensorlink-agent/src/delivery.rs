//! Chunked history delivery.
//!
//! The engine answers one historical request: it collects every matching
//! sample, refuses the request as a whole when the quota is exceeded, and
//! otherwise streams the samples in timestamp order as bounded chunks
//! followed by one final emission.

use crate::config::EngineOptions;
use crate::storage::{Sample, StorageAdapter, StorageError};
use crate::transport::TransportError;
use async_trait::async_trait;
use sensorlink_core::field::Field;
use sensorlink_core::request::{ProtocolError, Request};
use sensorlink_core::tree::{NodeContainer, NodeRef, Response};
use std::sync::Arc;

/// One message produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    /// A full chunk; more data follows
    Fields(Response),
    /// The remaining data, possibly empty
    Done(Response),
}

/// Receiver of engine output.
#[async_trait]
pub trait EmissionSink: Send {
    /// Deliver one emission.
    async fn emit(&mut self, emission: Emission) -> Result<(), TransportError>;

    /// Whether the requester withdrew the request.
    fn is_cancelled(&self) -> bool;
}

/// How a delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// All data was emitted
    Completed {
        /// Chunks emitted before the final emission
        chunks: usize,
        /// Samples delivered
        samples: usize,
    },
    /// Delivery stopped at a chunk boundary after a cancel
    Cancelled {
        /// Chunks emitted before stopping
        chunks: usize,
    },
}

/// Streams stored history as bounded chunks.
#[derive(Clone)]
pub struct DeliveryEngine {
    storage: Arc<dyn StorageAdapter>,
    options: EngineOptions,
}

impl DeliveryEngine {
    /// Create an engine over a storage adapter.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageAdapter>, options: EngineOptions) -> Self {
        Self { storage, options }
    }

    /// Engine limits.
    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Deliver the history selected by `request` into `sink`.
    ///
    /// Unsupported flags, storage failures, corrupt samples and quota
    /// violations are all detected before anything is emitted; only a failing
    /// sink can end a delivery after the first chunk.
    ///
    /// # Errors
    ///
    /// Returns error if the window is unsupported, storage fails, the quota is
    /// exceeded or the sink cannot deliver.
    pub async fn deliver(
        &self,
        request: &Request,
        sink: &mut dyn EmissionSink,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let (from, to) = request.history_window()?;
        let samples = self.collect(request, from, to).await?;
        let total = samples.len();
        let chunk_size = self.options.chunk_size.max(1);

        let mut buffer = Response::new(request.id.as_str());
        let mut chunks = 0;

        for (index, (node, timestamp, field)) in samples.into_iter().enumerate() {
            buffer
                .node_entry(&node)
                .timestamp_entry(&timestamp)
                .add_field(field);

            if index + 1 >= (chunks + 1) * chunk_size {
                if sink.is_cancelled() {
                    return Ok(cancelled(request, chunks));
                }
                let mut chunk = std::mem::replace(&mut buffer, Response::new(request.id.as_str()));
                chunk.more = true;
                sink.emit(Emission::Fields(chunk)).await?;
                chunks += 1;
                tracing::debug!(request_id = %request.id, chunk = chunks, "Emitted history chunk");
            }
        }

        if sink.is_cancelled() {
            return Ok(cancelled(request, chunks));
        }
        sink.emit(Emission::Done(buffer)).await?;

        tracing::info!(
            request_id = %request.id,
            samples = total,
            chunks,
            "History delivered"
        );
        Ok(DeliveryOutcome::Completed {
            chunks,
            samples: total,
        })
    }

    /// Query every selected (node, field) pair, convert the samples to fields
    /// and sort the union by time.
    async fn collect(
        &self,
        request: &Request,
        from: &str,
        to: &str,
    ) -> Result<Vec<(NodeRef, String, Field)>, DeliveryError> {
        let nodes: Vec<NodeRef> = if request.node_set().is_empty() {
            self.storage
                .nodes()
                .await?
                .into_iter()
                .map(NodeRef::new)
                .collect()
        } else {
            request.nodes().cloned().collect()
        };

        let limit = self.options.max_history_records;
        let mut collected = Vec::new();

        for node in nodes {
            let fields: Vec<String> = if request.fields().is_empty() {
                self.storage.field_names(node.id()).await?
            } else {
                request.fields().keys().map(ToString::to_string).collect()
            };

            for field in fields {
                let samples = self.storage.range_query(node.id(), &field, from, to).await?;
                if collected.len() + samples.len() > limit {
                    tracing::warn!(
                        request_id = %request.id,
                        node_id = node.id(),
                        field = %field,
                        limit,
                        "History quota exceeded"
                    );
                    return Err(DeliveryError::QuotaExceeded {
                        node: node.id().to_string(),
                        field,
                        limit,
                    });
                }
                for sample in samples {
                    collected.push(entry(&node, sample)?);
                }
            }
        }

        collected.sort_by(|(_, a, _), (_, b, _)| a.cmp(b));
        Ok(collected)
    }
}

fn entry(node: &NodeRef, sample: Sample) -> Result<(NodeRef, String, Field), StorageError> {
    let field = sample
        .to_field()
        .map_err(|e| StorageError(format!("corrupt sample for {}: {e}", node.id())))?;
    Ok((node.clone(), sample.timestamp, field))
}

fn cancelled(request: &Request, chunks: usize) -> DeliveryOutcome {
    tracing::info!(request_id = %request.id, chunks, "History delivery cancelled");
    DeliveryOutcome::Cancelled { chunks }
}

/// Errors that abort a delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The request's window flags cannot be served
    #[error(transparent)]
    UnsupportedFlags(#[from] ProtocolError),
    /// More samples match than the quota allows
    #[error("too many history records for node '{node}', field '{field}': limit is {limit}")]
    QuotaExceeded {
        /// Node whose samples crossed the limit
        node: String,
        /// Field whose samples crossed the limit
        field: String,
        /// Configured quota
        limit: usize,
    },
    /// The storage adapter failed
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// An emission could not be delivered
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::sample;
    use crate::storage::MemoryStore;
    use std::time::Duration;

    /// Records emissions; cancels after a given number of chunks.
    #[derive(Default)]
    struct RecordingSink {
        emissions: Vec<Emission>,
        cancel_after: Option<usize>,
    }

    #[async_trait]
    impl EmissionSink for RecordingSink {
        async fn emit(&mut self, emission: Emission) -> Result<(), TransportError> {
            self.emissions.push(emission);
            Ok(())
        }

        fn is_cancelled(&self) -> bool {
            self.cancel_after
                .is_some_and(|after| self.emissions.len() >= after)
        }
    }

    fn options(max: usize, chunk: usize) -> EngineOptions {
        EngineOptions {
            max_history_records: max,
            chunk_size: chunk,
            session_timeout: Duration::from_secs(60),
        }
    }

    async fn store_with(count: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for i in 0..count {
            let ts = format!("2020-01-01T{:02}:{:02}:00", i / 60, i % 60);
            store
                .append(sample("pump1", "temperature", &ts, &i.to_string()))
                .await
                .unwrap();
        }
        store
    }

    fn pump_request() -> Request {
        let mut request = Request::history("42", "2020-01-01", "2020-01-02");
        request.add_node("pump1", None, None);
        request.add_field("temperature");
        request
    }

    fn values(emission: &Emission) -> Vec<String> {
        let (Emission::Fields(resp) | Emission::Done(resp)) = emission;
        resp.nodes()
            .flat_map(|node| node.timestamps().iter())
            .flat_map(|ts| ts.fields().iter())
            .map(|field| field.value().text().to_string())
            .collect()
    }

    #[tokio::test]
    async fn quota_exceeded_emits_nothing() {
        let engine = DeliveryEngine::new(store_with(120).await, options(100, 50));
        let mut sink = RecordingSink::default();

        let err = engine.deliver(&pump_request(), &mut sink).await.unwrap_err();

        assert_eq!(
            err,
            DeliveryError::QuotaExceeded {
                node: "pump1".to_string(),
                field: "temperature".to_string(),
                limit: 100,
            }
        );
        assert!(err.to_string().contains("pump1"));
        assert!(sink.emissions.is_empty());
    }

    #[tokio::test]
    async fn chunks_of_fifty_then_remainder() {
        let engine = DeliveryEngine::new(store_with(120).await, options(1000, 50));
        let mut sink = RecordingSink::default();

        let outcome = engine.deliver(&pump_request(), &mut sink).await.unwrap();

        assert_eq!(
            outcome,
            DeliveryOutcome::Completed {
                chunks: 2,
                samples: 120
            }
        );
        assert_eq!(sink.emissions.len(), 3);
        assert!(matches!(&sink.emissions[0], Emission::Fields(r) if r.more && r.field_count() == 50));
        assert!(matches!(&sink.emissions[1], Emission::Fields(r) if r.field_count() == 50));
        assert!(matches!(&sink.emissions[2], Emission::Done(r) if !r.more && r.field_count() == 20));

        let delivered: Vec<String> = sink.emissions.iter().flat_map(values).collect();
        let expected: Vec<String> = (0..120).map(|i| i.to_string()).collect();
        assert_eq!(delivered, expected);
    }

    #[tokio::test]
    async fn chunk_count_is_floor_of_samples_over_size() {
        for (count, chunk) in [(100, 50), (99, 50), (7, 3), (0, 10), (5, 1)] {
            let engine = DeliveryEngine::new(store_with(count).await, options(1000, chunk));
            let mut sink = RecordingSink::default();
            engine.deliver(&pump_request(), &mut sink).await.unwrap();

            let fields = sink
                .emissions
                .iter()
                .filter(|e| matches!(e, Emission::Fields(_)))
                .count();
            assert_eq!(fields, count / chunk, "{count} samples, chunk {chunk}");
            assert!(matches!(sink.emissions.last(), Some(Emission::Done(_))));
        }
    }

    #[tokio::test]
    async fn exact_multiple_ends_with_empty_done() {
        let engine = DeliveryEngine::new(store_with(100).await, options(1000, 50));
        let mut sink = RecordingSink::default();
        engine.deliver(&pump_request(), &mut sink).await.unwrap();

        match sink.emissions.last() {
            Some(Emission::Done(resp)) => assert!(resp.is_empty()),
            other => panic!("unexpected final emission: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsupported_window_rejected_before_query() {
        let engine = DeliveryEngine::new(store_with(10).await, options(5, 50));
        let mut request = pump_request();
        request.when = Some("2020-01-01T12:00:00".to_string());
        let mut sink = RecordingSink::default();

        let err = engine.deliver(&request, &mut sink).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "advanced historical flags not implemented"
        );
        assert!(sink.emissions.is_empty());
    }

    #[tokio::test]
    async fn empty_selection_reads_everything_stored() {
        let store = Arc::new(MemoryStore::new());
        store.append(sample("pump1", "temperature", "2020-01-01T02", "2.5")).await.unwrap();
        store.append(sample("pump2", "pressure", "2020-01-01T01", "1.5")).await.unwrap();
        store.append(sample("pump3", "flow", "2019-12-31T23", "9.5")).await.unwrap();
        let engine = DeliveryEngine::new(store, options(1000, 10));

        let mut sink = RecordingSink::default();
        let request = Request::history("1", "2020-01-01", "2020-01-02");
        engine.deliver(&request, &mut sink).await.unwrap();

        assert_eq!(sink.emissions.len(), 1);
        assert_eq!(values(&sink.emissions[0]), vec!["1.5", "2.5"]);
        let Emission::Done(resp) = &sink.emissions[0] else {
            panic!("expected done");
        };
        assert!(resp.node("pump3").is_none());
    }

    #[tokio::test]
    async fn corrupt_sample_fails_before_any_chunk() {
        let store = store_with(120).await;
        store
            .append(sample("pump1", "temperature", "2020-01-01T01:10:30", "not-a-number"))
            .await
            .unwrap();
        let engine = DeliveryEngine::new(store, options(1000, 50));
        let mut sink = RecordingSink::default();

        let err = engine.deliver(&pump_request(), &mut sink).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Storage(_)));
        assert!(err.to_string().contains("pump1"));
        assert!(sink.emissions.is_empty());
    }

    #[tokio::test]
    async fn empty_pair_still_completes() {
        let engine = DeliveryEngine::new(store_with(0).await, options(1000, 10));
        let mut sink = RecordingSink::default();

        let outcome = engine.deliver(&pump_request(), &mut sink).await.unwrap();
        assert_eq!(
            outcome,
            DeliveryOutcome::Completed {
                chunks: 0,
                samples: 0
            }
        );
        assert_eq!(sink.emissions, vec![Emission::Done(Response::new("42"))]);
    }

    #[tokio::test]
    async fn cancel_stops_at_chunk_boundary() {
        let engine = DeliveryEngine::new(store_with(120).await, options(1000, 50));
        let mut sink = RecordingSink {
            cancel_after: Some(1),
            ..RecordingSink::default()
        };

        let outcome = engine.deliver(&pump_request(), &mut sink).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Cancelled { chunks: 1 });
        assert_eq!(sink.emissions.len(), 1);
    }
}

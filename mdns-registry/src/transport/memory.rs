//! In-process multicast segment.
//!
//! Every [`MemoryTransport`] joined to a [`Segment`] sees every packet sent on
//! it (including its own, like IP multicast loopback) after the segment's
//! latency. Each endpoint keeps its own record cache and answers queries from
//! it, which is enough to exercise probing and conflicts between "hosts"
//! without a network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared::types::{names_equal, Packet, RecordType, ResourceRecord};
use crate::error::TransportError;
use super::{Transport, TransportEvent};

/// Delivery delay used by [`Segment::new`]
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(2);

/// A packet sent by an endpoint, kept for inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Query { name: String, record_type: RecordType },
    Response(Vec<ResourceRecord>),
}

pub struct Segment {
    endpoints: Mutex<Vec<Weak<Endpoint>>>,
    latency: Duration,
}

impl Segment {
    pub fn new() -> Arc<Self> {
        Self::with_latency(DEFAULT_LATENCY)
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new(Vec::new()),
            latency,
        })
    }

    /// Attach a new endpoint (a simulated host) to the segment
    pub fn join(self: &Arc<Self>) -> MemoryTransport {
        let endpoint = Arc::new(Endpoint::default());

        let mut endpoints = self.endpoints.lock();
        endpoints.retain(|e| e.strong_count() > 0);
        endpoints.push(Arc::downgrade(&endpoint));

        MemoryTransport {
            endpoint,
            segment: Arc::clone(self),
        }
    }

    fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.lock().iter().filter_map(Weak::upgrade).collect()
    }

    /// Deliver `event` to every endpoint after the segment latency.
    /// Must be called from within a Tokio runtime.
    fn multicast(&self, event: TransportEvent) {
        let endpoints = self.endpoints();
        let latency = self.latency;
        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            for endpoint in endpoints {
                endpoint.dispatch(&event);
            }
        });
    }
}

#[derive(Default)]
struct Endpoint {
    cache: Mutex<Vec<ResourceRecord>>,
    listeners: Mutex<Vec<flume::Sender<TransportEvent>>>,
    sent: Mutex<Vec<Outgoing>>,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

impl Endpoint {
    fn dispatch(&self, event: &TransportEvent) {
        // A send only fails once the receiver is gone
        self.listeners
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn answers(&self, name: &str, record_type: RecordType) -> Vec<ResourceRecord> {
        self.cache
            .lock()
            .iter()
            .filter(|rr| names_equal(&rr.name, name) && record_type.matches(rr.record_type()))
            .cloned()
            .collect()
    }
}

/// One host's view of a [`Segment`]
pub struct MemoryTransport {
    endpoint: Arc<Endpoint>,
    segment: Arc<Segment>,
}

impl MemoryTransport {
    /// Everything this endpoint has put on the wire, oldest first
    pub fn sent(&self) -> Vec<Outgoing> {
        self.endpoint.sent.lock().clone()
    }

    /// Names this endpoint has queried, oldest first
    pub fn queries(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|out| match out {
                Outgoing::Query { name, .. } => Some(name),
                Outgoing::Response(_) => None,
            })
            .collect()
    }

    /// Record sets this endpoint has broadcast, oldest first
    pub fn responses(&self) -> Vec<Vec<ResourceRecord>> {
        self.sent()
            .into_iter()
            .filter_map(|out| match out {
                Outgoing::Response(records) => Some(records),
                Outgoing::Query { .. } => None,
            })
            .collect()
    }

    pub fn cached(&self) -> Vec<ResourceRecord> {
        self.endpoint.cache.lock().clone()
    }

    /// Make every following query/respond fail until reset
    pub fn set_fail_sends(&self, fail: bool) {
        self.endpoint.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Leave the segment for good: every following query/respond fails with
    /// [`TransportError::Closed`] and nothing reaches this endpoint anymore.
    pub fn close(&self) {
        self.endpoint.closed.store(true, Ordering::SeqCst);
        self.endpoint.listeners.lock().clear();
        self.segment
            .endpoints
            .lock()
            .retain(|e| e.upgrade().is_some_and(|e| !Arc::ptr_eq(&e, &self.endpoint)));
    }

    /// Hand `packet` to this endpoint's subscribers right away, as if it had
    /// just arrived from the wire.
    pub fn inject(&self, packet: Packet) {
        self.endpoint.dispatch(&TransportEvent::Response(packet));
    }

    /// Report a channel error to this endpoint's subscribers
    pub fn inject_error(&self, reason: impl Into<String>) {
        self.endpoint.dispatch(&TransportEvent::Error(reason.into()));
    }

    fn check_send(&self, kind: &'static str) -> Result<(), TransportError> {
        if self.endpoint.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.endpoint.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send {
                kind,
                reason: "simulated send failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn query(&self, name: &str, record_type: RecordType) -> Result<(), TransportError> {
        self.check_send("query")?;
        self.endpoint.sent.lock().push(Outgoing::Query {
            name: name.to_string(),
            record_type,
        });

        let answers: Vec<ResourceRecord> = self
            .segment
            .endpoints()
            .iter()
            .flat_map(|endpoint| endpoint.answers(name, record_type))
            .collect();

        if !answers.is_empty() {
            tracing::trace!("{} cached record(s) answer query for {}", answers.len(), name);
            self.segment
                .multicast(TransportEvent::Response(Packet::with_answers(answers)));
        }
        Ok(())
    }

    async fn respond(&self, records: Vec<ResourceRecord>) -> Result<(), TransportError> {
        self.check_send("response")?;
        self.endpoint.sent.lock().push(Outgoing::Response(records.clone()));
        self.segment
            .multicast(TransportEvent::Response(Packet::with_answers(records)));
        Ok(())
    }

    fn register(&self, records: &[ResourceRecord]) {
        let mut cache = self.endpoint.cache.lock();
        for record in records {
            if !cache.iter().any(|cached| cached.same_record(record)) {
                cache.push(record.clone());
            }
        }
    }

    fn unregister(&self, records: &[ResourceRecord]) {
        self.endpoint
            .cache
            .lock()
            .retain(|cached| !records.iter().any(|r| r.same_record(cached)));
    }

    fn subscribe(&self) -> flume::Receiver<TransportEvent> {
        let (tx, rx) = flume::unbounded();
        self.endpoint.listeners.lock().push(tx);
        rx
    }
}

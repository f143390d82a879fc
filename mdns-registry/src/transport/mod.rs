//! Multicast transport abstraction.
//!
//! The registry never touches sockets itself. Everything it puts on the wire
//! goes through a [`Transport`], which also owns the local record cache used
//! to answer other hosts' queries.

pub mod memory;

use async_trait::async_trait;
use shared::types::{Packet, RecordType, ResourceRecord};
use crate::error::TransportError;

pub use memory::{MemoryTransport, Outgoing, Segment};

/// Events delivered to transport subscribers
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An mDNS response arrived
    Response(Packet),
    /// The underlying channel reported an error
    Error(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Multicast a question for `name`.
    async fn query(&self, name: &str, record_type: RecordType) -> Result<(), TransportError>;

    /// Multicast an unsolicited response carrying `records`.
    async fn respond(&self, records: Vec<ResourceRecord>) -> Result<(), TransportError>;

    /// Add records to the local cache so queries are answered without a round trip
    fn register(&self, records: &[ResourceRecord]);

    /// Remove records from the local cache, TTL is ignored when matching
    fn unregister(&self, records: &[ResourceRecord]);

    /// Listen for incoming events. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> flume::Receiver<TransportEvent>;
}

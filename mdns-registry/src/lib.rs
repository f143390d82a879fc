//! Lifecycle management for locally advertised mDNS services (RFC 6762).
//!
//! A [`Registry`] owns the services published over one [`Transport`]. Each
//! service is probed to make sure its name is free, announced with
//! exponential backoff, renamed and retried on conflict, and withdrawn with a
//! goodbye packet when stopped.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mdns_registry::{Registry, ServiceConfig, TimingConfig};
//! use mdns_registry::transport::Segment;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(Segment::new().join());
//!     let registry = Registry::new(transport, TimingConfig::default());
//!
//!     let service = registry.publish(ServiceConfig::new("Printer", "http", 80));
//!     let mut events = service.subscribe();
//!     println!("{:?}", events.recv().await?);
//!
//!     registry.unpublish_all().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod records;
pub mod registry;
pub mod service;
pub mod transport;

mod mdns;

pub use config::{Config, ServiceConfig, TimingConfig};
pub use error::{ConfigError, TransportError};
pub use records::{DnsSdRecords, RecordBuilder};
pub use registry::Registry;
pub use service::{Phase, Service, ServiceEvent, ServiceSnapshot};
pub use transport::{Transport, TransportEvent};

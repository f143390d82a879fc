//! The set of services advertised over one transport.

use std::future::Future;
use std::sync::{Arc, Weak};
use parking_lot::{Mutex, MutexGuard};
use crate::config::{ServiceConfig, TimingConfig};
use crate::error::TransportError;
use crate::mdns::{announce, conflict, probe, teardown::Teardown};
use crate::mdns::probe::ProbeOutcome;
use crate::records::{DnsSdRecords, RecordBuilder};
use crate::service::{Service, ServiceEvent};
use crate::transport::{Transport, TransportEvent};

pub(crate) struct RegistryInner {
    transport: Arc<dyn Transport>,
    records: Arc<dyn RecordBuilder>,
    timing: TimingConfig,
    /// Services currently started, in start order
    active: Mutex<Vec<Service>>,
}

impl RegistryInner {
    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn shared_transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub(crate) fn records(&self) -> &dyn RecordBuilder {
        self.records.as_ref()
    }

    /// Begin a new cycle for `service`: probe (optionally), then announce.
    pub(crate) fn start(self: &Arc<Self>, service: &Service, with_probe: bool) {
        let cycle = {
            let mut active = self.active.lock();
            let Some(cycle) = service.activate(with_probe) else {
                return;
            };
            if !active.iter().any(|s| s.same(service)) {
                active.push(service.clone());
            }
            cycle
        };

        self.spawn_cycle(service, cycle, with_probe);
    }

    /// Services currently started. Take this lock before a service's own
    /// state whenever both are needed.
    pub(crate) fn active(&self) -> MutexGuard<'_, Vec<Service>> {
        self.active.lock()
    }

    /// Run `cycle` of `service` on its own task
    pub(crate) fn spawn_cycle(self: &Arc<Self>, service: &Service, cycle: u64, with_probe: bool) {
        tracing::debug!("Starting {} (cycle {}, probe: {})", service.fqdn(), cycle, with_probe);
        tokio::spawn(Arc::clone(self).run_cycle(service.clone(), cycle, with_probe));
    }

    pub(crate) fn untrack(&self, service: &Service) {
        self.active.lock().retain(|s| !s.same(service));
    }

    async fn run_cycle(self: Arc<Self>, service: Service, cycle: u64, with_probe: bool) {
        if with_probe {
            let jitter = self.timing.probe_jitter();
            match probe::probe(self.transport(), &service, cycle, jitter, &self.timing).await {
                None => return,
                Some(ProbeOutcome::Exists) => {
                    conflict::resolve(&self, &service, cycle);
                    return;
                }
                Some(ProbeOutcome::NotExists) => {
                    if !service.enter_announcing(cycle) {
                        return;
                    }
                }
            }
        }

        announce::announce(self.transport(), self.records(), &service, cycle, &self.timing).await;
    }
}

/// Owns the services advertised over one [`Transport`].
///
/// Must be created and used from within a Tokio runtime: every start cycle
/// runs as a detached task, so pending announcements never hold up shutdown.
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn new(transport: Arc<dyn Transport>, timing: TimingConfig) -> Self {
        Self::with_record_builder(transport, timing, Arc::new(DnsSdRecords))
    }

    pub fn with_record_builder(
        transport: Arc<dyn Transport>,
        timing: TimingConfig,
        records: Arc<dyn RecordBuilder>,
    ) -> Self {
        let listener = transport.subscribe();
        let inner = Arc::new(RegistryInner {
            transport,
            records,
            timing,
            active: Mutex::new(Vec::new()),
        });

        tokio::spawn(forward_errors(Arc::downgrade(&inner), listener));

        Self { inner }
    }

    /// Create a service from `config` and start it, probing first unless
    /// `config.probe` is false.
    pub fn publish(&self, config: ServiceConfig) -> Service {
        let with_probe = config.probe;
        let service = Service::new(config, Arc::downgrade(&self.inner));

        tracing::info!("Publishing {} on port {}", service.fqdn(), service.port());
        self.inner.start(&service, with_probe);
        service
    }

    /// Withdraw every active service with one goodbye packet and forget them.
    /// Services are deactivated, dropped from the registry and their records
    /// removed from the transport cache before this returns. The goodbye goes
    /// out on its own task; the future yields its result.
    pub fn unpublish_all(&self) -> impl Future<Output = Result<(), TransportError>> + Send + 'static {
        let services = std::mem::take(&mut *self.inner.active.lock());
        Teardown::begin(self.inner.transport(), self.inner.records(), &services)
            .spawn(self.inner.shared_transport())
    }

    /// Mark every tracked service destroyed. Sends nothing: records already
    /// announced stay in the transport cache.
    pub fn destroy(&self) {
        let active = self.inner.active.lock();
        for service in active.iter() {
            service.destroy();
        }
        tracing::info!("Destroyed {} service(s)", active.len());
    }

    /// Services currently started, in start order
    pub fn services(&self) -> Vec<Service> {
        self.inner.active.lock().clone()
    }
}

/// Hand transport errors to every active service until the registry is gone.
async fn forward_errors(registry: Weak<RegistryInner>, listener: flume::Receiver<TransportEvent>) {
    while let Ok(event) = listener.recv_async().await {
        let Some(registry) = registry.upgrade() else {
            break;
        };
        if let TransportEvent::Error(reason) = event {
            tracing::warn!("Transport error: {}", reason);
            for service in registry.active.lock().iter() {
                service.emit(ServiceEvent::Error(reason.clone()));
            }
        }
    }
}

//! A locally advertised service and its lifecycle state.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use crate::config::ServiceConfig;
use crate::error::TransportError;
use crate::mdns::teardown::Teardown;
use crate::registry::RegistryInner;

/// Buffered notifications per subscriber before the slowest one lags
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Where a service is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created or stopped, nothing on the network
    Idle,
    /// Checking whether the name is free
    Probing,
    /// Broadcasting records, first broadcast not yet confirmed
    Announcing,
    /// At least one broadcast went out for the current name
    Published,
    /// Goodbye packet in flight
    TearingDown,
    /// Terminal, every pending action is a no-op
    Destroyed,
}

impl Phase {
    /// Probing, announcing or published
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Probing | Phase::Announcing | Phase::Published)
    }
}

/// Notifications delivered to [`Service::subscribe`] receivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// First broadcast of an announcement cycle succeeded
    Up { fqdn: String },
    /// The name was taken on the network and has been replaced
    Renamed { from: String, to: String },
    /// The transport reported an error
    Error(String),
}

/// Point-in-time copy of a service's state
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    pub name: String,
    pub original_name: String,
    pub name_attempt: u32,
    pub service_type: String,
    pub fqdn: String,
    pub port: u16,
    pub host: String,
    pub addresses: Vec<IpAddr>,
    pub phase: Phase,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
}

struct ServiceState {
    name: String,
    original_name: String,
    name_attempt: u32,
    service_type: String,
    port: u16,
    host: String,
    addresses: Vec<IpAddr>,
    probe: bool,
    phase: Phase,
    published: bool,
    published_at: Option<DateTime<Utc>>,
    /// Bumped on every start. Deferred work carries the cycle it was
    /// spawned for and must stop once it no longer matches.
    cycle: u64,
}

impl ServiceState {
    fn fqdn(&self) -> String {
        format!("{}.{}", self.name, self.service_type)
    }

    fn is_current(&self, cycle: u64) -> bool {
        self.cycle == cycle && self.phase.is_active()
    }
}

struct ServiceInner {
    state: Mutex<ServiceState>,
    events: broadcast::Sender<ServiceEvent>,
    registry: Weak<RegistryInner>,
}

/// Handle to a published service. Cloning yields another handle to the same
/// service.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    pub(crate) fn new(config: ServiceConfig, registry: Weak<RegistryInner>) -> Self {
        let host = config.host.unwrap_or_else(default_host);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let state = ServiceState {
            original_name: config.name.clone(),
            name: config.name,
            name_attempt: 1,
            service_type: config.service_type,
            port: config.port,
            host,
            addresses: config.addresses,
            probe: config.probe,
            phase: Phase::Idle,
            published: false,
            published_at: None,
            cycle: 0,
        };

        Self {
            inner: Arc::new(ServiceInner {
                state: Mutex::new(state),
                events,
                registry,
            }),
        }
    }

    pub fn name(&self) -> String {
        self.inner.state.lock().name.clone()
    }

    pub fn original_name(&self) -> String {
        self.inner.state.lock().original_name.clone()
    }

    /// 1 for the configured name, +1 for every collision since
    pub fn name_attempt(&self) -> u32 {
        self.inner.state.lock().name_attempt
    }

    pub fn service_type(&self) -> String {
        self.inner.state.lock().service_type.clone()
    }

    pub fn port(&self) -> u16 {
        self.inner.state.lock().port
    }

    /// `name + "." + type`
    pub fn fqdn(&self) -> String {
        self.inner.state.lock().fqdn()
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    pub fn is_activated(&self) -> bool {
        self.phase().is_active()
    }

    pub fn is_published(&self) -> bool {
        self.inner.state.lock().published
    }

    pub fn is_destroyed(&self) -> bool {
        self.phase() == Phase::Destroyed
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        let state = self.inner.state.lock();
        ServiceSnapshot {
            name: state.name.clone(),
            original_name: state.original_name.clone(),
            name_attempt: state.name_attempt,
            service_type: state.service_type.clone(),
            fqdn: state.fqdn(),
            port: state.port,
            host: state.host.clone(),
            addresses: state.addresses.clone(),
            phase: state.phase,
            published: state.published,
            published_at: state.published_at,
        }
    }

    /// Register an observer for this service's notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.inner.events.subscribe()
    }

    /// Start (or restart) the service on its registry. No-op while active,
    /// once destroyed, or after the registry has been dropped.
    pub fn start(&self) {
        let probe = self.inner.state.lock().probe;
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.start(self, probe);
        }
    }

    /// Withdraw the service with a goodbye packet and drop it from the
    /// registry. Deactivation, removal and cache cleanup happen before this
    /// returns. The goodbye goes out on its own task, even if the returned
    /// future is dropped; the future yields its result.
    pub fn stop(&self) -> impl Future<Output = Result<(), TransportError>> + Send + 'static {
        let goodbye = self.inner.registry.upgrade().map(|registry| {
            let teardown = Teardown::begin(registry.transport(), registry.records(), std::slice::from_ref(self));
            registry.untrack(self);
            teardown.spawn(registry.shared_transport())
        });

        async move {
            match goodbye {
                Some(goodbye) => goodbye.await,
                None => Ok(()),
            }
        }
    }

    pub(crate) fn same(&self, other: &Service) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn emit(&self, event: ServiceEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    /// Enter a new start cycle. Returns `None` if already active or destroyed.
    pub(crate) fn activate(&self, probe: bool) -> Option<u64> {
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Destroyed || state.phase.is_active() {
            return None;
        }
        state.phase = if probe { Phase::Probing } else { Phase::Announcing };
        state.published = false;
        state.cycle += 1;
        Some(state.cycle)
    }

    /// Still active in `cycle` and not destroyed
    pub(crate) fn is_current(&self, cycle: u64) -> bool {
        self.inner.state.lock().is_current(cycle)
    }

    pub(crate) fn is_probing(&self, cycle: u64) -> bool {
        let state = self.inner.state.lock();
        state.cycle == cycle && state.phase == Phase::Probing
    }

    /// Probing → Announcing once the name has been found free
    pub(crate) fn enter_announcing(&self, cycle: u64) -> bool {
        let mut state = self.inner.state.lock();
        if state.cycle != cycle || state.phase != Phase::Probing {
            return false;
        }
        state.phase = Phase::Announcing;
        true
    }

    /// Record the first successful broadcast of `cycle`. Returns the fqdn to
    /// report as up, or `None` if it was already reported or the cycle is over.
    pub(crate) fn mark_published(&self, cycle: u64) -> Option<String> {
        let mut state = self.inner.state.lock();
        if !state.is_current(cycle) || state.published {
            return None;
        }
        state.published = true;
        state.phase = Phase::Published;
        state.published_at = Some(Utc::now());
        Some(state.fqdn())
    }

    /// Deactivate and move to the next candidate name after a collision.
    /// Returns the old and new names.
    pub(crate) fn rename_after_conflict(&self, cycle: u64) -> Option<(String, String)> {
        let mut state = self.inner.state.lock();
        if state.cycle != cycle || state.phase != Phase::Probing {
            return None;
        }
        state.phase = Phase::Idle;
        state.name_attempt += 1;
        let renamed = format!("{} ({})", state.original_name, state.name_attempt);
        let previous = std::mem::replace(&mut state.name, renamed.clone());
        Some((previous, renamed))
    }

    /// Deactivate for a goodbye. Returns the cycle being torn down, or `None`
    /// if the service was not active.
    pub(crate) fn begin_teardown(&self) -> Option<u64> {
        let mut state = self.inner.state.lock();
        if !state.phase.is_active() {
            return None;
        }
        state.phase = Phase::TearingDown;
        Some(state.cycle)
    }

    /// Goodbye for `cycle` has gone out. A restart in the meantime wins.
    pub(crate) fn finish_teardown(&self, cycle: u64) {
        let mut state = self.inner.state.lock();
        if state.cycle != cycle {
            return;
        }
        state.published = false;
        if state.phase == Phase::TearingDown {
            state.phase = Phase::Idle;
        }
    }

    pub(crate) fn destroy(&self) {
        self.inner.state.lock().phase = Phase::Destroyed;
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Service")
            .field("fqdn", &state.fqdn())
            .field("phase", &state.phase)
            .field("published", &state.published)
            .finish()
    }
}

fn default_host() -> String {
    match hostname::get() {
        Ok(name) => format!("{}.local", name.to_string_lossy()),
        Err(e) => {
            tracing::warn!("Failed to get system hostname, using localhost: {}", e);
            "localhost.local".to_string()
        }
    }
}

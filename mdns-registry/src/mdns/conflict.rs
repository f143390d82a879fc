//! Name conflict handling.
//!
//! A probe that finds the name taken makes the service yield: it is renamed
//! to "<original> (<attempt>)" and started again from probing. There is no
//! simultaneous-probe tie-breaking, an existing claim always wins.

use std::sync::Arc;
use crate::registry::RegistryInner;
use crate::service::{Service, ServiceEvent};

pub(crate) fn resolve(registry: &Arc<RegistryInner>, service: &Service, cycle: u64) {
    // Rename and restart under the registry lock so a concurrent destroy
    // sees the service either before or after, never untracked
    let (renamed, restarted) = {
        let mut active = registry.active();
        let Some(renamed) = service.rename_after_conflict(cycle) else {
            drop(active);
            tracing::debug!("Ignoring conflict for {}, service moved on", service.fqdn());
            return;
        };
        active.retain(|s| !s.same(service));
        let restarted = service.activate(true);
        if restarted.is_some() {
            active.push(service.clone());
        }
        (renamed, restarted)
    };

    let (from, to) = renamed;
    tracing::warn!("Service name {} is already in use on the network, renaming to {}", from, to);
    service.emit(ServiceEvent::Renamed { from, to });

    if let Some(next) = restarted {
        registry.spawn_cycle(service, next, true);
    }
}

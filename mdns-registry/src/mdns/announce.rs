//! Announcing (RFC 6762 §8.3): repeat a service's records with growing gaps
//! so they survive packet loss on the multicast link.

use crate::config::TimingConfig;
use crate::records::RecordBuilder;
use crate::service::{Service, ServiceEvent};
use crate::transport::Transport;

/// Register `service`'s records and broadcast them until the gap reaches the
/// configured cap or the service leaves `cycle`.
pub(crate) async fn announce(
    transport: &dyn Transport,
    builder: &dyn RecordBuilder,
    service: &Service,
    cycle: u64,
    timing: &TimingConfig,
) {
    if !service.is_current(cycle) {
        tracing::debug!("Not announcing {}, service moved on", service.fqdn());
        return;
    }

    let records = builder.records(&service.snapshot());
    let fqdn = service.fqdn();
    transport.register(&records);

    let max_delay = timing.announce_max_delay();
    let mut delay = timing.announce_initial_delay();

    loop {
        match transport.respond(records.clone()).await {
            Ok(()) => {
                if let Some(fqdn) = service.mark_published(cycle) {
                    tracing::info!("Published {} ({} records)", fqdn, records.len());
                    service.emit(ServiceEvent::Up { fqdn });
                }
            }
            Err(e) => {
                tracing::debug!("Announcement of {} failed, keeping schedule: {}", fqdn, e);
            }
        }

        if !service.is_current(cycle) || delay >= max_delay {
            break;
        }
        tokio::time::sleep(delay).await;
        delay = delay.saturating_mul(timing.announce_backoff_factor);

        if !service.is_current(cycle) {
            break;
        }
    }

    tracing::debug!("Stopped announcing {}", fqdn);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Weak};
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::task::JoinHandle;
    use crate::config::ServiceConfig;
    use crate::records::DnsSdRecords;
    use crate::service::Phase;
    use crate::transport::{MemoryTransport, Segment};

    fn announcing_service() -> (Service, u64) {
        let service = Service::new(
            ServiceConfig::new("Printer", "http", 80).with_host("h.local").without_probe(),
            Weak::new(),
        );
        let cycle = service.activate(false).unwrap();
        (service, cycle)
    }

    fn spawn_announce(transport: &Arc<MemoryTransport>, service: &Service, cycle: u64) -> JoinHandle<()> {
        let transport = Arc::clone(transport);
        let service = service.clone();
        tokio::spawn(async move {
            announce(transport.as_ref(), &DnsSdRecords, &service, cycle, &TimingConfig::default()).await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_broadcast_publishes_once() {
        let transport = Arc::new(Segment::new().join());
        let (service, cycle) = announcing_service();
        let mut events = service.subscribe();
        let _handle = spawn_announce(&transport, &service, cycle);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(service.is_published());
        assert_eq!(service.phase(), Phase::Published);
        assert_eq!(transport.cached().len(), 4, "Records are cached before broadcasting");
        assert_eq!(events.try_recv().unwrap(), ServiceEvent::Up { fqdn: "Printer.http".into() });

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(transport.responses().len() > 1);
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty), "Up fires once per cycle");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule() {
        let transport = Arc::new(Segment::new().join());
        let (service, cycle) = announcing_service();
        let handle = spawn_announce(&transport, &service, cycle);

        // Broadcasts at 0s, 1s, 4s, 13s, 40s, 121s, 364s, 1093s, 3280s
        let checkpoints = [(500, 1), (1_500, 2), (4_500, 3), (13_500, 4), (40_500, 5), (121_500, 6)];
        let mut elapsed = 0;
        for (at_ms, expected) in checkpoints {
            tokio::time::sleep(Duration::from_millis(at_ms - elapsed)).await;
            elapsed = at_ms;
            assert_eq!(transport.responses().len(), expected, "at {}ms", at_ms);
        }

        tokio::time::sleep(Duration::from_secs(3_281 - 122)).await;
        assert_eq!(transport.responses().len(), 9);
        assert!(handle.is_finished(), "No broadcast once the gap reaches an hour");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_broadcast_publishes_on_retry() {
        let transport = Arc::new(Segment::new().join());
        transport.set_fail_sends(true);
        let (service, cycle) = announcing_service();
        let _handle = spawn_announce(&transport, &service, cycle);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!service.is_published());
        assert_eq!(service.phase(), Phase::Announcing);

        transport.set_fail_sends(false);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(service.is_published());
        assert_eq!(transport.responses().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivation_stops_schedule() {
        let transport = Arc::new(Segment::new().join());
        let (service, cycle) = announcing_service();
        let handle = spawn_announce(&transport, &service, cycle);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(transport.responses().len(), 2);
        service.begin_teardown();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.responses().len(), 2, "Pending broadcast must not go out");
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_turns_pending_broadcast_into_noop() {
        let transport = Arc::new(Segment::new().join());
        let (service, cycle) = announcing_service();
        let handle = spawn_announce(&transport, &service, cycle);

        tokio::time::sleep(Duration::from_millis(500)).await;
        service.destroy();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.responses().len(), 1);
        assert!(handle.is_finished());
        assert_eq!(service.phase(), Phase::Destroyed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cycle_touches_nothing() {
        let transport = Arc::new(Segment::new().join());
        let (service, cycle) = announcing_service();
        service.destroy();

        announce(transport.as_ref(), &DnsSdRecords, &service, cycle, &TimingConfig::default()).await;

        assert!(transport.sent().is_empty());
        assert!(transport.cached().is_empty(), "Nothing cached for a service that moved on");
    }
}

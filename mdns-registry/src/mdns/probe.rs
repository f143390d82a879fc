//! Probing (RFC 6762 §8.1): find out whether a candidate name is already
//! claimed before announcing it.

use std::time::Duration;
use shared::types::{names_equal, Packet, RecordType};
use crate::config::TimingConfig;
use crate::service::Service;
use crate::transport::{Transport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Someone answered for the name
    Exists,
    /// Every probe went unanswered
    NotExists,
}

/// State of one probe run. Dropping it unsubscribes from the transport.
struct ProbeContext {
    fqdn: String,
    listener: flume::Receiver<TransportEvent>,
    sent: bool,
    transmissions: u32,
}

impl ProbeContext {
    fn new(fqdn: String, listener: flume::Receiver<TransportEvent>) -> Self {
        Self {
            fqdn,
            listener,
            sent: false,
            transmissions: 0,
        }
    }

    fn claims(&self, packet: &Packet) -> bool {
        packet.records().any(|rr| names_equal(&rr.name, &self.fqdn))
    }

    /// Anything queued before the first query went out cannot be an answer
    /// to it.
    fn discard_stale(&mut self) {
        let stale = self.listener.drain().count();
        if stale > 0 {
            tracing::trace!("Discarded {} packet(s) received before probing {}", stale, self.fqdn);
        }
        self.sent = true;
    }

    /// Watch incoming responses for `window`. True as soon as one claims the name.
    async fn wait_for_claim(&self, window: Duration) -> bool {
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return false,
                event = self.listener.recv_async() => match event {
                    Ok(TransportEvent::Response(packet)) if self.claims(&packet) => return true,
                    Ok(_) => {}
                    Err(_) => {
                        // Transport gone, nothing else will arrive
                        (&mut deadline).await;
                        return false;
                    }
                },
            }
        }
    }
}

/// Probe `service`'s current fqdn. Returns `None` if the service stopped
/// probing in `cycle` before an outcome was reached.
pub(crate) async fn probe(
    transport: &dyn Transport,
    service: &Service,
    cycle: u64,
    jitter: Duration,
    timing: &TimingConfig,
) -> Option<ProbeOutcome> {
    // Listen before sending so no answer can slip through
    let mut ctx = ProbeContext::new(service.fqdn(), transport.subscribe());

    tokio::time::sleep(jitter).await;

    let outcome = loop {
        if ctx.transmissions >= timing.probe_attempts {
            break ProbeOutcome::NotExists;
        }
        if !service.is_probing(cycle) {
            tracing::debug!("Probe for {} abandoned", ctx.fqdn);
            return None;
        }

        if let Err(e) = transport.query(&ctx.fqdn, RecordType::Any).await {
            tracing::debug!("Probe query for {} failed, continuing: {}", ctx.fqdn, e);
        }
        if !ctx.sent {
            ctx.discard_stale();
        }
        ctx.transmissions += 1;
        tracing::trace!("Sent probe {}/{} for {}", ctx.transmissions, timing.probe_attempts, ctx.fqdn);

        if ctx.wait_for_claim(timing.probe_interval()).await {
            break ProbeOutcome::Exists;
        }
    };

    if !service.is_probing(cycle) {
        tracing::debug!("Probe for {} finished after the service stopped probing", ctx.fqdn);
        return None;
    }

    tracing::debug!("Probe for {} finished: {:?}", ctx.fqdn, outcome);
    Some(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Weak};
    use shared::types::{RecordData, ResourceRecord};
    use tokio::task::JoinHandle;
    use crate::config::ServiceConfig;
    use crate::transport::{MemoryTransport, Segment};

    fn claim(name: &str) -> Packet {
        Packet::with_answers(vec![ResourceRecord::new(name, 120, RecordData::Txt(Vec::new()))])
    }

    fn probing_service() -> (Service, u64) {
        let service = Service::new(ServiceConfig::new("Printer", "http", 80).with_host("h.local"), Weak::new());
        let cycle = service.activate(true).unwrap();
        (service, cycle)
    }

    fn spawn_probe(
        transport: &Arc<MemoryTransport>,
        service: &Service,
        cycle: u64,
        jitter: Duration,
    ) -> JoinHandle<Option<ProbeOutcome>> {
        let transport = Arc::clone(transport);
        let service = service.clone();
        tokio::spawn(async move {
            probe(transport.as_ref(), &service, cycle, jitter, &TimingConfig::default()).await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_probe_concludes_not_exists() {
        let transport = Arc::new(Segment::new().join());
        let (service, cycle) = probing_service();

        let outcome = spawn_probe(&transport, &service, cycle, Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(outcome, Some(ProbeOutcome::NotExists));
        assert_eq!(transport.queries(), vec!["Printer.http"; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_window_timing() {
        let transport = Arc::new(Segment::new().join());
        let (service, cycle) = probing_service();
        let handle = spawn_probe(&transport, &service, cycle, Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(90)).await;
        assert!(transport.queries().is_empty(), "Nothing is sent during the jitter");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.queries().len(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(transport.queries().len(), 2);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(transport.queries().len(), 3);
        assert!(!handle.is_finished(), "Last window still open");

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_short_circuits_remaining_probes() {
        let transport = Arc::new(Segment::new().join());
        let (service, cycle) = probing_service();
        let handle = spawn_probe(&transport, &service, cycle, Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(10)).await;
        transport.inject(claim("PRINTER.http"));

        assert_eq!(handle.await.unwrap(), Some(ProbeOutcome::Exists));
        assert_eq!(transport.queries().len(), 1, "No more probes after a claim");
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_in_additionals_counts() {
        let transport = Arc::new(Segment::new().join());
        let (service, cycle) = probing_service();
        let handle = spawn_probe(&transport, &service, cycle, Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(300)).await;
        transport.inject(Packet {
            answers: vec![],
            additionals: claim("Printer.http").answers,
        });

        assert_eq!(handle.await.unwrap(), Some(ProbeOutcome::Exists));
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_before_first_probe_is_ignored() {
        let transport = Arc::new(Segment::new().join());
        let (service, cycle) = probing_service();
        let handle = spawn_probe(&transport, &service, cycle, Duration::from_millis(100));

        // Let the probe subscribe and start its jitter
        tokio::task::yield_now().await;
        transport.inject(claim("Printer.http"));

        assert_eq!(handle.await.unwrap(), Some(ProbeOutcome::NotExists));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_names_do_not_match() {
        let transport = Arc::new(Segment::new().join());
        let (service, cycle) = probing_service();
        let handle = spawn_probe(&transport, &service, cycle, Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(10)).await;
        transport.inject(claim("Scanner.http"));
        transport.inject_error("noise");

        assert_eq!(handle.await.unwrap(), Some(ProbeOutcome::NotExists));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_errors_keep_cadence() {
        let transport = Arc::new(Segment::new().join());
        transport.set_fail_sends(true);
        let (service, cycle) = probing_service();

        let started = tokio::time::Instant::now();
        let outcome = spawn_probe(&transport, &service, cycle, Duration::ZERO).await.unwrap();

        assert_eq!(outcome, Some(ProbeOutcome::NotExists));
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(750) && elapsed < Duration::from_millis(760),
            "Three full windows expected, took {:?}",
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivated_probe_yields_nothing() {
        let transport = Arc::new(Segment::new().join());
        let (service, cycle) = probing_service();
        let handle = spawn_probe(&transport, &service, cycle, Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(50)).await;
        service.begin_teardown();

        assert_eq!(handle.await.unwrap(), None);
        assert!(transport.queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroyed_mid_window_yields_nothing() {
        let transport = Arc::new(Segment::new().join());
        let (service, cycle) = probing_service();
        let handle = spawn_probe(&transport, &service, cycle, Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(300)).await;
        service.destroy();

        assert_eq!(handle.await.unwrap(), None);
        assert_eq!(transport.queries().len(), 2, "No probe is sent after destroy");
    }
}

//! Goodbye packets (RFC 6762 §10.1).

use std::future::Future;
use std::sync::Arc;
use shared::protocol::GOODBYE_TTL;
use shared::types::ResourceRecord;
use crate::error::TransportError;
use crate::records::RecordBuilder;
use crate::service::Service;
use crate::transport::Transport;

/// A batch of services being withdrawn together. All of their records go out
/// in a single packet.
pub(crate) struct Teardown {
    /// Services deactivated by this teardown, with the cycle they were in
    services: Vec<(Service, u64)>,
    goodbye: Vec<ResourceRecord>,
}

impl Teardown {
    /// Deactivate every active service in `services`, drop its records from
    /// the transport cache and collect them with TTL 0. Inactive services are
    /// skipped.
    pub(crate) fn begin(transport: &dyn Transport, builder: &dyn RecordBuilder, services: &[Service]) -> Self {
        let mut selected = Vec::new();
        let mut goodbye = Vec::new();

        for service in services {
            let Some(cycle) = service.begin_teardown() else {
                continue;
            };
            goodbye.extend(builder.records(&service.snapshot()).into_iter().map(|mut rr| {
                rr.ttl = GOODBYE_TTL;
                rr
            }));
            selected.push((service.clone(), cycle));
        }

        if !goodbye.is_empty() {
            transport.unregister(&goodbye);
        }

        Self {
            services: selected,
            goodbye,
        }
    }

    /// Broadcast the goodbye on its own task, so it still goes out and the
    /// services still leave `TearingDown` if the returned future is dropped.
    pub(crate) fn spawn(
        self,
        transport: Arc<dyn Transport>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send + 'static {
        let handle = tokio::spawn(async move { self.send(transport.as_ref()).await });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => Err(TransportError::Closed),
            }
        }
    }

    /// Broadcast the goodbye and settle the services' state.
    pub(crate) async fn send(self, transport: &dyn Transport) -> Result<(), TransportError> {
        let Teardown { services, goodbye } = self;

        if goodbye.is_empty() {
            for (service, cycle) in &services {
                service.finish_teardown(*cycle);
            }
            return Ok(());
        }

        tracing::info!("Sending goodbye for {} service(s), {} record(s)", services.len(), goodbye.len());

        let result = transport.respond(goodbye).await;
        if let Err(e) = &result {
            tracing::warn!("Goodbye broadcast failed: {}", e);
        }

        for (service, cycle) in &services {
            service.finish_teardown(*cycle);
        }
        result
    }
}

//! Resource records describing a service.

use std::net::IpAddr;
use shared::protocol::{HOST_RECORD_TTL, SERVICE_ENUMERATION_NAME, SERVICE_RECORD_TTL};
use shared::types::{RecordData, ResourceRecord};
use crate::service::ServiceSnapshot;

/// Produces the record set advertised for a service. Called on demand, so the
/// result always reflects the service's current name.
pub trait RecordBuilder: Send + Sync {
    fn records(&self, service: &ServiceSnapshot) -> Vec<ResourceRecord>;
}

/// Standard DNS-SD record set: enumeration PTR, type PTR, SRV, TXT and one
/// address record per configured address.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsSdRecords;

impl RecordBuilder for DnsSdRecords {
    fn records(&self, service: &ServiceSnapshot) -> Vec<ResourceRecord> {
        let mut records = vec![
            ResourceRecord::new(
                SERVICE_ENUMERATION_NAME,
                SERVICE_RECORD_TTL,
                RecordData::Ptr(service.service_type.clone()),
            ),
            ResourceRecord::new(
                service.service_type.clone(),
                SERVICE_RECORD_TTL,
                RecordData::Ptr(service.fqdn.clone()),
            ),
            ResourceRecord::new(
                service.fqdn.clone(),
                SERVICE_RECORD_TTL,
                RecordData::Srv {
                    priority: 0,
                    weight: 0,
                    port: service.port,
                    target: service.host.clone(),
                },
            ),
            // TXT content is not managed here, an empty record is still required
            ResourceRecord::new(service.fqdn.clone(), SERVICE_RECORD_TTL, RecordData::Txt(Vec::new())),
        ];

        records.extend(service.addresses.iter().map(|addr| {
            let data = match addr {
                IpAddr::V4(v4) => RecordData::A(*v4),
                IpAddr::V6(v6) => RecordData::Aaaa(*v6),
            };
            ResourceRecord::new(service.host.clone(), HOST_RECORD_TTL, data)
        }));

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use shared::types::RecordType;
    use crate::service::Phase;

    fn snapshot(addresses: Vec<IpAddr>) -> ServiceSnapshot {
        ServiceSnapshot {
            name: "Printer".to_string(),
            original_name: "Printer".to_string(),
            name_attempt: 1,
            service_type: "http".to_string(),
            fqdn: "Printer.http".to_string(),
            port: 80,
            host: "printer.local".to_string(),
            addresses,
            phase: Phase::Announcing,
            published: false,
            published_at: None,
        }
    }

    #[test]
    fn test_service_records() {
        let records = DnsSdRecords.records(&snapshot(Vec::new()));
        let types: Vec<RecordType> = records.iter().map(|r| r.record_type()).collect();

        assert_eq!(types, vec![RecordType::Ptr, RecordType::Ptr, RecordType::Srv, RecordType::Txt]);
        assert_eq!(records[1].name, "http");
        assert_eq!(records[1].data, RecordData::Ptr("Printer.http".to_string()));
        assert!(records.iter().all(|r| r.ttl == SERVICE_RECORD_TTL));
        assert!(matches!(
            &records[2].data,
            RecordData::Srv { port: 80, target, .. } if target == "printer.local"
        ));
    }

    #[test]
    fn test_address_records() {
        let addresses = vec![
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ];
        let records = DnsSdRecords.records(&snapshot(addresses));

        let host_records: Vec<&ResourceRecord> =
            records.iter().filter(|r| r.name == "printer.local").collect();
        assert_eq!(host_records.len(), 2);
        assert!(host_records.iter().all(|r| r.ttl == HOST_RECORD_TTL));
        assert_eq!(host_records[0].record_type(), RecordType::A);
        assert_eq!(host_records[1].record_type(), RecordType::Aaaa);
    }
}

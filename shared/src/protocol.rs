/// DNS-SD service type enumeration name (RFC 6763 §9)
pub const SERVICE_ENUMERATION_NAME: &str = "_services._dns-sd._udp.local";

/// TTL for records that carry a host name (A/AAAA), in seconds
pub const HOST_RECORD_TTL: u32 = 120;

/// TTL for all other service records, in seconds
pub const SERVICE_RECORD_TTL: u32 = 4500;

/// TTL carried by every record of a goodbye packet
pub const GOODBYE_TTL: u32 = 0;

/// Upper bound (exclusive) of the random delay before the first probe
pub const PROBE_JITTER_MS: u64 = 250;

/// Wait after each probe transmission
pub const PROBE_INTERVAL_MS: u64 = 250;

/// Total probe transmissions before a name is considered free
pub const PROBE_ATTEMPTS: u32 = 3;

/// First gap between announcements
pub const ANNOUNCE_INITIAL_DELAY_MS: u64 = 1000;

/// Growth factor of the announcement gap
pub const ANNOUNCE_BACKOFF_FACTOR: u32 = 3;

/// No announcement is scheduled once the gap would reach this value
pub const ANNOUNCE_MAX_DELAY_MS: u64 = 3_600_000;

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use serde::{Serialize, Deserialize};

/// DNS record types understood by the registry.
/// `Any` only appears in questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Ptr,
    Srv,
    Txt,
    Any,
}

impl RecordType {
    /// Whether a record of type `other` answers a question of this type
    pub fn matches(self, other: RecordType) -> bool {
        self == RecordType::Any || self == other
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Ptr => "PTR",
            RecordType::Srv => "SRV",
            RecordType::Txt => "TXT",
            RecordType::Any => "ANY",
        };
        f.write_str(s)
    }
}

/// Type-specific payload of a resource record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(String),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Txt(Vec<String>),
}

/// A single DNS resource record as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Owner name, e.g. "Printer._http._tcp.local"
    pub name: String,

    /// Time to live in seconds; 0 withdraws the record
    pub ttl: u32,

    pub data: RecordData,
}

impl ResourceRecord {
    pub fn new(name: impl Into<String>, ttl: u32, data: RecordData) -> Self {
        Self {
            name: name.into(),
            ttl,
            data,
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self.data {
            RecordData::A(_) => RecordType::A,
            RecordData::Aaaa(_) => RecordType::Aaaa,
            RecordData::Ptr(_) => RecordType::Ptr,
            RecordData::Srv { .. } => RecordType::Srv,
            RecordData::Txt(_) => RecordType::Txt,
        }
    }

    /// Same record regardless of TTL. Used to withdraw cached records with a
    /// goodbye copy.
    pub fn same_record(&self, other: &ResourceRecord) -> bool {
        names_equal(&self.name, &other.name) && self.data == other.data
    }
}

/// A received mDNS response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub answers: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
}

impl Packet {
    pub fn with_answers(answers: Vec<ResourceRecord>) -> Self {
        Self {
            answers,
            additionals: Vec::new(),
        }
    }

    /// Answers followed by additionals, in packet order
    pub fn records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.answers.iter().chain(self.additionals.iter())
    }
}

/// DNS names compare case-insensitively (RFC 1035 §2.3.3)
pub fn names_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

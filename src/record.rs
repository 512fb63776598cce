use std::{
	cell::Cell,
	net::{
		Ipv4Addr,
		Ipv6Addr,
	},
	time::Duration,
};

use crate::{
	dns_consts::{
		DnsClass,
		DnsType,
		RecordType,
		ResponseType,
	},
	error::Error,
	name::DomainName,
	txt_record::TxtRecord,
};

/// Types an NSEC record asserting nonexistence of `ANY` stands for
/// (the full set of types the engine tracks positively)
pub const NSEC_ANY_TYPES: [DnsType; 5] = [
	DnsType::A,
	DnsType::Ptr,
	DnsType::Txt,
	DnsType::Aaaa,
	DnsType::Srv,
];

/// SRV RDATA (RFC 2782)
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SrvData {
	/// Priority of this target host (lower is preferred)
	pub priority: u16,
	/// Relative weight among targets of the same priority
	pub weight: u16,
	/// Port of the service on the target host
	pub port: u16,
	/// Domain name of the target host
	pub target: DomainName,
}

/// NSEC RDATA as used by mDNS (RFC 6762, section 6.1)
///
/// In mDNS an NSEC record is a negative response: it enumerates the
/// record types that do *not* exist at a name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NsecData {
	/// Next-domain field; in mDNS this matches the record's own name
	pub next_domain: DomainName,
	/// Types asserted to not exist at the name
	pub types: Vec<DnsType>,
}

impl NsecData {
	/// Whether this record asserts the nonexistence of `dns_type`
	pub fn covers(&self, dns_type: DnsType) -> bool {
		self.types
			.iter()
			.any(|&t| t == dns_type || t == DnsType::Any)
	}

	/// RFC 6762 section 6.1: the NSEC bit must *not* be set for the
	/// record to be an mDNS negative response rather than a
	/// traditional DNSSEC NSEC record.
	pub fn is_negative_response(&self) -> bool {
		!self.types.contains(&DnsType::Nsec)
	}

	/// The concrete types this negative response stands for; an
	/// assertion covering `ANY` expands to every tracked type.
	pub fn covered_types(&self) -> Vec<DnsType> {
		if self.types.contains(&DnsType::Any) {
			NSEC_ANY_TYPES.to_vec()
		} else {
			self.types.clone()
		}
	}
}

/// Parsed RDATA of a tracked record
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Rdata {
	/// IPv4 host address
	A(Ipv4Addr),
	/// IPv6 host address
	Aaaa(Ipv6Addr),
	/// Pointed-to domain
	Ptr(DomainName),
	/// Service location
	Srv(SrvData),
	/// DNS-SD key/value data
	Txt(TxtRecord),
	/// Negative existence assertion
	Nsec(NsecData),
}

impl Rdata {
	/// The record type this RDATA belongs to
	pub fn dns_type(&self) -> DnsType {
		match self {
			Rdata::A(_) => DnsType::A,
			Rdata::Aaaa(_) => DnsType::Aaaa,
			Rdata::Ptr(_) => DnsType::Ptr,
			Rdata::Srv(_) => DnsType::Srv,
			Rdata::Txt(_) => DnsType::Txt,
			Rdata::Nsec(_) => DnsType::Nsec,
		}
	}
}

/// A parsed mDNS resource record
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MdnsRecord {
	/// Name the record belongs to
	pub name: DomainName,
	/// Record type
	pub dns_type: DnsType,
	/// Record class
	pub dns_class: DnsClass,
	/// Shared or unique (cache-flush) semantics
	pub record_type: RecordType,
	/// Remaining time to live as published by the responder
	pub ttl: Duration,
	/// Parsed payload
	pub rdata: Rdata,
}

impl MdnsRecord {
	/// Build a record, checking that `dns_type` matches the RDATA
	/// variant and is a concrete type (not `ANY`)
	pub fn new(
		name: DomainName,
		dns_type: DnsType,
		dns_class: DnsClass,
		record_type: RecordType,
		ttl: Duration,
		rdata: Rdata,
	) -> Result<Self, Error> {
		if dns_type == DnsType::Any || rdata.dns_type() != dns_type {
			return Err(Error::ParameterInvalid);
		}
		Ok(Self {
			name,
			dns_type,
			dns_class,
			record_type,
			ttl,
			rdata,
		})
	}

	/// RFC 6762 section 10.1: a record with TTL 0 withdraws the record
	pub fn is_goodbye(&self) -> bool {
		self.ttl == Duration::ZERO
	}

	/// Copy of this record with a different TTL
	pub fn with_ttl(&self, ttl: Duration) -> Self {
		Self {
			ttl,
			..self.clone()
		}
	}

	/// Whether this record is an mDNS negative response
	pub fn is_negative_response(&self) -> bool {
		match &self.rdata {
			Rdata::Nsec(nsec) => nsec.is_negative_response(),
			_ => false,
		}
	}
}

/// A single mDNS question
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MdnsQuestion {
	/// Name being queried
	pub name: DomainName,
	/// Queried type (`ANY` matches every type)
	pub dns_type: DnsType,
	/// Queried class (`ANY` matches every class)
	pub dns_class: DnsClass,
	/// Whether responders should answer via multicast or unicast
	pub response_type: ResponseType,
}

/// Kind of an mDNS message
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum MessageType {
	/// A query message (QR bit clear)
	Query,
	/// A response message (QR bit set)
	Response,
}

/// A parsed mDNS message
///
/// Wire parsing and serialization happen outside the engine; the engine
/// consumes and produces this parsed form only.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MdnsMessage {
	/// Message identifier; mDNS responders usually use 0
	pub id: u16,
	/// Query or response
	pub message_type: MessageType,
	/// Question section
	pub questions: Vec<MdnsQuestion>,
	/// Answer section
	pub answers: Vec<MdnsRecord>,
	/// Additional record section
	pub additional_records: Vec<MdnsRecord>,
}

impl MdnsMessage {
	/// New empty message of the given kind
	pub fn new(id: u16, message_type: MessageType) -> Self {
		Self {
			id,
			message_type,
			questions: Vec::new(),
			answers: Vec::new(),
			additional_records: Vec::new(),
		}
	}

	/// New empty query message with a fresh id
	pub fn query() -> Self {
		Self::new(create_message_id(), MessageType::Query)
	}

	/// Append a question
	pub fn add_question(&mut self, question: MdnsQuestion) {
		self.questions.push(question);
	}

	/// Append an answer record
	pub fn add_answer(&mut self, record: MdnsRecord) {
		self.answers.push(record);
	}
}

/// Allocate the next outgoing message id
///
/// Sequential per thread; the engine is confined to one task-runner
/// thread anyway.
pub fn create_message_id() -> u16 {
	thread_local! {
		static NEXT_MESSAGE_ID: Cell<u16> = const { Cell::new(0) };
	}
	NEXT_MESSAGE_ID.with(|id| {
		let value = id.get();
		id.set(value.wrapping_add(1));
		value
	})
}

#[cfg(test)]
mod tests {
	use super::{
		MdnsRecord,
		NsecData,
		Rdata,
		SrvData,
	};
	use crate::{
		dns_consts::{
			DnsClass,
			DnsType,
			RecordType,
		},
		error::Error,
		name::DomainName,
	};
	use std::time::Duration;

	fn name(s: &str) -> DomainName {
		s.parse().unwrap()
	}

	#[test]
	fn rdata_must_match_type() {
		let err = MdnsRecord::new(
			name("host.local"),
			DnsType::Aaaa,
			DnsClass::In,
			RecordType::Unique,
			Duration::from_secs(120),
			Rdata::A("192.0.2.1".parse().unwrap()),
		)
		.unwrap_err();
		assert_eq!(err, Error::ParameterInvalid);
	}

	#[test]
	fn goodbye_detection() {
		let record = MdnsRecord::new(
			name("host.local"),
			DnsType::A,
			DnsClass::In,
			RecordType::Unique,
			Duration::ZERO,
			Rdata::A("192.0.2.1".parse().unwrap()),
		)
		.unwrap();
		assert!(record.is_goodbye());
		assert!(!record.with_ttl(Duration::from_secs(1)).is_goodbye());
	}

	#[test]
	fn nsec_coverage() {
		let nsec = NsecData {
			next_domain: name("inst._svc._udp.local"),
			types: vec![DnsType::Srv, DnsType::Txt],
		};
		assert!(nsec.covers(DnsType::Srv));
		assert!(!nsec.covers(DnsType::A));
		assert!(nsec.is_negative_response());
		assert_eq!(nsec.covered_types(), vec![DnsType::Srv, DnsType::Txt]);

		let nsec_any = NsecData {
			next_domain: name("inst._svc._udp.local"),
			types: vec![DnsType::Any],
		};
		assert_eq!(nsec_any.covered_types().len(), 5);

		// NSEC bit set: a DNSSEC record, not an mDNS negative response
		let dnssec = NsecData {
			next_domain: name("inst._svc._udp.local"),
			types: vec![DnsType::Srv, DnsType::Nsec],
		};
		assert!(!dnssec.is_negative_response());
	}

	#[test]
	fn srv_data_ordering_is_stable() {
		let srv = |port| SrvData {
			priority: 0,
			weight: 0,
			port,
			target: name("host.local"),
		};
		assert!(srv(80) < srv(443));
	}
}

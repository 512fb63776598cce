#![doc(html_root_url = "https://docs.rs/mdns-discovery/0.1.0")]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(unused_extern_crates, unused_qualifications)]
//! # Continuous mDNS querier and DNS-SD discovery engine
//!
//! A native implementation of the cache-and-refresh side of Multicast
//! DNS (RFC 6762) and DNS-Based Service Discovery (RFC 6763): given
//! active subscriptions, the engine keeps issuing multicast queries,
//! maintains a bounded cache of resource records with correct TTL
//! lifecycles, and derives resolved service endpoints from the graph
//! of PTR → SRV/TXT → A/AAAA records.
//!
//! Interesting entry points:
//!
//! * [Browse for service instances][`DnsSdService::start_browsing`]
//! * [Subscribe to record changes][`MdnsQuerier::start_query`]
//! * [Record changes as a `futures` stream][`MdnsQuerier::record_stream`]
//! * [Derive endpoints from the record graph][`DnsDataGraph::create_endpoints`]
//! * [Stream timeouts][`TimeoutStream`]
//!
//! Socket I/O and DNS wire parsing stay outside the engine: incoming
//! parsed messages are fed to [`MdnsQuerier::on_message_received`],
//! and outgoing messages leave through an [`MdnsSender`] you provide.
//! Everything runs on one cooperative [`TaskRunner`] thread —
//! [`LocalTaskRunner`] adapts a tokio current-thread runtime, and
//! [`testing`] has a deterministic runner with a manual clock.
//!
//! ```no_run
//! use mdns_discovery::{
//! 	Config, DnsSdService, LocalTaskRunner, MdnsMessage, MdnsQuerier, MdnsRandom,
//! 	MdnsSender, ReportingClient,
//! };
//! use std::rc::Rc;
//!
//! struct UdpSender; // serialize + send over your multicast socket
//! # impl MdnsSender for UdpSender {
//! # fn send_multicast(&self, _: &MdnsMessage) -> std::io::Result<()> { Ok(()) }
//! # }
//! struct Logger;
//! # impl ReportingClient for Logger {
//! # fn on_recoverable_error(&self, _: mdns_discovery::Error) {}
//! # }
//! # struct EndpointPrinter;
//! # impl mdns_discovery::ServiceEndpointCallback for EndpointPrinter {
//! # fn on_endpoint_updated(&self, _: &mdns_discovery::ServiceEndpoint) {}
//! # fn on_endpoint_deleted(&self, _: &mdns_discovery::ServiceEndpoint) {}
//! # }
//!
//! let querier = MdnsQuerier::new(
//! 	Rc::new(UdpSender),
//! 	Rc::new(LocalTaskRunner::new()),
//! 	Rc::new(MdnsRandom::new()),
//! 	Rc::new(Logger),
//! 	&Config::default(),
//! );
//! let browser = DnsSdService::new(querier, 0, Rc::new(Logger));
//! browser
//! 	.start_browsing(&"_googlecast._tcp.local".parse().unwrap(), Rc::new(EndpointPrinter))
//! 	.unwrap();
//! ```

pub use self::{
	alarm::Alarm,
	config::{
		AddressFamilies,
		Config,
		NetworkInfo,
	},
	dns_consts::{
		DnsClass,
		DnsType,
		RecordChangedEvent,
		RecordType,
		ResponseType,
	},
	endpoint::{
		InstanceName,
		ServiceEndpoint,
	},
	error::{
		Error,
		Result,
	},
	graph::{
		DnsDataGraph,
		DomainGroup,
	},
	name::DomainName,
	querier::{
		MdnsQuerier,
		MdnsRecordChangedCallback,
	},
	random::{
		MdnsRandom,
		RandomDelay,
	},
	record::{
		create_message_id,
		MdnsMessage,
		MdnsQuestion,
		MdnsRecord,
		MessageType,
		NsecData,
		Rdata,
		SrvData,
		NSEC_ANY_TYPES,
	},
	reporting::ReportingClient,
	runner::{
		LocalTaskRunner,
		RunnerHandle,
		TaskRunner,
	},
	sender::{
		MdnsSender,
		MDNS_GROUP_IPV4,
		MDNS_GROUP_IPV6,
		MDNS_PORT,
	},
	service::{
		DnsSdService,
		ServiceEndpointCallback,
	},
	stream::RecordStream,
	timeout_stream::{
		StreamTimeoutExt,
		TimeoutStream,
	},
	tracker::{
		QuestionTracker,
		RecordExpiredCallback,
		RecordTracker,
		UpdateType,
	},
	txt_record::TxtRecord,
};

mod alarm;
mod config;
mod dns_consts;
mod endpoint;
mod error;
mod graph;
mod name;
mod querier;
mod random;
mod record;
mod reporting;
mod runner;
mod sender;
mod service;
mod stream;
pub mod testing;
mod timeout_stream;
mod tracker;
mod txt_record;

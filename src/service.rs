use log::debug;
use std::{
	cell::RefCell,
	collections::HashMap,
	rc::{
		Rc,
		Weak,
	},
};

use crate::{
	dns_consts::{
		DnsClass,
		DnsType,
		RecordChangedEvent,
	},
	endpoint::ServiceEndpoint,
	error::Error,
	graph::{
		DnsDataGraph,
		DomainGroup,
	},
	name::DomainName,
	querier::{
		MdnsQuerier,
		MdnsRecordChangedCallback,
	},
	record::MdnsRecord,
	reporting::ReportingClient,
};

/// Notifications about resolved service instances
pub trait ServiceEndpointCallback {
	/// A service instance became resolvable, or its resolved data
	/// changed
	fn on_endpoint_updated(&self, endpoint: &ServiceEndpoint);

	/// A previously reported service instance is no longer resolvable
	fn on_endpoint_deleted(&self, endpoint: &ServiceEndpoint);
}

struct BrowseState {
	callback: Rc<dyn ServiceEndpointCallback>,
	endpoints: Vec<ServiceEndpoint>,
}

enum Notification {
	Updated(Rc<dyn ServiceEndpointCallback>, ServiceEndpoint),
	Deleted(Rc<dyn ServiceEndpointCallback>, ServiceEndpoint),
}

#[derive(Default)]
struct ChangeOutcome {
	created_domains: Vec<DomainName>,
	deleted_domains: Vec<DomainName>,
	notifications: Vec<Notification>,
}

struct ServiceInner {
	graph: DnsDataGraph,
	reporting: Rc<dyn ReportingClient>,
	browses: HashMap<DomainName, BrowseState>,
	bridge: Option<Rc<dyn MdnsRecordChangedCallback>>,
}

/// DNS-SD browsing over the querier
///
/// Subscribes to the PTR records of a service type, follows the record
/// graph down to SRV/TXT and address records (starting and stopping
/// the follow-up queries as instance and host domains appear and
/// disappear), and reports fully resolved [`ServiceEndpoint`]s to the
/// browse callback as they change.
#[derive(Clone)]
pub struct DnsSdService {
	inner: Rc<RefCell<ServiceInner>>,
	querier: MdnsQuerier,
}

impl DnsSdService {
	/// New browser over `querier` for records seen on
	/// `network_interface`
	pub fn new(
		querier: MdnsQuerier,
		network_interface: u32,
		reporting: Rc<dyn ReportingClient>,
	) -> Self {
		let inner = Rc::new(RefCell::new(ServiceInner {
			graph: DnsDataGraph::new(network_interface),
			reporting,
			browses: HashMap::new(),
			bridge: None,
		}));
		let bridge: Rc<dyn MdnsRecordChangedCallback> = Rc::new(RecordBridge {
			inner: Rc::downgrade(&inner),
			querier: querier.clone(),
		});
		inner.borrow_mut().bridge = Some(bridge);
		Self { inner, querier }
	}

	/// Start browsing for instances of `service` (a service-type
	/// domain such as `_googlecast._tcp.local`)
	///
	/// Fails with [`Error::ItemAlreadyExists`] when the service is
	/// already being browsed.  Instances already in the querier cache
	/// are reported during the call.
	pub fn start_browsing(
		&self,
		service: &DomainName,
		callback: Rc<dyn ServiceEndpointCallback>,
	) -> Result<(), Error> {
		debug!("start browsing {}", service);
		{
			let mut inner = self.inner.borrow_mut();
			if inner.browses.contains_key(service) {
				return Err(Error::ItemAlreadyExists);
			}
			inner.graph.start_tracking(service, &mut |_| {})?;
			inner.browses.insert(
				service.clone(),
				BrowseState {
					callback,
					endpoints: Vec::new(),
				},
			);
		}

		let bridge = self.bridge();
		if let Err(error) =
			self.querier
				.start_query(service, DnsType::Ptr, DnsClass::In, &bridge)
		{
			let mut inner = self.inner.borrow_mut();
			inner.browses.remove(service);
			let _ = inner.graph.stop_tracking(service, &mut |_| {});
			return Err(error);
		}
		Ok(())
	}

	/// Stop browsing `service`
	///
	/// Drops the follow-up queries for the service's instances and
	/// reports every currently resolved endpoint as deleted.
	pub fn stop_browsing(&self, service: &DomainName) -> Result<(), Error> {
		debug!("stop browsing {}", service);
		let bridge = self.bridge();
		self.querier
			.stop_query(service, DnsType::Ptr, DnsClass::In, &bridge)?;

		let (state, removed_domains) = {
			let mut inner = self.inner.borrow_mut();
			let state = inner
				.browses
				.remove(service)
				.ok_or(Error::ItemNotFound)?;
			let mut removed = Vec::new();
			inner
				.graph
				.stop_tracking(service, &mut |name| removed.push(name.clone()))?;
			(state, removed)
		};

		for domain in &removed_domains {
			if domain != service {
				let _ = self
					.querier
					.stop_query(domain, DnsType::Any, DnsClass::In, &bridge);
			}
		}
		for endpoint in &state.endpoints {
			state.callback.on_endpoint_deleted(endpoint);
		}
		Ok(())
	}

	/// Currently resolved endpoints of `service`
	pub fn endpoints(&self, service: &DomainName) -> Vec<ServiceEndpoint> {
		self.inner
			.borrow()
			.browses
			.get(service)
			.map(|state| state.endpoints.clone())
			.unwrap_or_default()
	}

	/// The querier this browser runs on
	pub fn querier(&self) -> &MdnsQuerier {
		&self.querier
	}

	fn bridge(&self) -> Rc<dyn MdnsRecordChangedCallback> {
		self.inner
			.borrow()
			.bridge
			.clone()
			.expect("bridge is set at construction")
	}
}

// Adapter feeding querier record events into the graph.  Runs with the
// service state borrowed only while mutating it; follow-up querier
// calls and user notifications happen after the borrow is released, so
// nested record events (cached answers of a follow-up query) re-enter
// cleanly.
struct RecordBridge {
	inner: Weak<RefCell<ServiceInner>>,
	querier: MdnsQuerier,
}

impl MdnsRecordChangedCallback for RecordBridge {
	fn on_record_changed(&self, record: &MdnsRecord, event: RecordChangedEvent) {
		let Some(inner) = self.inner.upgrade() else {
			return;
		};
		let (outcome, bridge) = {
			let mut inner = inner.borrow_mut();
			let outcome = inner.apply_record_change(record, event);
			(outcome, inner.bridge.clone())
		};
		let Some(bridge) = bridge else { return };

		// Newly referenced domains get a follow-up query; this may
		// deliver cached records synchronously and recurse into the
		// bridge.
		for domain in &outcome.created_domains {
			let _ = self
				.querier
				.start_query(domain, DnsType::Any, DnsClass::In, &bridge);
		}
		for domain in &outcome.deleted_domains {
			let _ = self
				.querier
				.stop_query(domain, DnsType::Any, DnsClass::In, &bridge);
		}
		for notification in outcome.notifications {
			match notification {
				Notification::Updated(callback, endpoint) => {
					callback.on_endpoint_updated(&endpoint)
				},
				Notification::Deleted(callback, endpoint) => {
					callback.on_endpoint_deleted(&endpoint)
				},
			}
		}
	}
}

impl ServiceInner {
	fn apply_record_change(
		&mut self,
		record: &MdnsRecord,
		event: RecordChangedEvent,
	) -> ChangeOutcome {
		let mut outcome = ChangeOutcome::default();
		if DomainGroup::of(record.dns_type).is_none() {
			return outcome;
		}

		let mut created = Vec::new();
		let mut deleted = Vec::new();
		let result = self.graph.apply_data_record_change(
			record.clone(),
			event,
			&mut |name| created.push(name.clone()),
			&mut |name| deleted.push(name.clone()),
		);
		outcome.created_domains = created;
		outcome.deleted_domains = deleted;
		if let Err(error) = result {
			self.reporting.on_recoverable_error(error);
			return outcome;
		}

		// Re-derive the endpoint set of every browse and report the
		// difference.
		for (service, state) in &mut self.browses {
			let mut endpoints = Vec::new();
			for derived in self.graph.create_endpoints(DomainGroup::Ptr, service) {
				match derived {
					Ok(endpoint) => endpoints.push(endpoint),
					Err(error) => self.reporting.on_recoverable_error(error),
				}
			}
			for old in &state.endpoints {
				if !endpoints.contains(old) {
					outcome
						.notifications
						.push(Notification::Deleted(state.callback.clone(), old.clone()));
				}
			}
			for new in &endpoints {
				if !state.endpoints.contains(new) {
					outcome
						.notifications
						.push(Notification::Updated(state.callback.clone(), new.clone()));
				}
			}
			state.endpoints = endpoints;
		}
		outcome
	}
}

#[cfg(test)]
mod tests {
	use super::{
		DnsSdService,
		ServiceEndpointCallback,
	};
	use crate::{
		config::Config,
		dns_consts::{
			DnsClass,
			DnsType,
			RecordType,
		},
		endpoint::ServiceEndpoint,
		error::Error,
		name::DomainName,
		querier::MdnsQuerier,
		record::{
			MdnsMessage,
			MdnsRecord,
			MessageType,
			Rdata,
			SrvData,
		},
		testing::{
			CollectingReporter,
			FakeSender,
			FakeTaskRunner,
			FixedRandom,
		},
		txt_record::TxtRecord,
	};
	use std::{
		cell::RefCell,
		rc::Rc,
		time::Duration,
	};

	#[derive(Default)]
	struct CollectingEndpoints {
		updated: RefCell<Vec<ServiceEndpoint>>,
		deleted: RefCell<Vec<ServiceEndpoint>>,
	}

	impl ServiceEndpointCallback for CollectingEndpoints {
		fn on_endpoint_updated(&self, endpoint: &ServiceEndpoint) {
			self.updated.borrow_mut().push(endpoint.clone());
		}

		fn on_endpoint_deleted(&self, endpoint: &ServiceEndpoint) {
			self.deleted.borrow_mut().push(endpoint.clone());
		}
	}

	struct Fixture {
		runner: FakeTaskRunner,
		service: DnsSdService,
		endpoints: Rc<CollectingEndpoints>,
	}

	impl Fixture {
		fn new() -> Self {
			let runner = FakeTaskRunner::new();
			let querier = MdnsQuerier::new(
				Rc::new(FakeSender::new()),
				Rc::new(runner.clone()),
				Rc::new(FixedRandom::new()),
				Rc::new(CollectingReporter::new()),
				&Config::default(),
			);
			let service = DnsSdService::new(querier, 7, Rc::new(CollectingReporter::new()));
			let endpoints = Rc::new(CollectingEndpoints::default());
			service
				.start_browsing(&name("_svc._udp.local"), endpoints.clone())
				.unwrap();
			Self {
				runner,
				service,
				endpoints,
			}
		}

		fn deliver_full_service(&self) {
			let mut message = MdnsMessage::new(0, MessageType::Response);
			message.answers = vec![
				ptr("_svc._udp.local", "inst._svc._udp.local"),
				srv("inst._svc._udp.local", "host.local", 1234),
				txt("inst._svc._udp.local", b"\x07foo=bar"),
				a("host.local", "192.0.2.10", 120),
			];
			self.service.querier().on_message_received(&message);
		}
	}

	fn name(s: &str) -> DomainName {
		s.parse().unwrap()
	}

	fn ptr(service: &str, instance: &str) -> MdnsRecord {
		MdnsRecord::new(
			name(service),
			DnsType::Ptr,
			DnsClass::In,
			RecordType::Shared,
			Duration::from_secs(120),
			Rdata::Ptr(name(instance)),
		)
		.unwrap()
	}

	fn srv(instance: &str, host: &str, port: u16) -> MdnsRecord {
		MdnsRecord::new(
			name(instance),
			DnsType::Srv,
			DnsClass::In,
			RecordType::Unique,
			Duration::from_secs(120),
			Rdata::Srv(SrvData {
				priority: 0,
				weight: 0,
				port,
				target: name(host),
			}),
		)
		.unwrap()
	}

	fn txt(instance: &str, rdata: &[u8]) -> MdnsRecord {
		MdnsRecord::new(
			name(instance),
			DnsType::Txt,
			DnsClass::In,
			RecordType::Unique,
			Duration::from_secs(120),
			Rdata::Txt(TxtRecord::parse(rdata).unwrap()),
		)
		.unwrap()
	}

	fn a(host: &str, address: &str, ttl_secs: u64) -> MdnsRecord {
		MdnsRecord::new(
			name(host),
			DnsType::A,
			DnsClass::In,
			RecordType::Unique,
			Duration::from_secs(ttl_secs),
			Rdata::A(address.parse().unwrap()),
		)
		.unwrap()
	}

	#[test]
	fn one_response_resolves_an_endpoint() {
		let fx = Fixture::new();
		fx.deliver_full_service();

		let endpoints = fx.service.endpoints(&name("_svc._udp.local"));
		assert_eq!(endpoints.len(), 1);
		let endpoint = &endpoints[0];
		assert_eq!(endpoint.name.instance, "inst");
		assert_eq!(endpoint.endpoints.len(), 1);
		assert_eq!(endpoint.endpoints[0].port(), 1234);
		assert_eq!(
			endpoint.endpoints[0].ip(),
			"192.0.2.10".parse::<std::net::IpAddr>().unwrap()
		);
		assert_eq!(endpoint.network_interface, 7);

		assert_eq!(fx.endpoints.updated.borrow().len(), 1);
		assert!(fx.endpoints.deleted.borrow().is_empty());
	}

	#[test]
	fn follow_up_queries_cover_the_record_graph() {
		let fx = Fixture::new();
		// PTR query for the browse root
		assert_eq!(fx.service.querier().active_question_count(), 1);

		fx.deliver_full_service();
		// plus wildcard queries for the instance and host domains
		assert_eq!(fx.service.querier().active_question_count(), 3);
	}

	#[test]
	fn goodbye_address_withdraws_the_endpoint() {
		let fx = Fixture::new();
		fx.deliver_full_service();
		assert_eq!(fx.endpoints.updated.borrow().len(), 1);

		let mut message = MdnsMessage::new(0, MessageType::Response);
		message.answers = vec![a("host.local", "192.0.2.10", 0)];
		fx.service.querier().on_message_received(&message);

		// the goodbye fades the record out over one second
		fx.runner.advance(Duration::from_secs(1));
		assert_eq!(fx.endpoints.deleted.borrow().len(), 1);
		assert!(fx.service.endpoints(&name("_svc._udp.local")).is_empty());
	}

	#[test]
	fn address_update_reports_new_endpoint() {
		let fx = Fixture::new();
		fx.deliver_full_service();

		let mut message = MdnsMessage::new(0, MessageType::Response);
		message.answers = vec![a("host.local", "192.0.2.77", 120)];
		fx.service.querier().on_message_received(&message);

		let endpoints = fx.service.endpoints(&name("_svc._udp.local"));
		assert_eq!(endpoints.len(), 1);
		assert_eq!(
			endpoints[0].endpoints[0].ip(),
			"192.0.2.77".parse::<std::net::IpAddr>().unwrap()
		);
		// one update for the original resolution, one for the change;
		// the old endpoint is reported deleted
		assert_eq!(fx.endpoints.updated.borrow().len(), 2);
		assert_eq!(fx.endpoints.deleted.borrow().len(), 1);
	}

	#[test]
	fn stop_browsing_cleans_up() {
		let fx = Fixture::new();
		fx.deliver_full_service();

		fx.service.stop_browsing(&name("_svc._udp.local")).unwrap();
		assert_eq!(fx.endpoints.deleted.borrow().len(), 1);
		assert!(fx.service.endpoints(&name("_svc._udp.local")).is_empty());
		assert_eq!(fx.service.querier().active_question_count(), 0);

		assert_eq!(
			fx.service.stop_browsing(&name("_svc._udp.local")),
			Err(Error::ItemNotFound)
		);
	}

	#[test]
	fn browsing_twice_is_rejected() {
		let fx = Fixture::new();
		assert_eq!(
			fx.service.start_browsing(
				&name("_svc._udp.local"),
				Rc::new(CollectingEndpoints::default()),
			),
			Err(Error::ItemAlreadyExists)
		);
	}
}

use log::trace;
use std::collections::HashMap;

use crate::{
	dns_consts::{
		DnsType,
		RecordChangedEvent,
	},
	endpoint::ServiceEndpoint,
	error::Error,
	name::DomainName,
	record::{
		MdnsRecord,
		Rdata,
		SrvData,
	},
	txt_record::TxtRecord,
};

/// The domain hierarchy of DNS-SD (RFC 6763)
///
/// PTR records at the service-type domain point to instance domains
/// holding SRV and TXT records; SRV records point to host domains
/// holding A and AAAA records:
///
/// ```text
///     _svc._udp.local            PTR
///         │
///     inst._svc._udp.local       SRV + TXT
///         │
///     host.local                 A / AAAA
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum DomainGroup {
	/// Service-type domains holding PTR records
	Ptr,
	/// Instance domains holding SRV and TXT records
	SrvAndTxt,
	/// Host domains holding address records
	Address,
}

impl DomainGroup {
	/// The group a record of `dns_type` belongs to, if any
	pub fn of(dns_type: DnsType) -> Option<Self> {
		match dns_type {
			DnsType::A | DnsType::Aaaa => Some(DomainGroup::Address),
			DnsType::Srv | DnsType::Txt => Some(DomainGroup::SrvAndTxt),
			DnsType::Ptr => Some(DomainGroup::Ptr),
			_ => None,
		}
	}
}

struct Node {
	name: DomainName,
	records: Vec<MdnsRecord>,
	// Edge multisets: a name appears once per referencing record, so
	// the same neighbor may repeat.
	parents: Vec<DomainName>,
	children: Vec<DomainName>,
	is_root: bool,
}

impl Node {
	fn new(name: DomainName, is_root: bool) -> Self {
		Self {
			name,
			records: Vec::new(),
			parents: Vec::new(),
			children: Vec::new(),
			is_root,
		}
	}

	fn find_record(&self, dns_type: DnsType) -> Option<&MdnsRecord> {
		self.records.iter().find(|r| r.dns_type == dns_type)
	}

	fn srv_rdata(&self) -> Option<&SrvData> {
		match &self.find_record(DnsType::Srv)?.rdata {
			Rdata::Srv(srv) => Some(srv),
			_ => None,
		}
	}

	fn txt_rdata(&self) -> Option<&TxtRecord> {
		match &self.find_record(DnsType::Txt)?.rdata {
			Rdata::Txt(txt) => Some(txt),
			_ => None,
		}
	}

	fn has_address_record(&self) -> bool {
		self.find_record(DnsType::A).is_some() || self.find_record(DnsType::Aaaa).is_some()
	}

	fn has_srv_and_txt(&self) -> bool {
		self.srv_rdata().is_some() && self.txt_rdata().is_some()
	}
}

// The child domain a record points at, if it creates an edge.
fn edge_target(record: &MdnsRecord) -> Option<DomainName> {
	match &record.rdata {
		Rdata::Ptr(target) => Some(target.clone()),
		Rdata::Srv(srv) => Some(srv.target.clone()),
		_ => None,
	}
}

/// Reference-counted multigraph over domain names
///
/// Each node represents one domain and the extant records at it; an
/// edge from *A* to *B* exists once per record in *A* pointing at
/// *B*'s name (PTR or SRV).  Cycles and self loops are allowed — SRV
/// records frequently target their own domain.  A node lives while at
/// least one parent edge points at it, or while it is an explicitly
/// tracked root; when the last parent edge of a non-root node goes
/// away, the node is destroyed, cascading to any children it orphans.
///
/// Creation and deletion callbacks fire synchronously inside the call
/// that causes them; the exclusive receiver makes re-entrant mutation
/// from inside a callback unrepresentable.
pub struct DnsDataGraph {
	nodes: HashMap<DomainName, Node>,
	network_interface: u32,
}

impl DnsDataGraph {
	/// New empty graph for records seen on `network_interface`
	pub fn new(network_interface: u32) -> Self {
		Self {
			nodes: HashMap::new(),
			network_interface,
		}
	}

	/// Begin tracking `domain` as a root (normally a service-type
	/// domain queried for PTR records)
	///
	/// `on_create` fires for every node this call creates — exactly
	/// the root itself.
	pub fn start_tracking(
		&mut self,
		domain: &DomainName,
		on_create: &mut dyn FnMut(&DomainName),
	) -> Result<(), Error> {
		if self.nodes.contains_key(domain) {
			return Err(Error::ItemAlreadyExists);
		}
		self.nodes
			.insert(domain.clone(), Node::new(domain.clone(), true));
		on_create(domain);
		Ok(())
	}

	/// Stop tracking the root `domain`
	///
	/// Fails with [`Error::OperationInvalid`] while other nodes still
	/// point at it.  Deletion cascades to descendants orphaned by the
	/// removal; `on_delete` fires for every removed node, children
	/// before parents.
	pub fn stop_tracking(
		&mut self,
		domain: &DomainName,
		on_delete: &mut dyn FnMut(&DomainName),
	) -> Result<(), Error> {
		let node = self.nodes.get(domain).ok_or(Error::ItemNotFound)?;
		if !node.parents.is_empty() {
			return Err(Error::OperationInvalid);
		}
		self.remove_node(domain, on_delete);
		Ok(())
	}

	/// Apply a record change event to the node named by the record
	///
	/// Valid for PTR, SRV, TXT, A and AAAA records; fails with
	/// [`Error::OperationCancelled`] when no node with the record's
	/// name exists (the change no longer applies to the tracked data).
	/// Edge adjustments follow the record change: a created PTR/SRV
	/// adds an edge (creating the target node if needed), an expired
	/// one removes an edge (cascading deletion of orphaned nodes), and
	/// an updated SRV whose target moved does both.
	pub fn apply_data_record_change(
		&mut self,
		record: MdnsRecord,
		event: RecordChangedEvent,
		on_create: &mut dyn FnMut(&DomainName),
		on_delete: &mut dyn FnMut(&DomainName),
	) -> Result<(), Error> {
		if DomainGroup::of(record.dns_type).is_none() {
			return Err(Error::ParameterInvalid);
		}
		let name = record.name.clone();
		let new_target = edge_target(&record);
		trace!("{:?} record {:?} at {}", event, record.dns_type, name);

		let old_target;
		{
			let node = self.nodes.get_mut(&name).ok_or(Error::OperationCancelled)?;
			// PTR records may repeat at one name with different
			// targets, so they match by RDATA; all other types hold
			// one slot per type.
			let position = if record.dns_type == DnsType::Ptr {
				node.records
					.iter()
					.position(|r| r.dns_type == DnsType::Ptr && r.rdata == record.rdata)
			} else {
				node.records.iter().position(|r| r.dns_type == record.dns_type)
			};

			match event {
				RecordChangedEvent::Created => {
					if position.is_some() {
						return Err(Error::ItemAlreadyExists);
					}
					old_target = None;
					node.records.push(record);
				},
				RecordChangedEvent::Updated => {
					let Some(position) = position else {
						return Err(Error::ItemNotFound);
					};
					old_target = edge_target(&node.records[position]);
					node.records[position] = record;
				},
				RecordChangedEvent::Expired => {
					let Some(position) = position else {
						return Err(Error::ItemNotFound);
					};
					old_target = edge_target(&node.records[position]);
					node.records.remove(position);
				},
			}
		}

		match event {
			RecordChangedEvent::Created => {
				if let Some(target) = new_target {
					self.add_edge(&name, &target, on_create);
				}
			},
			RecordChangedEvent::Updated => {
				// A moved SRV target behaves as expire(old) + create(new).
				if old_target != new_target {
					if let Some(old) = &old_target {
						self.remove_edge(&name, old, on_delete)?;
					}
					if let Some(new) = &new_target {
						self.add_edge(&name, new, on_create);
					}
				}
			},
			RecordChangedEvent::Expired => {
				if let Some(old) = &old_target {
					self.remove_edge(&name, old, on_delete)?;
				}
			},
		}
		Ok(())
	}

	/// All service endpoints derivable for `name` in `domain_group`
	///
	/// A pair of instance and host nodes yields an endpoint when the
	/// instance holds SRV and TXT, the SRV target is the host node's
	/// name, and the host holds at least one address record.  A pair
	/// whose TXT data is not valid DNS-SD yields a per-endpoint error
	/// instead of failing the whole call.
	pub fn create_endpoints(
		&self,
		domain_group: DomainGroup,
		name: &DomainName,
	) -> Vec<Result<ServiceEndpoint, Error>> {
		let Some(target) = self.nodes.get(name) else {
			return Vec::new();
		};

		let (srv_txt_nodes, address_nodes): (Vec<&Node>, Vec<&Node>) = match domain_group {
			DomainGroup::Address => {
				if !target.has_address_record() {
					return Vec::new();
				}
				(self.resolve(&target.parents), vec![target])
			},
			DomainGroup::SrvAndTxt => {
				if !target.has_srv_and_txt() {
					return Vec::new();
				}
				(vec![target], self.resolve(&target.children))
			},
			DomainGroup::Ptr => return self.ptr_endpoints(target),
		};

		let mut endpoints = Vec::new();
		for srv_txt in &srv_txt_nodes {
			for address in &address_nodes {
				// The SRV provides the port and links the pair.
				let Some(srv) = srv_txt.srv_rdata() else { continue };
				if srv.target != address.name {
					continue;
				}
				// A TXT record is required per RFC 6763 section 6.
				let Some(txt) = srv_txt.txt_rdata() else { continue };
				let a = address.find_record(DnsType::A);
				let aaaa = address.find_record(DnsType::Aaaa);
				if a.is_none() && aaaa.is_none() {
					continue;
				}
				endpoints.push(ServiceEndpoint::from_records(
					&srv_txt.name,
					a,
					aaaa,
					srv,
					txt,
					self.network_interface,
				));
			}
		}
		endpoints
	}

	/// Number of domains currently represented
	pub fn tracked_domain_count(&self) -> usize {
		self.nodes.len()
	}

	/// Whether a node for `domain` exists
	pub fn contains(&self, domain: &DomainName) -> bool {
		self.nodes.contains_key(domain)
	}

	// PTR records are not part of the endpoints themselves; each one
	// delegates to its instance domain.
	fn ptr_endpoints(&self, node: &Node) -> Vec<Result<ServiceEndpoint, Error>> {
		let mut endpoints = Vec::new();
		for record in &node.records {
			let Rdata::Ptr(instance) = &record.rdata else {
				continue;
			};
			endpoints.extend(self.create_endpoints(DomainGroup::SrvAndTxt, instance));
		}
		endpoints
	}

	fn resolve(&self, names: &[DomainName]) -> Vec<&Node> {
		names.iter().filter_map(|name| self.nodes.get(name)).collect()
	}

	fn add_edge(
		&mut self,
		parent_name: &DomainName,
		child_name: &DomainName,
		on_create: &mut dyn FnMut(&DomainName),
	) {
		if !self.nodes.contains_key(child_name) {
			self.nodes
				.insert(child_name.clone(), Node::new(child_name.clone(), false));
			on_create(child_name);
		}
		if let Some(parent) = self.nodes.get_mut(parent_name) {
			parent.children.push(child_name.clone());
		}
		if let Some(child) = self.nodes.get_mut(child_name) {
			child.parents.push(parent_name.clone());
		}
	}

	fn remove_edge(
		&mut self,
		parent_name: &DomainName,
		child_name: &DomainName,
		on_delete: &mut dyn FnMut(&DomainName),
	) -> Result<(), Error> {
		{
			let parent = self.nodes.get_mut(parent_name).ok_or(Error::ItemNotFound)?;
			let position = parent
				.children
				.iter()
				.position(|c| c == child_name)
				.ok_or(Error::ItemNotFound)?;
			parent.children.remove(position);
		}
		let orphaned = {
			let child = self.nodes.get_mut(child_name).ok_or(Error::ItemNotFound)?;
			if let Some(position) = child.parents.iter().position(|p| p == parent_name) {
				child.parents.remove(position);
			}
			child.parents.is_empty() && !child.is_root
		};
		if orphaned {
			self.remove_node(child_name, on_delete);
		}
		Ok(())
	}

	// Removes a node and cascades to children it orphans.  Deletion
	// callbacks fire children-first.
	fn remove_node(&mut self, name: &DomainName, on_delete: &mut dyn FnMut(&DomainName)) {
		let Some(node) = self.nodes.remove(name) else {
			return;
		};
		for child_name in &node.children {
			// A self loop resolves to the node just removed and is
			// already gone from the map.
			let orphaned = match self.nodes.get_mut(child_name) {
				Some(child) => {
					if let Some(position) =
						child.parents.iter().position(|p| p == name)
					{
						child.parents.remove(position);
					}
					child.parents.is_empty() && !child.is_root
				},
				None => false,
			};
			if orphaned {
				self.remove_node(child_name, on_delete);
			}
		}
		on_delete(&node.name);
	}
}

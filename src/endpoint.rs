use std::{
	fmt,
	net::SocketAddr,
};

use crate::{
	error::Error,
	name::DomainName,
	record::{
		MdnsRecord,
		Rdata,
		SrvData,
	},
	txt_record::TxtRecord,
};

/// The three parts of a DNS-SD service instance name (RFC 6763,
/// section 4.1): `<instance>.<service>.<domain>`
///
/// The service part is two labels — the service name beginning with an
/// underscore and the protocol, `_udp` or `_tcp`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct InstanceName {
	/// User-visible instance label
	pub instance: String,
	/// Service type, e.g. `_googlecast._tcp`
	pub service: String,
	/// Parent domain, e.g. `local`
	pub domain: String,
}

impl InstanceName {
	/// Split a full instance domain into its parts
	///
	/// Fails with [`Error::ParameterInvalid`] when the name has fewer
	/// than four labels or the service part is malformed.
	pub fn parse(name: &DomainName) -> Result<Self, Error> {
		let labels = name.labels();
		if labels.len() < 4 {
			return Err(Error::ParameterInvalid);
		}
		let service_name = &labels[1];
		let protocol = &labels[2];
		if !service_name.starts_with('_') || service_name.len() < 2 {
			return Err(Error::ParameterInvalid);
		}
		if !protocol.eq_ignore_ascii_case("_udp") && !protocol.eq_ignore_ascii_case("_tcp") {
			return Err(Error::ParameterInvalid);
		}
		Ok(Self {
			instance: labels[0].clone(),
			service: format!("{}.{}", service_name, protocol),
			domain: labels[3..].join("."),
		})
	}
}

impl fmt::Display for InstanceName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}.{}", self.instance, self.service, self.domain)
	}
}

/// A resolved DNS-SD service instance: where to connect and what the
/// instance says about itself
///
/// Derived from the SRV, TXT and address records of one instance; see
/// [`DnsDataGraph::create_endpoints`].
///
/// [`DnsDataGraph::create_endpoints`]: struct.DnsDataGraph.html#method.create_endpoints
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ServiceEndpoint {
	/// Parsed instance name
	pub name: InstanceName,
	/// Validated DNS-SD TXT entries, in record order
	pub txt: Vec<(String, Option<Vec<u8>>)>,
	/// Socket addresses of the instance, in sorted order; at least one
	/// is always present
	pub endpoints: Vec<SocketAddr>,
	/// Index of the network interface the records were received on
	pub network_interface: u32,
}

impl ServiceEndpoint {
	/// Assemble an endpoint from the records of an instance/host node
	/// pair
	///
	/// `a`/`aaaa` come from the host node (at least one must be
	/// present), `srv` and `txt` from the instance node named
	/// `instance_domain`.
	pub(crate) fn from_records(
		instance_domain: &DomainName,
		a: Option<&MdnsRecord>,
		aaaa: Option<&MdnsRecord>,
		srv: &SrvData,
		txt: &TxtRecord,
		network_interface: u32,
	) -> Result<Self, Error> {
		let name = InstanceName::parse(instance_domain)?;
		let txt = txt.dns_sd_pairs()?;

		let mut endpoints = Vec::new();
		if let Some(record) = a {
			if let Rdata::A(address) = &record.rdata {
				endpoints.push(SocketAddr::from((*address, srv.port)));
			}
		}
		if let Some(record) = aaaa {
			if let Rdata::Aaaa(address) = &record.rdata {
				endpoints.push(SocketAddr::from((*address, srv.port)));
			}
		}
		if endpoints.is_empty() {
			return Err(Error::ParameterInvalid);
		}
		endpoints.sort();

		Ok(Self {
			name,
			txt,
			endpoints,
			network_interface,
		})
	}

	/// The addresses of the instance, without ports
	pub fn addresses(&self) -> Vec<std::net::IpAddr> {
		self.endpoints.iter().map(SocketAddr::ip).collect()
	}
}

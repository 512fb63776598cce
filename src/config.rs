bitflags::bitflags! {
	/// IP address families enabled on a discovery interface
	pub struct AddressFamilies: u8 {
		/// Listen for and publish A records over IPv4
		const IPV4 = 0x01;
		/// Listen for and publish AAAA records over IPv6
		const IPV6 = 0x02;
	}
}

/// One network interface discovery runs on
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NetworkInfo {
	/// OS interface index
	pub interface_index: u32,
	/// Address families the mDNS service should use on this interface
	pub supported_address_families: AddressFamilies,
}

/// Parameters of the discovery pipeline, fixed at construction
#[derive(Clone, Debug)]
pub struct Config {
	/// Interfaces on which discovery listens for announced service
	/// instances
	pub network_info: Vec<NetworkInfo>,

	/// Whether querying is enabled; when `false`, starting or stopping
	/// queries is rejected
	pub enable_querying: bool,

	/// Upper bound on the number of times a question is sent, using
	/// exponential back off.  `-1` means no maximum.
	pub new_query_announcement_count: i32,

	/// Soft limit on the querier cache, to keep a malicious or
	/// misbehaving responder from growing memory without bound
	pub querier_max_records_cached: usize,

	/// Number of times newly published records are announced, with
	/// exponential back off (RFC 6762 section 8.3 expects 2 to 8).
	/// Publisher-side; kept here for the shared configuration surface.
	pub new_record_announcement_count: i32,

	/// Include fresh cached answers in outbound questions so
	/// responders can suppress known answers (RFC 6762 section 7.1)
	pub enable_known_answer_suppression: bool,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			network_info: Vec::new(),
			enable_querying: true,
			new_query_announcement_count: -1,
			querier_max_records_cached: 1024,
			new_record_announcement_count: 8,
			enable_known_answer_suppression: true,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{
		AddressFamilies,
		Config,
	};

	#[test]
	fn defaults() {
		let config = Config::default();
		assert!(config.enable_querying);
		assert_eq!(config.new_query_announcement_count, -1);
		assert_eq!(config.querier_max_records_cached, 1024);
		assert_eq!(config.new_record_announcement_count, 8);
	}

	#[test]
	fn address_families_combine() {
		let both = AddressFamilies::IPV4 | AddressFamilies::IPV6;
		assert!(both.contains(AddressFamilies::IPV4));
		assert!(!AddressFamilies::IPV6.contains(AddressFamilies::IPV4));
	}
}

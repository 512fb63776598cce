use log::warn;
use std::{
	io,
	net::{
		Ipv4Addr,
		Ipv6Addr,
	},
};

use crate::record::MdnsMessage;

/// mDNS messages travel over UDP port 5353 (RFC 6762, section 2)
pub const MDNS_PORT: u16 = 5353;

/// IPv4 multicast group for mDNS
pub const MDNS_GROUP_IPV4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// IPv6 multicast group for mDNS
pub const MDNS_GROUP_IPV6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

/// Outbound message boundary
///
/// Implementations serialize the message and put it on the local link.
/// Delivery is best-effort: mDNS is fire-and-forget, so the engine
/// logs send failures and moves on.  The sender may be shared with a
/// publisher subsystem; it is only ever called from the runner thread.
pub trait MdnsSender {
	/// Send `message` to the multicast group
	fn send_multicast(&self, message: &MdnsMessage) -> io::Result<()>;
}

/// Send `message`, logging and swallowing failures
pub(crate) fn send_best_effort(sender: &dyn MdnsSender, message: &MdnsMessage) {
	if let Err(error) = sender.send_multicast(message) {
		warn!("failed to send mDNS message: {}", error);
	}
}

use std::{
	cmp::Ordering,
	fmt,
	hash::{
		Hash,
		Hasher,
	},
	str::FromStr,
};

use crate::error::Error;

// RFC 1035, section 2.3.4: labels are limited to 63 octets, names to
// 255 octets (including the length octets of the wire encoding).
const MAX_LABEL_LENGTH: usize = 63;
const MAX_NAME_LENGTH: usize = 255;

/// A DNS domain name as an ordered sequence of labels
///
/// Names compare, hash and order ASCII-case-insensitively (RFC 6762,
/// section 16: mDNS names are matched ignoring ASCII case), but keep the
/// spelling they were built with for display.
#[derive(Clone)]
pub struct DomainName {
	labels: Vec<String>,
}

impl DomainName {
	/// Build a name from its labels
	///
	/// Fails with [`Error::ParameterInvalid`] when a label is empty or
	/// longer than 63 octets, or the total name exceeds 255 octets in
	/// wire encoding.
	pub fn new<I, T>(labels: I) -> Result<Self, Error>
	where
		I: IntoIterator<Item = T>,
		T: Into<String>,
	{
		let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
		let mut wire_length = 1; // root label
		for label in &labels {
			if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
				return Err(Error::ParameterInvalid);
			}
			wire_length += label.len() + 1;
		}
		if wire_length > MAX_NAME_LENGTH {
			return Err(Error::ParameterInvalid);
		}
		Ok(Self { labels })
	}

	/// The labels of the name, most specific first
	pub fn labels(&self) -> &[String] {
		&self.labels
	}

	/// Number of labels
	pub fn label_count(&self) -> usize {
		self.labels.len()
	}

	/// `true` for the root name (no labels)
	pub fn is_empty(&self) -> bool {
		self.labels.is_empty()
	}

	/// Name formed by dropping the first (most specific) label
	pub fn parent(&self) -> Option<Self> {
		if self.labels.is_empty() {
			return None;
		}
		Some(Self {
			labels: self.labels[1..].to_vec(),
		})
	}

	fn lowercase_labels(&self) -> impl Iterator<Item = String> + '_ {
		self.labels.iter().map(|l| l.to_ascii_lowercase())
	}
}

impl FromStr for DomainName {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Error> {
		let s = s.strip_suffix('.').unwrap_or(s);
		if s.is_empty() {
			return Self::new(Vec::<String>::new());
		}
		Self::new(s.split('.'))
	}
}

impl PartialEq for DomainName {
	fn eq(&self, other: &Self) -> bool {
		self.labels.len() == other.labels.len()
			&& self
				.labels
				.iter()
				.zip(&other.labels)
				.all(|(a, b)| a.eq_ignore_ascii_case(b))
	}
}

impl Eq for DomainName {}

impl Hash for DomainName {
	fn hash<H: Hasher>(&self, state: &mut H) {
		for label in self.lowercase_labels() {
			label.hash(state);
		}
	}
}

impl PartialOrd for DomainName {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for DomainName {
	fn cmp(&self, other: &Self) -> Ordering {
		self.lowercase_labels().cmp(other.lowercase_labels())
	}
}

impl fmt::Display for DomainName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut first = true;
		for label in &self.labels {
			if !first {
				f.write_str(".")?;
			}
			first = false;
			f.write_str(label)?;
		}
		Ok(())
	}
}

impl fmt::Debug for DomainName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "\"{}\"", self)
	}
}

#[cfg(test)]
mod tests {
	use super::DomainName;
	use crate::error::Error;
	use std::collections::hash_map::DefaultHasher;
	use std::hash::{
		Hash,
		Hasher,
	};

	fn name(s: &str) -> DomainName {
		s.parse().unwrap()
	}

	fn hash_of(n: &DomainName) -> u64 {
		let mut hasher = DefaultHasher::new();
		n.hash(&mut hasher);
		hasher.finish()
	}

	#[test]
	fn case_insensitive_identity() {
		let a = name("Inst._Svc._udp.local");
		let b = name("inst._svc._UDP.LOCAL");
		assert_eq!(a, b);
		assert_eq!(hash_of(&a), hash_of(&b));
		assert_eq!(a.to_string(), "Inst._Svc._udp.local");
	}

	#[test]
	fn parse_and_display() {
		let n = name("host.local.");
		assert_eq!(n.labels(), ["host", "local"]);
		assert_eq!(n.to_string(), "host.local");
		assert_eq!(n.parent().unwrap(), name("local"));
	}

	#[test]
	fn rejects_invalid_labels() {
		let long = "x".repeat(64);
		assert_eq!(
			DomainName::new([long.as_str()]).unwrap_err(),
			Error::ParameterInvalid
		);
		assert_eq!(
			DomainName::new(["a", "", "b"]).unwrap_err(),
			Error::ParameterInvalid
		);
	}

	#[test]
	fn rejects_overlong_name() {
		let label = "y".repeat(63);
		let labels = vec![label; 4];
		assert_eq!(
			DomainName::new(labels).unwrap_err(),
			Error::ParameterInvalid
		);
	}
}

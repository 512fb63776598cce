use std::fmt;

use crate::error::Error;

// RFC 6763, section 6.1: each entry is one DNS string, at most 255
// bytes including the key, the `=` separator and the value.
const MAX_ENTRY_LENGTH: usize = 255;

/// Key-value container over DNS `TXT` RDATA
///
/// `TXT` RDATA for DNS-SD (see [RFC 6763, section 6]) is a sequence of
/// possibly empty strings, each up to 255 bytes.  Key and value are
/// separated by the first `=` in an entry; an entry without `=` has a
/// key but no value (which is different from an empty value).  Keys
/// must consist of printable ASCII characters (0x20..=0x7E) apart from
/// `=`, and should be 9 characters or fewer.
///
/// Entries are stored split, in insertion order; [`rdata`] reassembles
/// the wire representation on demand.
///
/// [RFC 6763, section 6]: https://tools.ietf.org/html/rfc6763#section-6
///     "RFC 6763, 6. Data Syntax for DNS-SD TXT Records"
/// [`rdata`]: #method.rdata
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxtRecord {
	entries: Vec<Vec<u8>>,
}

impl TxtRecord {
	/// Constructs a new, empty `TxtRecord`.
	pub fn new() -> Self {
		Self::default()
	}

	/// Parse a binary blob as TXT RDATA
	///
	/// A single empty string (encoded as `0x00`) decodes as an "empty"
	/// `TxtRecord`; an empty slice is treated the same, although it
	/// would not be valid RDATA on the wire.
	///
	/// This only fails when the length of a chunk exceeds the remaining
	/// data.
	pub fn parse(mut data: &[u8]) -> Option<Self> {
		if data == [0] {
			return Some(Self::new());
		}
		let mut entries = Vec::new();
		while !data.is_empty() {
			let len = data[0] as usize;
			if 1 + len > data.len() {
				return None;
			}
			if len > 0 {
				entries.push(data[1..][..len].to_vec());
			}
			data = &data[1 + len..];
		}
		Some(Self { entries })
	}

	/// Serialize to valid TXT RDATA
	///
	/// An empty container yields a TXT record with a single empty
	/// string (`&[0x00]`), since empty RDATA is not allowed.
	pub fn rdata(&self) -> Vec<u8> {
		if self.entries.is_empty() {
			return vec![0x00];
		}
		let mut out = Vec::new();
		for entry in &self.entries {
			out.push(entry.len() as u8);
			out.extend_from_slice(entry);
		}
		out
	}

	/// Returns `true` if there are no entries.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Number of entries.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Removes all entries.
	pub fn clear(&mut self) {
		self.entries.clear();
	}

	/// Iterate over all `(key, value)` pairs in insertion order.
	pub fn iter(&self) -> impl Iterator<Item = (&[u8], Option<&[u8]>)> {
		self.entries.iter().map(|entry| split_entry(entry))
	}

	/// Get value for the entry with the given key
	///
	/// Returns `None` if there is no such entry, `Some(None)` if the
	/// entry exists but has no value, and `Some(Some(value))` if the
	/// entry exists and has a value.  Key lookup ignores ASCII case
	/// (RFC 6763, section 6.4).
	#[allow(clippy::option_option)]
	pub fn get(&self, key: &[u8]) -> Option<Option<&[u8]>> {
		self.iter()
			.find(|&(k, _)| k.eq_ignore_ascii_case(key))
			.map(|(_, value)| value)
	}

	/// Remove the entry with the given key (if it exists)
	pub fn remove(&mut self, key: &[u8]) {
		self.entries
			.retain(|entry| !split_entry(entry).0.eq_ignore_ascii_case(key));
	}

	/// Insert or replace the entry with `key`, with or without a value
	pub fn set(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<(), Error> {
		validate_key(key)?;
		let entry_len = key.len() + value.map(|v| v.len() + 1).unwrap_or(0);
		if entry_len > MAX_ENTRY_LENGTH {
			return Err(Error::ParameterInvalid);
		}
		self.remove(key);

		let mut entry = Vec::with_capacity(entry_len);
		entry.extend_from_slice(key);
		if let Some(value) = value {
			entry.push(b'=');
			entry.extend_from_slice(value);
		}
		self.entries.push(entry);
		Ok(())
	}

	/// Validated DNS-SD view of the entries
	///
	/// Applies the RFC 6763 section 6.4 rules to every entry: the key
	/// must be non-empty printable ASCII without `=`.  Fails with
	/// [`Error::ParameterInvalid`] on the first malformed entry, so a
	/// received TXT record that is not valid DNS-SD data surfaces as an
	/// error instead of a half-parsed map.
	pub fn dns_sd_pairs(&self) -> Result<Vec<(String, Option<Vec<u8>>)>, Error> {
		let mut pairs = Vec::with_capacity(self.entries.len());
		for (key, value) in self.iter() {
			validate_key(key)?;
			// keys are printable ASCII here, so this cannot fail
			let key = String::from_utf8(key.to_vec()).map_err(|_| Error::ParameterInvalid)?;
			pairs.push((key, value.map(<[u8]>::to_vec)));
		}
		Ok(pairs)
	}
}

fn split_entry(entry: &[u8]) -> (&[u8], Option<&[u8]>) {
	match entry.iter().position(|&b| b == b'=') {
		Some(pos) => (&entry[..pos], Some(&entry[pos + 1..])),
		None => (entry, None),
	}
}

fn validate_key(key: &[u8]) -> Result<(), Error> {
	if key.is_empty() {
		return Err(Error::ParameterInvalid);
	}
	for &b in key {
		if b == b'=' || !(0x20..=0x7e).contains(&b) {
			return Err(Error::ParameterInvalid);
		}
	}
	Ok(())
}

impl fmt::Debug for TxtRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut map = f.debug_map();
		for (key, value) in self.iter() {
			map.entry(
				&String::from_utf8_lossy(key),
				&value.map(String::from_utf8_lossy),
			);
		}
		map.finish()
	}
}

use crate::{
	error::Error,
	record::MdnsRecord,
};

/// Sink for conditions the engine survives but an embedder may want to
/// observe
///
/// No error reported here is fatal; the engine keeps running either
/// way.
pub trait ReportingClient {
	/// A recoverable error occurred (e.g. a received record could not
	/// be applied to its tracker, or a graph change was rejected)
	fn on_recoverable_error(&self, error: Error);

	/// A cached record was evicted to keep the cache under its size
	/// cap
	fn on_cache_eviction(&self, _record: &MdnsRecord) {}
}

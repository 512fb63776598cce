use std::time::Duration;

use rand::Rng;

// RFC 6762 section 5.2: the first query of a continuous question is
// delayed by a random amount in this range.
const INITIAL_QUERY_DELAY_MIN_MS: u64 = 20;
const INITIAL_QUERY_DELAY_MAX_MS: u64 = 120;

// Refresh attempts happen at 80/85/90/95% of TTL "plus a random
// variation of 0-2%" (RFC 6762 section 5.2).
const TTL_VARIATION_MAX: f64 = 0.02;

/// Source of the randomized delays mDNS requires
///
/// A seam rather than direct RNG calls so tests can pin jitter to
/// deterministic values.
pub trait RandomDelay {
	/// Delay before the first send of a new question, uniform in
	/// 20–120 ms
	fn initial_query_delay(&self) -> Duration;

	/// Extra TTL fraction added to a record refresh time, uniform in
	/// [0, 0.02)
	fn record_ttl_variation(&self) -> f64;
}

/// Production [`RandomDelay`] backed by the thread-local RNG
#[derive(Default)]
pub struct MdnsRandom;

impl MdnsRandom {
	/// New jitter source
	pub fn new() -> Self {
		Self
	}
}

impl RandomDelay for MdnsRandom {
	fn initial_query_delay(&self) -> Duration {
		let ms = rand::thread_rng()
			.gen_range(INITIAL_QUERY_DELAY_MIN_MS..=INITIAL_QUERY_DELAY_MAX_MS);
		Duration::from_millis(ms)
	}

	fn record_ttl_variation(&self) -> f64 {
		rand::thread_rng().gen_range(0.0..TTL_VARIATION_MAX)
	}
}

#[cfg(test)]
mod tests {
	use super::{
		MdnsRandom,
		RandomDelay,
	};
	use std::time::Duration;

	#[test]
	fn delays_stay_in_range() {
		let random = MdnsRandom::new();
		for _ in 0..200 {
			let delay = random.initial_query_delay();
			assert!(delay >= Duration::from_millis(20));
			assert!(delay <= Duration::from_millis(120));

			let variation = random.record_ttl_variation();
			assert!((0.0..0.02).contains(&variation));
		}
	}
}

//! Deterministic test doubles for the engine's external collaborators
//!
//! The engine's behavior is entirely driven by the task runner's clock,
//! the jitter source and the inbound message feed, so pinning those
//! three makes every schedule and callback reproducible.

use std::{
	cell::{
		Cell,
		RefCell,
	},
	io,
	rc::Rc,
	time::{
		Duration,
		Instant,
	},
};

use crate::{
	dns_consts::RecordChangedEvent,
	error::Error,
	querier::MdnsRecordChangedCallback,
	random::RandomDelay,
	record::{
		MdnsMessage,
		MdnsRecord,
	},
	reporting::ReportingClient,
	runner::TaskRunner,
	sender::MdnsSender,
};

struct ScheduledTask {
	fire_time: Instant,
	seq: u64,
	task: Box<dyn FnOnce()>,
}

struct FakeRunnerState {
	now: Instant,
	next_seq: u64,
	tasks: Vec<ScheduledTask>,
}

/// [`TaskRunner`] with a manually advanced clock
///
/// Posted tasks are queued with their due time; [`advance`] moves the
/// clock forward, running every due task in (time, post-order) order.
/// Tasks posted while running are picked up in the same pass when they
/// fall within the advanced window.
///
/// [`advance`]: #method.advance
#[derive(Clone)]
pub struct FakeTaskRunner {
	state: Rc<RefCell<FakeRunnerState>>,
}

impl FakeTaskRunner {
	/// New runner; the clock starts at the current instant and only
	/// moves via [`advance`](#method.advance)
	pub fn new() -> Self {
		Self {
			state: Rc::new(RefCell::new(FakeRunnerState {
				now: Instant::now(),
				next_seq: 0,
				tasks: Vec::new(),
			})),
		}
	}

	/// Move the clock forward by `duration`, running all tasks that
	/// come due
	pub fn advance(&self, duration: Duration) {
		let deadline = self.state.borrow().now + duration;
		loop {
			let next = {
				let mut state = self.state.borrow_mut();
				let due = state
					.tasks
					.iter()
					.enumerate()
					.filter(|(_, t)| t.fire_time <= deadline)
					.min_by_key(|(_, t)| (t.fire_time, t.seq))
					.map(|(index, _)| index);
				match due {
					Some(index) => {
						let entry = state.tasks.swap_remove(index);
						if entry.fire_time > state.now {
							state.now = entry.fire_time;
						}
						Some(entry.task)
					},
					None => None,
				}
			};
			match next {
				// run with the state borrow released, so the task may
				// post more tasks
				Some(task) => task(),
				None => break,
			}
		}
		self.state.borrow_mut().now = deadline;
	}

	/// Run tasks already due without moving the clock
	pub fn run_pending(&self) {
		self.advance(Duration::ZERO);
	}

	/// Number of tasks waiting to fire
	pub fn pending_tasks(&self) -> usize {
		self.state.borrow().tasks.len()
	}
}

impl Default for FakeTaskRunner {
	fn default() -> Self {
		Self::new()
	}
}

impl TaskRunner for FakeTaskRunner {
	fn post_task(&self, task: Box<dyn FnOnce()>) {
		self.post_task_with_delay(task, Duration::ZERO);
	}

	fn post_task_with_delay(&self, task: Box<dyn FnOnce()>, delay: Duration) {
		let mut state = self.state.borrow_mut();
		let fire_time = state.now + delay;
		let seq = state.next_seq;
		state.next_seq += 1;
		state.tasks.push(ScheduledTask {
			fire_time,
			seq,
			task,
		});
	}

	fn is_on_task_runner(&self) -> bool {
		true
	}

	fn now(&self) -> Instant {
		self.state.borrow().now
	}
}

/// [`MdnsSender`] that captures sent messages instead of hitting the
/// network
#[derive(Clone, Default)]
pub struct FakeSender {
	messages: Rc<RefCell<Vec<MdnsMessage>>>,
	fail_sends: Rc<Cell<bool>>,
}

impl FakeSender {
	/// New capturing sender
	pub fn new() -> Self {
		Self::default()
	}

	/// Messages sent since the last call, oldest first
	pub fn take_messages(&self) -> Vec<MdnsMessage> {
		self.messages.borrow_mut().drain(..).collect()
	}

	/// Total messages currently captured
	pub fn sent_count(&self) -> usize {
		self.messages.borrow().len()
	}

	/// Make subsequent sends fail with an I/O error
	pub fn set_fail_sends(&self, fail: bool) {
		self.fail_sends.set(fail);
	}
}

impl MdnsSender for FakeSender {
	fn send_multicast(&self, message: &MdnsMessage) -> io::Result<()> {
		if self.fail_sends.get() {
			return Err(io::Error::new(io::ErrorKind::Other, "send disabled"));
		}
		self.messages.borrow_mut().push(message.clone());
		Ok(())
	}
}

/// [`RandomDelay`] returning fixed values
pub struct FixedRandom {
	initial_delay: Cell<Duration>,
	ttl_variation: Cell<f64>,
}

impl FixedRandom {
	/// Pin the initial query delay to 50 ms and the TTL variation to 0
	pub fn new() -> Self {
		Self::with_values(Duration::from_millis(50), 0.0)
	}

	/// Pin both jitter values
	pub fn with_values(initial_delay: Duration, ttl_variation: f64) -> Self {
		Self {
			initial_delay: Cell::new(initial_delay),
			ttl_variation: Cell::new(ttl_variation),
		}
	}
}

impl Default for FixedRandom {
	fn default() -> Self {
		Self::new()
	}
}

impl RandomDelay for FixedRandom {
	fn initial_query_delay(&self) -> Duration {
		self.initial_delay.get()
	}

	fn record_ttl_variation(&self) -> f64 {
		self.ttl_variation.get()
	}
}

/// Subscriber callback that records every delivered event
#[derive(Default)]
pub struct CollectingCallback {
	events: RefCell<Vec<(MdnsRecord, RecordChangedEvent)>>,
}

impl CollectingCallback {
	/// New empty collector
	pub fn new() -> Self {
		Self::default()
	}

	/// Events delivered since the last call, oldest first
	pub fn take_events(&self) -> Vec<(MdnsRecord, RecordChangedEvent)> {
		self.events.borrow_mut().drain(..).collect()
	}

	/// Number of events currently collected
	pub fn event_count(&self) -> usize {
		self.events.borrow().len()
	}
}

impl MdnsRecordChangedCallback for CollectingCallback {
	fn on_record_changed(&self, record: &MdnsRecord, event: RecordChangedEvent) {
		self.events.borrow_mut().push((record.clone(), event));
	}
}

/// [`ReportingClient`] that drops every report
#[derive(Default)]
pub struct NullReportingClient;

impl ReportingClient for NullReportingClient {
	fn on_recoverable_error(&self, _error: Error) {}
}

/// [`ReportingClient`] that records every report
#[derive(Default)]
pub struct CollectingReporter {
	errors: RefCell<Vec<Error>>,
	evictions: RefCell<Vec<MdnsRecord>>,
}

impl CollectingReporter {
	/// New empty reporter
	pub fn new() -> Self {
		Self::default()
	}

	/// Recoverable errors reported so far
	pub fn errors(&self) -> Vec<Error> {
		self.errors.borrow().clone()
	}

	/// Records evicted from the cache so far
	pub fn evictions(&self) -> Vec<MdnsRecord> {
		self.evictions.borrow().clone()
	}
}

impl ReportingClient for CollectingReporter {
	fn on_recoverable_error(&self, error: Error) {
		self.errors.borrow_mut().push(error);
	}

	fn on_cache_eviction(&self, record: &MdnsRecord) {
		self.evictions.borrow_mut().push(record.clone());
	}
}

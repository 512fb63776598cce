use log::{
	debug,
	trace,
	warn,
};
use std::{
	cell::RefCell,
	collections::HashMap,
	rc::{
		Rc,
		Weak,
	},
	time::{
		Duration,
		Instant,
	},
};

use crate::{
	config::Config,
	dns_consts::{
		DnsClass,
		DnsType,
		RecordChangedEvent,
		RecordType,
		ResponseType,
	},
	error::Error,
	name::DomainName,
	random::RandomDelay,
	record::{
		MdnsMessage,
		MdnsQuestion,
		MdnsRecord,
		MessageType,
		Rdata,
	},
	reporting::ReportingClient,
	runner::RunnerHandle,
	sender::MdnsSender,
	tracker::{
		QuestionTracker,
		RecordExpiredCallback,
		RecordTracker,
		UpdateType,
	},
};

/// Subscriber notification interface
///
/// Implementations must be non-blocking, and must not call back into
/// the querier from inside the notification other than through posted
/// tasks.
pub trait MdnsRecordChangedCallback {
	/// A cached record matching the subscription changed
	fn on_record_changed(&self, record: &MdnsRecord, event: RecordChangedEvent);
}

struct CallbackEntry {
	callback: Rc<dyn MdnsRecordChangedCallback>,
	dns_type: DnsType,
	dns_class: DnsClass,
}

// One callback delivery, collected while the querier state is borrowed
// and run after the borrow is released.
struct Dispatch {
	callback: Rc<dyn MdnsRecordChangedCallback>,
	record: MdnsRecord,
	event: RecordChangedEvent,
}

fn run_dispatches(dispatches: Vec<Dispatch>) {
	for dispatch in dispatches {
		dispatch
			.callback
			.on_record_changed(&dispatch.record, dispatch.event);
	}
}

fn is_negative_response_for(record: &MdnsRecord, dns_type: DnsType) -> bool {
	match &record.rdata {
		Rdata::Nsec(nsec) => nsec.is_negative_response() && nsec.covers(dns_type),
		_ => false,
	}
}

/// Continuous mDNS querier: subscription bookkeeping, a bounded record
/// cache and the record-change state machine
///
/// The querier owns one [`QuestionTracker`] per active
/// `(name, type, class)` subscription and one [`RecordTracker`] per
/// distinct cached record.  Received responses update tracker state and
/// fan out change events to the registered callbacks.
///
/// Handles are cheaply cloneable; all state lives on the single
/// task-runner thread.
#[derive(Clone)]
pub struct MdnsQuerier {
	inner: Rc<RefCell<Inner>>,
}

struct Inner {
	sender: Rc<dyn MdnsSender>,
	runner: RunnerHandle,
	random: Rc<dyn RandomDelay>,
	reporting: Rc<dyn ReportingClient>,
	enable_querying: bool,
	max_records_cached: usize,
	max_announcement_count: i32,
	known_answer_suppression: bool,
	callbacks: HashMap<DomainName, Vec<CallbackEntry>>,
	questions: HashMap<DomainName, Vec<Rc<RefCell<QuestionTracker>>>>,
	records: HashMap<DomainName, Vec<Rc<RefCell<RecordTracker>>>>,
	record_count: usize,
	self_ref: Weak<RefCell<Inner>>,
}

impl MdnsQuerier {
	/// New querier using the given collaborators and configuration
	pub fn new(
		sender: Rc<dyn MdnsSender>,
		runner: RunnerHandle,
		random: Rc<dyn RandomDelay>,
		reporting: Rc<dyn ReportingClient>,
		config: &Config,
	) -> Self {
		let inner = Rc::new_cyclic(|self_ref: &Weak<RefCell<Inner>>| {
			RefCell::new(Inner {
				sender,
				runner,
				random,
				reporting,
				enable_querying: config.enable_querying,
				max_records_cached: config.querier_max_records_cached,
				max_announcement_count: config.new_query_announcement_count,
				known_answer_suppression: config.enable_known_answer_suppression,
				callbacks: HashMap::new(),
				questions: HashMap::new(),
				records: HashMap::new(),
				record_count: 0,
				self_ref: self_ref.clone(),
			})
		});
		Self { inner }
	}

	/// Subscribe `callback` to changes of `(name, dns_type, dns_class)`
	///
	/// `dns_type` must not be `NSEC`.  An identical registration is a
	/// no-op.  The callback is immediately notified with `Created` for
	/// every cached positive record matching the subscription, and a
	/// question is started if none covers the key yet.
	pub fn start_query(
		&self,
		name: &DomainName,
		dns_type: DnsType,
		dns_class: DnsClass,
		callback: &Rc<dyn MdnsRecordChangedCallback>,
	) -> Result<(), Error> {
		debug_assert!(self.inner.borrow().runner.is_on_task_runner());
		if !self.inner.borrow().enable_querying {
			return Err(Error::OperationInvalid);
		}
		if dns_type == DnsType::Nsec {
			return Err(Error::ParameterInvalid);
		}
		let dispatches =
			self.inner
				.borrow_mut()
				.start_query(name, dns_type, dns_class, callback);
		run_dispatches(dispatches);
		Ok(())
	}

	/// Remove the registration of `callback` for
	/// `(name, dns_type, dns_class)`
	///
	/// When no callbacks remain for the key, the question is dropped.
	/// Cached records are retained; TTL expiry and the cache cap govern
	/// their lifetime.
	pub fn stop_query(
		&self,
		name: &DomainName,
		dns_type: DnsType,
		dns_class: DnsClass,
		callback: &Rc<dyn MdnsRecordChangedCallback>,
	) -> Result<(), Error> {
		debug_assert!(self.inner.borrow().runner.is_on_task_runner());
		if !self.inner.borrow().enable_querying {
			return Err(Error::OperationInvalid);
		}
		if dns_type == DnsType::Nsec {
			return Err(Error::ParameterInvalid);
		}
		self.inner
			.borrow_mut()
			.stop_query(name, dns_type, dns_class, callback);
		Ok(())
	}

	/// Drop all questions and cached records for `name` and restart
	/// every registered query
	pub fn reinitialize_queries(&self, name: &DomainName) {
		debug_assert!(self.inner.borrow().runner.is_on_task_runner());
		let saved = {
			let mut inner = self.inner.borrow_mut();
			let saved = inner.callbacks.remove(name).unwrap_or_default();
			if let Some(questions) = inner.questions.remove(name) {
				for question in questions {
					let _ = question.borrow_mut().stop();
				}
			}
			if let Some(records) = inner.records.remove(name) {
				inner.record_count -= records.len();
				for record in records {
					let _ = record.borrow_mut().stop();
				}
			}
			saved
		};
		for entry in saved {
			let _ = self.start_query(name, entry.dns_type, entry.dns_class, &entry.callback);
		}
	}

	/// Feed a received message into the cache
	///
	/// Only responses are accepted.  Answers are processed in order
	/// before additional records; each record passes the relevance
	/// filter against the questions and cache state at its turn, so a
	/// callback that registers a follow-up query influences the records
	/// after it in the same message.
	pub fn on_message_received(&self, message: &MdnsMessage) {
		debug_assert!(self.inner.borrow().runner.is_on_task_runner());
		debug_assert!(message.message_type == MessageType::Response);
		if message.message_type != MessageType::Response {
			return;
		}
		debug!(
			"received mDNS response: {} answers, {} additional records",
			message.answers.len(),
			message.additional_records.len(),
		);

		let mut found_relevant = false;
		for answer in &message.answers {
			let dispatches = {
				let mut inner = self.inner.borrow_mut();
				if inner.should_process(answer) {
					found_relevant = true;
					inner.process_record(answer)
				} else {
					Vec::new()
				}
			};
			run_dispatches(dispatches);
		}

		// With a relevant answer present all additional records are
		// taken; otherwise they pass the same filter individually.
		for additional in &message.additional_records {
			let dispatches = {
				let mut inner = self.inner.borrow_mut();
				if found_relevant || inner.should_process(additional) {
					inner.process_record(additional)
				} else {
					Vec::new()
				}
			};
			run_dispatches(dispatches);
		}
	}

	/// Number of records currently cached
	pub fn cached_record_count(&self) -> usize {
		self.inner.borrow().record_count
	}

	/// Number of active questions
	pub fn active_question_count(&self) -> usize {
		self.inner.borrow().questions.values().map(Vec::len).sum()
	}
}

impl Inner {
	fn start_query(
		&mut self,
		name: &DomainName,
		dns_type: DnsType,
		dns_class: DnsClass,
		callback: &Rc<dyn MdnsRecordChangedCallback>,
	) -> Vec<Dispatch> {
		let entries = self.callbacks.entry(name.clone()).or_default();
		let already_registered = entries.iter().any(|entry| {
			entry.dns_type == dns_type
				&& entry.dns_class == dns_class
				&& Rc::ptr_eq(&entry.callback, callback)
		});
		if already_registered {
			return Vec::new();
		}
		entries.push(CallbackEntry {
			callback: callback.clone(),
			dns_type,
			dns_class,
		});

		// Notify the new callback with previously cached records.
		let mut dispatches = Vec::new();
		let now = self.runner.now();
		if let Some(trackers) = self.records.get(name) {
			for tracker in trackers {
				let mut tracker = tracker.borrow_mut();
				let relevant = (dns_type == DnsType::Any || dns_type == tracker.dns_type())
					&& (dns_class == DnsClass::Any || dns_class == tracker.dns_class())
					&& !tracker.is_negative_response();
				if relevant {
					if let Some(record) = tracker.record() {
						dispatches.push(Dispatch {
							callback: callback.clone(),
							record: record.clone(),
							event: RecordChangedEvent::Created,
						});
					}
					tracker.touch(now);
				}
			}
		}

		let question_exists = self
			.questions
			.get(name)
			.into_iter()
			.flatten()
			.any(|question| {
				question.borrow().question().is_some_and(|q| {
					q.dns_type == dns_type && q.dns_class == dns_class
				})
			});
		if !question_exists {
			self.add_question(name, dns_type, dns_class);
		}
		dispatches
	}

	fn stop_query(
		&mut self,
		name: &DomainName,
		dns_type: DnsType,
		dns_class: DnsClass,
		callback: &Rc<dyn MdnsRecordChangedCallback>,
	) {
		let mut remaining_for_key = 0;
		let callbacks_empty = match self.callbacks.get_mut(name) {
			Some(entries) => {
				entries.retain(|entry| {
					if entry.dns_type == dns_type && entry.dns_class == dns_class {
						if Rc::ptr_eq(&entry.callback, callback) {
							return false;
						}
						remaining_for_key += 1;
					}
					true
				});
				entries.is_empty()
			},
			None => false,
		};
		if callbacks_empty {
			self.callbacks.remove(name);
		}
		if remaining_for_key > 0 {
			return;
		}

		// Last subscriber for the key gone: drop the question.  Cached
		// records stay; they may still answer other queries.
		let questions_empty = match self.questions.get_mut(name) {
			Some(questions) => {
				let position = questions.iter().position(|question| {
					question.borrow().question().is_some_and(|q| {
						q.dns_type == dns_type && q.dns_class == dns_class
					})
				});
				if let Some(position) = position {
					let question = questions.remove(position);
					let _ = question.borrow_mut().stop();
				}
				questions.is_empty()
			},
			None => false,
		};
		if questions_empty {
			self.questions.remove(name);
		}
	}

	fn should_process(&self, answer: &MdnsRecord) -> bool {
		// Accept the record when it answers an ongoing question.
		if let Some(questions) = self.questions.get(&answer.name) {
			for question in questions {
				let question = question.borrow();
				let Some(q) = question.question() else { continue };
				let type_relevant = q.dns_type == DnsType::Any
					|| q.dns_type == answer.dns_type
					|| is_negative_response_for(answer, q.dns_type);
				let class_relevant =
					q.dns_class == DnsClass::Any || q.dns_class == answer.dns_class;
				if type_relevant && class_relevant {
					return true;
				}
			}
		}

		// Otherwise accept it when it refreshes an already cached
		// record; such records may have arrived in an additional
		// section, or belong to a query that is no longer active.
		if let Some(trackers) = self.records.get(&answer.name) {
			for tracker in trackers {
				let tracker = tracker.borrow();
				if answer.dns_type != DnsType::Nsec {
					if tracker.dns_type() == answer.dns_type
						&& tracker.dns_class() == answer.dns_class
					{
						return true;
					}
				} else if let Rdata::Nsec(nsec) = &answer.rdata {
					if nsec.covers(tracker.dns_type())
						&& answer.dns_class == tracker.dns_class()
					{
						return true;
					}
				}
			}
		}
		false
	}

	fn process_record(&mut self, record: &MdnsRecord) -> Vec<Dispatch> {
		// An NSEC record stands for every type it asserts absent; all
		// other records stand for their own type only.
		let dns_types = match &record.rdata {
			Rdata::Nsec(nsec) => nsec.covered_types(),
			_ => vec![record.dns_type],
		};

		let mut dispatches = Vec::new();
		for dns_type in dns_types {
			match record.record_type {
				RecordType::Shared => {
					self.process_shared_record(record, dns_type, &mut dispatches)
				},
				RecordType::Unique => {
					self.process_unique_record(record, dns_type, &mut dispatches)
				},
			}
		}
		dispatches
	}

	fn process_shared_record(
		&mut self,
		record: &MdnsRecord,
		dns_type: DnsType,
		dispatches: &mut Vec<Dispatch>,
	) {
		// NSEC records are never shared.
		if record.dns_type == DnsType::Nsec {
			return;
		}

		let existing = self
			.records
			.get(&record.name)
			.into_iter()
			.flatten()
			.find(|tracker| {
				let tracker = tracker.borrow();
				tracker.dns_type() == dns_type
					&& tracker.dns_class() == record.dns_class
					&& tracker.record().is_some_and(|r| r.rdata == record.rdata)
			})
			.cloned();

		if let Some(tracker) = existing {
			// Same RDATA seen before: TTL-only refresh, no notification.
			if let Err(error) = tracker.borrow_mut().update(record) {
				warn!("shared record refresh for {} failed: {}", record.name, error);
				self.reporting
					.on_recoverable_error(Error::UpdateReceivedRecordFailure);
			}
			return;
		}

		self.add_record(record, dns_type);
		self.collect_callbacks(record, RecordChangedEvent::Created, dispatches);
	}

	fn process_unique_record(
		&mut self,
		record: &MdnsRecord,
		dns_type: DnsType,
		dispatches: &mut Vec<Dispatch>,
	) {
		let matching: Vec<Rc<RefCell<RecordTracker>>> = self
			.records
			.get(&record.name)
			.into_iter()
			.flatten()
			.filter(|tracker| {
				let tracker = tracker.borrow();
				tracker.dns_type() == dns_type && tracker.dns_class() == record.dns_class
			})
			.cloned()
			.collect();

		match matching.len() {
			// First time this key is seen.
			0 => {
				let will_exist = record.dns_type != DnsType::Nsec;
				self.add_record(record, dns_type);
				if will_exist {
					self.collect_callbacks(record, RecordChangedEvent::Created, dispatches);
				}
			},
			1 => self.process_singly_tracked(record, &matching[0], dispatches),
			_ => self.process_multi_tracked(record, dns_type, &matching, dispatches),
		}
	}

	fn process_singly_tracked(
		&mut self,
		record: &MdnsRecord,
		tracker: &Rc<RefCell<RecordTracker>>,
		dispatches: &mut Vec<Dispatch>,
	) {
		let existed_previously = !tracker.borrow().is_negative_response();
		let will_exist = record.dns_type != DnsType::Nsec;

		// Pick the record to report before the update replaces it: a
		// positive record going negative is reported with its old data.
		let record_for_callback = if existed_previously && !will_exist {
			tracker.borrow().record().cloned()
		} else {
			Some(record.clone())
		};

		// bind the result first so the tracker borrow ends before the
		// arms borrow it again
		let result = tracker.borrow_mut().update(record);
		match result {
			Err(error) => {
				warn!("record update for {} failed: {}", record.name, error);
				self.reporting
					.on_recoverable_error(Error::UpdateReceivedRecordFailure);
			},
			Ok(UpdateType::Goodbye) => {
				let _ = tracker.borrow_mut().expire_soon();
			},
			Ok(UpdateType::TtlOnly) => {},
			Ok(UpdateType::Rdata) => {
				let Some(record_for_callback) = record_for_callback else {
					return;
				};
				if existed_previously && will_exist {
					self.collect_callbacks(
						&record_for_callback,
						RecordChangedEvent::Updated,
						dispatches,
					);
				} else if existed_previously {
					// The tracker stays, now holding the negative
					// response.
					self.collect_callbacks(
						&record_for_callback,
						RecordChangedEvent::Expired,
						dispatches,
					);
				} else if will_exist {
					self.collect_callbacks(
						&record_for_callback,
						RecordChangedEvent::Created,
						dispatches,
					);
				}
			},
		}
	}

	fn process_multi_tracked(
		&mut self,
		record: &MdnsRecord,
		dns_type: DnsType,
		matching: &[Rc<RefCell<RecordTracker>>],
		dispatches: &mut Vec<Dispatch>,
	) {
		let mut is_new_record = true;
		for tracker in matching {
			let rdata_matches = tracker
				.borrow()
				.record()
				.is_some_and(|r| r.rdata == record.rdata);
			if rdata_matches {
				is_new_record = false;
				let result = tracker.borrow_mut().update(record);
				match result {
					Err(error) => {
						warn!("record update for {} failed: {}", record.name, error);
						self.reporting
							.on_recoverable_error(Error::UpdateReceivedRecordFailure);
					},
					Ok(UpdateType::Goodbye) => {
						let _ = tracker.borrow_mut().expire_soon();
					},
					Ok(UpdateType::TtlOnly) => {},
					// RDATA was just compared equal.
					Ok(UpdateType::Rdata) => debug_assert!(false),
				}
			} else {
				let _ = tracker.borrow_mut().expire_soon();
			}
		}

		if is_new_record {
			self.add_record(record, dns_type);
			if record.dns_type != DnsType::Nsec {
				self.collect_callbacks(record, RecordChangedEvent::Created, dispatches);
			}
		}
	}

	fn on_record_expired(
		&mut self,
		tracker: &Rc<RefCell<RecordTracker>>,
		record: &MdnsRecord,
	) -> Vec<Dispatch> {
		let mut dispatches = Vec::new();
		if !tracker.borrow().is_negative_response() {
			self.collect_callbacks(record, RecordChangedEvent::Expired, &mut dispatches);
		}
		self.remove_record_tracker(&record.name, tracker);
		dispatches
	}

	fn remove_record_tracker(
		&mut self,
		name: &DomainName,
		tracker: &Rc<RefCell<RecordTracker>>,
	) {
		let records_empty = match self.records.get_mut(name) {
			Some(trackers) => {
				if let Some(position) =
					trackers.iter().position(|t| Rc::ptr_eq(t, tracker))
				{
					trackers.remove(position);
					self.record_count -= 1;
				}
				trackers.is_empty()
			},
			None => false,
		};
		if records_empty {
			self.records.remove(name);
		}
		if let Some(questions) = self.questions.get(name) {
			for question in questions {
				question.borrow_mut().remove_associated_record(tracker);
			}
		}
	}

	fn collect_callbacks(
		&self,
		record: &MdnsRecord,
		event: RecordChangedEvent,
		dispatches: &mut Vec<Dispatch>,
	) {
		let Some(entries) = self.callbacks.get(&record.name) else {
			return;
		};
		for entry in entries {
			let relevant = (entry.dns_type == DnsType::Any
				|| record.dns_type == entry.dns_type)
				&& (entry.dns_class == DnsClass::Any || record.dns_class == entry.dns_class);
			if relevant {
				dispatches.push(Dispatch {
					callback: entry.callback.clone(),
					record: record.clone(),
					event,
				});
			}
		}
	}

	fn add_question(&mut self, name: &DomainName, dns_type: DnsType, dns_class: DnsClass) {
		let tracker = QuestionTracker::create(
			self.sender.clone(),
			self.runner.clone(),
			self.random.clone(),
			self.max_announcement_count,
			self.known_answer_suppression,
		);

		// Existing cached records answer the new question; associate
		// them both ways for known-answer suppression.
		if let Some(records) = self.records.get(name) {
			for record_tracker in records {
				let relevant = {
					let record_tracker = record_tracker.borrow();
					(dns_type == DnsType::Any || dns_type == record_tracker.dns_type())
						&& (dns_class == DnsClass::Any
							|| dns_class == record_tracker.dns_class())
				};
				if relevant {
					tracker
						.borrow_mut()
						.add_associated_record(Rc::downgrade(record_tracker));
					record_tracker
						.borrow_mut()
						.add_associated_question(Rc::downgrade(&tracker));
				}
			}
		}

		let question = MdnsQuestion {
			name: name.clone(),
			dns_type,
			dns_class,
			response_type: ResponseType::Multicast,
		};
		if tracker.borrow_mut().start(question).is_ok() {
			self.questions
				.entry(name.clone())
				.or_default()
				.push(tracker);
		}
	}

	fn add_record(&mut self, record: &MdnsRecord, dns_type: DnsType) {
		self.evict_if_needed();

		let weak_inner = self.self_ref.clone();
		let expired_callback: RecordExpiredCallback = Rc::new(move |tracker, record| {
			if let Some(inner) = weak_inner.upgrade() {
				let dispatches = inner.borrow_mut().on_record_expired(tracker, record);
				run_dispatches(dispatches);
			}
		});

		let tracker = match RecordTracker::create(
			record.clone(),
			dns_type,
			self.sender.clone(),
			self.runner.clone(),
			self.random.clone(),
			expired_callback,
		) {
			Ok(tracker) => tracker,
			Err(error) => {
				warn!("failed to track record {}: {}", record.name, error);
				self.reporting.on_recoverable_error(error);
				return;
			},
		};

		// Associate the new record with the questions it answers.
		if let Some(questions) = self.questions.get(&record.name) {
			for question_tracker in questions {
				let relevant = question_tracker.borrow().question().is_some_and(|q| {
					(q.dns_type == DnsType::Any || q.dns_type == dns_type)
						&& (q.dns_class == DnsClass::Any
							|| q.dns_class == record.dns_class)
				});
				if relevant {
					question_tracker
						.borrow_mut()
						.add_associated_record(Rc::downgrade(&tracker));
					tracker
						.borrow_mut()
						.add_associated_question(Rc::downgrade(question_tracker));
				}
			}
		}

		self.records
			.entry(record.name.clone())
			.or_default()
			.push(tracker);
		self.record_count += 1;
	}

	fn evict_if_needed(&mut self) {
		while self.record_count >= self.max_records_cached {
			if !self.evict_one() {
				break;
			}
		}
	}

	// Eviction priority: expired negative responses, then negative
	// responses with the most remaining TTL, then positive records
	// least recently referenced by any question.
	fn evict_one(&mut self) -> bool {
		struct Candidate {
			rank: u8,
			remaining: Duration,
			last_referenced: Instant,
			name: DomainName,
			tracker: Rc<RefCell<RecordTracker>>,
		}

		fn precedes(a: &Candidate, b: &Candidate) -> bool {
			if a.rank != b.rank {
				return a.rank < b.rank;
			}
			match a.rank {
				1 => a.remaining > b.remaining,
				2 => a.last_referenced < b.last_referenced,
				_ => false,
			}
		}

		let now = self.runner.now();
		let mut best: Option<Candidate> = None;
		for (name, trackers) in &self.records {
			for tracker in trackers {
				let borrowed = tracker.borrow();
				let Some(expiry) = borrowed.expiry_time() else {
					continue;
				};
				let candidate = if borrowed.is_negative_response() {
					if now >= expiry {
						Candidate {
							rank: 0,
							remaining: Duration::ZERO,
							last_referenced: borrowed.last_referenced(),
							name: name.clone(),
							tracker: tracker.clone(),
						}
					} else {
						Candidate {
							rank: 1,
							remaining: expiry - now,
							last_referenced: borrowed.last_referenced(),
							name: name.clone(),
							tracker: tracker.clone(),
						}
					}
				} else {
					Candidate {
						rank: 2,
						remaining: Duration::ZERO,
						last_referenced: borrowed.last_referenced(),
						name: name.clone(),
						tracker: tracker.clone(),
					}
				};
				match &best {
					Some(current) if !precedes(&candidate, current) => {},
					_ => best = Some(candidate),
				}
			}
		}

		let Some(victim) = best else { return false };
		let record = victim.tracker.borrow().record().cloned();
		let _ = victim.tracker.borrow_mut().stop();
		self.remove_record_tracker(&victim.name, &victim.tracker);
		if let Some(record) = record {
			warn!("cache cap reached, evicting record {}", record.name);
			self.reporting.on_cache_eviction(&record);
		}
		trace!("cache size now {}", self.record_count);
		true
	}
}

#[cfg(test)]
mod tests {
	use super::{
		MdnsQuerier,
		MdnsRecordChangedCallback,
	};
	use crate::{
		config::Config,
		dns_consts::{
			DnsClass,
			DnsType,
			RecordChangedEvent,
			RecordType,
		},
		error::Error,
		name::DomainName,
		record::{
			MdnsMessage,
			MdnsRecord,
			MessageType,
			NsecData,
			Rdata,
			SrvData,
		},
		testing::{
			CollectingCallback,
			CollectingReporter,
			FakeSender,
			FakeTaskRunner,
			FixedRandom,
		},
		txt_record::TxtRecord,
	};
	use std::{
		rc::Rc,
		time::Duration,
	};

	struct Fixture {
		runner: FakeTaskRunner,
		sender: FakeSender,
		reporter: Rc<CollectingReporter>,
		querier: MdnsQuerier,
	}

	impl Fixture {
		fn new() -> Self {
			Self::with_config(Config::default())
		}

		fn with_config(config: Config) -> Self {
			let runner = FakeTaskRunner::new();
			let sender = FakeSender::new();
			let reporter = Rc::new(CollectingReporter::new());
			let querier = MdnsQuerier::new(
				Rc::new(sender.clone()),
				Rc::new(runner.clone()),
				Rc::new(FixedRandom::new()),
				reporter.clone(),
				&config,
			);
			Self {
				runner,
				sender,
				reporter,
				querier,
			}
		}

		fn subscribe(
			&self,
			name: &str,
			dns_type: DnsType,
		) -> (Rc<CollectingCallback>, Rc<dyn MdnsRecordChangedCallback>) {
			let collector = Rc::new(CollectingCallback::new());
			let callback: Rc<dyn MdnsRecordChangedCallback> = collector.clone();
			self.querier
				.start_query(&name.parse().unwrap(), dns_type, DnsClass::In, &callback)
				.unwrap();
			(collector, callback)
		}

		fn deliver(&self, answers: Vec<MdnsRecord>) {
			self.deliver_with_additionals(answers, Vec::new());
		}

		fn deliver_with_additionals(
			&self,
			answers: Vec<MdnsRecord>,
			additional_records: Vec<MdnsRecord>,
		) {
			let mut message = MdnsMessage::new(0, MessageType::Response);
			message.answers = answers;
			message.additional_records = additional_records;
			self.querier.on_message_received(&message);
		}
	}

	fn name(s: &str) -> DomainName {
		s.parse().unwrap()
	}

	fn a_record(host: &str, address: &str, ttl_secs: u64) -> MdnsRecord {
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

	fn ptr_record(service: &str, instance: &str, ttl_secs: u64) -> MdnsRecord {
		MdnsRecord::new(
			name(service),
			DnsType::Ptr,
			DnsClass::In,
			RecordType::Shared,
			Duration::from_secs(ttl_secs),
			Rdata::Ptr(name(instance)),
		)
		.unwrap()
	}

	fn srv_record(instance: &str, host: &str, port: u16, ttl_secs: u64) -> MdnsRecord {
		MdnsRecord::new(
			name(instance),
			DnsType::Srv,
			DnsClass::In,
			RecordType::Unique,
			Duration::from_secs(ttl_secs),
			Rdata::Srv(SrvData {
				priority: 0,
				weight: 0,
				port,
				target: name(host),
			}),
		)
		.unwrap()
	}

	fn nsec_record(instance: &str, types: Vec<DnsType>, ttl_secs: u64) -> MdnsRecord {
		MdnsRecord::new(
			name(instance),
			DnsType::Nsec,
			DnsClass::In,
			RecordType::Unique,
			Duration::from_secs(ttl_secs),
			Rdata::Nsec(NsecData {
				next_domain: name(instance),
				types,
			}),
		)
		.unwrap()
	}

	#[test]
	fn answer_creates_record_and_notifies() {
		let fx = Fixture::new();
		let (events, _cb) = fx.subscribe("host.local", DnsType::A);

		fx.deliver(vec![a_record("host.local", "192.0.2.10", 120)]);

		let events = events.take_events();
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].1, RecordChangedEvent::Created);
		assert_eq!(events[0].0.rdata, Rdata::A("192.0.2.10".parse().unwrap()));
		assert_eq!(fx.querier.cached_record_count(), 1);
	}

	#[test]
	fn irrelevant_answer_is_dropped() {
		let fx = Fixture::new();
		let (events, _cb) = fx.subscribe("host.local", DnsType::A);

		fx.deliver(vec![a_record("other.local", "192.0.2.20", 120)]);
		assert_eq!(events.event_count(), 0);
		assert_eq!(fx.querier.cached_record_count(), 0);
	}

	#[test]
	fn ttl_refresh_sends_query_without_callback() {
		let fx = Fixture::new();
		let (events, _cb) = fx.subscribe("host.local", DnsType::A);
		fx.deliver(vec![a_record("host.local", "192.0.2.10", 120)]);
		events.take_events();
		fx.runner.advance(Duration::from_secs(95));
		fx.sender.take_messages();

		// 80% of the 120s TTL
		fx.runner.advance(Duration::from_secs(1));
		let messages = fx.sender.take_messages();
		assert!(messages
			.iter()
			.any(|m| m.questions.iter().any(|q| q.dns_type == DnsType::A)));
		assert_eq!(events.event_count(), 0);
	}

	#[test]
	fn goodbye_record_expires_within_a_second() {
		let fx = Fixture::new();
		let (events, _cb) = fx.subscribe("host.local", DnsType::A);
		fx.deliver(vec![a_record("host.local", "192.0.2.10", 120)]);
		events.take_events();

		fx.deliver(vec![a_record("host.local", "192.0.2.10", 0)]);
		assert_eq!(events.event_count(), 0);

		fx.runner.advance(Duration::from_secs(1));
		let events = events.take_events();
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].1, RecordChangedEvent::Expired);
		assert_eq!(fx.querier.cached_record_count(), 0);
	}

	#[test]
	fn shared_records_with_same_rdata_deduplicate() {
		let fx = Fixture::new();
		let (events, _cb) = fx.subscribe("_svc._udp.local", DnsType::Ptr);

		let ptr = ptr_record("_svc._udp.local", "inst._svc._udp.local", 120);
		fx.deliver(vec![ptr.clone(), ptr.clone()]);
		assert_eq!(events.take_events().len(), 1);
		assert_eq!(fx.querier.cached_record_count(), 1);

		// later refresh with the same rdata is TTL-only
		fx.deliver(vec![ptr]);
		assert_eq!(events.event_count(), 0);
		assert_eq!(fx.querier.cached_record_count(), 1);
	}

	#[test]
	fn distinct_shared_rdata_tracks_separately() {
		let fx = Fixture::new();
		let (events, _cb) = fx.subscribe("_svc._udp.local", DnsType::Ptr);

		fx.deliver(vec![
			ptr_record("_svc._udp.local", "a._svc._udp.local", 120),
			ptr_record("_svc._udp.local", "b._svc._udp.local", 120),
		]);
		assert_eq!(events.take_events().len(), 2);
		assert_eq!(fx.querier.cached_record_count(), 2);
	}

	#[test]
	fn nsec_negative_then_positive() {
		let fx = Fixture::new();
		let (events, _cb) = fx.subscribe("inst._svc._udp.local", DnsType::Srv);

		fx.deliver(vec![nsec_record(
			"inst._svc._udp.local",
			vec![DnsType::Srv],
			120,
		)]);
		assert_eq!(events.event_count(), 0);
		assert_eq!(fx.querier.cached_record_count(), 1);

		fx.deliver(vec![srv_record(
			"inst._svc._udp.local",
			"host.local",
			1234,
			120,
		)]);
		let events = events.take_events();
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].1, RecordChangedEvent::Created);
	}

	#[test]
	fn positive_then_nsec_reports_expired_and_keeps_tracker() {
		let fx = Fixture::new();
		let (events, _cb) = fx.subscribe("inst._svc._udp.local", DnsType::Srv);

		let srv = srv_record("inst._svc._udp.local", "host.local", 1234, 120);
		fx.deliver(vec![srv.clone()]);
		events.take_events();

		fx.deliver(vec![nsec_record(
			"inst._svc._udp.local",
			vec![DnsType::Srv],
			120,
		)]);
		let expired = events.take_events();
		assert_eq!(expired.len(), 1);
		assert_eq!(expired[0].1, RecordChangedEvent::Expired);
		// the old positive data is reported, not the NSEC
		assert_eq!(expired[0].0.rdata, srv.rdata);
		assert_eq!(fx.querier.cached_record_count(), 1);

		fx.deliver(vec![srv]);
		assert_eq!(
			events.take_events()[0].1,
			RecordChangedEvent::Created
		);
	}

	#[test]
	fn unique_rdata_change_reports_updated() {
		let fx = Fixture::new();
		let (events, _cb) = fx.subscribe("host.local", DnsType::A);
		fx.deliver(vec![a_record("host.local", "192.0.2.10", 120)]);
		events.take_events();

		fx.deliver(vec![a_record("host.local", "192.0.2.99", 120)]);
		let events = events.take_events();
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].1, RecordChangedEvent::Updated);
		assert_eq!(events[0].0.rdata, Rdata::A("192.0.2.99".parse().unwrap()));
	}

	#[test]
	fn duplicate_registration_is_single_shot() {
		let fx = Fixture::new();
		let (events, callback) = fx.subscribe("host.local", DnsType::A);
		// identical triple again: no-op
		fx.querier
			.start_query(&name("host.local"), DnsType::A, DnsClass::In, &callback)
			.unwrap();

		fx.deliver(vec![a_record("host.local", "192.0.2.10", 120)]);
		assert_eq!(events.take_events().len(), 1);
	}

	#[test]
	fn wildcard_subscription_sees_all_types() {
		let fx = Fixture::new();
		let (events, _cb) = fx.subscribe("inst._svc._udp.local", DnsType::Any);

		fx.deliver(vec![srv_record(
			"inst._svc._udp.local",
			"host.local",
			1234,
			120,
		)]);
		let txt = MdnsRecord::new(
			name("inst._svc._udp.local"),
			DnsType::Txt,
			DnsClass::In,
			RecordType::Unique,
			Duration::from_secs(120),
			Rdata::Txt(TxtRecord::parse(b"\x04a=bc").unwrap()),
		)
		.unwrap();
		fx.deliver(vec![txt]);
		assert_eq!(events.take_events().len(), 2);
	}

	#[test]
	fn stop_and_restart_reannounces_cached_records() {
		let fx = Fixture::new();
		let (events, callback) = fx.subscribe("host.local", DnsType::A);
		fx.deliver(vec![a_record("host.local", "192.0.2.10", 120)]);
		events.take_events();

		fx.querier
			.stop_query(&name("host.local"), DnsType::A, DnsClass::In, &callback)
			.unwrap();
		assert_eq!(fx.querier.active_question_count(), 0);
		// cached records survive the gap
		assert_eq!(fx.querier.cached_record_count(), 1);

		fx.querier
			.start_query(&name("host.local"), DnsType::A, DnsClass::In, &callback)
			.unwrap();
		let events = events.take_events();
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].1, RecordChangedEvent::Created);
		assert_eq!(fx.querier.active_question_count(), 1);
	}

	#[test]
	fn reinitialize_drops_cache_and_restarts_queries() {
		let fx = Fixture::new();
		let (events, _cb) = fx.subscribe("host.local", DnsType::A);
		fx.deliver(vec![a_record("host.local", "192.0.2.10", 120)]);
		events.take_events();

		fx.querier.reinitialize_queries(&name("host.local"));
		assert_eq!(fx.querier.cached_record_count(), 0);
		assert_eq!(fx.querier.active_question_count(), 1);
		// no cached records left, so nothing is announced
		assert_eq!(events.event_count(), 0);

		fx.deliver(vec![a_record("host.local", "192.0.2.10", 120)]);
		assert_eq!(events.take_events()[0].1, RecordChangedEvent::Created);
	}

	#[test]
	fn additionals_accepted_alongside_relevant_answer() {
		let fx = Fixture::new();
		let (_events, _cb) = fx.subscribe("_svc._udp.local", DnsType::Ptr);

		fx.deliver_with_additionals(
			vec![ptr_record("_svc._udp.local", "inst._svc._udp.local", 120)],
			vec![a_record("host.local", "192.0.2.10", 120)],
		);
		// the additional A has no matching question but rides along
		assert_eq!(fx.querier.cached_record_count(), 2);
	}

	#[test]
	fn lone_irrelevant_additional_is_dropped() {
		let fx = Fixture::new();
		let (_events, _cb) = fx.subscribe("_svc._udp.local", DnsType::Ptr);

		fx.deliver_with_additionals(
			Vec::new(),
			vec![a_record("host.local", "192.0.2.10", 120)],
		);
		assert_eq!(fx.querier.cached_record_count(), 0);
	}

	#[test]
	fn querying_disabled_rejects() {
		let fx = Fixture::with_config(Config {
			enable_querying: false,
			..Config::default()
		});
		let callback: Rc<dyn MdnsRecordChangedCallback> = Rc::new(CollectingCallback::new());
		assert_eq!(
			fx.querier
				.start_query(&name("host.local"), DnsType::A, DnsClass::In, &callback),
			Err(Error::OperationInvalid)
		);
	}

	#[test]
	fn nsec_subscription_rejected() {
		let fx = Fixture::new();
		let callback: Rc<dyn MdnsRecordChangedCallback> = Rc::new(CollectingCallback::new());
		assert_eq!(
			fx.querier
				.start_query(&name("host.local"), DnsType::Nsec, DnsClass::In, &callback),
			Err(Error::ParameterInvalid)
		);
	}

	#[test]
	fn cache_cap_evicts_negative_responses_first() {
		let fx = Fixture::with_config(Config {
			querier_max_records_cached: 2,
			..Config::default()
		});
		let (_e1, _c1) = fx.subscribe("a.local", DnsType::A);
		let (_e2, _c2) = fx.subscribe("b.local", DnsType::Srv);
		let (_e3, _c3) = fx.subscribe("c.local", DnsType::A);

		fx.deliver(vec![a_record("a.local", "192.0.2.1", 120)]);
		fx.deliver(vec![nsec_record("b.local", vec![DnsType::Srv], 120)]);
		assert_eq!(fx.querier.cached_record_count(), 2);

		fx.deliver(vec![a_record("c.local", "192.0.2.3", 120)]);
		assert_eq!(fx.querier.cached_record_count(), 2);
		let evicted = fx.reporter.evictions();
		assert_eq!(evicted.len(), 1);
		assert_eq!(evicted[0].name, name("b.local"));
	}

	#[test]
	fn cache_cap_evicts_least_recently_referenced_positive() {
		let fx = Fixture::with_config(Config {
			querier_max_records_cached: 2,
			..Config::default()
		});
		let (_e1, _c1) = fx.subscribe("a.local", DnsType::A);
		fx.deliver(vec![a_record("a.local", "192.0.2.1", 120)]);
		fx.runner.advance(Duration::from_millis(10));
		let (_e2, _c2) = fx.subscribe("b.local", DnsType::A);
		fx.deliver(vec![a_record("b.local", "192.0.2.2", 120)]);
		fx.runner.advance(Duration::from_millis(10));

		// "a.local" was referenced longest ago
		let (_e3, _c3) = fx.subscribe("c.local", DnsType::A);
		fx.deliver(vec![a_record("c.local", "192.0.2.3", 120)]);
		let evicted = fx.reporter.evictions();
		assert_eq!(evicted.len(), 1);
		assert_eq!(evicted[0].name, name("a.local"));
	}

	#[test]
	fn multi_tracked_unique_records_expire_mismatches() {
		let fx = Fixture::new();
		let (events, _cb) = fx.subscribe("host.local", DnsType::A);

		// Duplicate unique trackers for one key can exist; build the
		// state directly.
		let r1 = a_record("host.local", "192.0.2.1", 120);
		let r2 = a_record("host.local", "192.0.2.2", 120);
		{
			let mut inner = fx.querier.inner.borrow_mut();
			inner.add_record(&r1, DnsType::A);
			inner.add_record(&r2, DnsType::A);
		}
		assert_eq!(fx.querier.cached_record_count(), 2);

		// r1 confirms one tracker; the mismatching one fades out.
		fx.deliver(vec![r1.clone()]);
		fx.runner.advance(Duration::from_secs(1));
		let events = events.take_events();
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].1, RecordChangedEvent::Expired);
		assert_eq!(events[0].0.rdata, r2.rdata);
		assert_eq!(fx.querier.cached_record_count(), 1);
	}

	#[test]
	fn sender_failures_do_not_disturb_the_cache() {
		let fx = Fixture::new();
		fx.sender.set_fail_sends(true);
		let (events, _cb) = fx.subscribe("host.local", DnsType::A);
		fx.deliver(vec![a_record("host.local", "192.0.2.1", 120)]);
		events.take_events();

		// question sends and record refreshes all fail; the engine
		// logs and keeps going
		fx.runner.advance(Duration::from_secs(96));
		assert_eq!(fx.querier.cached_record_count(), 1);
		assert_eq!(events.event_count(), 0);
		assert!(fx.reporter.errors().is_empty());
	}

	#[test]
	fn names_match_case_insensitively() {
		let fx = Fixture::new();
		let (events, _cb) = fx.subscribe("HOST.local", DnsType::A);
		fx.deliver(vec![a_record("host.LOCAL", "192.0.2.1", 120)]);
		assert_eq!(events.take_events().len(), 1);
	}
}

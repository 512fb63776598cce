use log::trace;
use std::{
	cell::RefCell,
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
	alarm::Alarm,
	dns_consts::{
		DnsClass,
		DnsType,
		ResponseType,
	},
	error::Error,
	record::{
		MdnsMessage,
		MdnsQuestion,
		MdnsRecord,
		Rdata,
	},
	random::RandomDelay,
	runner::RunnerHandle,
	sender::{
		send_best_effort,
		MdnsSender,
	},
};

// RFC 6762 Section 5.2
// https://tools.ietf.org/html/rfc6762#section-5.2

// Attempts to refresh a record are made at 80%, 85%, 90% and 95% of its
// TTL; the final fraction is the hard expiry.
const TTL_FRACTIONS: [f64; 5] = [0.80, 0.85, 0.90, 0.95, 1.00];

// Intervals between successive queries must increase by at least a
// factor of two.
const INTERVAL_INCREASE_FACTOR: u32 = 2;

// The interval between the first two queries must be at least one
// second.
const MINIMUM_QUERY_INTERVAL: Duration = Duration::from_secs(1);

// The querier may cap the question refresh interval to a maximum of 60
// minutes.
const MAXIMUM_QUERY_INTERVAL: Duration = Duration::from_secs(60 * 60);

// RFC 6762 Section 10.1
// https://tools.ietf.org/html/rfc6762#section-10.1
// On receipt of a goodbye record the querier sets the TTL to 1 second
// rather than dropping the record immediately.
const GOODBYE_RECORD_TTL: Duration = Duration::from_secs(1);

/// Outcome of applying a received record to its tracker
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UpdateType {
	/// Only the TTL was refreshed; RDATA is unchanged
	TtlOnly,
	/// RDATA changed
	Rdata,
	/// The new record withdraws the old one (TTL 0)
	Goodbye,
}

/// Callback invoked when a tracked record reaches its expiry tick
pub type RecordExpiredCallback = Rc<dyn Fn(&Rc<RefCell<RecordTracker>>, &MdnsRecord)>;

/// Refresh scheduler for one cached record
///
/// Re-queries the record at 80/85/90/95% of its TTL (each but the last
/// offset by a small random variation, so colliding queriers spread
/// out) and reports expiry at 100%.  All scheduling happens through a
/// single cancelable [`Alarm`]; while the tracker runs, exactly one
/// alarm is pending.
pub struct RecordTracker {
	sender: Rc<dyn MdnsSender>,
	runner: RunnerHandle,
	random: Rc<dyn RandomDelay>,
	alarm: Alarm,
	// The type this tracker answers for.  Differs from the stored
	// record's type when the record is an NSEC negative response.
	dns_type: DnsType,
	dns_class: DnsClass,
	record: Option<MdnsRecord>,
	start_time: Instant,
	// Index of the next TTL fraction to schedule.
	send_count: usize,
	last_referenced: Instant,
	associated_questions: Vec<Weak<RefCell<QuestionTracker>>>,
	expired_callback: RecordExpiredCallback,
	self_ref: Weak<RefCell<RecordTracker>>,
}

impl RecordTracker {
	/// Create a tracker for `record` (answering for `dns_type`) and
	/// start it
	///
	/// `expired_callback` fires once when the record's TTL runs out;
	/// the owner is expected to drop the tracker from its tables then.
	pub fn create(
		record: MdnsRecord,
		dns_type: DnsType,
		sender: Rc<dyn MdnsSender>,
		runner: RunnerHandle,
		random: Rc<dyn RandomDelay>,
		expired_callback: RecordExpiredCallback,
	) -> Result<Rc<RefCell<Self>>, Error> {
		let now = runner.now();
		let dns_class = record.dns_class;
		let tracker = Rc::new_cyclic(|self_ref: &Weak<RefCell<Self>>| {
			RefCell::new(Self {
				sender,
				alarm: Alarm::new(runner.clone()),
				runner,
				random,
				dns_type,
				dns_class,
				record: None,
				start_time: now,
				send_count: 0,
				last_referenced: now,
				associated_questions: Vec::new(),
				expired_callback,
				self_ref: self_ref.clone(),
			})
		});
		tracker.borrow_mut().start(record)?;
		Ok(tracker)
	}

	/// Start tracking `record`
	///
	/// Fails with [`Error::OperationInvalid`] when already started.
	pub fn start(&mut self, record: MdnsRecord) -> Result<(), Error> {
		debug_assert!(self.runner.is_on_task_runner());
		if self.record.is_some() {
			return Err(Error::OperationInvalid);
		}
		self.start_time = self.runner.now();
		self.send_count = 0;
		self.record = Some(record);
		self.schedule_next_send();
		Ok(())
	}

	/// Stop tracking; cancels the pending alarm
	///
	/// Fails with [`Error::OperationInvalid`] when not started.
	pub fn stop(&mut self) -> Result<(), Error> {
		debug_assert!(self.runner.is_on_task_runner());
		if self.record.is_none() {
			return Err(Error::OperationInvalid);
		}
		self.alarm.cancel();
		self.record = None;
		Ok(())
	}

	/// Apply a newly received record
	///
	/// Fails with [`Error::ParameterInvalid`] when the record does not
	/// belong to this tracker.  On success the refresh schedule
	/// restarts from zero; a goodbye record is stored with its TTL
	/// overridden to 1 second so it fades out quickly.
	pub fn update(&mut self, new_record: &MdnsRecord) -> Result<UpdateType, Error> {
		debug_assert!(self.runner.is_on_task_runner());
		let old = self.record.as_ref().ok_or(Error::OperationInvalid)?;
		if new_record.name != old.name || new_record.dns_class != old.dns_class {
			return Err(Error::ParameterInvalid);
		}
		let type_matches = new_record.dns_type == old.dns_type
			|| matches!(&new_record.rdata, Rdata::Nsec(nsec) if nsec.covers(self.dns_type))
			|| (old.dns_type == DnsType::Nsec && new_record.dns_type == self.dns_type);
		if !type_matches {
			return Err(Error::ParameterInvalid);
		}

		let update_type = if new_record.is_goodbye() {
			UpdateType::Goodbye
		} else if new_record.rdata == old.rdata {
			UpdateType::TtlOnly
		} else {
			UpdateType::Rdata
		};

		let stored = if new_record.is_goodbye() {
			new_record.with_ttl(GOODBYE_RECORD_TTL)
		} else {
			new_record.clone()
		};
		self.alarm.cancel();
		self.record = Some(stored);
		self.start_time = self.runner.now();
		self.send_count = 0;
		self.schedule_next_send();
		Ok(update_type)
	}

	/// Force the record to expire within one second
	///
	/// Coerces the TTL to 1 second and jumps straight to the expiry
	/// tick of the schedule.
	pub fn expire_soon(&mut self) -> Result<(), Error> {
		debug_assert!(self.runner.is_on_task_runner());
		let record = self.record.as_mut().ok_or(Error::OperationInvalid)?;
		record.ttl = GOODBYE_RECORD_TTL;
		self.start_time = self.runner.now();
		self.send_count = TTL_FRACTIONS.len() - 1;
		self.schedule_next_send();
		Ok(())
	}

	/// Whether the tracker is started
	pub fn is_started(&self) -> bool {
		self.record.is_some()
	}

	/// The record currently tracked, if started
	pub fn record(&self) -> Option<&MdnsRecord> {
		self.record.as_ref()
	}

	/// The type this tracker answers for
	///
	/// For a tracker holding an NSEC negative response this is the
	/// covered type, not `NSEC`.
	pub fn dns_type(&self) -> DnsType {
		self.dns_type
	}

	/// The class this tracker answers for
	pub fn dns_class(&self) -> DnsClass {
		self.dns_class
	}

	/// Whether the tracked record is an mDNS negative response
	pub fn is_negative_response(&self) -> bool {
		self.record
			.as_ref()
			.map(|r| r.dns_type == DnsType::Nsec)
			.unwrap_or(false)
	}

	/// When the tracked record expires
	pub fn expiry_time(&self) -> Option<Instant> {
		self.record.as_ref().map(|r| self.start_time + r.ttl)
	}

	/// Mark the record as referenced by a question at `now`
	pub fn touch(&mut self, now: Instant) {
		self.last_referenced = now;
	}

	/// When the record was last referenced by any question
	pub fn last_referenced(&self) -> Instant {
		self.last_referenced
	}

	/// The record as a known answer for outbound questions
	///
	/// RFC 6762 section 7.1: include an answer only while its
	/// remaining TTL is above half of the original, with the remaining
	/// TTL in the message.  Negative responses are never included.
	pub fn known_answer(&self, now: Instant) -> Option<MdnsRecord> {
		let record = self.record.as_ref()?;
		if self.is_negative_response() {
			return None;
		}
		let remaining = (self.start_time + record.ttl).checked_duration_since(now)?;
		if remaining * 2 <= record.ttl {
			return None;
		}
		Some(record.with_ttl(remaining))
	}

	/// Note a question this record answers
	pub fn add_associated_question(&mut self, question: Weak<RefCell<QuestionTracker>>) {
		self.associated_questions.push(question);
	}

	/// Whether any question covering this record is still live
	pub fn has_associated_question(&self) -> bool {
		self.associated_questions
			.iter()
			.any(|q| q.upgrade().is_some_and(|q| q.borrow().is_started()))
	}

	fn schedule_next_send(&mut self) {
		debug_assert!(self.send_count < TTL_FRACTIONS.len());
		let Some(record) = &self.record else { return };

		let mut ttl_fraction = TTL_FRACTIONS[self.send_count];
		// No random variation on the expiration tick.
		if self.send_count + 1 < TTL_FRACTIONS.len() {
			ttl_fraction += self.random.record_ttl_variation();
		}
		self.send_count += 1;

		let fire_time = self.start_time + record.ttl.mul_f64(ttl_fraction);
		let weak = self.self_ref.clone();
		self.alarm.schedule(
			move || {
				if let Some(tracker) = weak.upgrade() {
					RecordTracker::on_send_alarm(&tracker);
				}
			},
			fire_time,
		);
	}

	fn on_send_alarm(tracker: &Rc<RefCell<Self>>) {
		let expired = {
			let mut this = tracker.borrow_mut();
			let Some(record) = this.record.clone() else {
				return;
			};
			if this.runner.now() >= this.start_time + record.ttl {
				Some((record, this.expired_callback.clone()))
			} else {
				this.send_refresh_query(&record);
				this.schedule_next_send();
				None
			}
		};
		// Deliver expiry with the tracker borrow released; the owner
		// will drop this tracker from its tables.
		if let Some((record, callback)) = expired {
			callback(tracker, &record);
		}
	}

	fn send_refresh_query(&self, record: &MdnsRecord) {
		trace!(
			"refreshing record {} type {:?} ({} of {})",
			record.name,
			self.dns_type,
			self.send_count,
			TTL_FRACTIONS.len() - 1,
		);
		let mut message = MdnsMessage::query();
		message.add_question(MdnsQuestion {
			name: record.name.clone(),
			dns_type: self.dns_type,
			dns_class: self.dns_class,
			response_type: ResponseType::Multicast,
		});
		send_best_effort(&*self.sender, &message);
	}
}

/// Query scheduler for one continuous subscription
///
/// Sends the question after an initial random delay of 20–120 ms, then
/// with exponential back-off: 1 s between the first two sends, doubling
/// after every send, capped at 60 minutes (RFC 6762, section 5.2).
pub struct QuestionTracker {
	sender: Rc<dyn MdnsSender>,
	runner: RunnerHandle,
	random: Rc<dyn RandomDelay>,
	alarm: Alarm,
	question: Option<MdnsQuestion>,
	send_delay: Duration,
	send_count: u32,
	// Upper bound on sends; negative means unbounded.
	max_announcement_count: i32,
	known_answer_suppression: bool,
	associated_records: Vec<Weak<RefCell<RecordTracker>>>,
	self_ref: Weak<RefCell<QuestionTracker>>,
}

impl QuestionTracker {
	/// Create an idle question tracker
	pub fn create(
		sender: Rc<dyn MdnsSender>,
		runner: RunnerHandle,
		random: Rc<dyn RandomDelay>,
		max_announcement_count: i32,
		known_answer_suppression: bool,
	) -> Rc<RefCell<Self>> {
		Rc::new_cyclic(|self_ref: &Weak<RefCell<Self>>| {
			RefCell::new(Self {
				sender,
				alarm: Alarm::new(runner.clone()),
				runner,
				random,
				question: None,
				send_delay: MINIMUM_QUERY_INTERVAL,
				send_count: 0,
				max_announcement_count,
				known_answer_suppression,
				associated_records: Vec::new(),
				self_ref: self_ref.clone(),
			})
		})
	}

	/// Start sending `question`
	///
	/// Fails with [`Error::OperationInvalid`] when already started.
	pub fn start(&mut self, question: MdnsQuestion) -> Result<(), Error> {
		debug_assert!(self.runner.is_on_task_runner());
		if self.question.is_some() {
			return Err(Error::OperationInvalid);
		}
		self.question = Some(question);
		self.send_delay = MINIMUM_QUERY_INTERVAL;
		self.send_count = 0;
		let fire_time = self.runner.now() + self.random.initial_query_delay();
		self.schedule_send(fire_time);
		Ok(())
	}

	/// Stop sending and drop record associations
	///
	/// Fails with [`Error::OperationInvalid`] when not started.
	pub fn stop(&mut self) -> Result<(), Error> {
		debug_assert!(self.runner.is_on_task_runner());
		if self.question.is_none() {
			return Err(Error::OperationInvalid);
		}
		self.alarm.cancel();
		self.question = None;
		self.associated_records.clear();
		Ok(())
	}

	/// Whether the tracker is started
	pub fn is_started(&self) -> bool {
		self.question.is_some()
	}

	/// The tracked question, if started
	pub fn question(&self) -> Option<&MdnsQuestion> {
		self.question.as_ref()
	}

	/// Note a cached record that answers this question
	///
	/// Associated records are offered as known answers on subsequent
	/// sends.
	pub fn add_associated_record(&mut self, record: Weak<RefCell<RecordTracker>>) {
		self.associated_records.push(record);
	}

	/// Remove the association with `record`
	pub fn remove_associated_record(&mut self, record: &Rc<RefCell<RecordTracker>>) {
		self.associated_records
			.retain(|weak| match weak.upgrade() {
				Some(live) => !Rc::ptr_eq(&live, record),
				None => false,
			});
	}

	fn schedule_send(&mut self, fire_time: Instant) {
		let weak = self.self_ref.clone();
		self.alarm.schedule(
			move || {
				if let Some(tracker) = weak.upgrade() {
					QuestionTracker::on_send_alarm(&tracker);
				}
			},
			fire_time,
		);
	}

	fn on_send_alarm(tracker: &Rc<RefCell<Self>>) {
		let mut this = tracker.borrow_mut();
		let Some(question) = this.question.clone() else {
			return;
		};
		if this.max_announcement_count >= 0
			&& this.send_count >= this.max_announcement_count as u32
		{
			trace!(
				"question {} reached its announcement cap",
				question.name
			);
			return;
		}

		let mut message = MdnsMessage::query();
		message.add_question(question);
		if this.known_answer_suppression {
			let now = this.runner.now();
			this.associated_records.retain(|weak| weak.upgrade().is_some());
			let records: Vec<_> = this
				.associated_records
				.iter()
				.filter_map(Weak::upgrade)
				.collect();
			for record_tracker in records {
				let mut record_tracker = record_tracker.borrow_mut();
				if let Some(answer) = record_tracker.known_answer(now) {
					record_tracker.touch(now);
					message.add_answer(answer);
				}
			}
		}
		send_best_effort(&*this.sender, &message);
		this.send_count += 1;

		let fire_time = this.runner.now() + this.send_delay;
		this.send_delay = (this.send_delay * INTERVAL_INCREASE_FACTOR).min(MAXIMUM_QUERY_INTERVAL);
		this.schedule_send(fire_time);
	}
}

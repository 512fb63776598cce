use futures_channel::mpsc;
use futures_core::Stream;
use std::{
	pin::Pin,
	rc::Rc,
	task::{
		Context,
		Poll,
	},
};

use crate::{
	dns_consts::{
		DnsClass,
		DnsType,
		RecordChangedEvent,
	},
	error::Error,
	name::DomainName,
	querier::{
		MdnsQuerier,
		MdnsRecordChangedCallback,
	},
	record::MdnsRecord,
};

// Subscriber callback pushing events into the stream's channel.  Send
// failures mean the receiving side is gone; the registration is
// removed when the stream drops.
struct ChannelCallback {
	sender: mpsc::UnboundedSender<(MdnsRecord, RecordChangedEvent)>,
}

impl MdnsRecordChangedCallback for ChannelCallback {
	fn on_record_changed(&self, record: &MdnsRecord, event: RecordChangedEvent) {
		let _ = self.sender.unbounded_send((record.clone(), event));
	}
}

/// Record change events of one query as a `futures` stream
///
/// Alternative to registering an [`MdnsRecordChangedCallback`]: each
/// item is a record paired with its change event.  Dropping the stream
/// stops the underlying query registration.
#[must_use = "streams do nothing unless polled"]
pub struct RecordStream {
	querier: MdnsQuerier,
	name: DomainName,
	dns_type: DnsType,
	dns_class: DnsClass,
	callback: Rc<dyn MdnsRecordChangedCallback>,
	receiver: mpsc::UnboundedReceiver<(MdnsRecord, RecordChangedEvent)>,
}

impl RecordStream {
	fn open(
		querier: &MdnsQuerier,
		name: &DomainName,
		dns_type: DnsType,
		dns_class: DnsClass,
	) -> Result<Self, Error> {
		let (sender, receiver) = mpsc::unbounded();
		let callback: Rc<dyn MdnsRecordChangedCallback> = Rc::new(ChannelCallback { sender });
		querier.start_query(name, dns_type, dns_class, &callback)?;
		Ok(Self {
			querier: querier.clone(),
			name: name.clone(),
			dns_type,
			dns_class,
			callback,
			receiver,
		})
	}
}

impl Stream for RecordStream {
	type Item = (MdnsRecord, RecordChangedEvent);

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		Pin::new(&mut self.receiver).poll_next(cx)
	}
}

impl Drop for RecordStream {
	fn drop(&mut self) {
		let _ = self
			.querier
			.stop_query(&self.name, self.dns_type, self.dns_class, &self.callback);
	}
}

impl MdnsQuerier {
	/// Subscribe to `(name, dns_type, dns_class)` as a stream of
	/// record change events
	///
	/// Cached records matching the subscription are delivered first as
	/// `Created` items.
	pub fn record_stream(
		&self,
		name: &DomainName,
		dns_type: DnsType,
		dns_class: DnsClass,
	) -> Result<RecordStream, Error> {
		RecordStream::open(self, name, dns_type, dns_class)
	}
}

#[cfg(test)]
mod tests {
	use crate::{
		config::Config,
		dns_consts::{
			DnsClass,
			DnsType,
			RecordChangedEvent,
			RecordType,
		},
		querier::MdnsQuerier,
		record::{
			MdnsMessage,
			MdnsRecord,
			MessageType,
			Rdata,
		},
		testing::{
			FakeSender,
			FakeTaskRunner,
			FixedRandom,
			NullReportingClient,
		},
	};
	use futures::StreamExt;
	use futures_util::FutureExt;
	use std::{
		rc::Rc,
		time::Duration,
	};

	fn querier() -> MdnsQuerier {
		MdnsQuerier::new(
			Rc::new(FakeSender::new()),
			Rc::new(FakeTaskRunner::new()),
			Rc::new(FixedRandom::new()),
			Rc::new(NullReportingClient),
			&Config::default(),
		)
	}

	fn a_record() -> MdnsRecord {
		MdnsRecord::new(
			"host.local".parse().unwrap(),
			DnsType::A,
			DnsClass::In,
			RecordType::Unique,
			Duration::from_secs(120),
			Rdata::A("192.0.2.10".parse().unwrap()),
		)
		.unwrap()
	}

	#[test]
	fn delivers_record_events() {
		let querier = querier();
		let mut stream = querier
			.record_stream(&"host.local".parse().unwrap(), DnsType::A, DnsClass::In)
			.unwrap();

		// nothing yet
		assert!(stream.next().now_or_never().is_none());

		let mut message = MdnsMessage::new(0, MessageType::Response);
		message.answers = vec![a_record()];
		querier.on_message_received(&message);

		let (record, event) = stream.next().now_or_never().flatten().unwrap();
		assert_eq!(event, RecordChangedEvent::Created);
		assert_eq!(record.rdata, a_record().rdata);
	}

	#[test]
	fn drop_unsubscribes() {
		let querier = querier();
		let stream = querier
			.record_stream(&"host.local".parse().unwrap(), DnsType::A, DnsClass::In)
			.unwrap();
		assert_eq!(querier.active_question_count(), 1);
		drop(stream);
		assert_eq!(querier.active_question_count(), 0);
	}
}

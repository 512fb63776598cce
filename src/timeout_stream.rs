use futures_core::Stream;
use std::{
	future::Future,
	pin::Pin,
	task::{
		Context,
		Poll,
	},
	time::Duration,
};

/// `futures::Stream` extension to simplify building
/// [`TimeoutStream`](struct.TimeoutStream.html)
pub trait StreamTimeoutExt: Stream + Sized {
	/// Create new [`TimeoutStream`](struct.TimeoutStream.html)
	fn timeout(self, duration: Duration) -> TimeoutStream<Self>;
}

impl<S: Stream> StreamTimeoutExt for S {
	fn timeout(self, duration: Duration) -> TimeoutStream<Self> {
		TimeoutStream::new(self, duration)
	}
}

/// Add a timeout to a stream; each time an item is received the timer
/// is reset
///
/// If the timeout triggers the stream ends (without an error).  Useful
/// for discovery streams that should stop once the network has gone
/// quiet.
///
/// Requires a tokio timer context to poll.
#[must_use = "streams do nothing unless polled"]
pub struct TimeoutStream<S> {
	stream: S,
	duration: Duration,
	timeout: tokio::time::Sleep,
}

impl<S> TimeoutStream<S> {
	pin_utils::unsafe_pinned!(stream: S);

	pin_utils::unsafe_pinned!(timeout: tokio::time::Sleep);
}

impl<S: Stream> TimeoutStream<S> {
	/// Create new `TimeoutStream`.
	///
	/// Also see [`StreamTimeoutExt::timeout`](trait.StreamTimeoutExt.html#method.timeout).
	pub fn new(stream: S, duration: Duration) -> Self {
		TimeoutStream {
			stream,
			duration,
			timeout: tokio::time::sleep(duration),
		}
	}

	fn reset_timer(self: Pin<&mut Self>) {
		let next = tokio::time::Instant::now() + self.duration;
		self.timeout().reset(next);
	}
}

impl<S: Stream> Stream for TimeoutStream<S> {
	type Item = S::Item;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		match self.as_mut().stream().poll_next(cx) {
			Poll::Ready(None) => Poll::Ready(None), // end of stream
			Poll::Ready(Some(item)) => {
				// not end of stream: reset timeout
				self.reset_timer();
				Poll::Ready(Some(item))
			},
			Poll::Pending => {
				// check timeout
				match self.as_mut().timeout().poll(cx) {
					// timed out: end the stream, not an error
					Poll::Ready(()) => Poll::Ready(None),
					// still time left
					Poll::Pending => Poll::Pending,
				}
			},
		}
	}
}

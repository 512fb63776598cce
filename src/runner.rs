use std::{
	rc::Rc,
	thread::{
		self,
		ThreadId,
	},
	time::{
		Duration,
		Instant,
	},
};

/// The cooperative executor the engine runs on
///
/// All engine state is confined to the single thread that runs the
/// tasks; public entry points assert [`is_on_task_runner`] in debug
/// builds.  The clock is part of the runner so tests can drive time
/// deterministically.
///
/// [`is_on_task_runner`]: #tymethod.is_on_task_runner
pub trait TaskRunner {
	/// Run `task` as soon as possible
	fn post_task(&self, task: Box<dyn FnOnce()>);

	/// Run `task` once `delay` has elapsed
	fn post_task_with_delay(&self, task: Box<dyn FnOnce()>, delay: Duration);

	/// Whether the calling thread is the runner thread
	fn is_on_task_runner(&self) -> bool;

	/// Current time according to the runner's clock
	fn now(&self) -> Instant;
}

/// Shared handle to the task runner
pub type RunnerHandle = Rc<dyn TaskRunner>;

/// [`TaskRunner`] for a tokio current-thread runtime
///
/// Posts tasks with [`tokio::task::spawn_local`], so it must be used
/// from within a [`tokio::task::LocalSet`] running on a current-thread
/// runtime:
///
/// ```no_run
/// use mdns_discovery::{LocalTaskRunner, TaskRunner};
/// use std::rc::Rc;
///
/// let runtime = tokio::runtime::Builder::new_current_thread()
/// 	.enable_time()
/// 	.build()
/// 	.unwrap();
/// let local = tokio::task::LocalSet::new();
/// local.block_on(&runtime, async {
/// 	let runner: Rc<dyn TaskRunner> = Rc::new(LocalTaskRunner::new());
/// 	runner.post_task(Box::new(|| println!("on the runner")));
/// });
/// ```
pub struct LocalTaskRunner {
	thread: ThreadId,
}

impl LocalTaskRunner {
	/// New runner bound to the calling thread
	pub fn new() -> Self {
		Self {
			thread: thread::current().id(),
		}
	}
}

impl Default for LocalTaskRunner {
	fn default() -> Self {
		Self::new()
	}
}

impl TaskRunner for LocalTaskRunner {
	fn post_task(&self, task: Box<dyn FnOnce()>) {
		tokio::task::spawn_local(async move {
			task();
		});
	}

	fn post_task_with_delay(&self, task: Box<dyn FnOnce()>, delay: Duration) {
		tokio::task::spawn_local(async move {
			tokio::time::sleep(delay).await;
			task();
		});
	}

	fn is_on_task_runner(&self) -> bool {
		thread::current().id() == self.thread
	}

	fn now(&self) -> Instant {
		Instant::now()
	}
}

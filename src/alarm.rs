use std::{
	cell::Cell,
	rc::Rc,
	time::Instant,
};

use crate::runner::RunnerHandle;

/// A single cancelable scheduled task
///
/// Built on top of [`TaskRunner::post_task_with_delay`], which has no
/// cancel primitive of its own: each schedule bumps a generation
/// counter and the posted closure delivers only if the generation still
/// matches when it fires.  Cancellation is synchronous on the runner
/// thread; a cancelled alarm will not deliver.
///
/// At most one task is scheduled at a time; scheduling again replaces
/// (cancels) the previous task.
///
/// [`TaskRunner::post_task_with_delay`]: trait.TaskRunner.html#tymethod.post_task_with_delay
pub struct Alarm {
	runner: RunnerHandle,
	generation: Rc<Cell<u64>>,
	armed: Rc<Cell<bool>>,
}

impl Alarm {
	/// New idle alarm on the given runner
	pub fn new(runner: RunnerHandle) -> Self {
		Self {
			runner,
			generation: Rc::new(Cell::new(0)),
			armed: Rc::new(Cell::new(false)),
		}
	}

	/// Schedule `task` to run at `fire_time`
	///
	/// A previously scheduled task is cancelled.  Times in the past
	/// fire as soon as the runner gets to them.
	pub fn schedule(&mut self, task: impl FnOnce() + 'static, fire_time: Instant) {
		self.generation.set(self.generation.get() + 1);
		self.armed.set(true);

		let expected = self.generation.get();
		let generation = self.generation.clone();
		let armed = self.armed.clone();
		let delay = fire_time.saturating_duration_since(self.runner.now());
		self.runner.post_task_with_delay(
			Box::new(move || {
				if generation.get() != expected {
					return; // cancelled or replaced
				}
				armed.set(false);
				task();
			}),
			delay,
		);
	}

	/// Cancel the scheduled task, if any
	pub fn cancel(&mut self) {
		self.generation.set(self.generation.get() + 1);
		self.armed.set(false);
	}

	/// Whether a task is currently scheduled and not yet delivered
	pub fn is_scheduled(&self) -> bool {
		self.armed.get()
	}
}

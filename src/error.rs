use std::{
	error,
	fmt,
};

/// Error kinds produced by the discovery engine
///
/// All failures are reported as values; none of the engine's operations
/// panic or abort on bad input or bad state.  The set is closed: every
/// recoverable condition the engine can hit maps onto one of these.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Error {
	/// Operation is not valid in the current state (e.g. starting a
	/// tracker twice, or stopping one that never ran)
	OperationInvalid,
	/// An argument did not satisfy the operation's requirements
	ParameterInvalid,
	/// The item to insert is already present
	ItemAlreadyExists,
	/// The item to update or remove is not present
	ItemNotFound,
	/// The operation no longer applies to the current data state
	OperationCancelled,
	/// A received record could not be applied to its tracker
	UpdateReceivedRecordFailure,
}

impl Error {
	fn as_str(self) -> &'static str {
		match self {
			Error::OperationInvalid => "operation invalid in current state",
			Error::ParameterInvalid => "invalid parameter",
			Error::ItemAlreadyExists => "item already exists",
			Error::ItemNotFound => "item not found",
			Error::OperationCancelled => "operation cancelled",
			Error::UpdateReceivedRecordFailure => "failed to apply received record",
		}
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl error::Error for Error {}

/// Convenience alias; all fallible engine operations use [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

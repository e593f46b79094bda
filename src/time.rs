//! Time abstraction traits for platform-agnostic timeouts.

/// Trait for abstracting time sources.
pub trait TimeSource<I: TimeInstant> {
    /// Returns the current time instant.
    fn now(&self) -> I;
}

/// Trait abstraction for duration types.
pub trait TimeDuration: Copy + PartialEq {
    /// Converts duration to milliseconds.
    fn as_millis(&self) -> u64;
}

/// Trait abstraction for instant types.
pub trait TimeInstant: Copy {
    /// Duration type for this instant.
    type Duration: TimeDuration;

    /// Calculates duration since an earlier instant.
    fn duration_since(&self, earlier: Self) -> Self::Duration;
}

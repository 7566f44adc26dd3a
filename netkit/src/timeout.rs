use std::time::Duration;

/// A decrementable millisecond budget for blocking operations.
///
/// Budgets are signed: repeated waits subtract their measured elapsed
/// time, and a budget that has gone to zero or below is refused before
/// any further I/O is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timeout(i64);

impl Timeout {
  pub const fn from_millis(ms: i64) -> Self {
    Self(ms)
  }

  pub const fn as_millis(self) -> i64 {
    self.0
  }

  pub const fn is_negative(self) -> bool {
    self.0 < 0
  }

  pub const fn is_exhausted(self) -> bool {
    self.0 <= 0
  }

  /// Remaining budget after a wait that took `elapsed`.
  pub fn consume(self, elapsed: Duration) -> Self {
    let spent = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
    Self(self.0.saturating_sub(spent))
  }

  /// Argument for `poll(2)`: clamped at zero, capped at `i32::MAX`.
  pub(crate) fn poll_millis(self) -> i32 {
    self.0.clamp(0, i32::MAX as i64) as i32
  }
}

impl From<Duration> for Timeout {
  fn from(value: Duration) -> Self {
    Self(i64::try_from(value.as_millis()).unwrap_or(i64::MAX))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn consume_subtracts_elapsed() {
    let budget = Timeout::from_millis(100);
    let budget = budget.consume(Duration::from_millis(30));
    assert_eq!(budget.as_millis(), 70);
    assert!(!budget.is_exhausted());
  }

  #[test]
  fn consume_can_go_negative() {
    let budget = Timeout::from_millis(10).consume(Duration::from_millis(25));
    assert_eq!(budget.as_millis(), -15);
    assert!(budget.is_negative());
    assert!(budget.is_exhausted());
  }

  #[test]
  fn zero_is_exhausted_but_not_negative() {
    let budget = Timeout::from_millis(0);
    assert!(budget.is_exhausted());
    assert!(!budget.is_negative());
  }

  #[test]
  fn poll_argument_is_clamped() {
    assert_eq!(Timeout::from_millis(-5).poll_millis(), 0);
    assert_eq!(Timeout::from_millis(250).poll_millis(), 250);
    assert_eq!(Timeout::from_millis(i64::MAX).poll_millis(), i32::MAX);
  }

  #[test]
  fn from_duration() {
    assert_eq!(Timeout::from(Duration::from_secs(2)).as_millis(), 2000);
  }
}

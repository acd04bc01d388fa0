use crate::MAX_HEIGHT;

/// Error type for the skipmap crate.
///
/// Only construction can fail: every map operation either completes or
/// retries internally, and a missing key is a normal negative result rather
/// than an error.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum Error {
  /// Indicates that the requested max height is outside `1..=MAX_HEIGHT`.
  #[error("max height {0} is out of range 1..={MAX_HEIGHT}")]
  InvalidMaxHeight(usize),

  /// Indicates that the level-promotion probability is outside the open
  /// interval `(0, 1)`.
  #[error("level-promotion probability {0} is out of range (0, 1)")]
  InvalidProbability(f64),
}

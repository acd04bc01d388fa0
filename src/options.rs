use crate::{Error, MAX_HEIGHT};

/// The default max height of a [`SkipMap`](crate::SkipMap).
pub(crate) const DEFAULT_MAX_HEIGHT: usize = 20;

/// The default level-promotion probability, the inverse of Euler's number,
/// which minimizes the expected number of comparisons per search.
pub(crate) const DEFAULT_PROBABILITY: f64 = 1.0 / core::f64::consts::E;

/// Options for a [`SkipMap`](crate::SkipMap).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Options {
  max_height: usize,
  probability: f64,
}

impl Default for Options {
  #[inline]
  fn default() -> Options {
    Options::new()
  }
}

impl Options {
  /// Creates a new set of options with the default values.
  #[inline]
  pub const fn new() -> Self {
    Self {
      max_height: DEFAULT_MAX_HEIGHT,
      probability: DEFAULT_PROBABILITY,
    }
  }

  /// Set the max height of the skipmap.
  ///
  /// The height bounds how many index levels a single entry may
  /// participate in. Larger maps benefit from a larger bound; the expected
  /// search cost is `O(log n)` as long as the bound is not exhausted.
  ///
  /// The value must be in `1..=MAX_HEIGHT`, the default is `20`.
  #[inline]
  pub const fn with_max_height(mut self, max_height: usize) -> Self {
    self.max_height = max_height;
    self
  }

  /// Set the level-promotion probability of the skipmap.
  ///
  /// Each entry is assigned a random height drawn from a geometric
  /// distribution: a node present at level `L` is promoted to level `L + 1`
  /// with this probability. The value must be in the open interval
  /// `(0, 1)`, the default is `1 / e`.
  #[inline]
  pub const fn with_probability(mut self, probability: f64) -> Self {
    self.probability = probability;
    self
  }

  /// Get the max height of the skipmap.
  #[inline]
  pub const fn max_height(&self) -> usize {
    self.max_height
  }

  /// Get the level-promotion probability of the skipmap.
  #[inline]
  pub const fn probability(&self) -> f64 {
    self.probability
  }

  pub(crate) fn validate(&self) -> Result<(), Error> {
    if self.max_height < 1 || self.max_height > MAX_HEIGHT {
      return Err(Error::InvalidMaxHeight(self.max_height));
    }

    if !(self.probability > 0.0 && self.probability < 1.0) {
      return Err(Error::InvalidProbability(self.probability));
    }

    Ok(())
  }

  /// Precompute the promotion thresholds so that only a single random
  /// number needs to be generated per insert.
  pub(crate) fn promotion_table(&self) -> Box<[u32]> {
    let mut table = Vec::with_capacity(self.max_height);
    let mut p = 1f64;

    for _ in 0..self.max_height {
      table.push(((u32::MAX as f64) * p) as u32);
      p *= self.probability;
    }

    table.into_boxed_slice()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_options() {
    let opts = Options::new();
    assert_eq!(opts.max_height(), DEFAULT_MAX_HEIGHT);
    assert!(opts.validate().is_ok());
  }

  #[test]
  fn test_invalid_max_height() {
    assert_eq!(
      Options::new().with_max_height(0).validate(),
      Err(Error::InvalidMaxHeight(0))
    );
    assert_eq!(
      Options::new().with_max_height(MAX_HEIGHT + 1).validate(),
      Err(Error::InvalidMaxHeight(MAX_HEIGHT + 1))
    );
    assert!(Options::new().with_max_height(MAX_HEIGHT).validate().is_ok());
  }

  #[test]
  fn test_invalid_probability() {
    assert!(Options::new().with_probability(0.0).validate().is_err());
    assert!(Options::new().with_probability(1.0).validate().is_err());
    assert!(Options::new().with_probability(f64::NAN).validate().is_err());
    assert!(Options::new().with_probability(0.5).validate().is_ok());
  }

  #[test]
  fn test_promotion_table() {
    let table = Options::new().with_probability(0.5).promotion_table();
    assert_eq!(table[0], u32::MAX);
    // Each threshold halves, so promotion past each level is a coin flip.
    assert!((table[1] as f64 / u32::MAX as f64 - 0.5).abs() < 1e-6);
  }
}

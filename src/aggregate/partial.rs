//! One block's locally computed aggregate

use num_traits::Float;

use crate::mask::{Statistic, StatisticMask};

/// A block's per-feature summary: observation count plus the raw statistic
/// columns a [`StatisticMask`] asks for.
///
/// Blocks are produced externally (one per worker rank, CPU thread or device
/// work-group) by a plain single-pass reduction over that block's share of
/// the data; this crate only consumes them. The `sum2_cent` column is the sum
/// of squared deviations from the *block's own* mean; the merge engine
/// re-centers it against the running global mean.
///
/// # Example
///
/// ```
/// use shardstats::aggregate::PartialAggregate;
///
/// // Two features, three observations: rows (1, 10), (2, 20), (3, 30).
/// let block = PartialAggregate::new(2, 3)
///     .with_sum(vec![6.0, 60.0])
///     .with_sum2_cent(vec![2.0, 200.0]);
///
/// assert_eq!(block.count(), 3);
/// assert_eq!(block.sum(), Some(&[6.0, 60.0][..]));
/// assert_eq!(block.min(), None);
/// ```
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartialAggregate<T> {
    pub(crate) features: usize,
    pub(crate) count: u64,
    pub(crate) min: Option<Vec<T>>,
    pub(crate) max: Option<Vec<T>>,
    pub(crate) sum: Option<Vec<T>>,
    pub(crate) sum2: Option<Vec<T>>,
    pub(crate) sum2_cent: Option<Vec<T>>,
}

impl<T: Float> PartialAggregate<T> {
    /// Create an aggregate with no columns attached.
    ///
    /// `count` is the number of observations the block summarizes; a block
    /// with `count == 0` is legal and is skipped by the merge engine.
    pub fn new(features: usize, count: u64) -> Self {
        Self {
            features,
            count,
            min: None,
            max: None,
            sum: None,
            sum2: None,
            sum2_cent: None,
        }
    }

    /// Attach the per-feature minimum column.
    ///
    /// # Panics
    ///
    /// Panics if `column.len()` differs from the feature count.
    pub fn with_min(mut self, column: Vec<T>) -> Self {
        self.check_len(&column, Statistic::Min);
        self.min = Some(column);
        self
    }

    /// Attach the per-feature maximum column.
    ///
    /// # Panics
    ///
    /// Panics if `column.len()` differs from the feature count.
    pub fn with_max(mut self, column: Vec<T>) -> Self {
        self.check_len(&column, Statistic::Max);
        self.max = Some(column);
        self
    }

    /// Attach the per-feature Σx column.
    ///
    /// # Panics
    ///
    /// Panics if `column.len()` differs from the feature count.
    pub fn with_sum(mut self, column: Vec<T>) -> Self {
        self.check_len(&column, Statistic::Sum);
        self.sum = Some(column);
        self
    }

    /// Attach the per-feature Σx² column.
    ///
    /// # Panics
    ///
    /// Panics if `column.len()` differs from the feature count.
    pub fn with_sum2(mut self, column: Vec<T>) -> Self {
        self.check_len(&column, Statistic::Sum2);
        self.sum2 = Some(column);
        self
    }

    /// Attach the per-feature Σ(x − blockMean)² column.
    ///
    /// # Panics
    ///
    /// Panics if `column.len()` differs from the feature count.
    pub fn with_sum2_cent(mut self, column: Vec<T>) -> Self {
        self.check_len(&column, Statistic::Sum2Cent);
        self.sum2_cent = Some(column);
        self
    }

    fn check_len(&self, column: &[T], statistic: Statistic) {
        assert_eq!(
            column.len(),
            self.features,
            "{statistic} column has {} entries for {} features",
            column.len(),
            self.features,
        );
    }

    pub fn features(&self) -> usize {
        self.features
    }

    /// Observations summarized by this block.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<&[T]> {
        self.min.as_deref()
    }

    pub fn max(&self) -> Option<&[T]> {
        self.max.as_deref()
    }

    pub fn sum(&self) -> Option<&[T]> {
        self.sum.as_deref()
    }

    pub fn sum2(&self) -> Option<&[T]> {
        self.sum2.as_deref()
    }

    pub fn sum2_cent(&self) -> Option<&[T]> {
        self.sum2_cent.as_deref()
    }

    /// The first column `mask` requires that this block does not carry, if
    /// any. `None` means the block satisfies the mask.
    pub fn missing_column(&self, mask: StatisticMask) -> Option<Statistic> {
        if mask.needs_min() && self.min.is_none() {
            return Some(Statistic::Min);
        }
        if mask.needs_max() && self.max.is_none() {
            return Some(Statistic::Max);
        }
        if mask.needs_sum() && self.sum.is_none() {
            return Some(Statistic::Sum);
        }
        if mask.needs_sum2() && self.sum2.is_none() {
            return Some(Statistic::Sum2);
        }
        if mask.needs_sum2_cent() && self.sum2_cent.is_none() {
            return Some(Statistic::Sum2Cent);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_attaches_columns() {
        let block = PartialAggregate::new(3, 10)
            .with_min(vec![1.0, 2.0, 3.0])
            .with_max(vec![9.0, 8.0, 7.0]);

        assert_eq!(block.features(), 3);
        assert_eq!(block.count(), 10);
        assert_eq!(block.min(), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(block.max(), Some(&[9.0, 8.0, 7.0][..]));
        assert_eq!(block.sum(), None);
        assert_eq!(block.sum2_cent(), None);
    }

    #[test]
    #[should_panic(expected = "sum column has 2 entries for 3 features")]
    fn test_builder_rejects_wrong_length() {
        let _ = PartialAggregate::new(3, 1).with_sum(vec![1.0, 2.0]);
    }

    #[test]
    fn test_missing_column() {
        let block = PartialAggregate::new(2, 5)
            .with_sum(vec![1.0, 2.0])
            .with_sum2_cent(vec![0.5, 0.5]);

        assert_eq!(block.missing_column(StatisticMask::VARIANCE), None);
        assert_eq!(
            block.missing_column(StatisticMask::MIN),
            Some(Statistic::Min)
        );
        assert_eq!(
            block.missing_column(StatisticMask::SECOND_ORDER_RAW_MOMENT),
            Some(Statistic::Sum2)
        );
    }

    #[test]
    fn test_variance_mask_needs_sum_for_recentering() {
        let without_sum = PartialAggregate::new(1, 5).with_sum2_cent(vec![0.5]);

        assert_eq!(
            without_sum.missing_column(StatisticMask::VARIANCE),
            Some(Statistic::Sum)
        );
    }
}

//! Statistic selection
//!
//! Callers pick which statistics a computation should produce by composing a
//! [`StatisticMask`]. The mask drives everything downstream: which columns a
//! [`PartialAggregate`](crate::aggregate::PartialAggregate) must carry, which
//! fields the merge engine folds, how many elements the wire codec moves, and
//! which entries appear in the final result.
//!
//! # Example
//!
//! ```
//! use shardstats::mask::{Statistic, StatisticMask};
//!
//! let mask = StatisticMask::MEAN | StatisticMask::VARIANCE | StatisticMask::MAX;
//!
//! assert!(mask.contains(Statistic::Variance));
//! assert!(!mask.contains(Statistic::Min));
//!
//! // Variance is derived from the centered sum of squares, which in turn
//! // needs per-block sums to re-center block means during the merge.
//! assert!(mask.needs_sum2_cent());
//! assert!(mask.needs_sum());
//! assert!(!mask.needs_sum2());
//! ```

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

/// One derivable statistic.
///
/// The first five variants double as the names of the raw aggregate columns
/// ([`Min`](Statistic::Min) through [`Sum2Cent`](Statistic::Sum2Cent)); the
/// rest exist only as finalized outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Statistic {
    /// Per-feature minimum.
    Min = 0,
    /// Per-feature maximum.
    Max = 1,
    /// Σx per feature.
    Sum = 2,
    /// Σx² per feature.
    Sum2 = 3,
    /// Σ(x − mean)² per feature, centered on the global mean after merging.
    Sum2Cent = 4,
    /// Σx / n.
    Mean = 5,
    /// Σx² / n.
    SecondOrderRawMoment = 6,
    /// Σ(x − mean)² / (n − 1), the unbiased estimator.
    Variance = 7,
    /// √variance.
    StDev = 8,
    /// Coefficient of variation, stdev / mean.
    Variation = 9,
}

impl Statistic {
    /// Every statistic, in canonical (wire and iteration) order.
    pub const ALL: [Statistic; 10] = [
        Statistic::Min,
        Statistic::Max,
        Statistic::Sum,
        Statistic::Sum2,
        Statistic::Sum2Cent,
        Statistic::Mean,
        Statistic::SecondOrderRawMoment,
        Statistic::Variance,
        Statistic::StDev,
        Statistic::Variation,
    ];

    /// Short lowercase name, stable across versions.
    pub fn name(self) -> &'static str {
        match self {
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Sum => "sum",
            Statistic::Sum2 => "sum2",
            Statistic::Sum2Cent => "sum2cent",
            Statistic::Mean => "mean",
            Statistic::SecondOrderRawMoment => "sorm",
            Statistic::Variance => "variance",
            Statistic::StDev => "stdev",
            Statistic::Variation => "variation",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const fn flag(statistic: Statistic) -> u16 {
    1 << (statistic as u16)
}

/// A set of requested statistics.
///
/// Compose with `|` from the per-statistic constants. The `needs_*`
/// predicates answer which raw aggregate columns a mask requires, encoding
/// the dependency rule: `VARIANCE`, `STDEV` and `VARIATION` consume the
/// centered sum of squares (and, via block means, the sums); `MEAN` and
/// `VARIATION` consume the sums; `SECOND_ORDER_RAW_MOMENT` consumes the raw
/// sums of squares.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct StatisticMask {
    bits: u16,
}

impl StatisticMask {
    /// The empty selection.
    pub const EMPTY: Self = Self { bits: 0 };
    pub const MIN: Self = Self { bits: flag(Statistic::Min) };
    pub const MAX: Self = Self { bits: flag(Statistic::Max) };
    pub const SUM: Self = Self { bits: flag(Statistic::Sum) };
    pub const SUM2: Self = Self { bits: flag(Statistic::Sum2) };
    pub const SUM2_CENT: Self = Self { bits: flag(Statistic::Sum2Cent) };
    pub const MEAN: Self = Self { bits: flag(Statistic::Mean) };
    pub const SECOND_ORDER_RAW_MOMENT: Self = Self {
        bits: flag(Statistic::SecondOrderRawMoment),
    };
    pub const VARIANCE: Self = Self { bits: flag(Statistic::Variance) };
    pub const STDEV: Self = Self { bits: flag(Statistic::StDev) };
    pub const VARIATION: Self = Self { bits: flag(Statistic::Variation) };
    /// Every statistic at once.
    pub const ALL: Self = Self { bits: (1 << 10) - 1 };

    const SUM_CONSUMERS: u16 = Self::SUM.bits
        | Self::MEAN.bits
        | Self::SUM2_CENT.bits
        | Self::VARIANCE.bits
        | Self::STDEV.bits
        | Self::VARIATION.bits;
    const SUM2_CONSUMERS: u16 = Self::SUM2.bits | Self::SECOND_ORDER_RAW_MOMENT.bits;
    const SUM2_CENT_CONSUMERS: u16 =
        Self::SUM2_CENT.bits | Self::VARIANCE.bits | Self::STDEV.bits | Self::VARIATION.bits;

    /// Whether `statistic` was requested.
    pub const fn contains(self, statistic: Statistic) -> bool {
        self.bits & flag(statistic) != 0
    }

    /// Whether every statistic in `other` was requested.
    pub const fn contains_all(self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }

    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }

    /// Set union; `|` does the same.
    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }

    /// The requested statistics, in canonical order.
    pub fn iter(self) -> impl Iterator<Item = Statistic> {
        Statistic::ALL.into_iter().filter(move |s| self.contains(*s))
    }

    /// Number of requested statistics.
    pub fn len(self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Whether blocks must carry a min column.
    pub const fn needs_min(self) -> bool {
        self.bits & Self::MIN.bits != 0
    }

    /// Whether blocks must carry a max column.
    pub const fn needs_max(self) -> bool {
        self.bits & Self::MAX.bits != 0
    }

    /// Whether blocks must carry a sum column.
    pub const fn needs_sum(self) -> bool {
        self.bits & Self::SUM_CONSUMERS != 0
    }

    /// Whether blocks must carry a raw sum-of-squares column.
    pub const fn needs_sum2(self) -> bool {
        self.bits & Self::SUM2_CONSUMERS != 0
    }

    /// Whether blocks must carry a centered sum-of-squares column.
    ///
    /// Implies [`needs_sum`](Self::needs_sum): re-centering during the merge
    /// divides each block's sum by its observation count.
    pub const fn needs_sum2_cent(self) -> bool {
        self.bits & Self::SUM2_CENT_CONSUMERS != 0
    }
}

impl BitOr for StatisticMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for StatisticMask {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl From<Statistic> for StatisticMask {
    fn from(statistic: Statistic) -> Self {
        Self {
            bits: flag(statistic),
        }
    }
}

impl fmt::Debug for StatisticMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for statistic in self.iter() {
            set.entry(&statistic);
        }
        set.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_and_contains() {
        let mask = StatisticMask::MIN | StatisticMask::STDEV;

        assert!(mask.contains(Statistic::Min));
        assert!(mask.contains(Statistic::StDev));
        assert!(!mask.contains(Statistic::Max));
        assert_eq!(mask.len(), 2);
        assert!(!mask.is_empty());
        assert!(StatisticMask::EMPTY.is_empty());
    }

    #[test]
    fn test_contains_all() {
        let mask = StatisticMask::MEAN | StatisticMask::VARIANCE | StatisticMask::MIN;

        assert!(mask.contains_all(StatisticMask::MEAN | StatisticMask::MIN));
        assert!(!mask.contains_all(StatisticMask::MEAN | StatisticMask::MAX));
        assert!(StatisticMask::ALL.contains_all(mask));
    }

    #[test]
    fn test_column_requirements() {
        // Mirrors the selective-computation rule: each derived statistic
        // pulls in exactly the raw columns it is computed from.
        assert!(StatisticMask::MEAN.needs_sum());
        assert!(!StatisticMask::MEAN.needs_sum2());
        assert!(!StatisticMask::MEAN.needs_sum2_cent());

        assert!(StatisticMask::SECOND_ORDER_RAW_MOMENT.needs_sum2());
        assert!(!StatisticMask::SECOND_ORDER_RAW_MOMENT.needs_sum());

        for mask in [
            StatisticMask::SUM2_CENT,
            StatisticMask::VARIANCE,
            StatisticMask::STDEV,
            StatisticMask::VARIATION,
        ] {
            assert!(mask.needs_sum2_cent(), "{mask:?} must need sum2cent");
            assert!(mask.needs_sum(), "{mask:?} must need sum for re-centering");
        }

        let minmax = StatisticMask::MIN | StatisticMask::MAX;
        assert!(minmax.needs_min());
        assert!(minmax.needs_max());
        assert!(!minmax.needs_sum());
        assert!(!minmax.needs_sum2());
        assert!(!minmax.needs_sum2_cent());
    }

    #[test]
    fn test_iter_canonical_order() {
        let mask = StatisticMask::VARIATION | StatisticMask::MIN | StatisticMask::SUM2;
        let stats: Vec<Statistic> = mask.iter().collect();

        assert_eq!(
            stats,
            vec![Statistic::Min, Statistic::Sum2, Statistic::Variation]
        );
    }

    #[test]
    fn test_all_covers_every_statistic() {
        for statistic in Statistic::ALL {
            assert!(StatisticMask::ALL.contains(statistic));
        }
        assert_eq!(StatisticMask::ALL.len(), Statistic::ALL.len());
    }

    #[test]
    fn test_debug_lists_names() {
        let mask = StatisticMask::MIN | StatisticMask::MEAN;
        let rendered = format!("{mask:?}");

        assert!(rendered.contains("Min"));
        assert!(rendered.contains("Mean"));
    }
}

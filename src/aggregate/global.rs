//! The running combination of merged blocks

use num_traits::Float;

use crate::mask::StatisticMask;

/// The union-so-far of every block folded into it.
///
/// Created empty for a given mask; the merge engine mutates it in place once
/// per block. Columns the mask does not require are never allocated. Besides
/// the visible columns it tracks two pieces of intermediate state used only
/// while merging: the total observation count and, when centered sums of
/// squares are in play, the running per-feature mean.
///
/// Min columns start at `+∞` and max columns at `−∞`, the identities of the
/// fold, so a freshly created aggregate merges like an empty block sequence.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GlobalAggregate<T> {
    pub(crate) features: usize,
    pub(crate) mask: StatisticMask,
    pub(crate) merged_count: u64,
    pub(crate) mean: Vec<T>,
    pub(crate) min: Option<Vec<T>>,
    pub(crate) max: Option<Vec<T>>,
    pub(crate) sum: Option<Vec<T>>,
    pub(crate) sum2: Option<Vec<T>>,
    pub(crate) sum2_cent: Option<Vec<T>>,
}

impl<T: Float> GlobalAggregate<T> {
    /// Create an empty aggregate sized for `features`, allocating exactly the
    /// columns `mask` requires.
    pub fn new(features: usize, mask: StatisticMask) -> Self {
        let zeros = || vec![T::zero(); features];
        Self {
            features,
            mask,
            merged_count: 0,
            mean: if mask.needs_sum2_cent() {
                zeros()
            } else {
                Vec::new()
            },
            min: mask.needs_min().then(|| vec![T::infinity(); features]),
            max: mask.needs_max().then(|| vec![T::neg_infinity(); features]),
            sum: mask.needs_sum().then(zeros),
            sum2: mask.needs_sum2().then(zeros),
            sum2_cent: mask.needs_sum2_cent().then(zeros),
        }
    }

    pub fn features(&self) -> usize {
        self.features
    }

    /// The mask this aggregate was allocated for.
    pub fn mask(&self) -> StatisticMask {
        self.mask
    }

    /// Total observations across every block folded in so far.
    pub fn merged_count(&self) -> u64 {
        self.merged_count
    }

    /// Whether any observations have been folded in.
    pub fn is_empty(&self) -> bool {
        self.merged_count == 0
    }

    /// The running global mean, tracked only while centered sums of squares
    /// are being merged.
    pub fn merged_mean(&self) -> Option<&[T]> {
        if self.mask.needs_sum2_cent() {
            Some(&self.mean)
        } else {
            None
        }
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
}

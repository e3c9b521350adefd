//! Deriving requested statistics from the merged aggregate

use num_traits::Float;

use super::MomentsError;
use crate::aggregate::{count_to_float, FinalStatistics, GlobalAggregate};
use crate::mask::{Statistic, StatisticMask};

/// What to do when a requested statistic is mathematically undefined for the
/// data at hand: fewer than two observations for the variance family, or a
/// zero mean under variation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DegenerateMode {
    /// Report [`MomentsError::InsufficientObservations`] or
    /// [`MomentsError::ZeroMeanVariation`].
    Error,
    /// Emit NaN for the affected entries and keep going.
    Sentinel,
}

/// Derive the statistics in `mask` from a merged aggregate.
///
/// Pure: reads `global`, allocates the result, retains nothing, so calling it
/// twice on the same aggregate gives the same answer. `total_observations`
/// is the count the caller knows to be the union's size (usually
/// [`GlobalAggregate::merged_count`], but a rank that received a reduced
/// count over the wire passes that instead).
///
/// Derivations: mean = Σx/n, second-order raw moment = Σx²/n,
/// variance = Σ(x−mean)²/(n−1), stdev = √variance, variation = stdev/mean;
/// min/max and the raw sums pass through unchanged.
///
/// # Errors
///
/// `MissingColumn` if `mask` derives from a column the aggregate was not
/// merged with, checked before any computation. `NoObservations` if
/// `total_observations` is zero. Degenerate conditions surface per
/// [`DegenerateMode`].
pub fn finalize<T: Float>(
    global: &GlobalAggregate<T>,
    total_observations: u64,
    mask: StatisticMask,
    degenerate: DegenerateMode,
) -> Result<FinalStatistics<T>, MomentsError> {
    let min = required(global.min.as_deref(), mask.needs_min(), Statistic::Min)?;
    let max = required(global.max.as_deref(), mask.needs_max(), Statistic::Max)?;
    let sum = required(global.sum.as_deref(), mask.needs_sum(), Statistic::Sum)?;
    let sum2 = required(global.sum2.as_deref(), mask.needs_sum2(), Statistic::Sum2)?;
    let sum2_cent = required(
        global.sum2_cent.as_deref(),
        mask.needs_sum2_cent(),
        Statistic::Sum2Cent,
    )?;
    if total_observations == 0 {
        return Err(MomentsError::NoObservations);
    }

    let features = global.features;
    let n: T = count_to_float(total_observations);
    let mut stats = FinalStatistics::new(features);

    if mask.contains(Statistic::Min) {
        stats.insert(Statistic::Min, min.unwrap_or_default().to_vec());
    }
    if mask.contains(Statistic::Max) {
        stats.insert(Statistic::Max, max.unwrap_or_default().to_vec());
    }
    if mask.contains(Statistic::Sum) {
        stats.insert(Statistic::Sum, sum.unwrap_or_default().to_vec());
    }
    if mask.contains(Statistic::Sum2) {
        stats.insert(Statistic::Sum2, sum2.unwrap_or_default().to_vec());
    }
    if mask.contains(Statistic::Sum2Cent) {
        stats.insert(Statistic::Sum2Cent, sum2_cent.unwrap_or_default().to_vec());
    }
    if mask.contains(Statistic::Mean) {
        let sum = sum.unwrap_or_default();
        stats.insert(Statistic::Mean, sum.iter().map(|&x| x / n).collect());
    }
    if mask.contains(Statistic::SecondOrderRawMoment) {
        let sum2 = sum2.unwrap_or_default();
        stats.insert(
            Statistic::SecondOrderRawMoment,
            sum2.iter().map(|&x| x / n).collect(),
        );
    }

    let variance_family = mask.contains(Statistic::Variance)
        || mask.contains(Statistic::StDev)
        || mask.contains(Statistic::Variation);
    if variance_family {
        let sum2_cent = sum2_cent.unwrap_or_default();
        let variance: Vec<T> = if total_observations < 2 {
            match degenerate {
                DegenerateMode::Error => {
                    return Err(MomentsError::InsufficientObservations {
                        total: total_observations,
                    })
                }
                DegenerateMode::Sentinel => vec![T::nan(); features],
            }
        } else {
            let divisor = n - T::one();
            sum2_cent.iter().map(|&x| x / divisor).collect()
        };

        if mask.contains(Statistic::StDev) || mask.contains(Statistic::Variation) {
            let stdev: Vec<T> = variance.iter().map(|&v| v.sqrt()).collect();
            if mask.contains(Statistic::Variation) {
                let sum = sum.unwrap_or_default();
                let mut variation = Vec::with_capacity(features);
                for (feature, (&sd, &s)) in stdev.iter().zip(sum).enumerate() {
                    let mean = s / n;
                    if mean == T::zero() {
                        match degenerate {
                            DegenerateMode::Error => {
                                return Err(MomentsError::ZeroMeanVariation { feature })
                            }
                            DegenerateMode::Sentinel => variation.push(T::nan()),
                        }
                    } else {
                        variation.push(sd / mean);
                    }
                }
                stats.insert(Statistic::Variation, variation);
            }
            if mask.contains(Statistic::StDev) {
                stats.insert(Statistic::StDev, stdev);
            }
        }
        if mask.contains(Statistic::Variance) {
            stats.insert(Statistic::Variance, variance);
        }
    }

    Ok(stats)
}

fn required<'a, T>(
    column: Option<&'a [T]>,
    needed: bool,
    statistic: Statistic,
) -> Result<Option<&'a [T]>, MomentsError> {
    match (needed, column) {
        (true, None) => Err(MomentsError::MissingColumn(statistic)),
        (true, Some(column)) => Ok(Some(column)),
        (false, _) => Ok(None),
    }
}

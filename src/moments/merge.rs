//! Folding block aggregates into the global aggregate

use num_traits::Float;
use rayon::prelude::*;

use super::MomentsError;
use crate::aggregate::{count_to_float, GlobalAggregate, PartialAggregate};
use crate::mask::StatisticMask;

/// Fold `blocks`, in order, into `global`.
///
/// Features are independent and fold in parallel; within a feature the block
/// sequence folds strictly left to right, since each step depends on the
/// running mean and count produced by the previous one. Only the statistics
/// in `mask` are touched.
///
/// Min/max fold by comparison and sums by addition. Centered sums of squares
/// combine with the pairwise update
///
/// ```text
/// s ← s₁ + s₂ + Δ²·n₁n₂/(n₁+n₂),   Δ = m₂ − m₁
/// m ← (m₁n₁ + m₂n₂)/(n₁+n₂)
/// ```
///
/// which never re-centers raw data against the global mean and stays stable
/// when block sizes are wildly unequal. Blocks with `count == 0` are skipped
/// outright; the first non-empty block seeds the running mean directly, so a
/// single-block merge reproduces that block's statistics exactly.
///
/// The engine is incremental: calling it again folds further blocks into the
/// same running state, which is how per-rank aggregates arriving from the
/// communicator are consumed.
///
/// # Errors
///
/// Fails before touching `global` if a block's feature count differs from
/// the aggregate's, if a block lacks a column the mask requires, or if
/// `global` was allocated for a different mask.
pub fn merge_blocks<T>(
    global: &mut GlobalAggregate<T>,
    blocks: &[PartialAggregate<T>],
    mask: StatisticMask,
) -> Result<(), MomentsError>
where
    T: Float + Send + Sync,
{
    if global.mask != mask {
        return Err(MomentsError::MaskMismatch {
            allocated: global.mask,
            requested: mask,
        });
    }
    for (index, block) in blocks.iter().enumerate() {
        if block.features != global.features {
            return Err(MomentsError::FeatureMismatch {
                expected: global.features,
                found: block.features,
                block: index,
            });
        }
        if let Some(column) = block.missing_column(mask) {
            return Err(MomentsError::MissingBlockColumn {
                column,
                block: index,
            });
        }
    }

    let snapshot: &GlobalAggregate<T> = global;
    let folded: Vec<FeatureFold<T>> = (0..snapshot.features)
        .into_par_iter()
        .map(|feature| fold_feature(snapshot, blocks, mask, feature))
        .collect();

    if let Some(column) = global.min.as_mut() {
        for (feature, fold) in folded.iter().enumerate() {
            column[feature] = fold.min;
        }
    }
    if let Some(column) = global.max.as_mut() {
        for (feature, fold) in folded.iter().enumerate() {
            column[feature] = fold.max;
        }
    }
    if let Some(column) = global.sum.as_mut() {
        for (feature, fold) in folded.iter().enumerate() {
            column[feature] = fold.sum;
        }
    }
    if let Some(column) = global.sum2.as_mut() {
        for (feature, fold) in folded.iter().enumerate() {
            column[feature] = fold.sum2;
        }
    }
    if let Some(column) = global.sum2_cent.as_mut() {
        for (feature, fold) in folded.iter().enumerate() {
            column[feature] = fold.sum2_cent;
        }
    }
    if mask.needs_sum2_cent() {
        for (feature, fold) in folded.iter().enumerate() {
            global.mean[feature] = fold.mean;
        }
    }
    global.merged_count += blocks.iter().map(|b| b.count).sum::<u64>();

    Ok(())
}

/// Running state for one feature while its block sequence folds.
struct FeatureFold<T> {
    min: T,
    max: T,
    sum: T,
    sum2: T,
    sum2_cent: T,
    mean: T,
}

fn fold_feature<T: Float>(
    global: &GlobalAggregate<T>,
    blocks: &[PartialAggregate<T>],
    mask: StatisticMask,
    feature: usize,
) -> FeatureFold<T> {
    let column = |option: &Option<Vec<T>>| option.as_ref().map_or(T::zero(), |c| c[feature]);

    let mut fold = FeatureFold {
        min: global.min.as_ref().map_or(T::infinity(), |c| c[feature]),
        max: global
            .max
            .as_ref()
            .map_or(T::neg_infinity(), |c| c[feature]),
        sum: column(&global.sum),
        sum2: column(&global.sum2),
        sum2_cent: column(&global.sum2_cent),
        mean: if mask.needs_sum2_cent() {
            global.mean[feature]
        } else {
            T::zero()
        },
    };
    let mut merged: T = count_to_float(global.merged_count);

    for block in blocks {
        if block.count == 0 {
            continue;
        }

        if mask.needs_min() {
            if let Some(c) = &block.min {
                fold.min = fold.min.min(c[feature]);
            }
        }
        if mask.needs_max() {
            if let Some(c) = &block.max {
                fold.max = fold.max.max(c[feature]);
            }
        }
        if mask.needs_sum() {
            if let Some(c) = &block.sum {
                fold.sum = fold.sum + c[feature];
            }
        }
        if mask.needs_sum2() {
            if let Some(c) = &block.sum2 {
                fold.sum2 = fold.sum2 + c[feature];
            }
        }
        if mask.needs_sum2_cent() {
            let n2: T = count_to_float(block.count);
            let block_sum = block.sum.as_ref().map_or(T::zero(), |c| c[feature]);
            let block_sum2_cent = block.sum2_cent.as_ref().map_or(T::zero(), |c| c[feature]);
            let block_mean = block_sum / n2;

            if merged == T::zero() {
                // First contribution seeds the state exactly.
                fold.mean = block_mean;
                fold.sum2_cent = fold.sum2_cent + block_sum2_cent;
                merged = n2;
            } else {
                let combined = merged + n2;
                let delta = block_mean - fold.mean;
                fold.sum2_cent =
                    fold.sum2_cent + block_sum2_cent + delta * delta * (merged * n2 / combined);
                fold.mean = (fold.mean * merged + block_mean * n2) / combined;
                merged = combined;
            }
        }
    }

    fold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::Statistic;

    fn block_of(data: &[f64]) -> PartialAggregate<f64> {
        let count = data.len() as u64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut sum2 = 0.0;
        for &x in data {
            min = min.min(x);
            max = max.max(x);
            sum += x;
            sum2 += x * x;
        }
        let mean = sum / count as f64;
        let sum2_cent: f64 = data.iter().map(|&x| (x - mean) * (x - mean)).sum();
        PartialAggregate::new(1, count)
            .with_min(vec![min])
            .with_max(vec![max])
            .with_sum(vec![sum])
            .with_sum2(vec![sum2])
            .with_sum2_cent(vec![sum2_cent])
    }

    #[test]
    fn test_two_blocks_match_direct() {
        let mask = StatisticMask::ALL;
        let mut global = GlobalAggregate::new(1, mask);
        let blocks = [block_of(&[1.0, 2.0, 3.0]), block_of(&[4.0, 5.0])];

        merge_blocks(&mut global, &blocks, mask).unwrap();

        assert_eq!(global.merged_count(), 5);
        assert_eq!(global.min().unwrap()[0], 1.0);
        assert_eq!(global.max().unwrap()[0], 5.0);
        assert_eq!(global.sum().unwrap()[0], 15.0);
        assert_eq!(global.sum2().unwrap()[0], 55.0);
        // Direct over [1..=5]: mean 3, Σ(x−3)² = 10.
        assert!((global.merged_mean().unwrap()[0] - 3.0).abs() < 1e-12);
        assert!((global.sum2_cent().unwrap()[0] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_block_is_exact() {
        let mask = StatisticMask::ALL;
        let mut global = GlobalAggregate::new(1, mask);
        let block = block_of(&[0.1, 0.2, 0.7]);
        let expected_mean = block.sum().unwrap()[0] / 3.0;
        let expected_sum2_cent = block.sum2_cent().unwrap()[0];

        merge_blocks(&mut global, std::slice::from_ref(&block), mask).unwrap();

        // Bitwise equality: the seed path introduces no arithmetic.
        assert_eq!(global.merged_mean().unwrap()[0], expected_mean);
        assert_eq!(global.sum2_cent().unwrap()[0], expected_sum2_cent);
    }

    #[test]
    fn test_empty_blocks_are_skipped() {
        let mask = StatisticMask::ALL;
        let empty = PartialAggregate::new(1, 0)
            .with_min(vec![0.0])
            .with_max(vec![0.0])
            .with_sum(vec![0.0])
            .with_sum2(vec![0.0])
            .with_sum2_cent(vec![0.0]);

        let mut with_empty = GlobalAggregate::new(1, mask);
        merge_blocks(
            &mut with_empty,
            &[block_of(&[1.0, 2.0]), empty, block_of(&[3.0])],
            mask,
        )
        .unwrap();

        let mut without = GlobalAggregate::new(1, mask);
        merge_blocks(&mut without, &[block_of(&[1.0, 2.0]), block_of(&[3.0])], mask).unwrap();

        assert_eq!(with_empty, without);
    }

    #[test]
    fn test_incremental_merge_matches_single_call() {
        let mask = StatisticMask::ALL;
        let blocks = [
            block_of(&[1.0, 5.0]),
            block_of(&[2.0]),
            block_of(&[-3.0, 0.5, 9.0]),
        ];

        let mut once = GlobalAggregate::new(1, mask);
        merge_blocks(&mut once, &blocks, mask).unwrap();

        let mut twice = GlobalAggregate::new(1, mask);
        merge_blocks(&mut twice, &blocks[..1], mask).unwrap();
        merge_blocks(&mut twice, &blocks[1..], mask).unwrap();

        assert_eq!(once.merged_count(), twice.merged_count());
        assert!((once.sum2_cent().unwrap()[0] - twice.sum2_cent().unwrap()[0]).abs() < 1e-12);
        assert!((once.merged_mean().unwrap()[0] - twice.merged_mean().unwrap()[0]).abs() < 1e-12);
    }

    #[test]
    fn test_missing_column_rejected_before_merge() {
        let mask = StatisticMask::VARIANCE;
        let mut global = GlobalAggregate::new(1, mask);
        let good = PartialAggregate::new(1, 2)
            .with_sum(vec![3.0])
            .with_sum2_cent(vec![0.5]);
        let bad = PartialAggregate::new(1, 2).with_sum(vec![3.0]);
        let before = global.clone();

        let err = merge_blocks(&mut global, &[good, bad], mask).unwrap_err();

        assert_eq!(
            err,
            MomentsError::MissingBlockColumn {
                column: Statistic::Sum2Cent,
                block: 1
            }
        );
        assert_eq!(global, before, "failed merge must not mutate the aggregate");
    }

    #[test]
    fn test_feature_mismatch_rejected() {
        let mask = StatisticMask::SUM;
        let mut global = GlobalAggregate::new(2, mask);
        let narrow = PartialAggregate::new(1, 2).with_sum(vec![3.0]);

        let err = merge_blocks(&mut global, &[narrow], mask).unwrap_err();
        assert_eq!(
            err,
            MomentsError::FeatureMismatch {
                expected: 2,
                found: 1,
                block: 0
            }
        );
    }

    #[test]
    fn test_mask_mismatch_rejected() {
        let mut global: GlobalAggregate<f64> = GlobalAggregate::new(1, StatisticMask::SUM);

        let err = merge_blocks(&mut global, &[], StatisticMask::MEAN).unwrap_err();
        assert!(matches!(err, MomentsError::MaskMismatch { .. }));
    }
}

//! Flat-buffer wire codec
//!
//! Aggregates cross rank boundaries through the collective communicator,
//! which moves buffers of one element type. The codec flattens an aggregate
//! into such a buffer and back, moving only the columns the mask requires.
//!
//! Wire layout of a [`PartialAggregate`]: the observation count encoded as
//! the element type (counts travel in the same buffers as the statistics),
//! followed by the mask-required columns in canonical order (min, max, sum,
//! sum2, sum2cent), each `features` elements long. [`FinalStatistics`] pack
//! as the requested columns in canonical [`Statistic`] order with no header.

use num_traits::Float;
use thiserror::Error;

use super::{count_to_float, FinalStatistics, PartialAggregate};
use crate::mask::{Statistic, StatisticMask};

/// Failure while packing or unpacking an aggregate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer holds fewer elements than the mask and feature count imply.
    #[error("buffer too short: expected {expected} elements, found {found}")]
    BufferTooShort { expected: usize, found: usize },
    /// The buffer holds more elements than the mask and feature count imply.
    #[error("buffer too long: expected {expected} elements, found {found}")]
    TrailingData { expected: usize, found: usize },
    /// The encoded observation count is not a non-negative integer.
    #[error("encoded block count is not a non-negative integer")]
    InvalidCount,
    /// The aggregate lacks a column the mask requires.
    #[error("aggregate is missing the {0} column required by the mask")]
    MissingColumn(Statistic),
}

impl<T: Float> PartialAggregate<T> {
    /// Packed size in elements for a block of `features` features under
    /// `mask`: one count slot plus one column per required raw statistic.
    pub fn packed_len(features: usize, mask: StatisticMask) -> usize {
        let columns = usize::from(mask.needs_min())
            + usize::from(mask.needs_max())
            + usize::from(mask.needs_sum())
            + usize::from(mask.needs_sum2())
            + usize::from(mask.needs_sum2_cent());
        1 + columns * features
    }

    /// Flatten the mask-required columns into a fresh buffer.
    pub fn pack(&self, mask: StatisticMask) -> Result<Vec<T>, CodecError> {
        let mut out = Vec::with_capacity(Self::packed_len(self.features, mask));
        self.pack_into(mask, &mut out)?;
        Ok(out)
    }

    /// Flatten the mask-required columns, appending to `out`.
    pub fn pack_into(&self, mask: StatisticMask, out: &mut Vec<T>) -> Result<(), CodecError> {
        if let Some(column) = self.missing_column(mask) {
            return Err(CodecError::MissingColumn(column));
        }
        out.push(count_to_float(self.count));
        for (needed, column) in [
            (mask.needs_min(), &self.min),
            (mask.needs_max(), &self.max),
            (mask.needs_sum(), &self.sum),
            (mask.needs_sum2(), &self.sum2),
            (mask.needs_sum2_cent(), &self.sum2_cent),
        ] {
            if needed {
                // missing_column ruled out absent columns above
                if let Some(column) = column {
                    out.extend_from_slice(column);
                }
            }
        }
        Ok(())
    }

    /// Rebuild a block from a buffer produced by [`pack`](Self::pack) with
    /// the same `features` and `mask`.
    pub fn unpack(
        buffer: &[T],
        features: usize,
        mask: StatisticMask,
    ) -> Result<Self, CodecError> {
        let expected = Self::packed_len(features, mask);
        if buffer.len() < expected {
            return Err(CodecError::BufferTooShort {
                expected,
                found: buffer.len(),
            });
        }
        if buffer.len() > expected {
            return Err(CodecError::TrailingData {
                expected,
                found: buffer.len(),
            });
        }

        let encoded = buffer[0];
        if encoded < T::zero() || encoded.fract() != T::zero() {
            return Err(CodecError::InvalidCount);
        }
        let count = encoded.to_u64().ok_or(CodecError::InvalidCount)?;

        let mut offset = 1;
        let mut take = |needed: bool| {
            if needed {
                let column = buffer[offset..offset + features].to_vec();
                offset += features;
                Some(column)
            } else {
                None
            }
        };

        Ok(Self {
            features,
            count,
            min: take(mask.needs_min()),
            max: take(mask.needs_max()),
            sum: take(mask.needs_sum()),
            sum2: take(mask.needs_sum2()),
            sum2_cent: take(mask.needs_sum2_cent()),
        })
    }
}

impl<T: Float> FinalStatistics<T> {
    /// Packed size in elements: one column per requested statistic.
    pub fn packed_len(features: usize, mask: StatisticMask) -> usize {
        mask.len() * features
    }

    /// Flatten the requested columns in canonical order.
    pub fn pack(&self, mask: StatisticMask) -> Result<Vec<T>, CodecError> {
        let mut out = Vec::with_capacity(Self::packed_len(self.features, mask));
        for statistic in mask.iter() {
            let column = self
                .get(statistic)
                .ok_or(CodecError::MissingColumn(statistic))?;
            out.extend_from_slice(column);
        }
        Ok(out)
    }

    /// Rebuild statistics from a buffer produced by [`pack`](Self::pack) with
    /// the same `features` and `mask`.
    pub fn unpack(
        buffer: &[T],
        features: usize,
        mask: StatisticMask,
    ) -> Result<Self, CodecError> {
        let expected = Self::packed_len(features, mask);
        if buffer.len() < expected {
            return Err(CodecError::BufferTooShort {
                expected,
                found: buffer.len(),
            });
        }
        if buffer.len() > expected {
            return Err(CodecError::TrailingData {
                expected,
                found: buffer.len(),
            });
        }

        let mut stats = Self::new(features);
        for (i, statistic) in mask.iter().enumerate() {
            stats.insert(statistic, buffer[i * features..(i + 1) * features].to_vec());
        }
        Ok(stats)
    }
}

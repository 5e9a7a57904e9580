//! Partition plan - splits the remote byte range into contiguous segments

use crate::error::PgetError;
use pget_types::Segment;

/// How a file of `total_size` bytes is split across `segment_count` workers.
///
/// Every segment gets `base_chunk_size` bytes and the last one also takes
/// the `leftover`, so the lengths always sum to `total_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    pub total_size: u64,
    pub segment_count: u32,
    pub base_chunk_size: u64,
    pub leftover: u64,
}

impl PartitionPlan {
    /// Compute the plan, rejecting layouts that would leave a worker idle
    pub fn new(total_size: u64, segment_count: u32) -> Result<Self, PgetError> {
        if segment_count == 0 {
            return Err(PgetError::Validation(
                "at least one segment is required".to_string(),
            ));
        }
        if total_size == 0 {
            return Err(PgetError::Validation(
                "remote file is empty, nothing to download".to_string(),
            ));
        }
        if total_size < u64::from(segment_count) {
            return Err(PgetError::Validation(format!(
                "{} segments requested for a {} byte file",
                segment_count, total_size
            )));
        }

        let n = u64::from(segment_count);
        Ok(Self {
            total_size,
            segment_count,
            base_chunk_size: total_size / n,
            leftover: total_size % n,
        })
    }

    pub fn segment(&self, index: u32) -> Segment {
        let offset = u64::from(index) * self.base_chunk_size;
        let length = if index + 1 == self.segment_count {
            self.base_chunk_size + self.leftover
        } else {
            self.base_chunk_size
        };
        Segment::new(index, offset, length)
    }

    pub fn segments(&self) -> Vec<Segment> {
        (0..self.segment_count).map(|i| self.segment(i)).collect()
    }
}

//! Frame batch partitioning.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Batch lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// An ordered, contiguous slice of frame indices `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameBatch {
    /// Batch index, 0-based
    pub index: usize,
    /// First frame index (0-based, inclusive)
    pub start: usize,
    /// One past the last frame index
    pub end: usize,
    /// Current status
    pub status: BatchStatus,
    /// Attempts beyond the first
    pub retries: u32,
}

impl FrameBatch {
    /// Number of frames in the batch.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Partition `[0, frame_count)` into contiguous batches of `batch_size`
/// frames; the last batch may be shorter. The batches cover the full range
/// with no gaps or overlaps.
pub fn partition(frame_count: usize, batch_size: usize) -> PipelineResult<Vec<FrameBatch>> {
    if batch_size == 0 {
        return Err(PipelineError::internal("batch size must be non-zero"));
    }

    let mut batches = Vec::with_capacity(frame_count.div_ceil(batch_size));
    let mut start = 0;
    while start < frame_count {
        let end = (start + batch_size).min(frame_count);
        batches.push(FrameBatch {
            index: batches.len(),
            start,
            end,
            status: BatchStatus::Pending,
            retries: 0,
        });
        start = end;
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_covers_range_exactly() {
        for (frame_count, batch_size) in [(1usize, 1usize), (10, 4), (10, 3), (100, 7), (5, 100)] {
            let batches = partition(frame_count, batch_size).unwrap();

            assert_eq!(batches.len(), frame_count.div_ceil(batch_size));

            // Exact disjoint cover of [0, frame_count)
            let mut expected_start = 0;
            for (i, batch) in batches.iter().enumerate() {
                assert_eq!(batch.index, i);
                assert_eq!(batch.start, expected_start);
                assert!(batch.end > batch.start);
                assert!(batch.len() <= batch_size);
                expected_start = batch.end;
            }
            assert_eq!(expected_start, frame_count);
        }
    }

    #[test]
    fn test_ten_frames_batch_four() {
        let batches = partition(10, 4).unwrap();
        let ranges: Vec<(usize, usize)> = batches.iter().map(|b| (b.start, b.end)).collect();
        assert_eq!(ranges, vec![(0, 4), (4, 8), (8, 10)]);
    }

    #[test]
    fn test_empty_input() {
        assert!(partition(0, 4).unwrap().is_empty());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(partition(10, 0).is_err());
    }
}

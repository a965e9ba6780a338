//! Per-sample timing/size/offset/keyframe queries and segment-boundary
//! planning. Spec §3 "SegmentPlan", §4.5.

use crate::isobmff::sample_table::SampleTable;

/// Answers queries over a single track's [`SampleTable`] in its native
/// timescale. Spec §4.5.
pub struct SampleLocator<'a> {
    table: &'a SampleTable,
    timescale: u32,
}

impl<'a> SampleLocator<'a> {
    pub fn new(table: &'a SampleTable, timescale: u32) -> Self {
        Self { table, timescale }
    }

    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    pub fn sample_count(&self) -> u32 {
        self.table.sample_count
    }

    /// Decoding timestamp of the 0-based sample `index`, in track ticks.
    pub fn dts(&self, index: u32) -> u64 {
        let mut remaining = index;
        let mut ticks: u64 = 0;
        for run in &self.table.stts {
            if remaining < run.sample_count {
                ticks += remaining as u64 * run.sample_delta as u64;
                return ticks;
            }
            ticks += run.sample_count as u64 * run.sample_delta as u64;
            remaining -= run.sample_count;
        }
        ticks
    }

    /// Composition offset (signed, track ticks) for sample `index`, 0 if
    /// no `ctts` is present.
    pub fn composition_offset(&self, index: u32) -> i64 {
        let Some(ctts) = &self.table.ctts else {
            return 0;
        };
        let mut remaining = index;
        for run in ctts {
            if remaining < run.sample_count {
                return run.sample_offset;
            }
            remaining -= run.sample_count;
        }
        0
    }

    /// Presentation timestamp = DTS + composition offset, in track ticks.
    pub fn pts(&self, index: u32) -> i64 {
        self.dts(index) as i64 + self.composition_offset(index)
    }

    /// Duration of sample `index` in track ticks (its `stts` delta).
    pub fn sample_duration(&self, index: u32) -> u32 {
        let mut remaining = index;
        for run in &self.table.stts {
            if remaining < run.sample_count {
                return run.sample_delta;
            }
            remaining -= run.sample_count;
        }
        0
    }

    pub fn sample_size(&self, index: u32) -> Option<u32> {
        self.table.sample_size(index)
    }

    /// Resolves sample `index` to `(chunk_index_0based, sample_in_chunk_0based)`
    /// by walking the `stsc` runs. Spec §4.5 `resolve_chunk`.
    fn resolve_chunk(&self, index: u32) -> Option<(u32, u32)> {
        let total_chunks = self.table.chunk_offsets.len() as u32;
        let mut remaining = index;

        for (run_idx, run) in self.table.stsc.iter().enumerate() {
            let run_start_chunk = run.first_chunk - 1; // 0-based
            let run_end_chunk = self
                .table
                .stsc
                .get(run_idx + 1)
                .map(|next| next.first_chunk - 1)
                .unwrap_or(total_chunks);

            let chunks_in_run = run_end_chunk.saturating_sub(run_start_chunk);
            let samples_in_run = chunks_in_run as u64 * run.samples_per_chunk as u64;

            if (remaining as u64) < samples_in_run {
                let chunk_offset_in_run = remaining / run.samples_per_chunk;
                let sample_in_chunk = remaining % run.samples_per_chunk;
                return Some((run_start_chunk + chunk_offset_in_run, sample_in_chunk));
            }
            remaining -= samples_in_run.min(u32::MAX as u64) as u32;
        }
        None
    }

    /// Absolute file offset of sample `index`'s first byte.
    pub fn sample_offset(&self, index: u32) -> Option<u64> {
        let (chunk, sample_in_chunk) = self.resolve_chunk(index)?;
        let chunk_offset = *self.table.chunk_offsets.get(chunk as usize)?;

        // Find the first sample index of this chunk so we can sum the
        // sizes of preceding samples within the chunk.
        let first_sample_of_chunk = index - sample_in_chunk;
        let mut running = chunk_offset;
        for i in first_sample_of_chunk..index {
            running += self.table.sample_size(i)? as u64;
        }
        Some(running)
    }

    /// `(offset, size)` pairs for samples `[start, start+count)`.
    pub fn sample_ranges(&self, start: u32, count: u32) -> Vec<(u64, u32)> {
        let mut out = Vec::with_capacity(count as usize);
        for i in start..start + count {
            if let (Some(off), Some(size)) = (self.sample_offset(i), self.sample_size(i)) {
                out.push((off, size));
            }
        }
        out
    }

    /// `true` if sample `index` (0-based) is a sync sample. `stss` stores
    /// 1-based indices.
    pub fn is_sync(&self, index: u32) -> bool {
        match &self.table.sync_samples {
            None => true,
            Some(list) => list.binary_search(&(index + 1)).is_ok(),
        }
    }

    /// Ascending 0-based sync-sample indices, or every index when `stss`
    /// is absent.
    pub fn sync_sample_indices(&self) -> Vec<u32> {
        match &self.table.sync_samples {
            Some(list) => list.iter().map(|i| i - 1).collect(),
            None => (0..self.table.sample_count).collect(),
        }
    }

    pub fn nearest_sync_at_or_before(&self, index: u32) -> u32 {
        let syncs = self.sync_sample_indices();
        syncs
            .iter()
            .rev()
            .find(|&&s| s <= index)
            .copied()
            .unwrap_or(0)
    }

    /// Maps a `[start_ticks, end_ticks)` window computed against another
    /// track's timescale onto this track's own sample range, by linear
    /// scan of decode timestamps. Used to slice a companion track (e.g.
    /// audio) to a plan computed on the driving track, per spec §4.11
    /// step 5.
    pub fn samples_in_tick_range(&self, start_ticks: u64, end_ticks: u64) -> (u32, u32) {
        let total = self.table.sample_count;
        let mut first = None;
        let mut count = 0u32;
        for i in 0..total {
            let d = self.dts(i);
            if d >= start_ticks && d < end_ticks {
                if first.is_none() {
                    first = Some(i);
                }
                count += 1;
            } else if first.is_some() {
                break;
            }
        }
        (first.unwrap_or(0), count)
    }

    /// Plans segment boundaries over the whole track per spec §4.5.
    pub fn plan_segments(&self, target_duration_secs: f64, force_all_sync: bool) -> Vec<SegmentPlan> {
        let sample_count = self.table.sample_count;
        if sample_count == 0 {
            return Vec::new();
        }

        let boundaries: Vec<u32> = if force_all_sync {
            (0..sample_count).collect()
        } else {
            self.sync_sample_indices()
        };
        if boundaries.is_empty() {
            return Vec::new();
        }

        let target_ticks = (target_duration_secs * self.timescale as f64) as u64;
        let mut plans = Vec::new();
        let mut seg_start = boundaries[0];
        let mut accumulated_dts = self.dts(seg_start);

        for &candidate in &boundaries[1..] {
            let elapsed = self.dts(candidate) - accumulated_dts;
            if elapsed >= target_ticks {
                plans.push(self.finish_plan(seg_start, candidate));
                seg_start = candidate;
                accumulated_dts = self.dts(seg_start);
            }
        }

        // Final segment: from seg_start to end of track.
        plans.push(self.finish_plan(seg_start, sample_count));

        plans
    }

    fn finish_plan(&self, first_sample_index: u32, end_exclusive: u32) -> SegmentPlan {
        let sample_count = end_exclusive - first_sample_index;
        let start_dts = self.dts(first_sample_index);
        let last = end_exclusive - 1;
        let end_dts = self.dts(last) as u64 + self.sample_duration(last) as u64;
        let duration_seconds = (end_dts - start_dts) as f64 / self.timescale as f64;

        SegmentPlan {
            first_sample_index,
            sample_count,
            duration_seconds,
            start_dts_ticks: start_dts,
            start_pts_ticks: self.pts(first_sample_index) as u64,
            starts_with_keyframe: self.is_sync(first_sample_index),
        }
    }
}

/// The computed shape of one emitted HLS segment. Spec §3 "SegmentPlan".
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentPlan {
    pub first_sample_index: u32,
    pub sample_count: u32,
    pub duration_seconds: f64,
    pub start_dts_ticks: u64,
    pub start_pts_ticks: u64,
    pub starts_with_keyframe: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isobmff::sample_table::{SttsEntry, StscEntry};

    fn uniform_table(sample_count: u32, delta: u32, keyframe_interval: u32) -> SampleTable {
        let sync_samples = (0..sample_count)
            .step_by(keyframe_interval as usize)
            .map(|i| i + 1)
            .collect();
        SampleTable::synthetic(
            vec![SttsEntry {
                sample_count,
                sample_delta: delta,
            }],
            vec![StscEntry {
                first_chunk: 1,
                samples_per_chunk: sample_count,
                sample_description_index: 1,
            }],
            1000,
            sample_count,
            vec![0],
            Some(sync_samples),
        )
    }

    #[test]
    fn dts_and_pts_accumulate_run_deltas() {
        let table = uniform_table(90, 3000, 30);
        let loc = SampleLocator::new(&table, 90000);
        assert_eq!(loc.dts(0), 0);
        assert_eq!(loc.dts(1), 3000);
        assert_eq!(loc.dts(89), 89 * 3000);
        assert_eq!(loc.pts(0), 0);
    }

    #[test]
    fn plans_segments_at_keyframe_boundaries_for_target_duration() {
        let table = uniform_table(90, 3000, 30);
        let loc = SampleLocator::new(&table, 90000);
        let plans = loc.plan_segments(6.0, false);
        // 90 samples * 3000 ticks / 90000 timescale = 3.0s total; a single
        // 3.0s segment since it never reaches the 6.0s target.
        assert_eq!(plans.len(), 1);
        assert!((plans[0].duration_seconds - 3.0).abs() < 1e-9);
        assert!(plans[0].starts_with_keyframe);
    }

    #[test]
    fn plans_multiple_segments_when_target_is_reached() {
        // 300 samples at 3000 ticks / 90000 timescale = 10s total,
        // keyframe every 30 samples (1.0s), target 4.0s -> 3 segments.
        let table = uniform_table(300, 3000, 30);
        let loc = SampleLocator::new(&table, 90000);
        let plans = loc.plan_segments(4.0, false);
        assert_eq!(plans.len(), 3);
        assert!(plans[0].duration_seconds >= 4.0 - 1e-9);
        assert!(plans[1].duration_seconds >= 4.0 - 1e-9);
        let total: f64 = plans.iter().map(|p| p.duration_seconds).sum();
        assert!((total - 10.0).abs() < 1e-6);
    }

    #[test]
    fn force_all_sync_treats_every_sample_as_a_boundary() {
        let mut table = uniform_table(90, 3000, 30);
        table.sync_samples = None;
        let loc = SampleLocator::new(&table, 90000);
        let plans = loc.plan_segments(1.0, true);
        assert!(plans.len() > 1);
    }

    #[test]
    fn samples_in_tick_range_finds_contained_window() {
        let table = uniform_table(90, 3000, 30);
        let loc = SampleLocator::new(&table, 90000);
        // Samples 30..60 span ticks [90000, 180000).
        let (first, count) = loc.samples_in_tick_range(90000, 180000);
        assert_eq!(first, 30);
        assert_eq!(count, 30);
    }

    #[test]
    fn sample_offset_sums_preceding_sample_sizes_in_chunk() {
        let table = uniform_table(4, 1000, 4);
        let loc = SampleLocator::new(&table, 90000);
        assert_eq!(loc.sample_offset(0), Some(0));
        assert_eq!(loc.sample_offset(1), Some(1000));
        assert_eq!(loc.sample_offset(3), Some(3000));
    }
}

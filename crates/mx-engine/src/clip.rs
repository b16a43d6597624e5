//! In-memory source
//!
//! Holds the fully decoded stereo signal. Loading downmixes to at most two
//! channels and peak-normalizes once if the decoded peak exceeds 1.0 (the
//! normalization is applied to the stored data, so it is sticky).

use std::path::Path;

use mx_core::Sample;
use mx_dsp::cubic_interp;
use mx_file::AudioData;
use parking_lot::Mutex;

use crate::source::{auto_source_id, PlayState, Source, SourceCtl};

pub struct ClipSource {
    id: String,
    left: Vec<Sample>,
    right: Vec<Sample>,
    sample_rate: u32,
    ctl: Mutex<SourceCtl>,
}

impl ClipSource {
    /// Build from raw stereo channel data
    pub fn new(id: &str, left: Vec<Sample>, right: Vec<Sample>, sample_rate: u32) -> Self {
        debug_assert_eq!(left.len(), right.len());
        let length = left.len() as u64;
        Self {
            id: auto_source_id(id),
            left,
            right,
            sample_rate,
            ctl: Mutex::new(SourceCtl::new(sample_rate, length)),
        }
    }

    /// Build from decoded file data: downmix to stereo, then normalize if
    /// the peak exceeds unity
    pub fn from_data(id: &str, data: AudioData) -> Self {
        let frames = data.num_frames();
        let (mut left, mut right) = match data.num_channels() {
            0 => (Vec::new(), Vec::new()),
            1 => (data.channels[0].clone(), data.channels[0].clone()),
            _ => (data.channels[0].clone(), data.channels[1].clone()),
        };

        let mut peak = 0.0f32;
        for i in 0..frames {
            peak = peak.max(left[i].abs()).max(right[i].abs());
        }
        if peak > 1.0 {
            let scale = 1.0 / peak;
            for s in left.iter_mut().chain(right.iter_mut()) {
                *s *= scale;
            }
        }

        Self::new(id, left, right, data.sample_rate)
    }

    /// Decode a whole file into a clip source
    pub fn load<P: AsRef<Path>>(path: P, id: &str) -> mx_file::FileResult<Self> {
        let data = mx_file::read_audio(path)?;
        Ok(Self::from_data(id, data))
    }

    pub fn frames(&self) -> usize {
        self.left.len()
    }

    #[inline]
    fn sample_at(&self, pos: f64) -> (Sample, Sample) {
        let n = self.left.len();
        if n == 0 {
            return (0.0, 0.0);
        }
        let i1 = (pos.floor() as usize).min(n - 1);
        let frac = (pos - pos.floor()) as f32;
        let i0 = i1.saturating_sub(1);
        let i2 = (i1 + 1).min(n - 1);
        let i3 = (i1 + 2).min(n - 1);
        (
            cubic_interp(self.left[i0], self.left[i1], self.left[i2], self.left[i3], frac),
            cubic_interp(
                self.right[i0],
                self.right[i1],
                self.right[i2],
                self.right[i3],
                frac,
            ),
        )
    }
}

impl Source for ClipSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn ctl(&self) -> &Mutex<SourceCtl> {
        &self.ctl
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn length(&self) -> Option<u64> {
        Some(self.left.len() as u64)
    }

    fn render_add(
        &self,
        ctl: &mut SourceCtl,
        left: &mut [Sample],
        right: &mut [Sample],
        gain: f32,
    ) {
        // A pending seek needs no extra work here: the cursor already moved.
        ctl.pending_seek = None;

        let data_len = self.left.len() as u64;
        let start = ctl.loop_start.min(data_len) as f64;
        let end = ctl.loop_end.min(data_len) as f64;
        let step = ctl.speed as f64;
        let mut pos = ctl.cursor;
        let mut ended = false;

        for i in 0..left.len() {
            if pos >= end {
                if ctl.looping && end > start {
                    pos = start + (pos - start) % (end - start);
                } else {
                    ended = true;
                    break;
                }
            }
            let (l, r) = self.sample_at(pos);
            left[i] += l * gain;
            right[i] += r * gain;
            pos += step;
        }

        ctl.cursor = pos;
        if ended {
            ctl.state = PlayState::Stopped;
            ctl.cursor = start;
        }
    }
}

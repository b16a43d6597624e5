//! Single-tap delay

use mx_core::Sample;

use crate::params::ModParams;
use crate::Effect;

/// Longest supported delay time in seconds; the line is sized for this
const MAX_DELAY_SECS: f32 = 2.0;

/// Modulable delay with parameters `delay_time` (seconds), `feedback`,
/// `wet_level`. The tap reads input history at `delay_time * rate` frames
/// and is summed into the output scaled by `wet_level * feedback`.
pub struct Delay {
    params: ModParams,
    line: [Box<[Sample]>; 2],
    write_pos: usize,
    capacity: usize,
    sample_rate: u32,
}

impl Delay {
    pub fn new(sample_rate: u32, delay_time: f32, feedback: f32, wet_level: f32) -> Self {
        let capacity = (MAX_DELAY_SECS * sample_rate as f32) as usize + 1;
        Self {
            params: ModParams::new(
                sample_rate,
                &[
                    ("delay_time", delay_time.clamp(0.0, MAX_DELAY_SECS)),
                    ("feedback", feedback.clamp(0.0, 1.0)),
                    ("wet_level", wet_level.clamp(0.0, 1.0)),
                ],
            ),
            line: [
                vec![0.0; capacity].into_boxed_slice(),
                vec![0.0; capacity].into_boxed_slice(),
            ],
            write_pos: 0,
            capacity,
            sample_rate,
        }
    }

    fn tap_frames(&self) -> usize {
        let delay_time = self.params.get("delay_time").clamp(0.0, MAX_DELAY_SECS);
        ((delay_time as f64 * self.sample_rate as f64).round() as usize).min(self.capacity - 1)
    }

    fn process_channel(
        channel: &mut [Sample],
        line: &mut [Sample],
        mut write_pos: usize,
        capacity: usize,
        tap: usize,
        gain: f32,
    ) -> usize {
        for sample in channel.iter_mut() {
            let x = *sample;
            line[write_pos] = x;
            let read_pos = (write_pos + capacity - tap) % capacity;
            *sample = x + gain * line[read_pos];
            write_pos = (write_pos + 1) % capacity;
        }
        write_pos
    }
}

impl Effect for Delay {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn advance(&mut self, samples: usize) {
        self.params.advance(samples);
    }

    fn update_params(&mut self, params: &[(&str, f32)], fade_secs: f32) {
        self.params.set_targets(params, fade_secs);
    }

    fn param(&self, name: &str) -> Option<f32> {
        self.params.contains(name).then(|| self.params.get(name))
    }

    fn process_block(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        let tap = self.tap_frames();
        let gain = self.params.get("wet_level") * self.params.get("feedback");
        let capacity = self.capacity;

        let [line_l, line_r] = &mut self.line;
        let next = Self::process_channel(left, line_l, self.write_pos, capacity, tap, gain);
        Self::process_channel(right, line_r, self.write_pos, capacity, tap, gain);
        self.write_pos = next;
    }

    fn reset(&mut self) {
        for line in &mut self.line {
            line.fill(0.0);
        }
        self.write_pos = 0;
    }
}

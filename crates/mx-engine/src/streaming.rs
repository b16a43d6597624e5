//! Disk-streamed source
//!
//! A streamed source keeps a bounded window of decoded frames in a ring and
//! pulls more from the decoder when the frames ahead of the read cursor
//! drop below the low-water mark (half the ring). Refill runs on the mix
//! thread, so the ring needs no atomics; it lives with the reader behind
//! its own mutex, taken only after the source's ctl lock.
//!
//! The cursor is a monotonically increasing virtual frame index. Looping is
//! handled at refill time: when the decoder reaches the loop end (or the
//! file end), it seeks back to the loop start and keeps appending, so the
//! ring stays contiguous in cursor space across the wrap.

use std::path::Path;

use mx_core::Sample;
use mx_dsp::cubic_interp;
use mx_file::StreamReader;
use parking_lot::Mutex;

use crate::source::{auto_source_id, PlayState, Source, SourceCtl};

/// Ring capacity target in seconds of audio
const RING_SECONDS: usize = 1;

/// Ring capacity floor, in periods
const MIN_RING_PERIODS: usize = 8;

/// Frames decoded per refill read
const REFILL_CHUNK_FRAMES: usize = 4096;

/// Contiguous window of decoded stereo frames, indexed by virtual frame
struct FrameRing {
    data: Vec<Sample>,
    capacity: usize,
    /// Ring slot of the first valid frame
    head: usize,
    /// Virtual frame number of the first valid frame
    anchor: u64,
    fill: usize,
}

impl FrameRing {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity * 2],
            capacity,
            head: 0,
            anchor: 0,
            fill: 0,
        }
    }

    fn space(&self) -> usize {
        self.capacity - self.fill
    }

    fn end(&self) -> u64 {
        self.anchor + self.fill as u64
    }

    /// Drop everything and restart the window at `anchor`
    fn reset_to(&mut self, anchor: u64) {
        self.head = 0;
        self.fill = 0;
        self.anchor = anchor;
    }

    /// Drop frames before `abs`, keeping it (and later frames) valid
    fn discard_to(&mut self, abs: u64) {
        if abs <= self.anchor {
            return;
        }
        let drop = ((abs - self.anchor) as usize).min(self.fill);
        self.head = (self.head + drop) % self.capacity;
        self.anchor += drop as u64;
        self.fill -= drop;
    }

    /// Append `frames` interleaved-stereo frames; caller checked `space`
    fn append(&mut self, interleaved: &[Sample], frames: usize) {
        debug_assert!(frames <= self.space());
        let mut slot = (self.head + self.fill) % self.capacity;
        for frame in interleaved.chunks_exact(2).take(frames) {
            self.data[slot * 2] = frame[0];
            self.data[slot * 2 + 1] = frame[1];
            slot = (slot + 1) % self.capacity;
        }
        self.fill += frames;
    }

    /// Drop frames at and beyond virtual index `abs`
    fn truncate_end(&mut self, abs: u64) {
        if self.end() > abs {
            self.fill = abs.saturating_sub(self.anchor) as usize;
        }
    }

    /// Frame at virtual index `abs`, clamped into the valid window
    #[inline]
    fn frame(&self, abs: u64) -> (Sample, Sample) {
        if self.fill == 0 {
            return (0.0, 0.0);
        }
        let clamped = abs.clamp(self.anchor, self.end() - 1);
        let slot = (self.head + (clamped - self.anchor) as usize) % self.capacity;
        (self.data[slot * 2], self.data[slot * 2 + 1])
    }
}

/// Decoder-side state, locked after ctl on the mix thread only
struct StreamIo {
    reader: StreamReader,
    ring: FrameRing,
    /// Stream frame the reader produces next
    decode_pos: u64,
    /// Non-looping stream has no more frames to give
    exhausted: bool,
    /// Decode failed mid-playback; the source went silent
    failed: bool,
    chunk: Vec<Sample>,
}

pub struct StreamedSource {
    id: String,
    sample_rate: u32,
    channels: usize,
    total_frames: Option<u64>,
    ctl: Mutex<SourceCtl>,
    io: Mutex<StreamIo>,
}

impl StreamedSource {
    /// Open the file, allocate the ring, and preroll it
    pub fn open<P: AsRef<Path>>(path: P, id: &str, period: usize) -> mx_file::FileResult<Self> {
        let reader = StreamReader::open(path)?;
        let sample_rate = reader.sample_rate();
        let channels = reader.channels();
        let total_frames = reader.total_frames();

        let capacity = (sample_rate as usize * RING_SECONDS).max(period * MIN_RING_PERIODS);
        let length = total_frames.unwrap_or(u64::MAX);

        let source = Self {
            id: auto_source_id(id),
            sample_rate,
            channels,
            total_frames,
            ctl: Mutex::new(SourceCtl::new(sample_rate, length)),
            io: Mutex::new(StreamIo {
                reader,
                ring: FrameRing::new(capacity),
                decode_pos: 0,
                exhausted: false,
                failed: false,
                chunk: vec![0.0; REFILL_CHUNK_FRAMES * 2],
            }),
        };

        source.io.lock().refill(false, 0, length);
        Ok(source)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl StreamIo {
    /// Top the ring up to capacity, wrapping the decoder at the loop end
    fn refill(&mut self, looping: bool, loop_start: u64, loop_end: u64) {
        // The end-of-stream latch only binds while not looping.
        if self.exhausted && looping {
            self.exhausted = false;
        }
        let mut wrapped_on_empty = false;
        while self.ring.space() > 0 && !self.exhausted && !self.failed {
            let until_end = loop_end.saturating_sub(self.decode_pos);
            if until_end == 0 {
                if looping {
                    if self.wrap_to(loop_start) {
                        continue;
                    }
                    break;
                }
                self.exhausted = true;
                break;
            }

            let want = self
                .ring
                .space()
                .min(REFILL_CHUNK_FRAMES)
                .min(until_end.min(usize::MAX as u64) as usize);

            match self.reader.read_frames(&mut self.chunk[..want * 2]) {
                Ok(0) => {
                    // The file ended before the declared loop end.
                    if looping && !wrapped_on_empty {
                        wrapped_on_empty = true;
                        if self.wrap_to(loop_start) {
                            continue;
                        }
                    }
                    self.exhausted = true;
                }
                Ok(n) => {
                    wrapped_on_empty = false;
                    self.ring.append(&self.chunk[..n * 2], n);
                    self.decode_pos += n as u64;
                }
                Err(e) => {
                    log::error!("stream decode failed mid-playback: {e}");
                    self.failed = true;
                }
            }
        }
    }

    /// Seek the decoder to the loop start; false on failure
    fn wrap_to(&mut self, loop_start: u64) -> bool {
        match self.reader.seek(loop_start) {
            Ok(()) => {
                self.decode_pos = loop_start;
                true
            }
            Err(e) => {
                log::error!("loop seek failed: {e}");
                self.failed = true;
                false
            }
        }
    }

    /// Apply a deferred control-plane seek.
    ///
    /// When the ring is still stream-aligned (its window is the direct
    /// continuation of the decoder, which rules out any loop wrap inside
    /// it) and already covers `frame`, the window is kept. Otherwise the
    /// ring is invalidated and the decoder repositioned.
    fn apply_seek(&mut self, frame: u64, looping: bool, loop_end: u64) {
        self.exhausted = false;

        let aligned = self.decode_pos == self.ring.end();
        if aligned && frame >= self.ring.anchor && frame <= self.ring.end() {
            self.ring.discard_to(frame.saturating_sub(1).max(self.ring.anchor));
            if looping {
                // Frames past the loop end belong to the pre-loop mapping;
                // dropping them makes the next refill wrap the decoder.
                self.ring.truncate_end(loop_end);
            }
            return;
        }

        self.ring.reset_to(frame);
        if self.decode_pos != frame {
            if let Err(e) = self.reader.seek(frame) {
                log::error!("stream seek failed: {e}");
                self.failed = true;
                return;
            }
            self.decode_pos = frame;
        }
    }
}

impl Source for StreamedSource {
    fn id(&self) -> &str {
        &self.id
    }

    /// Looping changes remap which stream frames future ring content holds,
    /// so the window is invalidated along with the loop update
    fn set_loop(&self, looping: bool, start: u64, end: Option<u64>) {
        let length = self.length().unwrap_or(u64::MAX);
        let mut ctl = self.ctl.lock();
        ctl.looping = looping;
        ctl.loop_start = start.min(length);
        ctl.loop_end = end.unwrap_or(length).clamp(ctl.loop_start, length);
        let cursor = (ctl.cursor.floor() as u64).clamp(ctl.loop_start, ctl.loop_end);
        ctl.cursor = cursor as f64;
        ctl.pending_seek = Some(cursor);
    }

    fn ctl(&self) -> &Mutex<SourceCtl> {
        &self.ctl
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn length(&self) -> Option<u64> {
        self.total_frames
    }

    fn render_add(
        &self,
        ctl: &mut SourceCtl,
        left: &mut [Sample],
        right: &mut [Sample],
        gain: f32,
    ) {
        let mut io = self.io.lock();

        if let Some(frame) = ctl.pending_seek.take() {
            io.apply_seek(frame, ctl.looping, ctl.loop_end);
        }
        if io.failed {
            ctl.state = PlayState::Stopped;
            ctl.cursor = ctl.loop_start as f64;
            return;
        }

        // Keep one frame of history behind the cursor for interpolation.
        let keep_from = (ctl.cursor.floor() as u64).saturating_sub(1);
        let discard_to = keep_from.max(io.ring.anchor);
        io.ring.discard_to(discard_to);

        let low_water = io.ring.capacity / 2;
        let ahead = io.ring.end().saturating_sub(ctl.cursor.floor() as u64) as usize;
        if ahead < low_water && (!io.exhausted || ctl.looping) {
            io.refill(ctl.looping, ctl.loop_start, ctl.loop_end);
            if io.failed {
                ctl.state = PlayState::Stopped;
                ctl.cursor = ctl.loop_start as f64;
                return;
            }
        }

        let hard_end = if ctl.looping {
            f64::INFINITY
        } else {
            ctl.loop_end as f64
        };
        let step = ctl.speed as f64;
        let mut pos = ctl.cursor;
        let mut ended = false;

        for i in 0..left.len() {
            if pos >= hard_end {
                ended = true;
                break;
            }
            let idx = pos.floor() as u64;
            if idx >= io.ring.end() {
                if io.exhausted {
                    ended = true;
                }
                // Not exhausted means the decoder could not keep the ring
                // contract; the remainder of the block stays silent.
                break;
            }
            let frac = (pos - pos.floor()) as f32;
            let (l0, r0) = io.ring.frame(idx.saturating_sub(1));
            let (l1, r1) = io.ring.frame(idx);
            let (l2, r2) = io.ring.frame(idx + 1);
            let (l3, r3) = io.ring.frame(idx + 2);
            left[i] += cubic_interp(l0, l1, l2, l3, frac) * gain;
            right[i] += cubic_interp(r0, r1, r2, r3, frac) * gain;
            pos += step;
        }

        ctl.cursor = pos;
        if ended {
            ctl.state = PlayState::Stopped;
            ctl.cursor = ctl.loop_start as f64;
            ctl.pending_seek = Some(ctl.loop_start);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_counting_wav(path: &Path, frames: u32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let v = i as f32 / frames as f32;
            writer.write_sample(v).unwrap();
            writer.write_sample(-v).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn render_block(source: &StreamedSource, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        let mut ctl = source.ctl().lock();
        source.render_add(&mut ctl, &mut left, &mut right, 1.0);
        (left, right)
    }

    #[test]
    fn test_streamed_matches_file_order() {
        let path = std::env::temp_dir().join("mx_streamed_order.wav");
        write_counting_wav(&path, 60_000);

        let source = StreamedSource::open(&path, "st", 1024).unwrap();
        assert_eq!(source.length(), Some(60_000));
        source.play(0.0);

        let mut expected = 0u64;
        for _ in 0..40 {
            let (left, right) = render_block(&source, 1024);
            for i in 0..1024 {
                let want = expected as f32 / 60_000.0;
                assert!((left[i] - want).abs() < 1e-6, "frame {expected}");
                assert!((right[i] + want).abs() < 1e-6);
                expected += 1;
            }
        }

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_end_of_stream_stops_and_zero_fills() {
        let path = std::env::temp_dir().join("mx_streamed_eos.wav");
        write_counting_wav(&path, 1500);

        let source = StreamedSource::open(&path, "st", 1024).unwrap();
        source.play(0.0);

        render_block(&source, 1024);
        let (left, _) = render_block(&source, 1024);
        // Frames past the end stay silent.
        assert_eq!(left[600], 0.0);
        assert_eq!(source.state(), PlayState::Stopped);
        assert_eq!(source.ctl().lock().cursor, 0.0);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_loop_wraps_across_refill() {
        let path = std::env::temp_dir().join("mx_streamed_loop.wav");
        write_counting_wav(&path, 2000);

        let source = StreamedSource::open(&path, "st", 256).unwrap();
        source.set_loop(true, 0, Some(1000));
        source.play(0.0);

        // 5 blocks of 256 cross the 1000-frame loop point.
        let mut frames = Vec::new();
        for _ in 0..5 {
            let (left, _) = render_block(&source, 256);
            frames.extend_from_slice(&left);
        }
        assert_eq!(source.state(), PlayState::Playing);
        // Frame 1000 wrapped back to frame 0 of the file.
        assert!((frames[1000] - 0.0).abs() < 1e-6);
        assert!((frames[1001] - 1.0 / 2000.0).abs() < 1e-6);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_seek_invalidates_and_repositions() {
        let path = std::env::temp_dir().join("mx_streamed_seek.wav");
        write_counting_wav(&path, 50_000);

        let source = StreamedSource::open(&path, "st", 1024).unwrap();
        source.play(0.0);
        render_block(&source, 1024);

        source.seek(30_000);
        let (left, _) = render_block(&source, 1024);
        assert!((left[0] - 30_000.0 / 50_000.0).abs() < 1e-6);

        std::fs::remove_file(&path).ok();
    }
}

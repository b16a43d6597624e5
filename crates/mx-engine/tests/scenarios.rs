//! End-to-end scenarios against a capture sink (no sound card needed).
//!
//! Graphs are wired and sources started before `start()`, so the captured
//! block sequence is deterministic from block zero. Tests that mutate the
//! graph mid-run use a shallow handoff queue and allow a few blocks of
//! settling, since a racing mutation may land this period or the next.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mx_audio::{AudioError, AudioResult, OutputSink};
use mx_engine::{
    generate_sine_wave, AudioSystem, ClipSource, EngineConfig, PlayState, Source, Unity,
};
use parking_lot::Mutex;

const RATE: u32 = 44100;
const PERIOD: usize = 1024;

#[derive(Clone, Default)]
struct Capture {
    blocks: Arc<Mutex<Vec<Vec<f32>>>>,
}

impl Capture {
    fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    fn block(&self, index: usize) -> Vec<f32> {
        self.blocks.lock()[index].clone()
    }

    fn wait_for(&self, blocks: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.len() < blocks {
            assert!(Instant::now() < deadline, "timed out waiting for blocks");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

struct CaptureSink(Capture);

impl OutputSink for CaptureSink {
    fn write(&mut self, interleaved: &[f32]) -> AudioResult<()> {
        self.0.blocks.lock().push(interleaved.to_vec());
        // Pace the engine like a (fast) device would, so captures stay
        // small while tests poll.
        std::thread::sleep(Duration::from_millis(1));
        Ok(())
    }
}

struct FailingSink;

impl OutputSink for FailingSink {
    fn write(&mut self, _interleaved: &[f32]) -> AudioResult<()> {
        Err(AudioError::StreamClosed)
    }
}

fn capture_system(queue_blocks: usize) -> (AudioSystem, Capture) {
    let capture = Capture::default();
    let sys = AudioSystem::with_output(
        EngineConfig {
            sample_rate: RATE,
            period: PERIOD,
            queue_blocks,
            output_device: None,
        },
        Box::new(CaptureSink(capture.clone())),
    );
    (sys, capture)
}

/// Constant-valued looping clip, for exact level arithmetic
fn const_clip(value: f32) -> Arc<ClipSource> {
    let clip = ClipSource::new("", vec![value; RATE as usize], vec![value; RATE as usize], RATE);
    clip.set_loop(true, 0, None);
    Arc::new(clip)
}

fn wire_single(sys: &AudioSystem, source: Arc<dyn Source>) {
    let group = sys.create_group("g");
    let bus = sys.create_bus("b");
    bus.add_group(group.clone());
    sys.add_bus(bus);
    sys.add_to_group("g", source).unwrap();
}

fn peak(block: &[f32]) -> f32 {
    block.iter().fold(0.0f32, |a, &s| a.max(s.abs()))
}

// ─── S1: silence ────────────────────────────────────────────────────────

#[test]
fn s1_empty_system_emits_zero_blocks() {
    let (mut sys, capture) = capture_system(64);
    sys.start().unwrap();
    capture.wait_for(3);
    sys.stop().unwrap();

    for i in 0..3 {
        let block = capture.block(i);
        assert_eq!(block.len(), PERIOD * 2);
        assert!(block.iter().all(|&s| s == 0.0));
    }

    let metrics = sys.get_metrics();
    assert_eq!(metrics.peak, [0.0, 0.0]);
    assert_eq!(metrics.rms, [0.0, 0.0]);
    assert_eq!(metrics.clip_count, 0);
    assert!(metrics.blocks_delivered >= 3);
}

// ─── S2: sine playback ──────────────────────────────────────────────────

#[test]
fn s2_sine_plays_then_stops() {
    let (mut sys, capture) = capture_system(64);
    let sine = Arc::new(generate_sine_wave(441.0, 1.0, RATE, 0.5));
    let handle: Arc<dyn Source> = sine.clone();
    wire_single(&sys, handle);
    sine.play(0.0);

    sys.start().unwrap();
    capture.wait_for(44);

    // 441 Hz at 44100 has a 100-sample cycle, so every full block peaks at
    // exactly the amplitude.
    for i in 0..43 {
        let p = peak(&capture.block(i));
        assert!((p - 0.5).abs() < 1e-3, "block {i} peak {p}");
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while sine.state() != PlayState::Stopped {
        assert!(Instant::now() < deadline, "source never stopped");
        std::thread::sleep(Duration::from_millis(1));
    }
    sys.stop().unwrap();
}

// ─── S3: fade-in ────────────────────────────────────────────────────────

#[test]
fn s3_fade_in_ramps_monotonically() {
    let (mut sys, capture) = capture_system(64);
    let sine = Arc::new(generate_sine_wave(441.0, 1.0, RATE, 0.5));
    let handle: Arc<dyn Source> = sine.clone();
    wire_single(&sys, handle);
    sine.play(0.1);

    sys.start().unwrap();
    capture.wait_for(6);
    sys.stop().unwrap();

    let peaks: Vec<f32> = (0..6).map(|i| peak(&capture.block(i))).collect();
    assert!(peaks[0] < 0.15, "first block should be nearly silent");
    // The 4410-sample ramp completes during block 4.
    assert!((peaks[4] - 0.5).abs() < 1e-3, "block 4 peak {}", peaks[4]);
    for pair in peaks.windows(2) {
        assert!(pair[1] >= pair[0] - 1e-4, "peaks must not decrease: {peaks:?}");
    }
}

// ─── S4: mute and solo ──────────────────────────────────────────────────

#[test]
fn s4_mute_and_solo_dominance() {
    let (mut sys, capture) = capture_system(2);

    let a = const_clip(0.3);
    let b = const_clip(0.4);
    for (bus_id, group_id, clip) in [("A", "ga", a.clone()), ("B", "gb", b.clone())] {
        let group = sys.create_group(group_id);
        let bus = sys.create_bus(bus_id);
        bus.add_group(group);
        sys.add_bus(bus);
        let handle: Arc<dyn Source> = clip;
        sys.add_to_group(group_id, handle).unwrap();
    }
    a.play(0.0);
    b.play(0.0);

    sys.start().unwrap();

    let settled = |capture: &Capture| {
        let mark = capture.len() + 8;
        capture.wait_for(mark + 1);
        peak(&capture.block(mark))
    };

    capture.wait_for(3);
    assert!((settled(&capture) - 0.7).abs() < 1e-5);

    sys.set_mute("A", true).unwrap();
    assert!((settled(&capture) - 0.4).abs() < 1e-5, "muted A leaves B alone");

    sys.set_mute("A", false).unwrap();
    sys.set_solo("A", true).unwrap();
    assert!((settled(&capture) - 0.3).abs() < 1e-5, "solo A silences B");

    sys.set_solo("B", true).unwrap();
    assert!((settled(&capture) - 0.7).abs() < 1e-5, "both soloed contribute");

    sys.stop().unwrap();
}

// ─── S5: limiter and clip counting ──────────────────────────────────────

#[test]
fn s5_limiter_bounds_output_and_counts_clips() {
    let (mut sys, capture) = capture_system(64);
    let clip = const_clip(0.5);
    let handle: Arc<dyn Source> = clip.clone();
    wire_single(&sys, handle);
    clip.play(0.0);

    sys.set_master_volume(3.0); // clamps to 2.0 -> pre-limiter 1.0
    assert_eq!(sys.master_volume(), 2.0);
    sys.set_limiter(true, 0.95);

    sys.start().unwrap();
    capture.wait_for(5);
    sys.stop().unwrap();

    for i in 0..5 {
        let block = capture.block(i);
        assert!(block.iter().all(|&s| s.abs() <= 0.95 + 1e-7));
        assert!((peak(&block) - 0.95).abs() < 1e-6);
    }
    assert!(sys.get_metrics().clip_count >= 5, "every block clipped");
}

// ─── S6: send routing ───────────────────────────────────────────────────

#[test]
fn s6_unity_aux_send_doubles_dry_signal() {
    let (mut sys, capture) = capture_system(64);
    let clip = const_clip(0.25);
    let handle: Arc<dyn Source> = clip.clone();
    wire_single(&sys, handle);
    clip.play(0.0);

    let aux = sys.create_bus("rev");
    sys.add_aux_bus(aux);
    sys.add_effect("rev", Box::new(Unity)).unwrap();
    sys.add_send("b", "rev", 1.0).unwrap();

    sys.start().unwrap();
    capture.wait_for(3);
    sys.stop().unwrap();

    // master = dry (0.25) + aux contribution (0.25)
    let block = capture.block(1);
    assert!(block.iter().all(|&s| (s - 0.5).abs() < 1e-6));
}

// ─── Properties ─────────────────────────────────────────────────────────

#[test]
fn identity_graph_is_sample_exact() {
    let (mut sys, capture) = capture_system(64);
    let sine = Arc::new(generate_sine_wave(441.0, 0.5, RATE, 0.5));
    let expected: Vec<f32> = {
        let step = 2.0 * std::f64::consts::PI * 441.0 / RATE as f64;
        (0..PERIOD).map(|i| ((i as f64 * step).sin() as f32) * 0.5).collect()
    };
    let handle: Arc<dyn Source> = sine.clone();
    wire_single(&sys, handle);
    sine.play(0.0);

    sys.start().unwrap();
    capture.wait_for(1);
    sys.stop().unwrap();

    let block = capture.block(0);
    for i in 0..PERIOD {
        assert_eq!(block[i * 2], expected[i], "left frame {i}");
        assert_eq!(block[i * 2 + 1], expected[i], "right frame {i}");
    }
}

#[test]
fn doubling_master_volume_doubles_samples() {
    let run = |volume: f32| -> Vec<f32> {
        let (mut sys, capture) = capture_system(64);
        let clip = const_clip(0.2);
        let handle: Arc<dyn Source> = clip.clone();
        wire_single(&sys, handle);
        clip.play(0.0);
        sys.set_master_volume(volume);
        sys.start().unwrap();
        capture.wait_for(2);
        sys.stop().unwrap();
        capture.block(1)
    };

    let half = run(0.5);
    let full = run(1.0);
    for (a, b) in half.iter().zip(full.iter()) {
        assert_eq!(*b, *a * 2.0);
    }
}

#[test]
fn streamed_playback_matches_preloaded() {
    let path = std::env::temp_dir().join("mx_scenario_stream.wav");
    {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: RATE,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        let step = 2.0 * std::f64::consts::PI * 330.0 / RATE as f64;
        for i in 0..(RATE / 2) {
            let v = ((i as f64 * step).sin() as f32) * 0.4;
            writer.write_sample(v).unwrap();
            writer.write_sample(-v).unwrap();
        }
        writer.finalize().unwrap();
    }
    let path_str = path.to_str().unwrap();

    let run = |stream: bool| -> Vec<Vec<f32>> {
        let (mut sys, capture) = capture_system(64);
        let source = sys.load_audio(path_str, "s", stream).unwrap();
        wire_single(&sys, source.clone());
        source.play(0.0);
        sys.start().unwrap();
        capture.wait_for(20);
        sys.stop().unwrap();
        (0..20).map(|i| capture.block(i)).collect()
    };

    let streamed = run(true);
    let preloaded = run(false);
    for (i, (a, b)) in streamed.iter().zip(preloaded.iter()).enumerate() {
        assert_eq!(a, b, "block {i} differs between streamed and preloaded");
    }

    std::fs::remove_file(&path).ok();
}

#[test]
fn pause_with_fade_reaches_paused_and_resume_continues() {
    let (mut sys, capture) = capture_system(2);
    let clip = const_clip(0.5);
    let handle: Arc<dyn Source> = clip.clone();
    wire_single(&sys, handle);
    clip.play(0.0);

    sys.start().unwrap();
    capture.wait_for(3);

    clip.pause(0.05);
    let deadline = Instant::now() + Duration::from_secs(5);
    while clip.state() != PlayState::Paused {
        assert!(Instant::now() < deadline, "fade-out never paused the source");
        std::thread::sleep(Duration::from_millis(1));
    }
    let cursor_at_pause = clip.ctl().lock().cursor;
    assert!(cursor_at_pause > 0.0, "pause must preserve the cursor");

    clip.resume(0.0);
    assert_eq!(clip.state(), PlayState::Playing);

    let mark = capture.len() + 8;
    capture.wait_for(mark + 1);
    assert!((peak(&capture.block(mark)) - 0.5).abs() < 1e-5);

    sys.stop().unwrap();
}

#[test]
fn underruns_count_failed_writes() {
    let mut sys = AudioSystem::with_output(
        EngineConfig {
            sample_rate: RATE,
            period: PERIOD,
            queue_blocks: 4,
            output_device: None,
        },
        Box::new(FailingSink),
    );
    sys.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while sys.get_metrics().underruns < 3 {
        assert!(Instant::now() < deadline, "underruns never counted");
        std::thread::sleep(Duration::from_millis(1));
    }
    sys.stop().unwrap();

    let metrics = sys.get_metrics();
    assert!(metrics.underruns >= 3);
    assert_eq!(metrics.blocks_delivered, 0);
}

#[test]
fn stop_and_restart_keeps_mixing() {
    let (mut sys, capture) = capture_system(64);
    let clip = const_clip(0.3);
    let handle: Arc<dyn Source> = clip.clone();
    wire_single(&sys, handle);
    clip.play(0.0);

    sys.start().unwrap();
    capture.wait_for(2);
    sys.stop().unwrap();

    let after_first = capture.len();
    sys.start().unwrap();
    capture.wait_for(after_first + 2);
    sys.stop().unwrap();

    let block = capture.block(after_first + 1);
    assert!((peak(&block) - 0.3).abs() < 1e-5);

    sys.close().unwrap();
    assert!(sys.start().is_err());
}

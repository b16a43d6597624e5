//! Output pump
//!
//! Single consumer of the mixer's handoff ring: takes one block per
//! iteration and writes it to the output sink. A failed write drops that
//! block, counts an underrun, and moves on; the pump never retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mx_audio::OutputSink;
use mx_core::Sample;
use rtrb::Consumer;

use crate::metrics::Metrics;

/// Backoff while the handoff ring is empty
const QUEUE_EMPTY_BACKOFF: Duration = Duration::from_micros(500);

/// Worker loop. Owns the sink while running and returns it on shutdown so
/// the system can restart or release it.
pub(crate) fn run_pump(
    mut sink: Box<dyn OutputSink>,
    mut rx: Consumer<Sample>,
    running: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
    period: usize,
) -> Box<dyn OutputSink> {
    let mut block = vec![0.0f32; period * 2];

    'outer: while running.load(Ordering::Acquire) {
        let mut got = 0;
        while got < block.len() {
            match rx.pop() {
                Ok(sample) => {
                    block[got] = sample;
                    got += 1;
                }
                Err(_) => {
                    if !running.load(Ordering::Acquire) {
                        break 'outer;
                    }
                    std::thread::sleep(QUEUE_EMPTY_BACKOFF);
                }
            }
        }

        match sink.write(&block) {
            Ok(()) => metrics.note_block_delivered(),
            Err(e) => {
                metrics.note_underrun();
                log::warn!("output write failed, block dropped: {e}");
            }
        }
    }

    sink
}

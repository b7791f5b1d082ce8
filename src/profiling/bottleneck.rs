//! Synthetic CPU bottleneck.
//!
//! A busy loop that burns a configurable number of iterations so the work
//! shows up as a wide frame in profiles and a long span in traces.

use std::hint::black_box;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::http::handler::RequestContext;

pub const SPAN_NAME: &str = "simulate-cpu-work";

/// Iterations between cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BottleneckReport {
    pub iterations: u64,
    pub result: u64,
    pub elapsed: Duration,
    pub cancelled: bool,
}

/// Count to `iterations`, stopping early once any flag in `cancel` is set.
///
/// Never inlined so the frame keeps its own name in native profilers.
#[inline(never)]
pub fn simulate_cpu_work(iterations: u64, cancel: &[&AtomicBool]) -> BottleneckReport {
    let started = Instant::now();
    let mut counter: u64 = 0;
    let mut done: u64 = 0;
    let mut cancelled = false;

    while done < iterations {
        let chunk = CANCEL_CHECK_INTERVAL.min(iterations - done);
        for _ in 0..chunk {
            counter = black_box(counter.wrapping_add(black_box(1)));
        }
        done += chunk;

        if done < iterations && cancel.iter().any(|flag| flag.load(Ordering::Relaxed)) {
            cancelled = true;
            break;
        }
    }

    BottleneckReport {
        iterations: done,
        result: counter,
        elapsed: started.elapsed(),
        cancelled,
    }
}

/// Sets the per-call flag when the calling future goes away, so an
/// abandoned request stops its loop.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Decrements the running count when the loop exits, even on panic.
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Configured bottleneck shared by every request of a service.
#[derive(Debug, Clone)]
pub struct Bottleneck {
    iterations: u64,
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicUsize>,
}

impl Bottleneck {
    pub fn new(iterations: u64) -> Self {
        Self {
            iterations,
            cancel: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Loops currently burning a blocking-pool thread.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Make running and future simulations return early.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Run the loop under a `simulate-cpu-work` span and attribute its time
    /// to `stack` in the profile collector.
    ///
    /// The loop runs on the blocking pool; the span stays with the caller.
    /// Dropping the returned future stops the loop at its next check, and the
    /// CPU it burned is still recorded.
    pub async fn run(&self, cx: &RequestContext, stack: &[&str]) -> BottleneckReport {
        let mut span = cx.start_span(SPAN_NAME);
        span.set_attribute("bottleneck.iterations", self.iterations);
        tracing::info!(trace_id = %span.context().trace_id, iterations = self.iterations, "Simulating a CPU-intensive bottleneck");

        let call_cancel = Arc::new(AtomicBool::new(false));
        let _abandon = CancelOnDrop(Arc::clone(&call_cancel));

        let iterations = self.iterations;
        let shutdown = Arc::clone(&self.cancel);
        let profiler = cx.telemetry().profiler().clone();
        let mut frames: Vec<String> = stack.iter().map(|frame| frame.to_string()).collect();
        frames.push(SPAN_NAME.to_string());
        self.running.fetch_add(1, Ordering::SeqCst);
        let running = RunningGuard(Arc::clone(&self.running));

        let work = tokio::task::spawn_blocking(move || {
            let _running = running;
            let report = simulate_cpu_work(iterations, &[&*shutdown, &*call_cancel]);
            let frames: Vec<&str> = frames.iter().map(String::as_str).collect();
            profiler.record(&frames, report.elapsed);
            report
        });
        let report = match work.await {
            Ok(report) => report,
            Err(e) => {
                span.record_error(&e);
                BottleneckReport {
                    iterations: 0,
                    result: 0,
                    elapsed: Duration::ZERO,
                    cancelled: true,
                }
            }
        };

        span.set_attribute("bottleneck.elapsed_ms", report.elapsed.as_secs_f64() * 1000.0);
        span.set_attribute("bottleneck.cancelled", report.cancelled);

        tracing::info!(
            trace_id = %span.context().trace_id,
            result = report.result,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "CPU-intensive work complete"
        );
        report
    }
}

//! Accumulates streamed output and derives inference telemetry.

use std::time::Instant;
use thiserror::Error;

use crate::models::{Accelerator, PerfMetrics};

/// Approximate prompt tokens contributed by one attached image
pub const IMAGE_TOKEN_ESTIMATE: usize = 257;

/// Tokens the model must prefill: the text's tokens plus a fixed cost per image
pub fn prefill_token_estimate(text_tokens: usize, image_count: usize) -> usize {
    text_tokens + IMAGE_TOKEN_ESTIMATE * image_count
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("Received output after generation finished")]
    AlreadyDone,
    #[error("Generation has not finished")]
    NotDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    NotStarted,
    Accumulating,
    Done,
}

#[derive(Debug)]
pub struct StreamAggregator {
    state: AggregatorState,
    started_at: Instant,
    prefill_tokens: usize,
    accelerator: Accelerator,
    first_token_at: Option<Instant>,
    decode_tokens: usize,
    time_to_first_token_secs: f32,
    prefill_speed: f32,
    decode_speed: f32,
    latency_secs: f32,
    output: String,
}

impl StreamAggregator {
    pub fn new(started_at: Instant, prefill_tokens: usize, accelerator: Accelerator) -> Self {
        Self {
            state: AggregatorState::NotStarted,
            started_at,
            prefill_tokens,
            accelerator,
            first_token_at: None,
            decode_tokens: 0,
            time_to_first_token_secs: 0.0,
            prefill_speed: 0.0,
            decode_speed: 0.0,
            latency_secs: 0.0,
            output: String::new(),
        }
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn decode_tokens(&self) -> usize {
        self.decode_tokens
    }

    /// Feed one streamed chunk observed at `now`.
    pub fn push(&mut self, text: &str, done: bool, now: Instant) -> Result<(), AggregatorError> {
        if self.state == AggregatorState::Done {
            return Err(AggregatorError::AlreadyDone);
        }
        self.output.push_str(text);

        let first_token_at = match self.first_token_at {
            Some(first) => {
                self.decode_tokens += 1;
                first
            }
            None => {
                self.time_to_first_token_secs = secs_between(self.started_at, now);
                self.prefill_speed = rate(self.prefill_tokens, self.time_to_first_token_secs);
                self.first_token_at = Some(now);
                self.state = AggregatorState::Accumulating;
                now
            }
        };

        if done {
            self.latency_secs = secs_between(self.started_at, now);
            self.decode_speed = rate(self.decode_tokens, secs_between(first_token_at, now));
            self.state = AggregatorState::Done;
            tracing::debug!(
                "Generation finished: ttft={:.3}s decode={:.2} tok/s latency={:.3}s",
                self.time_to_first_token_secs,
                self.decode_speed,
                self.latency_secs
            );
        }
        Ok(())
    }

    /// Final text and metrics. Only available once the stream reported `done`.
    pub fn finish(self) -> Result<(String, PerfMetrics), AggregatorError> {
        if self.state != AggregatorState::Done {
            return Err(AggregatorError::NotDone);
        }
        let metrics = PerfMetrics {
            time_to_first_token_secs: self.time_to_first_token_secs,
            prefill_speed: self.prefill_speed,
            decode_speed: self.decode_speed,
            latency_secs: self.latency_secs,
            accelerator: self.accelerator,
        };
        Ok((self.output, metrics))
    }
}

fn secs_between(earlier: Instant, later: Instant) -> f32 {
    later.saturating_duration_since(earlier).as_secs_f32()
}

/// tokens / secs, 0 when elapsed time is zero or the result is not finite
fn rate(tokens: usize, secs: f32) -> f32 {
    if secs <= 0.0 {
        return 0.0;
    }
    let value = tokens as f32 / secs;
    if value.is_finite() { value } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_prefill_estimate_adds_image_cost() {
        assert_eq!(prefill_token_estimate(100, 0), 100);
        assert_eq!(prefill_token_estimate(100, 2), 100 + 2 * 257);
    }

    #[test]
    fn test_three_chunks_concatenate_and_time() {
        let start = Instant::now();
        let t1 = start + Duration::from_millis(500);
        let t2 = t1 + Duration::from_millis(250);
        let t3 = t1 + Duration::from_millis(1000);

        let mut agg = StreamAggregator::new(start, 50, Accelerator::Cpu);
        assert_eq!(agg.state(), AggregatorState::NotStarted);
        agg.push("p1", false, t1).unwrap();
        assert_eq!(agg.state(), AggregatorState::Accumulating);
        agg.push("p2", false, t2).unwrap();
        agg.push("p3", true, t3).unwrap();
        assert_eq!(agg.decode_tokens(), 2);

        let (text, metrics) = agg.finish().unwrap();
        assert_eq!(text, "p1p2p3");
        assert!(approx(metrics.time_to_first_token_secs, 0.5));
        assert!(approx(metrics.prefill_speed, 100.0));
        assert!(approx(metrics.decode_speed, 2.0 / 1.0));
        assert!(approx(metrics.latency_secs, 1.5));
        assert_eq!(metrics.accelerator, Accelerator::Cpu);
    }

    #[test]
    fn test_single_done_chunk_has_zero_decode_speed() {
        let start = Instant::now();
        let mut agg = StreamAggregator::new(start, 10, Accelerator::Gpu);
        agg.push("{}", true, start + Duration::from_millis(100)).unwrap();
        let (_, metrics) = agg.finish().unwrap();
        assert_eq!(metrics.decode_speed, 0.0);
        assert!(!metrics.decode_speed.is_nan());
    }

    #[test]
    fn test_zero_elapsed_guards() {
        let start = Instant::now();
        let mut agg = StreamAggregator::new(start, 10, Accelerator::Cpu);
        agg.push("a", false, start).unwrap();
        agg.push("b", true, start).unwrap();
        let (_, metrics) = agg.finish().unwrap();
        assert_eq!(metrics.prefill_speed, 0.0);
        assert_eq!(metrics.decode_speed, 0.0);
    }

    #[test]
    fn test_push_after_done_and_early_finish_rejected() {
        let start = Instant::now();
        let agg = StreamAggregator::new(start, 1, Accelerator::Cpu);
        assert_eq!(agg.finish().unwrap_err(), AggregatorError::NotDone);

        let mut agg = StreamAggregator::new(start, 1, Accelerator::Cpu);
        agg.push("x", true, start).unwrap();
        assert_eq!(agg.push("y", false, start), Err(AggregatorError::AlreadyDone));
        assert_eq!(agg.output(), "x");
    }
}

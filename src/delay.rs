// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Per-call-site state for the stateful time-series builtins.
//!
//! Every `SMOOTH`, `DELAY` and `DELAY_GRADUAL` call in a compiled
//! expression owns one slot in the model's delay arena.  A slot starts
//! out empty and is filled the first time its call is evaluated; `reset`
//! empties every slot again.

use std::collections::VecDeque;

/// Upper bound on buffered samples for one call site, reached only with
/// delay times that are huge relative to `dt`.
const MAX_SAMPLES: usize = 100_000;

/// SMOOTH keeps its diagnostic trail for this many time constants.
const SMOOTH_HISTORY_TIME_CONSTANTS: f64 = 5.0;

/// DELAY_GRADUAL keeps samples for this many delay times.
const GRADUAL_HISTORY_DELAY_TIMES: f64 = 4.0;

#[derive(PartialEq, Clone, Debug, Default)]
pub struct DelayState {
    samples: VecDeque<(f64, f64)>,
    smoothed: Option<f64>,
}

impl DelayState {
    /// Buffered `(time, value)` samples, oldest first.  For SMOOTH these
    /// are the smoothed outputs; for the delays they are the inputs.
    pub fn samples(&self) -> &VecDeque<(f64, f64)> {
        &self.samples
    }

    /// The running SMOOTH accumulator, if this slot belongs to a SMOOTH
    /// call that has been evaluated.
    pub fn smoothed(&self) -> Option<f64> {
        self.smoothed
    }

    fn push(&mut self, time: f64, value: f64) {
        self.samples.push_back((time, value));
        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    /// Drop samples strictly older than `cutoff`.
    fn prune_before(&mut self, cutoff: f64) {
        while let Some(&(t, _)) = self.samples.front() {
            if t < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn keep_latest(&mut self) {
        while self.samples.len() > 1 {
            self.samples.pop_front();
        }
    }
}

/// First-order exponential smoothing.  The first evaluation adopts the
/// input as-is; later ones move toward it by `dt / time_constant` of the
/// remaining gap.
pub fn smooth(state: &mut DelayState, time: f64, dt: f64, input: f64, time_constant: f64) -> f64 {
    let smoothed = match state.smoothed {
        None => input,
        Some(prev) if time_constant > 0.0 => prev + (input - prev) * (dt / time_constant),
        // no memory to smooth over
        Some(_) => input,
    };
    state.smoothed = Some(smoothed);

    state.push(time, smoothed);
    if time_constant > 0.0 {
        state.prune_before(time - SMOOTH_HISTORY_TIME_CONSTANTS * time_constant);
    } else {
        state.keep_latest();
    }

    smoothed
}

/// Pure transport lag: the input as it was `delay_time` ago, linearly
/// interpolated between buffered samples.  Until the buffer reaches back
/// that far the current input is passed through unchanged.
pub fn delay(state: &mut DelayState, time: f64, input: f64, delay_time: f64) -> f64 {
    state.push(time, input);

    let target = time - delay_time;

    // keep exactly one sample at or before the target time
    while state.samples.len() >= 2 && state.samples[1].0 <= target {
        state.samples.pop_front();
    }

    let (t0, v0) = match state.samples.front() {
        Some(&sample) => sample,
        None => return input,
    };
    if t0 > target {
        return input;
    }

    match state.samples.get(1) {
        Some(&(t1, v1)) if t1 > t0 && t0 < target => v0 + (v1 - v0) * (target - t0) / (t1 - t0),
        _ => v0,
    }
}

/// Approximate material delay: a Gaussian-weighted average of buffered
/// inputs centered `delay_time` in the past with a standard deviation of
/// a third of the delay.  Like `delay`, it passes the input through until
/// the buffer reaches back to the center.
pub fn delay_gradual(state: &mut DelayState, time: f64, input: f64, delay_time: f64) -> f64 {
    state.push(time, input);

    if delay_time.is_nan() || delay_time <= 0.0 {
        state.keep_latest();
        return input;
    }

    state.prune_before(time - GRADUAL_HISTORY_DELAY_TIMES * delay_time);

    let center = time - delay_time;
    match state.samples.front() {
        Some(&(t0, _)) if t0 <= center => {}
        _ => return input,
    }

    let sigma = delay_time / 3.0;
    let denom = 2.0 * sigma * sigma;
    let (sum, weights) = state
        .samples
        .iter()
        .fold((0.0, 0.0), |(sum, weights), &(t, v)| {
            let w = (-(t - center).powi(2) / denom).exp();
            (sum + w * v, weights + w)
        });

    if weights > 0.0 { sum / weights } else { input }
}

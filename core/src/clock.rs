//! Simulation clock - owns tick state, simulated time, speed and run state.
//!
//! The clock is purely logical: each `advance()` moves simulated time by
//! `speed_factor x base_period_ms`. Wall-clock pacing (one tick per
//! BASE_PERIOD of real time) is the runner's concern, not the engine's.
//! The contract is only that tick N's pipeline completes before tick N+1
//! fires (run-to-completion).

use crate::types::{SessionId, SimTimeMs, Tick};
use serde::{Deserialize, Serialize};

/// Default wall-clock period between ticks, in milliseconds.
pub const BASE_PERIOD_MS: SimTimeMs = 1_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Stopped,
    Running,
    Paused,
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimClock {
    pub session_id:     SessionId,
    pub tick_number:    Tick,
    pub sim_time_ms:    SimTimeMs,
    pub base_period_ms: SimTimeMs,
    pub speed_factor:   i64,
    pub state:          RunState,
    /// Production-day key. Incremented by restart(); never reused.
    pub day_index:      u32,
}

impl SimClock {
    pub fn new(session_id: SessionId, start_ms: SimTimeMs, speed_factor: i64) -> Self {
        Self {
            session_id,
            tick_number: 0,
            sim_time_ms: start_ms,
            base_period_ms: BASE_PERIOD_MS,
            speed_factor,
            state: RunState::Stopped,
            day_index: 0,
        }
    }

    /// Simulated milliseconds added per tick.
    pub fn delta_ms(&self) -> SimTimeMs {
        self.speed_factor * self.base_period_ms
    }

    /// Advance one tick. Returns (tick_number, sim_time_ms) after the step.
    /// Panics if called while not running - callers must check.
    pub fn advance(&mut self) -> (Tick, SimTimeMs) {
        assert!(
            self.state == RunState::Running,
            "advance() called on {} clock",
            self.state.name()
        );
        self.tick_number += 1;
        self.sim_time_ms += self.delta_ms();
        (self.tick_number, self.sim_time_ms)
    }

    pub fn start(&mut self) {
        self.state = RunState::Running;
    }

    /// Freeze tick emission. Accumulated simulated time is kept.
    pub fn pause(&mut self) {
        if self.state == RunState::Running {
            self.state = RunState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == RunState::Paused {
            self.state = RunState::Running;
        }
    }

    pub fn stop(&mut self) {
        self.state = RunState::Stopped;
    }

    /// Begin a fresh production day after stop(). The day key is distinct
    /// from every earlier day of this session; the tick counter restarts.
    pub fn restart(&mut self, day_start_ms: SimTimeMs) {
        self.day_index += 1;
        self.tick_number = 0;
        self.sim_time_ms = day_start_ms;
        self.state = RunState::Stopped;
    }

    /// Seed the clock for recovery from persisted state.
    pub fn set_initial_state(&mut self, sim_time_ms: SimTimeMs, tick: Tick) {
        assert!(
            self.state == RunState::Stopped,
            "set_initial_state() on a live clock"
        );
        self.sim_time_ms = sim_time_ms;
        self.tick_number = tick;
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }
}

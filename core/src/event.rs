//! Events and the EventSink boundary.
//!
//! RULE: the engine never awaits a sink. Every emission is synchronous
//! fire-and-forget from the engine's point of view; sink implementations
//! that need IO (SQLite, sockets) absorb their own failures and log them.
//! No event is emitted twice for the same state transition.

use crate::{
    kpi::{MttrMtbfData, OeeData},
    snapshot::{BufferSnapshot, PlantSnapshot},
    stops::Stop,
    topology::PlantTopology,
    types::{SimTimeMs, Tick},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A station address as seen by external consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    pub shop: String,
    pub line: String,
    pub station: String,
}

/// A stop record resolved to names for emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopEventRecord {
    pub id: crate::types::StopId,
    pub shop: String,
    pub line: String,
    /// None for line-wide stops.
    pub station: Option<String>,
    pub reason: String,
    pub kind: crate::stops::StopKind,
    pub category: String,
    pub severity: crate::stops::Severity,
    pub status: crate::stops::StopStatus,
    pub start_time: SimTimeMs,
    pub end_time: SimTimeMs,
    pub duration_ms: SimTimeMs,
}

impl StopEventRecord {
    pub fn from_stop(topo: &PlantTopology, stop: &Stop) -> Self {
        let station = match stop.scope {
            crate::stops::AffectedScope::SingleStation(s) => {
                Some(topo.stations[s].name.clone())
            }
            crate::stops::AffectedScope::AllStationsOfLine => None,
        };
        Self {
            id: stop.id,
            shop: topo.shops[stop.shop].name.clone(),
            line: topo.lines[stop.line].name.clone(),
            station,
            reason: stop.reason.clone(),
            kind: stop.kind,
            category: stop.category.clone(),
            severity: stop.severity,
            status: stop.status,
            start_time: stop.start_time,
            end_time: stop.end_time,
            duration_ms: stop.duration_ms,
        }
    }
}

/// Every event emitted during simulation.
/// Variants are added as the system grows - never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SimEvent {
    CarCreated {
        id: String,
        model: String,
        shop: String,
        line: String,
        station: String,
        ts: SimTimeMs,
    },
    PartCreated {
        id: String,
        part_type: String,
        model: String,
        shop: String,
        line: String,
        station: String,
        ts: SimTimeMs,
    },
    CarMoved {
        id: String,
        from: Location,
        to: Location,
        ts: SimTimeMs,
    },
    CarCompleted {
        id: String,
        location: Location,
        total_leadtime_ms: SimTimeMs,
        ts: SimTimeMs,
    },
    BufferIn {
        item_id: String,
        buffer_id: String,
        shop: String,
        line: String,
        station: String,
        ts: SimTimeMs,
    },
    BufferOut {
        item_id: String,
        buffer_id: String,
        shop: String,
        line: String,
        station: String,
        ts: SimTimeMs,
    },
    ReworkIn {
        item_id: String,
        buffer_id: String,
        shop: String,
        line: Option<String>,
        station: Option<String>,
        defect_id: Option<String>,
        ts: SimTimeMs,
    },
    ReworkOut {
        item_id: String,
        buffer_id: String,
        shop: String,
        line: Option<String>,
        station: Option<String>,
        ts: SimTimeMs,
    },
    PartConsumed {
        part_id: String,
        part_type: String,
        model: String,
        car_id: Option<String>,
        shop: String,
        line: String,
        station: String,
        ts: SimTimeMs,
    },
    PartShortage {
        part_type: String,
        model: Option<String>,
        car_id: Option<String>,
        shop: String,
        line: String,
        station: String,
        ts: SimTimeMs,
    },
    StopStarted {
        stop: StopEventRecord,
        ts: SimTimeMs,
    },
    StopEnded {
        stop: StopEventRecord,
        ts: SimTimeMs,
    },
    TickState {
        tick: Tick,
        status: String,
        simulated_time_ms: SimTimeMs,
        speed_factor: i64,
    },
    PlantSnapshot {
        snapshot: PlantSnapshot,
    },
    BuffersSnapshot {
        buffers: Vec<BufferSnapshot>,
        ts: SimTimeMs,
    },
    OeeCalculated {
        data: OeeData,
    },
    OeeShiftEnd {
        data: OeeData,
    },
    MttrMtbfCalculated {
        data: MttrMtbfData,
    },
}

impl SimEvent {
    /// Stable string name, used as the event_type column by sinks.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CarCreated { .. } => "car-created",
            Self::PartCreated { .. } => "part-created",
            Self::CarMoved { .. } => "car-moved",
            Self::CarCompleted { .. } => "car-completed",
            Self::BufferIn { .. } => "buffer-in",
            Self::BufferOut { .. } => "buffer-out",
            Self::ReworkIn { .. } => "rework-in",
            Self::ReworkOut { .. } => "rework-out",
            Self::PartConsumed { .. } => "part-consumed",
            Self::PartShortage { .. } => "part-shortage",
            Self::StopStarted { .. } => "stop-started",
            Self::StopEnded { .. } => "stop-ended",
            Self::TickState { .. } => "tick-state",
            Self::PlantSnapshot { .. } => "plant-snapshot",
            Self::BuffersSnapshot { .. } => "buffers-snapshot",
            Self::OeeCalculated { .. } => "oee-calculated",
            Self::OeeShiftEnd { .. } => "oee-shift-end",
            Self::MttrMtbfCalculated { .. } => "mttrmtbf-calculated",
        }
    }
}

/// The boundary the engine pushes state changes through.
pub trait EventSink {
    fn emit(&mut self, event: &SimEvent);
}

/// Discards everything. The default for headless fast-forward runs.
#[derive(Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: &SimEvent) {}
}

/// Collects everything. Used by tests and replay tooling.
#[derive(Default)]
pub struct MemorySink {
    pub events: Vec<SimEvent>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SimEvent> {
        self.events.iter().filter(move |e| e.type_name() == name)
    }

    pub fn count_of(&self, name: &str) -> usize {
        self.of_type(name).count()
    }
}

impl EventSink for MemorySink {
    fn emit(&mut self, event: &SimEvent) {
        self.events.push(event.clone());
    }
}

/// Latest-wins throttle for snapshot-like categories.
///
/// With a zero interval every offer passes straight through. Otherwise
/// the most recent event per key is kept and flushed when the interval
/// boundary passes. Keys are iterated in order so flush order is
/// deterministic.
pub struct Throttle {
    interval_ms: SimTimeMs,
    last_flush: SimTimeMs,
    pending: BTreeMap<String, SimEvent>,
}

impl Throttle {
    pub fn new(interval_ms: SimTimeMs) -> Self {
        Self {
            interval_ms,
            last_flush: SimTimeMs::MIN,
            pending: BTreeMap::new(),
        }
    }

    pub fn offer<S: EventSink>(
        &mut self,
        key: &str,
        event: SimEvent,
        now: SimTimeMs,
        sink: &mut S,
    ) {
        if self.interval_ms <= 0 {
            sink.emit(&event);
            return;
        }
        self.pending.insert(key.to_string(), event);
        self.flush_due(now, sink);
    }

    pub fn flush_due<S: EventSink>(&mut self, now: SimTimeMs, sink: &mut S) {
        if self.interval_ms <= 0 {
            return;
        }
        if self.last_flush != SimTimeMs::MIN && now - self.last_flush < self.interval_ms {
            return;
        }
        for (_, event) in std::mem::take(&mut self.pending) {
            sink.emit(&event);
        }
        self.last_flush = now;
    }

    /// Drop pending state (engine stop()).
    pub fn reset(&mut self) {
        self.pending.clear();
        self.last_flush = SimTimeMs::MIN;
    }
}

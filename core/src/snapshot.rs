//! Snapshot types - the plant tree and buffer states as emitted to the
//! EventSink and persisted by the SQLite sink.
//!
//! Snapshots are observations, not authority: they are derived from the
//! live stores and carry names instead of arena indices so external
//! consumers need no topology to read them.

use crate::{
    buffers::{BufferKind, BufferRegistry, BufferStatus},
    items::WorkItemStore,
    scheduler::Scheduler,
    topology::PlantTopology,
    types::{SimTimeMs, Tick},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub id: String,
    pub occupied: bool,
    pub item_id: Option<String>,
    pub is_stopped: bool,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSnapshot {
    pub id: String,
    pub produced: u64,
    pub stations: Vec<StationSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopSnapshot {
    pub name: String,
    pub produced: u64,
    pub lines: Vec<LineSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlantSnapshot {
    pub tick: Tick,
    pub ts: SimTimeMs,
    pub total_items: usize,
    pub total_completed: u64,
    pub total_defective: u64,
    pub shops: Vec<ShopSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSnapshot {
    pub id: String,
    pub kind: BufferKind,
    pub capacity: usize,
    pub count: usize,
    pub status: BufferStatus,
    pub item_ids: Vec<String>,
}

pub fn plant_snapshot(
    topo: &PlantTopology,
    items: &WorkItemStore,
    scheduler: &Scheduler,
    tick: Tick,
    ts: SimTimeMs,
) -> PlantSnapshot {
    let shops = topo
        .shops
        .iter()
        .enumerate()
        .map(|(shop_idx, shop)| ShopSnapshot {
            name: shop.name.clone(),
            produced: items.produced_in_shop(shop_idx),
            lines: shop
                .lines
                .iter()
                .map(|&line_idx| {
                    let line = &topo.lines[line_idx];
                    LineSnapshot {
                        id: line.id.clone(),
                        produced: items.produced_on_line(line_idx),
                        stations: line
                            .stations
                            .iter()
                            .map(|&s| {
                                let state = scheduler.station(s);
                                StationSnapshot {
                                    id: topo.stations[s].id.clone(),
                                    occupied: state.occupied.is_some(),
                                    item_id: state.occupied.map(|i| items.get(i).id.clone()),
                                    is_stopped: state.is_stopped,
                                    stop_reason: state.stop_reason.clone(),
                                }
                            })
                            .collect(),
                    }
                })
                .collect(),
        })
        .collect();

    PlantSnapshot {
        tick,
        ts,
        total_items: items.len(),
        total_completed: items.completed_total,
        total_defective: items.defective_total,
        shops,
    }
}

pub fn buffer_snapshots(buffers: &BufferRegistry, items: &WorkItemStore) -> Vec<BufferSnapshot> {
    buffers
        .iter()
        .map(|(_, buffer)| BufferSnapshot {
            id: buffer.id.clone(),
            kind: buffer.kind,
            capacity: buffer.capacity,
            count: buffer.len(),
            status: buffer.status(),
            item_ids: buffer.iter().map(|i| items.get(i).id.clone()).collect(),
        })
        .collect()
}

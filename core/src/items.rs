//! Work item store - exclusive owner of every car and part.
//!
//! Arena ownership: items live in a flat vector; stations and buffers
//! hold `ItemIdx` values only. An item is created at a start station and
//! lives until `completed_at` is set (cars) or it is consumed (parts).
//!
//! The store also keeps the O(1) production counters the KPI engine
//! reads: per-line and per-shop produced counts for the current shift,
//! plus session totals.

use crate::types::{ItemIdx, LineIdx, ShopIdx, SimTimeMs, StationIdx};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One visit to a station. Append-only; `leave` is set exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub station: StationIdx,
    pub enter: SimTimeMs,
    pub leave: Option<SimTimeMs>,
}

/// An open or closed dwell interval, per shop (line = None) and per
/// shop+line (line = Some).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadtimeEntry {
    pub shop: ShopIdx,
    pub line: Option<LineIdx>,
    pub entered_at: SimTimeMs,
    pub exited_at: Option<SimTimeMs>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub sequence: u64,
    pub model: String,
    /// Body colors; empty for parts.
    pub colors: Vec<String>,
    pub created_at: SimTimeMs,
    pub completed_at: Option<SimTimeMs>,
    pub trace: Vec<TraceEntry>,
    pub leadtimes: Vec<LeadtimeEntry>,
    pub has_defect: bool,
    pub in_rework: bool,
    pub rework_entered_at: Option<SimTimeMs>,
    pub defects: Vec<String>,
    pub is_part: bool,
    pub part_type: Option<String>,
}

impl WorkItem {
    /// Dwell interval for a specific line, if the item visited it.
    pub fn line_leadtime(&self, line: LineIdx) -> Option<&LeadtimeEntry> {
        self.leadtimes.iter().find(|l| l.line == Some(line))
    }

    pub fn shop_leadtime(&self, shop: ShopIdx) -> Option<&LeadtimeEntry> {
        self.leadtimes.iter().find(|l| l.shop == shop && l.line.is_none())
    }
}

pub struct WorkItemStore {
    items: Vec<WorkItem>,
    next_sequence: u64,
    cars_created: u64,
    parts_created: HashMap<String, u64>,
    /// Planned-mix draw counter for cars (0-based).
    mix_cursor: u64,
    /// Per-line mix cursors for part lines.
    part_mix_cursors: HashMap<LineIdx, u64>,
    /// Items that exited each line during the current shift.
    produced_by_line: Vec<u64>,
    /// Cars that exited each shop during the current shift.
    produced_by_shop: Vec<u64>,
    pub completed_total: u64,
    pub defective_total: u64,
}

impl WorkItemStore {
    pub fn new(num_lines: usize, num_shops: usize) -> Self {
        Self {
            items: Vec::new(),
            next_sequence: 0,
            cars_created: 0,
            parts_created: HashMap::new(),
            mix_cursor: 0,
            part_mix_cursors: HashMap::new(),
            produced_by_line: vec![0; num_lines],
            produced_by_shop: vec![0; num_shops],
            completed_total: 0,
            defective_total: 0,
        }
    }

    pub fn get(&self, idx: ItemIdx) -> &WorkItem {
        &self.items[idx]
    }

    pub fn get_mut(&mut self, idx: ItemIdx) -> &mut WorkItem {
        &mut self.items[idx]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ItemIdx, &WorkItem)> {
        self.items.iter().enumerate()
    }

    // ── Creation ───────────────────────────────────────────────────────

    /// Next model from the planned mix:
    /// index = floor((seq mod (block x models)) / block).
    pub fn next_mix_model(&mut self, models: &[String], block_size: usize) -> String {
        let block = block_size.max(1) as u64;
        let cycle = block * models.len() as u64;
        let idx = (self.mix_cursor % cycle) / block;
        self.mix_cursor += 1;
        models[idx as usize].clone()
    }

    /// Per-line planned mix for part lines.
    pub fn next_part_mix_model(
        &mut self,
        line: LineIdx,
        models: &[String],
        items_per_line: usize,
    ) -> String {
        let cursor = self.part_mix_cursors.entry(line).or_insert(0);
        let block = items_per_line.max(1) as u64;
        let cycle = block * models.len() as u64;
        let idx = (*cursor % cycle) / block;
        *cursor += 1;
        models[idx as usize].clone()
    }

    pub fn create_car(
        &mut self,
        model: String,
        colors: Vec<String>,
        has_defect: bool,
        now: SimTimeMs,
    ) -> ItemIdx {
        self.cars_created += 1;
        self.next_sequence += 1;
        let idx = self.items.len();
        self.items.push(WorkItem {
            id: format!("C{}", self.cars_created),
            sequence: self.next_sequence,
            model,
            colors,
            created_at: now,
            completed_at: None,
            trace: Vec::new(),
            leadtimes: Vec::new(),
            has_defect,
            in_rework: false,
            rework_entered_at: None,
            defects: Vec::new(),
            is_part: false,
            part_type: None,
        });
        idx
    }

    pub fn create_part(&mut self, part_type: &str, model: String, now: SimTimeMs) -> ItemIdx {
        let n = self.parts_created.entry(part_type.to_string()).or_insert(0);
        *n += 1;
        self.next_sequence += 1;
        let idx = self.items.len();
        self.items.push(WorkItem {
            id: format!("PART-{part_type}-{n}"),
            sequence: self.next_sequence,
            model,
            colors: Vec::new(),
            created_at: now,
            completed_at: None,
            trace: Vec::new(),
            leadtimes: Vec::new(),
            has_defect: false,
            in_rework: false,
            rework_entered_at: None,
            defects: Vec::new(),
            is_part: true,
            part_type: Some(part_type.to_string()),
        });
        idx
    }

    // ── Movement bookkeeping ───────────────────────────────────────────

    /// Record a station entry: trace entry plus shop/line leadtime opens.
    pub fn enter_station(
        &mut self,
        idx: ItemIdx,
        shop: ShopIdx,
        line: LineIdx,
        station: StationIdx,
        now: SimTimeMs,
    ) {
        let item = &mut self.items[idx];
        item.trace.push(TraceEntry {
            station,
            enter: now,
            leave: None,
        });
        let has_open_shop = item
            .leadtimes
            .iter()
            .any(|l| l.shop == shop && l.line.is_none() && l.exited_at.is_none());
        if !has_open_shop {
            item.leadtimes.push(LeadtimeEntry {
                shop,
                line: None,
                entered_at: now,
                exited_at: None,
            });
        }
        let has_open_line = item
            .leadtimes
            .iter()
            .any(|l| l.line == Some(line) && l.exited_at.is_none());
        if !has_open_line {
            item.leadtimes.push(LeadtimeEntry {
                shop,
                line: Some(line),
                entered_at: now,
                exited_at: None,
            });
        }
    }

    /// Close the open trace entry when an item leaves its station.
    pub fn leave_station(&mut self, idx: ItemIdx, now: SimTimeMs) {
        if let Some(entry) = self.items[idx].trace.last_mut() {
            if entry.leave.is_none() {
                entry.leave = Some(now);
            }
        }
    }

    /// Close the line dwell interval. Counting is separate: a rework
    /// divert closes the interval without counting as production.
    pub fn close_line_leadtime(&mut self, idx: ItemIdx, line: LineIdx, now: SimTimeMs) {
        let item = &mut self.items[idx];
        if let Some(lt) = item
            .leadtimes
            .iter_mut()
            .find(|l| l.line == Some(line) && l.exited_at.is_none())
        {
            lt.exited_at = Some(now);
        }
    }

    pub fn close_shop_leadtime(&mut self, idx: ItemIdx, shop: ShopIdx, now: SimTimeMs) {
        let item = &mut self.items[idx];
        if let Some(lt) = item
            .leadtimes
            .iter_mut()
            .find(|l| l.shop == shop && l.line.is_none() && l.exited_at.is_none())
        {
            lt.exited_at = Some(now);
        }
    }

    pub fn bump_line(&mut self, line: LineIdx) {
        self.produced_by_line[line] += 1;
    }

    pub fn bump_shop(&mut self, shop: ShopIdx) {
        self.produced_by_shop[shop] += 1;
    }

    pub fn complete(&mut self, idx: ItemIdx, now: SimTimeMs) -> SimTimeMs {
        let item = &mut self.items[idx];
        item.completed_at = Some(now);
        self.completed_total += 1;
        if item.has_defect {
            self.defective_total += 1;
        }
        now - item.created_at
    }

    /// A consumed part reaches the end of its life; it does not count
    /// toward the completed-cars total.
    pub fn consume_part(&mut self, idx: ItemIdx, now: SimTimeMs) {
        self.items[idx].completed_at = Some(now);
    }

    // ── Rework ─────────────────────────────────────────────────────────

    pub fn enter_rework(&mut self, idx: ItemIdx, defect_id: String, now: SimTimeMs) {
        let item = &mut self.items[idx];
        item.defects.push(defect_id);
        item.in_rework = true;
        item.rework_entered_at = Some(now);
    }

    /// Rework repairs the defect; the car resumes the normal flow.
    pub fn leave_rework(&mut self, idx: ItemIdx) {
        let item = &mut self.items[idx];
        item.in_rework = false;
        item.has_defect = false;
    }

    // ── Shift counters ─────────────────────────────────────────────────

    pub fn produced_on_line(&self, line: LineIdx) -> u64 {
        self.produced_by_line[line]
    }

    pub fn produced_in_shop(&self, shop: ShopIdx) -> u64 {
        self.produced_by_shop[shop]
    }

    /// Shift-start reset of the per-line completed collection.
    pub fn reset_line_counter(&mut self, line: LineIdx) {
        self.produced_by_line[line] = 0;
    }

    pub fn reset_shop_counter(&mut self, shop: ShopIdx) {
        self.produced_by_shop[shop] = 0;
    }
}

//! Buffer registry - exclusive owner of every buffer's runtime contents.
//!
//! Buffers are bounded FIFO queues of item indices. Status is always
//! derived from the count: 0 = EMPTY, capacity = FULL, else AVAILABLE.
//! The static wiring (who feeds whom) lives in topology::BufferSpec;
//! this module owns only the queues.

use crate::{
    items::WorkItemStore,
    topology::PlantTopology,
    types::{BufferIdx, ItemIdx},
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BufferKind {
    #[serde(rename = "BUFFER")]
    Normal,
    #[serde(rename = "REWORK_BUFFER")]
    Rework,
    #[serde(rename = "PART_BUFFER")]
    Part,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BufferStatus {
    Empty,
    Available,
    Full,
}

#[derive(Debug, Clone)]
pub struct Buffer {
    pub id: String,
    pub kind: BufferKind,
    pub capacity: usize,
    items: VecDeque<ItemIdx>,
}

impl Buffer {
    pub fn status(&self) -> BufferStatus {
        if self.items.is_empty() {
            BufferStatus::Empty
        } else if self.items.len() >= self.capacity {
            BufferStatus::Full
        } else {
            BufferStatus::Available
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Append at the tail. Returns false when the buffer is FULL;
    /// the caller raises the matching propagation stop.
    pub fn push(&mut self, item: ItemIdx) -> bool {
        if self.is_full() {
            return false;
        }
        self.items.push_back(item);
        true
    }

    pub fn pop(&mut self) -> Option<ItemIdx> {
        self.items.pop_front()
    }

    pub fn front(&self) -> Option<ItemIdx> {
        self.items.front().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = ItemIdx> + '_ {
        self.items.iter().copied()
    }

    /// Remove the oldest item matching `model`. Used by parts matching.
    pub fn take_model(&mut self, store: &WorkItemStore, model: &str) -> Option<ItemIdx> {
        let pos = self.items.iter().position(|&i| store.get(i).model == model)?;
        self.items.remove(pos)
    }

    /// Distinct models currently present, in FIFO order.
    pub fn models<'a>(&self, store: &'a WorkItemStore) -> Vec<&'a str> {
        let mut seen: Vec<&str> = Vec::new();
        for &i in &self.items {
            let model = store.get(i).model.as_str();
            if !seen.contains(&model) {
                seen.push(model);
            }
        }
        seen
    }

    pub fn contains_model(&self, store: &WorkItemStore, model: &str) -> bool {
        self.items.iter().any(|&i| store.get(i).model == model)
    }
}

pub struct BufferRegistry {
    buffers: Vec<Buffer>,
}

impl BufferRegistry {
    pub fn from_topology(topo: &PlantTopology) -> Self {
        let buffers = topo
            .buffers
            .iter()
            .map(|spec| Buffer {
                id: spec.id.clone(),
                kind: spec.kind,
                capacity: spec.capacity,
                items: VecDeque::new(),
            })
            .collect();
        Self { buffers }
    }

    pub fn get(&self, idx: BufferIdx) -> &Buffer {
        &self.buffers[idx]
    }

    pub fn get_mut(&mut self, idx: BufferIdx) -> &mut Buffer {
        &mut self.buffers[idx]
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BufferIdx, &Buffer)> {
        self.buffers.iter().enumerate()
    }

    /// Drop all contents. Used by the engine's full memory reset.
    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.items.clear();
        }
    }

    /// Recovery: place an item into a buffer before start().
    pub fn restore(&mut self, idx: BufferIdx, item: ItemIdx) -> bool {
        self.buffers[idx].push(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(capacity: usize) -> Buffer {
        Buffer {
            id: "T".into(),
            kind: BufferKind::Normal,
            capacity,
            items: VecDeque::new(),
        }
    }

    #[test]
    fn status_tracks_count() {
        let mut b = buffer(2);
        assert_eq!(b.status(), BufferStatus::Empty);
        assert!(b.push(0));
        assert_eq!(b.status(), BufferStatus::Available);
        assert!(b.push(1));
        assert_eq!(b.status(), BufferStatus::Full);
        assert!(!b.push(2), "push into FULL buffer must fail");
        assert_eq!(b.pop(), Some(0), "FIFO order");
    }

    #[test]
    fn take_model_removes_oldest_match() {
        let mut store = WorkItemStore::new(1, 1);
        let a = store.create_part("X", "P19".into(), 0);
        let b = store.create_part("X", "P20".into(), 0);
        let c = store.create_part("X", "P20".into(), 0);
        let mut buf = buffer(5);
        buf.push(a);
        buf.push(b);
        buf.push(c);
        assert_eq!(buf.take_model(&store, "P20"), Some(b));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.models(&store), vec!["P19", "P20"]);
    }
}

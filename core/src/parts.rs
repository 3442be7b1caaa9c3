//! Parts matching - creation-time and consumption-time resolution of
//! required part types against part buffers.
//!
//! The matching discipline: a car model is viable only when a part of
//! that model is present in EVERY required part buffer simultaneously.
//! Candidate models are enumerated from the first buffer in FIFO order;
//! the first model present everywhere wins. Consumption is atomic: one
//! part leaves each buffer, or none do.

use crate::{
    buffers::BufferRegistry,
    items::WorkItemStore,
    topology::PlantTopology,
    types::{BufferIdx, ItemIdx, LineIdx},
};

/// A required part type resolved to its buffer, if one exists.
#[derive(Debug, Clone)]
pub struct ResolvedPart {
    pub part_type: String,
    pub buffer: Option<BufferIdx>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// A model is present in every required buffer.
    Matched { model: String },
    /// At least one buffer is empty or unresolved; LACK-{type} applies.
    Missing { types: Vec<String> },
    /// All buffers hold parts but no model is common to all of them.
    /// `any_full` selects the rework-divert fallback.
    NoMatch { any_full: bool },
}

/// Resolve each required type of a line to a part buffer: prefer the
/// shop-scoped "{shop}-PARTS-{type}" buffer, else any part buffer routed
/// to this line. An unresolvable type is a runtime topology gap: logged,
/// reported as missing, never fatal.
pub fn resolve(topo: &PlantTopology, line_idx: LineIdx) -> Vec<ResolvedPart> {
    let line = &topo.lines[line_idx];
    let shop_name = &topo.shops[line.shop].name;
    line.required_parts
        .iter()
        .map(|part_type| {
            let preferred_id = format!("{shop_name}-PARTS-{part_type}");
            let buffer = topo
                .buffers
                .iter()
                .position(|b| b.id == preferred_id)
                .or_else(|| {
                    topo.buffers.iter().position(|b| {
                        b.part_type.as_deref() == Some(part_type)
                            && b.to_lines.contains(&line_idx)
                    })
                });
            if buffer.is_none() {
                log::warn!(
                    "line {} requires part '{part_type}' but no part buffer resolves",
                    line.id
                );
            }
            ResolvedPart {
                part_type: part_type.clone(),
                buffer,
            }
        })
        .collect()
}

/// Find a model present in every required buffer (new-car creation).
pub fn match_any_model(
    resolved: &[ResolvedPart],
    buffers: &BufferRegistry,
    items: &WorkItemStore,
) -> MatchOutcome {
    let missing: Vec<String> = resolved
        .iter()
        .filter(|r| r.buffer.map_or(true, |b| buffers.get(b).is_empty()))
        .map(|r| r.part_type.clone())
        .collect();
    if !missing.is_empty() {
        return MatchOutcome::Missing { types: missing };
    }

    let first = resolved[0].buffer.unwrap();
    for model in buffers.get(first).models(items) {
        let everywhere = resolved[1..].iter().all(|r| {
            buffers
                .get(r.buffer.unwrap())
                .contains_model(items, model)
        });
        if everywhere {
            return MatchOutcome::Matched {
                model: model.to_string(),
            };
        }
    }
    MatchOutcome::NoMatch {
        any_full: resolved
            .iter()
            .any(|r| buffers.get(r.buffer.unwrap()).is_full()),
    }
}

/// Check a specific model (consumption for an already-built car).
pub fn match_model(
    resolved: &[ResolvedPart],
    buffers: &BufferRegistry,
    items: &WorkItemStore,
    model: &str,
) -> MatchOutcome {
    let missing: Vec<String> = resolved
        .iter()
        .filter(|r| {
            r.buffer
                .map_or(true, |b| !buffers.get(b).contains_model(items, model))
        })
        .map(|r| r.part_type.clone())
        .collect();
    if missing.is_empty() {
        return MatchOutcome::Matched {
            model: model.to_string(),
        };
    }
    // Distinguish "buffer starved" from "buffer full of the wrong models".
    let any_full = resolved
        .iter()
        .any(|r| r.buffer.is_some_and(|b| buffers.get(b).is_full()));
    let all_present_somewhere = resolved
        .iter()
        .all(|r| r.buffer.is_some_and(|b| !buffers.get(b).is_empty()));
    if all_present_somewhere && any_full {
        MatchOutcome::NoMatch { any_full }
    } else {
        MatchOutcome::Missing { types: missing }
    }
}

/// Remove one part of `model` from each resolved buffer. Callers only
/// invoke this after a successful match; a missing part at this point
/// would be a torn state, so the removal asserts.
pub fn consume(
    resolved: &[ResolvedPart],
    buffers: &mut BufferRegistry,
    items: &WorkItemStore,
    model: &str,
) -> Vec<(BufferIdx, ItemIdx)> {
    resolved
        .iter()
        .map(|r| {
            let buffer_idx = r.buffer.expect("consume() after successful match");
            let item = buffers
                .get_mut(buffer_idx)
                .take_model(items, model)
                .expect("matched model vanished from part buffer");
            (buffer_idx, item)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::PlantConfig, rng::RngBank};

    struct Fixture {
        topo: PlantTopology,
        buffers: BufferRegistry,
        items: WorkItemStore,
        car_line: LineIdx,
    }

    fn fixture() -> Fixture {
        let config = PlantConfig::parts_plant(60.0);
        let mut rng = RngBank::new(7);
        let topo = PlantTopology::build(&config, &mut rng).unwrap();
        let buffers = BufferRegistry::from_topology(&topo);
        let items = WorkItemStore::new(topo.lines.len(), topo.shops.len());
        let car_line = topo.lines.iter().position(|l| l.id == "TRIM-C1").unwrap();
        Fixture {
            topo,
            buffers,
            items,
            car_line,
        }
    }

    fn load(f: &mut Fixture, buffer_id: &str, part_type: &str, model: &str) {
        let idx = f.topo.buffer_index(buffer_id).unwrap();
        let item = f.items.create_part(part_type, model.into(), 0);
        assert!(f.buffers.get_mut(idx).push(item));
    }

    #[test]
    fn first_common_model_wins() {
        let mut f = fixture();
        load(&mut f, "TRIM-PARTS-X", "X", "P19");
        load(&mut f, "TRIM-PARTS-X", "X", "P20");
        load(&mut f, "TRIM-PARTS-Y", "Y", "P20");
        load(&mut f, "TRIM-PARTS-Y", "Y", "P35");

        let resolved = resolve(&f.topo, f.car_line);
        match match_any_model(&resolved, &f.buffers, &f.items) {
            MatchOutcome::Matched { model } => assert_eq!(model, "P20"),
            other => panic!("expected match, got {other:?}"),
        }

        let consumed = consume(&resolved, &mut f.buffers, &f.items, "P20");
        assert_eq!(consumed.len(), 2);
        let x = f.topo.buffer_index("TRIM-PARTS-X").unwrap();
        let y = f.topo.buffer_index("TRIM-PARTS-Y").unwrap();
        assert_eq!(f.buffers.get(x).len(), 1);
        assert_eq!(f.buffers.get(y).len(), 1);
    }

    #[test]
    fn empty_buffer_reports_missing_type() {
        let mut f = fixture();
        load(&mut f, "TRIM-PARTS-X", "X", "P19");
        let resolved = resolve(&f.topo, f.car_line);
        match match_any_model(&resolved, &f.buffers, &f.items) {
            MatchOutcome::Missing { types } => assert_eq!(types, vec!["Y".to_string()]),
            other => panic!("expected missing, got {other:?}"),
        }
    }

    #[test]
    fn disjoint_models_report_no_match() {
        let mut f = fixture();
        load(&mut f, "TRIM-PARTS-X", "X", "P19");
        load(&mut f, "TRIM-PARTS-Y", "Y", "P35");
        let resolved = resolve(&f.topo, f.car_line);
        match match_any_model(&resolved, &f.buffers, &f.items) {
            MatchOutcome::NoMatch { any_full } => assert!(!any_full),
            other => panic!("expected no-match, got {other:?}"),
        }
    }
}

//! plantsim-core: discrete-event simulation of a multi-shop vehicle plant.
//!
//! The engine advances a virtual clock in fixed ticks, moving work items
//! (cars and sub-assembly parts) through shops, lines, stations, buffers
//! and rework loops, inducing and propagating stoppages, and computing
//! production KPIs (OEE, MTTR, MTBF) per line, shop and shift.
//!
//! RULES:
//!   - One `SimEngine` per session. Sessions share no state.
//!   - All randomness flows through the `RngBank`.
//!   - All state changes are observable through the `EventSink`.
//!   - The per-tick pipeline order is fixed and documented in scheduler.rs.

pub mod buffers;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod items;
pub mod kpi;
pub mod parts;
pub mod rng;
pub mod scheduler;
pub mod snapshot;
pub mod stops;
pub mod store;
pub mod topology;
pub mod types;

//! SQLite persistence - an EventSink implementation.
//!
//! RULE: only store.rs talks to the database, and the engine never
//! learns whether a write succeeded. Every failure is absorbed here and
//! logged; persistence problems must not reach the simulation.

use crate::{
    error::SimResult,
    event::{EventSink, SimEvent},
    types::{SessionId, SimTimeMs, Tick},
};
use rusqlite::{params, Connection};

pub struct SqliteEventSink {
    conn: Connection,
    session_id: SessionId,
    /// Updated from tick-state events; stamps every row.
    tick: Tick,
    sim_time_ms: SimTimeMs,
}

impl SqliteEventSink {
    pub fn open(path: &str, session_id: &str) -> SimResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL only matters for real files; memory databases ignore it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Ok(Self {
            conn,
            session_id: session_id.to_string(),
            tick: 0,
            sim_time_ms: 0,
        })
    }

    /// In-memory database, used in tests.
    pub fn in_memory(session_id: &str) -> SimResult<Self> {
        let conn = Connection::open(":memory:")?;
        Ok(Self {
            conn,
            session_id: session_id.to_string(),
            tick: 0,
            sim_time_ms: 0,
        })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    pub fn insert_session(&self, seed: u64, version: &str) -> SimResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO session (session_id, seed, version, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![self.session_id, seed as i64, version, 0i64],
        )?;
        Ok(())
    }

    fn write(&mut self, event: &SimEvent) -> SimResult<()> {
        if let SimEvent::TickState {
            tick,
            simulated_time_ms,
            ..
        } = event
        {
            self.tick = *tick;
            self.sim_time_ms = *simulated_time_ms;
        }

        let payload = serde_json::to_string(event)?;
        self.conn.execute(
            "INSERT INTO event_log (session_id, tick, sim_time_ms, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                self.session_id,
                self.tick as i64,
                self.sim_time_ms,
                event.type_name(),
                payload
            ],
        )?;

        match event {
            SimEvent::PlantSnapshot { snapshot } => {
                self.conn.execute(
                    "INSERT INTO plant_snapshot (session_id, tick, sim_time_ms, payload)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        self.session_id,
                        snapshot.tick as i64,
                        snapshot.ts,
                        serde_json::to_string(snapshot)?
                    ],
                )?;
            }
            SimEvent::BuffersSnapshot { buffers, ts } => {
                self.conn.execute(
                    "INSERT INTO buffer_snapshot (session_id, sim_time_ms, payload)
                     VALUES (?1, ?2, ?3)",
                    params![self.session_id, ts, serde_json::to_string(buffers)?],
                )?;
            }
            SimEvent::StopStarted { stop, ts } | SimEvent::StopEnded { stop, ts } => {
                self.conn.execute(
                    "INSERT INTO stop_snapshot (session_id, sim_time_ms, stop_id, status, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        self.session_id,
                        ts,
                        stop.id as i64,
                        serde_json::to_string(&stop.status)?,
                        serde_json::to_string(stop)?
                    ],
                )?;
            }
            SimEvent::OeeCalculated { data } | SimEvent::OeeShiftEnd { data } => {
                self.conn.execute(
                    "INSERT INTO oee (session_id, sim_time_ms, scope, shop, line, shift_end, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        self.session_id,
                        data.ts,
                        serde_json::to_string(&data.scope)?,
                        data.shop,
                        data.line,
                        data.shift_end as i64,
                        serde_json::to_string(data)?
                    ],
                )?;
            }
            SimEvent::MttrMtbfCalculated { data } => {
                self.conn.execute(
                    "INSERT INTO mttr_mtbf (session_id, sim_time_ms, scope, shop, line, station, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        self.session_id,
                        data.ts,
                        serde_json::to_string(&data.scope)?,
                        data.shop,
                        data.line,
                        data.station,
                        serde_json::to_string(data)?
                    ],
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    // ── Read-back (replay tooling, summaries, tests) ───────────────────

    pub fn events_for_tick(&self, tick: Tick) -> SimResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_type, payload FROM event_log
             WHERE session_id=?1 AND tick=?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![self.session_id, tick as i64], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn event_count(&self) -> SimResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE session_id=?1",
            params![self.session_id],
            |r| r.get(0),
        )?)
    }

    pub fn count_of_type(&self, event_type: &str) -> SimResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE session_id=?1 AND event_type=?2",
            params![self.session_id, event_type],
            |r| r.get(0),
        )?)
    }
}

impl EventSink for SqliteEventSink {
    /// Fire-and-forget: failures are logged, never propagated.
    fn emit(&mut self, event: &SimEvent) {
        if let Err(e) = self.write(event) {
            log::warn!("event sink write failed: {e}");
        }
    }
}

use std::collections::BTreeMap;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use crate::engine::model::{Formula, Methodology, NetReductionEntry, Project};
use crate::engine::repository::ReductionRepository;
use crate::engine::series::DerivedUpdate;
use crate::engine::summary::{ClientSummaryDocument, LegacyClientSummary, PeriodKind, PeriodSummary};
use crate::error::{EngineError, EngineResult};

/// `ReductionRepository` backed by an embedded SQLite file, in the same
/// `Mutex<Connection>` + JSON-blob-column shape the teacher uses for its
/// config store. Document-shaped values (`Project`, `NetReductionEntry`,
/// summaries) round-trip through `serde_json`; indexed columns exist only
/// for the lookups the engine actually performs.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let repo = Self { conn: Mutex::new(conn) };
        repo.run_migrations()?;
        Ok(repo)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let repo = Self { conn: Mutex::new(conn) };
        repo.run_migrations()?;
        Ok(repo)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS projects (
                client_id    TEXT NOT NULL,
                project_id   TEXT PRIMARY KEY,
                is_deleted   INTEGER NOT NULL DEFAULT 0,
                doc          TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_projects_client ON projects(client_id);

            CREATE TABLE IF NOT EXISTS project_sequences (
                client_id TEXT PRIMARY KEY,
                next_seq  INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS formulas (
                id  TEXT PRIMARY KEY,
                doc TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entries (
                id           TEXT PRIMARY KEY,
                client_id    TEXT NOT NULL,
                project_id   TEXT NOT NULL,
                methodology  TEXT NOT NULL,
                timestamp    TEXT NOT NULL,
                is_deleted   INTEGER NOT NULL DEFAULT 0,
                doc          TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_entries_series
                ON entries(client_id, project_id, methodology);
            CREATE INDEX IF NOT EXISTS idx_entries_client_ts
                ON entries(client_id, timestamp);

            CREATE TABLE IF NOT EXISTS period_summaries (
                client_id TEXT NOT NULL,
                period    TEXT NOT NULL,
                doc       TEXT NOT NULL,
                PRIMARY KEY (client_id, period)
            );

            CREATE TABLE IF NOT EXISTS legacy_summaries (
                client_id TEXT PRIMARY KEY,
                doc       TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }
}

fn period_key(period: PeriodKind) -> &'static str {
    period.as_str()
}

impl ReductionRepository for SqliteRepository {
    fn load_project(&self, client_id: &str, project_id: &str) -> EngineResult<Project> {
        let conn = self.conn.lock().unwrap();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM projects WHERE client_id = ?1 AND project_id = ?2",
                params![client_id, project_id],
                |row| row.get(0),
            )
            .optional()?;
        let doc = doc.ok_or_else(|| EngineError::NotFound(format!("project {project_id}")))?;
        Ok(serde_json::from_str(&doc)?)
    }

    fn save_project(&self, project: &Project) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        let doc = serde_json::to_string(project)?;
        conn.execute(
            "INSERT INTO projects (client_id, project_id, is_deleted, doc) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project_id) DO UPDATE SET is_deleted = excluded.is_deleted, doc = excluded.doc",
            params![project.client_id, project.project_id, project.is_deleted as i64, doc],
        )?;
        Ok(())
    }

    fn list_projects_for_client(&self, client_id: &str) -> EngineResult<Vec<Project>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT doc FROM projects WHERE client_id = ?1 AND is_deleted = 0",
        )?;
        let rows = stmt
            .query_map(params![client_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter().map(|doc| Ok(serde_json::from_str(doc)?)).collect()
    }

    fn list_known_clients(&self) -> EngineResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT client_id FROM projects")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn next_project_sequence(&self, client_id: &str) -> EngineResult<u32> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO project_sequences (client_id, next_seq) VALUES (?1, 2)
             ON CONFLICT(client_id) DO UPDATE SET next_seq = next_seq + 1",
            params![client_id],
        )?;
        let seq: i64 = conn.query_row(
            "SELECT next_seq - 1 FROM project_sequences WHERE client_id = ?1",
            params![client_id],
            |row| row.get(0),
        )?;
        Ok(seq as u32)
    }

    fn load_formula(&self, formula_id: &str) -> EngineResult<Formula> {
        let conn = self.conn.lock().unwrap();
        let doc: Option<String> = conn
            .query_row("SELECT doc FROM formulas WHERE id = ?1", params![formula_id], |row| row.get(0))
            .optional()?;
        let doc = doc.ok_or_else(|| EngineError::FormulaNotFound(formula_id.to_string()))?;
        Ok(serde_json::from_str(&doc)?)
    }

    fn load_formulas(&self, ids: &[String]) -> EngineResult<BTreeMap<String, Formula>> {
        let mut out = BTreeMap::new();
        for id in ids {
            out.insert(id.clone(), self.load_formula(id)?);
        }
        Ok(out)
    }

    fn append_entry(&self, entry: &NetReductionEntry) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        let doc = serde_json::to_string(entry)?;
        conn.execute(
            "INSERT INTO entries (id, client_id, project_id, methodology, timestamp, is_deleted, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id,
                entry.client_id,
                entry.project_id,
                entry.methodology.as_str(),
                entry.timestamp.to_rfc3339(),
                entry.is_deleted as i64,
                doc,
            ],
        )?;
        Ok(())
    }

    fn load_entry(&self, client_id: &str, entry_id: &str) -> EngineResult<NetReductionEntry> {
        let conn = self.conn.lock().unwrap();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM entries WHERE client_id = ?1 AND id = ?2",
                params![client_id, entry_id],
                |row| row.get(0),
            )
            .optional()?;
        let doc = doc.ok_or_else(|| EngineError::NotFound(format!("entry {entry_id}")))?;
        Ok(serde_json::from_str(&doc)?)
    }

    fn replace_entry_payload(&self, entry: &NetReductionEntry) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        let doc = serde_json::to_string(entry)?;
        let count = conn.execute(
            "UPDATE entries SET doc = ?2 WHERE id = ?1",
            params![entry.id, doc],
        )?;
        if count == 0 {
            return Err(EngineError::NotFound(format!("entry {}", entry.id)));
        }
        Ok(())
    }

    fn soft_delete_entry(&self, client_id: &str, entry_id: &str) -> EngineResult<()> {
        let mut entry = self.load_entry(client_id, entry_id)?;
        entry.is_deleted = true;
        let conn = self.conn.lock().unwrap();
        let doc = serde_json::to_string(&entry)?;
        conn.execute(
            "UPDATE entries SET is_deleted = 1, doc = ?2 WHERE id = ?1",
            params![entry_id, doc],
        )?;
        Ok(())
    }

    fn list_series(
        &self,
        client_id: &str,
        project_id: &str,
        methodology: Methodology,
    ) -> EngineResult<Vec<NetReductionEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT doc FROM entries
             WHERE client_id = ?1 AND project_id = ?2 AND methodology = ?3 AND is_deleted = 0",
        )?;
        let rows = stmt
            .query_map(params![client_id, project_id, methodology.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter().map(|doc| Ok(serde_json::from_str(doc)?)).collect()
    }

    fn bulk_update_derived(
        &self,
        client_id: &str,
        project_id: &str,
        methodology: Methodology,
        updates: &[DerivedUpdate],
    ) -> EngineResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for update in updates {
            let doc: String = tx.query_row(
                "SELECT doc FROM entries
                 WHERE client_id = ?1 AND project_id = ?2 AND methodology = ?3 AND id = ?4",
                params![client_id, project_id, methodology.as_str(), update.entry_id],
                |row| row.get(0),
            )?;
            let mut entry: NetReductionEntry = serde_json::from_str(&doc)?;
            entry.cumulative_net_reduction = update.cumulative_net_reduction;
            entry.high_net_reduction = update.high_net_reduction;
            entry.low_net_reduction = update.low_net_reduction;
            let new_doc = serde_json::to_string(&entry)?;
            tx.execute("UPDATE entries SET doc = ?2 WHERE id = ?1", params![update.entry_id, new_doc])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list_entries_in_window(
        &self,
        client_id: &str,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
    ) -> EngineResult<Vec<NetReductionEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT doc FROM entries
             WHERE client_id = ?1 AND is_deleted = 0 AND timestamp >= ?2 AND timestamp <= ?3",
        )?;
        let rows = stmt
            .query_map(params![client_id, from.to_rfc3339(), to.to_rfc3339()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter().map(|doc| Ok(serde_json::from_str(doc)?)).collect()
    }

    fn list_entries_for_client(&self, client_id: &str) -> EngineResult<Vec<NetReductionEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT doc FROM entries WHERE client_id = ?1 AND is_deleted = 0")?;
        let rows = stmt
            .query_map(params![client_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter().map(|doc| Ok(serde_json::from_str(doc)?)).collect()
    }

    fn upsert_period_summary(
        &self,
        client_id: &str,
        period: PeriodKind,
        summary: &PeriodSummary,
    ) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        let doc = serde_json::to_string(summary)?;
        conn.execute(
            "INSERT INTO period_summaries (client_id, period, doc) VALUES (?1, ?2, ?3)
             ON CONFLICT(client_id, period) DO UPDATE SET doc = excluded.doc",
            params![client_id, period_key(period), doc],
        )?;
        Ok(())
    }

    fn load_client_summary(&self, client_id: &str) -> EngineResult<Option<ClientSummaryDocument>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT period, doc FROM period_summaries WHERE client_id = ?1")?;
        let rows: Vec<(String, String)> = stmt
            .query_map(params![client_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut periods = BTreeMap::new();
        for (period_str, doc) in rows {
            let period = PeriodKind::ALL
                .into_iter()
                .find(|p| p.as_str() == period_str)
                .ok_or_else(|| EngineError::Internal(format!("unknown period key {period_str}")))?;
            periods.insert(period, serde_json::from_str(&doc)?);
        }
        Ok(Some(ClientSummaryDocument {
            client_id: client_id.to_string(),
            periods,
            has_reduction_summary: true,
            last_reduction_summary_calculated_at: chrono::Utc::now(),
        }))
    }

    fn upsert_legacy_summary(&self, summary: &LegacyClientSummary) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        let doc = serde_json::to_string(summary)?;
        conn.execute(
            "INSERT INTO legacy_summaries (client_id, doc) VALUES (?1, ?2)
             ON CONFLICT(client_id) DO UPDATE SET doc = excluded.doc",
            params![summary.client_id, doc],
        )?;
        Ok(())
    }

    fn load_legacy_summary(&self, client_id: &str) -> EngineResult<Option<LegacyClientSummary>> {
        let conn = self.conn.lock().unwrap();
        let doc: Option<String> = conn
            .query_row("SELECT doc FROM legacy_summaries WHERE client_id = ?1", params![client_id], |row| row.get(0))
            .optional()?;
        doc.map(|d| Ok(serde_json::from_str(&d)?)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{InputType, Methodology, ProjectMetadata, EntryPayload, SourceDetails};

    fn project(client_id: &str, project_id: &str) -> Project {
        Project {
            client_id: client_id.to_string(),
            project_id: project_id.to_string(),
            methodology: Methodology::M1,
            metadata: ProjectMetadata {
                project_name: "Test".into(),
                category: None,
                scope: None,
                location_place: None,
                location_address: None,
                location_lat_lon: None,
            },
            m1: Default::default(),
            m2: Default::default(),
            m3: Default::default(),
            channel: Default::default(),
            is_deleted: false,
        }
    }

    #[test]
    fn save_and_load_project_round_trips() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let p = project("C1", "C1-RED-C1-0001");
        repo.save_project(&p).unwrap();
        let loaded = repo.load_project("C1", "C1-RED-C1-0001").unwrap();
        assert_eq!(loaded.project_id, "C1-RED-C1-0001");
    }

    #[test]
    fn missing_project_is_not_found() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let err = repo.load_project("C1", "nope").unwrap_err();
        matches!(err, EngineError::NotFound(_));
    }

    #[test]
    fn sequence_increments_per_client() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        assert_eq!(repo.next_project_sequence("C1").unwrap(), 1);
        assert_eq!(repo.next_project_sequence("C1").unwrap(), 2);
        assert_eq!(repo.next_project_sequence("C2").unwrap(), 1);
    }

    #[test]
    fn bulk_update_derived_persists_all_three_columns() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let entry = NetReductionEntry {
            id: "e1".into(),
            client_id: "C1".into(),
            project_id: "C1-RED-C1-0001".into(),
            methodology: Methodology::M1,
            input_type: InputType::Manual,
            original_input_type: "manual".into(),
            source: SourceDetails { uploaded_by: None, data_source: "manual".into(), api_endpoint: None, iot_device_id: None, file_name: None },
            date: "14/08/2025".into(),
            time: "11:00".into(),
            timestamp: chrono::Utc::now(),
            payload: EntryPayload::M1 { input_value: 10.0, emission_reduction_rate: 0.5 },
            net_reduction: 5.0,
            cumulative_net_reduction: 0.0,
            high_net_reduction: 0.0,
            low_net_reduction: 0.0,
            is_deleted: false,
        };
        repo.append_entry(&entry).unwrap();
        repo.bulk_update_derived(
            "C1",
            "C1-RED-C1-0001",
            Methodology::M1,
            &[DerivedUpdate { entry_id: "e1".into(), cumulative_net_reduction: 5.0, high_net_reduction: 5.0, low_net_reduction: 5.0 }],
        )
        .unwrap();
        let loaded = repo.load_entry("C1", "e1").unwrap();
        assert_eq!(loaded.cumulative_net_reduction, 5.0);
        assert_eq!(loaded.high_net_reduction, 5.0);
        assert_eq!(loaded.low_net_reduction, 5.0);
    }
}

use super::core::ActionLogRepository;
use crate::domain::action_log::ActionLog;
use crate::repository::error::RepositoryResult;
use crate::repository::row_mapping::{get_opt_json, get_ts};
use rusqlite::{params, Result as SqliteResult, Row};

const LOG_COLUMNS: &str = r#"action_id, factory_id, action_type, entity_type, entity_id,
    actor, action_ts, payload_json, detail"#;

impl ActionLogRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    /// 按 action_id 查询单个日志
    pub fn find_by_id(&self, action_id: &str) -> RepositoryResult<Option<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM action_log WHERE action_id = ?", LOG_COLUMNS);

        match conn.query_row(&sql, params![action_id], map_row) {
            Ok(log) => Ok(Some(log)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询工厂最近的操作日志
    pub fn list_recent(&self, factory_id: &str, limit: i64) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM action_log WHERE factory_id = ? ORDER BY action_ts DESC, rowid DESC LIMIT ?",
            LOG_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params![factory_id, limit], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(logs)
    }
}

fn map_row(row: &Row) -> SqliteResult<ActionLog> {
    Ok(ActionLog {
        action_id: row.get(0)?,
        factory_id: row.get(1)?,
        action_type: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        actor: row.get(5)?,
        action_ts: get_ts(row, 6)?,
        payload_json: get_opt_json(row, 7)?,
        detail: row.get(8)?,
    })
}

// ==========================================
// 工厂生产排程系统 - 产线与资源仓储
// ==========================================
// 表: production_line / line_capability / throughput_sample
//     line_downtime / material_stock / worker
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use crate::domain::line::{
    LineCapability, LineDowntime, LineProfile, MaterialStock, ProductionLine, ThroughputSample,
    Worker,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_mapping::{fmt_ts, get_ts};

// ==========================================
// LineRepository - 产线与资源仓储
// ==========================================
pub struct LineRepository {
    conn: Arc<Mutex<Connection>>,
}

impl LineRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 产线
    // ==========================================

    /// 新增或更新产线 (line_id 冲突时覆盖)
    pub fn upsert_line(&self, line: &ProductionLine) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO production_line (
                line_id, factory_id, line_name, throughput_per_hour, required_workers, status, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(line_id) DO UPDATE SET
                factory_id = excluded.factory_id,
                line_name = excluded.line_name,
                throughput_per_hour = excluded.throughput_per_hour,
                required_workers = excluded.required_workers,
                status = excluded.status,
                updated_at = excluded.updated_at"#,
            params![
                &line.line_id,
                &line.factory_id,
                &line.line_name,
                line.throughput_per_hour,
                line.required_workers,
                line.status,
                fmt_ts(&line.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_line(&self, line_id: &str) -> RepositoryResult<Option<ProductionLine>> {
        let conn = self.get_conn()?;
        match conn.query_row(
            r#"SELECT line_id, factory_id, line_name, throughput_per_hour, required_workers,
                      status, updated_at
               FROM production_line WHERE line_id = ?"#,
            params![line_id],
            Self::map_line,
        ) {
            Ok(l) => Ok(Some(l)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_lines(&self, factory_id: &str) -> RepositoryResult<Vec<ProductionLine>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT line_id, factory_id, line_name, throughput_per_hour, required_workers,
                      status, updated_at
               FROM production_line WHERE factory_id = ? ORDER BY line_id"#,
        )?;
        let lines = stmt
            .query_map(params![factory_id], Self::map_line)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    /// 登记过产线的全部工厂 (周期清扫的范围)
    pub fn list_factory_ids(&self) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT factory_id FROM production_line ORDER BY factory_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    // ==========================================
    // 专用产能
    // ==========================================

    pub fn set_capability(&self, cap: &LineCapability) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO line_capability (line_id, product_type_id, rate_per_hour)
               VALUES (?, ?, ?)
               ON CONFLICT(line_id, product_type_id) DO UPDATE SET rate_per_hour = excluded.rate_per_hour"#,
            params![&cap.line_id, &cap.product_type_id, cap.rate_per_hour],
        )?;
        Ok(())
    }

    pub fn list_capabilities(&self, line_id: &str) -> RepositoryResult<Vec<LineCapability>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT line_id, product_type_id, rate_per_hour FROM line_capability WHERE line_id = ? ORDER BY product_type_id",
        )?;
        let caps = stmt
            .query_map(params![line_id], |row| {
                Ok(LineCapability {
                    line_id: row.get(0)?,
                    product_type_id: row.get(1)?,
                    rate_per_hour: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(caps)
    }

    /// 工厂全部产线的产能画像
    pub fn list_profiles(&self, factory_id: &str) -> RepositoryResult<Vec<LineProfile>> {
        let lines = self.list_lines(factory_id)?;
        let mut profiles = Vec::with_capacity(lines.len());
        for line in lines {
            let capabilities = self.list_capabilities(&line.line_id)?;
            profiles.push(LineProfile { line, capabilities });
        }
        Ok(profiles)
    }

    pub fn find_profile(&self, line_id: &str) -> RepositoryResult<Option<LineProfile>> {
        match self.find_line(line_id)? {
            Some(line) => {
                let capabilities = self.list_capabilities(line_id)?;
                Ok(Some(LineProfile { line, capabilities }))
            }
            None => Ok(None),
        }
    }

    // ==========================================
    // 历史产出
    // ==========================================

    pub fn insert_sample(&self, sample: &ThroughputSample) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO throughput_sample (sample_id, line_id, product_type_id, quantity, hours, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                &sample.sample_id,
                &sample.line_id,
                &sample.product_type_id,
                sample.quantity,
                sample.hours,
                fmt_ts(&sample.recorded_at),
            ],
        )?;
        Ok(())
    }

    /// 最近的历史产出样本
    pub fn list_recent_samples(
        &self,
        line_id: &str,
        product_type_id: &str,
        limit: i64,
    ) -> RepositoryResult<Vec<ThroughputSample>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT sample_id, line_id, product_type_id, quantity, hours, recorded_at
               FROM throughput_sample
               WHERE line_id = ? AND product_type_id = ?
               ORDER BY recorded_at DESC LIMIT ?"#,
        )?;
        let samples = stmt
            .query_map(params![line_id, product_type_id, limit], |row| {
                Ok(ThroughputSample {
                    sample_id: row.get(0)?,
                    line_id: row.get(1)?,
                    product_type_id: row.get(2)?,
                    quantity: row.get(3)?,
                    hours: row.get(4)?,
                    recorded_at: get_ts(row, 5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    // ==========================================
    // 停机窗口
    // ==========================================

    pub fn insert_downtime(&self, downtime: &LineDowntime) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO line_downtime (downtime_id, line_id, start_time, end_time, reason)
               VALUES (?, ?, ?, ?, ?)"#,
            params![
                &downtime.downtime_id,
                &downtime.line_id,
                fmt_ts(&downtime.start_time),
                fmt_ts(&downtime.end_time),
                &downtime.reason,
            ],
        )?;
        Ok(())
    }

    /// 与 [from, to) 重叠的停机窗口
    pub fn list_downtime(
        &self,
        line_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> RepositoryResult<Vec<LineDowntime>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT downtime_id, line_id, start_time, end_time, reason
               FROM line_downtime
               WHERE line_id = ? AND start_time < ? AND end_time > ?
               ORDER BY start_time"#,
        )?;
        let rows = stmt
            .query_map(params![line_id, fmt_ts(&to), fmt_ts(&from)], |row| {
                Ok(LineDowntime {
                    downtime_id: row.get(0)?,
                    line_id: row.get(1)?,
                    start_time: get_ts(row, 2)?,
                    end_time: get_ts(row, 3)?,
                    reason: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ==========================================
    // 物料库存
    // ==========================================

    pub fn upsert_stock(&self, stock: &MaterialStock) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO material_stock (factory_id, product_type_id, available_quantity, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(factory_id, product_type_id) DO UPDATE SET
                   available_quantity = excluded.available_quantity,
                   updated_at = excluded.updated_at"#,
            params![
                &stock.factory_id,
                &stock.product_type_id,
                stock.available_quantity,
                fmt_ts(&stock.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_stock(
        &self,
        factory_id: &str,
        product_type_id: &str,
    ) -> RepositoryResult<Option<MaterialStock>> {
        let conn = self.get_conn()?;
        match conn.query_row(
            r#"SELECT factory_id, product_type_id, available_quantity, updated_at
               FROM material_stock WHERE factory_id = ? AND product_type_id = ?"#,
            params![factory_id, product_type_id],
            |row| {
                Ok(MaterialStock {
                    factory_id: row.get(0)?,
                    product_type_id: row.get(1)?,
                    available_quantity: row.get(2)?,
                    updated_at: get_ts(row, 3)?,
                })
            },
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ==========================================
    // 工人名册
    // ==========================================

    pub fn upsert_worker(&self, worker: &Worker) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO worker (worker_id, factory_id, worker_name, active)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(worker_id) DO UPDATE SET
                   factory_id = excluded.factory_id,
                   worker_name = excluded.worker_name,
                   active = excluded.active"#,
            params![&worker.worker_id, &worker.factory_id, &worker.worker_name, worker.active],
        )?;
        Ok(())
    }

    pub fn list_active_workers(&self, factory_id: &str) -> RepositoryResult<Vec<Worker>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT worker_id, factory_id, worker_name, active
               FROM worker WHERE factory_id = ? AND active = 1 ORDER BY worker_id"#,
        )?;
        let workers = stmt
            .query_map(params![factory_id], |row| {
                Ok(Worker {
                    worker_id: row.get(0)?,
                    factory_id: row.get(1)?,
                    worker_name: row.get(2)?,
                    active: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(workers)
    }

    fn map_line(row: &rusqlite::Row) -> rusqlite::Result<ProductionLine> {
        Ok(ProductionLine {
            line_id: row.get(0)?,
            factory_id: row.get(1)?,
            line_name: row.get(2)?,
            throughput_per_hour: row.get(3)?,
            required_workers: row.get(4)?,
            status: row.get(5)?,
            updated_at: get_ts(row, 6)?,
        })
    }
}

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params, params_from_iter};

use super::{QueryParam, QueryValue, StoredSwap, SwapStorage};
use crate::swap::SwapType;

const SELECT_COLUMNS: &str =
    "id, swap_type, state, version, initiator, payment_hash, created_at, data";

#[derive(Debug, Clone)]
pub struct SqliteSwapStorage {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteSwapStorage {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create swap store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().expect("sqlite mutex poisoned");
            f(&mut conn)
        })
        .await
        .context("join sqlite task")?
    }
}

#[async_trait]
impl SwapStorage for SqliteSwapStorage {
    async fn save(&self, swap: &StoredSwap) -> Result<()> {
        let swap = swap.clone();
        self.with_conn(move |conn| upsert(conn, &swap)).await
    }

    async fn save_all(&self, swaps: &[StoredSwap]) -> Result<()> {
        let swaps = swaps.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().context("begin save_all")?;
            for swap in &swaps {
                upsert(&tx, swap)?;
            }
            tx.commit().context("commit save_all")
        })
        .await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let id = id.to_owned();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM swaps WHERE id = ?1", params![id])
                .with_context(|| format!("remove swap {id}"))?;
            Ok(())
        })
        .await
    }

    async fn remove_all(&self, ids: &[String]) -> Result<()> {
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().context("begin remove_all")?;
            for id in &ids {
                tx.execute("DELETE FROM swaps WHERE id = ?1", params![id])
                    .with_context(|| format!("remove swap {id}"))?;
            }
            tx.commit().context("commit remove_all")
        })
        .await
    }

    async fn query(&self, groups: &[Vec<QueryParam>]) -> Result<Vec<StoredSwap>> {
        let (clause, values) = where_clause(groups);
        self.with_conn(move |conn| {
            let sql = format!("SELECT {SELECT_COLUMNS} FROM swaps{clause} ORDER BY created_at, id");
            let mut stmt = conn.prepare(&sql).context("prepare swap query")?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), stored_from_row)
                .context("query swaps")?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.context("read swap row")?);
            }
            Ok(out)
        })
        .await
    }
}

fn upsert(conn: &Connection, swap: &StoredSwap) -> Result<()> {
    let data = serde_json::to_string(&swap.data)
        .with_context(|| format!("encode swap {}", swap.id))?;
    conn.execute(
        r#"
INSERT INTO swaps (
  id,
  swap_type,
  state,
  version,
  initiator,
  payment_hash,
  created_at,
  data
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
)
ON CONFLICT(id) DO UPDATE SET
  swap_type = excluded.swap_type,
  state = excluded.state,
  version = excluded.version,
  initiator = excluded.initiator,
  payment_hash = excluded.payment_hash,
  data = excluded.data
"#,
        params![
            &swap.id,
            swap.swap_type.as_str(),
            swap.state,
            swap.version,
            &swap.initiator,
            &swap.payment_hash,
            i64::try_from(swap.created_at).context("created_at out of range")?,
            data,
        ],
    )
    .with_context(|| format!("save swap {}", swap.id))?;
    Ok(())
}

fn where_clause(groups: &[Vec<QueryParam>]) -> (String, Vec<Value>) {
    if groups.is_empty() {
        return (String::new(), Vec::new());
    }

    let mut values = Vec::new();
    let mut ors = Vec::with_capacity(groups.len());
    for group in groups {
        if group.is_empty() {
            return (String::new(), Vec::new());
        }
        let mut ands = Vec::with_capacity(group.len());
        for param in group {
            if param.values.is_empty() {
                ands.push("0".to_owned());
                continue;
            }
            let placeholders = vec!["?"; param.values.len()].join(", ");
            ands.push(format!("{} IN ({placeholders})", param.field.column()));
            values.extend(param.values.iter().map(|v| match v {
                QueryValue::Text(s) => Value::Text(s.clone()),
                QueryValue::Int(i) => Value::Integer(*i),
            }));
        }
        ors.push(format!("({})", ands.join(" AND ")));
    }

    (format!(" WHERE {}", ors.join(" OR ")), values)
}

fn stored_from_row(row: &Row<'_>) -> rusqlite::Result<StoredSwap> {
    let swap_type_str: String = row.get(1)?;
    let version: i64 = row.get(3)?;
    let created_at: i64 = row.get(6)?;
    let data_str: String = row.get(7)?;

    let swap_type = swap_type_str.parse::<SwapType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
    })?;
    let data = serde_json::from_str(&data_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(StoredSwap {
        id: row.get(0)?,
        swap_type,
        state: row.get(2)?,
        version: u32::try_from(version).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Integer,
                format!("invalid version {version}").into(),
            )
        })?,
        initiator: row.get(4)?,
        payment_hash: row.get(5)?,
        created_at: u64::try_from(created_at).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Integer,
                format!("invalid created_at {created_at}").into(),
            )
        })?,
        data,
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  id TEXT PRIMARY KEY,
  swap_type TEXT NOT NULL,
  state INTEGER NOT NULL,
  version INTEGER NOT NULL,
  initiator TEXT NOT NULL,
  payment_hash TEXT,
  created_at INTEGER NOT NULL,
  data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS swaps_type_idx ON swaps(swap_type);
CREATE INDEX IF NOT EXISTS swaps_initiator_idx ON swaps(initiator);
CREATE INDEX IF NOT EXISTS swaps_type_state_idx ON swaps(swap_type, state);
CREATE INDEX IF NOT EXISTS swaps_type_payment_hash_idx ON swaps(swap_type, payment_hash);
"#,
    )
    .context("create tables")?;
    Ok(())
}

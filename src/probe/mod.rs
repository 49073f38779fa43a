//! Typed SQL probes
//!
//! Thin, pure functions over the driver seam. Each probe issues exactly one
//! statement and types the text result; none of them ever mutates a node.
//! LSNs cross this layer only as opaque strings. The single piece of LSN
//! arithmetic in the system is `wal_gap`, computed by PostgreSQL itself via
//! `pg_wal_lsn_diff` on a live primary.

use std::time::Duration;

use crate::driver::{NodeDriver, SqlError, SqlTarget};

/// A peer row from `pg_stat_replication` on a primary.
#[derive(Debug, Clone)]
pub struct ReplicationPeer {
    pub client_addr: Option<String>,
    pub state: Option<String>,
    pub sync_state: Option<String>,
    pub write_lag: Option<String>,
    pub flush_lag: Option<String>,
    pub replay_lag: Option<String>,
}

/// A row from `pg_replication_slots`.
#[derive(Debug, Clone)]
pub struct ReplicationSlot {
    pub slot_name: String,
    pub active: bool,
    pub restart_lsn: Option<String>,
}

/// Whether the node is writable. Primary = not in recovery.
pub async fn is_primary(
    driver: &dyn NodeDriver,
    target: &SqlTarget,
    deadline: Duration,
) -> Result<bool, SqlError> {
    let rows = driver
        .sql(target, "SELECT pg_is_in_recovery()", deadline)
        .await?;
    let in_recovery = single_value(&rows)?;
    parse_bool(&in_recovery).map(|recovering| !recovering)
}

/// Last WAL position written by a primary.
pub async fn current_lsn(
    driver: &dyn NodeDriver,
    target: &SqlTarget,
    deadline: Duration,
) -> Result<String, SqlError> {
    let rows = driver
        .sql(target, "SELECT pg_current_wal_lsn()", deadline)
        .await?;
    single_value(&rows)
}

/// Last WAL position received by a standby. `None` when the node has never
/// streamed (a freshly initialized server reports NULL).
pub async fn receive_lsn(
    driver: &dyn NodeDriver,
    target: &SqlTarget,
    deadline: Duration,
) -> Result<Option<String>, SqlError> {
    let rows = driver
        .sql(target, "SELECT pg_last_wal_receive_lsn()", deadline)
        .await?;
    single_optional(&rows)
}

/// Last WAL position replayed by a standby.
pub async fn replay_lsn(
    driver: &dyn NodeDriver,
    target: &SqlTarget,
    deadline: Duration,
) -> Result<Option<String>, SqlError> {
    let rows = driver
        .sql(target, "SELECT pg_last_wal_replay_lsn()", deadline)
        .await?;
    single_optional(&rows)
}

/// Streaming peers attached to a primary.
pub async fn replication_peers(
    driver: &dyn NodeDriver,
    target: &SqlTarget,
    deadline: Duration,
) -> Result<Vec<ReplicationPeer>, SqlError> {
    let rows = driver
        .sql(
            target,
            "SELECT client_addr, state, sync_state, write_lag, flush_lag, replay_lag \
             FROM pg_stat_replication",
            deadline,
        )
        .await?;
    rows.iter()
        .map(|row| {
            if row.len() < 6 {
                return Err(SqlError::other("XX000", "short pg_stat_replication row"));
            }
            Ok(ReplicationPeer {
                client_addr: row[0].clone(),
                state: row[1].clone(),
                sync_state: row[2].clone(),
                write_lag: row[3].clone(),
                flush_lag: row[4].clone(),
                replay_lag: row[5].clone(),
            })
        })
        .collect()
}

/// Replication slots present on a node.
pub async fn replication_slots(
    driver: &dyn NodeDriver,
    target: &SqlTarget,
    deadline: Duration,
) -> Result<Vec<ReplicationSlot>, SqlError> {
    let rows = driver
        .sql(
            target,
            "SELECT slot_name, active, restart_lsn FROM pg_replication_slots",
            deadline,
        )
        .await?;
    rows.iter()
        .map(|row| {
            if row.len() < 3 {
                return Err(SqlError::other("XX000", "short pg_replication_slots row"));
            }
            let slot_name = row[0]
                .clone()
                .ok_or_else(|| SqlError::other("XX000", "NULL slot_name"))?;
            let active = parse_bool(row[1].as_deref().unwrap_or("f"))?;
            Ok(ReplicationSlot {
                slot_name,
                active,
                restart_lsn: row[2].clone(),
            })
        })
        .collect()
}

/// Gap between the primary's current write position and a standby's receive
/// position, in bytes, computed on the primary in one statement so both
/// values come from the same instant. Positive = the standby is behind.
///
/// Returns `(primary_lsn, gap_bytes)`.
pub async fn wal_gap(
    driver: &dyn NodeDriver,
    primary: &SqlTarget,
    receive_lsn: &str,
    deadline: Duration,
) -> Result<(String, i64), SqlError> {
    if !is_lsn(receive_lsn) {
        return Err(SqlError::other(
            "22P02",
            format!("malformed LSN {:?}", receive_lsn),
        ));
    }
    let statement = format!(
        "SELECT pg_current_wal_lsn(), \
         pg_wal_lsn_diff(pg_current_wal_lsn(), '{}')::bigint",
        receive_lsn
    );
    let rows = driver.sql(primary, &statement, deadline).await?;
    let row = rows
        .first()
        .ok_or_else(|| SqlError::other("XX000", "empty result"))?;
    if row.len() < 2 {
        return Err(SqlError::other("XX000", "short wal gap row"));
    }
    let primary_lsn = row[0]
        .clone()
        .ok_or_else(|| SqlError::other("XX000", "NULL pg_current_wal_lsn"))?;
    let gap = row[1]
        .as_deref()
        .ok_or_else(|| SqlError::other("XX000", "NULL pg_wal_lsn_diff"))?
        .parse::<i64>()
        .map_err(|e| SqlError::other("22P02", e.to_string()))?;
    Ok((primary_lsn, gap))
}

/// LSN sentinel used when a standby has never received any WAL; maximally
/// behind every real position.
pub const ZERO_LSN: &str = "0/0";

/// Shape check before an LSN is spliced into a statement.
pub fn is_lsn(s: &str) -> bool {
    let mut parts = s.splitn(2, '/');
    let (hi, lo) = match (parts.next(), parts.next()) {
        (Some(hi), Some(lo)) => (hi, lo),
        _ => return false,
    };
    !hi.is_empty()
        && !lo.is_empty()
        && hi.chars().all(|c| c.is_ascii_hexdigit())
        && lo.chars().all(|c| c.is_ascii_hexdigit())
}

fn single_value(rows: &[Vec<Option<String>>]) -> Result<String, SqlError> {
    single_optional(rows)?.ok_or_else(|| SqlError::other("XX000", "unexpected NULL"))
}

fn single_optional(rows: &[Vec<Option<String>>]) -> Result<Option<String>, SqlError> {
    let row = rows
        .first()
        .ok_or_else(|| SqlError::other("XX000", "empty result"))?;
    let value = row
        .first()
        .ok_or_else(|| SqlError::other("XX000", "empty row"))?;
    Ok(value.clone())
}

fn parse_bool(s: &str) -> Result<bool, SqlError> {
    match s {
        "t" | "true" => Ok(true),
        "f" | "false" => Ok(false),
        other => Err(SqlError::other(
            "22P02",
            format!("expected boolean, got {:?}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ExecError, ExecOutput, SqlRow};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Driver returning canned rows per statement prefix.
    struct CannedDriver {
        responses: Mutex<HashMap<&'static str, Result<Vec<SqlRow>, SqlError>>>,
    }

    impl CannedDriver {
        fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
            }
        }

        fn respond(self, prefix: &'static str, rows: Vec<SqlRow>) -> Self {
            self.responses.lock().unwrap().insert(prefix, Ok(rows));
            self
        }
    }

    #[async_trait]
    impl NodeDriver for CannedDriver {
        async fn exec(
            &self,
            _container: &str,
            _argv: &[String],
            _deadline: Duration,
        ) -> Result<ExecOutput, ExecError> {
            unreachable!("probes never exec");
        }

        async fn sql(
            &self,
            _target: &SqlTarget,
            statement: &str,
            _deadline: Duration,
        ) -> Result<Vec<SqlRow>, SqlError> {
            let responses = self.responses.lock().unwrap();
            for (prefix, response) in responses.iter() {
                if statement.starts_with(prefix) {
                    return response.clone();
                }
            }
            Err(SqlError::other("42601", format!("unexpected: {}", statement)))
        }
    }

    fn target() -> SqlTarget {
        SqlTarget::new("db", 5432)
    }

    const DEADLINE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_is_primary_inverts_recovery() {
        let driver = CannedDriver::new()
            .respond("SELECT pg_is_in_recovery", vec![vec![Some("f".to_string())]]);
        assert!(is_primary(&driver, &target(), DEADLINE).await.unwrap());

        let driver = CannedDriver::new()
            .respond("SELECT pg_is_in_recovery", vec![vec![Some("t".to_string())]]);
        assert!(!is_primary(&driver, &target(), DEADLINE).await.unwrap());
    }

    #[tokio::test]
    async fn test_receive_lsn_null_maps_to_none() {
        let driver =
            CannedDriver::new().respond("SELECT pg_last_wal_receive_lsn", vec![vec![None]]);
        let lsn = receive_lsn(&driver, &target(), DEADLINE).await.unwrap();
        assert_eq!(lsn, None);
    }

    #[tokio::test]
    async fn test_wal_gap_parses_signed_bytes() {
        let driver = CannedDriver::new().respond(
            "SELECT pg_current_wal_lsn(), pg_wal_lsn_diff",
            vec![vec![Some("0/5000060".to_string()), Some("-16".to_string())]],
        );
        let (lsn, gap) = wal_gap(&driver, &target(), "0/5000070", DEADLINE)
            .await
            .unwrap();
        assert_eq!(lsn, "0/5000060");
        assert_eq!(gap, -16);
    }

    #[tokio::test]
    async fn test_wal_gap_rejects_malformed_lsn() {
        let driver = CannedDriver::new();
        let result = wal_gap(&driver, &target(), "'; DROP TABLE x; --", DEADLINE).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_is_lsn() {
        assert!(is_lsn("0/0"));
        assert!(is_lsn("A1/FF00BEEF"));
        assert!(!is_lsn("A1"));
        assert!(!is_lsn("A1/"));
        assert!(!is_lsn("g1/00"));
        assert!(!is_lsn("0/0' OR 1=1"));
    }

    #[tokio::test]
    async fn test_replication_slots_typed() {
        let driver = CannedDriver::new().respond(
            "SELECT slot_name",
            vec![vec![
                Some("standby_slot".to_string()),
                Some("t".to_string()),
                Some("0/4000000".to_string()),
            ]],
        );
        let slots = replication_slots(&driver, &target(), DEADLINE).await.unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].slot_name, "standby_slot");
        assert!(slots[0].active);
    }
}

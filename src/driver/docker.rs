//! Docker-backed driver
//!
//! Exec runs `docker exec <container> <argv…>`; SQL opens a fresh
//! tokio-postgres session per statement using the process-wide credentials.
//! An exec whose deadline fires is abandoned, not killed: the child keeps
//! running in the container and its eventual result is ignored.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, SimpleQueryMessage};

use super::{ExecError, ExecOutput, NodeDriver, SqlError, SqlRow, SqlTarget};
use crate::config::Credentials;

/// Docker exit codes that mean "the container itself is the problem".
const DOCKER_DAEMON_ERROR: i32 = 125;
const DOCKER_EXEC_FAILED: i32 = 126;

pub struct DockerDriver {
    credentials: Credentials,
}

impl DockerDriver {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    fn classify_sql_error(err: tokio_postgres::Error) -> SqlError {
        if let Some(db) = err.as_db_error() {
            let code = db.code();
            return if code == &SqlState::INVALID_PASSWORD
                || code == &SqlState::INVALID_AUTHORIZATION_SPECIFICATION
            {
                SqlError::AuthFailed
            } else if code == &SqlState::READ_ONLY_SQL_TRANSACTION {
                SqlError::ReadOnly
            } else {
                SqlError::other(code.code(), db.message())
            };
        }

        if let Some(io) = find_io_source(&err) {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return SqlError::ConnRefused;
            }
        }
        let rendered = err.to_string();
        if rendered.to_ascii_lowercase().contains("connection refused") {
            return SqlError::ConnRefused;
        }
        SqlError::other("XX000", rendered)
    }
}

/// Walk the error chain looking for an io::Error.
fn find_io_source<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a std::io::Error> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(io);
        }
        source = cause.source();
    }
    None
}

#[async_trait]
impl NodeDriver for DockerDriver {
    async fn exec(
        &self,
        container: &str,
        argv: &[String],
        deadline: Duration,
    ) -> Result<ExecOutput, ExecError> {
        let mut command = Command::new("docker");
        command.arg("exec").arg(container).args(argv);
        // Abandoned steps keep running in the container.
        command.kill_on_drop(false);

        let output = timeout(deadline, command.output())
            .await
            .map_err(|_| ExecError::Deadline(deadline))?
            .map_err(|io| ExecError::Unreachable {
                container: container.to_string(),
                detail: io.to_string(),
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        // `docker exec` reports a missing or stopped container through its
        // own exit codes, not through a spawn failure.
        if exit_code == DOCKER_DAEMON_ERROR
            || exit_code == DOCKER_EXEC_FAILED
            || stderr.contains("No such container")
            || stderr.contains("is not running")
        {
            return Err(ExecError::Unreachable {
                container: container.to_string(),
                detail: stderr.trim().to_string(),
            });
        }

        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    async fn sql(
        &self,
        target: &SqlTarget,
        statement: &str,
        deadline: Duration,
    ) -> Result<Vec<SqlRow>, SqlError> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&target.host)
            .port(target.port)
            .user(&self.credentials.user)
            .password(&self.credentials.password)
            .dbname(&self.credentials.database)
            .connect_timeout(deadline);

        let (client, connection) = timeout(deadline, pg_config.connect(NoTls))
            .await
            .map_err(|_| SqlError::Timeout)?
            .map_err(Self::classify_sql_error)?;

        // The connection future drives the socket; it ends when the client
        // is dropped at the bottom of this call.
        let io_task = tokio::spawn(connection);

        let result = timeout(deadline, client.simple_query(statement))
            .await
            .map_err(|_| SqlError::Timeout)?
            .map_err(Self::classify_sql_error);

        drop(client);
        io_task.abort();

        let messages = result?;
        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let values: SqlRow = (0..row.len())
                    .map(|idx| row.get(idx).map(str::to_string))
                    .collect();
                rows.push(values);
            }
        }
        Ok(rows)
    }
}

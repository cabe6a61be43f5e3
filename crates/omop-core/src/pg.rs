//! PostgreSQL session over the synchronous `postgres` client.

use postgres::{Client, Config, NoTls, SimpleQueryMessage};
use tracing::{debug, trace};

use crate::connection::ConnectionConfig;
use crate::session::{Row, Session, SessionError};
use crate::sql::{clean_sql, quote_ident};

pub struct PostgresSession {
    client: Client,
}

impl PostgresSession {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn connect(config: &ConnectionConfig) -> Result<Self, SessionError> {
        let mut pg = Config::new();
        pg.host(&config.server)
            .port(config.port)
            .dbname(&config.dbname)
            .user(&config.user)
            .password(&config.password)
            .application_name("omop-etl");
        let client = pg.connect(NoTls).map_err(|source| SessionError::Connect {
            target: config.target(),
            source,
        })?;
        debug!(target_db = %config.target(), "connected");
        let mut session = Self::new(client);
        if let Some(schema) = &config.schema {
            session.execute(&format!("SET search_path TO {}, public", quote_ident(schema)))?;
        }
        Ok(session)
    }

    fn run(&mut self, sql: &str) -> Result<Vec<SimpleQueryMessage>, SessionError> {
        let sql = clean_sql(sql);
        trace!(%sql, "executing");
        self.client
            .simple_query(&sql)
            .map_err(|source| SessionError::Database { sql, source })
    }
}

impl Session for PostgresSession {
    fn execute(&mut self, sql: &str) -> Result<u64, SessionError> {
        let affected = self
            .run(sql)?
            .iter()
            .map(|message| match message {
                SimpleQueryMessage::CommandComplete(rows) => *rows,
                _ => 0,
            })
            .sum();
        Ok(affected)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, SessionError> {
        let rows = self
            .run(sql)?
            .into_iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => {
                    let columns = row
                        .columns()
                        .iter()
                        .map(|column| column.name().to_string())
                        .collect::<Vec<_>>();
                    let values = (0..columns.len())
                        .map(|idx| row.get(idx).map(str::to_string))
                        .collect();
                    Some(Row::new(columns, values))
                }
                _ => None,
            })
            .collect();
        Ok(rows)
    }
}

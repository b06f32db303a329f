//! Initialization-time source: dedicated clients, no pool.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_postgres::Client;
use tracing::{debug, info};

use super::tls::TlsBuilder;
use super::{ConnectionSource, DbConn};
use crate::config::{Credentials, DatabaseConfig};
use crate::error::{RecordStoreError, Result};

/// One dedicated client per privilege tier. A borrow locks its client until
/// the [`DbConn`] is dropped, so concurrent borrowers of a tier wait in turn.
pub struct BootstrapSource {
    privileged: Arc<Mutex<Client>>,
    unprivileged: Option<Arc<Mutex<Client>>>,
    database: String,
}

impl BootstrapSource {
    /// Connect as `privileged` to `dbname`, and optionally as a second role
    /// for unprivileged borrows. Without one, unprivileged borrows reuse the
    /// privileged client.
    pub async fn connect(
        db: &DatabaseConfig,
        dbname: &str,
        privileged: &Credentials,
        unprivileged: Option<&Credentials>,
    ) -> Result<Self> {
        let tls = TlsBuilder::parse(&db.ssl_mode)?;

        let client = tls.connect(&db.pg_config(dbname, privileged)).await?;
        client.simple_query("SELECT 1").await?;

        let secondary = match unprivileged {
            Some(creds) => Some(Arc::new(Mutex::new(
                tls.connect(&db.pg_config(dbname, creds)).await?,
            ))),
            None => None,
        };

        info!(
            "Opened bootstrap connection to {}:{}/{} as {}",
            db.host, db.port, dbname, privileged.name
        );

        Ok(Self {
            privileged: Arc::new(Mutex::new(client)),
            unprivileged: secondary,
            database: dbname.to_string(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

#[async_trait]
impl ConnectionSource for BootstrapSource {
    async fn acquire(&self, privileged: bool) -> Result<DbConn> {
        let client = match (&self.unprivileged, privileged) {
            (Some(user), false) => user,
            _ => &self.privileged,
        };
        let client = Arc::clone(client).lock_owned().await;
        if client.is_closed() {
            return Err(RecordStoreError::pool(
                "dedicated connection is closed",
                format!("bootstrap connection to {}", self.database),
            ));
        }
        Ok(DbConn::Dedicated(client))
    }

    fn mode(&self) -> &'static str {
        "bootstrap"
    }

    fn close(&self) {
        debug!("Releasing bootstrap connections to {}", self.database);
    }
}

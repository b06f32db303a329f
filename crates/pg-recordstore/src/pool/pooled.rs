//! Steady-state source backed by two deadpool-postgres pools.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tracing::{info, warn};

use super::tls::TlsBuilder;
use super::{ConnectionSource, DbConn};
use crate::config::{Config, Credentials};
use crate::error::{RecordStoreError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// User pool for ordinary calls, admin pool for privileged ones. The two are
/// sized independently.
pub struct PooledSource {
    user: Pool,
    admin: Pool,
    database: String,
}

impl PooledSource {
    /// Build both pools for `config.database.name` and check that the admin
    /// role can connect.
    pub async fn connect(config: &Config) -> Result<Self> {
        let tls = TlsBuilder::parse(&config.database.ssl_mode)?;

        let user = build_pool(config, &config.user, config.pools.user_connections, &tls)?;
        let admin = build_pool(config, &config.admin, config.pools.admin_connections, &tls)?;

        let probe = admin
            .get()
            .await
            .map_err(|e| RecordStoreError::pool(e, "testing admin connection"))?;
        probe.simple_query("SELECT 1").await?;
        drop(probe);

        info!(
            "Connected to PostgreSQL: {}:{}/{} (user pool {}, admin pool {})",
            config.database.host,
            config.database.port,
            config.database.name,
            config.pools.user_connections,
            config.pools.admin_connections
        );

        Ok(Self {
            user,
            admin,
            database: config.database.name.clone(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

fn build_pool(
    config: &Config,
    creds: &Credentials,
    max_size: usize,
    tls: &TlsBuilder,
) -> Result<Pool> {
    let mut pg_config = config.database.pg_config(&config.database.name, creds);
    pg_config.keepalives(true);
    pg_config.keepalives_idle(Duration::from_secs(30));
    pg_config.connect_timeout(CONNECT_TIMEOUT);

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let mgr = match tls.build()? {
        Some(connector) => Manager::from_config(pg_config, connector, mgr_config),
        None => {
            warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
            Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
        }
    };

    Pool::builder(mgr)
        .max_size(max_size)
        .build()
        .map_err(|e| RecordStoreError::pool(e, format!("creating pool for role {}", creds.name)))
}

#[async_trait]
impl ConnectionSource for PooledSource {
    async fn acquire(&self, privileged: bool) -> Result<DbConn> {
        let (pool, tier) = if privileged {
            (&self.admin, "admin")
        } else {
            (&self.user, "user")
        };
        pool.get()
            .await
            .map(DbConn::Pooled)
            .map_err(|e| RecordStoreError::pool(e, format!("getting {} connection", tier)))
    }

    fn mode(&self) -> &'static str {
        "pooled"
    }

    fn close(&self) {
        self.user.close();
        self.admin.close();
        info!("Closed connection pools for {}", self.database);
    }
}

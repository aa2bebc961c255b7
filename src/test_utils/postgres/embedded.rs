use postgresql_embedded::PostgreSQL;
use tokio_postgres::NoTls;

use super::super::SHARED_RUNTIME;
use crate::config::{StoreConfig, StoreConfigBuilder};

/// A running embedded `PostgreSQL` instance with one freshly created database.
pub struct EmbeddedPostgres {
    pub postgresql: PostgreSQL,
    pub port: u16,
    pub database_url: String,
}

impl EmbeddedPostgres {
    /// Builder pointed at the embedded database.
    #[must_use]
    pub fn store_config(&self) -> StoreConfigBuilder {
        StoreConfig::postgres_builder(self.database_url.clone())
    }
}

/// Set up an embedded `PostgreSQL` instance and create `db_name` in it.
///
/// # Errors
/// Returns an error if the server cannot be set up or started, if the database cannot be
/// created, or if the post-start connectivity check fails.
pub fn setup_postgres_embedded(
    db_name: &str,
) -> Result<EmbeddedPostgres, Box<dyn std::error::Error>> {
    SHARED_RUNTIME.block_on(async {
        let mut postgresql = PostgreSQL::default();
        postgresql.setup().await?;
        postgresql.start().await?;

        let settings = postgresql.settings();
        let port = settings.port;
        let database_url = format!(
            "postgres://{}:{}@{}:{port}/{db_name}",
            settings.username, settings.password, settings.host
        );
        postgresql.create_database(db_name).await?;

        let (client, connection) = tokio_postgres::connect(&database_url, NoTls).await?;
        let driver = tokio::spawn(connection);
        client.simple_query("SELECT 1").await?;
        drop(client);
        let _ = driver.await;

        tracing::info!(port, "embedded postgres ready");
        Ok(EmbeddedPostgres {
            postgresql,
            port,
            database_url,
        })
    })
}

/// Stop a previously started embedded `PostgreSQL` instance.
pub fn stop_postgres_embedded(postgres: EmbeddedPostgres) {
    let EmbeddedPostgres { postgresql, .. } = postgres;
    SHARED_RUNTIME.block_on(async move {
        let _ = postgresql.stop().await;
    });
}

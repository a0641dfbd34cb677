use mongodb::{Client, Database, bson::doc};
use tracing::debug;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
};

/// Open a client on the configured database and check that it answers a ping.
///
/// One attempt only; the storage supervisor schedules retries.
pub async fn open_database(config: &MongoConfig) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    database
        .run_command(doc! { "ping": 1 })
        .await
        .map_err(|source| MongoDaoError::InitialPing {
            database: config.database_name.clone(),
            source,
        })?;
    debug!(database = %config.database_name, "mongodb answered the initial ping");

    Ok((client, database))
}

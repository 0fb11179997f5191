pub mod dead_letter;
pub mod queue;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Open the durable store. The pool is capped at a single connection: the
/// store is the serialization point for all queue mutations, so concurrent
/// enqueue calls and the processing loop never interleave writes.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::fs;
use std::path::Path;

pub type DbPool = SqlitePool;

/// Initialize the database connection pool and run migrations.
/// The database file lives at `<data_dir>/health-dash.db`.
pub async fn initialize_db(data_dir: &Path) -> Result<DbPool, Box<dyn std::error::Error>> {
  // Create directory if it doesn't exist
  fs::create_dir_all(data_dir)?;

  let db_path = data_dir.join("health-dash.db");
  let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

  // Create connection pool
  let pool = SqlitePoolOptions::new()
    .max_connections(5)
    .connect(&db_url)
    .await?;

  // Run migrations
  sqlx::migrate!("./migrations").run(&pool).await?;

  Ok(pool)
}

//! Schema migrations, tracked with SQLite's `user_version` pragma.
//!
//! [`run_migrations`] is called whenever a [`Database`](crate::Database) is
//! opened and applies every step newer than the stored version, in order.

pub mod v001_initial;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> std::result::Result<(), rusqlite::Error>;

/// Index `i` upgrades the schema from version `i` to `i + 1`.
const STEPS: &[(&str, Step)] = &[("v001_initial", v001_initial::up)];

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let stored: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let target = STEPS.len() as u32;
    debug!(stored, target, "Checking schema version");

    for (version, (name, step)) in (1u32..).zip(STEPS) {
        if version <= stored {
            continue;
        }
        info!(migration = name, "Applying migration");
        step(conn).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        conn.pragma_update(None, "user_version", version)?;
    }
    Ok(())
}

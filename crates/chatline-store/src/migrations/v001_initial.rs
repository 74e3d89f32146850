//! v001 -- Initial schema creation: `users` and `messages`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY NOT NULL,
    fullname    TEXT NOT NULL,
    email       TEXT NOT NULL UNIQUE,
    profile_pic TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL                 -- RFC-3339
);

CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    text        TEXT,
    image       TEXT,                         -- data:image/...;base64 URL
    created_at  TEXT NOT NULL,                -- RFC-3339
    status      TEXT NOT NULL DEFAULT 'sent', -- sent | delivered | read

    FOREIGN KEY (sender_id)   REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (receiver_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, receiver_id, created_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

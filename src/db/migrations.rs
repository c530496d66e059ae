use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking — no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Accounts

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    avatar TEXT,
    password_hash BLOB NOT NULL,
    password_salt BLOB NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
",
        ),
        M::up(
            "-- Migration 2: Groups and membership

CREATE TABLE groups (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    admin_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (admin_id) REFERENCES users(id)
);

-- Composite primary key keeps the member set duplicate-free.
CREATE TABLE group_members (
    group_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    added_at TEXT NOT NULL,
    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX idx_group_members_user ON group_members(user_id);
",
        ),
        M::up(
            "-- Migration 3: Conversation log

-- One table for direct and group messages; conversation_key is
-- 'dm:<min_id>:<max_id>' for a direct pair, 'group:<id>' for a group.
CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    conversation_key TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    recipient_id TEXT,
    group_id TEXT,
    is_group INTEGER NOT NULL DEFAULT 0,
    text TEXT,
    image TEXT,
    created_at_ms INTEGER NOT NULL,
    seq INTEGER NOT NULL,
    FOREIGN KEY (sender_id) REFERENCES users(id)
);

CREATE INDEX idx_messages_conv ON messages(conversation_key, created_at_ms, seq);
CREATE INDEX idx_messages_group ON messages(group_id);
",
        ),
    ])
}

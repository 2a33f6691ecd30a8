pub const SCHEMA: &str = r#"
-- Identities known to the vault. Credentials live elsewhere.
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,

    storage_quota_bytes INTEGER,                   -- NULL = unlimited
    storage_used_bytes INTEGER NOT NULL DEFAULT 0, -- logical bytes, duplicates included

    created_at TEXT DEFAULT (datetime('now'))
);

-- One row per unique content hash
CREATE TABLE IF NOT EXISTS physical_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hash TEXT NOT NULL UNIQUE,
    blob_path TEXT NOT NULL UNIQUE,
    size_bytes INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    reference_count INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Files and folders in one tree
CREATE TABLE IF NOT EXISTS resources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL REFERENCES users(id),
    parent_id INTEGER REFERENCES resources(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('file', 'folder')),

    -- Set for files only; a ledger row cannot go away while referenced
    physical_file_id INTEGER REFERENCES physical_files(id) ON DELETE RESTRICT,

    is_public INTEGER NOT NULL DEFAULT 0,
    share_token TEXT UNIQUE,

    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),

    CHECK ((kind = 'file') = (physical_file_id IS NOT NULL))
);

-- ACL: at most one role per (resource, user)
CREATE TABLE IF NOT EXISTS permissions (
    resource_id INTEGER NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role TEXT NOT NULL CHECK (role IN ('viewer', 'editor')),
    created_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (resource_id, user_id)
);

-- Closure table, inclusive: every node is its own ancestor at depth 0
CREATE TABLE IF NOT EXISTS resource_ancestors (
    ancestor_id INTEGER NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
    descendant_id INTEGER NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
    depth INTEGER NOT NULL CHECK (depth >= 0),
    PRIMARY KEY (ancestor_id, descendant_id)
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_resources_parent ON resources(parent_id);
CREATE INDEX IF NOT EXISTS idx_resources_owner_roots ON resources(owner_id) WHERE parent_id IS NULL;
CREATE INDEX IF NOT EXISTS idx_resources_physical_file ON resources(physical_file_id);
CREATE INDEX IF NOT EXISTS idx_permissions_user ON permissions(user_id);
CREATE INDEX IF NOT EXISTS idx_ancestors_descendant ON resource_ancestors(descendant_id, depth);
"#;

pub const SCHEMA: &str = r#"
-- Users: identities resolved by the login flow
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL,          -- Identity provider subject (Google id)
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    picture_url TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Albums: named collections, one owner each
CREATE TABLE IF NOT EXISTS albums (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    cover_image_id INTEGER,
    shared_with TEXT NOT NULL DEFAULT '[]',  -- JSON array
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (owner_id, name),
    FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (cover_image_id) REFERENCES images(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_albums_owner ON albums(owner_id);
CREATE INDEX IF NOT EXISTS idx_albums_cover ON albums(cover_image_id);

-- Images: uploaded photos, optionally filed into one album
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    album_id INTEGER,
    url TEXT NOT NULL,
    blob_id TEXT NOT NULL,
    name TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    is_favourite INTEGER NOT NULL DEFAULT 0,
    tags TEXT NOT NULL DEFAULT '[]',      -- JSON array
    person TEXT NOT NULL DEFAULT '',
    comments TEXT NOT NULL DEFAULT '[]',  -- JSON array
    deleting_at TEXT,                     -- Set once a delete has started; hides the row
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_images_owner ON images(owner_id);
CREATE INDEX IF NOT EXISTS idx_images_album ON images(album_id);
CREATE INDEX IF NOT EXISTS idx_images_blob ON images(blob_id);
"#;

/// Applied after SCHEMA on every start. Each entry must be safe to re-run;
/// failures (e.g. "duplicate column") are ignored.
pub const MIGRATIONS: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_images_owner_favourite ON images(owner_id, is_favourite)",
    "ALTER TABLE images ADD COLUMN deleting_at TEXT",
    "CREATE INDEX IF NOT EXISTS idx_images_deleting ON images(deleting_at) WHERE deleting_at IS NOT NULL",
];

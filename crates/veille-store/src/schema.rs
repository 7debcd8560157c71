//! Database schema SQL.

/// Items and their processing status.
pub const ITEMS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT,
    content TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'processing', 'done', 'error')),
    status_reason TEXT,
    grade TEXT CHECK (grade IS NULL OR grade IN ('A', 'B', 'C')),
    grade_status TEXT CHECK (grade_status IS NULL OR grade_status IN ('graded', 'error')),
    grade_reason TEXT,
    claimed_by TEXT,
    claimed_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_items_status ON items(status, created_at);
CREATE INDEX IF NOT EXISTS idx_items_grade_status ON items(grade_status);
"#;

/// Taxonomy tables. A subcategory belongs to exactly one category.
pub const TAXONOMY_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS subcategories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
    UNIQUE (category_id, name)
);
"#;

/// Assignment edges, unique per (item, node).
pub const ASSIGNMENTS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS item_categories (
    item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
    PRIMARY KEY (item_id, category_id)
);

CREATE TABLE IF NOT EXISTS item_subcategories (
    item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    subcategory_id INTEGER NOT NULL REFERENCES subcategories(id) ON DELETE CASCADE,
    PRIMARY KEY (item_id, subcategory_id)
);
"#;

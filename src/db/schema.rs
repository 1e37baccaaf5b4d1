//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Goodreads details (keyed by the Goodreads book id)
CREATE TABLE IF NOT EXISTS goodreads_details (
    id INTEGER PRIMARY KEY,
    title TEXT,
    isbn13 TEXT,
    kindle_asin TEXT,
    marketplace_id TEXT,
    image_url TEXT,
    language_code TEXT,
    publisher TEXT,
    publication_year INTEGER,
    publication_month INTEGER,
    publication_day INTEGER,
    is_ebook INTEGER,
    description TEXT
);

CREATE INDEX IF NOT EXISTS idx_goodreads_isbn13 ON goodreads_details(isbn13);

-- Books table (title is the dedup key, isbn joins the metadata tables)
CREATE TABLE IF NOT EXISTS books (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL UNIQUE,
    completed_bool INTEGER NOT NULL DEFAULT 0,
    isbn TEXT,
    goodreads_details_id INTEGER REFERENCES goodreads_details(id)
);

CREATE INDEX IF NOT EXISTS idx_books_isbn ON books(isbn);

-- Calibre authors
CREATE TABLE IF NOT EXISTS calibre_authors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    author TEXT NOT NULL UNIQUE,
    author_sort TEXT
);

-- Calibre metadata, one row per ISBN
CREATE TABLE IF NOT EXISTS calibre_metadata (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    isbn TEXT NOT NULL UNIQUE,
    amazon TEXT,
    title TEXT,
    series TEXT,
    publisher TEXT,
    -- Date only, YYYY-MM-DD
    pubdate TEXT,
    title_sort TEXT,
    comments TEXT,
    cover TEXT
);

-- Calibre author <-> metadata links
CREATE TABLE IF NOT EXISTS calibre_authors_books (
    author_id INTEGER NOT NULL REFERENCES calibre_authors(id),
    book_id INTEGER NOT NULL REFERENCES calibre_metadata(id),

    UNIQUE(author_id, book_id)
);

-- Kindle / Calibre annotations
CREATE TABLE IF NOT EXISTS kindle_annotations (
    id INTEGER PRIMARY KEY,
    book_id INTEGER NOT NULL REFERENCES books(id),
    bookline TEXT,
    title TEXT,
    author TEXT,
    language TEXT,
    begin INTEGER,
    "end" INTEGER,
    -- YYYY-MM-DD HH:MM:SS
    time TEXT,
    highlight TEXT,
    note TEXT,
    statusline TEXT,
    page TEXT,
    edited INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_annotations_book_id ON kindle_annotations(book_id);
CREATE INDEX IF NOT EXISTS idx_annotations_span ON kindle_annotations(book_id, begin, "end");
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let pool = crate::db::connect_in_memory().await.unwrap();
        initialize_schema(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#,
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "books",
                "calibre_authors",
                "calibre_authors_books",
                "calibre_metadata",
                "goodreads_details",
                "kindle_annotations",
            ]
        );
    }
}

//! Book and book metadata database operations
//!
//! A `books` row is the anchor everything else hangs off: annotations link to
//! it by id, Calibre and Goodreads metadata link to it by ISBN. Single-table
//! writes are plain upserts; the import operations that touch several tables
//! run inside one transaction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{AppError, Result};

/// Denormalized book view joined with its Calibre and Goodreads metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BookDetails {
    pub id: i64,
    pub title: String,
    pub completed_bool: bool,
    pub isbn: Option<String>,
    pub publisher: Option<String>,
    pub pubdate: Option<String>,
    pub description: Option<String>,
    pub series: Option<String>,
}

/// Identifiers block of a Calibre metadata export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibreIdentifiers {
    pub isbn: String,
    pub amazon: Option<String>,
}

/// Calibre metadata import
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibreMetadata {
    pub identifiers: CalibreIdentifiers,
    pub title: String,
    /// Author name -> sort name
    #[serde(default)]
    pub author_sort_map: BTreeMap<String, String>,
    pub cover: Option<String>,
    pub series: Option<String>,
    pub publisher: Option<String>,
    /// ISO timestamp, only the date part is kept
    pub pubdate: Option<String>,
    pub title_sort: Option<String>,
    pub comments: Option<String>,
}

/// Goodreads book details import
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoodreadsBook {
    pub id: i64,
    pub title: String,
    pub isbn13: Option<String>,
    pub kindle_asin: Option<String>,
    pub marketplace_id: Option<String>,
    pub image_url: Option<String>,
    pub language_code: Option<String>,
    pub publisher: Option<String>,
    pub publication_year: Option<i32>,
    pub publication_month: Option<i32>,
    pub publication_day: Option<i32>,
    pub is_ebook: Option<bool>,
    pub description: Option<String>,
}

const DETAILS_QUERY: &str = r#"
    SELECT a.id, a.title, a.completed_bool, a.isbn,
           COALESCE(b.publisher, c.publisher) AS publisher,
           b.pubdate,
           COALESCE(b.comments, c.description) AS description,
           b.series
    FROM books AS a
    LEFT JOIN calibre_metadata AS b ON a.isbn = b.isbn
    LEFT JOIN goodreads_details AS c ON c.id = COALESCE(
        (SELECT g.id FROM goodreads_details AS g WHERE g.isbn13 = a.isbn ORDER BY g.id LIMIT 1),
        a.goodreads_details_id
    )
"#;

/// Keep the date portion of an ISO 8601 timestamp (`2019-08-06T04:00:00+00:00` -> `2019-08-06`)
pub fn date_only(timestamp: &str) -> &str {
    timestamp.split('T').next().unwrap_or(timestamp)
}

pub(crate) async fn find_book_id(
    conn: &mut SqliteConnection,
    title: &str,
) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM books WHERE title = ?")
        .bind(title)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|r| r.0))
}

/// Make sure a book with this title exists, returning its id and whether it
/// was just created. The insert runs first so a transaction calling this
/// holds the write lock from its first statement.
pub(crate) async fn ensure_book(conn: &mut SqliteConnection, title: &str) -> Result<(i64, bool)> {
    let created = sqlx::query(
        r#"
        INSERT INTO books (title, completed_bool)
        VALUES (?, 0)
        ON CONFLICT(title) DO NOTHING
        "#,
    )
    .bind(title)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        > 0;

    let id = find_book_id(&mut *conn, title)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Book {:?} missing after insert", title)))?;

    Ok((id, created))
}

/// Create-or-touch a book by title. An existing row keeps its ISBN unless it had none.
async fn upsert_book(
    conn: &mut SqliteConnection,
    title: &str,
    isbn: Option<&str>,
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO books (title, completed_bool, isbn)
        VALUES (?, 0, ?)
        ON CONFLICT(title) DO UPDATE SET
            isbn = COALESCE(books.isbn, excluded.isbn)
        RETURNING id
        "#,
    )
    .bind(title)
    .bind(isbn)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

async fn upsert_calibre_author(
    conn: &mut SqliteConnection,
    author: &str,
    author_sort: &str,
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO calibre_authors (author, author_sort)
        VALUES (?, ?)
        ON CONFLICT(author) DO UPDATE SET
            author_sort = excluded.author_sort
        RETURNING id
        "#,
    )
    .bind(author)
    .bind(author_sort)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

async fn upsert_calibre_metadata(
    conn: &mut SqliteConnection,
    data: &CalibreMetadata,
) -> Result<i64> {
    let pubdate = data.pubdate.as_deref().map(date_only);

    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO calibre_metadata
            (isbn, amazon, title, series, publisher, pubdate, title_sort, comments, cover)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(isbn) DO UPDATE SET
            amazon = excluded.amazon,
            title = excluded.title,
            series = excluded.series,
            publisher = excluded.publisher,
            pubdate = excluded.pubdate,
            title_sort = excluded.title_sort,
            comments = excluded.comments,
            cover = excluded.cover
        RETURNING id
        "#,
    )
    .bind(&data.identifiers.isbn)
    .bind(&data.identifiers.amazon)
    .bind(&data.title)
    .bind(&data.series)
    .bind(&data.publisher)
    .bind(pubdate)
    .bind(&data.title_sort)
    .bind(&data.comments)
    .bind(&data.cover)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

async fn upsert_author_book_link(
    conn: &mut SqliteConnection,
    author_id: i64,
    book_id: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO calibre_authors_books (author_id, book_id)
        VALUES (?, ?)
        ON CONFLICT(author_id, book_id) DO NOTHING
        "#,
    )
    .bind(author_id)
    .bind(book_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn upsert_goodreads_details(
    conn: &mut SqliteConnection,
    book: &GoodreadsBook,
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO goodreads_details
            (id, title, isbn13, kindle_asin, marketplace_id, image_url, language_code,
             publisher, publication_year, publication_month, publication_day, is_ebook,
             description)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            isbn13 = excluded.isbn13,
            kindle_asin = excluded.kindle_asin,
            marketplace_id = excluded.marketplace_id,
            image_url = excluded.image_url,
            language_code = excluded.language_code,
            publisher = excluded.publisher,
            publication_year = excluded.publication_year,
            publication_month = excluded.publication_month,
            publication_day = excluded.publication_day,
            is_ebook = excluded.is_ebook,
            description = excluded.description
        RETURNING id
        "#,
    )
    .bind(book.id)
    .bind(&book.title)
    .bind(&book.isbn13)
    .bind(&book.kindle_asin)
    .bind(&book.marketplace_id)
    .bind(&book.image_url)
    .bind(&book.language_code)
    .bind(&book.publisher)
    .bind(book.publication_year)
    .bind(book.publication_month)
    .bind(book.publication_day)
    .bind(book.is_ebook)
    .bind(&book.description)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

/// Point every book carrying `isbn` at the Goodreads row with the same ISBN-13
async fn link_goodreads(conn: &mut SqliteConnection, isbn: &str) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE books
        SET goodreads_details_id = (
            SELECT id FROM goodreads_details WHERE isbn13 = ? ORDER BY id LIMIT 1
        )
        WHERE isbn = ?
          AND EXISTS (SELECT 1 FROM goodreads_details WHERE isbn13 = ?)
        "#,
    )
    .bind(isbn)
    .bind(isbn)
    .bind(isbn)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Book repository
pub struct BookRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BookRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Exact-title lookup
    pub async fn get_book_id(&self, title: &str) -> Result<Option<i64>> {
        let mut conn = self.pool.acquire().await?;
        find_book_id(&mut *conn, title).await
    }

    /// Create the book if missing, otherwise touch it. Returns the id either way.
    pub async fn insert_book(&self, title: &str, isbn: Option<&str>) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        upsert_book(&mut *conn, title, isbn).await
    }

    pub async fn insert_calibre_author(&self, author: &str, author_sort: &str) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        upsert_calibre_author(&mut *conn, author, author_sort).await
    }

    /// Upsert Calibre metadata by ISBN, storing only the date part of `pubdate`
    pub async fn insert_calibre_metadata(&self, data: &CalibreMetadata) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        upsert_calibre_metadata(&mut *conn, data).await
    }

    pub async fn insert_author_id_book_id(&self, author_id: i64, book_id: i64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_author_book_link(&mut *conn, author_id, book_id).await
    }

    /// Link an author to Calibre metadata by natural keys.
    ///
    /// Returns `true` when a new link was written; `false` if it already
    /// existed or either the author or the ISBN is unknown.
    pub async fn link_book_to_author(&self, isbn: &str, author: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO calibre_authors_books (author_id, book_id)
            SELECT a.id, m.id
            FROM calibre_authors AS a, calibre_metadata AS m
            WHERE a.author = ? AND m.isbn = ?
            ON CONFLICT(author_id, book_id) DO NOTHING
            "#,
        )
        .bind(author)
        .bind(isbn)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Import a Calibre metadata record: authors, book, metadata and author
    /// links are written in one transaction. Returns the metadata id.
    pub async fn create_book_with_calibre(&self, data: &CalibreMetadata) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let mut author_ids = Vec::with_capacity(data.author_sort_map.len());
        for (author, author_sort) in &data.author_sort_map {
            author_ids.push(upsert_calibre_author(&mut *tx, author, author_sort).await?);
        }

        let book_id = upsert_book(&mut *tx, &data.title, Some(&data.identifiers.isbn)).await?;
        let calibre_id = upsert_calibre_metadata(&mut *tx, data).await?;

        for author_id in &author_ids {
            upsert_author_book_link(&mut *tx, *author_id, calibre_id).await?;
        }

        tx.commit().await?;

        tracing::debug!(
            "Imported Calibre metadata {} for book {} ({} authors)",
            calibre_id,
            book_id,
            author_ids.len()
        );

        Ok(calibre_id)
    }

    /// Import Goodreads details, make sure a matching book exists and link
    /// the two. Returns the Goodreads id.
    pub async fn create_book_with_goodreads(&self, book: &GoodreadsBook) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let goodreads_id = upsert_goodreads_details(&mut *tx, book).await?;
        let book_id = upsert_book(&mut *tx, &book.title, book.isbn13.as_deref()).await?;

        let linked = match book.isbn13.as_deref() {
            Some(isbn) => link_goodreads(&mut *tx, isbn).await?,
            None => sqlx::query("UPDATE books SET goodreads_details_id = ? WHERE id = ?")
                .bind(goodreads_id)
                .bind(book_id)
                .execute(&mut *tx)
                .await?
                .rows_affected(),
        };

        tx.commit().await?;

        tracing::debug!(
            "Imported Goodreads details {} for book {} ({} books linked)",
            goodreads_id,
            book_id,
            linked
        );

        Ok(goodreads_id)
    }

    /// Mark a book as completed or not
    pub async fn set_completed(&self, id: i64, completed: bool) -> Result<Option<BookDetails>> {
        let result = sqlx::query("UPDATE books SET completed_bool = ? WHERE id = ?")
            .bind(completed)
            .bind(id)
            .execute(self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_book_details(id).await
    }

    pub async fn get_book_details(&self, id: i64) -> Result<Option<BookDetails>> {
        let query = format!("{DETAILS_QUERY} WHERE a.id = ?");

        let details = sqlx::query_as::<_, BookDetails>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(details)
    }

    pub async fn get_all_book_details(&self, limit: i64) -> Result<Vec<BookDetails>> {
        let query = format!("{DETAILS_QUERY} ORDER BY a.id LIMIT ?");

        let details = sqlx::query_as::<_, BookDetails>(&query)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

        Ok(details)
    }
}

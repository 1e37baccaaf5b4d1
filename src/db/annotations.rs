//! Kindle / Calibre annotation database operations

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use super::books::{ensure_book, find_book_id};
use crate::error::{AppError, Result};

/// Columns returned for every annotation read, with `time` rendered as `yyyy-mm-dd-hh-mi-ss`
const SELECT_COLUMNS: &str = r#"
    id, book_id, bookline, title, author, language, begin, "end",
    strftime('%Y-%m-%d-%H-%M-%S', time) AS time,
    highlight, note, statusline, page, edited
"#;

const STORED_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Annotation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Annotation {
    pub id: i64,
    pub book_id: i64,
    pub bookline: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,
    pub begin: Option<i64>,
    pub end: Option<i64>,
    pub time: Option<String>,
    pub highlight: Option<String>,
    pub note: Option<String>,
    pub statusline: Option<String>,
    pub page: Option<String>,
    pub edited: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Highlight,
    Note,
    /// Kindle bookmarks mark a location and carry no text
    Bookmark,
}

/// Annotation as produced by a Kindle clippings or Calibre import
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationImport {
    /// The import source's own sequence number, used as id for new rows
    pub ordernr: i64,
    pub kind: AnnotationKind,
    pub bookline: Option<String>,
    pub title: String,
    pub author: Option<String>,
    pub language: Option<String>,
    pub begin: Option<i64>,
    pub end: Option<i64>,
    pub time: Option<String>,
    #[serde(default)]
    pub text: String,
    pub statusline: Option<String>,
    #[serde(default, deserialize_with = "page_from_text_or_number")]
    pub page: Option<String>,
}

/// Edit request for an existing annotation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationEdit {
    pub id: i64,
    pub highlight: Option<String>,
    pub note: Option<String>,
}

/// Kindle pages are usually numbers but may be roman numerals
fn page_from_text_or_number<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Page {
        Text(String),
        Number(i64),
    }

    Ok(Option::<Page>::deserialize(deserializer)?.map(|page| match page {
        Page::Text(text) => text,
        Page::Number(n) => n.to_string(),
    }))
}

/// Normalize an import timestamp to `YYYY-MM-DD HH:MM:SS`
///
/// Accepts the clippings form (`2020-02-15 01:19:41`) and RFC 3339.
pub fn normalize_time(raw: &str) -> Result<String> {
    let parsed = NaiveDateTime::parse_from_str(raw, STORED_TIME_FORMAT)
        .or_else(|_| {
            DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc).naive_utc())
        })
        .map_err(|_| AppError::BadRequest(format!("Invalid annotation time: {}", raw)))?;

    Ok(parsed.format(STORED_TIME_FORMAT).to_string())
}

/// A span with a missing bound never matches, so positionless annotations stay separate rows
async fn find_matching_id(
    conn: &mut SqliteConnection,
    book_id: i64,
    begin: Option<i64>,
    end: Option<i64>,
) -> Result<Option<i64>> {
    let (Some(begin), Some(end)) = (begin, end) else {
        return Ok(None);
    };

    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT id FROM kindle_annotations
        WHERE book_id = ? AND begin = ? AND "end" = ?
        ORDER BY id
        LIMIT 1
        "#,
    )
    .bind(book_id)
    .bind(begin)
    .bind(end)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|r| r.0))
}

/// Annotation repository
pub struct AnnotationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AnnotationRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_all_annotations(&self, limit: i64) -> Result<Vec<Annotation>> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM kindle_annotations ORDER BY id LIMIT ?");

        let annotations = sqlx::query_as::<_, Annotation>(&query)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

        Ok(annotations)
    }

    /// Annotations of the book with this exact title; empty if the title is unknown
    pub async fn get_annotations_by_book_title(&self, title: &str) -> Result<Vec<Annotation>> {
        let mut conn = self.pool.acquire().await?;
        let book_id = find_book_id(&mut *conn, title).await?;
        drop(conn);

        match book_id {
            Some(book_id) => self.get_annotations_by_book_id(book_id).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn get_annotations_by_book_id(&self, book_id: i64) -> Result<Vec<Annotation>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM kindle_annotations WHERE book_id = ? ORDER BY begin, id"
        );

        let annotations = sqlx::query_as::<_, Annotation>(&query)
            .bind(book_id)
            .fetch_all(self.pool)
            .await?;

        Ok(annotations)
    }

    pub async fn get_annotation_by_id(&self, id: i64) -> Result<Option<Annotation>> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM kindle_annotations WHERE id = ?");

        let annotation = sqlx::query_as::<_, Annotation>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(annotation)
    }

    /// Id of the annotation occupying exactly this span of the book, if any
    pub async fn get_matching_annotation_id(
        &self,
        book_id: i64,
        begin: Option<i64>,
        end: Option<i64>,
    ) -> Result<Option<i64>> {
        let mut conn = self.pool.acquire().await?;
        find_matching_id(&mut *conn, book_id, begin, end).await
    }

    /// Import one annotation.
    ///
    /// The owning book is created when missing. A row already covering the
    /// same `(book_id, begin, end)` span is updated in place; otherwise the
    /// import's `ordernr` becomes the id. On update only `statusline` and
    /// `time` always change; `highlight`/`note` change only when the import
    /// carries a value for them, so a note never erases a highlight.
    ///
    /// Bookmarks carry no text and are rejected.
    pub async fn add_annotation(&self, annotation: &AnnotationImport) -> Result<Annotation> {
        let (highlight, note) = match annotation.kind {
            AnnotationKind::Highlight => (Some(annotation.text.as_str()), None),
            AnnotationKind::Note => (None, Some(annotation.text.as_str())),
            AnnotationKind::Bookmark => {
                return Err(AppError::BadRequest(format!(
                    "Bookmarks cannot be imported as annotations (ordernr {})",
                    annotation.ordernr
                )))
            }
        };

        let time = annotation.time.as_deref().map(normalize_time).transpose()?;

        let mut tx = self.pool.begin().await?;

        // Writing first takes the write lock before any read, so concurrent
        // imports wait on the busy timeout instead of failing a lock upgrade.
        let (book_id, created) = ensure_book(&mut *tx, &annotation.title).await?;
        if created {
            tracing::info!(
                "No existing book titled {:?}, created one for its annotations",
                annotation.title
            );
        }

        let id = find_matching_id(&mut *tx, book_id, annotation.begin, annotation.end)
            .await?
            .unwrap_or(annotation.ordernr);

        let mut set_clauses = vec!["statusline = excluded.statusline", "time = excluded.time"];
        if highlight.is_some_and(|h| !h.is_empty()) {
            set_clauses.push("highlight = excluded.highlight");
        }
        if note.is_some_and(|n| !n.is_empty()) {
            set_clauses.push("note = excluded.note");
        }

        let query = format!(
            r#"
            INSERT INTO kindle_annotations
                (id, book_id, bookline, title, author, language, begin, "end",
                 time, highlight, note, statusline, page)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET {}
            RETURNING {SELECT_COLUMNS}
            "#,
            set_clauses.join(", ")
        );

        let row = sqlx::query_as::<_, Annotation>(&query)
            .bind(id)
            .bind(book_id)
            .bind(&annotation.bookline)
            .bind(&annotation.title)
            .bind(&annotation.author)
            .bind(&annotation.language)
            .bind(annotation.begin)
            .bind(annotation.end)
            .bind(&time)
            .bind(highlight)
            .bind(note)
            .bind(&annotation.statusline)
            .bind(&annotation.page)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(row)
    }

    /// Calibre annotations share the Kindle import shape
    pub async fn add_calibre_annotation(
        &self,
        annotation: &AnnotationImport,
    ) -> Result<Annotation> {
        self.add_annotation(annotation).await
    }

    /// Import a batch in order, skipping bookmarks. Stops at the first
    /// failure; earlier rows stay.
    pub async fn add_annotations(&self, batch: &[AnnotationImport]) -> Result<Vec<Annotation>> {
        let mut rows = Vec::with_capacity(batch.len());
        for annotation in batch {
            if annotation.kind == AnnotationKind::Bookmark {
                tracing::debug!(
                    "Skipping bookmark {} in {:?}",
                    annotation.ordernr,
                    annotation.title
                );
                continue;
            }
            rows.push(self.add_annotation(annotation).await?);
        }

        tracing::debug!("Imported {} annotations", rows.len());

        Ok(rows)
    }

    /// Overwrite highlight and note text and mark the row as edited
    pub async fn edit_annotation(&self, edit: &AnnotationEdit) -> Result<Option<Annotation>> {
        let query = format!(
            r#"
            UPDATE kindle_annotations
            SET highlight = ?, note = ?, edited = 1
            WHERE id = ?
            RETURNING {SELECT_COLUMNS}
            "#
        );

        let annotation = sqlx::query_as::<_, Annotation>(&query)
            .bind(&edit.highlight)
            .bind(&edit.note)
            .bind(edit.id)
            .fetch_optional(self.pool)
            .await?;

        Ok(annotation)
    }

    /// Delete an annotation, returning the row as it was
    pub async fn delete_annotation(&self, id: i64) -> Result<Option<Annotation>> {
        let query =
            format!("DELETE FROM kindle_annotations WHERE id = ? RETURNING {SELECT_COLUMNS}");

        let annotation = sqlx::query_as::<_, Annotation>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(annotation)
    }

    pub async fn count_for_book(&self, book_id: i64) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM kindle_annotations WHERE book_id = ?")
                .bind(book_id)
                .fetch_one(self.pool)
                .await?;

        Ok(row.0)
    }
}

//! Book API routes

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{
    Annotation, AnnotationRepository, BookDetails, BookRepository, CalibreMetadata, GoodreadsBook,
};
use crate::error::{AppError, Result};
use crate::state::AppState;

use super::{clamp_limit, ListQuery};

/// Create the books router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_books))
        .route("/calibre", post(import_calibre))
        .route("/goodreads", post(import_goodreads))
        .route("/:id", get(get_book))
        .route("/:id/completed", put(set_completed))
        .route("/:id/annotations", get(book_annotations))
}

#[derive(Debug, Deserialize)]
pub struct CompletedUpdate {
    pub completed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportResponse {
    pub id: i64,
}

async fn list_books(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BookDetails>>> {
    let repo = BookRepository::new(state.db());
    let books = repo.get_all_book_details(clamp_limit(query.limit)).await?;
    Ok(Json(books))
}

async fn get_book(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<BookDetails>> {
    let repo = BookRepository::new(state.db());
    let book = repo
        .get_book_details(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;
    Ok(Json(book))
}

async fn set_completed(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<CompletedUpdate>,
) -> Result<Json<BookDetails>> {
    let repo = BookRepository::new(state.db());
    let book = repo
        .set_completed(id, update.completed)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;
    Ok(Json(book))
}

async fn book_annotations(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Annotation>>> {
    let repo = AnnotationRepository::new(state.db());
    let annotations = repo.get_annotations_by_book_id(id).await?;
    Ok(Json(annotations))
}

/// Import a Calibre metadata record, responding with the metadata id
async fn import_calibre(
    State(state): State<AppState>,
    Json(data): Json<CalibreMetadata>,
) -> Result<Json<ImportResponse>> {
    if data.identifiers.isbn.trim().is_empty() {
        return Err(AppError::BadRequest("Calibre metadata has no ISBN".to_string()));
    }

    let repo = BookRepository::new(state.db());
    let id = repo.create_book_with_calibre(&data).await?;
    Ok(Json(ImportResponse { id }))
}

/// Import Goodreads details, responding with the Goodreads id
async fn import_goodreads(
    State(state): State<AppState>,
    Json(book): Json<GoodreadsBook>,
) -> Result<Json<ImportResponse>> {
    let repo = BookRepository::new(state.db());
    let id = repo.create_book_with_goodreads(&book).await?;
    Ok(Json(ImportResponse { id }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::ImportResponse;
    use crate::db::{Annotation, BookDetails};
    use crate::routes::tests::test_server;

    #[tokio::test]
    async fn test_calibre_import_and_details() {
        let server = test_server().await;

        let imported: ImportResponse = server
            .post("/api/v1/books/calibre")
            .json(&json!({
                "identifiers": { "isbn": "9780684862149", "amazon": "B001D1ZQIU" },
                "title": "The Worldly Philosophers",
                "author_sort_map": { "Robert L. Heilbroner": "Heilbroner, Robert L." },
                "cover": null,
                "series": null,
                "publisher": "Simon & Schuster",
                "pubdate": "1999-08-26T04:00:00+00:00",
                "title_sort": "Worldly Philosophers, The",
                "comments": "Economic thinkers"
            }))
            .await
            .json();
        assert!(imported.id > 0);

        let books: Vec<BookDetails> = server.get("/api/v1/books").await.json();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].pubdate.as_deref(), Some("1999-08-26"));
        assert_eq!(books[0].description.as_deref(), Some("Economic thinkers"));

        let completed: BookDetails = server
            .put(&format!("/api/v1/books/{}/completed", books[0].id))
            .json(&json!({ "completed": true }))
            .await
            .json();
        assert!(completed.completed_bool);
    }

    #[tokio::test]
    async fn test_calibre_import_requires_isbn() {
        let server = test_server().await;

        let response = server
            .post("/api/v1/books/calibre")
            .json(&json!({ "identifiers": { "isbn": " " }, "title": "No ISBN" }))
            .await;

        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_goodreads_import() {
        let server = test_server().await;

        let imported: ImportResponse = server
            .post("/api/v1/books/goodreads")
            .json(&json!({
                "id": 82120, "title": "Thinking, Fast and Slow", "isbn13": "9780374275631",
                "publisher": "Farrar, Straus and Giroux", "publication_year": 2011,
                "is_ebook": true, "description": "Two systems"
            }))
            .await
            .json();
        assert_eq!(imported.id, 82120);

        let books: Vec<BookDetails> = server.get("/api/v1/books").await.json();
        assert_eq!(books[0].description.as_deref(), Some("Two systems"));
    }

    #[tokio::test]
    async fn test_book_annotations_and_missing_book() {
        let server = test_server().await;

        let row: Annotation = server
            .post("/api/v1/annotations")
            .json(&json!({
                "ordernr": 7, "kind": "note", "title": "Book A",
                "begin": 1, "end": 2, "text": "n1"
            }))
            .await
            .json();

        let annotations: Vec<Annotation> = server
            .get(&format!("/api/v1/books/{}/annotations", row.book_id))
            .await
            .json();
        assert_eq!(annotations, vec![row]);

        let missing = server.get("/api/v1/books/9999").await;
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
    }
}

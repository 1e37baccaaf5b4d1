//! Annotation API routes

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::db::{Annotation, AnnotationEdit, AnnotationImport, AnnotationRepository};
use crate::error::{AppError, Result};
use crate::state::AppState;

use super::clamp_limit;

/// Create the annotations router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_annotations).post(import_annotation))
        .route("/batch", post(import_annotations))
        .route(
            "/:id",
            get(get_annotation).put(edit_annotation).delete(delete_annotation),
        )
}

#[derive(Debug, Default, Deserialize)]
pub struct AnnotationListQuery {
    pub limit: Option<i64>,
    pub title: Option<String>,
}

/// Replacement text for an annotation
#[derive(Debug, Deserialize)]
pub struct AnnotationText {
    pub highlight: Option<String>,
    pub note: Option<String>,
}

/// List annotations, optionally only those of one book title
async fn list_annotations(
    State(state): State<AppState>,
    Query(query): Query<AnnotationListQuery>,
) -> Result<Json<Vec<Annotation>>> {
    let repo = AnnotationRepository::new(state.db());
    let annotations = match query.title {
        Some(ref title) => repo.get_annotations_by_book_title(title).await?,
        None => repo.get_all_annotations(clamp_limit(query.limit)).await?,
    };
    Ok(Json(annotations))
}

/// Import a single annotation
async fn import_annotation(
    State(state): State<AppState>,
    Json(annotation): Json<AnnotationImport>,
) -> Result<Json<Annotation>> {
    let repo = AnnotationRepository::new(state.db());
    let row = repo.add_annotation(&annotation).await?;
    Ok(Json(row))
}

/// Import a batch of annotations in order
async fn import_annotations(
    State(state): State<AppState>,
    Json(batch): Json<Vec<AnnotationImport>>,
) -> Result<Json<Vec<Annotation>>> {
    let repo = AnnotationRepository::new(state.db());
    let rows = repo.add_annotations(&batch).await?;
    Ok(Json(rows))
}

async fn get_annotation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Annotation>> {
    let repo = AnnotationRepository::new(state.db());
    let annotation = repo
        .get_annotation_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Annotation not found: {}", id)))?;
    Ok(Json(annotation))
}

async fn edit_annotation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(text): Json<AnnotationText>,
) -> Result<Json<Annotation>> {
    let repo = AnnotationRepository::new(state.db());
    let edit = AnnotationEdit {
        id,
        highlight: text.highlight,
        note: text.note,
    };
    let annotation = repo
        .edit_annotation(&edit)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Annotation not found: {}", id)))?;
    Ok(Json(annotation))
}

/// Delete an annotation, responding with the removed row
async fn delete_annotation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Annotation>> {
    let repo = AnnotationRepository::new(state.db());
    let annotation = repo
        .delete_annotation(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Annotation not found: {}", id)))?;
    Ok(Json(annotation))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::json;

    use crate::db::Annotation;
    use crate::routes::tests::test_server;

    async fn seed(server: &TestServer) {
        let response = server
            .post("/api/v1/annotations")
            .json(&json!({
                "ordernr": 1, "kind": "highlight", "title": "Book A",
                "begin": 10, "end": 20, "time": "2020-02-15 01:19:41", "text": "hi"
            }))
            .await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn test_import_then_merge_note() {
        let server = test_server().await;
        seed(&server).await;

        let merged: Annotation = server
            .post("/api/v1/annotations")
            .json(&json!({
                "ordernr": 1, "kind": "note", "title": "Book A",
                "begin": 10, "end": 20, "time": "2020-02-16 08:00:00", "text": "n1"
            }))
            .await
            .json();

        assert_eq!(merged.highlight.as_deref(), Some("hi"));
        assert_eq!(merged.note.as_deref(), Some("n1"));
        assert_eq!(merged.time.as_deref(), Some("2020-02-16-08-00-00"));

        let all: Vec<Annotation> = server.get("/api/v1/annotations").await.json();
        assert_eq!(all.len(), 1);

        let by_title: Vec<Annotation> = server
            .get("/api/v1/annotations")
            .add_query_param("title", "Book A")
            .await
            .json();
        assert_eq!(by_title, all);
    }

    #[tokio::test]
    async fn test_edit_and_delete() {
        let server = test_server().await;
        seed(&server).await;

        let edited: Annotation = server
            .put("/api/v1/annotations/1")
            .json(&json!({ "highlight": "hi!", "note": null }))
            .await
            .json();
        assert!(edited.edited);
        assert_eq!(edited.highlight.as_deref(), Some("hi!"));

        let deleted: Annotation = server.delete("/api/v1/annotations/1").await.json();
        assert_eq!(deleted, edited);

        let missing = server.get("/api/v1/annotations/1").await;
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_time_is_bad_request() {
        let server = test_server().await;

        let response = server
            .post("/api/v1/annotations/batch")
            .json(&json!([{
                "ordernr": 1, "kind": "highlight", "title": "Book A",
                "begin": 10, "end": 20, "time": "not a time", "text": "hi"
            }]))
            .await;

        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_batch_with_bookmark() {
        let server = test_server().await;

        let response = server
            .post("/api/v1/annotations/batch")
            .json(&json!([
                {
                    "ordernr": 1, "kind": "highlight", "title": "Book A",
                    "begin": 10, "end": 20, "time": "2020-02-15 01:19:41", "text": "hi"
                },
                {
                    "ordernr": 2, "kind": "bookmark", "title": "Book A",
                    "begin": 30, "end": 30, "time": "2020-02-15 01:20:00"
                }
            ]))
            .await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let rows: Vec<Annotation> = response.json();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
    }
}

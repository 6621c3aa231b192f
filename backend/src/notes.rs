use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use notes_common::{NewNote, NoteDto};

use crate::db;
use crate::error::AppError;
use crate::extractors::{AuthUser, ValidatedJson};
use crate::web_server::AppState;

const NOTE_NOT_FOUND: &str = "No Note matches the given query.";

#[derive(sqlx::FromRow, Debug)]
struct NoteRecord {
    id: i64,
    title: String,
    content: String,
    created_at: NaiveDateTime,
    author_id: i64,
}

impl From<NoteRecord> for NoteDto {
    fn from(record: NoteRecord) -> Self {
        NoteDto {
            id: record.id,
            title: record.title,
            content: record.content,
            created_at: record.created_at.and_utc(),
            author: record.author_id,
        }
    }
}

/// ## List notes
/// Notes written by the authenticated user, oldest first.
#[utoipa::path(
    get,
    path = "/api/notes/",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "The caller's notes", body = [NoteDto]),
        (status = 401, description = "Authentication required")
    )
)]
pub async fn list_notes(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<NoteDto>>, AppError> {
    tracing::info!("Fetching notes for user {}", user.id);

    let notes = sqlx::query_as::<_, NoteRecord>(
        "SELECT id, title, content, created_at, author_id FROM notes WHERE author_id = ? ORDER BY id",
    )
    .bind(user.id)
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(notes.into_iter().map(NoteDto::from).collect()))
}

/// ## Create a note
/// The author is always the authenticated user.
#[utoipa::path(
    post,
    path = "/api/notes/",
    request_body = NewNote,
    security(("bearer_auth" = [])),
    responses(
        (status = 201, description = "Note created", body = NoteDto),
        (status = 400, description = "Invalid title or content"),
        (status = 401, description = "Authentication required")
    )
)]
pub async fn create_note(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(new_note): ValidatedJson<NewNote>,
) -> Result<(StatusCode, Json<NoteDto>), AppError> {
    tracing::info!("Creating note for user {}", user.id);

    let created_at = Utc::now().naive_utc();
    let result = sqlx::query(
        "INSERT INTO notes (title, content, created_at, author_id) VALUES (?, ?, ?, ?)",
    )
    .bind(&new_note.title)
    .bind(&new_note.content)
    .bind(created_at)
    .bind(user.id)
    .execute(&state.db_pool)
    .await?;

    let id = db::last_insert_id(&result);
    let note = sqlx::query_as::<_, NoteRecord>(
        "SELECT id, title, content, created_at, author_id FROM notes WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.db_pool)
    .await?;

    Ok((StatusCode::CREATED, Json(note.into())))
}

/// ## Delete a note
/// Notes owned by someone else are reported as missing, as are ids that are
/// not integers.
#[utoipa::path(
    delete,
    path = "/api/notes/delete/{id}/",
    params(("id" = i64, Path, description = "Note id")),
    security(("bearer_auth" = [])),
    responses(
        (status = 204, description = "Note deleted"),
        (status = 401, description = "Authentication required"),
        (status = 404, description = "No Note matches the given query.")
    )
)]
pub async fn delete_note(
    State(state): State<AppState>,
    user: AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Ok(Path(id)) = id else {
        return Err(AppError::NotFound("Not found.".into()));
    };
    tracing::info!("Deleting note {} for user {}", id, user.id);

    let result = sqlx::query("DELETE FROM notes WHERE id = ? AND author_id = ?")
        .bind(id)
        .bind(user.id)
        .execute(&state.db_pool)
        .await?;

    if result.rows_affected() > 0 {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(NOTE_NOT_FOUND.into()))
    }
}

//! Journal handlers: recent exchanges and diff-mode findings.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;

use crate::AppState;
use crate::journal::{DiffEntry, JournalEntry};

#[derive(Debug, Serialize)]
pub struct JournalView {
    pub journal: Vec<JournalEntry>,
}

#[derive(Debug, Serialize)]
pub struct DiffJournalView {
    pub diffs: Vec<DiffEntry>,
}

#[tracing::instrument(skip_all)]
pub async fn get_journal(State(state): State<AppState>) -> Json<JournalView> {
    Json(JournalView {
        journal: state.journal.entries(),
    })
}

#[tracing::instrument(skip_all)]
pub async fn delete_journal(State(state): State<AppState>) -> StatusCode {
    state.journal.clear();
    StatusCode::OK
}

#[tracing::instrument(skip_all)]
pub async fn get_diff_journal(State(state): State<AppState>) -> Json<DiffJournalView> {
    Json(DiffJournalView {
        diffs: state.diff_journal.entries(),
    })
}

use std::collections::HashMap;

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
};
use diesel::{prelude::*, PgConnection};
use tracing::info;
use uuid::Uuid;

use crate::auth::{roles::MANAGERS, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::models::{RequestType, StudentRequest, User};
use crate::reports::{
    render_pdf, render_xlsx, ReportPerson, ReportRow, PDF_CONTENT_TYPE, PDF_FILENAME,
    XLSX_CONTENT_TYPE, XLSX_FILENAME,
};
use crate::schema::{request_types, requests, users};
use crate::state::AppState;

fn report_person(user: &User, with_matricule: bool) -> ReportPerson {
    ReportPerson {
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        matricule: with_matricule.then(|| user.matricule.clone()),
    }
}

fn load_report_rows(conn: &mut PgConnection) -> AppResult<Vec<ReportRow>> {
    let rows: Vec<StudentRequest> = requests::table
        .order(requests::created_at.asc())
        .load(conn)?;
    let types: HashMap<Uuid, RequestType> = request_types::table
        .load::<RequestType>(conn)?
        .into_iter()
        .map(|row| (row.id, row))
        .collect();
    let people: HashMap<Uuid, User> = users::table
        .load::<User>(conn)?
        .into_iter()
        .map(|row| (row.id, row))
        .collect();

    Ok(rows
        .into_iter()
        .map(|row| ReportRow {
            type_name: types.get(&row.request_type_id).map(|t| t.name.clone()),
            student: people
                .get(&row.student_id)
                .map(|user| report_person(user, true)),
            agent: row
                .assigned_agent_id
                .and_then(|id| people.get(&id))
                .map(|user| report_person(user, false)),
            created_at: Some(row.created_at),
            reference: row.reference,
            title: row.title,
            status: row.status,
            priority: row.priority,
        })
        .collect())
}

async fn render_report(
    state: &AppState,
    render: fn(&[ReportRow]) -> anyhow::Result<Vec<u8>>,
) -> AppResult<(usize, Vec<u8>)> {
    let mut conn = state.db()?;
    let rows = load_report_rows(&mut conn)?;
    drop(conn);

    let count = rows.len();
    let bytes = tokio::task::spawn_blocking(move || render(&rows))
        .await
        .map_err(|err| AppError::internal(format!("report task failed: {err}")))??;
    Ok((count, bytes))
}

fn attachment(filename: &str) -> String {
    format!("attachment; filename={filename}")
}

pub async fn excel_report(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    user.require_any(MANAGERS)?;
    let (rows, bytes) = render_report(&state, render_xlsx).await?;
    info!(rows, requested_by = %user.user_id, "excel report generated");
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, attachment(XLSX_FILENAME)),
        ],
        bytes,
    ))
}

pub async fn pdf_report(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    user.require_any(MANAGERS)?;
    let (rows, bytes) = render_report(&state, render_pdf).await?;
    info!(rows, requested_by = %user.user_id, "pdf report generated");
    Ok((
        [
            (header::CONTENT_TYPE, PDF_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, attachment(PDF_FILENAME)),
        ],
        bytes,
    ))
}

mod common;

use anyhow::Result;
use axum::http::{header, StatusCode};
use campus_requests::auth::roles::Role;
use campus_requests::reports::{PDF_CONTENT_TYPE, XLSX_CONTENT_TYPE};
use common::{acquire_db_lock, body_to_vec, TestApp};
use serde_json::json;

#[tokio::test]
async fn exports_are_attachments_for_managers_only() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (student_id, student) = app.user_with_token("etu@univ.test", Role::Student).await?;
    let (_, head) = app
        .user_with_token("chef@univ.test", Role::DepartmentHead)
        .await?;
    let type_id = app.insert_request_type("Relevé de notes").await?;
    let response = app
        .post_json(
            "/api/requests",
            &json!({
                "type_requete": type_id,
                "titre": "Relevé S1",
                "description": "Semestre 1",
                "etudiant_id": student_id
            }),
            Some(&student),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.get("/api/reports/excel", Some(&student)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.get("/api/reports/excel", Some(&head)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        XLSX_CONTENT_TYPE
    );
    let bytes = body_to_vec(response.into_body()).await?;
    assert!(bytes.starts_with(b"PK"));

    let response = app.get("/api/reports/pdf", Some(&head)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        PDF_CONTENT_TYPE
    );
    let bytes = body_to_vec(response.into_body()).await?;
    assert!(bytes.starts_with(b"%PDF"));

    app.cleanup().await?;
    Ok(())
}

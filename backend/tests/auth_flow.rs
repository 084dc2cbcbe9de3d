mod common;

use anyhow::Result;
use axum::http::StatusCode;
use campus_requests::auth::roles::Role;
use campus_requests::routes::{auth::LoginResponse, users::UserResponse};
use chrono::{Duration, Utc};
use common::{acquire_db_lock, body_to_vec, json_body, TestApp};
use serde_json::json;

#[tokio::test]
async fn login_and_me_roundtrip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let password = "s3cret-pass";
    app.insert_user("Alice@Univ.test", password, Role::Admin).await?;

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "alice@univ.test", "mot_de_passe": password }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let login: LoginResponse = serde_json::from_slice(&body)?;
    assert_eq!(login.user.role, "admin");
    assert!(login.user.last_login_at.is_some());

    let response = app.get("/api/auth/me", Some(&login.token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let me: UserResponse = serde_json::from_slice(&body)?;
    assert_eq!(me.id, login.user.id);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn wrong_password_yields_no_token() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("bob@univ.test", "right-pass", Role::Agent).await?;

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "bob@univ.test", "mot_de_passe": "wrong-pass" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await?;
    assert!(body.get("token").is_none());

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "nobody@univ.test", "mot_de_passe": "right-pass" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn expired_or_missing_token_is_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let user_id = app
        .insert_user("carla@univ.test", "password-123", Role::Student)
        .await?;
    let stale = app
        .state
        .jwt
        .generate_token_at(user_id, Role::Student, Utc::now() - Duration::days(8))?;

    let response = app.get("/api/auth/me", Some(&stale)).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/api/requests", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let fresh = app.state.jwt.generate_token(user_id, Role::Student)?;
    let response = app.get("/api/auth/me", Some(&fresh)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn register_always_creates_a_student() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app
        .post_json(
            "/api/auth/register",
            &json!({
                "matricule": "E2024-001",
                "nom": "Diallo",
                "prenom": "Awa",
                "email": "awa@univ.test",
                "mot_de_passe": "password-123",
                "role": "admin"
            }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let registered: LoginResponse = serde_json::from_slice(&body)?;
    assert_eq!(registered.user.role, "student");
    assert!(!registered.token.is_empty());

    let response = app
        .post_json(
            "/api/auth/register",
            &json!({ "matricule": "E2024-002", "nom": "Sow" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await?;
    assert_eq!(body["field"], "prenom");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn user_management_is_role_gated() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (_, admin) = app.user_with_token("admin@univ.test", Role::Admin).await?;
    let (_, head) = app
        .user_with_token("head@univ.test", Role::DepartmentHead)
        .await?;
    let (student_id, student) = app.user_with_token("eleve@univ.test", Role::Student).await?;

    let response = app.get("/api/users", Some(&student)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.get("/api/users", Some(&head)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let users: Vec<UserResponse> = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(users.len(), 3);

    let path = format!("/api/users/{student_id}");
    let response = app.delete(&path, Some(&head)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.delete(&path, Some(&admin)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert!(body["message"].is_string());

    let response = app.get(&path, Some(&admin)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

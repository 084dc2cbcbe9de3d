mod common;

use anyhow::Result;
use axum::http::StatusCode;
use campus_requests::auth::roles::Role;
use campus_requests::realtime::EVENT_MESSAGE_RECEIVED;
use campus_requests::routes::messages::MessageResponse;
use common::{acquire_db_lock, body_to_vec, json_body, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn messages_are_listed_per_request_and_marked_read() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (student_id, student) = app.user_with_token("etu@univ.test", Role::Student).await?;
    let (agent_id, agent) = app.user_with_token("agent@univ.test", Role::Agent).await?;
    let type_id = app.insert_request_type("Attestation").await?;

    let response = app
        .post_json(
            "/api/requests",
            &json!({
                "type_requete": type_id,
                "titre": "Attestation d'inscription",
                "description": "Pour la préfecture",
                "etudiant_id": student_id
            }),
            Some(&student),
        )
        .await?;
    let request_id = json_body(response).await?["_id"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    let response = app
        .post_json(
            "/api/messages",
            &json!({ "requete_id": request_id, "contenu": "Bonjour, où en est ma demande ?" }),
            Some(&student),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let first: MessageResponse = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(first.sender.as_ref().map(|s| s.id), Some(student_id));
    assert!(!first.is_read);

    let response = app
        .post_json(
            "/api/messages",
            &json!({ "requete_id": request_id, "contenu": "Elle est en cours de traitement." }),
            Some(&agent),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .post_json("/api/messages", &json!({ "requete_id": request_id }), Some(&agent))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await?["field"], "contenu");

    let response = app
        .get(&format!("/api/messages/requete/{request_id}"), Some(&student))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let thread: Vec<MessageResponse> =
        serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].id, first.id);
    assert_eq!(thread[1].sender.as_ref().map(|s| s.id), Some(agent_id));

    let response = app
        .patch_json(&format!("/api/messages/{}/lu", first.id), &json!({}), Some(&agent))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let read: MessageResponse = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert!(read.is_read);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn created_message_is_pushed_to_the_request_room() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (student_id, student) = app.user_with_token("etu@univ.test", Role::Student).await?;
    let type_id = app.insert_request_type("Attestation").await?;

    let response = app
        .post_json(
            "/api/requests",
            &json!({
                "type_requete": type_id,
                "titre": "Attestation de réussite",
                "description": "Licence 3",
                "etudiant_id": student_id
            }),
            Some(&student),
        )
        .await?;
    let request_id = json_body(response).await?["_id"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    let mut in_room = app.state.realtime.connect("agent-tab").await;
    app.state.realtime.join("agent-tab", &request_id).await;
    let mut elsewhere = app.state.realtime.connect("other-tab").await;
    app.state.realtime.join("other-tab", &Uuid::new_v4().to_string()).await;

    let response = app
        .post_json(
            "/api/messages",
            &json!({ "requete_id": request_id, "contenu": "Merci !" }),
            Some(&student),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: MessageResponse = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    let frame: Value = serde_json::from_str(&in_room.try_recv()?)?;
    assert_eq!(frame["event"], EVENT_MESSAGE_RECEIVED);
    assert_eq!(frame["data"]["_id"], created.id.to_string());
    assert_eq!(frame["data"]["contenu"], "Merci !");
    assert!(elsewhere.try_recv().is_err());

    app.state.realtime.disconnect("agent-tab").await;
    app.state.realtime.disconnect("other-tab").await;
    app.cleanup().await?;
    Ok(())
}

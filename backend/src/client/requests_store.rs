use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use super::{Api, ClientResult};
use crate::lifecycle::{new_reference_number, Priority, RequestStatus};
use crate::routes::{request_types::RequestTypeResponse, requests::RequestResponse};

/// Local list filters; `None` means "all".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFilters {
    pub status: Option<RequestStatus>,
    pub request_type: Option<Uuid>,
    pub priority: Option<Priority>,
    pub search: String,
}

impl RequestFilters {
    pub fn matches(&self, request: &RequestResponse) -> bool {
        if let Some(status) = self.status {
            if request.status.parse::<RequestStatus>().ok() != Some(status) {
                return false;
            }
        }
        if let Some(type_id) = self.request_type {
            if request.request_type.as_ref().map(|t| t.id) != Some(type_id) {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if request.priority.parse::<Priority>().ok() != Some(priority) {
                return false;
            }
        }

        let needle = self.search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let type_name = request
            .request_type
            .as_ref()
            .map(|t| t.name.to_lowercase())
            .unwrap_or_default();
        request.title.to_lowercase().contains(&needle)
            || request.reference.to_lowercase().contains(&needle)
            || type_name.contains(&needle)
    }
}

#[derive(Debug, Clone)]
pub struct NewRequestInput {
    pub student_id: Uuid,
    pub request_type_id: Uuid,
    pub title: String,
    pub description: String,
    pub reference: Option<String>,
    pub priority: Option<Priority>,
}

impl NewRequestInput {
    fn to_body(&self) -> Value {
        json!({
            "etudiant_id": self.student_id,
            "type_requete": self.request_type_id,
            "numero_reference": self.reference.clone().unwrap_or_else(new_reference_number),
            "titre": self.title,
            "description": self.description,
            "priorite": self.priority.unwrap_or_default().as_str(),
        })
    }
}

/// Cached requests and request types with client-side filtering.
pub struct RequestsStore {
    api: Arc<dyn Api>,
    requests: Vec<RequestResponse>,
    request_types: Vec<RequestTypeResponse>,
    pub filters: RequestFilters,
    last_error: Option<String>,
}

impl RequestsStore {
    pub fn new(api: Arc<dyn Api>) -> Self {
        Self {
            api,
            requests: Vec::new(),
            request_types: Vec::new(),
            filters: RequestFilters::default(),
            last_error: None,
        }
    }

    pub fn requests(&self) -> &[RequestResponse] {
        &self.requests
    }

    pub fn request_types(&self) -> &[RequestTypeResponse] {
        &self.request_types
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn record<T>(&mut self, result: ClientResult<T>) -> ClientResult<T> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(err) => self.last_error = Some(err.to_string()),
        }
        result
    }

    pub async fn fetch_requests(&mut self) -> ClientResult<&[RequestResponse]> {
        let result = self.api.list_requests().await;
        self.requests = self.record(result)?;
        Ok(&self.requests)
    }

    pub async fn fetch_request_types(&mut self) -> ClientResult<&[RequestTypeResponse]> {
        let result = self.api.list_request_types().await;
        self.request_types = self.record(result)?;
        Ok(&self.request_types)
    }

    pub async fn create_request(&mut self, input: &NewRequestInput) -> ClientResult<RequestResponse> {
        let result = self.api.create_request(input.to_body()).await;
        let created = self.record(result)?;
        self.requests.push(created.clone());
        Ok(created)
    }

    /// Sends a partial update and replaces the cached copy with the server's.
    pub async fn update_request(&mut self, id: Uuid, changes: Value) -> ClientResult<RequestResponse> {
        let result = self.api.update_request(id, changes).await;
        let updated = self.record(result)?;
        if let Some(slot) = self.requests.iter_mut().find(|request| request.id == id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    pub async fn delete_request(&mut self, id: Uuid) -> ClientResult<()> {
        let result = self.api.delete_request(id).await;
        self.record(result)?;
        self.requests.retain(|request| request.id != id);
        Ok(())
    }

    pub fn filtered(&self) -> Vec<&RequestResponse> {
        self.requests
            .iter()
            .filter(|request| self.filters.matches(request))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::client::fake::{request, request_type, FakeApi};

    fn seeded() -> (Arc<FakeApi>, RequestTypeResponse, RequestTypeResponse) {
        let transcript = request_type("Relevé de notes");
        let transfer = request_type("Transfert");
        let api = FakeApi {
            requests: Mutex::new(vec![
                request("REQ-1", "Relevé L3", "Soumise", "Normale", &transcript),
                request("REQ-2", "Changement de filière", "Validée", "Urgente", &transfer),
                request("REQ-3", "Relevé M1", "Validée", "Faible", &transcript),
            ]),
            request_types: vec![transcript.clone(), transfer.clone()],
            ..Default::default()
        };
        (Arc::new(api), transcript, transfer)
    }

    #[tokio::test]
    async fn filters_by_status_type_priority_and_search() {
        let (api, transcript, transfer) = seeded();
        let mut store = RequestsStore::new(api);
        store.fetch_requests().await.unwrap();
        store.fetch_request_types().await.unwrap();
        assert_eq!(store.request_types().len(), 2);
        assert_eq!(store.filtered().len(), 3);

        store.filters.status = Some(RequestStatus::Validated);
        assert_eq!(store.filtered().len(), 2);

        store.filters.request_type = Some(transcript.id);
        let refs: Vec<_> = store.filtered().iter().map(|r| r.reference.clone()).collect();
        assert_eq!(refs, vec!["REQ-3"]);

        store.filters = RequestFilters {
            priority: Some(Priority::Urgent),
            ..Default::default()
        };
        assert_eq!(store.filtered()[0].request_type.as_ref().unwrap().id, transfer.id);

        store.filters = RequestFilters {
            search: "relevé".into(),
            ..Default::default()
        };
        assert_eq!(store.filtered().len(), 2);

        store.filters.search = "TRANSFERT".into();
        assert_eq!(store.filtered().len(), 1);

        store.filters.search = "req-3".into();
        assert_eq!(store.filtered().len(), 1);
    }

    #[tokio::test]
    async fn create_applies_client_defaults() {
        let (api, transcript, _) = seeded();
        let mut store = RequestsStore::new(api.clone());
        store.fetch_requests().await.unwrap();

        let created = store
            .create_request(&NewRequestInput {
                student_id: Uuid::new_v4(),
                request_type_id: transcript.id,
                title: "Attestation".into(),
                description: "Pour bourse".into(),
                reference: None,
                priority: None,
            })
            .await
            .unwrap();

        let body = api.created_bodies.lock().unwrap()[0].clone();
        assert!(body["numero_reference"].as_str().unwrap().starts_with("REQ-"));
        assert_eq!(body["priorite"], "Normale");
        assert_eq!(store.requests().len(), 4);
        assert_eq!(created.title, "Attestation");
    }

    #[tokio::test]
    async fn update_and_delete_keep_cache_in_sync() {
        let (api, _, _) = seeded();
        let mut store = RequestsStore::new(api);
        store.fetch_requests().await.unwrap();
        let id = store.requests()[0].id;

        store
            .update_request(id, json!({"statut": "En traitement"}))
            .await
            .unwrap();
        assert_eq!(store.requests()[0].status, "En traitement");

        store.delete_request(id).await.unwrap();
        assert_eq!(store.requests().len(), 2);

        let err = store.delete_request(id).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(store.last_error().is_some());
        assert_eq!(store.requests().len(), 2);
    }
}

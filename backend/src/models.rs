use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::schema::*;

pub const USER_STATUS_ACTIVE: &str = "Actif";
pub const USER_STATUS_INACTIVE: &str = "Inactif";

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub matricule: String,
    pub last_name: String,
    pub first_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub faculty: Option<String>,
    pub department: Option<String>,
    pub created_at: NaiveDateTime,
    pub last_login_at: Option<NaiveDateTime>,
    pub status: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub matricule: String,
    pub last_name: String,
    pub first_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub faculty: Option<String>,
    pub department: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = request_types)]
pub struct RequestType {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub standard_delay_days: i32,
    pub required_documents: Vec<String>,
    pub form_schema: Option<Value>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = request_types)]
pub struct NewRequestType {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub standard_delay_days: i32,
    pub required_documents: Vec<String>,
    pub form_schema: Option<Value>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = requests)]
#[diesel(belongs_to(RequestType, foreign_key = request_type_id))]
pub struct StudentRequest {
    pub id: Uuid,
    pub reference: String,
    pub request_type_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub status: String,
    pub student_id: Uuid,
    pub assigned_agent_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub deadline: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = requests)]
pub struct NewStudentRequest {
    pub id: Uuid,
    pub reference: String,
    pub request_type_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub status: String,
    pub student_id: Uuid,
    pub assigned_agent_id: Option<Uuid>,
    pub deadline: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub filename: String,
    pub storage_path: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub request_id: Option<Uuid>,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub filename: String,
    pub storage_path: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub request_id: Option<Uuid>,
    pub uploaded_by: Option<Uuid>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = request_documents)]
pub struct NewRequestDocument {
    pub request_id: Uuid,
    pub document_id: Uuid,
    pub position: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = messages)]
#[diesel(belongs_to(StudentRequest, foreign_key = request_id))]
pub struct Message {
    pub id: Uuid,
    pub request_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub sent_at: NaiveDateTime,
    pub is_read: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub id: Uuid,
    pub request_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = message_documents)]
pub struct NewMessageDocument {
    pub message_id: Uuid,
    pub document_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = status_history)]
#[diesel(belongs_to(StudentRequest, foreign_key = request_id))]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub request_id: Uuid,
    pub old_status: String,
    pub new_status: String,
    pub comment: Option<String>,
    pub agent_id: Option<Uuid>,
    pub changed_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = status_history)]
pub struct NewStatusHistoryEntry {
    pub id: Uuid,
    pub request_id: Uuid,
    pub old_status: String,
    pub new_status: String,
    pub comment: Option<String>,
    pub agent_id: Option<Uuid>,
}

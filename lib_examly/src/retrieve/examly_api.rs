//! # Examly Backend API
//!
//! Typed wrappers for the authentication and exam endpoints. Every call except
//! `login` needs a session token and fails with `ApiError::Validation` before
//! touching the network when none is set.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::ky_http::{extract_detail, ApiClient, ApiError};

/// Authenticated user as returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub role: String,
}

impl User {
    pub fn is_teacher(&self) -> bool {
        self.role.eq_ignore_ascii_case("teacher")
    }

    /// Landing page for the user's role.
    pub fn home_route(&self) -> &'static str {
        if self.is_teacher() {
            "/teacher"
        } else {
            "/student"
        }
    }
}

/// A freshly issued session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebAppTokenResponse {
    #[serde(default)]
    ok: bool,
    token: Option<String>,
    user: Option<User>,
}

pub struct ExamlyApi {
    client: ApiClient,
}

impl ExamlyApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn connect(base_url: &str, token: Option<String>) -> Result<Self, ApiError> {
        Ok(Self::new(ApiClient::new(base_url, token)?))
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// The same API bound to a session token.
    pub fn authenticated(&self, token: impl Into<String>) -> Self {
        Self::new(self.client.with_token(Some(token.into())))
    }

    /// Exchanges a Telegram user id for a session token.
    pub async fn login(&self, telegram_id: Option<i64>) -> Result<Session, ApiError> {
        let telegram_id = match telegram_id {
            Some(id) if id != 0 => id,
            _ => {
                return Err(ApiError::Validation(
                    "Telegram session not found; open the WebApp from the bot button".into(),
                ))
            }
        };

        let response = self
            .client
            .request::<Value, _>(
                Method::POST,
                "api/bot/webapp-token",
                None,
                Some(&json!({ "telegram_id": telegram_id })),
            )
            .await?;

        const NOT_ISSUED: &str = "token was not issued";
        if !response.success {
            return Err(ApiError::Auth(response.detail().unwrap_or_else(|| NOT_ISSUED.into())));
        }

        let body = response.data.unwrap_or(Value::Null);
        let detail = extract_detail(&body.to_string());
        match serde_json::from_value::<WebAppTokenResponse>(body) {
            Ok(WebAppTokenResponse {
                ok: true,
                token: Some(token),
                user: Some(user),
            }) if !token.is_empty() => {
                log::info!("Session issued for telegram id {} (role {})", user.telegram_id, user.role);
                Ok(Session { token, user })
            }
            _ => Err(ApiError::Auth(detail.unwrap_or_else(|| NOT_ISSUED.into()))),
        }
    }

    pub async fn student_exams(&self) -> Result<Vec<Exam>, ApiError> {
        self.require_token()?;
        let body = self
            .client
            .request::<Value, ()>(Method::GET, "api/student/exams", None, None)
            .await?
            .into_result("Exams could not be loaded")?;
        exams_from(body)
    }

    /// Starts an attempt and returns its id.
    pub async fn start_exam(&self, exam_id: i64) -> Result<i64, ApiError> {
        self.require_token()?;
        let body = self
            .client
            .request::<Value, _>(
                Method::POST,
                &format!("api/student/exams/{}/start", exam_id),
                None,
                Some(&json!({})),
            )
            .await?
            .into_result("Exam could not be started")?;
        attempt_id_from(&body).ok_or(ApiError::MissingAttemptId)
    }

    pub async fn finish_attempt(&self, attempt_id: i64) -> Result<Value, ApiError> {
        self.require_token()?;
        self.client
            .request::<Value, _>(
                Method::POST,
                &format!("api/student/attempts/{}/finish", attempt_id),
                None,
                Some(&json!({})),
            )
            .await?
            .into_result("Attempt could not be finished")
    }

    pub async fn teacher_exams(&self) -> Result<Vec<Exam>, ApiError> {
        self.require_token()?;
        let body = self
            .client
            .request::<Value, ()>(Method::GET, "api/teacher/exams", None, None)
            .await?
            .into_result("Exams could not be loaded")?;
        exams_from(body)
    }

    pub async fn update_exam(&self, exam_id: i64, patch: &Value) -> Result<Value, ApiError> {
        self.require_token()?;
        self.client
            .request::<Value, _>(
                Method::PATCH,
                &format!("api/teacher/exams/{}", exam_id),
                None,
                Some(patch),
            )
            .await?
            .into_result("Exam could not be updated")
    }

    pub async fn assign_exam(&self, exam_id: i64, body: &Value) -> Result<Value, ApiError> {
        self.require_token()?;
        self.client
            .request::<Value, _>(
                Method::POST,
                &format!("api/teacher/exams/{}/assign", exam_id),
                None,
                Some(body),
            )
            .await?
            .into_result("Exam could not be assigned")
    }

    fn require_token(&self) -> Result<(), ApiError> {
        match self.client.auth_token() {
            Some(t) if !t.trim().is_empty() => Ok(()),
            _ => Err(ApiError::Validation("No session token; log in first".into())),
        }
    }
}

/// Exam lists come either as a bare array or wrapped in `{"items": [...]}`.
pub fn exams_from(body: Value) -> Result<Vec<Exam>, ApiError> {
    match body {
        Value::Array(_) => Ok(serde_json::from_value(body)?),
        Value::Object(mut map) => match map.remove("items") {
            Some(items @ Value::Array(_)) => Ok(serde_json::from_value(items)?),
            _ => Ok(Vec::new()),
        },
        _ => Ok(Vec::new()),
    }
}

/// First non-null of `attempt_id`, `attemptId`, `id`, `attempt.id`.
/// Numeric strings are accepted; zero counts as missing.
pub fn attempt_id_from(body: &Value) -> Option<i64> {
    let candidates = [
        body.get("attempt_id"),
        body.get("attemptId"),
        body.get("id"),
        body.get("attempt").and_then(|a| a.get("id")),
    ];
    let first = candidates.into_iter().flatten().find(|v| !v.is_null())?;
    let id = match first {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (id != 0).then_some(id)
}

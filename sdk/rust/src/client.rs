use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub type Error = Box<dyn std::error::Error>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub remaining_attempts: u32,
    pub reset_in_secs: u64,
    pub retry_after_secs: Option<u64>,
}

/// The user a policy question is asked about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

impl User {
    pub fn new(id: &str, role: &str) -> Self {
        Self {
            id: id.to_string(),
            role: role.to_string(),
            permissions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub owner_id: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RolePermissions {
    pub role: String,
    pub level: u8,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sanitized {
    pub kind: String,
    pub output: String,
    pub suspicious: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordCheck {
    pub valid: bool,
    pub score: u8,
    pub strength: String,
    pub entropy_bits: f64,
    pub issues: Vec<Value>,
    pub messages: Vec<String>,
}

/// Error body returned by the service for non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub status_code: u16,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "guard returned {}: {}", self.status_code, self.error)
    }
}

impl std::error::Error for ApiError {}

/// Async client for the guard's `/v1` API.
pub struct GuardClient {
    client: Client,
    base_url: String,
    user_id: Option<String>,
    service_token: Option<String>,
}

impl GuardClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: None,
            service_token: None,
        }
    }

    /// Send `x-user-id` on every request so throttling keys on the user.
    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    /// Bearer token required when the guard has `security.service_token` set.
    pub fn with_service_token(mut self, token: &str) -> Self {
        self.service_token = Some(token.to_string());
        self
    }

    /// Record an attempt for `identifier` and return the decision.
    pub async fn check_rate_limit(&self, identifier: &str, action: &str) -> Result<RateLimitStatus, Error> {
        self.post("/v1/rate-limit/check", &json!({ "identifier": identifier, "action": action }))
            .await
    }

    /// Decision for the next attempt without recording one.
    pub async fn peek_rate_limit(&self, identifier: &str, action: &str) -> Result<RateLimitStatus, Error> {
        self.post("/v1/rate-limit/peek", &json!({ "identifier": identifier, "action": action }))
            .await
    }

    /// Forget attempts for `identifier`, e.g. after a successful login.
    pub async fn reset_rate_limit(&self, identifier: &str, action: &str) -> Result<bool, Error> {
        let body: Value = self
            .post("/v1/rate-limit/reset", &json!({ "identifier": identifier, "action": action }))
            .await?;
        Ok(body["reset"].as_bool().unwrap_or(false))
    }

    pub async fn has_permission(&self, user: &User, permission: &str) -> Result<bool, Error> {
        let body: Value = self
            .post("/v1/authz/permission", &json!({ "user": user, "permission": permission }))
            .await?;
        Ok(body["allowed"].as_bool().unwrap_or(false))
    }

    pub async fn can_access_project(&self, user: &User, project: &Project) -> Result<bool, Error> {
        let body: Value = self
            .post("/v1/authz/project", &json!({ "user": user, "project": project }))
            .await?;
        Ok(body["allowed"].as_bool().unwrap_or(false))
    }

    pub async fn role_permissions(&self, role: &str) -> Result<RolePermissions, Error> {
        let req = self.client.get(format!("{}/v1/authz/roles/{}", self.base_url, role));
        self.send(req).await
    }

    pub async fn sanitize(&self, kind: &str, input: &str) -> Result<Sanitized, Error> {
        self.post("/v1/sanitize", &json!({ "kind": kind, "input": input }))
            .await
    }

    pub async fn sanitize_json(&self, value: &Value) -> Result<Value, Error> {
        self.post("/v1/sanitize/json", value).await
    }

    pub async fn validate_password(
        &self,
        password: &str,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<PasswordCheck, Error> {
        self.post(
            "/v1/password/validate",
            &json!({ "password": password, "context": { "email": email, "name": name } }),
        )
        .await
    }

    pub async fn generate_password(&self, length: Option<usize>) -> Result<String, Error> {
        let mut req = self.client.get(format!("{}/v1/password/generate", self.base_url));
        if let Some(length) = length {
            req = req.query(&[("length", length)]);
        }
        let body: Value = self.send(req).await?;
        body["password"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| "response had no password".into())
    }

    /// Perform a raw GET, e.g. for `/health`.
    pub async fn get(&self, path: &str) -> Result<Response, reqwest::Error> {
        self.with_user(self.client.get(format!("{}{}", self.base_url, path)))
            .send()
            .await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, Error> {
        let req = self.client.post(format!("{}{}", self.base_url, path)).json(body);
        self.send(req).await
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, Error> {
        let resp = self.with_user(req).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ApiError>(&text) {
                Ok(api_error) => api_error.into(),
                Err(_) => format!("Guard returned error status {}: {}", status, text).into(),
            });
        }

        Ok(serde_json::from_str(&text)?)
    }

    fn with_user(&self, req: RequestBuilder) -> RequestBuilder {
        let req = match &self.service_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        match &self.user_id {
            Some(id) => req.header("x-user-id", id),
            None => req,
        }
    }
}

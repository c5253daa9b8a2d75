//! Caller Profile Lookup
//!
//! Sessions are seeded with whatever the profile service knows about the caller.
//! The lookup is a plain keyed fetch; a missing profile is not an error.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::StatusCode;

/// Defines the contract for any service that can return a caller's profile.
#[async_trait]
pub trait ProfileService: Send + Sync {
    /// Fetches the profile for `user_id`.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the service has no profile for this user.
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<serde_json::Value>>;
}

/// A `ProfileService` backed by an HTTP endpoint.
///
/// The endpoint is given as a URL template in which `{user_id}` is replaced with
/// the caller's id. Templates without the placeholder are requested as-is, which
/// suits services that identify the caller from the bearer token alone.
pub struct HttpProfileService {
    client: reqwest::Client,
    url_template: String,
    bearer_token: Option<String>,
}

impl HttpProfileService {
    /// Creates a new HTTP profile client.
    ///
    /// # Arguments
    ///
    /// * `url_template` - Profile endpoint, optionally containing `{user_id}`.
    /// * `bearer_token` - Sent as `Authorization: Bearer ...` when present.
    pub fn new(url_template: String, bearer_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url_template,
            bearer_token,
        }
    }

    fn url_for(&self, user_id: &str) -> String {
        self.url_template.replace("{user_id}", user_id)
    }
}

#[async_trait]
impl ProfileService for HttpProfileService {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<serde_json::Value>> {
        let mut request = self.client.get(self.url_for(user_id));
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("Profile service request failed")?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let profile = response
                    .json::<serde_json::Value>()
                    .await
                    .context("Profile service returned invalid JSON")?;
                Ok(Some(profile))
            }
            status => Err(anyhow!("Profile service responded with {}", status)),
        }
    }
}

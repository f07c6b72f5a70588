//! Keystone v3 authentication session.
//!
//! Issues a password (or pre-provisioned token) authentication request and
//! extracts the scoped token, project id, and the public image endpoint
//! from the service catalog.

use serde_json::{json, Value};

use warden_core::config::CloudProfile;
use warden_core::{Result, WardenError};

/// Authenticated identity session holding everything the Glance client
/// needs: the token, the image endpoint, and the scoped project id.
#[derive(Debug, Clone)]
pub struct KeystoneSession {
    pub token: String,
    pub image_endpoint: String,
    pub project_id: Option<String>,
}

impl KeystoneSession {
    /// Authenticate against the identity service described by `profile`.
    pub async fn authenticate(profile: &CloudProfile) -> Result<Self> {
        let auth = &profile.auth;
        let auth_url = auth.auth_url.trim_end_matches('/');

        let payload = if let Some(token) = &auth.token {
            json!({
                "auth": {
                    "identity": {
                        "methods": ["token"],
                        "token": { "id": token }
                    },
                    "scope": Self::scope(profile)?
                }
            })
        } else {
            let username = auth.username.as_deref().ok_or_else(|| {
                WardenError::AuthError("username missing from cloud profile".to_string())
            })?;
            let password = auth.password.as_deref().ok_or_else(|| {
                WardenError::AuthError("password missing from cloud profile".to_string())
            })?;
            json!({
                "auth": {
                    "identity": {
                        "methods": ["password"],
                        "password": {
                            "user": {
                                "name": username,
                                "domain": {
                                    "name": auth.user_domain_name.as_deref().unwrap_or("Default")
                                },
                                "password": password
                            }
                        }
                    },
                    "scope": Self::scope(profile)?
                }
            })
        };

        let client = reqwest::Client::new();
        let response = client
            .post(format!("{auth_url}/auth/tokens"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| WardenError::AuthError(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WardenError::AuthError(format!(
                "token request rejected with status {status}"
            )));
        }

        let token = response
            .headers()
            .get("x-subject-token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                WardenError::AuthError("identity response carried no subject token".to_string())
            })?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| WardenError::AuthError(format!("unreadable token response: {e}")))?;

        let project_id = body["token"]["project"]["id"].as_str().map(str::to_string);
        let image_endpoint = Self::image_endpoint(&body, profile)?;

        tracing::debug!(endpoint = %image_endpoint, "Authenticated against identity service");

        Ok(Self {
            token,
            image_endpoint,
            project_id,
        })
    }

    fn scope(profile: &CloudProfile) -> Result<Value> {
        let auth = &profile.auth;
        if let Some(id) = &auth.project_id {
            return Ok(json!({ "project": { "id": id } }));
        }
        if let Some(name) = &auth.project_name {
            return Ok(json!({
                "project": {
                    "name": name,
                    "domain": {
                        "name": auth.project_domain_name.as_deref().unwrap_or("Default")
                    }
                }
            }));
        }
        Err(WardenError::AuthError(
            "cloud profile declares neither project_name nor project_id".to_string(),
        ))
    }

    /// Pick the image endpoint out of the service catalog, honoring the
    /// profile's interface and region preferences.
    fn image_endpoint(body: &Value, profile: &CloudProfile) -> Result<String> {
        let interface = profile.interface.as_deref().unwrap_or("public");
        let catalog = body["token"]["catalog"].as_array().ok_or_else(|| {
            WardenError::AuthError("token response carried no service catalog".to_string())
        })?;

        for service in catalog {
            if service["type"].as_str() != Some("image") {
                continue;
            }
            let endpoints = match service["endpoints"].as_array() {
                Some(endpoints) => endpoints,
                None => continue,
            };
            for endpoint in endpoints {
                if endpoint["interface"].as_str() != Some(interface) {
                    continue;
                }
                if let Some(region) = profile.region_name.as_deref() {
                    if endpoint["region"].as_str() != Some(region) {
                        continue;
                    }
                }
                if let Some(url) = endpoint["url"].as_str() {
                    return Ok(url.trim_end_matches('/').to_string());
                }
            }
        }

        Err(WardenError::AuthError(format!(
            "no {interface} image endpoint in the service catalog"
        )))
    }
}

//! Service principal token acquisition (OAuth2 client credentials).

use serde::Deserialize;

use crate::core::error::{DeployError, DeployResult};

/// Default Entra ID authority; `{tenant}` is substituted
pub const DEFAULT_TOKEN_URL: &str = "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token";

const FABRIC_SCOPE: &str = "https://api.fabric.microsoft.com/.default";

/// Service principal credentials, supplied by the caller (never read here)
#[derive(Clone)]
pub struct ClientCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Expand the `{tenant}` placeholder of a token endpoint template
pub fn token_endpoint(template: &str, tenant_id: &str) -> String {
    template.replace("{tenant}", tenant_id)
}

/// Exchange client credentials for a bearer token
pub async fn acquire_token(token_url: &str, credentials: &ClientCredentials) -> DeployResult<String> {
    let operation = "acquire access token";
    let url = token_endpoint(token_url, &credentials.tenant_id);

    let form = [
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
        ("grant_type", "client_credentials"),
        ("scope", FABRIC_SCOPE),
    ];

    let response = reqwest::Client::new()
        .post(&url)
        .form(&form)
        .send()
        .await
        .map_err(|e| DeployError::transport(operation, e))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(DeployError::remote(operation, status, body));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| DeployError::UnexpectedResponse {
            operation: operation.to_string(),
            reason: e.to_string(),
        })?;

    Ok(token.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_endpoint_substitutes_tenant() {
        assert_eq!(
            token_endpoint(DEFAULT_TOKEN_URL, "contoso"),
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = ClientCredentials {
            tenant_id: "t".to_string(),
            client_id: "c".to_string(),
            client_secret: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}

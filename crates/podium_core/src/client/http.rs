use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::ClientConfig;
use crate::error::{ErrorKind, PodiumError, Result, SerializableError};
use crate::session::{
    BoxFuture, BuilderApi, BuilderData, PublishResponse, SaveRequest, SaveResponse,
};

/// Error envelope returned by the server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: SerializableError,
}

fn network(e: reqwest::Error) -> PodiumError {
    PodiumError::Network(e.to_string())
}

/// Rebuild a typed error from a failed response.
fn error_from_response(status: u16, body: &str) -> PodiumError {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return PodiumError::from_kind(parsed.error.kind, parsed.error.message);
    }
    let kind = match status {
        422 | 400 => ErrorKind::Validation,
        409 => ErrorKind::Conflict,
        404 => ErrorKind::NotFound,
        _ => ErrorKind::Network,
    };
    PodiumError::from_kind(kind, format!("HTTP {}: {}", status, body))
}

/// [`BuilderApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBuilderApi {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpBuilderApi {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(network);
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_from_response(status.as_u16(), &body))
    }

    /// Create the website of an event.
    pub async fn create_website(&self, event_id: i64) -> Result<BuilderData> {
        let request = self
            .client
            .post(self.url(&format!("/api/events/{}/website", event_id)));
        let response = self.authorized(request).send().await.map_err(network)?;
        Self::decode(response).await
    }

    /// Load blocks and settings for opening a builder.
    pub async fn load_builder(&self, website_id: i64) -> Result<BuilderData> {
        let request = self
            .client
            .get(self.url(&format!("/api/websites/{}/builder", website_id)));
        let response = self.authorized(request).send().await.map_err(network)?;
        Self::decode(response).await
    }

    async fn send_save(&self, website_id: i64, request: &SaveRequest) -> Result<SaveResponse> {
        let url = self.url(&format!("/api/websites/{}/save", website_id));

        let builder = if request.is_multipart() {
            let mut form = Form::new().text("payload", serde_json::to_string(request)?);
            for attachment in &request.attachments {
                let mut part =
                    Part::bytes(attachment.bytes.clone()).file_name(attachment.filename.clone());
                if let Some(content_type) = &attachment.content_type {
                    part = part.mime_str(content_type).map_err(network)?;
                }
                form = form.part(attachment.field.clone(), part);
            }
            self.client.post(url).multipart(form)
        } else {
            self.client.post(url).json(request)
        };

        let response = self.authorized(builder).send().await.map_err(network)?;
        Self::decode(response).await
    }

    async fn send_published(&self, website_id: i64, published: bool) -> Result<PublishResponse> {
        let action = if published { "publish" } else { "unpublish" };
        let request = self
            .client
            .post(self.url(&format!("/api/websites/{}/{}", website_id, action)));
        let response = self.authorized(request).send().await.map_err(network)?;
        Self::decode(response).await
    }
}

impl BuilderApi for HttpBuilderApi {
    fn save<'a>(
        &'a self,
        website_id: i64,
        request: &'a SaveRequest,
    ) -> BoxFuture<'a, Result<SaveResponse>> {
        Box::pin(self.send_save(website_id, request))
    }

    fn set_published<'a>(
        &'a self,
        website_id: i64,
        published: bool,
    ) -> BoxFuture<'a, Result<PublishResponse>> {
        Box::pin(self.send_published(website_id, published))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_is_decoded() {
        let err = error_from_response(
            422,
            r#"{"error":{"kind":"validation","message":"block at position 0 is missing a type"}}"#,
        );
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("missing a type"));
    }

    #[test]
    fn test_status_fallback() {
        assert_eq!(error_from_response(409, "busy").kind(), ErrorKind::Conflict);
        assert_eq!(error_from_response(502, "").kind(), ErrorKind::Network);
    }
}

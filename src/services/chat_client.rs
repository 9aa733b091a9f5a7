use crate::services::chat::*;
use crate::services::http::{REQUEST_TIMEOUT, next_link, send_with_retry};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

#[derive(Deserialize)]
struct Items<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Webex REST client.
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ChatClient {
    pub fn new(base_url: String, token: String) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.client.request(method, url).bearer_auth(&self.token)
    }

    async fn check(resp: Response, url: &str) -> Result<Response, ChatError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        match status {
            StatusCode::NOT_FOUND => Err(ChatError::NotFound(url.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ChatError::Unauthorized),
            _ => {
                let body = resp.text().await.unwrap_or_default();
                Err(ChatError::Upstream(format!("{status} from {url}: {body}")))
            }
        }
    }

    async fn list_items<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ChatError> {
        let mut url = self.url(path);
        let mut builder = self.request(Method::GET, &url).query(query);
        let mut items = Vec::new();
        loop {
            let resp = send_with_retry(builder, "chat").await?;
            let resp = Self::check(resp, &url).await?;
            let next = next_link(resp.headers());
            let mut page: Items<T> = resp
                .json()
                .await
                .map_err(|e| ChatError::Upstream(format!("decoding {url}: {e}")))?;
            items.append(&mut page.items);
            match next {
                Some(next) => {
                    url = next;
                    builder = self.request(Method::GET, &url);
                }
                None => return Ok(items),
            }
        }
    }
}

#[async_trait::async_trait]
impl ChatService for ChatClient {
    async fn post_message(&self, to: &Destination, markdown: &str) -> Result<String, ChatError> {
        let url = self.url("messages");
        let body = ChatMessage::outbound(to, markdown);
        let resp = send_with_retry(self.request(Method::POST, &url).json(&body), "chat").await?;
        let resp = Self::check(resp, &url).await?;
        let posted: ChatMessage = resp
            .json()
            .await
            .map_err(|e| ChatError::Upstream(format!("decoding {url}: {e}")))?;
        posted
            .id
            .ok_or_else(|| ChatError::Upstream("posted message has no id".to_string()))
    }

    async fn list_rooms(&self, kind: Option<&str>) -> Result<Vec<Room>, ChatError> {
        let mut query = vec![("max", "1000".to_string())];
        if let Some(kind) = kind {
            query.push(("type", kind.to_string()));
        }
        self.list_items("rooms", &query).await
    }

    async fn list_people(&self, email: &str) -> Result<Vec<Person>, ChatError> {
        self.list_items("people", &[("email", email.to_string())])
            .await
    }

    async fn get_message(&self, id: &str) -> Result<ChatMessage, ChatError> {
        let url = self.url(&format!("messages/{id}"));
        let resp = send_with_retry(self.request(Method::GET, &url), "chat").await?;
        let resp = Self::check(resp, &url).await?;
        resp.json()
            .await
            .map_err(|e| ChatError::Upstream(format!("decoding {url}: {e}")))
    }
}

/// Wraps a real client but only logs outbound messages. Reads still go
/// through to the chat platform.
pub struct DryRunChat {
    inner: Arc<dyn ChatService>,
}

impl DryRunChat {
    pub fn new(inner: Arc<dyn ChatService>) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl ChatService for DryRunChat {
    async fn post_message(&self, to: &Destination, markdown: &str) -> Result<String, ChatError> {
        let id = format!("dry-run-{}", uuid::Uuid::new_v4().as_simple());
        tracing::info!(to = %to, message_id = %id, chars = markdown.chars().count(), "dry run: message not sent");
        Ok(id)
    }

    async fn list_rooms(&self, kind: Option<&str>) -> Result<Vec<Room>, ChatError> {
        self.inner.list_rooms(kind).await
    }

    async fn list_people(&self, email: &str) -> Result<Vec<Person>, ChatError> {
        self.inner.list_people(email).await
    }

    async fn get_message(&self, id: &str) -> Result<ChatMessage, ChatError> {
        self.inner.get_message(id).await
    }
}

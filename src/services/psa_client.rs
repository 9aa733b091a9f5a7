use crate::services::http::{REQUEST_TIMEOUT, next_link, send_with_retry};
use crate::services::psa::*;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;

#[derive(Debug, Clone)]
pub struct PsaClientConfig {
    pub base_url: String,
    pub company_id: String,
    pub public_key: String,
    pub private_key: String,
    pub client_id: String,
}

/// ConnectWise Manage REST client.
pub struct PsaClient {
    client: reqwest::Client,
    config: PsaClientConfig,
}

impl PsaClient {
    pub fn new(config: PsaClientConfig) -> Result<Self, PsaError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(
                format!("{}+{}", self.config.company_id, self.config.public_key),
                Some(&self.config.private_key),
            )
            .header("clientId", &self.config.client_id)
            .header("Accept", "application/json")
    }

    async fn check(resp: Response, url: &str) -> Result<Response, PsaError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        match status {
            StatusCode::NOT_FOUND => Err(PsaError::NotFound(url.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PsaError::Unauthorized),
            _ => {
                let body = resp.text().await.unwrap_or_default();
                Err(PsaError::Upstream(format!("{status} from {url}: {body}")))
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, PsaError> {
        let url = self.url(path);
        let resp = send_with_retry(self.request(Method::GET, &url).query(query), "psa").await?;
        let resp = Self::check(resp, &url).await?;
        resp.json::<T>()
            .await
            .map_err(|e| PsaError::Upstream(format!("decoding {url}: {e}")))
    }

    /// Follows `Link: <..>; rel="next"` until the last page.
    async fn list_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &PsaQuery,
    ) -> Result<Vec<T>, PsaError> {
        let mut url = self.url(path);
        let mut builder = self.request(Method::GET, &url).query(&query.to_pairs());
        let mut items = Vec::new();
        loop {
            let resp = send_with_retry(builder, "psa").await?;
            let resp = Self::check(resp, &url).await?;
            let next = next_link(resp.headers());
            let mut page: Vec<T> = resp
                .json()
                .await
                .map_err(|e| PsaError::Upstream(format!("decoding {url}: {e}")))?;
            items.append(&mut page);
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
impl PsaService for PsaClient {
    async fn get_ticket(&self, id: i32) -> Result<PsaTicket, PsaError> {
        self.get_json(&format!("service/tickets/{id}"), &[]).await
    }

    async fn list_tickets(&self, query: &PsaQuery) -> Result<Vec<PsaTicket>, PsaError> {
        self.list_json("service/tickets", query).await
    }

    async fn get_most_recent_note(&self, ticket_id: i32) -> Result<PsaNote, PsaError> {
        let path = format!("service/tickets/{ticket_id}/notes");
        let latest: Vec<PsaNote> = self
            .get_json(
                &path,
                &[
                    ("orderBy", "id desc".to_string()),
                    ("pageSize", "1".to_string()),
                ],
            )
            .await?;
        let Some(note) = latest.into_iter().next() else {
            return Err(PsaError::NotFound(format!("notes for ticket {ticket_id}")));
        };
        // the list view omits fields, so fetch the full note
        self.get_json(&format!("{path}/{}", note.id), &[]).await
    }

    async fn get_board(&self, id: i32) -> Result<PsaBoard, PsaError> {
        self.get_json(&format!("service/boards/{id}"), &[]).await
    }

    async fn list_boards(&self) -> Result<Vec<PsaBoard>, PsaError> {
        self.list_json("service/boards", &PsaQuery::default()).await
    }

    async fn list_board_statuses(&self, board_id: i32) -> Result<Vec<PsaBoardStatus>, PsaError> {
        self.list_json(
            &format!("service/boards/{board_id}/statuses"),
            &PsaQuery::default(),
        )
        .await
    }

    async fn get_company(&self, id: i32) -> Result<PsaCompany, PsaError> {
        self.get_json(&format!("company/companies/{id}"), &[]).await
    }

    async fn get_contact(&self, id: i32) -> Result<PsaContact, PsaError> {
        self.get_json(&format!("company/contacts/{id}"), &[]).await
    }

    async fn get_member(&self, id: i32) -> Result<PsaMember, PsaError> {
        self.get_json(&format!("system/members/{id}"), &[]).await
    }

    async fn list_members(&self, query: &PsaQuery) -> Result<Vec<PsaMember>, PsaError> {
        self.list_json("system/members", query).await
    }

    async fn list_callbacks(&self) -> Result<Vec<PsaCallback>, PsaError> {
        self.list_json("system/callbacks", &PsaQuery::default()).await
    }

    async fn post_callback(&self, callback: &PsaCallback) -> Result<PsaCallback, PsaError> {
        let url = self.url("system/callbacks");
        let resp = send_with_retry(self.request(Method::POST, &url).json(callback), "psa").await?;
        let resp = Self::check(resp, &url).await?;
        resp.json()
            .await
            .map_err(|e| PsaError::Upstream(format!("decoding {url}: {e}")))
    }

    async fn delete_callback(&self, id: i32) -> Result<(), PsaError> {
        let url = self.url(&format!("system/callbacks/{id}"));
        let resp = send_with_retry(self.request(Method::DELETE, &url), "psa").await?;
        Self::check(resp, &url).await?;
        Ok(())
    }
}

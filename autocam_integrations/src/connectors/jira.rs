//! Jira connector.
//!
//! Lists fabrication tickets through Jira's REST v2 search API and exposes
//! them as `WorkItem`s. Authentication uses basic auth with an API token.
//! Custom field ids are site-specific and configurable through `JiraConfig::fields`.

use async_trait::async_trait;
use autocam_core::config::{JiraConfig, JiraFieldMap};
use autocam_core::models::{Attachment, Ticket, WorkItem};
use autocam_core::reconcile::traits::SourceClient;
use autocam_core::{Error, Result};
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JiraSearchResponse {
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct JiraAttachment {
    id: String,
    filename: String,
    content: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Clone)]
pub struct JiraSourceClient {
    client: Client,
    api_base: String,
    username: String,
    password: String,
    jql: String,
    page_size: u32,
    fields: JiraFieldMap,
}

impl JiraSourceClient {
    #[instrument(level = "debug", skip(cfg), fields(server = %cfg.server_url))]
    pub fn new(cfg: &JiraConfig) -> Result<Self> {
        cfg.validate()?;
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(Error::tracker_http)?;
        Ok(Self {
            client,
            api_base: cfg.server_url.trim_end_matches('/').to_string(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            jql: cfg.jql.clone(),
            page_size: cfg.page_size,
            fields: cfg.fields.clone(),
        })
    }

    fn requested_fields(&self) -> String {
        [
            "summary",
            "attachment",
            self.fields.epic.as_str(),
            self.fields.quantity.as_str(),
            self.fields.material.as_str(),
            self.fields.thickness.as_str(),
        ]
        .join(",")
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, req: RequestBuilder, context: &str) -> Result<Response> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(Error::tracker_http)?;
        check_status(resp, context).await
    }

    fn work_item(&self, issue: JiraIssue) -> WorkItem {
        let text = |id: &str| issue.fields.get(id).and_then(field_text);
        let attachments = issue
            .fields
            .get("attachment")
            .cloned()
            .map(serde_json::from_value::<Vec<JiraAttachment>>)
            .and_then(|parsed| match parsed {
                Ok(list) => Some(list),
                Err(e) => {
                    tracing::warn!(ticket = %issue.key, error = %e, "unreadable attachment list");
                    None
                }
            })
            .unwrap_or_default()
            .into_iter()
            .map(|a| Attachment {
                id: a.id,
                filename: a.filename,
                content_url: a.content,
                size: a.size,
            })
            .collect();

        WorkItem {
            summary: text("summary"),
            epic_ref: text(&self.fields.epic),
            quantity: text(&self.fields.quantity),
            material: text(&self.fields.material),
            thickness: text(&self.fields.thickness),
            attachments,
            ..WorkItem::new(Ticket(issue.key.clone()))
        }
    }
}

async fn check_status(resp: Response, context: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Unauthorized(format!(
            "{context}: jira returned {status}"
        ))),
        StatusCode::NOT_FOUND => Err(Error::NotFound(format!("{context}: {snippet}"))),
        _ => Err(Error::BackendMessage(format!(
            "{context}: jira returned {status}: {snippet}"
        ))),
    }
}

/// Render a Jira field value as text.
///
/// Select lists come back as `{"value": ..}`, users and issue links as
/// `{"name": ..}` or `{"key": ..}`; numbers keep Jira's rendering (`3.0`).
fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => ["value", "name", "key"]
            .iter()
            .find_map(|k| map.get(*k).and_then(field_text)),
        _ => None,
    }
}

#[async_trait]
impl SourceClient for JiraSourceClient {
    #[instrument(level = "info", skip(self))]
    async fn list_qualifying_items(&self) -> Result<Vec<WorkItem>> {
        let fields = self.requested_fields();
        let mut items = Vec::new();
        let mut start_at: u64 = 0;
        loop {
            let req = self
                .client
                .get(format!("{}/rest/api/2/search", self.api_base))
                .query(&[
                    ("jql", self.jql.as_str()),
                    ("fields", fields.as_str()),
                    ("startAt", start_at.to_string().as_str()),
                    ("maxResults", self.page_size.to_string().as_str()),
                ]);
            let page: JiraSearchResponse = self
                .send(req, "jira search")
                .await?
                .json()
                .await
                .map_err(Error::tracker_http)?;

            if page.issues.is_empty() {
                break;
            }
            start_at += page.issues.len() as u64;
            items.extend(page.issues.into_iter().map(|issue| self.work_item(issue)));

            if page.total.is_some_and(|total| start_at >= total) {
                break;
            }
        }
        tracing::debug!(count = items.len(), "jira search complete");
        Ok(items)
    }

    #[instrument(level = "debug", skip(self))]
    async fn resolve_epic_summary(&self, epic_ref: &str) -> Result<String> {
        let req = self
            .client
            .get(format!("{}/rest/api/2/issue/{epic_ref}", self.api_base))
            .query(&[("fields", "summary")]);
        let issue: JiraIssue = self
            .send(req, "jira epic lookup")
            .await?
            .json()
            .await
            .map_err(Error::tracker_http)?;
        issue
            .fields
            .get("summary")
            .and_then(field_text)
            .ok_or_else(|| Error::BackendMessage(format!("epic {epic_ref} has no summary field")))
    }

    #[instrument(level = "debug", skip_all, fields(filename = %attachment.filename))]
    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Bytes> {
        let req = self.client.get(&attachment.content_url);
        self.send(req, "jira attachment download")
            .await?
            .bytes()
            .await
            .map_err(Error::tracker_http)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autocam_core::config::DEFAULT_JQL;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BOT_AUTH: &str = "Basic Ym90OnNlY3JldA==";

    fn config(server: &MockServer, page_size: u32) -> JiraConfig {
        JiraConfig {
            server_url: server.uri(),
            username: "bot".to_string(),
            password: "secret".to_string(),
            jql: DEFAULT_JQL.to_string(),
            page_size,
            timeout: Duration::from_secs(1),
            fields: JiraFieldMap::default(),
        }
    }

    fn client(server: &MockServer, page_size: u32) -> JiraSourceClient {
        JiraSourceClient::new(&config(server, page_size)).expect("client")
    }

    fn issue(key: &str, summary: &str) -> Value {
        json!({
            "key": key,
            "fields": {
                "summary": summary,
                "customfield_10110": "HW-100",
                "customfield_10206": 3.0,
                "customfield_10202": { "value": "AL" },
                "customfield_10207": "0.25",
                "attachment": [
                    {
                        "id": "10",
                        "filename": "drawing.pdf",
                        "content": "https://jira.example/attachments/10",
                        "size": 1200
                    },
                    {
                        "id": "11",
                        "filename": "bracket.step",
                        "content": "https://jira.example/attachments/11"
                    }
                ]
            }
        })
    }

    #[tokio::test]
    async fn lists_items_across_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .and(query_param("startAt", "0"))
            .and(query_param("maxResults", "2"))
            .and(query_param("jql", DEFAULT_JQL))
            .and(header("authorization", BOT_AUTH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "startAt": 0,
                "maxResults": 2,
                "total": 3,
                "issues": [issue("HW-1", "Bracket"), issue("HW-2", "Plate")]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .and(query_param("startAt", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "startAt": 2,
                "maxResults": 2,
                "total": 3,
                "issues": [issue("HW-3", "Gusset")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let items = client(&server, 2)
            .list_qualifying_items()
            .await
            .expect("items");

        let tickets: Vec<&str> = items.iter().map(|i| i.ticket.as_str()).collect();
        assert_eq!(tickets, vec!["HW-1", "HW-2", "HW-3"]);

        let first = &items[0];
        assert_eq!(first.summary.as_deref(), Some("Bracket"));
        assert_eq!(first.epic_ref.as_deref(), Some("HW-100"));
        assert_eq!(first.quantity.as_deref(), Some("3.0"));
        assert_eq!(first.material.as_deref(), Some("AL"));
        assert_eq!(first.thickness.as_deref(), Some("0.25"));
        assert_eq!(first.attachments.len(), 2);
        assert_eq!(
            first.design_attachment().map(|a| a.content_url.as_str()),
            Some("https://jira.example/attachments/11")
        );
    }

    #[tokio::test]
    async fn empty_result_is_zero_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "startAt": 0,
                "maxResults": 50,
                "total": 0,
                "issues": []
            })))
            .mount(&server)
            .await;

        let items = client(&server, 50)
            .list_qualifying_items()
            .await
            .expect("items");
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn rejected_credentials_are_unauthorized_not_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let err = client(&server, 50)
            .list_qualifying_items()
            .await
            .expect_err("401");
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn server_error_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client(&server, 50)
            .list_qualifying_items()
            .await
            .expect_err("503");
        assert!(matches!(err, Error::BackendMessage(msg) if msg.contains("maintenance")));
    }

    #[tokio::test]
    async fn hung_tracker_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let err = client(&server, 50)
            .list_qualifying_items()
            .await
            .expect_err("timeout");
        assert!(matches!(err, Error::Backend { .. }));
    }

    #[tokio::test]
    async fn resolves_epic_summary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/issue/HW-100"))
            .and(query_param("fields", "summary"))
            .and(header("authorization", BOT_AUTH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "key": "HW-100",
                "fields": { "summary": "E1" }
            })))
            .mount(&server)
            .await;

        let summary = client(&server, 50)
            .resolve_epic_summary("HW-100")
            .await
            .expect("summary");
        assert_eq!(summary, "E1");
    }

    #[tokio::test]
    async fn missing_epic_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/issue/HW-404"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Issue does not exist"))
            .mount(&server)
            .await;

        let err = client(&server, 50)
            .resolve_epic_summary("HW-404")
            .await
            .expect_err("404");
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn reads_site_specific_field_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .and(query_param(
                "fields",
                "summary,attachment,customfield_1,customfield_2,customfield_3,customfield_4",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 1,
                "issues": [{
                    "key": "HW-9",
                    "fields": {
                        "summary": "Spacer",
                        "customfield_1": "HW-100",
                        "customfield_2": "2",
                        "customfield_3": { "value": "ST" },
                        "customfield_4": 0.5
                    }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut cfg = config(&server, 50);
        cfg.fields = JiraFieldMap {
            epic: "customfield_1".to_string(),
            quantity: "customfield_2".to_string(),
            material: "customfield_3".to_string(),
            thickness: "customfield_4".to_string(),
        };
        let items = JiraSourceClient::new(&cfg)
            .expect("client")
            .list_qualifying_items()
            .await
            .expect("items");

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].epic_ref.as_deref(), Some("HW-100"));
        assert_eq!(items[0].quantity.as_deref(), Some("2"));
        assert_eq!(items[0].material.as_deref(), Some("ST"));
        assert_eq!(items[0].thickness.as_deref(), Some("0.5"));
        assert!(items[0].attachments.is_empty());
    }

    #[tokio::test]
    async fn downloads_attachment_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secure/attachment/11/bracket.step"))
            .and(header("authorization", BOT_AUTH))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ISO-10303-21;".to_vec()))
            .mount(&server)
            .await;

        let attachment = Attachment {
            id: "11".to_string(),
            filename: "bracket.step".to_string(),
            content_url: format!("{}/secure/attachment/11/bracket.step", server.uri()),
            size: None,
        };
        let body = client(&server, 50)
            .fetch_attachment(&attachment)
            .await
            .expect("body");
        assert_eq!(body, Bytes::from_static(b"ISO-10303-21;"));
    }

    #[test]
    fn renders_field_shapes() {
        assert_eq!(field_text(&json!("AL")), Some("AL".to_string()));
        assert_eq!(field_text(&json!(3)), Some("3".to_string()));
        assert_eq!(field_text(&json!({ "value": "ST" })), Some("ST".to_string()));
        assert_eq!(field_text(&json!({ "key": "HW-7" })), Some("HW-7".to_string()));
        assert_eq!(field_text(&Value::Null), None);
    }
}

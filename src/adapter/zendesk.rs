//! Zendesk REST implementation of the adapter traits.
//!
//! Basic auth with `{email}/token`, JSON bodies, `next_page` pagination.
//! Every request goes through the [`RetryPolicy`].

use async_trait::async_trait;
use opentelemetry::KeyValue;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

use super::retry::RetryPolicy;
use super::{TicketFilter, TicketQuery, TicketSource, UserDirectory, iso_utc};
use crate::config::Config;
use crate::config::secrets::{ExposeSecret, SecretString};
use crate::error::{Error, Result};
use crate::model::{
    AuditEvent, SideConversation, Ticket, TicketId, User, UserId, UserIdentity, Via,
};
use crate::telemetry::metrics;

const REQUEST_TIMEOUT_SECS: u64 = 30;
/// `show_many` accepts at most this many ids per call.
const SHOW_MANY_CHUNK: usize = 100;

pub struct ZendeskClient {
    base_url: String,
    email: String,
    api_token: SecretString,
    page_size: u32,
    retry: RetryPolicy,
    client: Client,
}

impl std::fmt::Debug for ZendeskClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZendeskClient")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("api_token", &"<redacted>")
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl ZendeskClient {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_base_url(
            config.base_url(),
            config.email.clone(),
            config.api_token.clone(),
            config.page_size,
            config.retry.clone(),
        )
    }

    /// Build against an explicit base URL (`https://host`, or a mock server).
    pub fn with_base_url(
        base_url: impl Into<String>,
        email: impl Into<String>,
        api_token: SecretString,
        page_size: u32,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("helpdesk base URL is empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            email: email.into(),
            api_token,
            page_size: page_size.max(1),
            retry,
            client,
        })
    }

    /// Check credentials and connectivity.
    pub async fn preflight(&self) -> Result<()> {
        let url = self.url("/api/v2/account.json", &[])?;
        match self.request(Method::GET, &url, None).await? {
            Some(_) => {
                info!(base_url = %self.base_url, "connected to helpdesk");
                Ok(())
            }
            None => Err(Error::Config(format!(
                "preflight failed: {url} returned 404"
            ))),
        }
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let raw = format!("{}{}", self.base_url, path);
        let url = if params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, params)
        };
        url.map_err(|e| Error::Config(format!("bad helpdesk URL {raw}: {e}")))
    }

    /// Send one request with retries. `Ok(None)` means 404.
    async fn request(
        &self,
        method: Method,
        url: &Url,
        body: Option<&serde_json::Value>,
    ) -> Result<Option<String>> {
        self.send(method, url, body, Error::is_retryable).await
    }

    async fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<&serde_json::Value>,
        retryable: fn(&Error) -> bool,
    ) -> Result<Option<String>> {
        let what = format!("{method} {}", url.path());
        self.retry
            .run_when(&what, retryable, || {
                let method = method.clone();
                async move {
                    let mut req = self
                        .client
                        .request(method.clone(), url.clone())
                        .basic_auth(
                            format!("{}/token", self.email),
                            Some(self.api_token.expose_secret()),
                        );
                    if let Some(body) = body {
                        req = req.json(body);
                    }
                    let resp = req.send().await?;
                    let status = resp.status();
                    metrics::api_requests().add(
                        1,
                        &[
                            KeyValue::new("method", method.to_string()),
                            KeyValue::new("status", i64::from(status.as_u16())),
                        ],
                    );

                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status.is_success() {
                        return Ok(Some(resp.text().await?));
                    }

                    let retry_after = resp
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<f64>().ok())
                        .filter(|secs| secs.is_finite() && *secs >= 0.0)
                        .map(Duration::from_secs_f64);
                    let body = resp.text().await.unwrap_or_default();
                    Err::<Option<String>, Error>(Error::Api {
                        status: status.as_u16(),
                        body,
                        retry_after,
                    })
                }
            })
            .await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<Option<T>> {
        match self.request(Method::GET, url, None).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// A write where 404 is a failure, not a miss.
    async fn write(&self, method: Method, url: &Url, body: &serde_json::Value) -> Result<()> {
        self.write_when(method, url, body, Error::is_retryable).await
    }

    async fn write_when(
        &self,
        method: Method,
        url: &Url,
        body: &serde_json::Value,
        retryable: fn(&Error) -> bool,
    ) -> Result<()> {
        match self.send(method, url, Some(body), retryable).await? {
            Some(_) => Ok(()),
            None => Err(Error::api(404, format!("{} not found", url.path()))),
        }
    }

    /// Walk `next_page` links, collecting every item.
    async fn paginate<P>(&self, first: Url) -> Result<Vec<P::Item>>
    where
        P: Paged,
    {
        let mut items = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next.take() {
            let Some(page) = self.get_json::<P>(&url).await? else {
                break;
            };
            let (mut batch, next_page) = page.into_parts();
            items.append(&mut batch);
            next = match next_page {
                Some(link) => Some(
                    Url::parse(&link)
                        .map_err(|e| Error::Other(format!("bad next_page link {link}: {e}")))?,
                ),
                None => None,
            };
        }
        Ok(items)
    }

    fn search_url(&self, query: &str) -> Result<Url> {
        self.url(
            "/api/v2/search.json",
            &[
                ("query", query.to_string()),
                ("per_page", self.page_size.to_string()),
            ],
        )
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

trait Paged: DeserializeOwned {
    type Item;
    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

#[derive(Deserialize)]
struct TicketPage {
    #[serde(default)]
    tickets: Vec<Ticket>,
    #[serde(default)]
    next_page: Option<String>,
}

impl Paged for TicketPage {
    type Item = Ticket;
    fn into_parts(self) -> (Vec<Ticket>, Option<String>) {
        (self.tickets, self.next_page)
    }
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<Ticket>,
    #[serde(default)]
    next_page: Option<String>,
}

impl Paged for SearchPage {
    type Item = Ticket;
    fn into_parts(self) -> (Vec<Ticket>, Option<String>) {
        (self.results, self.next_page)
    }
}

#[derive(Deserialize)]
struct WireAuditEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    via: Option<Via>,
    #[serde(default)]
    public: Option<bool>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    author_id: Option<UserId>,
}

#[derive(Deserialize)]
struct WireAudit {
    id: u64,
    created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    author_id: Option<UserId>,
    #[serde(default)]
    via: Option<Via>,
    #[serde(default)]
    events: Vec<WireAuditEvent>,
}

impl WireAudit {
    /// Events inherit the audit's via, author and timestamp.
    fn flatten(self) -> Vec<AuditEvent> {
        let WireAudit {
            id,
            created_at,
            author_id,
            via,
            events,
        } = self;
        events
            .into_iter()
            .map(|e| AuditEvent {
                audit_id: id,
                kind: e.kind,
                via: e.via.or_else(|| via.clone()),
                public: e.public,
                body: e.body,
                author_id: e.author_id.or(author_id),
                created_at,
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct AuditPage {
    #[serde(default)]
    audits: Vec<WireAudit>,
    #[serde(default)]
    next_page: Option<String>,
}

impl Paged for AuditPage {
    type Item = WireAudit;
    fn into_parts(self) -> (Vec<WireAudit>, Option<String>) {
        (self.audits, self.next_page)
    }
}

#[derive(Deserialize, Default)]
struct ExternalIds {
    #[serde(
        rename = "targetTicketId",
        default,
        deserialize_with = "crate::model::lenient_id"
    )]
    target_ticket_id: Option<u64>,
}

#[derive(Deserialize)]
struct WireSideConversation {
    id: serde_json::Value,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    external_ids: Option<ExternalIds>,
}

impl From<WireSideConversation> for SideConversation {
    fn from(w: WireSideConversation) -> Self {
        let id = match w.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        SideConversation {
            id,
            subject: w.subject,
            target_ticket_id: w
                .external_ids
                .and_then(|e| e.target_ticket_id)
                .map(TicketId),
            created_at: w.created_at,
        }
    }
}

#[derive(Deserialize)]
struct SideConversationPage {
    #[serde(default)]
    side_conversations: Vec<WireSideConversation>,
    #[serde(default)]
    next_page: Option<String>,
}

impl Paged for SideConversationPage {
    type Item = WireSideConversation;
    fn into_parts(self) -> (Vec<WireSideConversation>, Option<String>) {
        (self.side_conversations, self.next_page)
    }
}

#[derive(Deserialize)]
struct TicketEnvelope {
    ticket: Ticket,
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Deserialize)]
struct UsersEnvelope {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Deserialize)]
struct IdentitiesEnvelope {
    #[serde(default)]
    identities: Vec<UserIdentity>,
}

#[derive(Deserialize)]
struct Organization {
    #[serde(default)]
    domain_names: Vec<String>,
}

#[derive(Deserialize)]
struct OrganizationEnvelope {
    organization: Organization,
}

const SOURCE_GONE: &[&str] = &[
    "is closed",
    "is already closed",
    "is already merged",
    "was already merged",
    "has already been merged",
    "has been merged",
    "has been closed",
];

/// Merging a source that is already closed or merged is a no-op on our side.
///
/// Only a clause that names the source ticket counts; a closed target is a
/// real failure.
fn is_already_merged(body: &str, source: TicketId) -> bool {
    let body = body.to_lowercase();
    let needle = format!("ticket {source}");
    body.match_indices(&needle).any(|(at, _)| {
        let rest = &body[at + needle.len()..];
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            return false;
        }
        let rest = rest.trim_start_matches(|c: char| c == ')' || c.is_whitespace());
        SOURCE_GONE.iter().any(|phrase| rest.starts_with(phrase))
    })
}

// ---------------------------------------------------------------------------
// Trait impls
// ---------------------------------------------------------------------------

#[async_trait]
impl TicketSource for ZendeskClient {
    async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>> {
        match filter {
            TicketFilter::View(view_id) => {
                let url = self.url(
                    &format!("/api/v2/views/{view_id}/tickets.json"),
                    &[("per_page", self.page_size.to_string())],
                )?;
                self.paginate::<TicketPage>(url).await
            }
            TicketFilter::CreatedSince(since) => {
                let url = self.search_url(&format!("type:ticket created>{}", iso_utc(*since)))?;
                self.paginate::<SearchPage>(url).await
            }
            TicketFilter::Query(query) => {
                let url = self.search_url(&TicketQuery::to_search_query(query))?;
                self.paginate::<SearchPage>(url).await
            }
        }
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        let url = self.url(&format!("/api/v2/tickets/{id}.json"), &[])?;
        Ok(self
            .get_json::<TicketEnvelope>(&url)
            .await?
            .map(|e| e.ticket))
    }

    async fn get_ticket_audits(&self, id: TicketId) -> Result<Vec<AuditEvent>> {
        let url = self.url(&format!("/api/v2/tickets/{id}/audits.json"), &[])?;
        let audits = self.paginate::<AuditPage>(url).await?;
        Ok(audits.into_iter().flat_map(WireAudit::flatten).collect())
    }

    async fn list_side_conversations(&self, id: TicketId) -> Result<Vec<SideConversation>> {
        let url = self.url(&format!("/api/v2/tickets/{id}/side_conversations.json"), &[])?;
        let items = self.paginate::<SideConversationPage>(url).await?;
        Ok(items.into_iter().map(SideConversation::from).collect())
    }

    async fn set_custom_field(
        &self,
        id: TicketId,
        field_id: u64,
        value: &serde_json::Value,
    ) -> Result<()> {
        let url = self.url(&format!("/api/v2/tickets/{id}.json"), &[])?;
        let body = json!({
            "ticket": { "custom_fields": [ { "id": field_id, "value": value } ] }
        });
        self.write(Method::PUT, &url, &body).await
    }

    async fn post_comment(&self, id: TicketId, body: &str, public: bool) -> Result<()> {
        let url = self.url(&format!("/api/v2/tickets/{id}.json"), &[])?;
        let payload = json!({
            "ticket": { "comment": { "body": body, "public": public } }
        });
        // Comments are not idempotent: a timed-out PUT may already have
        // landed, so only an explicit 429 is sent again.
        self.write_when(Method::PUT, &url, &payload, Error::is_rate_limited)
            .await
    }

    async fn merge(&self, source: TicketId, target: TicketId) -> Result<()> {
        let url = self.url(&format!("/api/v2/tickets/{target}/merge.json"), &[])?;
        let body = json!({ "ids": [source.0] });
        match self.write(Method::POST, &url, &body).await {
            Err(Error::Api { status: 422, body, .. }) if is_already_merged(&body, source) => {
                debug!(%source, %target, "source already merged");
                Ok(())
            }
            other => other,
        }
    }
}

#[async_trait]
impl UserDirectory for ZendeskClient {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let url = self.url(&format!("/api/v2/users/{id}.json"), &[])?;
        Ok(self.get_json::<UserEnvelope>(&url).await?.map(|e| e.user))
    }

    async fn get_users_many(&self, ids: &[UserId]) -> Result<Vec<User>> {
        let mut users = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(SHOW_MANY_CHUNK) {
            let joined = chunk
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let url = self.url("/api/v2/users/show_many.json", &[("ids", joined)])?;
            if let Some(page) = self.get_json::<UsersEnvelope>(&url).await? {
                users.extend(page.users);
            }
        }
        Ok(users)
    }

    async fn get_user_identities(&self, id: UserId) -> Result<Vec<UserIdentity>> {
        let url = self.url(&format!("/api/v2/users/{id}/identities.json"), &[])?;
        Ok(self
            .get_json::<IdentitiesEnvelope>(&url)
            .await?
            .map(|e| e.identities)
            .unwrap_or_default())
    }

    async fn search_users(&self, term: &str) -> Result<Vec<User>> {
        let url = self.url("/api/v2/users/search.json", &[("query", term.to_string())])?;
        Ok(self
            .get_json::<UsersEnvelope>(&url)
            .await?
            .map(|e| e.users)
            .unwrap_or_default())
    }

    async fn merge_users(&self, source: UserId, target: UserId) -> Result<()> {
        let url = self.url(&format!("/api/v2/users/{source}/merge.json"), &[])?;
        let body = json!({ "user": { "id": target.0 } });
        // A vanished source was merged by an earlier run.
        match self.request(Method::PUT, &url, Some(&body)).await? {
            Some(_) => Ok(()),
            None => {
                debug!(%source, %target, "source user already gone");
                Ok(())
            }
        }
    }

    async fn get_organization_domains(&self, org_id: u64) -> Result<BTreeSet<String>> {
        let url = self.url(&format!("/api/v2/organizations/{org_id}.json"), &[])?;
        Ok(self
            .get_json::<OrganizationEnvelope>(&url)
            .await?
            .map(|e| {
                e.organization
                    .domain_names
                    .into_iter()
                    .map(|d| d.trim().to_lowercase())
                    .collect()
            })
            .unwrap_or_default())
    }
}

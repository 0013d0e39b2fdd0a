//! HTTP bus adapter.
//!
//! Thin `reqwest` client over the deaddrop server's REST surface. The
//! adapter does not retry: transient-failure handling belongs to the
//! coordination layer's retry policy so cursors are never advanced for
//! operations that failed.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use sc_domain::error::{Error, Result};

use crate::invite;
use crate::types::{
    ClaimedInvite, Envelope, IdentityGrant, NamespaceGrant, RoomGrant, SubscribeOutcome,
};
use crate::Deaddrop;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for a remote deaddrop server.
#[derive(Debug, Clone)]
pub struct RemoteBus {
    http: Client,
    base_url: String,
}

impl RemoteBus {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Derive the server base (`scheme://host[:port]`) from an `https://`
    /// invite URL.
    pub fn from_invite_url(invite_url: &str) -> Result<Self> {
        let rest = invite_url
            .strip_prefix("https://")
            .or_else(|| invite_url.strip_prefix("http://"))
            .ok_or_else(|| {
                Error::UnsupportedInvite(invite_url.chars().take(50).collect())
            })?;
        let scheme_len = invite_url.len() - rest.len();
        let host_end = rest.find('/').unwrap_or(rest.len());
        Self::new(&invite_url[..scheme_len + host_end])
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("POST {path}: {e}")))?;
        Self::decode(path, resp).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        secret: &str,
        after_mid: Option<&str>,
    ) -> Result<T> {
        let mut req = self
            .http
            .get(self.url(path))
            .header("X-Identity-Secret", secret);
        if let Some(mid) = after_mid {
            req = req.query(&[("after_mid", mid)]);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| Error::Http(format!("GET {path}: {e}")))?;
        Self::decode(path, resp).await
    }

    async fn decode<T: DeserializeOwned>(path: &str, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(Error::Auth(format!("{path} returned {status}: {body}")));
            }
            return Err(Error::Http(format!("{path} returned {status}: {body}")));
        }
        resp.json::<T>()
            .await
            .map_err(|e| Error::Http(format!("decoding {path} response: {e}")))
    }
}

#[derive(serde::Deserialize)]
struct SendResult {
    mid: String,
}

#[derive(serde::Deserialize)]
struct InviteResult {
    invite_url: String,
}

#[async_trait]
impl Deaddrop for RemoteBus {
    async fn create_namespace(&self, display_name: &str) -> Result<NamespaceGrant> {
        self.post_json(
            "/api/namespaces",
            &serde_json::json!({ "display_name": display_name }),
        )
        .await
    }

    async fn create_identity(
        &self,
        ns: &str,
        display_name: &str,
        ns_secret: &str,
    ) -> Result<IdentityGrant> {
        self.post_json(
            &format!("/api/namespaces/{ns}/identities"),
            &serde_json::json!({ "display_name": display_name, "ns_secret": ns_secret }),
        )
        .await
    }

    async fn create_room(
        &self,
        ns: &str,
        creator_secret: &str,
        display_name: &str,
    ) -> Result<RoomGrant> {
        self.post_json(
            &format!("/api/namespaces/{ns}/rooms"),
            &serde_json::json!({
                "display_name": display_name,
                "creator_secret": creator_secret,
            }),
        )
        .await
    }

    async fn add_room_member(
        &self,
        ns: &str,
        room_id: &str,
        identity_id: &str,
        secret: &str,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .post_json(
                &format!("/api/namespaces/{ns}/rooms/{room_id}/members"),
                &serde_json::json!({ "identity_id": identity_id, "secret": secret }),
            )
            .await?;
        Ok(())
    }

    async fn create_invite(
        &self,
        ns: &str,
        identity_id: &str,
        identity_secret: &str,
        ns_secret: &str,
        display_name: &str,
    ) -> Result<String> {
        let result: InviteResult = self
            .post_json(
                &format!("/api/namespaces/{ns}/invites"),
                &serde_json::json!({
                    "identity_id": identity_id,
                    "identity_secret": identity_secret,
                    "ns_secret": ns_secret,
                    "display_name": display_name,
                }),
            )
            .await?;
        Ok(result.invite_url)
    }

    async fn claim_invite(&self, invite_url: &str) -> Result<ClaimedInvite> {
        if invite::is_data_invite(invite_url) {
            return invite::parse_data_invite(invite_url);
        }
        let mut claimed: ClaimedInvite = self
            .post_json(
                "/api/invites/claim",
                &serde_json::json!({ "invite_url": invite_url }),
            )
            .await?;

        // Coordination metadata rides on the URL, not in the server record.
        let (room_id, coordinator_id) = invite::query_params(invite_url);
        if claimed.room_id.is_none() {
            claimed.room_id = room_id;
        }
        if claimed.coordinator_id.is_none() {
            claimed.coordinator_id = coordinator_id;
        }
        Ok(claimed)
    }

    async fn send_message(
        &self,
        ns: &str,
        from_secret: &str,
        to_id: &str,
        body: &str,
        content_type: &str,
    ) -> Result<String> {
        let result: SendResult = self
            .post_json(
                &format!("/api/namespaces/{ns}/messages"),
                &serde_json::json!({
                    "from_secret": from_secret,
                    "to_id": to_id,
                    "body": body,
                    "content_type": content_type,
                }),
            )
            .await?;
        Ok(result.mid)
    }

    async fn send_room_message(
        &self,
        ns: &str,
        room_id: &str,
        secret: &str,
        body: &str,
        content_type: &str,
    ) -> Result<String> {
        let result: SendResult = self
            .post_json(
                &format!("/api/namespaces/{ns}/rooms/{room_id}/messages"),
                &serde_json::json!({
                    "secret": secret,
                    "body": body,
                    "content_type": content_type,
                }),
            )
            .await?;
        Ok(result.mid)
    }

    async fn get_inbox(
        &self,
        ns: &str,
        identity_id: &str,
        secret: &str,
        after_mid: Option<&str>,
    ) -> Result<Vec<Envelope>> {
        self.get_json(
            &format!("/api/namespaces/{ns}/identities/{identity_id}/inbox"),
            secret,
            after_mid,
        )
        .await
    }

    async fn get_room_messages(
        &self,
        ns: &str,
        room_id: &str,
        secret: &str,
        after_mid: Option<&str>,
    ) -> Result<Vec<Envelope>> {
        self.get_json(
            &format!("/api/namespaces/{ns}/rooms/{room_id}/messages"),
            secret,
            after_mid,
        )
        .await
    }

    async fn subscribe(
        &self,
        ns: &str,
        secret: &str,
        topics: &BTreeMap<String, Option<String>>,
        timeout: Duration,
    ) -> Result<SubscribeOutcome> {
        // The server holds the request open for up to `timeout`; give the
        // HTTP layer headroom beyond that.
        let resp = self
            .http
            .post(self.url(&format!("/api/namespaces/{ns}/subscribe")))
            .timeout(timeout + Duration::from_secs(5))
            .json(&serde_json::json!({
                "secret": secret,
                "topics": topics,
                "timeout_s": timeout.as_secs(),
            }))
            .send()
            .await
            .map_err(|e| Error::Http(format!("subscribe: {e}")))?;
        Self::decode("subscribe", resp).await
    }

    fn supports_push(&self) -> bool {
        true
    }

    fn location(&self) -> String {
        self.base_url.clone()
    }
}

//! REST client for the platform open API (item listing and replies).
//!
//! Every call carries the account's bearer token. Responses share one
//! envelope: `{err_no, err_msg, data}`; a non-zero `err_no` is reported as
//! `ChannelError::UpstreamApi`.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::config::DEFAULT_HTTP_TIMEOUT;
use crate::error::ChannelError;

/// One comment under a live room or a short video.
///
/// Missing or `null` fields decode to their defaults so one incomplete item
/// cannot fail the whole page; items without an id are skipped by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentItem {
    #[serde(default, deserialize_with = "null_as_default")]
    pub comment_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub nickname: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub avatar: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comment_text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub create_time: i64,
}

/// One private message received by the account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageItem {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub conversation_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub nickname: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub avatar: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub create_time: i64,
}

/// Decode `null` as the type's default value.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A page of listed items.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
    #[serde(default)]
    pub cursor: i64,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    err_no: i64,
    #[serde(default)]
    err_msg: String,
    data: Option<T>,
}

/// Authenticated client for one account.
pub struct PlatformApi {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl PlatformApi {
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn list_live_comments(
        &self,
        room_id: &str,
        count: u32,
        cursor: i64,
    ) -> Result<Page<CommentItem>, ChannelError> {
        self.get(
            "/live/comment/list",
            &[
                ("room_id", room_id.to_string()),
                ("count", count.to_string()),
                ("cursor", cursor.to_string()),
            ],
        )
        .await
    }

    pub async fn list_video_comments(
        &self,
        item_id: &str,
        count: u32,
        cursor: i64,
    ) -> Result<Page<CommentItem>, ChannelError> {
        self.get(
            "/video/comment/list",
            &[
                ("item_id", item_id.to_string()),
                ("count", count.to_string()),
                ("cursor", cursor.to_string()),
            ],
        )
        .await
    }

    pub async fn list_private_messages(
        &self,
        count: u32,
        cursor: i64,
    ) -> Result<Page<MessageItem>, ChannelError> {
        self.get(
            "/im/message/list",
            &[("count", count.to_string()), ("cursor", cursor.to_string())],
        )
        .await
    }

    pub async fn reply_live_comment(
        &self,
        room_id: &str,
        comment_id: &str,
        content: &str,
    ) -> Result<(), ChannelError> {
        self.post(
            "/live/comment/reply",
            json!({"room_id": room_id, "comment_id": comment_id, "content": content}),
        )
        .await
    }

    pub async fn reply_video_comment(
        &self,
        item_id: &str,
        comment_id: &str,
        content: &str,
    ) -> Result<(), ChannelError> {
        self.post(
            "/video/comment/reply",
            json!({"item_id": item_id, "comment_id": comment_id, "content": content}),
        )
        .await
    }

    pub async fn send_private_message(
        &self,
        conversation_id: &str,
        to_user_id: &str,
        content: &str,
    ) -> Result<(), ChannelError> {
        self.post(
            "/im/message/send",
            json!({
                "conversation_id": conversation_id,
                "to_user_id": to_user_id,
                "content": content,
                "message_type": "text",
            }),
        )
        .await
    }

    async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> Result<Page<T>, ChannelError>
    where
        T: DeserializeOwned,
    {
        tracing::debug!(path, "Calling platform API");
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await?;

        let envelope: Envelope<Page<T>> = Self::read_envelope(response).await?;
        Ok(envelope.data.unwrap_or(Page {
            list: Vec::new(),
            cursor: 0,
            has_more: false,
        }))
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), ChannelError> {
        tracing::debug!(path, "Calling platform API");
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await?;

        let _: Envelope<serde_json::Value> = Self::read_envelope(response).await?;
        Ok(())
    }

    async fn read_envelope<T>(response: reqwest::Response) -> Result<Envelope<T>, ChannelError>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ChannelError::UpstreamApi {
                code: i64::from(status.as_u16()),
                message: truncate(&body, 200),
            });
        }

        let envelope: Envelope<T> =
            serde_json::from_str(&body).map_err(|e| ChannelError::Parse(e.to_string()))?;

        if envelope.err_no != 0 {
            return Err(ChannelError::UpstreamApi {
                code: envelope.err_no,
                message: envelope.err_msg,
            });
        }
        Ok(envelope)
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

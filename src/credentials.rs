//! In-memory store of platform credentials keyed by account id.
//!
//! Populated by the OAuth callback and read when a channel is started for
//! an account. Nothing is persisted; a restart requires re-authorization.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tokio::sync::RwLock;

/// Credential and profile for one authorized platform account.
#[derive(Clone)]
pub struct AccountCredential {
    pub open_id: String,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_in: u64,
    pub scope: String,
    pub nickname: Option<String>,
    pub avatar: Option<String>,
    pub obtained_at: DateTime<Utc>,
}

impl AccountCredential {
    pub fn new(open_id: impl Into<String>, access_token: SecretString) -> Self {
        Self {
            open_id: open_id.into(),
            access_token,
            refresh_token: None,
            expires_in: 0,
            scope: String::new(),
            nickname: None,
            avatar: None,
            obtained_at: Utc::now(),
        }
    }

    /// Whether the access token is past its advertised lifetime.
    /// A zero lifetime means unknown and is never considered expired.
    pub fn is_expired(&self) -> bool {
        if self.expires_in == 0 {
            return false;
        }
        let age = Utc::now().signed_duration_since(self.obtained_at);
        age.num_seconds() >= self.expires_in as i64
    }
}

impl std::fmt::Debug for AccountCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountCredential")
            .field("open_id", &self.open_id)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("nickname", &self.nickname)
            .finish()
    }
}

/// Shared, lock-guarded credential map.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    accounts: Arc<RwLock<HashMap<String, AccountCredential>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a credential, replacing any previous one for the same account.
    pub async fn insert(&self, credential: AccountCredential) {
        tracing::info!(
            open_id = %credential.open_id,
            nickname = credential.nickname.as_deref().unwrap_or(""),
            "Stored account credential"
        );
        self.accounts
            .write()
            .await
            .insert(credential.open_id.clone(), credential);
    }

    pub async fn get(&self, open_id: &str) -> Option<AccountCredential> {
        self.accounts.read().await.get(open_id).cloned()
    }

    pub async fn access_token(&self, open_id: &str) -> Option<SecretString> {
        self.accounts
            .read()
            .await
            .get(open_id)
            .map(|c| c.access_token.clone())
    }

    pub async fn remove(&self, open_id: &str) -> bool {
        self.accounts.write().await.remove(open_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let store = CredentialStore::new();
        assert!(store.is_empty().await);

        store
            .insert(AccountCredential::new("open-1", SecretString::from("tok-1")))
            .await;

        let token = store.access_token("open-1").await.expect("token stored");
        assert_eq!(token.expose_secret(), "tok-1");
        assert!(store.access_token("open-2").await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_insert_replaces_previous() {
        let store = CredentialStore::new();
        store
            .insert(AccountCredential::new("open-1", SecretString::from("old")))
            .await;
        store
            .insert(AccountCredential::new("open-1", SecretString::from("new")))
            .await;

        let token = store.access_token("open-1").await.unwrap();
        assert_eq!(token.expose_secret(), "new");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = CredentialStore::new();
        store
            .insert(AccountCredential::new("open-1", SecretString::from("tok")))
            .await;
        assert!(store.remove("open-1").await);
        assert!(!store.remove("open-1").await);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let mut cred = AccountCredential::new("open-1", SecretString::from("super-secret"));
        cred.refresh_token = Some(SecretString::from("refresh-secret"));
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("refresh-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_expiry() {
        let mut cred = AccountCredential::new("open-1", SecretString::from("tok"));
        assert!(!cred.is_expired());
        cred.expires_in = 60;
        cred.obtained_at = Utc::now() - chrono::Duration::seconds(120);
        assert!(cred.is_expired());
    }
}

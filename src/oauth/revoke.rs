//! Credential revocation.
//!
//! Remote revocation is best effort. Whatever the provider says (or fails to
//! say), the revoked credential is deleted locally afterwards. A credential
//! stored in the meantime by a concurrent authorization is kept.

use crate::credentials::{CredentialRecord, CredentialStorage};
use anyhow::Result;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Revoker {
    revoke_url: String,
    http_client: Client,
    storage: Arc<dyn CredentialStorage>,
}

impl Revoker {
    pub fn new(revoke_url: String, http_client: Client, storage: Arc<dyn CredentialStorage>) -> Self {
        Self {
            revoke_url,
            http_client,
            storage,
        }
    }

    /// Revokes `record` remotely, then deletes it locally if it is still the
    /// stored credential.
    ///
    /// `None` is a no-op. Only a local storage failure is returned as an error.
    pub async fn revoke(&self, record: Option<&CredentialRecord>) -> Result<()> {
        let Some(record) = record else {
            debug!("Nothing to revoke");
            return Ok(());
        };

        self.notify_provider(record).await;

        let removed = self
            .storage
            .remove_token_if(&record.provider, &record.access_token)
            .await?;
        if removed {
            info!(provider = %record.provider, "Revoked credential");
        } else {
            info!(
                provider = %record.provider,
                "Revoked credential was already replaced; keeping the newer one"
            );
        }
        Ok(())
    }

    async fn notify_provider(&self, record: &CredentialRecord) {
        let result = self
            .http_client
            .post(&self.revoke_url)
            .bearer_auth(&record.access_token)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(provider = %record.provider, "Provider acknowledged revocation");
            }
            Ok(response) => warn!(
                provider = %record.provider,
                status = %response.status(),
                "Provider rejected revocation; clearing local credential anyway"
            ),
            Err(e) => warn!(
                provider = %record.provider,
                error = %e,
                "Error revoking token at provider; clearing local credential anyway"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::credentials::InMemoryCredentialStorage;
    use mockito::Server;

    const T: i64 = 1_700_000_000_000;

    fn record() -> CredentialRecord {
        CredentialRecord {
            access_token: "lin_abc".to_string(),
            provider: "linear".to_string(),
            expires_at: T + 3_600_000,
            created_at: T,
        }
    }

    async fn stored_storage() -> Arc<dyn CredentialStorage> {
        let storage: Arc<dyn CredentialStorage> =
            Arc::new(InMemoryCredentialStorage::new(Arc::new(ManualClock::new(T))));
        storage.store_token(&record()).await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_revoke_notifies_provider_and_clears() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/revoke")
            .match_header("authorization", "Bearer lin_abc")
            .with_status(200)
            .create_async()
            .await;

        let storage = stored_storage().await;
        let revoker = Revoker::new(
            format!("{}/oauth/revoke", server.url()),
            Client::new(),
            Arc::clone(&storage),
        );

        revoker.revoke(Some(&record())).await.unwrap();

        mock.assert_async().await;
        assert!(!storage.has_valid_token("linear").await.unwrap());
        assert!(storage.get_token("linear").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_clears_even_when_provider_errors() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/revoke")
            .with_status(500)
            .create_async()
            .await;

        let storage = stored_storage().await;
        let revoker = Revoker::new(
            format!("{}/oauth/revoke", server.url()),
            Client::new(),
            Arc::clone(&storage),
        );

        revoker.revoke(Some(&record())).await.unwrap();
        assert!(storage.get_token("linear").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_clears_when_provider_unreachable() {
        let storage = stored_storage().await;
        // Port 9 (discard) on localhost: connection refused.
        let revoker = Revoker::new(
            "http://127.0.0.1:9/oauth/revoke".to_string(),
            Client::new(),
            Arc::clone(&storage),
        );

        revoker.revoke(Some(&record())).await.unwrap();
        assert!(storage.get_token("linear").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_none_is_noop() {
        let storage = stored_storage().await;
        let revoker = Revoker::new(
            "http://127.0.0.1:9/oauth/revoke".to_string(),
            Client::new(),
            Arc::clone(&storage),
        );

        revoker.revoke(None).await.unwrap();
        assert!(storage.get_token("linear").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_revoke_keeps_credential_stored_meanwhile() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/revoke")
            .with_status(200)
            .create_async()
            .await;

        let storage = stored_storage().await;
        let newer = CredentialRecord {
            access_token: "lin_newer".to_string(),
            ..record()
        };
        storage.store_token(&newer).await.unwrap();

        let revoker = Revoker::new(
            format!("{}/oauth/revoke", server.url()),
            Client::new(),
            Arc::clone(&storage),
        );
        revoker.revoke(Some(&record())).await.unwrap();

        let kept = storage.get_token("linear").await.unwrap().unwrap();
        assert_eq!(kept.access_token, "lin_newer");
    }
}

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::flashcards::DeckSchedule;

use super::remote::{RemoteError, RemoteStore};

/// HTTP client for a JSON deck-schedule service.
///
/// Routes, relative to the base URL:
/// - `GET  /users/{user}/decks/{deck}` one schedule, 404 when absent
/// - `PUT  /users/{user}/decks/{deck}` upsert
/// - `GET  /users/{user}/decks`        every schedule of the user
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    user_id: String,
    token: RwLock<Option<String>>,
    token_file: Option<PathBuf>,
}

impl HttpRemoteStore {
    pub fn new(
        base_url: &str,
        user_id: &str,
        token: Option<String>,
        token_file: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(RemoteError::Permanent(
                "URL must start with http:// or https://".to_string(),
            ));
        }
        if user_id.is_empty() {
            return Err(RemoteError::Permanent("user id is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| RemoteError::Permanent(e.to_string()))?;

        let token = match token {
            Some(token) => Some(token),
            None => match &token_file {
                Some(path) => read_token(path).ok(),
                None => None,
            },
        };

        Ok(Self {
            client,
            base_url,
            user_id: user_id.to_string(),
            token: RwLock::new(token),
            token_file,
        })
    }

    fn decks_url(&self) -> String {
        format!(
            "{}/users/{}/decks",
            self.base_url,
            urlencoding::encode(&self.user_id)
        )
    }

    fn deck_url(&self, deck_id: &str) -> String {
        format!("{}/{}", self.decks_url(), urlencoding::encode(deck_id))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        self.authorize(request).send().await.map_err(classify_error)
    }
}

fn read_token(path: &Path) -> Result<String, RemoteError> {
    std::fs::read_to_string(path)
        .map(|token| token.trim().to_string())
        .map_err(|e| RemoteError::Permanent(format!("cannot read {}: {}", path.display(), e)))
}

/// Auth, timeouts, throttling and server faults may clear up on retry;
/// other client errors will not.
pub fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{} - {}", status, body)
    };
    match status {
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => RemoteError::Transient(message),
        s if s.is_server_error() => RemoteError::Transient(message),
        _ => RemoteError::Permanent(message),
    }
}

fn classify_error(error: reqwest::Error) -> RemoteError {
    if error.is_decode() || error.is_builder() {
        RemoteError::Permanent(error.to_string())
    } else {
        RemoteError::Transient(error.to_string())
    }
}

async fn error_for(response: Response) -> RemoteError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify_status(status, &body)
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch(&self, deck_id: &str) -> Result<Option<DeckSchedule>, RemoteError> {
        let response = self.send(self.client.get(self.deck_url(deck_id))).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let schedule = response.json::<DeckSchedule>().await.map_err(classify_error)?;
                Ok(Some(schedule))
            }
            _ => Err(error_for(response).await),
        }
    }

    async fn upsert(&self, deck_id: &str, schedule: &DeckSchedule) -> Result<(), RemoteError> {
        let request = self.client.put(self.deck_url(deck_id)).json(schedule);
        let response = self.send(request).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_for(response).await)
        }
    }

    async fn list_all(&self) -> Result<Vec<DeckSchedule>, RemoteError> {
        let response = self.send(self.client.get(self.decks_url())).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => response
                .json::<Vec<DeckSchedule>>()
                .await
                .map_err(classify_error),
            _ => Err(error_for(response).await),
        }
    }

    async fn refresh_credentials(&self) -> Result<(), RemoteError> {
        let Some(path) = &self.token_file else {
            return Ok(());
        };
        let token = read_token(path)?;
        log::debug!("Remote store: reloaded token from {}", path.display());
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HttpRemoteStore {
        HttpRemoteStore::new(
            "https://sr.example.com/api/",
            "user 1",
            Some("t0ken".into()),
            None,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_non_http_url() {
        let result = HttpRemoteStore::new("ftp://x", "u", None, None, Duration::from_secs(1));
        assert!(matches!(result, Err(RemoteError::Permanent(_))));
    }

    #[test]
    fn test_urls_are_escaped() {
        let store = store();
        assert_eq!(store.decks_url(), "https://sr.example.com/api/users/user%201/decks");
        assert_eq!(
            store.deck_url("bio/ch 1"),
            "https://sr.example.com/api/users/user%201/decks/bio%2Fch%201"
        );
    }

    #[test]
    fn test_status_classification() {
        for code in [401, 403, 408, 429, 500, 502, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(classify_status(status, "").is_transient(), "{}", code);
        }
        for code in [400, 409, 413, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(!classify_status(status, "nope").is_transient(), "{}", code);
        }
    }

    #[tokio::test]
    async fn test_refresh_reads_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "first\n").unwrap();

        let store = HttpRemoteStore::new(
            "http://localhost:1",
            "u",
            None,
            Some(path.clone()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(store.token.read().unwrap().as_deref(), Some("first"));

        std::fs::write(&path, "second").unwrap();
        store.refresh_credentials().await.unwrap();
        assert_eq!(store.token.read().unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let store = HttpRemoteStore::new(
            "http://127.0.0.1:9",
            "u",
            None,
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        let err = store.fetch("deck").await.unwrap_err();
        assert!(err.is_transient());
    }
}

//! Smart-HTTP receive-pack session

use std::{
    fs::File,
    io::{Seek, SeekFrom},
};

use anyhow::{Context, Result};
use futures_util::{stream, StreamExt};
use reqwest::{
    header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE},
    Url,
};
use tokio::io::AsyncReadExt;

use super::{
    refs::{parse_advertisement, RefAdvertisement},
    report::{encode_commands, parse_report, PushReport, UpdateCommand},
};
use crate::{config::PushConfig, error::Error};

pub const RECEIVE_PACK: &str = "git-receive-pack";
const ADVERTISEMENT_TYPE: &str = "application/x-git-receive-pack-advertisement";
const REQUEST_TYPE: &str = "application/x-git-receive-pack-request";
const RESULT_TYPE: &str = "application/x-git-receive-pack-result";

/// Read size for streaming the pack file into the request body
const CHUNK_SIZE: usize = 64 * 1024;

/// Where a session is in the discover → send sequence
#[derive(Debug)]
enum SessionState {
    Idle,
    Discovered(RefAdvertisement),
    Sent,
    Failed,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Discovered(_) => "discovered",
            SessionState::Sent => "sent",
            SessionState::Failed => "failed",
        }
    }
}

/// One push conversation with a smart-HTTP remote.
///
/// Calls must come in order: [`discover_refs`](Self::discover_refs) once,
/// then [`send_pack`](Self::send_pack) once. Anything else is
/// [`Error::InvalidState`]. A transport failure ends the session.
pub struct SmartHttpClient {
    /// Repository URL without credentials or trailing slash
    url: Url,
    credentials: Option<(String, Option<String>)>,
    user_agent: String,
    client: reqwest::Client,
    /// Tokio runtime for async operations
    runtime: tokio::runtime::Runtime,
    state: SessionState,
}

impl SmartHttpClient {
    pub fn new(mut url: Url, config: &PushConfig) -> Result<Self> {
        let mut credentials = None;
        if !url.username().is_empty() {
            credentials = Some((
                url.username().to_string(),
                url.password().map(|p| p.to_string()),
            ));
            // Only fails for URLs that cannot carry credentials
            let _ = url.set_username("");
            let _ = url.set_password(None);
        } else if let Some(username) = &config.username {
            credentials = Some((username.clone(), config.password.clone()));
        }

        let trimmed = url.path().trim_end_matches('/').to_string();
        url.set_path(&trimmed);

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))?;

        let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

        Ok(SmartHttpClient {
            url,
            credentials,
            user_agent: config.user_agent.clone(),
            client,
            runtime,
            state: SessionState::Idle,
        })
    }

    /// Remote URL with any credentials removed
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `GET info/refs?service=git-receive-pack`
    pub fn discover_refs(&mut self) -> Result<&RefAdvertisement> {
        if !matches!(self.state, SessionState::Idle) {
            return Err(self.invalid_state("idle"));
        }

        let url = self.endpoint(&format!("info/refs?service={}", RECEIVE_PACK));
        tracing::info!("Discovering refs at {}", url);

        let request = self.authorize(self.client.get(&url));
        let body = match self.runtime.block_on(fetch(request, ADVERTISEMENT_TYPE)) {
            Ok(body) => body,
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e.into());
            }
        };

        let advertisement = match parse_advertisement(&body, RECEIVE_PACK) {
            Ok(adv) => adv,
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e.context(format!("Invalid ref advertisement from {}", url)));
            }
        };
        tracing::debug!(
            "Remote advertised {} refs, capabilities: {}",
            advertisement.refs.len(),
            advertisement.capabilities.join(" ")
        );

        self.state = SessionState::Discovered(advertisement);
        match &self.state {
            SessionState::Discovered(adv) => Ok(adv),
            _ => unreachable!("state was just set"),
        }
    }

    /// `POST git-receive-pack` with `commands` followed by the pack in
    /// `pack` (`pack_len` bytes, read from the start of the file).
    pub fn send_pack(
        &mut self,
        commands: &[UpdateCommand],
        mut pack: File,
        pack_len: u64,
    ) -> Result<PushReport> {
        let advertisement = match std::mem::replace(&mut self.state, SessionState::Sent) {
            SessionState::Discovered(adv) => adv,
            other => {
                self.state = other;
                return Err(self.invalid_state("discovered"));
            }
        };
        if commands.is_empty() {
            self.state = SessionState::Discovered(advertisement);
            return Err(Error::Protocol("no ref updates to send".into()).into());
        }

        let report_status = advertisement.has_capability("report-status");
        let mut capabilities = Vec::new();
        if report_status {
            capabilities.push("report-status".to_string());
        }
        if advertisement.has_capability("agent") {
            capabilities.push(format!("agent={}", agent_token(&self.user_agent)));
        }
        let prefix = encode_commands(commands, &capabilities);
        let content_length = prefix.len() as u64 + pack_len;

        pack.seek(SeekFrom::Start(0))
            .context("Failed to rewind pack file")?;

        let url = self.endpoint(RECEIVE_PACK);
        tracing::info!(
            "Sending {} command(s) and {} byte pack to {}",
            commands.len(),
            pack_len,
            url
        );

        let request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, REQUEST_TYPE)
            .header(ACCEPT, RESULT_TYPE)
            .header(CONTENT_LENGTH, content_length);
        let request = self.authorize(request);

        let result = self.runtime.block_on(async move {
            let body = request_body(prefix, tokio::fs::File::from_std(pack));
            fetch(request.body(body), RESULT_TYPE).await
        });
        let body = match result {
            Ok(body) => body,
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e.into());
            }
        };

        if !report_status {
            tracing::debug!("Remote did not negotiate report-status; assuming success");
            return Ok(PushReport::assume_accepted(commands));
        }
        parse_report(&body, commands).map_err(|e| {
            self.state = SessionState::Failed;
            e.context(format!("Invalid status report from {}", url))
        })
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!("{}/{}", self.url.as_str().trim_end_matches('/'), suffix)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, password.as_ref()),
            None => request,
        }
    }

    fn invalid_state(&self, expected: &'static str) -> anyhow::Error {
        Error::InvalidState {
            expected,
            actual: self.state.name(),
        }
        .into()
    }
}

/// Send `request`, require a 2xx status and return the whole body
async fn fetch(
    request: reqwest::RequestBuilder,
    expected_type: &str,
) -> std::result::Result<Vec<u8>, Error> {
    let response = request.send().await.map_err(transport)?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Transport(format!(
            "{} returned HTTP {}",
            response.url(),
            status
        )));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type != expected_type {
        tracing::warn!(
            "Unexpected content type {:?} from {}, expected {}",
            content_type,
            response.url(),
            expected_type
        );
    }

    let body = response.bytes().await.map_err(transport)?;
    Ok(body.to_vec())
}

/// Command prefix followed by the pack file, read in chunks
fn request_body(prefix: Vec<u8>, pack: tokio::fs::File) -> reqwest::Body {
    let chunks = stream::try_unfold(pack, |mut file| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok::<_, std::io::Error>(None);
        }
        buf.truncate(n);
        Ok(Some((buf, file)))
    });
    let body = stream::once(async move { Ok::<_, std::io::Error>(prefix) }).chain(chunks);
    reqwest::Body::wrap_stream(body)
}

fn transport(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Transport(format!("request timed out: {}", err.without_url()))
    } else {
        Error::Transport(err.without_url().to_string())
    }
}

/// The `agent=` capability value cannot contain spaces
fn agent_token(user_agent: &str) -> String {
    user_agent
        .chars()
        .map(|c| if c.is_ascii_graphic() { c } else { '.' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str, config: &PushConfig) -> SmartHttpClient {
        SmartHttpClient::new(Url::parse(url).unwrap(), config).unwrap()
    }

    #[test]
    fn test_credentials_stripped_from_url() {
        let c = client("https://alice:pw@example.com/repo.git/", &PushConfig::default());
        assert_eq!(c.url().as_str(), "https://example.com/repo.git");
        assert_eq!(
            c.credentials,
            Some(("alice".to_string(), Some("pw".to_string())))
        );
    }

    #[test]
    fn test_configured_credentials() {
        let config = PushConfig {
            username: Some("bob".into()),
            ..PushConfig::default()
        };
        let c = client("https://example.com/repo.git", &config);
        assert_eq!(c.credentials, Some(("bob".to_string(), None)));
    }

    #[test]
    fn test_send_before_discover() {
        let mut c = client("http://127.0.0.1:9/repo.git", &PushConfig::default());
        let pack = tempfile::tempfile().unwrap();
        let err = c.send_pack(&[], pack, 0).unwrap_err();
        match crate::error::find(&err) {
            Some(Error::InvalidState { expected, actual }) => {
                assert_eq!(*expected, "discovered");
                assert_eq!(*actual, "idle");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(matches!(c.state, SessionState::Idle));
    }

    #[test]
    fn test_agent_token() {
        assert_eq!(
            agent_token("git/2.0 (git-http-push/0.1.0)"),
            "git/2.0.(git-http-push/0.1.0)"
        );
    }
}

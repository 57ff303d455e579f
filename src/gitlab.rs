//! GitLab-backed connectors: OAuth2 + PKCE login, REST CRUD over repository
//! files, and CI/CD-pipeline hosting.
//!
//! One GitLab project holds one website: the document and meta files live at
//! the repository root, assets under the assets folder. Asset writes and
//! deletes are batched into a single commit through the multi-action commit
//! endpoint, so a batch is atomic with respect to the repository history.
//!
//! The HTTP surface sits behind [`GitlabApi`] so connector logic (PKCE
//! checks, commit batching, CI-file idempotency) is testable against a mock.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD as BASE64_STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::contract::{
    Connector, ConnectorData, ConnectorFile, ConnectorUser, FileContent, HostingConnector,
    StatusCallback, StorageConnector, WebsiteData, WebsiteId, WebsiteMeta, WebsiteMetaFileContent,
    WEBSITE_DATA_FILE, WEBSITE_META_DATA_FILE,
};
use crate::error::{ConnectorError, ConnectorResult};
use crate::job::{JobData, JobManager, JobStatus};
use crate::session::{ConnectorSession, ConnectorType};

/// CI config file GitLab Pages builds from. Synthesized at first publish,
/// never overwritten once present.
pub const CI_CONFIG_FILE: &str = ".gitlab-ci.yml";

/// Page size for paginated endpoints (projects, repository tree). A page
/// shorter than this ends the listing loop.
const PER_PAGE: usize = 100;

const STATIC_PIPELINE: &str = r#"pages:
  stage: deploy
  script:
    - mkdir .public
    - cp -r * .public || true
    - mv .public public
  artifacts:
    paths:
      - public
"#;

const ELEVENTY_PIPELINE: &str = r#"image: node:20

pages:
  stage: deploy
  script:
    - npm install @11ty/eleventy
    - npx @11ty/eleventy --output=public
  artifacts:
    paths:
      - public
"#;

#[derive(Debug, Clone)]
pub struct GitlabOptions {
    pub connector_id: String,
    pub display_name: String,
    pub client_id: String,
    pub client_secret: String,
    /// Instance root, e.g. `https://gitlab.com`.
    pub domain: String,
    /// Callback the provider redirects to with `code` and `state`.
    pub redirect_uri: String,
    pub scope: String,
    pub branch: String,
    /// Projects created by this connector carry this name prefix; listing
    /// filters on it.
    pub repo_prefix: String,
    pub assets_folder: String,
}

impl GitlabOptions {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            connector_id: "gitlab".into(),
            display_name: "GitLab".into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            domain: "https://gitlab.com".into(),
            redirect_uri: redirect_uri.into(),
            scope: "api".into(),
            branch: "main".into(),
            repo_prefix: "website-".into(),
            assets_folder: "assets".into(),
        }
    }
}

/// Token endpoint response, kept verbatim in the session. The refresh token
/// is retained so a refresh flow can be added without a session-format
/// change; expiry currently surfaces as `Unauthorized` and means re-login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitlabUser {
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Session payload for one GitLab role. `state`/`code_verifier` are written
/// when the authorize URL is issued and checked when the callback returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitlabSession {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub token: Option<OAuthTokenResponse>,
    #[serde(default)]
    pub user: Option<GitlabUser>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl From<ApiMethod> for reqwest::Method {
    fn from(method: ApiMethod) -> Self {
        match method {
            ApiMethod::Get => reqwest::Method::GET,
            ApiMethod::Post => reqwest::Method::POST,
            ApiMethod::Put => reqwest::Method::PUT,
            ApiMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Everything needed for the authorization-code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExchangeRequest {
    pub client_id: String,
    pub client_secret: String,
    pub code: String,
    pub redirect_uri: String,
    pub code_verifier: String,
}

/// Low-level GitLab transport: one REST call per method invocation.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait GitlabApi: Send + Sync {
    /// Issue one `/api/v4` call with the access token attached; non-2xx
    /// responses come back as typed errors carrying the HTTP status.
    async fn call(
        &self,
        token: &str,
        method: ApiMethod,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<Value>,
    ) -> ConnectorResult<Value>;

    /// Exchange an authorization code (plus PKCE verifier) for a token.
    async fn exchange_code(
        &self,
        request: TokenExchangeRequest,
    ) -> ConnectorResult<OAuthTokenResponse>;
}

/// Production transport over reqwest.
#[derive(Debug, Clone)]
pub struct GitlabRest {
    client: reqwest::Client,
    base_url: String,
}

impl GitlabRest {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: domain.into(),
        }
    }
}

#[async_trait]
impl GitlabApi for GitlabRest {
    async fn call(
        &self,
        token: &str,
        method: ApiMethod,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<Value>,
    ) -> ConnectorResult<Value> {
        let raw = format!("{}/api/v4/{path}", self.base_url.trim_end_matches('/'));
        let mut url = Url::parse(&raw)
            .map_err(|e| ConnectorError::Transport(format!("invalid api url {raw}: {e}")))?;
        for (key, value) in &query {
            url.query_pairs_mut().append_pair(key, value);
        }
        url.query_pairs_mut().append_pair("access_token", token);
        debug!(method = ?method, path = %path, "GitLab API call");
        let mut request = self.client.request(method.into(), url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<failed to decode response body>"));
        if !status.is_success() {
            warn!(status = %status, path = %path, "GitLab API returned error: {text}");
            return Err(ConnectorError::from_status(status.as_u16(), text));
        }
        if text.is_empty() {
            Ok(Value::Null)
        } else {
            Ok(serde_json::from_str(&text)?)
        }
    }

    async fn exchange_code(
        &self,
        request: TokenExchangeRequest,
    ) -> ConnectorResult<OAuthTokenResponse> {
        let url = format!("{}/oauth/token", self.base_url.trim_end_matches('/'));
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", request.client_id.as_str()),
            ("client_secret", request.client_secret.as_str()),
            ("code", request.code.as_str()),
            ("redirect_uri", request.redirect_uri.as_str()),
            ("code_verifier", request.code_verifier.as_str()),
        ];
        let response = self.client.post(&url).form(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<failed to decode response body>"));
            warn!(status = %status, "Token exchange failed: {text}");
            return Err(ConnectorError::Unauthorized(format!(
                "token exchange failed ({status}): {text}"
            )));
        }
        Ok(response.json::<OAuthTokenResponse>().await?)
    }
}

fn random_token(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Charset for the files-endpoint path segment: everything outside plain
/// filename characters gets escaped, `/` `#` `?` `%` included.
const FILE_PATH_ENCODE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Percent-encode a repository file path for the files endpoint.
fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, FILE_PATH_ENCODE).to_string()
}

fn files_need_eleventy(files: &[ConnectorFile]) -> bool {
    files.iter().any(|file| file.path.contains(".11tydata."))
}

/// Storage-role GitLab connector.
#[derive(Clone)]
pub struct GitlabConnector {
    connector_type: ConnectorType,
    options: GitlabOptions,
    api: Arc<dyn GitlabApi>,
}

impl GitlabConnector {
    pub fn new(options: GitlabOptions) -> Self {
        let api = Arc::new(GitlabRest::new(options.domain.clone()));
        Self {
            connector_type: ConnectorType::Storage,
            options,
            api,
        }
    }

    pub fn with_api(
        connector_type: ConnectorType,
        options: GitlabOptions,
        api: Arc<dyn GitlabApi>,
    ) -> Self {
        Self {
            connector_type,
            options,
            api,
        }
    }

    fn session_data(&self, session: &ConnectorSession) -> ConnectorResult<GitlabSession> {
        Ok(session
            .get::<GitlabSession>(&self.options.connector_id, self.connector_type)?
            .unwrap_or_default())
    }

    fn save_session(
        &self,
        session: &mut ConnectorSession,
        data: &GitlabSession,
    ) -> ConnectorResult<()> {
        session.set(&self.options.connector_id, self.connector_type, data)
    }

    fn token(&self, session: &ConnectorSession) -> ConnectorResult<String> {
        self.session_data(session)?
            .token
            .map(|token| token.access_token)
            .ok_or_else(|| {
                ConnectorError::Unauthorized(format!(
                    "no gitlab token in session for the {} role",
                    self.connector_type
                ))
            })
    }

    fn connector_data(&self) -> ConnectorData {
        ConnectorData {
            connector_id: self.options.connector_id.clone(),
            connector_type: self.connector_type,
            display_name: self.options.display_name.clone(),
        }
    }

    /// Fetch one repository file, base64-decoded.
    async fn read_file(
        &self,
        token: &str,
        website_id: &str,
        path: &str,
    ) -> ConnectorResult<Vec<u8>> {
        let api_path = format!(
            "projects/{website_id}/repository/files/{}",
            encode_path(path)
        );
        let response = self
            .api
            .call(
                token,
                ApiMethod::Get,
                &api_path,
                vec![("ref".into(), self.options.branch.clone())],
                None,
            )
            .await?;
        let content = response
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| ConnectorError::Api {
                status: 200,
                message: format!("file response for {path} carried no content"),
            })?;
        let stripped: String = content.chars().filter(|c| !c.is_whitespace()).collect();
        BASE64_STANDARD
            .decode(stripped)
            .map_err(|e| ConnectorError::Transport(format!("invalid base64 in {path}: {e}")))
    }

    /// Update a repository file, creating it when it does not exist yet.
    async fn upsert_file(
        &self,
        token: &str,
        website_id: &str,
        path: &str,
        content: &[u8],
        commit_message: &str,
    ) -> ConnectorResult<()> {
        let api_path = format!(
            "projects/{website_id}/repository/files/{}",
            encode_path(path)
        );
        let body = json!({
            "branch": self.options.branch,
            "content": BASE64_STANDARD.encode(content),
            "encoding": "base64",
            "commit_message": commit_message,
        });
        let update = self
            .api
            .call(token, ApiMethod::Put, &api_path, vec![], Some(body.clone()))
            .await;
        match update {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() || matches!(e, ConnectorError::Api { status: 400, .. }) => {
                debug!(path = %path, "File missing on update, creating it");
                self.api
                    .call(token, ApiMethod::Post, &api_path, vec![], Some(body))
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// One multi-action commit; the batch is atomic in the repo history.
    async fn commit(
        &self,
        token: &str,
        website_id: &str,
        commit_message: &str,
        actions: Vec<Value>,
    ) -> ConnectorResult<Value> {
        let body = json!({
            "branch": self.options.branch,
            "commit_message": commit_message,
            "actions": actions,
        });
        self.api
            .call(
                token,
                ApiMethod::Post,
                &format!("projects/{website_id}/repository/commits"),
                vec![],
                Some(body),
            )
            .await
    }

    /// Paths of blobs below `path` on the configured branch, following
    /// pagination until a short page. An absent tree is an empty listing,
    /// not an error.
    async fn list_blobs(
        &self,
        token: &str,
        website_id: &str,
        path: &str,
    ) -> ConnectorResult<Vec<String>> {
        let mut paths = Vec::new();
        let mut page = 1u32;
        loop {
            let query = vec![
                ("ref".to_string(), self.options.branch.clone()),
                ("path".to_string(), path.to_owned()),
                ("recursive".to_string(), "true".to_string()),
                ("per_page".to_string(), PER_PAGE.to_string()),
                ("page".to_string(), page.to_string()),
            ];
            let response = self
                .api
                .call(
                    token,
                    ApiMethod::Get,
                    &format!("projects/{website_id}/repository/tree"),
                    query,
                    None,
                )
                .await;
            let entries = match response {
                Ok(value) => value,
                Err(e) if e.is_not_found() => return Ok(paths),
                Err(e) => return Err(e),
            };
            let entries = entries.as_array().cloned().unwrap_or_default();
            let page_len = entries.len();
            paths.extend(
                entries
                    .iter()
                    .filter(|entry| entry.get("type").and_then(Value::as_str) == Some("blob"))
                    .filter_map(|entry| entry.get("path").and_then(Value::as_str))
                    .map(str::to_owned),
            );
            if page_len < PER_PAGE {
                return Ok(paths);
            }
            page += 1;
        }
    }

    /// Build create-or-update actions for a file set, deciding per file
    /// against one tree listing of what already exists.
    async fn file_actions(
        &self,
        token: &str,
        website_id: &str,
        prefix: &str,
        files: Vec<ConnectorFile>,
    ) -> ConnectorResult<Vec<Value>> {
        let existing: HashSet<String> = self
            .list_blobs(token, website_id, prefix)
            .await?
            .into_iter()
            .collect();
        let mut actions = Vec::with_capacity(files.len());
        for file in files {
            let file_path = if prefix.is_empty() {
                file.path.trim_start_matches('/').to_owned()
            } else {
                format!("{prefix}/{}", file.path.trim_start_matches('/'))
            };
            let action = if existing.contains(&file_path) {
                "update"
            } else {
                "create"
            };
            let bytes = file.content.into_bytes().await?;
            actions.push(json!({
                "action": action,
                "file_path": file_path,
                "content": BASE64_STANDARD.encode(bytes),
                "encoding": "base64",
            }));
        }
        Ok(actions)
    }

    async fn fetch_user(&self, token: &str) -> ConnectorResult<GitlabUser> {
        let response = self
            .api
            .call(token, ApiMethod::Get, "user", vec![], None)
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    async fn pages_url(&self, token: &str, website_id: &str) -> ConnectorResult<String> {
        let response = self
            .api
            .call(
                token,
                ApiMethod::Get,
                &format!("projects/{website_id}/pages"),
                vec![],
                None,
            )
            .await?;
        response
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                ConnectorError::NotFound(format!("no pages url for project {website_id}"))
            })
    }
}

#[async_trait]
impl Connector for GitlabConnector {
    fn connector_id(&self) -> &str {
        &self.options.connector_id
    }

    fn display_name(&self) -> &str {
        &self.options.display_name
    }

    fn connector_type(&self) -> ConnectorType {
        self.connector_type
    }

    /// Issue the authorize URL and persist `state`/`code_verifier` so the
    /// callback in `set_token` can be correlated and the exchange bound to
    /// this session (PKCE, S256).
    async fn get_oauth_url(
        &self,
        session: &mut ConnectorSession,
    ) -> ConnectorResult<Option<String>> {
        let state = random_token(32);
        let code_verifier = random_token(64);
        let code_challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()));

        let mut data = self.session_data(session)?;
        data.state = Some(state.clone());
        data.code_verifier = Some(code_verifier);
        data.code_challenge = Some(code_challenge.clone());
        self.save_session(session, &data)?;

        let raw = format!("{}/oauth/authorize", self.options.domain.trim_end_matches('/'));
        let mut url = Url::parse(&raw)
            .map_err(|e| ConnectorError::Transport(format!("invalid authorize url {raw}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.options.client_id)
            .append_pair("redirect_uri", &self.options.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("state", &state)
            .append_pair("scope", &self.options.scope)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", "S256");
        Ok(Some(url.to_string()))
    }

    async fn get_login_form(
        &self,
        _session: &ConnectorSession,
        _redirect_to: &str,
    ) -> ConnectorResult<Option<String>> {
        Ok(None)
    }

    async fn get_settings_form(
        &self,
        _session: &ConnectorSession,
        _redirect_to: &str,
    ) -> ConnectorResult<Option<String>> {
        Ok(None)
    }

    async fn is_logged_in(&self, session: &ConnectorSession) -> bool {
        match self.token(session) {
            Ok(token) => self.fetch_user(&token).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Complete the OAuth callback: verify `state` against the stored one
    /// (CSRF protection), require a stored verifier (replay/ordering
    /// protection), then exchange the code.
    async fn set_token(
        &self,
        session: &mut ConnectorSession,
        payload: Value,
    ) -> ConnectorResult<()> {
        let code = payload
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| ConnectorError::InvalidOAuthState("callback carried no code".into()))?;
        let returned_state = payload
            .get("state")
            .and_then(Value::as_str)
            .ok_or_else(|| ConnectorError::InvalidOAuthState("callback carried no state".into()))?;

        let mut data = self.session_data(session)?;
        let expected_state = data.state.as_deref().ok_or_else(|| {
            ConnectorError::InvalidOAuthState("no login in progress for this session".into())
        })?;
        if expected_state != returned_state {
            return Err(ConnectorError::InvalidOAuthState(
                "state does not match the one issued for this session".into(),
            ));
        }
        let code_verifier = data.code_verifier.clone().ok_or_else(|| {
            ConnectorError::InvalidOAuthState("no code verifier stored for this session".into())
        })?;

        let token = self
            .api
            .exchange_code(TokenExchangeRequest {
                client_id: self.options.client_id.clone(),
                client_secret: self.options.client_secret.clone(),
                code: code.to_owned(),
                redirect_uri: self.options.redirect_uri.clone(),
                code_verifier,
            })
            .await?;
        let user = self.fetch_user(&token.access_token).await?;
        info!(username = %user.username, "GitLab login completed");

        // state and verifier stay in the session for a later refresh flow.
        data.token = Some(token);
        data.user = Some(user);
        self.save_session(session, &data)
    }

    async fn logout(&self, session: &mut ConnectorSession) -> ConnectorResult<()> {
        session.remove(&self.options.connector_id, self.connector_type);
        Ok(())
    }

    async fn get_user(&self, session: &ConnectorSession) -> ConnectorResult<ConnectorUser> {
        let data = self.session_data(session)?;
        let user = match data.user {
            Some(user) => user,
            None => {
                let token = self.token(session)?;
                self.fetch_user(&token).await?
            }
        };
        Ok(ConnectorUser {
            name: user.name.unwrap_or_else(|| user.username.clone()),
            email: user.email,
            picture: user.avatar_url,
            storage: self.connector_data(),
        })
    }
}

#[async_trait]
impl StorageConnector for GitlabConnector {
    async fn list_websites(&self, session: &ConnectorSession) -> ConnectorResult<Vec<WebsiteMeta>> {
        let token = self.token(session)?;
        let mut websites = Vec::new();
        let mut page = 1u32;
        loop {
            let query = vec![
                ("membership".to_string(), "true".to_string()),
                ("search".to_string(), self.options.repo_prefix.clone()),
                ("per_page".to_string(), PER_PAGE.to_string()),
                ("page".to_string(), page.to_string()),
            ];
            let response = self
                .api
                .call(&token, ApiMethod::Get, "projects", query, None)
                .await?;
            let projects = response.as_array().cloned().unwrap_or_default();
            let page_len = projects.len();
            websites.extend(projects.iter().filter_map(|project| {
                let id = project.get("id").and_then(Value::as_i64)?;
                let name = project.get("name").and_then(Value::as_str)?;
                let name = name.strip_prefix(&self.options.repo_prefix)?;
                Some(WebsiteMeta {
                    website_id: id.to_string(),
                    name: name.to_owned(),
                    image_url: project
                        .get("avatar_url")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    created_at: project
                        .get("created_at")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    updated_at: project
                        .get("last_activity_at")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                })
            }));
            if page_len < PER_PAGE {
                return Ok(websites);
            }
            page += 1;
        }
    }

    async fn create_website(
        &self,
        session: &ConnectorSession,
        meta: Option<WebsiteMetaFileContent>,
    ) -> ConnectorResult<WebsiteId> {
        let token = self.token(session)?;
        let meta = meta.unwrap_or_else(|| WebsiteMetaFileContent {
            name: "New website".into(),
            image_url: None,
        });
        let body = json!({
            "name": format!("{}{}", self.options.repo_prefix, meta.name),
            "initialize_with_readme": false,
            "visibility": "private",
        });
        let project = self
            .api
            .call(&token, ApiMethod::Post, "projects", vec![], Some(body))
            .await?;
        let website_id = project
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ConnectorError::Api {
                status: 200,
                message: "project creation response carried no id".into(),
            })?
            .to_string();
        let data_json = serde_json::to_vec_pretty(&WebsiteData::default())?;
        let meta_json = serde_json::to_vec_pretty(&meta)?;
        self.commit(
            &token,
            &website_id,
            "Initialize website",
            vec![
                json!({
                    "action": "create",
                    "file_path": WEBSITE_DATA_FILE,
                    "content": BASE64_STANDARD.encode(&data_json),
                    "encoding": "base64",
                }),
                json!({
                    "action": "create",
                    "file_path": WEBSITE_META_DATA_FILE,
                    "content": BASE64_STANDARD.encode(&meta_json),
                    "encoding": "base64",
                }),
            ],
        )
        .await?;
        Ok(website_id)
    }

    async fn read_website(
        &self,
        session: &ConnectorSession,
        website_id: &str,
    ) -> ConnectorResult<WebsiteData> {
        let token = self.token(session)?;
        let bytes = self.read_file(&token, website_id, WEBSITE_DATA_FILE).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn update_website(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        data: WebsiteData,
    ) -> ConnectorResult<()> {
        let token = self.token(session)?;
        let json = serde_json::to_vec_pretty(&data)?;
        self.upsert_file(&token, website_id, WEBSITE_DATA_FILE, &json, "Update website")
            .await
    }

    async fn delete_website(
        &self,
        session: &ConnectorSession,
        website_id: &str,
    ) -> ConnectorResult<()> {
        let token = self.token(session)?;
        self.api
            .call(
                &token,
                ApiMethod::Delete,
                &format!("projects/{website_id}"),
                vec![],
                None,
            )
            .await?;
        Ok(())
    }

    async fn duplicate_website(
        &self,
        session: &ConnectorSession,
        website_id: &str,
    ) -> ConnectorResult<WebsiteId> {
        let token = self.token(session)?;
        let data = self.read_website(session, website_id).await?;
        let meta = self.get_website_meta(session, website_id).await?;
        let copy_meta = WebsiteMetaFileContent {
            name: format!("{} Copy", meta.name),
            image_url: meta.image_url,
        };
        let new_id = self.create_website(session, Some(copy_meta)).await?;
        self.update_website(session, &new_id, data).await?;

        let asset_paths = self
            .list_blobs(&token, website_id, &self.options.assets_folder)
            .await?;
        if !asset_paths.is_empty() {
            let mut actions = Vec::with_capacity(asset_paths.len());
            for path in asset_paths {
                let bytes = self.read_file(&token, website_id, &path).await?;
                actions.push(json!({
                    "action": "create",
                    "file_path": path,
                    "content": BASE64_STANDARD.encode(&bytes),
                    "encoding": "base64",
                }));
            }
            self.commit(&token, &new_id, "Copy assets", actions).await?;
        }
        Ok(new_id)
    }

    async fn get_website_meta(
        &self,
        session: &ConnectorSession,
        website_id: &str,
    ) -> ConnectorResult<WebsiteMeta> {
        let token = self.token(session)?;
        let bytes = self
            .read_file(&token, website_id, WEBSITE_META_DATA_FILE)
            .await?;
        let meta: WebsiteMetaFileContent = serde_json::from_slice(&bytes)?;
        Ok(WebsiteMeta {
            website_id: website_id.to_owned(),
            name: meta.name,
            image_url: meta.image_url,
            created_at: None,
            updated_at: None,
        })
    }

    async fn set_website_meta(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        meta: WebsiteMetaFileContent,
    ) -> ConnectorResult<()> {
        let token = self.token(session)?;
        let json = serde_json::to_vec_pretty(&meta)?;
        self.upsert_file(
            &token,
            website_id,
            WEBSITE_META_DATA_FILE,
            &json,
            "Update website metadata",
        )
        .await
    }

    async fn write_assets(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        files: Vec<ConnectorFile>,
        status: Option<StatusCallback>,
    ) -> ConnectorResult<()> {
        let token = self.token(session)?;
        let total = files.len();
        if let Some(cb) = &status {
            cb(
                JobStatus::InProgress,
                format!("Uploading {total} assets in one commit"),
            );
        }
        let actions = self
            .file_actions(&token, website_id, &self.options.assets_folder, files)
            .await?;
        match self
            .commit(&token, website_id, "Update assets", actions)
            .await
        {
            Ok(_) => {
                if let Some(cb) = &status {
                    cb(JobStatus::Success, format!("Wrote {total} assets"));
                }
                Ok(())
            }
            Err(e) => {
                if let Some(cb) = &status {
                    cb(JobStatus::Error, format!("Asset commit failed: {e}"));
                }
                Err(e)
            }
        }
    }

    async fn read_asset(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        path: &str,
    ) -> ConnectorResult<FileContent> {
        let token = self.token(session)?;
        let full = format!(
            "{}/{}",
            self.options.assets_folder,
            path.trim_start_matches('/')
        );
        let bytes = self.read_file(&token, website_id, &full).await?;
        Ok(FileContent::Bytes(bytes))
    }

    async fn delete_assets(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        paths: Vec<String>,
    ) -> ConnectorResult<()> {
        let token = self.token(session)?;
        let actions = paths
            .into_iter()
            .map(|path| {
                json!({
                    "action": "delete",
                    "file_path": format!(
                        "{}/{}",
                        self.options.assets_folder,
                        path.trim_start_matches('/')
                    ),
                })
            })
            .collect();
        self.commit(&token, website_id, "Delete assets", actions)
            .await?;
        Ok(())
    }
}

/// Hosting-role GitLab connector: same storage transport, plus the publish
/// pipeline (CI file + batched commit + Pages URL).
#[derive(Clone)]
pub struct GitlabHostingConnector {
    inner: GitlabConnector,
}

impl GitlabHostingConnector {
    pub fn new(options: GitlabOptions) -> Self {
        let api = Arc::new(GitlabRest::new(options.domain.clone()));
        Self::with_api(options, api)
    }

    pub fn with_api(options: GitlabOptions, api: Arc<dyn GitlabApi>) -> Self {
        Self {
            inner: GitlabConnector::with_api(ConnectorType::Hosting, options, api),
        }
    }

    /// Create the CI config only when the repository has none, preserving
    /// any pipeline the user customized.
    async fn ensure_ci_config(
        &self,
        token: &str,
        website_id: &str,
        files: &[ConnectorFile],
    ) -> ConnectorResult<bool> {
        match self.inner.read_file(token, website_id, CI_CONFIG_FILE).await {
            Ok(_) => Ok(false),
            Err(e) if e.is_not_found() => {
                let pipeline = if files_need_eleventy(files) {
                    ELEVENTY_PIPELINE
                } else {
                    STATIC_PIPELINE
                };
                self.inner
                    .commit(
                        token,
                        website_id,
                        "Add pages pipeline",
                        vec![json!({
                            "action": "create",
                            "file_path": CI_CONFIG_FILE,
                            "content": BASE64_STANDARD.encode(pipeline.as_bytes()),
                            "encoding": "base64",
                        })],
                    )
                    .await?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Connector for GitlabHostingConnector {
    fn connector_id(&self) -> &str {
        self.inner.connector_id()
    }

    fn display_name(&self) -> &str {
        self.inner.display_name()
    }

    fn connector_type(&self) -> ConnectorType {
        self.inner.connector_type()
    }

    async fn get_oauth_url(
        &self,
        session: &mut ConnectorSession,
    ) -> ConnectorResult<Option<String>> {
        self.inner.get_oauth_url(session).await
    }

    async fn get_login_form(
        &self,
        session: &ConnectorSession,
        redirect_to: &str,
    ) -> ConnectorResult<Option<String>> {
        self.inner.get_login_form(session, redirect_to).await
    }

    async fn get_settings_form(
        &self,
        session: &ConnectorSession,
        redirect_to: &str,
    ) -> ConnectorResult<Option<String>> {
        self.inner.get_settings_form(session, redirect_to).await
    }

    async fn is_logged_in(&self, session: &ConnectorSession) -> bool {
        self.inner.is_logged_in(session).await
    }

    async fn set_token(
        &self,
        session: &mut ConnectorSession,
        payload: Value,
    ) -> ConnectorResult<()> {
        self.inner.set_token(session, payload).await
    }

    async fn logout(&self, session: &mut ConnectorSession) -> ConnectorResult<()> {
        self.inner.logout(session).await
    }

    async fn get_user(&self, session: &ConnectorSession) -> ConnectorResult<ConnectorUser> {
        self.inner.get_user(session).await
    }
}

#[async_trait]
impl HostingConnector for GitlabHostingConnector {
    async fn publish(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        files: Vec<ConnectorFile>,
        job_manager: &JobManager,
    ) -> ConnectorResult<JobData> {
        let token = self.inner.token(session)?;
        let job = job_manager.start_job(format!("Publishing website {website_id} to GitLab Pages"));
        let job_id = job.job_id;
        let jm = job_manager.clone();
        let connector = self.clone();
        let website_id = website_id.to_owned();
        tokio::spawn(async move {
            jm.job_progress(job_id, "Checking pipeline configuration".to_string());
            match connector.ensure_ci_config(&token, &website_id, &files).await {
                Ok(true) => {
                    jm.add_job_log(job_id, "Created pages pipeline configuration".to_string());
                }
                Ok(false) => {
                    jm.add_job_log(
                        job_id,
                        "Pipeline configuration already present, leaving it untouched".to_string(),
                    );
                }
                Err(e) => {
                    jm.add_job_error(job_id, e.to_string());
                    jm.job_error(job_id, format!("Publication failed: {e}"));
                    return;
                }
            }

            let total = files.len();
            jm.job_progress(job_id, format!("Committing {total} files"));
            let actions = match connector
                .inner
                .file_actions(&token, &website_id, "", files)
                .await
            {
                Ok(actions) => actions,
                Err(e) => {
                    jm.add_job_error(job_id, e.to_string());
                    jm.job_error(job_id, format!("Publication failed: {e}"));
                    return;
                }
            };
            if let Err(e) = connector
                .inner
                .commit(&token, &website_id, "Publish website", actions)
                .await
            {
                jm.add_job_error(job_id, e.to_string());
                jm.job_error(job_id, format!("Publication failed: {e}"));
                return;
            }
            jm.add_job_log(job_id, format!("Committed {total} files"));

            match connector.inner.pages_url(&token, &website_id).await {
                Ok(url) => {
                    jm.job_success(
                        job_id,
                        format!(
                            "Publication success. Your website will be live shortly at <a href=\"{url}\" target=\"_blank\">{url}</a>"
                        ),
                    );
                }
                Err(e) if e.is_not_found() => {
                    jm.job_success(
                        job_id,
                        "Publication success. The pages URL will appear in your project settings once the pipeline finishes".to_string(),
                    );
                }
                Err(e) => {
                    jm.add_job_error(job_id, e.to_string());
                    jm.job_error(job_id, format!("Publication failed: {e}"));
                }
            }
        });
        Ok(job)
    }

    async fn get_url(
        &self,
        session: &ConnectorSession,
        website_id: &str,
    ) -> ConnectorResult<String> {
        let token = self.inner.token(session)?;
        self.inner.pages_url(&token, website_id).await
    }
}

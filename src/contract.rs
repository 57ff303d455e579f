//! # contract: the connector interface every back-end implements
//!
//! This module defines the data model for website documents and the two
//! capability traits ([`StorageConnector`], [`HostingConnector`]) plus the
//! authentication subset they share ([`Connector`]).
//!
//! ## Interface & Extensibility
//! - Implement [`StorageConnector`] and/or [`HostingConnector`] to plug in a
//!   new back-end (remote filesystem, REST API, archive download, ...).
//! - All methods are async and return [`ConnectorResult`]; failures carry
//!   enough context (HTTP status, provider message) to render a user-facing
//!   error. A silent empty result is never a valid failure signal.
//! - Callers hold a reference typed by the capability they need
//!   (`&dyn StorageConnector` / `&dyn HostingConnector`), never a concrete
//!   connector type.
//!
//! ## Contract invariants
//! - `is_logged_in` answers `false` for expected "not authenticated"
//!   conditions instead of erroring.
//! - `logout` is idempotent.
//! - `publish` returns immediately with a job handle; all I/O happens in a
//!   background task observable only through job polling.
//! - Write operations create intermediate storage structure (directories,
//!   initial files) implicitly; callers never pre-create paths.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ConnectorResult;
use crate::job::{JobData, JobManager, JobStatus};
use crate::session::{ConnectorSession, ConnectorType};

/// File name of the website's full document model inside its storage root.
pub const WEBSITE_DATA_FILE: &str = "website.json";
/// File name of the lightweight listing metadata next to the data file.
pub const WEBSITE_META_DATA_FILE: &str = "meta.json";

/// Opaque identifier of one website's data and assets on a given connector.
/// Provider-specific (a GitLab project id, an FTP subfolder name, a UUID);
/// it has no meaning across connectors.
pub type WebsiteId = String;

/// The website's full document model, stored as one JSON file per website.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebsiteData {
    pub pages: Vec<serde_json::Value>,
    pub assets: Vec<serde_json::Value>,
    pub styles: Vec<serde_json::Value>,
    pub settings: serde_json::Value,
    pub fonts: Vec<serde_json::Value>,
    pub symbols: Vec<serde_json::Value>,
    pub publication: serde_json::Value,
}

/// Listing metadata for one website, as returned by `list_websites` and
/// `get_website_meta`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebsiteMeta {
    pub website_id: WebsiteId,
    pub name: String,
    pub image_url: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// The part of the metadata that lives in the meta file itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebsiteMetaFileContent {
    pub name: String,
    pub image_url: Option<String>,
}

/// Identity of the connector a user record came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorData {
    pub connector_id: String,
    #[serde(rename = "type")]
    pub connector_type: ConnectorType,
    pub display_name: String,
}

/// The logged-in user as reported by `get_user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorUser {
    pub name: String,
    pub email: Option<String>,
    pub picture: Option<String>,
    pub storage: ConnectorData,
}

/// File content in one of three shapes. Connectors accept all three and
/// avoid materializing a stream into memory when the transport can consume
/// it incrementally (large asset uploads).
pub enum FileContent {
    Text(String),
    Bytes(Vec<u8>),
    Stream(Box<dyn AsyncRead + Send + Sync + Unpin>),
}

impl FileContent {
    /// Materialize the content. Only used on paths where the backing store
    /// requires a full buffer (e.g. base64-encoded commit actions).
    pub async fn into_bytes(self) -> std::io::Result<Vec<u8>> {
        match self {
            FileContent::Text(text) => Ok(text.into_bytes()),
            FileContent::Bytes(bytes) => Ok(bytes),
            FileContent::Stream(mut stream) => {
                let mut buf = Vec::new();
                stream.read_to_end(&mut buf).await?;
                Ok(buf)
            }
        }
    }

    /// View the content as an async reader without copying buffers.
    pub fn into_reader(self) -> Box<dyn AsyncRead + Send + Sync + Unpin> {
        match self {
            FileContent::Text(text) => Box::new(std::io::Cursor::new(text.into_bytes())),
            FileContent::Bytes(bytes) => Box::new(std::io::Cursor::new(bytes)),
            FileContent::Stream(stream) => stream,
        }
    }

    /// Known size, when the content is already buffered.
    pub fn len_hint(&self) -> Option<usize> {
        match self {
            FileContent::Text(text) => Some(text.len()),
            FileContent::Bytes(bytes) => Some(bytes.len()),
            FileContent::Stream(_) => None,
        }
    }
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileContent::Text(text) => write!(f, "FileContent::Text({} bytes)", text.len()),
            FileContent::Bytes(bytes) => write!(f, "FileContent::Bytes({} bytes)", bytes.len()),
            FileContent::Stream(_) => write!(f, "FileContent::Stream"),
        }
    }
}

impl From<String> for FileContent {
    fn from(text: String) -> Self {
        FileContent::Text(text)
    }
}

impl From<&str> for FileContent {
    fn from(text: &str) -> Self {
        FileContent::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(bytes: Vec<u8>) -> Self {
        FileContent::Bytes(bytes)
    }
}

/// A path plus its content, the unit moved by write/publish operations.
/// Paths are relative to the website (or publication) root.
#[derive(Debug)]
pub struct ConnectorFile {
    pub path: String,
    pub content: FileContent,
}

impl ConnectorFile {
    pub fn new(path: impl Into<String>, content: impl Into<FileContent>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Ordered progress callback fired by batched write operations, before and
/// after each file and once with a terminal status for the whole batch.
pub type StatusCallback = Arc<dyn Fn(JobStatus, String) + Send + Sync>;

/// Authentication subset shared by both capability roles.
#[async_trait]
pub trait Connector: Send + Sync {
    fn connector_id(&self) -> &str;
    fn display_name(&self) -> &str;
    /// The role this instance plays; a back-end implementing both roles is
    /// instantiated once per role with independently-scoped session data.
    fn connector_type(&self) -> ConnectorType;

    /// OAuth authorize URL to redirect the user to, or `None` for
    /// credential-based connectors. Issuing the URL stores the correlation
    /// state in the session, hence `&mut`.
    async fn get_oauth_url(
        &self,
        session: &mut ConnectorSession,
    ) -> ConnectorResult<Option<String>>;

    /// HTML login form for credential-based connectors, or `None`.
    async fn get_login_form(
        &self,
        session: &ConnectorSession,
        redirect_to: &str,
    ) -> ConnectorResult<Option<String>>;

    /// HTML settings form shown after login, or `None`.
    async fn get_settings_form(
        &self,
        session: &ConnectorSession,
        redirect_to: &str,
    ) -> ConnectorResult<Option<String>>;

    /// Never errors on a plain "not authenticated" condition; that is a
    /// `false`, not a failure.
    async fn is_logged_in(&self, session: &ConnectorSession) -> bool;

    /// Store credentials or complete an OAuth callback. Fails on invalid
    /// credentials, an expired code, or a state/verifier mismatch.
    async fn set_token(
        &self,
        session: &mut ConnectorSession,
        payload: serde_json::Value,
    ) -> ConnectorResult<()>;

    /// Idempotent; never fails when already logged out.
    async fn logout(&self, session: &mut ConnectorSession) -> ConnectorResult<()>;

    async fn get_user(&self, session: &ConnectorSession) -> ConnectorResult<ConnectorUser>;
}

/// Website document/asset persistence (CRUD) capability.
#[async_trait]
pub trait StorageConnector: Connector {
    async fn list_websites(&self, session: &ConnectorSession) -> ConnectorResult<Vec<WebsiteMeta>>;

    /// Create the minimal invariant structure (data file, meta file, assets
    /// folder) and return the new website's id.
    async fn create_website(
        &self,
        session: &ConnectorSession,
        meta: Option<WebsiteMetaFileContent>,
    ) -> ConnectorResult<WebsiteId>;

    async fn read_website(
        &self,
        session: &ConnectorSession,
        website_id: &str,
    ) -> ConnectorResult<WebsiteData>;

    async fn update_website(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        data: WebsiteData,
    ) -> ConnectorResult<()>;

    async fn delete_website(
        &self,
        session: &ConnectorSession,
        website_id: &str,
    ) -> ConnectorResult<()>;

    /// Copy data, meta and assets under a fresh id; the copy's name gets a
    /// " Copy" suffix.
    async fn duplicate_website(
        &self,
        session: &ConnectorSession,
        website_id: &str,
    ) -> ConnectorResult<WebsiteId>;

    async fn get_website_meta(
        &self,
        session: &ConnectorSession,
        website_id: &str,
    ) -> ConnectorResult<WebsiteMeta>;

    async fn set_website_meta(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        meta: WebsiteMetaFileContent,
    ) -> ConnectorResult<()>;

    /// Write asset files under the website's assets folder. Callbacks fire
    /// in order: the callback for file `i + 1` is never observed before the
    /// terminal callback for file `i`.
    async fn write_assets(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        files: Vec<ConnectorFile>,
        status: Option<StatusCallback>,
    ) -> ConnectorResult<()>;

    async fn read_asset(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        path: &str,
    ) -> ConnectorResult<FileContent>;

    async fn delete_assets(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        paths: Vec<String>,
    ) -> ConnectorResult<()>;
}

/// Publishing capability: push a built site to its host and resolve its
/// public URL.
#[async_trait]
pub trait HostingConnector: Connector {
    /// Register a job, spawn the actual upload in the background and return
    /// the job handle immediately. Errors after return are reported through
    /// the job, never thrown.
    async fn publish(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        files: Vec<ConnectorFile>,
        job_manager: &JobManager,
    ) -> ConnectorResult<JobData>;

    async fn get_url(
        &self,
        session: &ConnectorSession,
        website_id: &str,
    ) -> ConnectorResult<String>;
}

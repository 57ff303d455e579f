//! FTP-backed connector implementing both the storage and the hosting role.
//!
//! Every public operation opens a fresh control connection, performs one
//! logical unit of work and closes the connection again. No pooling, no
//! reuse across calls; a call can never leak state into another call's
//! handle.
//!
//! The actual wire protocol sits behind [`FtpTransport`] so the connector
//! logic (paths, sequencing, job reporting) is testable against a mock.

use std::io::Read;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::Future;
use serde::{Deserialize, Serialize};
use suppaftp::types::FileType;
use suppaftp::{FtpError, RustlsConnector, RustlsFtpStream, Status};
use tokio_util::io::SyncIoBridge;
use tracing::{debug, warn};
use uuid::Uuid;

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

fn default_port() -> u16 {
    21
}

/// Session payload for one FTP role. The storage role reads
/// `storage_root_path`; the hosting role reads `publication_path` and
/// `website_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpCredentials {
    pub host: String,
    pub user: String,
    pub pass: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub storage_root_path: Option<String>,
    #[serde(default)]
    pub publication_path: Option<String>,
    #[serde(default)]
    pub website_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FtpOptions {
    pub connector_id: String,
    pub display_name: String,
    pub assets_folder: String,
    pub css_folder: String,
}

impl Default for FtpOptions {
    fn default() -> Self {
        Self {
            connector_id: "ftp".into(),
            display_name: "FTP".into(),
            assets_folder: "assets".into(),
            css_folder: "css".into(),
        }
    }
}

/// Directory entry as reported by the remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Byte-progress callback fired while a single file uploads.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// One logical remote-filesystem operation per method, each on its own
/// freshly-opened connection.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait FtpTransport: Send + Sync {
    /// Connect and log in, then disconnect. Used to validate credentials.
    async fn check_access(&self, creds: &FtpCredentials) -> ConnectorResult<()>;

    /// Create a directory and all missing parents. Existing directories are
    /// not an error.
    async fn mkdir_all(&self, creds: &FtpCredentials, path: &str) -> ConnectorResult<()>;

    /// Upload one file, returning the byte count written.
    async fn upload(
        &self,
        creds: &FtpCredentials,
        path: &str,
        content: FileContent,
        progress: Option<ProgressFn>,
    ) -> ConnectorResult<u64>;

    async fn download(&self, creds: &FtpCredentials, path: &str) -> ConnectorResult<Vec<u8>>;

    async fn delete_file(&self, creds: &FtpCredentials, path: &str) -> ConnectorResult<()>;

    /// Remove a directory and everything below it.
    async fn delete_dir(&self, creds: &FtpCredentials, path: &str) -> ConnectorResult<()>;

    async fn list_dir(
        &self,
        creds: &FtpCredentials,
        path: &str,
    ) -> ConnectorResult<Vec<RemoteEntry>>;
}

/// Join path segments with `/`, trimming stray separators and skipping
/// empty parts.
fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn parent_dir(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// True for the 550 a MKD on an existing directory answers with; any other
/// failure (permissions, connection loss) must propagate.
fn mkdir_conflict(err: &FtpError) -> bool {
    matches!(
        err,
        FtpError::UnexpectedResponse(response) if response.status == Status::FileUnavailable
    )
}

fn map_ftp(path: &str, err: FtpError) -> ConnectorError {
    match &err {
        FtpError::UnexpectedResponse(response) if response.status == Status::FileUnavailable => {
            ConnectorError::NotFound(path.to_owned())
        }
        _ => ConnectorError::Ftp(err),
    }
}

fn tls_config() -> Arc<rustls::ClientConfig> {
    static CONFIG: OnceLock<Arc<rustls::ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(
                rustls::ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        })
        .clone()
}

struct CountingReader<R> {
    inner: R,
    sent: u64,
    progress: Option<ProgressFn>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.sent += n as u64;
        if n > 0 {
            if let Some(progress) = &self.progress {
                progress(self.sent);
            }
        }
        Ok(n)
    }
}

/// Production transport backed by suppaftp, one blocking worker per call.
#[derive(Debug, Default, Clone)]
pub struct SuppaftpTransport;

impl SuppaftpTransport {
    fn connect(creds: &FtpCredentials) -> ConnectorResult<RustlsFtpStream> {
        let ftp = RustlsFtpStream::connect((creds.host.as_str(), creds.port))?;
        let mut ftp = if creds.secure {
            ftp.into_secure(RustlsConnector::from(tls_config()), &creds.host)?
        } else {
            ftp
        };
        ftp.login(&creds.user, &creds.pass)
            .map_err(|e| ConnectorError::Unauthorized(format!("ftp login failed: {e}")))?;
        ftp.transfer_type(FileType::Binary)?;
        Ok(ftp)
    }

    /// Run one unit of work on a fresh connection. The control connection
    /// is closed on every path, success or failure.
    async fn with_conn<T, F>(creds: &FtpCredentials, op: F) -> ConnectorResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut RustlsFtpStream) -> ConnectorResult<T> + Send + 'static,
    {
        let creds = creds.clone();
        tokio::task::spawn_blocking(move || {
            let mut ftp = Self::connect(&creds)?;
            let result = op(&mut ftp);
            let _ = ftp.quit();
            result
        })
        .await
        .map_err(|e| ConnectorError::Transport(format!("ftp worker task failed: {e}")))?
    }

    fn remove_recursive(ftp: &mut RustlsFtpStream, path: &str) -> ConnectorResult<()> {
        let lines = ftp.list(Some(path)).map_err(|e| map_ftp(path, e))?;
        for line in lines {
            let Ok(entry) = suppaftp::list::File::try_from(line.as_str()) else {
                continue;
            };
            let name = entry.name();
            if name == "." || name == ".." {
                continue;
            }
            let child = join_path(&[path, name]);
            if entry.is_directory() {
                Self::remove_recursive(ftp, &child)?;
            } else {
                ftp.rm(&child).map_err(|e| map_ftp(&child, e))?;
            }
        }
        ftp.rmdir(path).map_err(|e| map_ftp(path, e))
    }
}

#[async_trait]
impl FtpTransport for SuppaftpTransport {
    async fn check_access(&self, creds: &FtpCredentials) -> ConnectorResult<()> {
        Self::with_conn(creds, |_ftp| Ok(())).await
    }

    async fn mkdir_all(&self, creds: &FtpCredentials, path: &str) -> ConnectorResult<()> {
        let path = path.to_owned();
        Self::with_conn(creds, move |ftp| {
            let mut current = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                if !current.is_empty() {
                    current.push('/');
                }
                current.push_str(segment);
                if let Err(e) = ftp.mkdir(&current) {
                    if mkdir_conflict(&e) {
                        debug!(path = %current, "mkdir skipped, directory exists");
                    } else {
                        return Err(ConnectorError::Ftp(e));
                    }
                }
            }
            Ok(())
        })
        .await
    }

    async fn upload(
        &self,
        creds: &FtpCredentials,
        path: &str,
        content: FileContent,
        progress: Option<ProgressFn>,
    ) -> ConnectorResult<u64> {
        let path = path.to_owned();
        // The bridge is created here, on the runtime thread, and consumed on
        // the blocking worker; streams are fed through without buffering the
        // whole file.
        let reader: Box<dyn Read + Send> = match content {
            FileContent::Text(text) => Box::new(std::io::Cursor::new(text.into_bytes())),
            FileContent::Bytes(bytes) => Box::new(std::io::Cursor::new(bytes)),
            FileContent::Stream(stream) => Box::new(SyncIoBridge::new(stream)),
        };
        Self::with_conn(creds, move |ftp| {
            let mut reader = CountingReader {
                inner: reader,
                sent: 0,
                progress,
            };
            ftp.put_file(&path, &mut reader).map_err(|e| map_ftp(&path, e))
        })
        .await
    }

    async fn download(&self, creds: &FtpCredentials, path: &str) -> ConnectorResult<Vec<u8>> {
        let path = path.to_owned();
        Self::with_conn(creds, move |ftp| {
            let buffer = ftp
                .retr_as_buffer(&path)
                .map_err(|e| map_ftp(&path, e))?;
            Ok(buffer.into_inner())
        })
        .await
    }

    async fn delete_file(&self, creds: &FtpCredentials, path: &str) -> ConnectorResult<()> {
        let path = path.to_owned();
        Self::with_conn(creds, move |ftp| {
            ftp.rm(&path).map_err(|e| map_ftp(&path, e))
        })
        .await
    }

    async fn delete_dir(&self, creds: &FtpCredentials, path: &str) -> ConnectorResult<()> {
        let path = path.to_owned();
        Self::with_conn(creds, move |ftp| Self::remove_recursive(ftp, &path)).await
    }

    async fn list_dir(
        &self,
        creds: &FtpCredentials,
        path: &str,
    ) -> ConnectorResult<Vec<RemoteEntry>> {
        let path = path.to_owned();
        Self::with_conn(creds, move |ftp| {
            let lines = ftp.list(Some(&path)).map_err(|e| map_ftp(&path, e))?;
            let mut entries = Vec::new();
            for line in lines {
                match suppaftp::list::File::try_from(line.as_str()) {
                    Ok(file) => {
                        let name = file.name();
                        if name == "." || name == ".." {
                            continue;
                        }
                        entries.push(RemoteEntry {
                            name: name.to_owned(),
                            is_dir: file.is_directory(),
                        });
                    }
                    Err(e) => {
                        warn!(line = %line, error = %e, "Skipping unparseable LIST line");
                    }
                }
            }
            Ok(entries)
        })
        .await
    }
}

/// FTP connector. One instance per role; the role decides which root path
/// inside the session credentials is used.
#[derive(Clone)]
pub struct FtpConnector {
    connector_type: ConnectorType,
    options: FtpOptions,
    transport: Arc<dyn FtpTransport>,
}

impl FtpConnector {
    pub fn new(connector_type: ConnectorType, options: FtpOptions) -> Self {
        Self {
            connector_type,
            options,
            transport: Arc::new(SuppaftpTransport),
        }
    }

    pub fn with_transport(
        connector_type: ConnectorType,
        options: FtpOptions,
        transport: Arc<dyn FtpTransport>,
    ) -> Self {
        Self {
            connector_type,
            options,
            transport,
        }
    }

    fn credentials(&self, session: &ConnectorSession) -> ConnectorResult<FtpCredentials> {
        session
            .get::<FtpCredentials>(&self.options.connector_id, self.connector_type)?
            .ok_or_else(|| {
                ConnectorError::Unauthorized(format!(
                    "no ftp credentials in session for the {} role",
                    self.connector_type
                ))
            })
    }

    /// Root path for the current role. Absent means the login directory.
    fn root(&self, creds: &FtpCredentials) -> String {
        let configured = match self.connector_type {
            ConnectorType::Storage => creds.storage_root_path.as_deref(),
            ConnectorType::Hosting => creds.publication_path.as_deref(),
        };
        configured.unwrap_or_default().to_owned()
    }

    fn website_root(&self, creds: &FtpCredentials, website_id: &str) -> String {
        join_path(&[&self.root(creds), website_id])
    }

    fn asset_path(&self, creds: &FtpCredentials, website_id: &str, path: &str) -> String {
        join_path(&[
            &self.root(creds),
            website_id,
            &self.options.assets_folder,
            path,
        ])
    }

    fn connector_data(&self) -> ConnectorData {
        ConnectorData {
            connector_id: self.options.connector_id.clone(),
            connector_type: self.connector_type,
            display_name: self.options.display_name.clone(),
        }
    }

    /// Sequential per-file upload loop shared by `write_assets` and
    /// `publish`. Most FTP servers handle concurrent writes poorly, and the
    /// progress log must stay strictly ordered, so files go one at a time.
    async fn write_files(
        &self,
        creds: &FtpCredentials,
        base: &str,
        files: Vec<ConnectorFile>,
        status: Option<&StatusCallback>,
    ) -> ConnectorResult<()> {
        let emit = |job_status: JobStatus, message: String| {
            if let Some(cb) = status {
                cb(job_status, message);
            }
        };
        let total = files.len();
        for (index, file) in files.into_iter().enumerate() {
            let dest = join_path(&[base, &file.path]);
            emit(
                JobStatus::InProgress,
                format!("Writing file {}/{total}: {}", index + 1, file.path),
            );
            if let Some(parent) = parent_dir(&dest) {
                if let Err(e) = self.transport.mkdir_all(creds, parent).await {
                    emit(
                        JobStatus::Error,
                        format!("Failed to create directory {parent}: {e}"),
                    );
                    return Err(e);
                }
            }
            let progress: Option<ProgressFn> = status.map(|cb| {
                let cb = cb.clone();
                let path = file.path.clone();
                let progress: ProgressFn = Arc::new(move |sent| {
                    cb(
                        JobStatus::InProgress,
                        format!("Writing {path} ({sent} bytes sent)"),
                    );
                });
                progress
            });
            match self
                .transport
                .upload(creds, &dest, file.content, progress)
                .await
            {
                Ok(written) => {
                    debug!(path = %dest, written, "Uploaded file");
                    emit(JobStatus::InProgress, format!("Wrote {}", file.path));
                }
                Err(e) => {
                    emit(
                        JobStatus::Error,
                        format!("Failed to write {}: {e}", file.path),
                    );
                    return Err(e);
                }
            }
        }
        emit(JobStatus::Success, format!("Wrote {total} files"));
        Ok(())
    }

    fn copy_tree<'a>(
        &'a self,
        creds: &'a FtpCredentials,
        src: String,
        dst: String,
    ) -> Pin<Box<dyn Future<Output = ConnectorResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let entries = match self.transport.list_dir(creds, &src).await {
                Ok(entries) => entries,
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            };
            self.transport.mkdir_all(creds, &dst).await?;
            for entry in entries {
                let child_src = join_path(&[&src, &entry.name]);
                let child_dst = join_path(&[&dst, &entry.name]);
                if entry.is_dir {
                    self.copy_tree(creds, child_src, child_dst).await?;
                } else {
                    let bytes = self.transport.download(creds, &child_src).await?;
                    self.transport
                        .upload(creds, &child_dst, FileContent::Bytes(bytes), None)
                        .await?;
                }
            }
            Ok(())
        })
    }

    fn role_fields_html(&self) -> String {
        match self.connector_type {
            ConnectorType::Storage => {
                r#"<label>Root path <input type="text" name="storageRootPath" placeholder="/websites"></label>"#
                    .to_string()
            }
            ConnectorType::Hosting => [
                r#"<label>Publication path <input type="text" name="publicationPath" placeholder="/public_html"></label>"#,
                r#"<label>Website URL <input type="url" name="websiteUrl" placeholder="https://example.com"></label>"#,
            ]
            .join("\n    "),
        }
    }

    fn login_form_html(&self, redirect_to: &str) -> String {
        let role_fields = self.role_fields_html();
        format!(
            r#"<form method="post" action="{redirect_to}">
    <label>Host <input type="text" name="host" required></label>
    <label>User <input type="text" name="user" required></label>
    <label>Password <input type="password" name="pass" required></label>
    <label>Port <input type="number" name="port" value="21"></label>
    <label>Use FTPS <input type="checkbox" name="secure"></label>
    {role_fields}
    <button type="submit">Login</button>
</form>"#
        )
    }

    /// Post-login form for the role-specific path settings only; the
    /// credentials themselves are not editable without a fresh login.
    fn settings_form_html(&self, redirect_to: &str) -> String {
        let role_fields = self.role_fields_html();
        format!(
            r#"<form method="post" action="{redirect_to}">
    {role_fields}
    <button type="submit">Save</button>
</form>"#
        )
    }
}

#[async_trait]
impl Connector for FtpConnector {
    fn connector_id(&self) -> &str {
        &self.options.connector_id
    }

    fn display_name(&self) -> &str {
        &self.options.display_name
    }

    fn connector_type(&self) -> ConnectorType {
        self.connector_type
    }

    async fn get_oauth_url(
        &self,
        _session: &mut ConnectorSession,
    ) -> ConnectorResult<Option<String>> {
        Ok(None)
    }

    async fn get_login_form(
        &self,
        _session: &ConnectorSession,
        redirect_to: &str,
    ) -> ConnectorResult<Option<String>> {
        Ok(Some(self.login_form_html(redirect_to)))
    }

    async fn get_settings_form(
        &self,
        _session: &ConnectorSession,
        redirect_to: &str,
    ) -> ConnectorResult<Option<String>> {
        Ok(Some(self.settings_form_html(redirect_to)))
    }

    async fn is_logged_in(&self, session: &ConnectorSession) -> bool {
        match self.credentials(session) {
            Ok(creds) => self.transport.check_access(&creds).await.is_ok(),
            Err(_) => false,
        }
    }

    async fn set_token(
        &self,
        session: &mut ConnectorSession,
        payload: serde_json::Value,
    ) -> ConnectorResult<()> {
        // The settings form posts only the role paths; merge those over the
        // credentials already in the session.
        let payload = match self.credentials(session) {
            Ok(existing) if payload.get("host").is_none() => {
                let mut merged = serde_json::to_value(existing)?;
                if let (Some(base), Some(update)) = (merged.as_object_mut(), payload.as_object()) {
                    for (key, value) in update {
                        base.insert(key.clone(), value.clone());
                    }
                }
                merged
            }
            _ => payload,
        };
        let creds: FtpCredentials = serde_json::from_value(payload)
            .map_err(|e| ConnectorError::Session(format!("invalid ftp credentials: {e}")))?;
        self.transport.check_access(&creds).await?;
        session.set(&self.options.connector_id, self.connector_type, &creds)
    }

    async fn logout(&self, session: &mut ConnectorSession) -> ConnectorResult<()> {
        session.remove(&self.options.connector_id, self.connector_type);
        Ok(())
    }

    async fn get_user(&self, session: &ConnectorSession) -> ConnectorResult<ConnectorUser> {
        let creds = self.credentials(session)?;
        Ok(ConnectorUser {
            name: format!("{}@{}", creds.user, creds.host),
            email: None,
            picture: None,
            storage: self.connector_data(),
        })
    }
}

#[async_trait]
impl StorageConnector for FtpConnector {
    async fn list_websites(&self, session: &ConnectorSession) -> ConnectorResult<Vec<WebsiteMeta>> {
        let creds = self.credentials(session)?;
        let root = self.root(&creds);
        let entries = self.transport.list_dir(&creds, &root).await?;
        let mut websites = Vec::new();
        for entry in entries.into_iter().filter(|entry| entry.is_dir) {
            let meta_path = join_path(&[&root, &entry.name, WEBSITE_META_DATA_FILE]);
            match self.transport.download(&creds, &meta_path).await {
                Ok(bytes) => match serde_json::from_slice::<WebsiteMetaFileContent>(&bytes) {
                    Ok(meta) => websites.push(WebsiteMeta {
                        website_id: entry.name,
                        name: meta.name,
                        image_url: meta.image_url,
                        created_at: None,
                        updated_at: None,
                    }),
                    Err(e) => {
                        warn!(path = %meta_path, error = %e, "Skipping website with unreadable meta file");
                    }
                },
                Err(e) => {
                    warn!(path = %meta_path, error = %e, "Skipping folder without meta file");
                }
            }
        }
        Ok(websites)
    }

    async fn create_website(
        &self,
        session: &ConnectorSession,
        meta: Option<WebsiteMetaFileContent>,
    ) -> ConnectorResult<WebsiteId> {
        let creds = self.credentials(session)?;
        let website_id = Uuid::new_v4().to_string();
        let meta = meta.unwrap_or_else(|| WebsiteMetaFileContent {
            name: "New website".into(),
            image_url: None,
        });
        let assets_dir = join_path(&[
            &self.root(&creds),
            &website_id,
            &self.options.assets_folder,
        ]);
        self.transport.mkdir_all(&creds, &assets_dir).await?;
        let data_path = join_path(&[&self.website_root(&creds, &website_id), WEBSITE_DATA_FILE]);
        let data_json = serde_json::to_string_pretty(&WebsiteData::default())?;
        self.transport
            .upload(&creds, &data_path, FileContent::Text(data_json), None)
            .await?;
        let meta_path = join_path(&[
            &self.website_root(&creds, &website_id),
            WEBSITE_META_DATA_FILE,
        ]);
        let meta_json = serde_json::to_string_pretty(&meta)?;
        self.transport
            .upload(&creds, &meta_path, FileContent::Text(meta_json), None)
            .await?;
        Ok(website_id)
    }

    async fn read_website(
        &self,
        session: &ConnectorSession,
        website_id: &str,
    ) -> ConnectorResult<WebsiteData> {
        let creds = self.credentials(session)?;
        let path = join_path(&[&self.website_root(&creds, website_id), WEBSITE_DATA_FILE]);
        let bytes = self.transport.download(&creds, &path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn update_website(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        data: WebsiteData,
    ) -> ConnectorResult<()> {
        let creds = self.credentials(session)?;
        let root = self.website_root(&creds, website_id);
        self.transport.mkdir_all(&creds, &root).await?;
        let path = join_path(&[&root, WEBSITE_DATA_FILE]);
        let json = serde_json::to_string_pretty(&data)?;
        self.transport
            .upload(&creds, &path, FileContent::Text(json), None)
            .await?;
        Ok(())
    }

    async fn delete_website(
        &self,
        session: &ConnectorSession,
        website_id: &str,
    ) -> ConnectorResult<()> {
        let creds = self.credentials(session)?;
        let root = self.website_root(&creds, website_id);
        self.transport.delete_dir(&creds, &root).await
    }

    async fn duplicate_website(
        &self,
        session: &ConnectorSession,
        website_id: &str,
    ) -> ConnectorResult<WebsiteId> {
        let creds = self.credentials(session)?;
        let data = self.read_website(session, website_id).await?;
        let meta = self.get_website_meta(session, website_id).await?;
        let copy_meta = WebsiteMetaFileContent {
            name: format!("{} Copy", meta.name),
            image_url: meta.image_url,
        };
        let new_id = self.create_website(session, Some(copy_meta)).await?;
        self.update_website(session, &new_id, data).await?;
        let src_assets = self.asset_path(&creds, website_id, "");
        let dst_assets = self.asset_path(&creds, &new_id, "");
        self.copy_tree(&creds, src_assets, dst_assets).await?;
        Ok(new_id)
    }

    async fn get_website_meta(
        &self,
        session: &ConnectorSession,
        website_id: &str,
    ) -> ConnectorResult<WebsiteMeta> {
        let creds = self.credentials(session)?;
        let path = join_path(&[
            &self.website_root(&creds, website_id),
            WEBSITE_META_DATA_FILE,
        ]);
        let bytes = self.transport.download(&creds, &path).await?;
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
        let creds = self.credentials(session)?;
        let root = self.website_root(&creds, website_id);
        self.transport.mkdir_all(&creds, &root).await?;
        let path = join_path(&[&root, WEBSITE_META_DATA_FILE]);
        let json = serde_json::to_string_pretty(&meta)?;
        self.transport
            .upload(&creds, &path, FileContent::Text(json), None)
            .await?;
        Ok(())
    }

    async fn write_assets(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        files: Vec<ConnectorFile>,
        status: Option<StatusCallback>,
    ) -> ConnectorResult<()> {
        let creds = self.credentials(session)?;
        let base = join_path(&[
            &self.website_root(&creds, website_id),
            &self.options.assets_folder,
        ]);
        self.write_files(&creds, &base, files, status.as_ref()).await
    }

    async fn read_asset(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        path: &str,
    ) -> ConnectorResult<FileContent> {
        let creds = self.credentials(session)?;
        let full = self.asset_path(&creds, website_id, path);
        let bytes = self.transport.download(&creds, &full).await?;
        Ok(FileContent::Bytes(bytes))
    }

    async fn delete_assets(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        paths: Vec<String>,
    ) -> ConnectorResult<()> {
        let creds = self.credentials(session)?;
        for path in paths {
            let full = self.asset_path(&creds, website_id, &path);
            self.transport.delete_file(&creds, &full).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl HostingConnector for FtpConnector {
    async fn publish(
        &self,
        session: &ConnectorSession,
        website_id: &str,
        files: Vec<ConnectorFile>,
        job_manager: &JobManager,
    ) -> ConnectorResult<JobData> {
        let creds = self.credentials(session)?;
        let job = job_manager.start_job(format!("Publishing website {website_id} over FTP"));
        let job_id = job.job_id;
        let jm = job_manager.clone();
        let connector = self.clone();
        tokio::spawn(async move {
            let base = connector.root(&creds);
            let assets_dir = join_path(&[&base, &connector.options.assets_folder]);
            let css_dir = join_path(&[&base, &connector.options.css_folder]);
            for dir in [&base, &assets_dir, &css_dir] {
                if dir.is_empty() {
                    continue;
                }
                if let Err(e) = connector.transport.mkdir_all(&creds, dir).await {
                    jm.add_job_error(job_id, format!("Failed to create {dir}: {e}"));
                    jm.job_error(job_id, format!("Publication failed: {e}"));
                    return;
                }
            }
            let status: StatusCallback = {
                let jm = jm.clone();
                Arc::new(move |job_status, message| match job_status {
                    JobStatus::InProgress => {
                        jm.add_job_log(job_id, message.clone());
                        jm.job_progress(job_id, message);
                    }
                    JobStatus::Success => {
                        jm.add_job_log(job_id, message);
                    }
                    JobStatus::Error => {
                        jm.add_job_error(job_id, message);
                    }
                })
            };
            match connector
                .write_files(&creds, &base, files, Some(&status))
                .await
            {
                Ok(()) => {
                    let url = creds.website_url.clone().unwrap_or_default();
                    let message = if url.is_empty() {
                        "Publication success".to_string()
                    } else {
                        format!(
                            "Publication success. Your website is live at <a href=\"{url}\" target=\"_blank\">{url}</a>"
                        )
                    };
                    jm.job_success(job_id, message);
                }
                Err(e) => {
                    jm.job_error(job_id, format!("Publication failed: {e}"));
                }
            }
        });
        Ok(job)
    }

    async fn get_url(
        &self,
        session: &ConnectorSession,
        _website_id: &str,
    ) -> ConnectorResult<String> {
        let creds = self.credentials(session)?;
        Ok(creds.website_url.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use suppaftp::types::Response;

    #[test]
    fn join_path_trims_and_skips_empty_segments() {
        assert_eq!(join_path(&["sites/", "/w1", "assets"]), "sites/w1/assets");
        assert_eq!(join_path(&["", "w1", ""]), "w1");
        assert_eq!(join_path(&[]), "");
    }

    #[test]
    fn parent_dir_stops_at_the_top_level() {
        assert_eq!(parent_dir("a/b/c.html"), Some("a/b"));
        assert_eq!(parent_dir("c.html"), None);
    }

    #[test]
    fn only_a_550_counts_as_an_existing_directory() {
        let exists = FtpError::UnexpectedResponse(Response {
            status: Status::FileUnavailable,
            body: b"550 Directory already exists".to_vec(),
        });
        assert!(mkdir_conflict(&exists));

        let denied = FtpError::UnexpectedResponse(Response {
            status: Status::NotLoggedIn,
            body: b"530 Access denied".to_vec(),
        });
        assert!(!mkdir_conflict(&denied));

        let dropped = FtpError::ConnectionError(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(!mkdir_conflict(&dropped));
    }
}

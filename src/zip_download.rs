//! Hosting connector that "publishes" by building a zip archive of the site
//! and handing the user a download link.
//!
//! No credentials are involved: the connector is always logged in and the
//! auth surface is a set of no-ops. The archive is written to a temp
//! directory; the embedding server serves it under the download route and
//! maps the link's file name back to a path through [`DownloadConnector::resolve`].

use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::contract::{Connector, ConnectorData, ConnectorFile, ConnectorUser, HostingConnector};
use crate::error::{ConnectorError, ConnectorResult};
use crate::job::{JobData, JobManager};
use crate::session::{ConnectorSession, ConnectorType};

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub connector_id: String,
    pub display_name: String,
    /// Route prefix the embedding server serves archives under; only used
    /// to render the link in the job's success message.
    pub download_route: String,
    /// Where archives are written. Defaults to the system temp directory.
    pub tmp_dir: Option<PathBuf>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            connector_id: "download".into(),
            display_name: "Download".into(),
            download_route: "/download".into(),
            tmp_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadConnector {
    options: DownloadOptions,
}

impl DownloadConnector {
    pub fn new(options: DownloadOptions) -> Self {
        Self { options }
    }

    fn tmp_dir(&self) -> PathBuf {
        self.options
            .tmp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Map a file name from a download link back to the archive on disk.
    /// Rejects anything that could escape the temp directory.
    pub fn resolve(&self, file_name: &str) -> ConnectorResult<PathBuf> {
        if file_name.is_empty()
            || file_name.contains('/')
            || file_name.contains('\\')
            || file_name.contains("..")
        {
            warn!(file_name = %file_name, "Rejected download file name");
            return Err(ConnectorError::NotFound(format!(
                "no archive named {file_name}"
            )));
        }
        let path = self.tmp_dir().join(file_name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ConnectorError::NotFound(format!(
                "no archive named {file_name}"
            )))
        }
    }

    fn archive_name(website_id: &str) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let nonce: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        let id: String = website_id
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        format!("{id}-{millis}-{nonce}.zip")
    }

    /// Append files to the archive one at a time, hopping to the blocking
    /// pool for the actual zip I/O. The writer moves through each hop so
    /// content streaming stays on the async side.
    async fn build_archive(
        path: PathBuf,
        files: Vec<ConnectorFile>,
        jm: JobManager,
        job_id: crate::job::JobId,
    ) -> ConnectorResult<()> {
        let total = files.len();
        let mut writer = run_blocking(move || {
            let file = File::create(&path)?;
            Ok(ZipWriter::new(file))
        })
        .await?;
        for (index, file) in files.into_iter().enumerate() {
            jm.job_progress(
                job_id,
                format!("Archiving file {}/{total}: {}", index + 1, file.path),
            );
            let entry_name = file.path.trim_start_matches('/').to_owned();
            let bytes = file.content.into_bytes().await?;
            writer = run_blocking(move || {
                writer.start_file(entry_name, SimpleFileOptions::default())?;
                writer.write_all(&bytes)?;
                Ok(writer)
            })
            .await?;
            jm.add_job_log(job_id, format!("Archived file {}/{total}", index + 1));
        }
        run_blocking(move || {
            writer.finish()?;
            Ok(())
        })
        .await
    }
}

async fn run_blocking<T: Send + 'static>(
    work: impl FnOnce() -> ConnectorResult<T> + Send + 'static,
) -> ConnectorResult<T> {
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ConnectorError::Transport(format!("archive task failed: {e}")))?
}

#[async_trait]
impl Connector for DownloadConnector {
    fn connector_id(&self) -> &str {
        &self.options.connector_id
    }

    fn display_name(&self) -> &str {
        &self.options.display_name
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Hosting
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

    async fn is_logged_in(&self, _session: &ConnectorSession) -> bool {
        true
    }

    async fn set_token(
        &self,
        _session: &mut ConnectorSession,
        _payload: serde_json::Value,
    ) -> ConnectorResult<()> {
        Ok(())
    }

    async fn logout(&self, _session: &mut ConnectorSession) -> ConnectorResult<()> {
        Ok(())
    }

    async fn get_user(&self, _session: &ConnectorSession) -> ConnectorResult<ConnectorUser> {
        Ok(ConnectorUser {
            name: self.options.display_name.clone(),
            email: None,
            picture: None,
            storage: ConnectorData {
                connector_id: self.options.connector_id.clone(),
                connector_type: ConnectorType::Hosting,
                display_name: self.options.display_name.clone(),
            },
        })
    }
}

#[async_trait]
impl HostingConnector for DownloadConnector {
    async fn publish(
        &self,
        _session: &ConnectorSession,
        website_id: &str,
        files: Vec<ConnectorFile>,
        job_manager: &JobManager,
    ) -> ConnectorResult<JobData> {
        let job = job_manager.start_job(format!("Building archive for website {website_id}"));
        let job_id = job.job_id;
        let jm = job_manager.clone();
        let archive_name = Self::archive_name(website_id);
        let path = self.tmp_dir().join(&archive_name);
        let route = self.options.download_route.trim_end_matches('/').to_owned();
        tokio::spawn(async move {
            match Self::build_archive(path.clone(), files, jm.clone(), job_id).await {
                Ok(()) => {
                    info!(path = %path.display(), "Archive built");
                    jm.job_success(
                        job_id,
                        format!(
                            "Archive ready: <a href=\"{route}/{archive_name}\" download>{archive_name}</a>"
                        ),
                    );
                }
                Err(e) => {
                    jm.add_job_error(job_id, e.to_string());
                    jm.job_error(job_id, format!("Archive build failed: {e}"));
                }
            }
        });
        Ok(job)
    }

    /// A downloaded site has no hosted URL; the best answer is the route
    /// archives are served from.
    async fn get_url(
        &self,
        _session: &ConnectorSession,
        _website_id: &str,
    ) -> ConnectorResult<String> {
        Ok(self.options.download_route.clone())
    }
}

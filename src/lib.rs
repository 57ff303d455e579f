//! Connector framework for website storage and publication.
//!
//! Two capability traits cover every back-end: [`contract::StorageConnector`]
//! for document/asset CRUD and [`contract::HostingConnector`] for publishing.
//! Shipped connectors: FTP (both roles), GitLab (storage), GitLab Pages
//! (hosting) and a zip-download pseudo-host. Long-running publications run
//! as background jobs tracked by [`job::JobManager`].

pub mod contract;
pub mod error;
pub mod ftp;
pub mod gitlab;
pub mod job;
pub mod session;
pub mod zip_download;

pub use contract::{Connector, ConnectorFile, FileContent, HostingConnector, StorageConnector};
pub use error::{ConnectorError, ConnectorResult};
pub use job::{JobManager, JobStatus};
pub use session::{ConnectorSession, ConnectorType};

use std::path::PathBuf;

use thiserror::Error;

use prearc_types::ErrorCategory;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("cannot read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("cannot serialize config: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("dicom error: {0}")]
    Dicom(#[from] prearc_dicom::DicomError),

    #[error("store error: {0}")]
    Store(#[from] prearc_store::StoreError),

    #[error("service error: {0}")]
    Service(#[from] prearc_services::ServiceError),

    #[error("import error: {0}")]
    Staging(#[from] prearc_staging::StagingError),

    #[error("archive error: {0}")]
    Merge(#[from] prearc_merge::MergeError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl SdkError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Staging(e) => e.category(),
            Self::Merge(e) => e.category(),
            Self::Store(e) if e.is_transient() => ErrorCategory::Transient,
            Self::ConfigIo { .. }
            | Self::ConfigParse(_)
            | Self::ConfigWrite(_)
            | Self::InvalidConfig(_)
            | Self::Dicom(_) => ErrorCategory::ClientInput,
            Self::Service(prearc_services::ServiceError::Forbidden { .. }) => {
                ErrorCategory::ClientInput
            }
            Self::Store(_) | Self::Service(_) | Self::Task(_) => ErrorCategory::Fatal,
        }
    }
}

pub type SdkResult<T> = Result<T, SdkError>;

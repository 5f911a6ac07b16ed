use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum DocError {
    #[error("No container binding registered for resource '{0}'")]
    UnknownResource(String),

    #[error("Resource '{0}' is already bound to a container")]
    DuplicateRegistration(String),

    #[error("Document '{id}' not found in partition '{partition_key}'")]
    NotFound { id: String, partition_key: String },

    #[error("Document '{id}' already exists in partition '{partition_key}'")]
    AlreadyExists { id: String, partition_key: String },

    #[error("Version conflict on document '{id}' in partition '{partition_key}'")]
    VersionConflict { id: String, partition_key: String },

    #[error("Invalid default document: {0}")]
    InvalidDefault(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error(
        "Could not reach the local document database emulator at '{endpoint}'. \
         Make sure the emulator is installed and running"
    )]
    EmulatorNotRunning {
        endpoint: String,
        #[source]
        source: Box<DocError>,
    },

    #[error("{} errors occurred: {}", .0.len(), join_messages(.0))]
    Aggregate(Vec<DocError>),

    #[error("Change feed processor '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DocError>;

/// Coarse classification used by the retrying write protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    AlreadyExists,
    Invalid,
    Cancelled,
    Other,
}

impl DocError {
    pub fn not_found(id: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self::NotFound {
            id: id.into(),
            partition_key: partition_key.into(),
        }
    }

    pub fn already_exists(id: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            id: id.into(),
            partition_key: partition_key.into(),
        }
    }

    pub fn version_conflict(id: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self::VersionConflict {
            id: id.into(),
            partition_key: partition_key.into(),
        }
    }

    pub fn service_unavailable(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::VersionConflict { .. } => ErrorKind::Conflict,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InvalidDefault(_)
            | Self::InvalidDocument(_)
            | Self::InvalidConfig(_)
            | Self::Serialization(_) => ErrorKind::Invalid,
            Self::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_version_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

fn join_messages(errors: &[DocError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl<T> From<std::sync::PoisonError<T>> for DocError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

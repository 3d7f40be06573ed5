use thiserror::Error;

/// Configuration problems found while deriving a cluster's resources
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("invalid secret type {actual}; user-provided secret {name} must be of type: kubernetes.io/basic-auth")]
    InvalidSecretType { name: String, actual: String },
    #[error("{key} key not found in secret {name}")]
    MissingSecretKey { name: String, key: &'static str },
    #[error("user-provided basic-auth secret {0} not found")]
    BasicAuthSecretNotFound(String),
    #[error("solrTls must set either pkcs12Secret or mountedTLSDir")]
    MissingTlsCertificateSource,
    #[error("backup repository {name} must declare exactly one of gcs, s3 or volume")]
    UnrecognizedBackupRepository { name: String },
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error("zookeeper connection for {0} is not available yet")]
    ZookeeperNotReady(String),
}

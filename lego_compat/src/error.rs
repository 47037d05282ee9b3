use std::path::PathBuf;

use thiserror::Error;

use crate::symbols::VmError;

#[derive(Debug, Error)]
pub enum LegoError {
    /// The VM refused one of the fixed overrides; scripts calling that name
    /// would hit the missing native implementation.
    #[error("script VM rejected override `{name}`")]
    OverrideRejected {
        name: String,
        #[source]
        source: VmError,
    },
    #[error("invalid symbol id ({0})")]
    InvalidSymbol(i32),
    #[error("class `{0}` does not declare an instance size")]
    MissingClassSize(String),
    #[error("memory collaborator could not allocate {0} bytes")]
    AllocationFailed(u32),
    #[error("failed to read config {}", path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config")]
    Config(#[from] serde_json::Error),
}

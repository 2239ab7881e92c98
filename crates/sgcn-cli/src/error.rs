use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] sgcn_core::ValidationError),

    #[error(transparent)]
    Config(#[from] sgcn_core::ConfigError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Load(#[from] sgcn_core::pipeline::LoadError),

    #[error(transparent)]
    Resolve(#[from] sgcn_core::ResolveError),

    #[error(transparent)]
    Cache(#[from] sgcn_core::CacheError),

    #[error(transparent)]
    Warehouse(#[from] sgcn_warehouse::WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 2,
            Self::Command(_) => 2,
            Self::Load(_) => 3,
            Self::Resolve(_) => 3,
            Self::Serialization(_) => 4,
            Self::Cache(_) => 5,
            Self::Warehouse(_) => 5,
            Self::Io(_) => 10,
        }
    }
}

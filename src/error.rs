use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Decomposition error: {0}")]
    Decomposition(String),

    #[error("Adding dependency from {from} to {to} would create a cycle")]
    Cycle { from: String, to: String },

    #[error("Invalid status transition for task {task}: {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: String,
        to: String,
    },

    #[error("Sandbox provisioning failed: {0}")]
    SandboxProvision(String),

    #[error("Hydration failed (rolled back): {0}")]
    Hydration(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Worker pool is full (max: {max})")]
    WorkerPoolFull { max: usize },

    #[error("Worker not found: {id}")]
    WorkerNotFound { id: crate::orchestration::WorkerId },

    #[error("No recorded run: {0}")]
    RunNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

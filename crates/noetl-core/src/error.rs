use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("template error: {0}")]
    Template(String),

    #[error("unresolved path in scope: {0}")]
    TemplateUnresolved(String),

    #[error("condition error: {0}")]
    Condition(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("event store error: {0}")]
    EventStore(String),

    #[error("keychain error: {0}")]
    Keychain(String),

    #[error("result store error: {0}")]
    ResultStore(String),

    #[error("tool adapter error: {0}")]
    ToolAdapter(String),

    #[error("catalog entry not found: {0}")]
    CatalogUnresolved(String),

    #[error("lease expired for queue item {0}")]
    LeaseExpired(i64),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    pub fn condition(msg: impl Into<String>) -> Self {
        Self::Condition(msg.into())
    }
}

use thiserror::Error;
use tokio::task::JoinError;

use unified::api::EntityType;
use unified::error::UnifiedError;
use unified::source::SourceKind;

#[derive(Error, Debug)]
pub enum HubError {
    /* mapped errors */
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    JoinError(#[from] JoinError),

    #[error(transparent)]
    ConfigError(#[from] config::ConfigError),

    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    SetLoggerError(#[from] log::SetLoggerError),

    #[error(transparent)]
    UnifiedError(#[from] UnifiedError),

    /* lookup errors */
    #[error("Entity {0:?} not found")]
    EntityNotFound(String),

    #[error("No adapter registered for source {0}")]
    AdapterNotFound(SourceKind),

    #[error("Adapter {0:?} not found")]
    AdapterIdNotFound(String),

    #[error("Room {0:?} not found")]
    RoomNotFound(String),

    #[error("Area {0:?} not found")]
    AreaNotFound(String),

    /* registration errors */
    #[error("Entity {0:?} already registered from source {1}")]
    AlreadyRegistered(String, SourceKind),

    #[error("Adapter {0:?} already registered")]
    AdapterAlreadyRegistered(String),

    #[error("Entity registry full ({0} entities)")]
    RegistryFull(usize),

    /* validation errors */
    #[error("Entity has an empty id")]
    EmptyEntityId,

    #[error("Priority {0} is invalid (must be >= 0)")]
    InvalidPriority(i64),

    #[error("Entity {entity:?} does not support action {action:?}")]
    UnsupportedAction { entity: String, action: String },

    #[error("Entity type {0} not handled by this adapter")]
    UnsupportedEntityType(EntityType),

    /* capacity errors */
    #[error("Too many concurrent syncs")]
    TooManyConcurrentSyncs,

    /* adapter errors */
    #[error("Adapter {0:?} is not connected")]
    NotConnected(String),

    #[error("Authentication with upstream failed")]
    Unauthenticated,

    #[error("Upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Operation exceeded its deadline")]
    DeadlineExceeded,

    /* cache errors */
    #[error("Entity {0:?} not in cache")]
    CacheMiss(String),

    #[error("Entity cache unavailable: {0}")]
    CacheUnavailable(String),
}

impl HubError {
    /// Short machine-readable code, used for `ControlResult::error` payloads.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::EntityNotFound(_) => "entity_not_found",
            Self::AdapterNotFound(_) | Self::AdapterIdNotFound(_) => "adapter_not_found",
            Self::RoomNotFound(_) | Self::AreaNotFound(_) => "room_not_found",
            Self::AlreadyRegistered(..) | Self::AdapterAlreadyRegistered(_) => "already_registered",
            Self::RegistryFull(_) => "registry_full",
            Self::EmptyEntityId | Self::InvalidPriority(_) => "invalid",
            Self::UnsupportedAction { .. } | Self::UnsupportedEntityType(_) => "unsupported_action",
            Self::TooManyConcurrentSyncs => "too_many_concurrent_syncs",
            Self::NotConnected(_) => "not_connected",
            Self::Unauthenticated => "unauthenticated",
            Self::Upstream { .. } => "upstream_error",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::CacheMiss(_) | Self::CacheUnavailable(_) => "cache_error",
            _ => "internal_error",
        }
    }
}

pub type HubResult<T> = Result<T, HubError>;

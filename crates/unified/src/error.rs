use thiserror::Error;

#[derive(Error, Debug)]
pub enum UnifiedError {
    /* mapped errors */
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /* model errors */
    #[error("Unknown source kind: {0:?}")]
    UnknownSourceKind(String),

    #[error("Unknown entity type: {0:?}")]
    UnknownEntityType(String),

    #[error("Quality score {0} outside [0, 1]")]
    InvalidQualityScore(f64),

    #[error("Conflict resolution requires at least one candidate")]
    NoEntitiesProvided,

    #[error("Control action has an empty {0} field")]
    EmptyActionField(&'static str),
}

pub type UnifiedResult<T> = Result<T, UnifiedError>;

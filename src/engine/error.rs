use ulid::Ulid;

/// What a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Property,
    Rental,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::User => f.write_str("user"),
            Entity::Property => f.write_str("property"),
            Entity::Rental => f.write_str("rental"),
        }
    }
}

/// Coarse classification adapters map to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Unauthenticated,
    Forbidden,
    Validation,
    StateConflict,
    LimitExceeded,
    Storage,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Validation => "validation",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::LimitExceeded => "limit_exceeded",
            ErrorKind::Storage => "storage",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Entity, Ulid),
    /// The acting user id does not resolve to a registered user.
    Unauthenticated(Ulid),
    Forbidden {
        actor: Ulid,
        rental: Ulid,
    },
    Validation(String),
    StateConflict(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(..) => ErrorKind::NotFound,
            EngineError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            EngineError::Forbidden { .. } => ErrorKind::Forbidden,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::StateConflict(_) => ErrorKind::StateConflict,
            EngineError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            EngineError::WalError(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub(crate) fn conflict(msg: impl Into<String>) -> Self {
        EngineError::StateConflict(msg.into())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(entity, id) => write!(f, "{entity} not found: {id}"),
            EngineError::Unauthenticated(id) => write!(f, "unknown user: {id}"),
            EngineError::Forbidden { actor, rental } => {
                write!(f, "user {actor} has no rights over rental {rental}")
            }
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::StateConflict(msg) => write!(f, "state conflict: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

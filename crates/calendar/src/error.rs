use {
    chrono::{DateTime, Utc},
    chronos_common::FromMessage,
};

use crate::types::{CalendarId, UserId};

/// Coarse classification used by transports to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Forbidden,
    NotFound,
    BadRequest,
    Conflict,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("forbidden: {action}")]
    Forbidden { action: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("user {user_id} is already a member of calendar {calendar_id}")]
    DuplicateMembership {
        calendar_id: CalendarId,
        user_id: UserId,
    },

    #[error("the owner of calendar {calendar_id} cannot be removed")]
    OwnerRemovalForbidden { calendar_id: CalendarId },

    #[error("calendar {calendar_id} would be left without an owner")]
    OwnerDemotionForbidden { calendar_id: CalendarId },

    #[error("calendar {calendar_id} has no owner")]
    OwnerMissing { calendar_id: CalendarId },

    #[error("event ends ({end}) before it starts ({start})")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("recurrence `{rule}` has no next occurrence")]
    MalformedRecurrence { rule: String },

    #[error("tag `{name}` already exists in calendar {calendar_id}")]
    DuplicateTag {
        calendar_id: CalendarId,
        name: String,
    },

    #[error("{message}")]
    BadRequest { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn forbidden(action: impl Into<String>) -> Self {
        Self::Forbidden {
            action: action.into(),
        }
    }

    #[must_use]
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::NotFound { .. } | Self::OwnerMissing { .. } => ErrorKind::NotFound,
            Self::DuplicateMembership { .. }
            | Self::OwnerRemovalForbidden { .. }
            | Self::OwnerDemotionForbidden { .. }
            | Self::InvalidTimeRange { .. }
            | Self::MalformedRecurrence { .. }
            | Self::DuplicateTag { .. }
            | Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Sqlx(_) | Self::Migrate(_) | Self::Message { .. } => ErrorKind::Internal,
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

chronos_common::impl_context!();

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(Error::forbidden("delete event"), ErrorKind::Forbidden)]
    #[case(Error::not_found("calendar", "c1"), ErrorKind::NotFound)]
    #[case(Error::OwnerMissing { calendar_id: "c1".into() }, ErrorKind::NotFound)]
    #[case(
        Error::OwnerRemovalForbidden { calendar_id: "c1".into() },
        ErrorKind::BadRequest
    )]
    #[case(
        Error::DuplicateMembership { calendar_id: "c1".into(), user_id: "u1".into() },
        ErrorKind::BadRequest
    )]
    #[case(Error::MalformedRecurrence { rule: "none".into() }, ErrorKind::BadRequest)]
    #[case(Error::conflict("role changed"), ErrorKind::Conflict)]
    #[case(Error::message("decode failed"), ErrorKind::Internal)]
    fn classifies(#[case] err: Error, #[case] expected: ErrorKind) {
        assert_eq!(err.kind(), expected);
    }

    #[test]
    fn not_found_message_names_entity() {
        let err = Error::not_found("event", "e-42");
        assert_eq!(err.to_string(), "event not found: e-42");
    }
}

use thiserror::Error;

use crate::domain::message::MessageError;
use crate::domain::payload::PayloadError;
use crate::domain::session::DrinkValidationError;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum DomainError {
    #[error(transparent)]
    InvalidDrink(#[from] DrinkValidationError),
    #[error(transparent)]
    InvalidMessage(#[from] MessageError),
    #[error(transparent)]
    InvalidPayload(#[from] PayloadError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("messaging failure: {0}")]
    Messaging(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested session could not be found.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::NotFound(message) => {
                Self::NotFound { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Persistence(message) | ApplicationError::Messaging(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

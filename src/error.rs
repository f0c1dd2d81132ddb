use crate::controller::ControllerStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("operation not valid while controller is {current:?} (attempted from {attempted:?})")]
    BadState {
        current: ControllerStatus,
        attempted: &'static str,
    },

    #[error("no container matched the request")]
    ProcessNotFound,

    #[error("fan-out produced no results")]
    NotFound,

    #[error("runner received an unknown message")]
    UnknownMessage,

    #[error("received Finish while idling; this is a protocol violation")]
    ProtocolViolation,

    #[error("synchronous call timed out after {0:?}")]
    Timeout(Duration),

    #[error("controller mailbox is closed")]
    ControllerGone,
}

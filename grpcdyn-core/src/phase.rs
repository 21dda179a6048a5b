//! # Phase Gate
//!
//! Load-testing scripts run in two phases: an init phase where definitions are loaded
//! once, and an execution phase where virtual users talk to servers. The host tells the
//! client which phase it is in on every call.
use crate::error::ErrorKind;

/// The script lifecycle phase the host is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Execution,
}

/// A client operation subject to phase restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Load,
    Connect,
    Invoke,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PhaseError {
    #[error("load must be called in the init context")]
    LoadOutsideInit,
    #[error("connecting to a gRPC server in the init context is not supported")]
    ConnectInInit,
    #[error("invoking RPC methods in the init context is not supported")]
    InvokeInInit,
}

impl PhaseError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::FailedPrecondition
    }
}

impl Phase {
    /// Checks whether `operation` may run in this phase.
    ///
    /// Loading definitions is only allowed during init, connecting and invoking only
    /// during execution.
    pub fn check(self, operation: Operation) -> Result<(), PhaseError> {
        match (self, operation) {
            (Phase::Init, Operation::Load) => Ok(()),
            (Phase::Execution, Operation::Load) => Err(PhaseError::LoadOutsideInit),
            (Phase::Init, Operation::Connect) => Err(PhaseError::ConnectInInit),
            (Phase::Init, Operation::Invoke) => Err(PhaseError::InvokeInInit),
            (Phase::Execution, Operation::Connect | Operation::Invoke) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_is_only_allowed_during_init() {
        assert_eq!(Phase::Init.check(Operation::Load), Ok(()));
        assert_eq!(
            Phase::Execution.check(Operation::Load),
            Err(PhaseError::LoadOutsideInit)
        );
    }

    #[test]
    fn network_operations_are_rejected_during_init() {
        assert_eq!(
            Phase::Init.check(Operation::Connect).unwrap_err().to_string(),
            "connecting to a gRPC server in the init context is not supported"
        );
        assert_eq!(
            Phase::Init.check(Operation::Invoke).unwrap_err().to_string(),
            "invoking RPC methods in the init context is not supported"
        );
        assert_eq!(Phase::Execution.check(Operation::Connect), Ok(()));
        assert_eq!(Phase::Execution.check(Operation::Invoke), Ok(()));
    }
}

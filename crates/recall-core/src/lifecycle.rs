//! Status transitions shared by namespaces and entries.
//!
//! Pending -> Ready (promotion)
//! Ready -> Replaced (demotion by a newer promotion)
//!
//! `Replaced` is terminal.

use crate::error::{RecallError, Result};
use crate::types::Status;

/// Validate that a status transition is allowed.
pub fn validate_transition(from: Status, to: Status) -> Result<()> {
    let valid = matches!(
        (from, to),
        (Status::Pending, Status::Ready) | (Status::Ready, Status::Replaced)
    );

    if valid {
        Ok(())
    } else {
        Err(RecallError::InvalidTransition { from, to })
    }
}

/// Only pending versions accept chunk writes.
pub fn ensure_writable(status: Status) -> Result<()> {
    if status == Status::Pending {
        Ok(())
    } else {
        Err(RecallError::InvalidTransition {
            from: status,
            to: Status::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_to_ready() {
        assert!(validate_transition(Status::Pending, Status::Ready).is_ok());
    }

    #[test]
    fn test_ready_to_replaced() {
        assert!(validate_transition(Status::Ready, Status::Replaced).is_ok());
    }

    #[test]
    fn test_pending_to_replaced_invalid() {
        assert!(validate_transition(Status::Pending, Status::Replaced).is_err());
    }

    #[test]
    fn test_replaced_is_terminal() {
        for to in [Status::Pending, Status::Ready, Status::Replaced] {
            assert!(validate_transition(Status::Replaced, to).is_err());
        }
    }

    #[test]
    fn test_ready_to_pending_invalid() {
        assert!(validate_transition(Status::Ready, Status::Pending).is_err());
    }

    #[test]
    fn test_self_transitions_invalid() {
        assert!(validate_transition(Status::Pending, Status::Pending).is_err());
        assert!(validate_transition(Status::Ready, Status::Ready).is_err());
    }

    #[test]
    fn test_ensure_writable() {
        assert!(ensure_writable(Status::Pending).is_ok());
        assert!(matches!(
            ensure_writable(Status::Ready),
            Err(RecallError::InvalidTransition { .. })
        ));
        assert!(ensure_writable(Status::Replaced).is_err());
    }
}

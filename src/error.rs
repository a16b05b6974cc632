use thiserror::Error;

use crate::session::State;

/// Reason reported to the owning library when the session asks for its transport
/// connection to be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer's response failed uuid / request-timestamp validation, or it rejected
    ///  our Negotiate / Establish outright.
    FailedAuthentication,
    /// Regular end of the session after a Terminate handshake.
    Logout,
}

/// The ways a session can fail.
///
/// Transient transport back-pressure is *not* an error - it is handled internally by
///  retrying on a later poll and never surfaces here.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A send API was called in a state that must not send application messages. The
    ///  session state is left untouched.
    #[error("state should be Established or AwaitingKeepalive in order to send but is {0:?}")]
    NotSendable(State),

    /// The peer echoed a uuid or request timestamp that does not match what we sent,
    ///  or rejected a Negotiate / Establish request.
    #[error("{0}")]
    IllegalResponse(String),

    /// No NegotiationResponse arrived within the resend interval, twice.
    #[error("timed out: no reply for Negotiate")]
    NegotiateTimeout,

    /// No EstablishmentAck arrived within the resend interval, twice.
    #[error("timed out: no reply for Establish")]
    EstablishTimeout,

    /// The configured user key could not be decoded or the HMAC primitive failed.
    #[error("authentication failure: {0}")]
    Authentication(String),

    /// An inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_sendable_message() {
        let error = SessionError::NotSendable(State::SentNegotiate);
        assert_eq!(
            error.to_string(),
            "state should be Established or AwaitingKeepalive in order to send but is SentNegotiate",
        );
    }

    #[test]
    fn test_illegal_response_passthrough() {
        let error = SessionError::IllegalResponse("Invalid Negotiate.uuid=7,expected=8".to_string());
        assert_eq!(error.to_string(), "Invalid Negotiate.uuid=7,expected=8");
    }
}

#[cfg(test)] use mockall::automock;

use crate::error::SessionError;

/// Response record handed to [`Ilink3SessionHandler::on_not_applied`].
///
/// The handler decides synchronously whether the messages the gateway reported as not
///  applied should be resent (retransmit) or skipped (gap fill). The default is to gap
///  fill. The handler must only set the decision on this record - it must not send
///  messages of its own from inside the callback.
#[derive(Debug, Default)]
pub struct NotAppliedResponse {
    should_retransmit: bool,
}

impl NotAppliedResponse {
    /// Ask the gateway to resend the not-applied messages.
    pub fn retransmit(&mut self) {
        self.should_retransmit = true;
    }

    /// Skip the not-applied messages and continue with a Sequence message.
    pub fn gap_fill(&mut self) {
        self.should_retransmit = false;
    }

    pub fn should_retransmit(&self) -> bool {
        self.should_retransmit
    }
}

/// Callbacks a session delivers to its user. All of them run on the poller thread;
///  none of them may re-enter the session's send APIs.
#[cfg_attr(test, automock)]
pub trait Ilink3SessionHandler {
    /// An in-order or retransmitted application message. `offset` points at the start of
    ///  the message payload within `buffer`.
    fn on_business_message(
        &mut self,
        template_id: u16,
        buffer: &[u8],
        offset: usize,
        block_length: u16,
        version: u16,
        poss_retrans: bool,
    );

    /// The gateway did not apply `msg_count` of our messages starting at `from_seq_no`.
    ///  Set the decision on `response`.
    fn on_not_applied(&mut self, from_seq_no: u64, msg_count: u64, response: &mut NotAppliedResponse);

    /// The exchange rejected one of our RetransmitRequests.
    fn on_retransmit_reject(&mut self, reason: &str, request_timestamp: i64, error_codes: i32);

    /// A Sequence message was accepted, possibly jumping `next_seq_no` forward.
    fn on_sequence(&mut self, uuid: u64, next_seq_no: u64);

    /// A fatal session error after the session was established.
    fn on_error(&mut self, error: SessionError);

    /// The session finished unbinding and its connection is being dropped.
    fn on_disconnect(&mut self);
}

/// One-shot completion callback for the party that initiated the session.
///
/// Resolved exactly once: with `on_complete` when the session reaches Established, or
///  with `on_error` if Negotiate / Establish fails or times out first.
#[cfg_attr(test, automock)]
pub trait InitiateReply {
    fn on_complete(&mut self, uuid: u64);

    fn on_error(&mut self, error: SessionError);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_applied_response_defaults_to_gap_fill() {
        let response = NotAppliedResponse::default();
        assert!(!response.should_retransmit());
    }

    #[test]
    fn test_not_applied_response_decision_can_be_changed() {
        let mut response = NotAppliedResponse::default();
        response.retransmit();
        assert!(response.should_retransmit());
        response.gap_fill();
        assert!(!response.should_retransmit());
    }
}

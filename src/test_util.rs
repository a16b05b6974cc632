//! In-memory doubles for exercising the engine without a live transport: a scripted
//!  publication that records committed frames and can simulate back-pressure, a settable
//!  clock, and recording implementations of the user-facing callback traits.
//!
//! The doubles hand out clonable control handles so a test keeps access to what happened
//!  after moving the double itself into the session.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::clock::Clock;
use crate::error::{DisconnectReason, SessionError};
use crate::handler::{Ilink3SessionHandler, InitiateReply, NotAppliedResponse};
use crate::publication::{ClaimOutcome, CloseReason, OrderedPublication, SendOutcome};
use crate::session::SessionOwner;

#[derive(Default)]
struct PublicationControlInner {
    committed: Vec<Vec<u8>>,
    pressured_claims: u32,
    closed: Option<CloseReason>,
}

/// Scripting / inspection handle of a [`ScriptedPublication`], shared with the test.
#[derive(Clone, Default)]
pub struct PublicationControl {
    inner: Rc<RefCell<PublicationControlInner>>,
}

impl PublicationControl {
    /// The next `count` claims answer `Pressured`.
    pub fn pressure_next_claims(&self, count: u32) {
        self.inner.borrow_mut().pressured_claims = count;
    }

    /// All claims from now on answer `Closed`.
    pub fn close(&self, reason: CloseReason) {
        self.inner.borrow_mut().closed = Some(reason);
    }

    /// Every frame committed so far, oldest first.
    pub fn committed_frames(&self) -> Vec<Vec<u8>> {
        self.inner.borrow().committed.clone()
    }

    pub fn frame_count(&self) -> usize {
        self.inner.borrow().committed.len()
    }

    /// The most recently committed frame.
    pub fn last_frame(&self) -> Vec<u8> {
        self.inner.borrow().committed.last().expect("no frame was committed").clone()
    }
}

/// An [`OrderedPublication`] over a growable in-memory log.
///
/// Claims can be scripted through the [`PublicationControl`] handle to fail with
///  back-pressure (or a closed transport) to drive the session's retry paths.
#[derive(Default)]
pub struct ScriptedPublication {
    claimed: Option<Vec<u8>>,
    position: u64,
    control: PublicationControl,
}

impl ScriptedPublication {
    pub fn new() -> ScriptedPublication {
        ScriptedPublication::default()
    }

    /// A handle for scripting and inspecting this publication; clone it before moving
    ///  the publication into a session.
    pub fn control(&self) -> PublicationControl {
        self.control.clone()
    }
}

impl OrderedPublication for ScriptedPublication {
    fn try_claim(&mut self, length: usize) -> ClaimOutcome {
        {
            let mut control = self.control.inner.borrow_mut();
            if let Some(reason) = control.closed {
                return ClaimOutcome::Closed(reason);
            }
            if control.pressured_claims > 0 {
                control.pressured_claims -= 1;
                return ClaimOutcome::Pressured;
            }
        }
        assert!(self.claimed.is_none(), "claim while a claim is outstanding");

        self.claimed = Some(vec![0; length]);
        self.position += length as u64;
        ClaimOutcome::Claimed(self.position)
    }

    fn claimed_mut(&mut self) -> &mut [u8] {
        self.claimed.as_mut().expect("no claim in progress")
    }

    fn commit(&mut self) {
        let frame = self.claimed.take().expect("commit without a claim");
        self.control.inner.borrow_mut().committed.push(frame);
    }

    fn abort(&mut self) {
        self.claimed = None;
    }
}

/// A [`Clock`] whose time is set by the test.
#[derive(Clone, Default)]
pub struct SettableClock {
    millis: Rc<Cell<i64>>,
    nanos: Rc<Cell<i64>>,
}

impl SettableClock {
    pub fn new(millis: i64, nanos: i64) -> SettableClock {
        let clock = SettableClock::default();
        clock.set_millis(millis);
        clock.set_nanos(nanos);
        clock
    }

    pub fn set_millis(&self, millis: i64) {
        self.millis.set(millis);
    }

    pub fn set_nanos(&self, nanos: i64) {
        self.nanos.set(nanos);
    }
}

impl Clock for SettableClock {
    fn time_millis(&self) -> i64 {
        self.millis.get()
    }

    fn nano_timestamp(&self) -> i64 {
        self.nanos.get()
    }
}

/// What a [`CollectingHandler`] has seen so far.
#[derive(Default)]
pub struct HandlerLog {
    /// (templateId, payload copy, possRetrans) per business message.
    pub business_messages: Vec<(u16, Vec<u8>, bool)>,
    /// seqNum of every business message, read straight off the payload.
    pub sequence_numbers: Vec<u64>,
    pub not_applied: Vec<(u64, u64)>,
    pub retransmit_rejects: Vec<(String, i64, i32)>,
    pub sequences: Vec<(u64, u64)>,
    pub errors: Vec<String>,
    pub disconnects: u32,
}

/// Handler that records every callback; the decision it takes on NotApplied is scripted
///  via `retransmit_on_not_applied`.
#[derive(Clone, Default)]
pub struct CollectingHandler {
    pub log: Rc<RefCell<HandlerLog>>,
    pub retransmit_on_not_applied: Rc<Cell<bool>>,
}

impl CollectingHandler {
    pub fn new() -> CollectingHandler {
        CollectingHandler::default()
    }
}

impl Ilink3SessionHandler for CollectingHandler {
    fn on_business_message(
        &mut self,
        template_id: u16,
        buffer: &[u8],
        offset: usize,
        _block_length: u16,
        _version: u16,
        poss_retrans: bool,
    ) {
        let payload = buffer[offset..].to_vec();
        let mut log = self.log.borrow_mut();
        if payload.len() >= 4 {
            log.sequence_numbers
                .push(u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as u64);
        }
        log.business_messages.push((template_id, payload, poss_retrans));
    }

    fn on_not_applied(&mut self, from_seq_no: u64, msg_count: u64, response: &mut NotAppliedResponse) {
        self.log.borrow_mut().not_applied.push((from_seq_no, msg_count));
        if self.retransmit_on_not_applied.get() {
            response.retransmit();
        } else {
            response.gap_fill();
        }
    }

    fn on_retransmit_reject(&mut self, reason: &str, request_timestamp: i64, error_codes: i32) {
        self.log
            .borrow_mut()
            .retransmit_rejects
            .push((reason.to_string(), request_timestamp, error_codes));
    }

    fn on_sequence(&mut self, uuid: u64, next_seq_no: u64) {
        self.log.borrow_mut().sequences.push((uuid, next_seq_no));
    }

    fn on_error(&mut self, error: SessionError) {
        self.log.borrow_mut().errors.push(error.to_string());
    }

    fn on_disconnect(&mut self) {
        self.log.borrow_mut().disconnects += 1;
    }
}

/// What a [`RecordingOwner`] was asked to do.
#[derive(Default)]
pub struct OwnerLog {
    pub disconnects: Vec<(u64, DisconnectReason)>,
    pub local_resends: Vec<(u64, u64, u64, u64)>,
    pub unbinds: Vec<u64>,
}

/// Owner whose local-resend channel can be scripted to push back.
#[derive(Clone, Default)]
pub struct RecordingOwner {
    pub log: Rc<RefCell<OwnerLog>>,
    pub pressured_resends: Rc<Cell<u32>>,
}

impl RecordingOwner {
    pub fn new() -> RecordingOwner {
        RecordingOwner::default()
    }

    pub fn pressure_next_resends(&self, count: u32) {
        self.pressured_resends.set(count);
    }
}

impl SessionOwner for RecordingOwner {
    fn request_disconnect(&mut self, connection_id: u64, reason: DisconnectReason) -> SendOutcome {
        self.log.borrow_mut().disconnects.push((connection_id, reason));
        SendOutcome::Committed(1)
    }

    fn request_local_resend(
        &mut self,
        uuid: u64,
        connection_id: u64,
        from_seq_no: u64,
        to_seq_no: u64,
    ) -> SendOutcome {
        let pressured = self.pressured_resends.get();
        if pressured > 0 {
            self.pressured_resends.set(pressured - 1);
            return SendOutcome::Pressured;
        }
        self.log.borrow_mut().local_resends.push((uuid, connection_id, from_seq_no, to_seq_no));
        SendOutcome::Committed(1)
    }

    fn on_unbind(&mut self, uuid: u64) {
        self.log.borrow_mut().unbinds.push(uuid);
    }
}

/// What a [`RecordingReply`] was resolved with.
#[derive(Default)]
pub struct ReplyLog {
    pub completions: Vec<u64>,
    pub errors: Vec<String>,
}

/// One-shot initiate reply that records its resolution.
#[derive(Clone, Default)]
pub struct RecordingReply {
    pub log: Rc<RefCell<ReplyLog>>,
}

impl RecordingReply {
    pub fn new() -> RecordingReply {
        RecordingReply::default()
    }
}

impl InitiateReply for RecordingReply {
    fn on_complete(&mut self, uuid: u64) {
        self.log.borrow_mut().completions.push(uuid);
    }

    fn on_error(&mut self, error: SessionError) {
        self.log.borrow_mut().errors.push(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_publication_records_commits() {
        let mut publication = ScriptedPublication::new();
        let control = publication.control();

        let outcome = publication.try_claim(4);
        assert!(outcome.is_claimed());
        publication.claimed_mut().copy_from_slice(&[1, 2, 3, 4]);
        publication.commit();

        assert_eq!(control.committed_frames(), vec![vec![1, 2, 3, 4]]);
        assert_eq!(control.last_frame(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_scripted_publication_pressure_then_recovers() {
        let mut publication = ScriptedPublication::new();
        publication.control().pressure_next_claims(2);

        assert_eq!(publication.try_claim(4), ClaimOutcome::Pressured);
        assert_eq!(publication.try_claim(4), ClaimOutcome::Pressured);
        assert!(publication.try_claim(4).is_claimed());
    }

    #[test]
    fn test_scripted_publication_abort_discards() {
        let mut publication = ScriptedPublication::new();
        let control = publication.control();

        let _ = publication.try_claim(4);
        publication.abort();

        assert_eq!(control.frame_count(), 0);
        assert!(publication.try_claim(4).is_claimed());
    }

    #[test]
    fn test_scripted_publication_closed() {
        let mut publication = ScriptedPublication::new();
        publication.control().close(CloseReason::ConnectionClosed);

        assert_eq!(publication.try_claim(4), ClaimOutcome::Closed(CloseReason::ConnectionClosed));
    }

    #[test]
    fn test_settable_clock() {
        let clock = SettableClock::new(5, 5_000_000);
        assert_eq!(clock.time_millis(), 5);
        assert_eq!(clock.nano_timestamp(), 5_000_000);

        clock.set_millis(7);
        assert_eq!(clock.time_millis(), 7);
    }
}

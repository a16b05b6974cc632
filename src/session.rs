//! The iLink3 session state machine.
//!
//! A session is created by the owning library when the transport reports a connected
//!  socket, drives Negotiate -> Establish -> Established on successive polls, and from
//!  then on stamps outbound sequence numbers, enforces the bidirectional keepalive
//!  contract, requests retransmissions for inbound gaps and runs the Terminate
//!  handshake. All of it happens on the single poller thread; a send that the transport
//!  pushes back on is retried on a later poll via the matching sticky field.

use std::collections::VecDeque;

#[cfg(test)] use mockall::automock;
use tracing::{debug, warn};

use crate::auth;
use crate::clock::Clock;
use crate::config::Ilink3SessionConfig;
use crate::error::{DisconnectReason, SessionError};
use crate::handler::{Ilink3SessionHandler, InitiateReply, NotAppliedResponse};
use crate::offsets::Ilink3Offsets;
use crate::proxy::Ilink3Proxy;
use crate::publication::{ClaimOutcome, OrderedPublication, SendOutcome};
use crate::templates::{template_ids, Fti, KeepAliveLapsed, TemplateMeta};

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Connected,
    SentNegotiate,
    RetryNegotiate,
    Negotiated,
    NegotiateRejected,
    SentEstablish,
    RetryEstablish,
    Established,
    AwaitingKeepalive,
    Retransmitting,
    ResendTerminate,
    ResendTerminateAck,
    Unbinding,
    Unbound,
    EstablishRejected,
}

/// What the dispatcher of inbound events should do after a handler returns.
///
/// `Redeliver` means the event could not be fully processed because an outbound channel
///  pushed back; the session state is arranged so that feeding the same event again on a
///  later duty cycle resumes where it left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Dispatch {
    Continue,
    Redeliver,
}

/// Owner-side callbacks: the session asks its owning library to act on the connection
///  it cannot touch itself.
#[cfg_attr(test, automock)]
pub trait SessionOwner {
    /// Drop the underlying transport connection.
    fn request_disconnect(&mut self, connection_id: u64, reason: DisconnectReason) -> SendOutcome;

    /// Replay locally archived outbound messages `from_seq_no..=to_seq_no` after the
    ///  gateway reported them as not applied.
    fn request_local_resend(
        &mut self,
        uuid: u64,
        connection_id: u64,
        from_seq_no: u64,
        to_seq_no: u64,
    ) -> SendOutcome;

    /// The session left the bound state and can be reclaimed.
    fn on_unbind(&mut self, uuid: u64);
}

/// Last sequence numbers seen on a previous incarnation of the session, if any.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastSequenceNumbers {
    pub sent: Option<u64>,
    pub received: Option<u64>,
}

impl LastSequenceNumbers {
    pub const NONE: LastSequenceNumbers = LastSequenceNumbers { sent: None, received: None };
}

#[derive(Clone, Copy)]
struct RetransmitRange {
    from_seq_no: u64,
    msg_count: u32,
}

pub struct Ilink3Session<P: OrderedPublication> {
    config: Ilink3SessionConfig,
    proxy: Ilink3Proxy<P>,
    offsets: Ilink3Offsets,
    clock: Box<dyn Clock>,
    handler: Box<dyn Ilink3SessionHandler>,
    owner: Box<dyn SessionOwner>,
    initiate_reply: Option<Box<dyn InitiateReply>>,
    not_applied_response: NotAppliedResponse,
    newly_allocated: bool,

    uuid: u64,
    state: State,
    unbound: bool,
    next_recv_seq_no: u64,
    next_sent_seq_no: u64,
    /// Tail sequence number of the retransmit chunk currently in flight; `None` means
    ///  no retransmit is outstanding.
    retransmit_fill_seq_no: Option<u64>,
    /// Chunks not yet requested. The in-flight chunk is never on this queue.
    retransmit_requests: VecDeque<RetransmitRange>,

    resend_time: i64,
    next_receive_message_time_ms: i64,
    next_send_message_time_ms: i64,
    backpressured_not_applied: bool,
    resend_terminate_reason: Option<String>,
    resend_terminate_error_codes: i32,
    last_negotiate_request_timestamp: i64,
    last_establish_request_timestamp: i64,
}

impl<P: OrderedPublication> Ilink3Session<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Ilink3SessionConfig,
        connection_id: u64,
        uuid: u64,
        publication: P,
        clock: Box<dyn Clock>,
        handler: Box<dyn Ilink3SessionHandler>,
        owner: Box<dyn SessionOwner>,
        initiate_reply: Box<dyn InitiateReply>,
        last_sequence_numbers: LastSequenceNumbers,
        newly_allocated: bool,
    ) -> Ilink3Session<P> {
        let next_sent_seq_no = config
            .initial_sequence_number(config.initial_sent_sequence_number, last_sequence_numbers.sent);
        let next_recv_seq_no = config.initial_sequence_number(
            config.initial_received_sequence_number,
            last_sequence_numbers.received,
        );
        let offsets = Ilink3Offsets::with_overrides(&config.template_field_offsets);

        Ilink3Session {
            config,
            proxy: Ilink3Proxy::new(connection_id, publication),
            offsets,
            clock,
            handler,
            owner,
            initiate_reply: Some(initiate_reply),
            not_applied_response: NotAppliedResponse::default(),
            newly_allocated,
            uuid,
            state: State::Connected,
            unbound: false,
            next_recv_seq_no,
            next_sent_seq_no,
            retransmit_fill_seq_no: None,
            retransmit_requests: VecDeque::new(),
            resend_time: 0,
            next_receive_message_time_ms: 0,
            next_send_message_time_ms: 0,
            backpressured_not_applied: false,
            resend_terminate_reason: None,
            resend_terminate_error_codes: 0,
            last_negotiate_request_timestamp: 0,
            last_establish_request_timestamp: 0,
        }
    }

    // ---- public send API --------------------------------------------------------

    /// Claims transport space for an outbound application message and stamps the
    ///  payload's `seqNum` and `sendingTimeEpoch` fields (where the template has them).
    ///  The caller encodes the remaining payload fields into [`payload_mut`] and
    ///  publishes with [`commit`].
    ///
    /// Only valid in `Established` or `AwaitingKeepalive`; anywhere else the call fails
    ///  without touching session state. A `Pressured` outcome also leaves the session
    ///  untouched - the next successful claim stamps the same sequence number.
    ///
    /// [`payload_mut`]: Ilink3Session::payload_mut
    /// [`commit`]: Ilink3Session::commit
    pub fn try_claim(&mut self, meta: TemplateMeta) -> Result<ClaimOutcome, SessionError> {
        self.validate_can_send()?;

        let outcome = self.proxy.claim_message(meta.block_length as usize, meta);
        if outcome.is_claimed() {
            let payload = self.proxy.payload_mut();

            if let Some(offset) = self.offsets.seq_num_offset(meta.template_id) {
                payload[offset..offset + 4]
                    .copy_from_slice(&(self.next_sent_seq_no as u32).to_le_bytes());
                self.next_sent_seq_no += 1;
            }

            // possRetrans stays at its zero-initialised false value: this API only ever
            //  sends originals

            if let Some(offset) = self.offsets.sending_time_epoch_offset(meta.template_id) {
                let timestamp = self.clock.nano_timestamp();
                payload[offset..offset + 8].copy_from_slice(&timestamp.to_le_bytes());
            }
        }
        Ok(outcome)
    }

    /// The payload region of the message claimed by [`try_claim`].
    ///
    /// [`try_claim`]: Ilink3Session::try_claim
    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.proxy.payload_mut()
    }

    /// Publishes the claimed message and renews the send keepalive deadline.
    pub fn commit(&mut self) {
        self.proxy.commit();
        self.sent_message();
    }

    /// Releases a claimed message without publishing it. The stamped sequence number is
    ///  *not* reclaimed.
    pub fn abort(&mut self) {
        self.proxy.abort();
    }

    /// Sends a Terminate. On success the session moves to `Unbinding`; on back-pressure
    ///  the reason and error codes are parked and retried on the next poll.
    pub fn terminate(&mut self, reason: &str, error_codes: i32) -> Result<SendOutcome, SessionError> {
        self.validate_can_send()?;
        Ok(self.send_terminate(reason, error_codes, State::Unbinding, State::ResendTerminate))
    }

    /// Asks the owning library to drop the transport connection.
    pub fn request_disconnect(&mut self, reason: DisconnectReason) -> SendOutcome {
        self.owner.request_disconnect(self.proxy.connection_id(), reason)
    }

    // ---- accessors --------------------------------------------------------------

    pub fn uuid(&self) -> u64 {
        self.uuid
    }

    pub fn connection_id(&self) -> u64 {
        self.proxy.connection_id()
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Whether the owning poller can reclaim this session. True once the session fully
    ///  unbound or failed terminally during Negotiate / Establish.
    pub fn is_unbound(&self) -> bool {
        self.unbound
    }

    pub fn next_sent_seq_no(&self) -> u64 {
        self.next_sent_seq_no
    }

    pub fn next_recv_seq_no(&self) -> u64 {
        self.next_recv_seq_no
    }

    pub fn retransmit_fill_seq_no(&self) -> Option<u64> {
        self.retransmit_fill_seq_no
    }

    pub fn next_receive_message_time_ms(&self) -> i64 {
        self.next_receive_message_time_ms
    }

    pub fn next_send_message_time_ms(&self) -> i64 {
        self.next_send_message_time_ms
    }

    // ---- poll -------------------------------------------------------------------

    /// Drives the state machine. `time_ms` is the current monotonic time in
    ///  milliseconds; returns the amount of work done.
    pub fn poll(&mut self, time_ms: i64) -> i32 {
        match self.state {
            State::Connected => self.poll_connected(),
            State::SentNegotiate => self.poll_sent_negotiate(time_ms),
            State::RetryNegotiate => self.poll_retry_negotiate(time_ms),
            State::Negotiated => {
                if self.send_establish() {
                    1
                } else {
                    0
                }
            }
            State::SentEstablish => self.poll_sent_establish(time_ms),
            State::RetryEstablish => self.poll_retry_establish(time_ms),
            State::Established => self.poll_established(time_ms),
            State::AwaitingKeepalive => self.poll_awaiting_keepalive(time_ms),
            State::ResendTerminate => self.poll_resend_terminate(),
            State::ResendTerminateAck => self.poll_resend_terminate_ack(),
            State::Unbinding => self.poll_unbinding(time_ms),
            _ => 0,
        }
    }

    fn poll_connected(&mut self) -> i32 {
        let sent = if !self.config.re_establish_last_session || self.newly_allocated {
            self.send_negotiate()
        } else {
            self.send_establish()
        };
        if sent {
            1
        } else {
            0
        }
    }

    fn poll_sent_negotiate(&mut self, time_ms: i64) -> i32 {
        if time_ms > self.resend_time && self.send_negotiate() {
            self.state = State::RetryNegotiate;
            return 1;
        }
        0
    }

    fn poll_retry_negotiate(&mut self, time_ms: i64) -> i32 {
        if time_ms > self.resend_time {
            self.report_error(SessionError::NegotiateTimeout);
            self.fully_unbind();
            return 1;
        }
        0
    }

    fn poll_sent_establish(&mut self, time_ms: i64) -> i32 {
        if time_ms > self.resend_time && self.send_establish() {
            self.state = State::RetryEstablish;
            return 1;
        }
        0
    }

    fn poll_retry_establish(&mut self, time_ms: i64) -> i32 {
        if time_ms > self.resend_time {
            self.report_error(SessionError::EstablishTimeout);
            self.fully_unbind();
            return 1;
        }
        0
    }

    fn poll_established(&mut self, time_ms: i64) -> i32 {
        if time_ms > self.next_receive_message_time_ms {
            let _ = self.send_sequence(KeepAliveLapsed::Lapsed);
            self.on_received_message();
            self.state = State::AwaitingKeepalive;
        } else if time_ms > self.next_send_message_time_ms {
            let _ = self.send_sequence(KeepAliveLapsed::NotLapsed);
        }
        0
    }

    fn poll_awaiting_keepalive(&mut self, time_ms: i64) -> i32 {
        if time_ms > self.next_receive_message_time_ms {
            let expiry = 2 * self.config.requested_keep_alive_interval_ms;
            let reason = format!("{}ms expired without message", expiry);
            let _ = self.send_terminate(&reason, 0, State::Unbinding, State::ResendTerminate);
        }
        0
    }

    fn poll_resend_terminate(&mut self) -> i32 {
        let reason = self.resend_terminate_reason.take().unwrap_or_default();
        let _ = self.send_terminate(
            &reason,
            self.resend_terminate_error_codes,
            State::Unbinding,
            State::ResendTerminate,
        );
        0
    }

    fn poll_resend_terminate_ack(&mut self) -> i32 {
        let reason = self.resend_terminate_reason.take().unwrap_or_default();
        self.send_terminate_ack(&reason, self.resend_terminate_error_codes);
        0
    }

    fn poll_unbinding(&mut self, time_ms: i64) -> i32 {
        if time_ms > self.next_send_message_time_ms {
            self.fully_unbind();
        }
        0
    }

    // ---- outbound session-layer messages ------------------------------------------

    fn send_negotiate(&mut self) -> bool {
        let request_timestamp = self.clock.nano_timestamp();
        let canonical = auth::negotiate_canonical_request(
            request_timestamp,
            self.uuid,
            &self.config.session_id,
            &self.config.firm_id,
        );
        let signature = match auth::sign_canonical_request(&self.config.user_key, &canonical) {
            Ok(signature) => signature,
            Err(error) => {
                self.connection_error(error);
                return false;
            }
        };

        let outcome = self.proxy.send_negotiate(
            &signature,
            &self.config.access_key_id,
            self.uuid,
            request_timestamp,
            &self.config.session_id,
            &self.config.firm_id,
        );
        if outcome.is_committed() {
            self.state = State::SentNegotiate;
            self.resend_time = self.next_timeout_ms();
            self.last_negotiate_request_timestamp = request_timestamp;
            true
        } else {
            false
        }
    }

    fn send_establish(&mut self) -> bool {
        let request_timestamp = self.clock.nano_timestamp();
        let keep_alive_interval_ms = self.config.requested_keep_alive_interval_ms;
        let canonical = auth::establish_canonical_request(
            request_timestamp,
            self.uuid,
            &self.config.session_id,
            &self.config.firm_id,
            &self.config.trading_system_name,
            &self.config.trading_system_version,
            &self.config.trading_system_vendor,
            self.next_sent_seq_no,
            keep_alive_interval_ms,
        );
        let signature = match auth::sign_canonical_request(&self.config.user_key, &canonical) {
            Ok(signature) => signature,
            Err(error) => {
                self.connection_error(error);
                return false;
            }
        };

        let outcome = self.proxy.send_establish(
            &signature,
            &self.config.access_key_id,
            &self.config.trading_system_name,
            &self.config.trading_system_vendor,
            &self.config.trading_system_version,
            self.uuid,
            request_timestamp,
            self.next_sent_seq_no,
            &self.config.session_id,
            &self.config.firm_id,
            keep_alive_interval_ms,
        );
        if outcome.is_committed() {
            self.resend_time = self.next_timeout_ms();
            self.last_establish_request_timestamp = request_timestamp;
            self.state = State::SentEstablish;
            true
        } else {
            false
        }
    }

    fn send_sequence(&mut self, keep_alive_lapsed: KeepAliveLapsed) -> SendOutcome {
        let outcome =
            self.proxy
                .send_sequence(self.uuid, self.next_sent_seq_no, Fti::Primary, keep_alive_lapsed);
        if outcome.is_committed() {
            self.sent_message();
        }
        // pressured sends are picked up again by the next poll
        outcome
    }

    fn send_terminate(
        &mut self,
        reason: &str,
        error_codes: i32,
        final_state: State,
        resend_state: State,
    ) -> SendOutcome {
        let request_timestamp = self.clock.nano_timestamp();
        let outcome = self.proxy.send_terminate(reason, self.uuid, request_timestamp, error_codes);

        if outcome.is_committed() {
            self.state = final_state;
            self.resend_terminate_reason = None;
            self.resend_terminate_error_codes = 0;
            if final_state == State::Unbinding {
                // arm the force-unbind deadline for the Terminate handshake
                self.sent_message();
            }
        } else {
            self.state = resend_state;
            self.resend_terminate_reason = Some(reason.to_string());
            self.resend_terminate_error_codes = error_codes;
        }
        outcome
    }

    fn send_terminate_ack(&mut self, reason: &str, error_codes: i32) {
        let outcome = self.send_terminate(reason, error_codes, State::Unbound, State::ResendTerminateAck);
        if outcome.is_committed() {
            self.fully_unbind();
        }
    }

    fn send_retransmit_request(&mut self, from_seq_no: u64, msg_count: u32) -> SendOutcome {
        self.sent_message();
        let request_timestamp = self.clock.nano_timestamp();
        self.proxy.send_retransmit_request(self.uuid, request_timestamp, from_seq_no, msg_count)
    }

    // ---- inbound events -----------------------------------------------------------

    pub fn on_negotiation_response(
        &mut self,
        uuid: u64,
        request_timestamp: i64,
        _secret_key_secure_id_expiration: u16,
        _previous_seq_no: u64,
        _previous_uuid: u64,
    ) -> Dispatch {
        if self.check_boundary_errors("Negotiate", uuid, request_timestamp, self.last_negotiate_request_timestamp) {
            return Dispatch::Continue;
        }

        self.state = State::Negotiated;
        self.send_establish();
        Dispatch::Continue
    }

    pub fn on_negotiation_reject(
        &mut self,
        reason: &str,
        uuid: u64,
        request_timestamp: i64,
        error_codes: i32,
    ) -> Dispatch {
        self.state = State::NegotiateRejected;
        self.on_reject(
            uuid,
            request_timestamp,
            self.last_negotiate_request_timestamp,
            format!("Negotiate rejected: {}", reason),
            error_codes,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn on_establishment_ack(
        &mut self,
        uuid: u64,
        request_timestamp: i64,
        next_seq_no: u64,
        previous_seq_no: u64,
        previous_uuid: u64,
        _keep_alive_interval_ms: i32,
        _secret_key_secure_id_expiration: u16,
    ) -> Dispatch {
        if self.check_boundary_errors(
            "EstablishmentAck",
            uuid,
            request_timestamp,
            self.last_establish_request_timestamp,
        ) {
            return Dispatch::Continue;
        }

        self.state = State::Established;
        if let Some(mut reply) = self.initiate_reply.take() {
            reply.on_complete(self.uuid);
        }
        let timeout = self.next_timeout_ms();
        self.next_receive_message_time_ms = timeout;
        self.next_send_message_time_ms = timeout;

        let next_recv_seq_no = self.next_recv_seq_no;
        if previous_uuid == self.uuid {
            // the previous incarnation of this very session sent more than we saw
            let implied_next_recv_seq_no = previous_seq_no + 1;
            if implied_next_recv_seq_no > next_recv_seq_no {
                return self.on_invalid_sequence_number_upto(implied_next_recv_seq_no, implied_next_recv_seq_no);
            }
        }

        let _ = self.check_low_sequence_number(next_seq_no, next_recv_seq_no);
        Dispatch::Continue
    }

    pub fn on_establishment_reject(
        &mut self,
        reason: &str,
        uuid: u64,
        request_timestamp: i64,
        next_seq_no: u64,
        error_codes: i32,
    ) -> Dispatch {
        self.state = State::EstablishRejected;
        let reason = format!("Establishment rejected: {},nextSeqNo={}", reason, next_seq_no);
        self.on_reject(uuid, request_timestamp, self.last_establish_request_timestamp, reason, error_codes)
    }

    pub fn on_terminate(
        &mut self,
        reason: &str,
        uuid: u64,
        _request_timestamp: i64,
        error_codes: i32,
    ) -> Dispatch {
        if self.state == State::Unbinding {
            // we initiated the termination handshake and this is the acknowledgement
            self.fully_unbind();
        } else {
            // the exchange initiated the termination
            self.send_terminate_ack(reason, error_codes);
        }

        self.check_uuid(uuid);
        Dispatch::Continue
    }

    /// Handles a Sequence message.
    ///
    /// NB: A `next_seq_no` ahead of the expected one is accepted as a forward jump
    ///  without triggering a retransmit - deliberately asymmetric with business
    ///  messages, where the same situation starts the gap workflow.
    pub fn on_sequence(
        &mut self,
        uuid: u64,
        next_seq_no: u64,
        _fti: Fti,
        keep_alive_lapsed: KeepAliveLapsed,
    ) -> Dispatch {
        if uuid == self.uuid {
            self.on_received_message();

            if self.check_low_sequence_number(next_seq_no, self.next_recv_seq_no).is_some() {
                return Dispatch::Continue;
            }
            self.next_recv_seq_no = next_seq_no;
            self.handler.on_sequence(uuid, next_seq_no);

            // reply to warning messages to keep the session alive
            if keep_alive_lapsed == KeepAliveLapsed::Lapsed {
                let _ = self.send_sequence(KeepAliveLapsed::NotLapsed);
            }
        }
        Dispatch::Continue
    }

    pub fn on_not_applied(&mut self, uuid: u64, from_seq_no: u64, msg_count: u64) -> Dispatch {
        if uuid != self.uuid {
            if self.config.terminate_on_foreign_not_applied {
                let reason = format!("NotApplied with foreign uuid={},expected={}", uuid, self.uuid);
                let _ = self.send_terminate(&reason, 0, State::Unbinding, State::ResendTerminate);
            } else {
                warn!("ignoring NotApplied with foreign uuid={}, expected={}", uuid, self.uuid);
            }
            return Dispatch::Continue;
        }
        if msg_count == 0 {
            warn!("ignoring NotApplied with msgCount=0 from {}", from_seq_no);
            return Dispatch::Continue;
        }

        // don't invoke the handler again on the back-pressured redelivery
        if !self.backpressured_not_applied {
            // hold application sends while the gateway replays
            self.state = State::Retransmitting;
            self.not_applied_response = NotAppliedResponse::default();
            self.handler.on_not_applied(from_seq_no, msg_count, &mut self.not_applied_response);
            self.on_received_message();
        }

        let outcome = if self.not_applied_response.should_retransmit() {
            self.owner.request_local_resend(
                self.uuid,
                self.proxy.connection_id(),
                from_seq_no,
                from_seq_no + msg_count - 1,
            )
        } else {
            let outcome = self.send_sequence(KeepAliveLapsed::NotLapsed);
            if outcome.is_committed() {
                self.state = State::Established;
            }
            outcome
        };

        self.backpressured_not_applied = outcome.is_pressured();
        if self.backpressured_not_applied {
            Dispatch::Redeliver
        } else {
            Dispatch::Continue
        }
    }

    /// The gateway finished replaying the messages requested through a NotApplied
    ///  response.
    pub fn on_replay_complete(&mut self) -> Dispatch {
        self.state = State::Established;
        Dispatch::Continue
    }

    /// The exchange announced that a requested retransmission is starting.
    pub fn on_retransmission(
        &mut self,
        uuid: u64,
        _request_timestamp: i64,
        from_seq_no: u64,
        msg_count: u32,
    ) -> Dispatch {
        debug!("retransmission starting: uuid={}, fromSeqNo={}, msgCount={}", uuid, from_seq_no, msg_count);
        self.on_received_message();
        Dispatch::Continue
    }

    pub fn on_retransmit_reject(
        &mut self,
        reason: &str,
        uuid: u64,
        request_timestamp: i64,
        error_codes: i32,
    ) -> Dispatch {
        if uuid != self.uuid {
            self.check_uuid(uuid);
            return Dispatch::Continue;
        }

        self.handler.on_retransmit_reject(reason, request_timestamp, error_codes);
        self.retransmit_filled()
    }

    /// An application message. `offset` points at the start of the message payload
    ///  within `buffer`.
    pub fn on_message(
        &mut self,
        buffer: &[u8],
        offset: usize,
        template_id: u16,
        block_length: u16,
        version: u16,
    ) -> Dispatch {
        self.on_received_message();

        if self.state != State::Established {
            let seq_num = self.offsets.seq_num(template_id, buffer, offset);
            let poss_retrans = self.offsets.poss_retrans(template_id, buffer, offset);
            debug!(
                "discarding message outside established state: templateId={},blockLength={},version={},seqNum={:?},possRetrans={:?}",
                template_id, block_length, version, seq_num, poss_retrans
            );
            if template_id == template_ids::BUSINESS_REJECT_521 {
                debug!("> BusinessReject521: seqNum={:?}", seq_num);
            }
            return Dispatch::Continue;
        }

        let seq_num = match self.offsets.seq_num(template_id, buffer, offset) {
            Some(seq_num) => seq_num,
            // a control message without a sequence number
            None => return Dispatch::Continue,
        };

        let poss_retrans = self.offsets.poss_retrans(template_id, buffer, offset).unwrap_or(false);
        if poss_retrans {
            if Some(seq_num) == self.retransmit_fill_seq_no {
                return self.retransmit_filled();
            }

            self.handler.on_business_message(template_id, buffer, offset, block_length, version, true);
            return Dispatch::Continue;
        }

        let next_recv_seq_no = self.next_recv_seq_no;
        if self.check_low_sequence_number(seq_num, next_recv_seq_no).is_some() {
            return Dispatch::Continue;
        }

        if seq_num == next_recv_seq_no {
            self.next_recv_seq_no = seq_num + 1;
            self.handler.on_business_message(template_id, buffer, offset, block_length, version, false);
            Dispatch::Continue
        } else {
            self.on_invalid_sequence_number(seq_num)
        }
    }

    // ---- gap workflow ---------------------------------------------------------------

    fn on_invalid_sequence_number(&mut self, seq_num: u64) -> Dispatch {
        self.on_invalid_sequence_number_upto(seq_num, seq_num + 1)
    }

    fn on_invalid_sequence_number_upto(&mut self, seq_num: u64, new_next_recv_seq_no: u64) -> Dispatch {
        let from_seq_no = self.next_recv_seq_no;
        let total_msg_count = seq_num - from_seq_no;
        let limit = self.config.retransmit_request_message_limit as u64;
        let msg_count = total_msg_count.min(limit) as u32;

        if self.retransmit_fill_seq_no.is_none() {
            let outcome = self.send_retransmit_request(from_seq_no, msg_count);
            if outcome.is_pressured() {
                // nothing was recorded - redelivering the triggering message recomputes the gap
                return Dispatch::Redeliver;
            }
            self.add_remaining_retransmit_requests(from_seq_no, msg_count, total_msg_count);
            self.next_recv_seq_no = new_next_recv_seq_no;
            self.retransmit_fill_seq_no = Some(from_seq_no + msg_count as u64 - 1);
        } else {
            // a retransmit is already in flight: queue everything, including the first chunk
            self.add_retransmit_request(from_seq_no, msg_count);
            self.add_remaining_retransmit_requests(from_seq_no, msg_count, total_msg_count);
            self.next_recv_seq_no = new_next_recv_seq_no;
        }
        Dispatch::Continue
    }

    /// The in-flight retransmit chunk is complete: request the next queued chunk or
    ///  leave the retransmit workflow.
    fn retransmit_filled(&mut self) -> Dispatch {
        match self.retransmit_requests.front().copied() {
            None => {
                self.retransmit_fill_seq_no = None;
                Dispatch::Continue
            }
            Some(RetransmitRange { from_seq_no, msg_count }) => {
                let outcome = self.send_retransmit_request(from_seq_no, msg_count);
                if outcome.is_pressured() {
                    // chunk stays at the head of the queue for the redelivery
                    Dispatch::Redeliver
                } else {
                    self.retransmit_requests.pop_front();
                    self.retransmit_fill_seq_no = Some(from_seq_no + msg_count as u64 - 1);
                    Dispatch::Continue
                }
            }
        }
    }

    fn add_remaining_retransmit_requests(
        &mut self,
        initial_from_seq_no: u64,
        initial_msg_count: u32,
        total_msg_count: u64,
    ) {
        let limit = self.config.retransmit_request_message_limit as u64;

        let mut from_seq_no = initial_from_seq_no + initial_msg_count as u64;
        let mut requested = initial_msg_count as u64;

        while requested < total_msg_count {
            let msg_count = (total_msg_count - requested).min(limit) as u32;
            self.add_retransmit_request(from_seq_no, msg_count);

            requested += msg_count as u64;
            from_seq_no += msg_count as u64;
        }
    }

    fn add_retransmit_request(&mut self, from_seq_no: u64, msg_count: u32) {
        self.retransmit_requests.push_back(RetransmitRange { from_seq_no, msg_count });
    }

    // ---- shared plumbing --------------------------------------------------------------

    fn validate_can_send(&self) -> Result<(), SessionError> {
        match self.state {
            State::Established | State::AwaitingKeepalive => Ok(()),
            state => Err(SessionError::NotSendable(state)),
        }
    }

    fn next_timeout_ms(&self) -> i64 {
        self.clock.time_millis() + self.config.requested_keep_alive_interval_ms as i64
    }

    fn sent_message(&mut self) {
        self.next_send_message_time_ms = self.next_timeout_ms();
    }

    fn on_received_message(&mut self) {
        self.next_receive_message_time_ms = self.next_timeout_ms();
    }

    /// Terminates if the peer announced a sequence number below what we expect.
    ///  Returns the Terminate's outcome in the violation case, `None` when all is well.
    fn check_low_sequence_number(&mut self, seq_no: u64, next_recv_seq_no: u64) -> Option<SendOutcome> {
        if seq_no < next_recv_seq_no {
            let reason = format!("seqNo={},expecting={}", seq_no, self.next_recv_seq_no);
            Some(self.send_terminate(&reason, 0, State::Unbinding, State::ResendTerminate))
        } else {
            None
        }
    }

    fn check_boundary_errors(
        &mut self,
        name: &str,
        uuid: u64,
        request_timestamp: i64,
        expected_request_timestamp: i64,
    ) -> bool {
        if uuid != self.uuid {
            self.connection_error(SessionError::IllegalResponse(format!(
                "Invalid {}.uuid={},expected={}",
                name, uuid, self.uuid
            )));
            return true;
        }
        if request_timestamp != expected_request_timestamp {
            self.connection_error(SessionError::IllegalResponse(format!(
                "Invalid {}.requestTimestamp={},expected={}",
                name, request_timestamp, expected_request_timestamp
            )));
            return true;
        }
        false
    }

    fn check_uuid(&mut self, uuid: u64) {
        if uuid != self.uuid {
            self.report_error(SessionError::IllegalResponse(format!(
                "Invalid uuid={},expected={}",
                uuid, self.uuid
            )));
        }
    }

    fn on_reject(
        &mut self,
        uuid: u64,
        request_timestamp: i64,
        expected_request_timestamp: i64,
        reason: String,
        error_codes: i32,
    ) -> Dispatch {
        let mut message = reason;
        if uuid != self.uuid {
            message.push_str(&format!("Incorrect uuid={},expected={},", uuid, self.uuid));
        }
        if request_timestamp != expected_request_timestamp {
            message.push_str(&format!(
                "Incorrect requestTimestamp={},expected={},",
                request_timestamp, expected_request_timestamp
            ));
        }
        message.push_str(&format!(",errorCodes={}", error_codes));

        self.connection_error(SessionError::IllegalResponse(message));
        Dispatch::Continue
    }

    /// Fatal pre-established failure: errors the initiator (or the handler if the
    ///  initiator was already resolved), drops the connection and releases the session.
    fn connection_error(&mut self, error: SessionError) {
        warn!("session {} failed: {}", self.uuid, error);

        self.report_error(error);
        let _ = self.request_disconnect(DisconnectReason::FailedAuthentication);
        self.unbound = true;
        self.owner.on_unbind(self.uuid);
    }

    /// Routes a fatal error to whoever is listening: the initiator exactly once while
    ///  it is still unresolved, the handler afterwards.
    fn report_error(&mut self, error: SessionError) {
        if let Some(mut reply) = self.initiate_reply.take() {
            reply.on_error(error);
        } else {
            self.handler.on_error(error);
        }
    }

    fn fully_unbind(&mut self) {
        self.state = State::Unbound;
        let _ = self.request_disconnect(DisconnectReason::Logout);
        self.handler.on_disconnect();
        self.unbound = true;
        self.owner.on_unbind(self.uuid);
    }
}

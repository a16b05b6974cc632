//! The framer: composes the on-wire layout of outbound messages by claiming a region of
//!  the transport's outbound buffer and writing the gateway envelope, SOFH and SBE
//!  header ahead of the payload, plus convenience senders for the session-layer
//!  messages that claim, populate and commit in one go.

use tracing::{debug, trace};

use crate::framing::{
    write_sofh, GatewayEnvelope, SbeHeader, HEADERS_LENGTH, SBE_HEADER_LENGTH, SOFH_LENGTH,
};
use crate::publication::{ClaimOutcome, OrderedPublication, SendOutcome};
use crate::templates::{
    Establish, Fti, KeepAliveLapsed, Negotiate, RetransmitRequest, Sequence, TemplateMeta,
    Terminate, ILINK3_SCHEMA_ID, ILINK3_SCHEMA_VERSION,
};

pub struct Ilink3Proxy<P: OrderedPublication> {
    connection_id: u64,
    publication: P,
}

impl<P: OrderedPublication> Ilink3Proxy<P> {
    pub fn new(connection_id: u64, publication: P) -> Ilink3Proxy<P> {
        Ilink3Proxy { connection_id, publication }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn publication(&self) -> &P {
        &self.publication
    }

    /// Claims space for a message with `payload_length` payload bytes and writes the
    ///  three headers. On success the caller encodes the payload into [`payload_mut`]
    ///  and publishes with [`commit`]. Back-pressure is forwarded unchanged.
    ///
    /// [`payload_mut`]: Ilink3Proxy::payload_mut
    /// [`commit`]: Ilink3Proxy::commit
    pub fn claim_message(&mut self, payload_length: usize, meta: TemplateMeta) -> ClaimOutcome {
        let outcome = self.publication.try_claim(HEADERS_LENGTH + payload_length);
        if let ClaimOutcome::Claimed(position) = outcome {
            trace!(
                "claimed {} bytes for template {} at position {}",
                HEADERS_LENGTH + payload_length,
                meta.template_id,
                position
            );

            let buf = self.publication.claimed_mut();
            // unset payload fields must read as zero - possRetrans relies on this
            buf.fill(0);

            let mut cursor: &mut [u8] = buf;
            GatewayEnvelope { connection_id: self.connection_id }.ser(&mut cursor);
            write_sofh(&mut cursor, SOFH_LENGTH + SBE_HEADER_LENGTH + payload_length);
            SbeHeader {
                block_length: meta.block_length,
                template_id: meta.template_id,
                schema_id: ILINK3_SCHEMA_ID,
                version: ILINK3_SCHEMA_VERSION,
            }
            .ser(&mut cursor);
        }
        outcome
    }

    /// The payload region of the currently claimed message.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.publication.claimed_mut()[HEADERS_LENGTH..]
    }

    pub fn commit(&mut self) {
        self.publication.commit();
    }

    pub fn abort(&mut self) {
        self.publication.abort();
    }

    fn send_framed<F: FnOnce(&mut &mut [u8])>(&mut self, meta: TemplateMeta, encode: F) -> SendOutcome {
        match self.claim_message(meta.block_length as usize, meta) {
            ClaimOutcome::Claimed(position) => {
                let mut payload = self.payload_mut();
                encode(&mut payload);
                debug_assert!(payload.is_empty(), "session-layer encoder must fill the block exactly");
                self.publication.commit();
                SendOutcome::Committed(position)
            }
            ClaimOutcome::Pressured => SendOutcome::Pressured,
            ClaimOutcome::Closed(reason) => SendOutcome::Closed(reason),
        }
    }

    pub fn send_negotiate(
        &mut self,
        hmac_signature: &[u8; 32],
        access_key_id: &str,
        uuid: u64,
        request_timestamp: i64,
        session_id: &str,
        firm_id: &str,
    ) -> SendOutcome {
        debug!("sending Negotiate: uuid={}, requestTimestamp={}", uuid, request_timestamp);
        let message = Negotiate {
            hmac_signature: *hmac_signature,
            access_key_id: access_key_id.to_string(),
            uuid,
            request_timestamp,
            session_id: session_id.to_string(),
            firm_id: firm_id.to_string(),
        };
        self.send_framed(Negotiate::META, |buf| message.ser(buf))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_establish(
        &mut self,
        hmac_signature: &[u8; 32],
        access_key_id: &str,
        trading_system_name: &str,
        trading_system_vendor: &str,
        trading_system_version: &str,
        uuid: u64,
        request_timestamp: i64,
        next_sent_seq_no: u64,
        session_id: &str,
        firm_id: &str,
        keep_alive_interval_ms: i32,
    ) -> SendOutcome {
        debug!(
            "sending Establish: uuid={}, requestTimestamp={}, nextSeqNo={}",
            uuid, request_timestamp, next_sent_seq_no
        );
        let message = Establish {
            hmac_signature: *hmac_signature,
            access_key_id: access_key_id.to_string(),
            trading_system_name: trading_system_name.to_string(),
            trading_system_vendor: trading_system_vendor.to_string(),
            trading_system_version: trading_system_version.to_string(),
            uuid,
            request_timestamp,
            next_seq_no: next_sent_seq_no,
            session_id: session_id.to_string(),
            firm_id: firm_id.to_string(),
            keep_alive_interval_ms,
        };
        self.send_framed(Establish::META, |buf| message.ser(buf))
    }

    pub fn send_terminate(
        &mut self,
        reason: &str,
        uuid: u64,
        request_timestamp: i64,
        error_codes: i32,
    ) -> SendOutcome {
        debug!("sending Terminate: uuid={}, reason={:?}, errorCodes={}", uuid, reason, error_codes);
        let message = Terminate {
            reason: reason.to_string(),
            uuid,
            request_timestamp,
            error_codes,
        };
        self.send_framed(Terminate::META, |buf| message.ser(buf))
    }

    pub fn send_sequence(
        &mut self,
        uuid: u64,
        next_seq_no: u64,
        fti: Fti,
        keep_alive_lapsed: KeepAliveLapsed,
    ) -> SendOutcome {
        trace!(
            "sending Sequence: uuid={}, nextSeqNo={}, keepAliveLapsed={:?}",
            uuid, next_seq_no, keep_alive_lapsed
        );
        let message = Sequence { uuid, next_seq_no, fti, keep_alive_lapsed };
        self.send_framed(Sequence::META, |buf| message.ser(buf))
    }

    pub fn send_retransmit_request(
        &mut self,
        uuid: u64,
        request_timestamp: i64,
        from_seq_no: u64,
        msg_count: u32,
    ) -> SendOutcome {
        debug!(
            "sending RetransmitRequest: uuid={}, fromSeqNo={}, msgCount={}",
            uuid, from_seq_no, msg_count
        );
        let message = RetransmitRequest { uuid, request_timestamp, from_seq_no, msg_count };
        self.send_framed(RetransmitRequest::META, |buf| message.ser(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::read_sofh;
    use crate::templates::template_ids;
    use crate::test_util::{PublicationControl, ScriptedPublication};

    fn proxy() -> (Ilink3Proxy<ScriptedPublication>, PublicationControl) {
        let publication = ScriptedPublication::new();
        let control = publication.control();
        (Ilink3Proxy::new(77, publication), control)
    }

    fn decode_headers(frame: &[u8]) -> (GatewayEnvelope, usize, SbeHeader) {
        let mut buf: &[u8] = frame;
        let envelope = GatewayEnvelope::deser(&mut buf).unwrap();
        let sofh_length = read_sofh(&mut buf).unwrap();
        let sbe = SbeHeader::deser(&mut buf).unwrap();
        (envelope, sofh_length, sbe)
    }

    #[test]
    fn test_claim_writes_nested_headers() {
        let (mut proxy, control) = proxy();
        let meta = TemplateMeta::new(template_ids::NEW_ORDER_SINGLE_514, 32);

        let outcome = proxy.claim_message(32, meta);
        assert!(outcome.is_claimed());
        proxy.payload_mut()[0] = 0xab;
        proxy.commit();

        let frames = control.committed_frames();
        assert_eq!(frames.len(), 1);
        let (envelope, sofh_length, sbe) = decode_headers(&frames[0]);

        assert_eq!(envelope.connection_id, 77);
        // the SOFH length covers itself, the SBE header and the payload but not the envelope
        assert_eq!(sofh_length, SOFH_LENGTH + SBE_HEADER_LENGTH + 32);
        assert_eq!(frames[0].len(), HEADERS_LENGTH + 32);
        assert_eq!(
            sbe,
            SbeHeader {
                block_length: 32,
                template_id: template_ids::NEW_ORDER_SINGLE_514,
                schema_id: ILINK3_SCHEMA_ID,
                version: ILINK3_SCHEMA_VERSION,
            }
        );
        assert_eq!(frames[0][HEADERS_LENGTH], 0xab);
        // the rest of the payload region stays zeroed
        assert!(frames[0][HEADERS_LENGTH + 1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_claim_forwards_backpressure() {
        let (mut proxy, control) = proxy();
        control.pressure_next_claims(1);

        let outcome = proxy.claim_message(16, TemplateMeta::new(template_ids::NEW_ORDER_SINGLE_514, 16));
        assert_eq!(outcome, ClaimOutcome::Pressured);
        assert_eq!(control.frame_count(), 0);
    }

    #[test]
    fn test_send_negotiate_frame() {
        let (mut proxy, control) = proxy();
        let signature = [3u8; 32];

        let outcome = proxy.send_negotiate(&signature, "AK", 42, 1_000, "S1", "F1");
        assert!(outcome.is_committed());

        let frames = control.committed_frames();
        let (_, sofh_length, sbe) = decode_headers(&frames[0]);
        assert_eq!(sbe.template_id, template_ids::NEGOTIATE_500);
        assert_eq!(sofh_length, SOFH_LENGTH + SBE_HEADER_LENGTH + Negotiate::META.block_length as usize);

        let mut payload: &[u8] = &frames[0][HEADERS_LENGTH..];
        let decoded = Negotiate::deser(&mut payload).unwrap();
        assert!(payload.is_empty());
        assert_eq!(decoded.hmac_signature, signature);
        assert_eq!(decoded.access_key_id, "AK");
        assert_eq!(decoded.uuid, 42);
        assert_eq!(decoded.request_timestamp, 1_000);
        assert_eq!(decoded.session_id, "S1");
        assert_eq!(decoded.firm_id, "F1");
    }

    #[test]
    fn test_send_establish_frame() {
        let (mut proxy, control) = proxy();
        let signature = [5u8; 32];

        let outcome = proxy.send_establish(&signature, "AK", "sys", "vendor", "1.0", 42, 2_000, 9, "S1", "F1", 500);
        assert!(outcome.is_committed());

        let frames = control.committed_frames();
        let mut payload: &[u8] = &frames[0][HEADERS_LENGTH..];
        let decoded = Establish::deser(&mut payload).unwrap();
        assert_eq!(decoded.uuid, 42);
        assert_eq!(decoded.request_timestamp, 2_000);
        assert_eq!(decoded.next_seq_no, 9);
        assert_eq!(decoded.keep_alive_interval_ms, 500);
        assert_eq!(decoded.trading_system_name, "sys");
    }

    #[test]
    fn test_send_sequence_frame() {
        let (mut proxy, control) = proxy();

        let outcome = proxy.send_sequence(42, 7, Fti::Primary, KeepAliveLapsed::NotLapsed);
        assert!(outcome.is_committed());

        let frames = control.committed_frames();
        assert_eq!(frames[0].len(), HEADERS_LENGTH + Sequence::META.block_length as usize);

        let mut payload: &[u8] = &frames[0][HEADERS_LENGTH..];
        let decoded = Sequence::deser(&mut payload).unwrap();
        assert_eq!(decoded.uuid, 42);
        assert_eq!(decoded.next_seq_no, 7);
        assert_eq!(decoded.keep_alive_lapsed, KeepAliveLapsed::NotLapsed);
    }

    #[test]
    fn test_send_terminate_and_retransmit_request_frames() {
        let (mut proxy, control) = proxy();

        assert!(proxy.send_terminate("bye", 42, 3_000, 0).is_committed());
        assert!(proxy.send_retransmit_request(42, 4_000, 5, 3).is_committed());

        let frames = control.committed_frames();
        assert_eq!(frames.len(), 2);

        let mut payload: &[u8] = &frames[0][HEADERS_LENGTH..];
        let terminate = Terminate::deser(&mut payload).unwrap();
        assert_eq!(terminate.reason, "bye");
        assert_eq!(terminate.error_codes, 0);

        let mut payload: &[u8] = &frames[1][HEADERS_LENGTH..];
        let request = RetransmitRequest::deser(&mut payload).unwrap();
        assert_eq!(request.from_seq_no, 5);
        assert_eq!(request.msg_count, 3);
    }

    #[test]
    fn test_positions_are_monotonic() {
        let (mut proxy, _control) = proxy();

        let first = proxy.send_sequence(1, 1, Fti::Primary, KeepAliveLapsed::NotLapsed);
        let second = proxy.send_sequence(1, 2, Fti::Primary, KeepAliveLapsed::NotLapsed);

        match (first, second) {
            (SendOutcome::Committed(a), SendOutcome::Committed(b)) => assert!(b > a),
            other => panic!("expected two committed sends, got {:?}", other),
        }
    }
}

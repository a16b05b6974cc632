//! Inbound frame dispatch: decodes the SOFH and SBE header of a received frame and
//!  routes session-layer templates to the session's typed event handlers, everything
//!  else to [`Ilink3Session::on_message`].
//!
//! Inbound frames carry no gateway envelope - that header exists only on the outbound
//!  path through the gateway's own log.

use crate::error::SessionError;
use crate::framing::{read_sofh, SbeHeader, SBE_HEADER_LENGTH, SOFH_LENGTH};
use crate::publication::OrderedPublication;
use crate::session::{Dispatch, Ilink3Session};
use crate::templates::{
    template_ids, EstablishmentAck, EstablishmentReject, NegotiationReject, NegotiationResponse,
    NotApplied, RetransmitReject, Retransmission, Sequence, Terminate,
};

fn protocol_error(error: anyhow::Error) -> SessionError {
    SessionError::Protocol(error.to_string())
}

/// Decodes one frame (SOFH + SBE header + payload) and feeds it to the session.
///
/// A `Redeliver` result means the session could not finish processing because an
///  outbound channel pushed back; feed the identical frame again on the next duty
///  cycle. Malformed frames fail without touching the session.
pub fn dispatch_frame<P: OrderedPublication>(
    session: &mut Ilink3Session<P>,
    frame: &[u8],
) -> Result<Dispatch, SessionError> {
    let mut buf: &[u8] = frame;
    let total_sbe_length = read_sofh(&mut buf).map_err(protocol_error)?;
    if total_sbe_length < SOFH_LENGTH + SBE_HEADER_LENGTH || total_sbe_length > frame.len() {
        return Err(SessionError::Protocol(format!(
            "SOFH length {} does not fit frame of {} bytes",
            total_sbe_length,
            frame.len()
        )));
    }
    let header = SbeHeader::deser(&mut buf).map_err(protocol_error)?;

    let payload_offset = SOFH_LENGTH + SBE_HEADER_LENGTH;
    let mut payload: &[u8] = &frame[payload_offset..total_sbe_length];

    let dispatch = match header.template_id {
        template_ids::NEGOTIATION_RESPONSE_501 => {
            let message = NegotiationResponse::deser(&mut payload).map_err(protocol_error)?;
            session.on_negotiation_response(
                message.uuid,
                message.request_timestamp,
                message.secret_key_secure_id_expiration,
                message.previous_seq_no,
                message.previous_uuid,
            )
        }
        template_ids::NEGOTIATION_REJECT_502 => {
            let message = NegotiationReject::deser(&mut payload).map_err(protocol_error)?;
            session.on_negotiation_reject(
                &message.reason,
                message.uuid,
                message.request_timestamp,
                message.error_codes,
            )
        }
        template_ids::ESTABLISHMENT_ACK_504 => {
            let message = EstablishmentAck::deser(&mut payload).map_err(protocol_error)?;
            session.on_establishment_ack(
                message.uuid,
                message.request_timestamp,
                message.next_seq_no,
                message.previous_seq_no,
                message.previous_uuid,
                message.keep_alive_interval_ms,
                message.secret_key_secure_id_expiration,
            )
        }
        template_ids::ESTABLISHMENT_REJECT_505 => {
            let message = EstablishmentReject::deser(&mut payload).map_err(protocol_error)?;
            session.on_establishment_reject(
                &message.reason,
                message.uuid,
                message.request_timestamp,
                message.next_seq_no,
                message.error_codes,
            )
        }
        template_ids::SEQUENCE_506 => {
            let message = Sequence::deser(&mut payload).map_err(protocol_error)?;
            session.on_sequence(message.uuid, message.next_seq_no, message.fti, message.keep_alive_lapsed)
        }
        template_ids::TERMINATE_507 => {
            let message = Terminate::deser(&mut payload).map_err(protocol_error)?;
            session.on_terminate(
                &message.reason,
                message.uuid,
                message.request_timestamp,
                message.error_codes,
            )
        }
        template_ids::RETRANSMISSION_509 => {
            let message = Retransmission::deser(&mut payload).map_err(protocol_error)?;
            session.on_retransmission(
                message.uuid,
                message.request_timestamp,
                message.from_seq_no,
                message.msg_count,
            )
        }
        template_ids::RETRANSMIT_REJECT_510 => {
            let message = RetransmitReject::deser(&mut payload).map_err(protocol_error)?;
            session.on_retransmit_reject(
                &message.reason,
                message.uuid,
                message.request_timestamp,
                message.error_codes,
            )
        }
        template_ids::NOT_APPLIED_513 => {
            let message = NotApplied::deser(&mut payload).map_err(protocol_error)?;
            session.on_not_applied(message.uuid, message.from_seq_no, message.msg_count)
        }
        _ => session.on_message(frame, payload_offset, header.template_id, header.block_length, header.version),
    };
    Ok(dispatch)
}

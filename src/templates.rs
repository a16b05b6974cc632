//! Session-layer message layouts.
//!
//! Application (business) messages are opaque to the engine beyond the
//!  `seqNum` / `sendingTimeEpoch` / `possRetrans` field triplet resolved through
//!  [`crate::offsets`]; the messages here are the ones the session layer itself sends and
//!  receives. All payload fields are little-endian, strings are ASCII in fixed-width
//!  fields padded with NUL bytes.

use anyhow::{bail, ensure};
use bytes::{Buf, BufMut};

pub const ILINK3_SCHEMA_ID: u16 = 8;
pub const ILINK3_SCHEMA_VERSION: u16 = 257;

pub mod template_ids {
    pub const NEGOTIATE_500: u16 = 500;
    pub const NEGOTIATION_RESPONSE_501: u16 = 501;
    pub const NEGOTIATION_REJECT_502: u16 = 502;
    pub const ESTABLISH_503: u16 = 503;
    pub const ESTABLISHMENT_ACK_504: u16 = 504;
    pub const ESTABLISHMENT_REJECT_505: u16 = 505;
    pub const SEQUENCE_506: u16 = 506;
    pub const TERMINATE_507: u16 = 507;
    pub const RETRANSMIT_REQUEST_508: u16 = 508;
    pub const RETRANSMISSION_509: u16 = 509;
    pub const RETRANSMIT_REJECT_510: u16 = 510;
    pub const NOT_APPLIED_513: u16 = 513;

    pub const NEW_ORDER_SINGLE_514: u16 = 514;
    pub const ORDER_CANCEL_REPLACE_REQUEST_515: u16 = 515;
    pub const ORDER_CANCEL_REQUEST_516: u16 = 516;
    pub const MASS_QUOTE_517: u16 = 517;
    pub const BUSINESS_REJECT_521: u16 = 521;
    pub const EXECUTION_REPORT_NEW_522: u16 = 522;
    pub const EXECUTION_REPORT_REJECT_526: u16 = 526;
    pub const EXECUTION_REPORT_CANCEL_531: u16 = 531;
    pub const EXECUTION_REPORT_STATUS_532: u16 = 532;
    pub const EXECUTION_REPORT_TRADE_OUTRIGHT_533: u16 = 533;
}

/// What the framer needs to know about a template in order to claim space and write the
///  SBE header for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TemplateMeta {
    pub template_id: u16,
    pub block_length: u16,
}

impl TemplateMeta {
    pub const fn new(template_id: u16, block_length: u16) -> TemplateMeta {
        TemplateMeta { template_id, block_length }
    }
}

/// Failover Trading Indicator: which leg of the exchange gateway sent a Sequence message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fti {
    Backup,
    Primary,
}

impl Fti {
    pub fn as_u8(self) -> u8 {
        match self {
            Fti::Backup => 0,
            Fti::Primary => 1,
        }
    }

    pub fn from_u8(raw: u8) -> anyhow::Result<Fti> {
        match raw {
            0 => Ok(Fti::Backup),
            1 => Ok(Fti::Primary),
            _ => bail!("Unsupported FTI value: {}", raw),
        }
    }
}

/// Whether the sender's keepalive interval elapsed since its previous transmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeepAliveLapsed {
    Lapsed,
    NotLapsed,
}

impl KeepAliveLapsed {
    pub fn as_u8(self) -> u8 {
        match self {
            KeepAliveLapsed::Lapsed => 0,
            KeepAliveLapsed::NotLapsed => 1,
        }
    }

    pub fn from_u8(raw: u8) -> anyhow::Result<KeepAliveLapsed> {
        match raw {
            0 => Ok(KeepAliveLapsed::Lapsed),
            1 => Ok(KeepAliveLapsed::NotLapsed),
            _ => bail!("Unsupported KeepAliveLapsed value: {}", raw),
        }
    }
}

pub(crate) fn put_fixed_string<const N: usize>(buf: &mut impl BufMut, s: &str) {
    let raw = s.as_bytes();
    let len = raw.len().min(N);
    buf.put_slice(&raw[..len]);
    for _ in len..N {
        buf.put_u8(0);
    }
}

pub(crate) fn get_fixed_string<const N: usize>(buf: &mut impl Buf) -> anyhow::Result<String> {
    ensure!(buf.remaining() >= N, "buffer too short for a fixed string of length {}", N);
    let mut raw = [0u8; N];
    buf.copy_to_slice(&mut raw);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(N);
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

fn get_signature(buf: &mut impl Buf) -> anyhow::Result<[u8; 32]> {
    ensure!(buf.remaining() >= 32, "buffer too short for an HMAC signature");
    let mut signature = [0u8; 32];
    buf.copy_to_slice(&mut signature);
    Ok(signature)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Negotiate {
    pub hmac_signature: [u8; 32],
    pub access_key_id: String,
    pub uuid: u64,
    pub request_timestamp: i64,
    pub session_id: String,
    pub firm_id: String,
}

impl Negotiate {
    pub const META: TemplateMeta = TemplateMeta::new(template_ids::NEGOTIATE_500, 76);

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.hmac_signature);
        put_fixed_string::<20>(buf, &self.access_key_id);
        buf.put_u64_le(self.uuid);
        buf.put_i64_le(self.request_timestamp);
        put_fixed_string::<3>(buf, &self.session_id);
        put_fixed_string::<5>(buf, &self.firm_id);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Negotiate> {
        Ok(Negotiate {
            hmac_signature: get_signature(buf)?,
            access_key_id: get_fixed_string::<20>(buf)?,
            uuid: buf.try_get_u64_le()?,
            request_timestamp: buf.try_get_i64_le()?,
            session_id: get_fixed_string::<3>(buf)?,
            firm_id: get_fixed_string::<5>(buf)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NegotiationResponse {
    pub uuid: u64,
    pub request_timestamp: i64,
    pub secret_key_secure_id_expiration: u16,
    pub previous_seq_no: u64,
    pub previous_uuid: u64,
}

impl NegotiationResponse {
    pub const META: TemplateMeta = TemplateMeta::new(template_ids::NEGOTIATION_RESPONSE_501, 34);

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.uuid);
        buf.put_i64_le(self.request_timestamp);
        buf.put_u16_le(self.secret_key_secure_id_expiration);
        buf.put_u64_le(self.previous_seq_no);
        buf.put_u64_le(self.previous_uuid);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<NegotiationResponse> {
        Ok(NegotiationResponse {
            uuid: buf.try_get_u64_le()?,
            request_timestamp: buf.try_get_i64_le()?,
            secret_key_secure_id_expiration: buf.try_get_u16_le()?,
            previous_seq_no: buf.try_get_u64_le()?,
            previous_uuid: buf.try_get_u64_le()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiationReject {
    pub reason: String,
    pub uuid: u64,
    pub request_timestamp: i64,
    pub error_codes: i32,
}

impl NegotiationReject {
    pub const META: TemplateMeta = TemplateMeta::new(template_ids::NEGOTIATION_REJECT_502, 66);

    pub fn ser(&self, buf: &mut impl BufMut) {
        put_fixed_string::<48>(buf, &self.reason);
        buf.put_u64_le(self.uuid);
        buf.put_i64_le(self.request_timestamp);
        buf.put_u16_le(self.error_codes as u16);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<NegotiationReject> {
        Ok(NegotiationReject {
            reason: get_fixed_string::<48>(buf)?,
            uuid: buf.try_get_u64_le()?,
            request_timestamp: buf.try_get_i64_le()?,
            error_codes: buf.try_get_u16_le()? as i32,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Establish {
    pub hmac_signature: [u8; 32],
    pub access_key_id: String,
    pub trading_system_name: String,
    pub trading_system_vendor: String,
    pub trading_system_version: String,
    pub uuid: u64,
    pub request_timestamp: i64,
    pub next_seq_no: u64,
    pub session_id: String,
    pub firm_id: String,
    pub keep_alive_interval_ms: i32,
}

impl Establish {
    pub const META: TemplateMeta = TemplateMeta::new(template_ids::ESTABLISH_503, 132);

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.hmac_signature);
        put_fixed_string::<20>(buf, &self.access_key_id);
        put_fixed_string::<30>(buf, &self.trading_system_name);
        put_fixed_string::<10>(buf, &self.trading_system_vendor);
        put_fixed_string::<10>(buf, &self.trading_system_version);
        buf.put_u64_le(self.uuid);
        buf.put_i64_le(self.request_timestamp);
        buf.put_u32_le(self.next_seq_no as u32);
        put_fixed_string::<3>(buf, &self.session_id);
        put_fixed_string::<5>(buf, &self.firm_id);
        buf.put_u16_le(self.keep_alive_interval_ms as u16);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Establish> {
        Ok(Establish {
            hmac_signature: get_signature(buf)?,
            access_key_id: get_fixed_string::<20>(buf)?,
            trading_system_name: get_fixed_string::<30>(buf)?,
            trading_system_vendor: get_fixed_string::<10>(buf)?,
            trading_system_version: get_fixed_string::<10>(buf)?,
            uuid: buf.try_get_u64_le()?,
            request_timestamp: buf.try_get_i64_le()?,
            next_seq_no: buf.try_get_u32_le()? as u64,
            session_id: get_fixed_string::<3>(buf)?,
            firm_id: get_fixed_string::<5>(buf)?,
            keep_alive_interval_ms: buf.try_get_u16_le()? as i32,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EstablishmentAck {
    pub uuid: u64,
    pub request_timestamp: i64,
    pub next_seq_no: u64,
    pub previous_seq_no: u64,
    pub previous_uuid: u64,
    pub keep_alive_interval_ms: i32,
    pub secret_key_secure_id_expiration: u16,
}

impl EstablishmentAck {
    pub const META: TemplateMeta = TemplateMeta::new(template_ids::ESTABLISHMENT_ACK_504, 40);

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.uuid);
        buf.put_i64_le(self.request_timestamp);
        buf.put_u32_le(self.next_seq_no as u32);
        buf.put_u64_le(self.previous_seq_no);
        buf.put_u64_le(self.previous_uuid);
        buf.put_u16_le(self.keep_alive_interval_ms as u16);
        buf.put_u16_le(self.secret_key_secure_id_expiration);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<EstablishmentAck> {
        Ok(EstablishmentAck {
            uuid: buf.try_get_u64_le()?,
            request_timestamp: buf.try_get_i64_le()?,
            next_seq_no: buf.try_get_u32_le()? as u64,
            previous_seq_no: buf.try_get_u64_le()?,
            previous_uuid: buf.try_get_u64_le()?,
            keep_alive_interval_ms: buf.try_get_u16_le()? as i32,
            secret_key_secure_id_expiration: buf.try_get_u16_le()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EstablishmentReject {
    pub reason: String,
    pub uuid: u64,
    pub request_timestamp: i64,
    pub next_seq_no: u64,
    pub error_codes: i32,
}

impl EstablishmentReject {
    pub const META: TemplateMeta = TemplateMeta::new(template_ids::ESTABLISHMENT_REJECT_505, 70);

    pub fn ser(&self, buf: &mut impl BufMut) {
        put_fixed_string::<48>(buf, &self.reason);
        buf.put_u64_le(self.uuid);
        buf.put_i64_le(self.request_timestamp);
        buf.put_u32_le(self.next_seq_no as u32);
        buf.put_u16_le(self.error_codes as u16);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<EstablishmentReject> {
        Ok(EstablishmentReject {
            reason: get_fixed_string::<48>(buf)?,
            uuid: buf.try_get_u64_le()?,
            request_timestamp: buf.try_get_i64_le()?,
            next_seq_no: buf.try_get_u32_le()? as u64,
            error_codes: buf.try_get_u16_le()? as i32,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sequence {
    pub uuid: u64,
    pub next_seq_no: u64,
    pub fti: Fti,
    pub keep_alive_lapsed: KeepAliveLapsed,
}

impl Sequence {
    pub const META: TemplateMeta = TemplateMeta::new(template_ids::SEQUENCE_506, 14);

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.uuid);
        buf.put_u32_le(self.next_seq_no as u32);
        buf.put_u8(self.fti.as_u8());
        buf.put_u8(self.keep_alive_lapsed.as_u8());
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Sequence> {
        Ok(Sequence {
            uuid: buf.try_get_u64_le()?,
            next_seq_no: buf.try_get_u32_le()? as u64,
            fti: Fti::from_u8(buf.try_get_u8()?)?,
            keep_alive_lapsed: KeepAliveLapsed::from_u8(buf.try_get_u8()?)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Terminate {
    pub reason: String,
    pub uuid: u64,
    pub request_timestamp: i64,
    pub error_codes: i32,
}

impl Terminate {
    pub const META: TemplateMeta = TemplateMeta::new(template_ids::TERMINATE_507, 66);

    pub fn ser(&self, buf: &mut impl BufMut) {
        put_fixed_string::<48>(buf, &self.reason);
        buf.put_u64_le(self.uuid);
        buf.put_i64_le(self.request_timestamp);
        buf.put_u16_le(self.error_codes as u16);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Terminate> {
        Ok(Terminate {
            reason: get_fixed_string::<48>(buf)?,
            uuid: buf.try_get_u64_le()?,
            request_timestamp: buf.try_get_i64_le()?,
            error_codes: buf.try_get_u16_le()? as i32,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetransmitRequest {
    pub uuid: u64,
    pub request_timestamp: i64,
    pub from_seq_no: u64,
    pub msg_count: u32,
}

impl RetransmitRequest {
    pub const META: TemplateMeta = TemplateMeta::new(template_ids::RETRANSMIT_REQUEST_508, 22);

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.uuid);
        buf.put_i64_le(self.request_timestamp);
        buf.put_u32_le(self.from_seq_no as u32);
        buf.put_u16_le(self.msg_count as u16);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<RetransmitRequest> {
        Ok(RetransmitRequest {
            uuid: buf.try_get_u64_le()?,
            request_timestamp: buf.try_get_i64_le()?,
            from_seq_no: buf.try_get_u32_le()? as u64,
            msg_count: buf.try_get_u16_le()? as u32,
        })
    }
}

/// Announcement by the exchange that a requested retransmission is about to start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Retransmission {
    pub uuid: u64,
    pub request_timestamp: i64,
    pub from_seq_no: u64,
    pub msg_count: u32,
}

impl Retransmission {
    pub const META: TemplateMeta = TemplateMeta::new(template_ids::RETRANSMISSION_509, 22);

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.uuid);
        buf.put_i64_le(self.request_timestamp);
        buf.put_u32_le(self.from_seq_no as u32);
        buf.put_u16_le(self.msg_count as u16);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Retransmission> {
        Ok(Retransmission {
            uuid: buf.try_get_u64_le()?,
            request_timestamp: buf.try_get_i64_le()?,
            from_seq_no: buf.try_get_u32_le()? as u64,
            msg_count: buf.try_get_u16_le()? as u32,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetransmitReject {
    pub reason: String,
    pub uuid: u64,
    pub request_timestamp: i64,
    pub error_codes: i32,
}

impl RetransmitReject {
    pub const META: TemplateMeta = TemplateMeta::new(template_ids::RETRANSMIT_REJECT_510, 66);

    pub fn ser(&self, buf: &mut impl BufMut) {
        put_fixed_string::<48>(buf, &self.reason);
        buf.put_u64_le(self.uuid);
        buf.put_i64_le(self.request_timestamp);
        buf.put_u16_le(self.error_codes as u16);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<RetransmitReject> {
        Ok(RetransmitReject {
            reason: get_fixed_string::<48>(buf)?,
            uuid: buf.try_get_u64_le()?,
            request_timestamp: buf.try_get_i64_le()?,
            error_codes: buf.try_get_u16_le()? as i32,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotApplied {
    pub uuid: u64,
    pub from_seq_no: u64,
    pub msg_count: u64,
}

impl NotApplied {
    pub const META: TemplateMeta = TemplateMeta::new(template_ids::NOT_APPLIED_513, 16);

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.uuid);
        buf.put_u32_le(self.from_seq_no as u32);
        buf.put_u32_le(self.msg_count as u32);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<NotApplied> {
        Ok(NotApplied {
            uuid: buf.try_get_u64_le()?,
            from_seq_no: buf.try_get_u32_le()? as u64,
            msg_count: buf.try_get_u32_le()? as u64,
        })
    }
}

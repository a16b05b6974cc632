use anyhow::bail;
use bytes::{Buf, BufMut};

pub const SOFH_LENGTH: usize = 6;
/// SOFH encoding-type marker for SBE little-endian payloads.
pub const SOFH_ENCODING_TYPE: u16 = 0xEB50;
pub const SBE_HEADER_LENGTH: usize = 8;
pub const GATEWAY_ENVELOPE_LENGTH: usize = 8;

/// Total length of all headers written ahead of the payload of an outbound message.
pub const HEADERS_LENGTH: usize = GATEWAY_ENVELOPE_LENGTH + SOFH_LENGTH + SBE_HEADER_LENGTH;

/// Gateway envelope written ahead of the SOFH on outbound messages.
///
/// This is internal routing information for the gateway's own reliable log - it is not
///  part of the iLink3 message and is *not* counted by the SOFH length field. Inbound
///  frames from the exchange do not carry it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GatewayEnvelope {
    pub connection_id: u64,
}

impl GatewayEnvelope {
    pub const SERIALIZED_LEN: usize = GATEWAY_ENVELOPE_LENGTH;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.connection_id);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<GatewayEnvelope> {
        let connection_id = buf.try_get_u64_le()?;
        Ok(GatewayEnvelope { connection_id })
    }
}

/// Writes a Simple Open Framing Header. `total_sbe_length` counts the SOFH itself plus
///  the SBE header plus the payload - never the gateway envelope.
pub fn write_sofh(buf: &mut impl BufMut, total_sbe_length: usize) {
    buf.put_u32(total_sbe_length as u32);
    buf.put_u16(SOFH_ENCODING_TYPE);
}

/// Reads a SOFH and returns the total SBE message length it announces.
pub fn read_sofh(buf: &mut impl Buf) -> anyhow::Result<usize> {
    let total_sbe_length = buf.try_get_u32()?;
    let encoding_type = buf.try_get_u16()?;
    if encoding_type != SOFH_ENCODING_TYPE {
        bail!("Unsupported SOFH encoding type: {:#06x}", encoding_type);
    }
    Ok(total_sbe_length as usize)
}

/// SBE message header, little-endian on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SbeHeader {
    pub block_length: u16,
    pub template_id: u16,
    pub schema_id: u16,
    pub version: u16,
}

impl SbeHeader {
    pub const SERIALIZED_LEN: usize = SBE_HEADER_LENGTH;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.block_length);
        buf.put_u16_le(self.template_id);
        buf.put_u16_le(self.schema_id);
        buf.put_u16_le(self.version);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<SbeHeader> {
        let block_length = buf.try_get_u16_le()?;
        let template_id = buf.try_get_u16_le()?;
        let schema_id = buf.try_get_u16_le()?;
        let version = buf.try_get_u16_le()?;
        Ok(SbeHeader {
            block_length,
            template_id,
            schema_id,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_envelope_round_trip() {
        let envelope = GatewayEnvelope { connection_id: 0x0102_0304_0506_0708 };

        let mut buf = Vec::new();
        envelope.ser(&mut buf);
        assert_eq!(buf, vec![0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);

        let mut b: &[u8] = &buf;
        assert_eq!(GatewayEnvelope::deser(&mut b).unwrap(), envelope);
        assert!(b.is_empty());
    }

    #[rstest]
    #[case::min(0)]
    #[case::sequence(SOFH_LENGTH + SBE_HEADER_LENGTH + 14)]
    #[case::large(0xabcd)]
    fn test_sofh_round_trip(#[case] total_sbe_length: usize) {
        let mut buf = Vec::new();
        write_sofh(&mut buf, total_sbe_length);
        assert_eq!(buf.len(), SOFH_LENGTH);

        let mut b: &[u8] = &buf;
        assert_eq!(read_sofh(&mut b).unwrap(), total_sbe_length);
        assert!(b.is_empty());
    }

    #[test]
    fn test_sofh_exact_bytes() {
        let mut buf = Vec::new();
        write_sofh(&mut buf, 28);
        // length big-endian, then the 0xEB50 marker
        assert_eq!(buf, vec![0, 0, 0, 28, 0xeb, 0x50]);
    }

    #[test]
    fn test_sofh_rejects_unknown_encoding_type() {
        let frame = [0u8, 0, 0, 28, 0x5b, 0x50];
        let mut b: &[u8] = &frame;
        assert!(read_sofh(&mut b).is_err());
    }

    #[test]
    fn test_sofh_rejects_short_buffer() {
        let frame = [0u8, 0, 0];
        let mut b: &[u8] = &frame;
        assert!(read_sofh(&mut b).is_err());
    }

    #[rstest]
    #[case::negotiate(SbeHeader { block_length: 76, template_id: 500, schema_id: 8, version: 257 })]
    #[case::sequence(SbeHeader { block_length: 14, template_id: 506, schema_id: 8, version: 257 })]
    #[case::extremes(SbeHeader { block_length: u16::MAX, template_id: 0, schema_id: u16::MAX, version: 0 })]
    fn test_sbe_header_round_trip(#[case] header: SbeHeader) {
        let mut buf = Vec::new();
        header.ser(&mut buf);
        assert_eq!(buf.len(), SBE_HEADER_LENGTH);

        let mut b: &[u8] = &buf;
        assert_eq!(SbeHeader::deser(&mut b).unwrap(), header);
        assert!(b.is_empty());
    }

    #[test]
    fn test_sbe_header_is_little_endian() {
        let header = SbeHeader { block_length: 14, template_id: 506, schema_id: 8, version: 257 };
        let mut buf = Vec::new();
        header.ser(&mut buf);
        assert_eq!(buf, vec![14, 0, 0xfa, 0x01, 8, 0, 0x01, 0x01]);
    }
}

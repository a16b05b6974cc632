//! HMAC-SHA256 signing of the canonical Negotiate / Establish request strings.
//!
//! The exchange hands out a base64url-encoded secret (the "user key"); each Negotiate
//!  and Establish request carries an HMAC-SHA256 signature over a canonical multi-line
//!  rendering of the request's fields, keyed with the decoded secret.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::SessionError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_LENGTH: usize = 32;

/// Canonical request string for a Negotiate: LF separated, no trailing LF.
pub fn negotiate_canonical_request(
    request_timestamp: i64,
    uuid: u64,
    session_id: &str,
    firm_id: &str,
) -> String {
    format!("{}\n{}\n{}\n{}", request_timestamp, uuid, session_id, firm_id)
}

/// Canonical request string for an Establish: LF separated, no trailing LF.
#[allow(clippy::too_many_arguments)]
pub fn establish_canonical_request(
    request_timestamp: i64,
    uuid: u64,
    session_id: &str,
    firm_id: &str,
    trading_system_name: &str,
    trading_system_version: &str,
    trading_system_vendor: &str,
    next_sent_seq_no: u64,
    keep_alive_interval_ms: i32,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}",
        request_timestamp,
        uuid,
        session_id,
        firm_id,
        trading_system_name,
        trading_system_version,
        trading_system_vendor,
        next_sent_seq_no,
        keep_alive_interval_ms,
    )
}

/// Signs a canonical request with HMAC-SHA256.
///
/// The user key is base64url decoded (URL-safe alphabet, no padding) to obtain the raw
///  secret; the canonical request is hashed as UTF-8. Any failure here is fatal to the
///  session - there is no way to authenticate without a working signature.
pub fn sign_canonical_request(
    user_key_base64url: &str,
    canonical_request: &str,
) -> Result<[u8; SIGNATURE_LENGTH], SessionError> {
    let raw_key = URL_SAFE_NO_PAD
        .decode(user_key_base64url)
        .map_err(|e| SessionError::Authentication(format!("user key is not valid base64url: {}", e)))?;

    let mut mac = HmacSha256::new_from_slice(&raw_key)
        .map_err(|e| SessionError::Authentication(format!("HMAC init failed: {}", e)))?;
    mac.update(canonical_request.as_bytes());

    let mut signature = [0u8; SIGNATURE_LENGTH];
    signature.copy_from_slice(&mac.finalize().into_bytes());
    Ok(signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_negotiate_canonical_request_format() {
        let canonical = negotiate_canonical_request(1_000, 42, "S1", "F1");
        assert_eq!(canonical, "1000\n42\nS1\nF1");
    }

    #[test]
    fn test_establish_canonical_request_format() {
        let canonical =
            establish_canonical_request(1_000, 42, "S1", "F1", "sys", "1.0", "vendor", 5, 500);
        assert_eq!(canonical, "1000\n42\nS1\nF1\nsys\n1.0\nvendor\n5\n500");
    }

    // RFC 4231 test vectors, keys re-encoded as base64url without padding.
    #[rstest]
    #[case::rfc4231_case_1(
        "CwsLCwsLCwsLCwsLCwsLCwsLCws", // 20 bytes of 0x0b
        "Hi There",
        [
            0xb0, 0x34, 0x4c, 0x61, 0xd8, 0xdb, 0x38, 0x53,
            0x5c, 0xa8, 0xaf, 0xce, 0xaf, 0x0b, 0xf1, 0x2b,
            0x88, 0x1d, 0xc2, 0x00, 0xc9, 0x83, 0x3d, 0xa7,
            0x26, 0xe9, 0x37, 0x6c, 0x2e, 0x32, 0xcf, 0xf7,
        ]
    )]
    #[case::rfc4231_case_2(
        "SmVmZQ", // "Jefe"
        "what do ya want for nothing?",
        [
            0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e,
            0x6a, 0x04, 0x24, 0x26, 0x08, 0x95, 0x75, 0xc7,
            0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83,
            0x9d, 0xec, 0x58, 0xb9, 0x64, 0xec, 0x38, 0x43,
        ]
    )]
    fn test_sign_canonical_request(
        #[case] user_key: &str,
        #[case] canonical_request: &str,
        #[case] expected: [u8; SIGNATURE_LENGTH],
    ) {
        let signature = sign_canonical_request(user_key, canonical_request).unwrap();
        assert_eq!(signature, expected);
    }

    #[rstest]
    #[case::standard_alphabet_plus("ab+cd")]
    #[case::padded("SmVmZQ==")]
    #[case::not_base64("!!!")]
    fn test_sign_rejects_bad_keys(#[case] user_key: &str) {
        let result = sign_canonical_request(user_key, "whatever");
        assert!(matches!(result, Err(SessionError::Authentication(_))));
    }
}

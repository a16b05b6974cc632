use anyhow::bail;
use rustc_hash::FxHashMap;

use crate::offsets::TemplateFieldOffsets;

/// CME-side width of the session id field.
pub const SESSION_ID_LENGTH: usize = 3;
/// CME-side width of the firm id field.
pub const FIRM_ID_LENGTH: usize = 5;
/// CME-side width of the access key id field.
pub const ACCESS_KEY_ID_LENGTH: usize = 20;

/// Where a session's first sequence number comes from when re-establishing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InitialSequenceNumber {
    /// Continue from the last value seen on a previous incarnation of the session, or
    ///  start at 1 if there was none.
    #[default]
    Automatic,
    /// Use exactly this value.
    Explicit(u64),
}

/// Everything the engine needs to know to run one iLink3 session.
#[derive(Clone, Debug)]
pub struct Ilink3SessionConfig {
    pub session_id: String,
    pub firm_id: String,
    pub access_key_id: String,
    /// base64url encoded HMAC secret as handed out by the exchange.
    pub user_key: String,

    pub trading_system_name: String,
    pub trading_system_version: String,
    pub trading_system_vendor: String,

    /// Keepalive interval requested at Establish time. This single value also paces the
    ///  Negotiate / Establish resend timers - the protocol has no separate request
    ///  timeout.
    pub requested_keep_alive_interval_ms: i32,

    /// If true, skip Negotiate on connect and try to re-Establish the previous session
    ///  (same uuid, continued sequence numbers).
    pub re_establish_last_session: bool,
    pub initial_sent_sequence_number: InitialSequenceNumber,
    pub initial_received_sequence_number: InitialSequenceNumber,

    /// Upper bound on the msgCount of a single RetransmitRequest. A larger gap is split
    ///  into several requests of at most this size, sent one at a time.
    pub retransmit_request_message_limit: u32,

    /// A NotApplied carrying a uuid other than the session's is a protocol anomaly the
    ///  exchange should never produce. `true` (the default) terminates the session;
    ///  `false` logs and ignores it.
    pub terminate_on_foreign_not_applied: bool,

    /// Field offsets for application templates whose layout deviates from the built-in
    ///  table, keyed by template id.
    pub template_field_offsets: FxHashMap<u16, TemplateFieldOffsets>,
}

impl Ilink3SessionConfig {
    pub fn new(
        session_id: &str,
        firm_id: &str,
        access_key_id: &str,
        user_key: &str,
    ) -> Ilink3SessionConfig {
        Ilink3SessionConfig {
            session_id: session_id.to_string(),
            firm_id: firm_id.to_string(),
            access_key_id: access_key_id.to_string(),
            user_key: user_key.to_string(),
            trading_system_name: "ilink3-session".to_string(),
            trading_system_version: env!("CARGO_PKG_VERSION").to_string(),
            trading_system_vendor: "ilink3-session".to_string(),
            requested_keep_alive_interval_ms: 10_000,
            re_establish_last_session: false,
            initial_sent_sequence_number: InitialSequenceNumber::Automatic,
            initial_received_sequence_number: InitialSequenceNumber::Automatic,
            retransmit_request_message_limit: 2_500,
            terminate_on_foreign_not_applied: true,
            template_field_offsets: FxHashMap::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.session_id.is_empty() || self.session_id.len() > SESSION_ID_LENGTH {
            bail!("session id must be 1..={} characters", SESSION_ID_LENGTH);
        }
        if self.firm_id.is_empty() || self.firm_id.len() > FIRM_ID_LENGTH {
            bail!("firm id must be 1..={} characters", FIRM_ID_LENGTH);
        }
        if self.access_key_id.is_empty() || self.access_key_id.len() > ACCESS_KEY_ID_LENGTH {
            bail!("access key id must be 1..={} characters", ACCESS_KEY_ID_LENGTH);
        }
        if self.user_key.is_empty() {
            bail!("user key must not be empty");
        }
        if self.requested_keep_alive_interval_ms <= 0 {
            bail!("keepalive interval must be positive");
        }
        if self.retransmit_request_message_limit == 0 {
            bail!("retransmit request message limit must be positive");
        }
        Ok(())
    }

    /// Resolves the sequence number a session starts with, given what was last seen on a
    ///  previous incarnation (if anything).
    pub fn initial_sequence_number(
        &self,
        configured: InitialSequenceNumber,
        last_seen: Option<u64>,
    ) -> u64 {
        if !self.re_establish_last_session {
            return 1;
        }
        match configured {
            InitialSequenceNumber::Automatic => last_seen.map(|n| n + 1).unwrap_or(1),
            InitialSequenceNumber::Explicit(n) => n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn valid_config() -> Ilink3SessionConfig {
        Ilink3SessionConfig::new("S1", "F1", "AK1234", "c2VjcmV0")
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[rstest]
    #[case::empty_session(|c: &mut Ilink3SessionConfig| c.session_id.clear())]
    #[case::long_session(|c: &mut Ilink3SessionConfig| c.session_id = "ABCD".to_string())]
    #[case::empty_firm(|c: &mut Ilink3SessionConfig| c.firm_id.clear())]
    #[case::long_firm(|c: &mut Ilink3SessionConfig| c.firm_id = "ABCDEF".to_string())]
    #[case::empty_access_key(|c: &mut Ilink3SessionConfig| c.access_key_id.clear())]
    #[case::long_access_key(|c: &mut Ilink3SessionConfig| c.access_key_id = "A".repeat(21))]
    #[case::empty_user_key(|c: &mut Ilink3SessionConfig| c.user_key.clear())]
    #[case::zero_keep_alive(|c: &mut Ilink3SessionConfig| c.requested_keep_alive_interval_ms = 0)]
    #[case::negative_keep_alive(|c: &mut Ilink3SessionConfig| c.requested_keep_alive_interval_ms = -1)]
    #[case::zero_retransmit_limit(|c: &mut Ilink3SessionConfig| c.retransmit_request_message_limit = 0)]
    fn test_invalid_config_fails(#[case] corrupt: fn(&mut Ilink3SessionConfig)) {
        let mut config = valid_config();
        corrupt(&mut config);
        assert!(config.validate().is_err());
    }

    #[rstest]
    #[case::fresh_session(false, InitialSequenceNumber::Explicit(17), Some(9), 1)]
    #[case::automatic_with_history(true, InitialSequenceNumber::Automatic, Some(9), 10)]
    #[case::automatic_without_history(true, InitialSequenceNumber::Automatic, None, 1)]
    #[case::explicit(true, InitialSequenceNumber::Explicit(17), Some(9), 17)]
    fn test_initial_sequence_number(
        #[case] re_establish: bool,
        #[case] configured: InitialSequenceNumber,
        #[case] last_seen: Option<u64>,
        #[case] expected: u64,
    ) {
        let mut config = valid_config();
        config.re_establish_last_session = re_establish;
        assert_eq!(config.initial_sequence_number(configured, last_seen), expected);
    }
}

//! Per-template byte offsets of the three fields the session layer cares about in
//!  otherwise opaque application messages: `seqNum` (u32 LE), `sendingTimeEpoch`
//!  (u64 LE nanoseconds) and the single-byte `possRetrans` flag.
//!
//! Lookup is a dense array indexed by template id rather than a map or dynamic
//!  dispatch - it sits on the per-message hot path.

use rustc_hash::FxHashMap;

use crate::templates::template_ids;

/// Sentinel for "this template does not have the field".
pub const MISSING_OFFSET: i32 = -1;

/// Wire value of a `possRetrans` byte that means `true`; anything else is `false`.
pub const BOOLEAN_FLAG_TRUE: u8 = 0x01;

/// Offsets of the session-relevant fields within one template's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TemplateFieldOffsets {
    pub seq_num: i32,
    pub sending_time_epoch: i32,
    pub poss_retrans: i32,
}

impl TemplateFieldOffsets {
    pub const MISSING: TemplateFieldOffsets = TemplateFieldOffsets {
        seq_num: MISSING_OFFSET,
        sending_time_epoch: MISSING_OFFSET,
        poss_retrans: MISSING_OFFSET,
    };
}

/// Application messages in this schema lead with the session-layer triplet:
///  seqNum u32 at 0, sendingTimeEpoch u64 at 4, possRetrans at 12.
const APPLICATION_OFFSETS: TemplateFieldOffsets =
    TemplateFieldOffsets { seq_num: 0, sending_time_epoch: 4, poss_retrans: 12 };

const APPLICATION_TEMPLATE_IDS: &[u16] = &[
    template_ids::NEW_ORDER_SINGLE_514,
    template_ids::ORDER_CANCEL_REPLACE_REQUEST_515,
    template_ids::ORDER_CANCEL_REQUEST_516,
    template_ids::MASS_QUOTE_517,
    template_ids::BUSINESS_REJECT_521,
    template_ids::EXECUTION_REPORT_NEW_522,
    template_ids::EXECUTION_REPORT_REJECT_526,
    template_ids::EXECUTION_REPORT_CANCEL_531,
    template_ids::EXECUTION_REPORT_STATUS_532,
    template_ids::EXECUTION_REPORT_TRADE_OUTRIGHT_533,
];

pub struct Ilink3Offsets {
    seq_num: Vec<i32>,
    sending_time_epoch: Vec<i32>,
    poss_retrans: Vec<i32>,
}

impl Ilink3Offsets {
    pub fn new() -> Ilink3Offsets {
        let mut offsets = Ilink3Offsets {
            seq_num: Vec::new(),
            sending_time_epoch: Vec::new(),
            poss_retrans: Vec::new(),
        };
        for &template_id in APPLICATION_TEMPLATE_IDS {
            offsets.register(template_id, APPLICATION_OFFSETS);
        }
        offsets
    }

    /// Builds the table with additional / overriding entries for application templates
    ///  that deviate from the built-in layout.
    pub fn with_overrides(overrides: &FxHashMap<u16, TemplateFieldOffsets>) -> Ilink3Offsets {
        let mut offsets = Ilink3Offsets::new();
        for (&template_id, &template_offsets) in overrides {
            offsets.register(template_id, template_offsets);
        }
        offsets
    }

    fn register(&mut self, template_id: u16, template_offsets: TemplateFieldOffsets) {
        let index = template_id as usize;
        if index >= self.seq_num.len() {
            self.seq_num.resize(index + 1, MISSING_OFFSET);
            self.sending_time_epoch.resize(index + 1, MISSING_OFFSET);
            self.poss_retrans.resize(index + 1, MISSING_OFFSET);
        }
        self.seq_num[index] = template_offsets.seq_num;
        self.sending_time_epoch[index] = template_offsets.sending_time_epoch;
        self.poss_retrans[index] = template_offsets.poss_retrans;
    }

    fn lookup(table: &[i32], template_id: u16) -> Option<usize> {
        match table.get(template_id as usize) {
            Some(&offset) if offset != MISSING_OFFSET => Some(offset as usize),
            _ => None,
        }
    }

    pub fn seq_num_offset(&self, template_id: u16) -> Option<usize> {
        Self::lookup(&self.seq_num, template_id)
    }

    pub fn sending_time_epoch_offset(&self, template_id: u16) -> Option<usize> {
        Self::lookup(&self.sending_time_epoch, template_id)
    }

    pub fn poss_retrans_offset(&self, template_id: u16) -> Option<usize> {
        Self::lookup(&self.poss_retrans, template_id)
    }

    /// Reads the sequence number of a message payload starting at `offset`, or `None`
    ///  if the template has no such field or the buffer is too short to hold it.
    pub fn seq_num(&self, template_id: u16, buffer: &[u8], offset: usize) -> Option<u64> {
        let field_offset = offset + self.seq_num_offset(template_id)?;
        let raw = buffer.get(field_offset..field_offset + 4)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64)
    }

    /// Whether a message payload starting at `offset` carries the retransmission flag.
    pub fn poss_retrans(&self, template_id: u16, buffer: &[u8], offset: usize) -> Option<bool> {
        let field_offset = offset + self.poss_retrans_offset(template_id)?;
        buffer.get(field_offset).map(|&b| b == BOOLEAN_FLAG_TRUE)
    }
}

impl Default for Ilink3Offsets {
    fn default() -> Ilink3Offsets {
        Ilink3Offsets::new()
    }
}

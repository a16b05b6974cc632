//! Client-side iLink3 session engine.
//!
//! This crate implements the session layer a market-connectivity gateway needs to keep a
//! logical iLink3 session alive against an exchange gateway, assuming a reliable ordered
//! message transport underneath (the transport itself - sockets, TLS, retransmission of
//! lost datagrams - is somebody else's problem).
//!
//! ## Design goals
//!
//! * Single-threaded and cooperatively polled: all state transitions, sends and inbound
//!   event handlers run on one thread that also owns the outbound publication. No locks.
//! * Nothing blocks. Every would-block condition - transport buffer full, missing response -
//!   is represented as an outcome value or a deadline and resolved on a later [`poll`]
//!   (`poll` here meaning [`session::Ilink3Session::poll`]).
//! * Back-pressure is a first-class citizen: the transport answers a claim with
//!   `Pressured` rather than blocking, and the state machine picks the matching retry
//!   path on the next poll via per-action sticky fields.
//! * Outbound messages are framed with a zero-copy claim/commit discipline: a region of
//!   the transport's outbound buffer is claimed, the headers and fixed fields are written
//!   in place, the caller encodes the rest of the payload and commits.
//!
//! ## Framing
//!
//! Every outbound message is laid out as follows (see [`framing`]):
//!
//! ```ascii
//!  0: gateway envelope (8 bytes): connection id (u64 LE). Internal routing only,
//!     not part of the iLink3 message and not counted by the SOFH length.
//!  8: Simple Open Framing Header (6 bytes):
//!     * total SBE message length (u32 BE) - counts SOFH + SBE header + payload
//!     * encoding type 0xEB50 (u16 BE)
//! 14: SBE message header (8 bytes): blockLength, templateId, schemaId, version
//!     (u16 LE each)
//! 22: payload (blockLength bytes, little-endian fields)
//! ```
//!
//! ## Keepalive
//!
//! Both sides agree on a keepalive interval at Establish time. The session renews its
//! receive deadline on every inbound message; when the deadline lapses it sends a
//! Sequence message flagged `Lapsed` and waits one more interval. If that second
//! interval also passes without any inbound traffic the session terminates - the
//! "2x interval" rule of the protocol.
//!
//! ## Retransmission
//!
//! A gap in inbound business-message sequence numbers triggers a RetransmitRequest for
//! the missing range, chunked to the configured per-request message limit. At most one
//! request is in flight; the remaining chunks wait in a FIFO and are sent one by one as
//! each in-flight chunk is filled by the final retransmitted message of its range.
//!
//! NB: Sequence messages are asymmetric to business messages here - a Sequence carrying
//! a `nextSeqNo` ahead of the expected one moves the expected sequence number forward
//! without requesting a retransmit.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod framing;
pub mod handler;
pub mod offsets;
pub mod parser;
pub mod poller;
pub mod proxy;
pub mod publication;
pub mod session;
pub mod templates;
pub mod test_util;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}

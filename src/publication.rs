/// Reason the transport gives for refusing writes permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The underlying connection is gone.
    ConnectionClosed,
    /// The publication reached the end of its addressable log.
    MaxPositionExceeded,
    /// The transport is shutting down.
    Shutdown,
}

/// Outcome of claiming a region of the outbound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum ClaimOutcome {
    /// The region was reserved. The value is the position the message will occupy in the
    ///  transport's reliable log once committed.
    Claimed(u64),
    /// The transport cannot accept the claim right now. Retry on a later poll.
    Pressured,
    /// The transport will never accept another claim.
    Closed(CloseReason),
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed(_))
    }

    pub fn is_pressured(&self) -> bool {
        matches!(self, ClaimOutcome::Pressured)
    }
}

/// Outcome of a fully framed send (claim + populate + commit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SendOutcome {
    /// The message was committed at this position in the transport's reliable log.
    Committed(u64),
    /// The transport pushed back; nothing was written. Retry on a later poll.
    Pressured,
    /// The transport will never accept another send. The owning library is expected to
    ///  tear the session down.
    Closed(CloseReason),
}

impl SendOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, SendOutcome::Committed(_))
    }

    pub fn is_pressured(&self) -> bool {
        matches!(self, SendOutcome::Pressured)
    }
}

impl From<ClaimOutcome> for SendOutcome {
    fn from(outcome: ClaimOutcome) -> SendOutcome {
        match outcome {
            ClaimOutcome::Claimed(position) => SendOutcome::Committed(position),
            ClaimOutcome::Pressured => SendOutcome::Pressured,
            ClaimOutcome::Closed(reason) => SendOutcome::Closed(reason),
        }
    }
}

/// Claim/commit access to the session's exclusive outbound publication.
///
/// This is the seam to the reliable ordered transport: one publication per connection,
///  owned by exactly one session. A claim reserves a contiguous, zero-initialised region
///  of the outbound buffer; the caller writes into it via [`claimed_mut`] and publishes
///  it with [`commit`] (or releases it unpublished with [`abort`]).
///
/// [`claimed_mut`]: OrderedPublication::claimed_mut
/// [`commit`]: OrderedPublication::commit
/// [`abort`]: OrderedPublication::abort
pub trait OrderedPublication {
    /// Reserves `length` contiguous bytes in the outbound buffer.
    fn try_claim(&mut self, length: usize) -> ClaimOutcome;

    /// The currently claimed region. Only valid between a successful [`try_claim`] and
    ///  the matching [`commit`] / [`abort`].
    ///
    /// [`try_claim`]: OrderedPublication::try_claim
    /// [`commit`]: OrderedPublication::commit
    /// [`abort`]: OrderedPublication::abort
    fn claimed_mut(&mut self) -> &mut [u8];

    /// Publishes the claimed region.
    fn commit(&mut self);

    /// Releases the claimed region without publishing it.
    fn abort(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::claimed(ClaimOutcome::Claimed(64), SendOutcome::Committed(64))]
    #[case::pressured(ClaimOutcome::Pressured, SendOutcome::Pressured)]
    #[case::closed(
        ClaimOutcome::Closed(CloseReason::ConnectionClosed),
        SendOutcome::Closed(CloseReason::ConnectionClosed)
    )]
    fn test_send_outcome_from_claim(#[case] claim: ClaimOutcome, #[case] expected: SendOutcome) {
        assert_eq!(SendOutcome::from(claim), expected);
    }

    #[rstest]
    #[case::committed(SendOutcome::Committed(1), true, false)]
    #[case::pressured(SendOutcome::Pressured, false, true)]
    #[case::closed(SendOutcome::Closed(CloseReason::Shutdown), false, false)]
    fn test_send_outcome_predicates(
        #[case] outcome: SendOutcome,
        #[case] committed: bool,
        #[case] pressured: bool,
    ) {
        assert_eq!(outcome.is_committed(), committed);
        assert_eq!(outcome.is_pressured(), pressured);
    }
}

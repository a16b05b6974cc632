//! Thin poller: owns the sessions of one library instance, fans the duty cycle out to
//!  them and reaps sessions that finished unbinding.

use tracing::debug;

use crate::publication::OrderedPublication;
use crate::session::Ilink3Session;

pub struct Ilink3Poller<P: OrderedPublication> {
    sessions: Vec<Ilink3Session<P>>,
}

impl<P: OrderedPublication> Ilink3Poller<P> {
    pub fn new() -> Ilink3Poller<P> {
        Ilink3Poller { sessions: Vec::new() }
    }

    pub fn add_session(&mut self, session: Ilink3Session<P>) {
        self.sessions.push(session);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_mut(&mut self, uuid: u64) -> Option<&mut Ilink3Session<P>> {
        self.sessions.iter_mut().find(|s| s.uuid() == uuid)
    }

    /// Polls every session with the current monotonic time and removes the ones that
    ///  reached a terminal state. Returns the total amount of work done.
    pub fn poll(&mut self, time_ms: i64) -> i32 {
        let mut work_count = 0;
        for session in &mut self.sessions {
            work_count += session.poll(time_ms);
        }

        self.sessions.retain(|session| {
            if session.is_unbound() {
                debug!("reaping unbound session {}", session.uuid());
                false
            } else {
                true
            }
        });

        work_count
    }
}

impl<P: OrderedPublication> Default for Ilink3Poller<P> {
    fn default() -> Ilink3Poller<P> {
        Ilink3Poller::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Ilink3SessionConfig;
    use crate::session::{LastSequenceNumbers, State};
    use crate::test_util::{
        CollectingHandler, RecordingOwner, RecordingReply, ScriptedPublication, SettableClock,
    };
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn session(uuid: u64) -> Ilink3Session<ScriptedPublication> {
        let config = Ilink3SessionConfig::new(
            "S1",
            "F1",
            "AK",
            &URL_SAFE_NO_PAD.encode(b"0123456789abcdef0123456789abcdef"),
        );
        Ilink3Session::new(
            config,
            uuid + 100,
            uuid,
            ScriptedPublication::new(),
            Box::new(SettableClock::new(0, 1_000)),
            Box::new(CollectingHandler::new()),
            Box::new(RecordingOwner::new()),
            Box::new(RecordingReply::new()),
            LastSequenceNumbers::NONE,
            true,
        )
    }

    #[test]
    fn test_polls_every_session() {
        let mut poller = Ilink3Poller::new();
        poller.add_session(session(1));
        poller.add_session(session(2));

        // each session sends its Negotiate on the first poll
        assert_eq!(poller.poll(0), 2);
        assert_eq!(poller.len(), 2);
        assert_eq!(poller.session_mut(1).unwrap().state(), State::SentNegotiate);
        assert_eq!(poller.session_mut(2).unwrap().state(), State::SentNegotiate);
    }

    #[test]
    fn test_reaps_unbound_sessions() {
        let mut poller = Ilink3Poller::new();
        poller.add_session(session(1));
        poller.add_session(session(2));
        poller.poll(0);

        let _ = poller.session_mut(1).unwrap().on_negotiation_reject("nope", 1, 1_000, 20);

        poller.poll(1);
        assert_eq!(poller.len(), 1);
        assert!(poller.session_mut(1).is_none());
        assert!(poller.session_mut(2).is_some());
    }

    #[test]
    fn test_empty_poller_does_no_work() {
        let mut poller: Ilink3Poller<ScriptedPublication> = Ilink3Poller::new();
        assert!(poller.is_empty());
        assert_eq!(poller.poll(0), 0);
    }
}

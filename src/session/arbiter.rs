//! Duplicate-session arbitration.
//!
//! When several agent instances join the same room, the one with the
//! lexicographically smallest identity keeps the session and every other
//! instance leaves. The roster is the only coordination channel.

use crate::config::ArbitrationConfig;
use crate::error::Result;
use crate::room::{Participant, ParticipantIdentity, Room};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of an election.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbitrationOutcome {
    Proceed,
    Yield { winner: ParticipantIdentity },
}

/// Decide whether `me` keeps the session given the current roster.
///
/// Only connected agents other than `me` are considered.
#[must_use]
pub fn elect(me: &ParticipantIdentity, roster: &[Participant]) -> ArbitrationOutcome {
    let smallest_other = roster
        .iter()
        .filter(|p| p.is_agent() && p.connected && &p.identity != me)
        .map(|p| &p.identity)
        .min();
    match smallest_other {
        Some(other) if other < me => ArbitrationOutcome::Yield {
            winner: other.clone(),
        },
        _ => ArbitrationOutcome::Proceed,
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateSessionArbiter {
    grace: Duration,
}

impl DuplicateSessionArbiter {
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    #[must_use]
    pub fn from_config(config: &ArbitrationConfig) -> Self {
        Self::new(config.grace_period())
    }

    /// Entry check: let the roster settle, then elect. Disconnects on a loss.
    pub async fn arbitrate(&self, room: &dyn Room) -> Result<ArbitrationOutcome> {
        debug!(grace_ms = self.grace.as_millis() as u64, "waiting for roster to settle");
        tokio::time::sleep(self.grace).await;
        self.recheck(room).await
    }

    /// Elect immediately without the grace period. Disconnects on a loss.
    pub async fn recheck(&self, room: &dyn Room) -> Result<ArbitrationOutcome> {
        let me = room.local_identity();
        let outcome = elect(&me, &room.participants());
        match &outcome {
            ArbitrationOutcome::Yield { winner } => {
                warn!(me = %me, winner = %winner, "another agent owns this session; disconnecting");
                room.disconnect().await?;
            }
            ArbitrationOutcome::Proceed => info!(me = %me, "agent owns this session"),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn me(id: &str) -> ParticipantIdentity {
        ParticipantIdentity::from(id)
    }

    #[test]
    fn alone_proceeds() {
        assert_eq!(elect(&me("agent-b"), &[]), ArbitrationOutcome::Proceed);
        assert_eq!(
            elect(&me("agent-b"), &[Participant::user("alice")]),
            ArbitrationOutcome::Proceed
        );
    }

    #[test]
    fn larger_identity_yields() {
        let roster = [Participant::agent("agent-a"), Participant::user("alice")];
        assert_eq!(
            elect(&me("agent-b"), &roster),
            ArbitrationOutcome::Yield {
                winner: me("agent-a")
            }
        );
        assert_eq!(
            elect(&me("agent-a"), &[Participant::agent("agent-b")]),
            ArbitrationOutcome::Proceed
        );
    }

    #[test]
    fn disconnected_agents_are_ignored() {
        let roster = [Participant::agent("agent-a").disconnected()];
        assert_eq!(elect(&me("agent-b"), &roster), ArbitrationOutcome::Proceed);
    }

    #[test]
    fn self_in_roster_is_ignored() {
        let roster = [Participant::agent("agent-b")];
        assert_eq!(elect(&me("agent-b"), &roster), ArbitrationOutcome::Proceed);
    }

    #[test]
    fn exactly_one_survivor_for_every_arrival_order() {
        let ids = ["agent-c", "agent-a", "agent-d", "agent-b"];
        let orders: [[usize; 4]; 4] = [[0, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]];
        for order in orders {
            let mut survivors = Vec::new();
            for (position, &idx) in order.iter().enumerate() {
                let roster: Vec<Participant> = order
                    .iter()
                    .enumerate()
                    .filter(|(p, _)| *p != position)
                    .map(|(_, &i)| Participant::agent(ids[i]))
                    .collect();
                if elect(&me(ids[idx]), &roster) == ArbitrationOutcome::Proceed {
                    survivors.push(ids[idx]);
                }
            }
            assert_eq!(survivors, vec!["agent-a"], "order {order:?}");
        }
    }
}

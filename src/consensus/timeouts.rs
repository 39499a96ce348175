/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Round timeouts of a [`Context`](super::context::Context).
//!
//! Every timeout kind lasts `base + round * increment`, so a round that cannot reach a quorum
//! always ends, and later rounds wait longer to give a slow network time to catch up.
//!
//! Each `Context` owns one [`TimeoutManager`], a thread holding the pending deadlines of that
//! height. Cancelling the manager (which happens when the `Context` is disposed or decides) drops
//! every pending deadline at once.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    fmt::{self, Display, Formatter},
    sync::{
        atomic::{self, AtomicBool},
        mpsc::{self, RecvTimeoutError, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use typed_builder::TypedBuilder;

use crate::types::data_types::Round;

/// The step a timeout guards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    Propose,
    PreVote,
    PreCommit,
}

impl Display for TimeoutKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Propose => write!(f, "Propose"),
            TimeoutKind::PreVote => write!(f, "PreVote"),
            TimeoutKind::PreCommit => write!(f, "PreCommit"),
        }
    }
}

/// Base durations and per-round increments of the three timeout kinds.
///
/// Defaults to a 5 second base and a 1 second increment for every kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [TimeoutConfiguration]. Every field is optional and falls back
    to a 5 second base or a 1 second increment.
"))]
pub struct TimeoutConfiguration {
    #[builder(default = Duration::from_secs(5), setter(doc = "Set the base duration of the Propose timeout."))]
    pub propose_base: Duration,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set how much longer the Propose timeout gets every round."))]
    pub propose_increment: Duration,
    #[builder(default = Duration::from_secs(5), setter(doc = "Set the base duration of the PreVote timeout."))]
    pub pre_vote_base: Duration,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set how much longer the PreVote timeout gets every round."))]
    pub pre_vote_increment: Duration,
    #[builder(default = Duration::from_secs(5), setter(doc = "Set the base duration of the PreCommit timeout."))]
    pub pre_commit_base: Duration,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set how much longer the PreCommit timeout gets every round."))]
    pub pre_commit_increment: Duration,
}

impl Default for TimeoutConfiguration {
    fn default() -> Self {
        TimeoutConfiguration::builder().build()
    }
}

impl TimeoutConfiguration {
    /// Get how long a `kind` timeout lasts in `round`.
    pub fn duration(&self, kind: TimeoutKind, round: Round) -> Duration {
        let (base, increment) = match kind {
            TimeoutKind::Propose => (self.propose_base, self.propose_increment),
            TimeoutKind::PreVote => (self.pre_vote_base, self.pre_vote_increment),
            TimeoutKind::PreCommit => (self.pre_commit_base, self.pre_commit_increment),
        };
        base.saturating_add(increment.saturating_mul(round.int()))
    }
}

enum TimeoutCommand {
    Schedule {
        kind: TimeoutKind,
        round: Round,
        deadline: Instant,
    },
    Shutdown,
}

struct PendingTimeout {
    deadline: Instant,
    seq: u64,
    kind: TimeoutKind,
    round: Round,
}

impl PartialEq for PendingTimeout {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for PendingTimeout {}

impl PartialOrd for PendingTimeout {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingTimeout {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// Owner of the timeout thread of one height.
pub(crate) struct TimeoutManager {
    config: TimeoutConfiguration,
    commands: Sender<TimeoutCommand>,
    cancelled: AtomicBool,
}

impl TimeoutManager {
    /// Spawn the timeout thread. `on_timeout` runs on that thread every time a scheduled timeout
    /// expires before the manager is cancelled.
    pub(crate) fn start<F>(config: TimeoutConfiguration, on_timeout: F) -> TimeoutManager
    where
        F: Fn(TimeoutKind, Round) + Send + 'static,
    {
        let (commands, command_receiver) = mpsc::channel::<TimeoutCommand>();

        thread::spawn(move || {
            let mut pending: BinaryHeap<Reverse<PendingTimeout>> = BinaryHeap::new();
            let mut seq = 0u64;
            loop {
                let command = match pending.peek() {
                    Some(Reverse(next)) => {
                        let deadline = next.deadline;
                        let now = Instant::now();
                        if deadline <= now {
                            if let Some(Reverse(expired)) = pending.pop() {
                                on_timeout(expired.kind, expired.round);
                            }
                            continue;
                        }
                        command_receiver.recv_timeout(deadline - now)
                    }
                    None => command_receiver
                        .recv()
                        .map_err(|_| RecvTimeoutError::Disconnected),
                };

                match command {
                    Ok(TimeoutCommand::Schedule {
                        kind,
                        round,
                        deadline,
                    }) => {
                        seq += 1;
                        pending.push(Reverse(PendingTimeout {
                            deadline,
                            seq,
                            kind,
                            round,
                        }));
                    }
                    Ok(TimeoutCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
                    Err(RecvTimeoutError::Timeout) => (),
                }
            }
        });

        TimeoutManager {
            config,
            commands,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Arm a `kind` timeout for `round`, returning how long it lasts.
    pub(crate) fn schedule(&self, kind: TimeoutKind, round: Round) -> Duration {
        let duration = self.config.duration(kind, round);
        if !self.is_cancelled() {
            let _ = self.commands.send(TimeoutCommand::Schedule {
                kind,
                round,
                deadline: Instant::now() + duration,
            });
        }
        duration
    }

    /// Drop every pending timeout and stop the thread. Only the first call has an effect.
    pub(crate) fn cancel(&self) {
        if !self.cancelled.swap(true, atomic::Ordering::SeqCst) {
            let _ = self.commands.send(TimeoutCommand::Shutdown);
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(atomic::Ordering::SeqCst)
    }
}

impl Drop for TimeoutManager {
    fn drop(&mut self) {
        self.cancel()
    }
}

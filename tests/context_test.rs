//! Tests that drive a single height's [`Context`] by hand, playing the other three validators of a
//! four-validator set.
//!
//! The validators are sorted the way the validator set sorts them, so the proposer of round `r` of
//! height 1 is `keypairs[(1 + r) % 4]`. The context under test belongs to `keypairs[ME]`, which
//! proposes only in round 2.

mod common;

use std::{
    sync::{mpsc::Receiver, Arc, Mutex},
    time::Duration,
};

use log::LevelFilter;
use tenderbft::{
    consensus::{
        context::{
            Context, ContextConfiguration, ContextFault, DecisionSink, HandleOutcome,
            MessageRejection,
        },
        messages::{ConsensusMessage, Propose, Vote, VoteKind},
        timeouts::TimeoutConfiguration,
        types::{BlockCommit, Step},
    },
    networking::sending::SenderHandle,
    types::{
        block::Block,
        crypto_primitives::Keypair,
        data_types::{CryptoHash, Height, Round},
    },
};

use common::{
    keys::{equal_power_validator_set, sorted_keypairs},
    logging::setup_logger,
    number_chain::{
        number_block, number_block_with_commit, salted_block, Behaviour, NumberBlockSource,
    },
    recording_sink::{wait_until, RecordingSink},
};

const HEIGHT: Height = Height::new(1);
const ME: usize = 3;

struct Harness {
    height: Height,
    keypairs: Vec<Keypair>,
    context: Arc<Context<NumberBlockSource>>,
    sink: Arc<RecordingSink>,
    outbox: Receiver<ConsensusMessage>,
}

impl Harness {
    fn new(me: usize, behaviour: Behaviour, timeouts: TimeoutConfiguration) -> Harness {
        Harness::at_height(HEIGHT, sorted_keypairs(4), me, behaviour, timeouts)
    }

    /// Build a context of `height` for `keypairs[me]`. Every height is run by `keypairs`.
    fn at_height(
        height: Height,
        keypairs: Vec<Keypair>,
        me: usize,
        behaviour: Behaviour,
        timeouts: TimeoutConfiguration,
    ) -> Harness {
        setup_logger(LevelFilter::Debug);

        let validator_set = equal_power_validator_set(&keypairs);
        let previous_validator_set = (height > HEIGHT).then(|| validator_set.clone());
        let (sender, outbox) = SenderHandle::new(1024);
        let sink = Arc::new(RecordingSink::default());
        let context = Context::new(
            ContextConfiguration {
                keypair: keypairs[me].clone(),
                height,
                timeouts,
                previous_validator_set,
            },
            validator_set,
            Arc::new(Mutex::new(NumberBlockSource::new(behaviour))),
            sender,
            Arc::clone(&sink) as Arc<dyn DecisionSink>,
            None,
        );

        Harness {
            height,
            keypairs,
            context,
            sink,
            outbox,
        }
    }

    fn propose(
        &self,
        proposer: usize,
        round: u32,
        block: &Block,
        valid_round: Option<u32>,
    ) -> HandleOutcome {
        let propose = Propose::new(
            &self.keypairs[proposer],
            Round::new(round),
            block,
            valid_round.map(Round::new),
        );
        self.context.handle_message(propose.into())
    }

    fn vote(
        &self,
        voter: usize,
        round: u32,
        block: Option<&Block>,
        kind: VoteKind,
    ) -> HandleOutcome {
        let vote = Vote::new(
            &self.keypairs[voter],
            self.height,
            Round::new(round),
            block.map(|block| block.hash),
            kind,
        );
        self.context.handle_message(vote.into())
    }

    /// Take every message the context handed to the broadcaster since the last call.
    fn sent(&self) -> Vec<ConsensusMessage> {
        self.outbox.try_iter().collect()
    }
}

/// Timeouts long enough to never fire during a test.
fn slow_timeouts() -> TimeoutConfiguration {
    TimeoutConfiguration::builder()
        .propose_base(Duration::from_secs(30))
        .pre_vote_base(Duration::from_secs(30))
        .pre_commit_base(Duration::from_secs(30))
        .build()
}

/// Get the votes of `kind` that `keypair` signed among `messages`, as `(round, block_hash)` pairs.
fn own_votes(
    messages: &[ConsensusMessage],
    keypair: &Keypair,
    kind: VoteKind,
) -> Vec<(Round, Option<CryptoHash>)> {
    messages
        .iter()
        .filter_map(|message| match message {
            ConsensusMessage::PreVote(vote) | ConsensusMessage::PreCommit(vote)
                if vote.kind == kind && vote.validator == keypair.public_bytes() =>
            {
                Some((vote.round, vote.block_hash))
            }
            _ => None,
        })
        .collect()
}

#[test]
fn pre_vote_quorum_locks_and_pre_commit_quorum_decides() {
    let harness = Harness::new(ME, Behaviour::Honest, slow_timeouts());
    let block = number_block(HEIGHT);
    harness.context.start(None);
    assert_eq!(harness.context.step(), Step::Propose);

    assert_eq!(harness.propose(1, 0, &block, None), HandleOutcome::Accepted);
    assert_eq!(harness.context.step(), Step::PreVote);
    assert_eq!(
        own_votes(&harness.sent(), &harness.keypairs[ME], VoteKind::PreVote),
        vec![(Round::new(0), Some(block.hash))]
    );

    harness.vote(0, 0, Some(&block), VoteKind::PreVote);
    assert_eq!(harness.context.step(), Step::PreVote);
    harness.vote(1, 0, Some(&block), VoteKind::PreVote);

    let status = harness.context.status();
    assert_eq!(status.step, Step::PreCommit);
    assert_eq!(status.locked_round, Some(Round::new(0)));
    assert_eq!(status.valid_round, Some(Round::new(0)));
    assert_eq!(harness.context.locked_block(), Some(block.hash));
    assert_eq!(
        own_votes(&harness.sent(), &harness.keypairs[ME], VoteKind::PreCommit),
        vec![(Round::new(0), Some(block.hash))]
    );

    harness.vote(0, 0, Some(&block), VoteKind::PreCommit);
    assert!(harness.sink.decisions().is_empty());
    harness.vote(1, 0, Some(&block), VoteKind::PreCommit);

    let decisions = harness.sink.decisions();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].height, HEIGHT);
    assert_eq!(decisions[0].round, Round::new(0));
    assert_eq!(decisions[0].block, block);
    assert_eq!(harness.context.step(), Step::EndCommit);
    assert_eq!(harness.context.committed_round(), Some(Round::new(0)));

    let commit = harness.context.vote_set(Round::new(0)).unwrap();
    assert_eq!(commit.block_hash, block.hash);
    assert_eq!(commit.votes.len(), 3);
    let validator_set = equal_power_validator_set(&harness.keypairs);
    assert!(commit.is_correct(&validator_set).is_ok());
}

#[test]
fn split_pre_votes_pre_commit_nil_after_pre_vote_timeout() {
    let timeouts = TimeoutConfiguration::builder()
        .propose_base(Duration::from_secs(30))
        .pre_vote_base(Duration::from_millis(50))
        .pre_commit_base(Duration::from_secs(30))
        .build();
    let harness = Harness::new(ME, Behaviour::Honest, timeouts);
    let block = number_block(HEIGHT);
    harness.context.start(None);

    harness.propose(1, 0, &block, None);
    harness.vote(0, 0, Some(&block), VoteKind::PreVote);
    harness.vote(1, 0, None, VoteKind::PreVote);
    assert_eq!(harness.context.step(), Step::PreVote);

    wait_until(Duration::from_secs(5), || {
        harness.context.step() == Step::PreCommit
    });
    assert_eq!(harness.context.locked_block(), None);
    assert_eq!(
        own_votes(&harness.sent(), &harness.keypairs[ME], VoteKind::PreCommit),
        vec![(Round::new(0), None)]
    );
}

#[test]
fn malformed_proposals_and_votes_are_rejected() {
    let harness = Harness::new(ME, Behaviour::Honest, slow_timeouts());
    let block = number_block(HEIGHT);
    harness.context.start(None);

    assert_eq!(
        harness.propose(0, 0, &block, None),
        HandleOutcome::Rejected(MessageRejection::InvalidProposer)
    );
    assert_eq!(
        harness.propose(1, 0, &block, Some(0)),
        HandleOutcome::Rejected(MessageRejection::InvalidValidRound)
    );

    let other_height = number_block(Height::new(2));
    assert_eq!(
        harness.propose(1, 0, &other_height, None),
        HandleOutcome::Rejected(MessageRejection::WrongHeight {
            expected: HEIGHT,
            actual: Height::new(2),
        })
    );

    let mut forged = Propose::new(&harness.keypairs[1], Round::new(0), &block, None);
    forged.block_hash = salted_block(HEIGHT, 7).hash;
    assert_eq!(
        harness.context.handle_message(forged.into()),
        HandleOutcome::Rejected(MessageRejection::BadSignature)
    );

    let outsiders = sorted_keypairs(1);
    let vote = Vote::new(&outsiders[0], HEIGHT, Round::new(0), None, VoteKind::PreVote);
    assert_eq!(
        harness.context.handle_message(vote.into()),
        HandleOutcome::Rejected(MessageRejection::UnknownValidator)
    );

    let pre_commit = Vote::new(
        &harness.keypairs[0],
        HEIGHT,
        Round::new(0),
        None,
        VoteKind::PreCommit,
    );
    assert_eq!(
        harness
            .context
            .handle_message(ConsensusMessage::PreVote(pre_commit)),
        HandleOutcome::Rejected(MessageRejection::MismatchedKind)
    );

    assert_eq!(harness.context.step(), Step::Propose);
}

#[test]
fn duplicate_votes_count_once_and_equivocations_are_dropped() {
    let harness = Harness::new(ME, Behaviour::Honest, slow_timeouts());
    let block = number_block(HEIGHT);
    harness.context.start(None);
    harness.propose(1, 0, &block, None);

    assert_eq!(
        harness.vote(0, 0, Some(&block), VoteKind::PreVote),
        HandleOutcome::Accepted
    );
    assert_eq!(
        harness.vote(0, 0, Some(&block), VoteKind::PreVote),
        HandleOutcome::Duplicate
    );
    assert_eq!(
        harness.vote(0, 0, None, VoteKind::PreVote),
        HandleOutcome::Rejected(MessageRejection::Equivocation)
    );
    assert_eq!(
        harness.propose(1, 0, &salted_block(HEIGHT, 1), None),
        HandleOutcome::Rejected(MessageRejection::Equivocation)
    );

    // Two PreVotes for the block (ours and validator 0's) are short of the quorum of three.
    assert_eq!(harness.context.step(), Step::PreVote);
    assert_eq!(harness.context.locked_block(), None);
}

#[test]
fn locked_validator_pre_votes_nil_for_a_different_block() {
    let timeouts = TimeoutConfiguration::builder()
        .propose_base(Duration::from_secs(30))
        .pre_vote_base(Duration::from_secs(30))
        .pre_commit_base(Duration::from_millis(50))
        .build();
    let harness = Harness::new(ME, Behaviour::Honest, timeouts);
    let block = number_block(HEIGHT);
    harness.context.start(None);

    harness.propose(1, 0, &block, None);
    harness.vote(0, 0, Some(&block), VoteKind::PreVote);
    harness.vote(1, 0, Some(&block), VoteKind::PreVote);
    assert_eq!(harness.context.locked_block(), Some(block.hash));

    harness.vote(0, 0, None, VoteKind::PreCommit);
    harness.vote(1, 0, None, VoteKind::PreCommit);
    wait_until(Duration::from_secs(5), || {
        harness.context.round() == Round::new(1)
    });
    assert_eq!(harness.context.step(), Step::Propose);
    harness.sent();

    let other_block = salted_block(HEIGHT, 1);
    assert_eq!(
        harness.propose(2, 1, &other_block, None),
        HandleOutcome::Accepted
    );
    assert_eq!(
        own_votes(&harness.sent(), &harness.keypairs[ME], VoteKind::PreVote),
        vec![(Round::new(1), None)]
    );
    assert_eq!(harness.context.locked_block(), Some(block.hash));
    assert!(harness.sink.decisions().is_empty());
}

#[test]
fn locked_validator_pre_votes_a_block_with_a_newer_pre_vote_quorum() {
    let harness = Harness::new(ME, Behaviour::Honest, slow_timeouts());
    let locked_block = number_block(HEIGHT);
    let other_block = salted_block(HEIGHT, 1);
    harness.context.start(None);

    harness.propose(1, 0, &locked_block, None);
    harness.vote(0, 0, Some(&locked_block), VoteKind::PreVote);
    harness.vote(1, 0, Some(&locked_block), VoteKind::PreVote);
    assert_eq!(harness.context.status().locked_round, Some(Round::new(0)));

    // The other three validators PreVote another block in round 1, which also moves us there.
    for voter in [0, 1, 2] {
        harness.vote(voter, 1, Some(&other_block), VoteKind::PreVote);
    }
    assert_eq!(harness.context.round(), Round::new(1));
    harness.sent();

    // The proposer of round 3 re-proposes that block with round 1 as its valid round.
    assert_eq!(
        harness.propose(0, 3, &other_block, Some(1)),
        HandleOutcome::Accepted
    );
    harness.vote(1, 3, None, VoteKind::PreVote);

    assert_eq!(harness.context.round(), Round::new(3));
    assert_eq!(
        own_votes(&harness.sent(), &harness.keypairs[ME], VoteKind::PreVote),
        vec![(Round::new(3), Some(other_block.hash))]
    );
    assert_eq!(harness.context.locked_block(), Some(locked_block.hash));
}

#[test]
fn messages_from_over_a_third_of_power_skip_to_their_round() {
    let harness = Harness::new(ME, Behaviour::Honest, slow_timeouts());
    harness.context.start(None);

    harness.vote(0, 5, None, VoteKind::PreVote);
    assert_eq!(harness.context.round(), Round::new(0));

    harness.vote(1, 3, None, VoteKind::PreVote);
    assert_eq!(harness.context.round(), Round::new(0));
    harness.vote(2, 3, None, VoteKind::PreCommit);

    let status = harness.context.status();
    assert_eq!(status.round, Round::new(3));
    assert_eq!(status.step, Step::Propose);
}

#[test]
fn decides_at_most_once() {
    let harness = Harness::new(ME, Behaviour::Honest, slow_timeouts());
    let block = number_block(HEIGHT);
    harness.context.start(None);

    harness.propose(1, 0, &block, None);
    for voter in [0, 1] {
        harness.vote(voter, 0, Some(&block), VoteKind::PreVote);
    }
    for voter in [0, 1] {
        harness.vote(voter, 0, Some(&block), VoteKind::PreCommit);
    }
    assert_eq!(harness.sink.decisions().len(), 1);

    assert_eq!(
        harness.vote(2, 0, Some(&block), VoteKind::PreCommit),
        HandleOutcome::Accepted
    );
    for voter in [0, 1, 2] {
        harness.vote(voter, 1, None, VoteKind::PreCommit);
    }

    assert_eq!(harness.sink.decisions().len(), 1);
    assert_eq!(harness.context.step(), Step::EndCommit);
    assert_eq!(harness.context.round(), Round::new(0));
}

#[test]
fn messages_received_before_start_are_evaluated_on_start() {
    let harness = Harness::new(ME, Behaviour::Honest, slow_timeouts());
    let block = number_block(HEIGHT);

    assert_eq!(harness.propose(1, 0, &block, None), HandleOutcome::Accepted);
    harness.vote(0, 0, Some(&block), VoteKind::PreVote);
    harness.vote(1, 0, Some(&block), VoteKind::PreVote);
    assert_eq!(harness.context.step(), Step::Default);
    assert!(harness.sent().is_empty());

    harness.context.start(None);

    assert_eq!(harness.context.step(), Step::PreCommit);
    assert_eq!(harness.context.locked_block(), Some(block.hash));
}

#[test]
fn proposer_broadcasts_its_candidate_and_pre_votes_it() {
    let harness = Harness::new(1, Behaviour::Honest, slow_timeouts());
    harness.context.start(None);

    let sent = harness.sent();
    let proposals: Vec<&Propose> = sent
        .iter()
        .filter_map(|message| match message {
            ConsensusMessage::Propose(propose) => Some(propose),
            _ => None,
        })
        .collect();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].round, Round::new(0));
    assert_eq!(proposals[0].valid_round, None);
    assert_eq!(proposals[0].block().unwrap(), number_block(HEIGHT));

    assert_eq!(
        own_votes(&sent, &harness.keypairs[1], VoteKind::PreVote),
        vec![(Round::new(0), Some(number_block(HEIGHT).hash))]
    );
}

#[test]
fn failed_candidate_is_reported_and_propose_timeout_pre_votes_nil() {
    let timeouts = TimeoutConfiguration::builder()
        .propose_base(Duration::from_millis(50))
        .pre_vote_base(Duration::from_secs(30))
        .pre_commit_base(Duration::from_secs(30))
        .build();
    let harness = Harness::new(1, Behaviour::FailToPropose, timeouts);
    harness.context.start(None);

    let faults = harness.sink.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].0, HEIGHT);
    assert!(matches!(faults[0].1, ContextFault::ProposeBlock(_)));

    wait_until(Duration::from_secs(5), || {
        harness.context.step() == Step::PreVote
    });
    assert_eq!(
        own_votes(&harness.sent(), &harness.keypairs[1], VoteKind::PreVote),
        vec![(Round::new(0), None)]
    );
}

#[test]
fn invalid_block_gets_a_nil_pre_vote_and_is_never_decided() {
    let harness = Harness::new(ME, Behaviour::RejectAll, slow_timeouts());
    let block = number_block(HEIGHT);
    harness.context.start(None);

    assert_eq!(harness.propose(1, 0, &block, None), HandleOutcome::Accepted);
    assert_eq!(
        own_votes(&harness.sent(), &harness.keypairs[ME], VoteKind::PreVote),
        vec![(Round::new(0), None)]
    );

    for voter in [0, 1, 2] {
        harness.vote(voter, 0, Some(&block), VoteKind::PreVote);
    }
    for voter in [0, 1, 2] {
        harness.vote(voter, 0, Some(&block), VoteKind::PreCommit);
    }
    assert!(harness.sink.decisions().is_empty());
    assert_eq!(harness.context.locked_block(), None);
}

#[test]
fn disposed_context_ignores_messages() {
    let harness = Harness::new(ME, Behaviour::Honest, slow_timeouts());
    harness.context.start(None);
    harness.context.dispose();

    assert!(harness.context.is_disposed());
    assert_eq!(
        harness.propose(1, 0, &number_block(HEIGHT), None),
        HandleOutcome::Disposed
    );
    assert_eq!(harness.context.step(), Step::Propose);
}

/// Sign PreCommits for `block` in round 0 of its height with `keypairs[voters]`, as a commit.
fn commit_of(keypairs: &[Keypair], voters: &[usize], block: &Block) -> BlockCommit {
    BlockCommit {
        height: block.height,
        round: Round::init(),
        block_hash: block.hash,
        votes: voters
            .iter()
            .map(|&voter| {
                Vote::new(
                    &keypairs[voter],
                    block.height,
                    Round::init(),
                    Some(block.hash),
                    VoteKind::PreCommit,
                )
            })
            .collect(),
    }
}

#[test]
fn block_with_a_correct_last_commit_is_pre_voted() {
    let second = Height::new(2);
    let keypairs = sorted_keypairs(4);
    let last_commit = commit_of(&keypairs, &[0, 1, 2], &number_block(HEIGHT));
    let harness = Harness::at_height(second, keypairs, ME, Behaviour::Honest, slow_timeouts());
    let block = number_block_with_commit(second, Some(last_commit));
    harness.context.start(None);

    // The proposer of round 0 of height 2 is `keypairs[2]`.
    assert_eq!(harness.propose(2, 0, &block, None), HandleOutcome::Accepted);
    assert_eq!(
        own_votes(&harness.sent(), &harness.keypairs[ME], VoteKind::PreVote),
        vec![(Round::new(0), Some(block.hash))]
    );
}

#[test]
fn block_without_a_quorum_in_its_last_commit_is_never_decided() {
    let second = Height::new(2);
    let forged_commits = [
        None,
        Some(BlockCommit {
            height: HEIGHT,
            round: Round::init(),
            block_hash: CryptoHash::new([7u8; 32]),
            votes: Vec::new(),
        }),
        Some(commit_of(&sorted_keypairs(4)[..], &[0, 1, 2], &number_block(HEIGHT))),
    ];

    for last_commit in forged_commits {
        let harness =
            Harness::at_height(second, sorted_keypairs(4), ME, Behaviour::Honest, slow_timeouts());
        let block = number_block_with_commit(second, last_commit);
        harness.context.start(None);

        assert_eq!(harness.propose(2, 0, &block, None), HandleOutcome::Accepted);
        assert_eq!(
            own_votes(&harness.sent(), &harness.keypairs[ME], VoteKind::PreVote),
            vec![(Round::new(0), None)]
        );

        for voter in [0, 1, 2] {
            harness.vote(voter, 0, Some(&block), VoteKind::PreVote);
        }
        for voter in [0, 1, 2] {
            harness.vote(voter, 0, Some(&block), VoteKind::PreCommit);
        }
        assert!(harness.sink.decisions().is_empty());
        assert_eq!(harness.context.locked_block(), None);
    }
}

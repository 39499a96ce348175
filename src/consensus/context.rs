/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state machine that runs Tendermint consensus on a single height.
//!
//! ## Message handling
//!
//! Every message handed to [`Context::handle_message`] is first validated against the height's
//! validator set and stored in the context's round store. Storing is possible before the context is
//! [started](Context::start), so that messages from faster validators are not lost; they are
//! evaluated once the context starts.
//!
//! After a message is stored, the context evaluates the following rules, in order, with `r` being its
//! current round:
//!
//! 1. On a proposal for `r` without a valid round, while in Propose: PreVote the block if it is valid
//!    and not in conflict with the lock, PreVote nil otherwise.
//! 2. On a proposal for `r` with a valid round `vr < r` that has a two-thirds PreVote quorum for the
//!    block, while in Propose: PreVote the block if it is valid and the lock is not newer than `vr` or
//!    is on the same block, PreVote nil otherwise.
//! 3. On two-thirds of PreVotes of any kind for `r`, while in PreVote: arm the PreVote timeout, once
//!    per round.
//! 4. On a valid proposal for `r` and a two-thirds PreVote quorum for its block, while at PreVote or
//!    later: if in PreVote, lock on the block and PreCommit it. In any case, remember the block as
//!    the valid value. Happens once per round.
//! 5. On two-thirds of nil PreVotes for `r`, while in PreVote: PreCommit nil.
//! 6. On two-thirds of PreCommits of any kind for `r`: arm the PreCommit timeout, once per round.
//! 7. On a valid proposal and a two-thirds PreCommit quorum for its block in the message's round,
//!    while not yet decided: decide the block.
//! 8. On messages from more than a third of the voting power in a round above `r`: skip to that
//!    round.
//!
//! ## Concurrency
//!
//! Messages, timeouts, and the context's own proposals may be processed concurrently from different
//! threads. Rule evaluation happens under a single state lock and yields a list of actions, which are
//! carried out after the lock is released. Own messages are broadcast and then handed back to
//! `handle_message`, so they go through exactly the same path as everybody else's.
//!
//! ## Disposal
//!
//! [`Context::dispose`] cancels every pending timeout of the height and makes the context ignore all
//! further input. A context is disposed by its supervisor once its height is over.

use std::{
    fmt::{self, Display, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc, Mutex, Weak,
    },
    time::SystemTime,
};

use crate::{
    block_source::{BlockSource, InvalidBlock, ProposeBlockError, ProposeCandidateRequest},
    events::*,
    networking::sending::SenderHandle,
    types::{
        block::Block,
        crypto_primitives::Keypair,
        data_types::{CryptoHash, Height, Round, VerifyingKeyBytes},
        signed_messages::SignedMessage,
        validator_set::ValidatorSet,
    },
};

use super::{
    lock,
    messages::{ConsensusMessage, MessageKind, Propose, Vote, VoteKind},
    round_store::{InsertOutcome, RoundStore},
    timeouts::{TimeoutConfiguration, TimeoutKind, TimeoutManager},
    types::{BlockCommit, ContextStatus, Decision, Step, Tally},
};

/// Receiver of the outcomes of a [`Context`].
///
/// Implemented by the [supervisor](super::supervisor::ConsensusContext), which commits decisions to
/// the chain, and by tests.
pub trait DecisionSink: Send + Sync {
    /// Called exactly once per context, when it decides a block.
    fn decide(&self, decision: Decision);

    /// Called when a collaborator failed while the context was working on `height`.
    fn report(&self, height: Height, fault: ContextFault);
}

/// A collaborator failure that a [`Context`] survived, but that its supervisor should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextFault {
    ProposeBlock(ProposeBlockError),
}

impl Display for ContextFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ContextFault::ProposeBlock(err) => write!(f, "{}", err),
        }
    }
}

/// Reasons for dropping a message without storing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageRejection {
    /// The message is for a different height than the context's.
    WrongHeight { expected: Height, actual: Height },

    /// The message's signer is not in the height's validator set.
    UnknownValidator,

    /// The proposal was signed by someone other than the round's proposer.
    InvalidProposer,

    /// The proposal proposes the nil hash.
    NilProposal,

    /// The proposal's valid round is not below its round.
    InvalidValidRound,

    /// The message's signature does not verify against its signer.
    BadSignature,

    /// The proposal's block bytes could not be decoded.
    MalformedBlock,

    /// The decoded block does not match the proposal's block hash or height, or its hash is not
    /// computed over its own contents.
    BlockHashMismatch,

    /// The message variant does not match the vote kind it carries.
    MismatchedKind,

    /// The signer already sent a different message of the same kind in the same round.
    Equivocation,
}

impl Display for MessageRejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MessageRejection::WrongHeight { expected, actual } => {
                write!(f, "wrong height {}, expected {}", actual, expected)
            }
            MessageRejection::UnknownValidator => write!(f, "unknown validator"),
            MessageRejection::InvalidProposer => write!(f, "invalid proposer"),
            MessageRejection::NilProposal => write!(f, "nil proposal"),
            MessageRejection::InvalidValidRound => write!(f, "invalid valid round"),
            MessageRejection::BadSignature => write!(f, "bad signature"),
            MessageRejection::MalformedBlock => write!(f, "malformed block"),
            MessageRejection::BlockHashMismatch => write!(f, "block hash mismatch"),
            MessageRejection::MismatchedKind => write!(f, "mismatched kind"),
            MessageRejection::Equivocation => write!(f, "equivocation"),
        }
    }
}

/// What became of a message handed to [`Context::handle_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The message was stored and evaluated (or buffered, if the context is not started).
    Accepted,

    /// The exact same message was stored before.
    Duplicate,

    Rejected(MessageRejection),

    /// The context is disposed and ignores all messages.
    Disposed,
}

/// Parameters of a single [`Context`].
#[derive(Clone)]
pub struct ContextConfiguration {
    pub keypair: Keypair,
    pub height: Height,
    pub timeouts: TimeoutConfiguration,
    /// The validator set of `height - 1`, which must have signed the last commit of every block
    /// proposed at `height`. `None` for the first height after genesis, whose blocks carry no last
    /// commit.
    pub previous_validator_set: Option<ValidatorSet>,
}

/// A block together with the round in which it gathered a two-thirds PreVote quorum.
#[derive(Clone, Debug)]
struct RoundValue {
    block: Block,
    round: Round,
}

struct ContextState {
    round: Round,
    step: Step,
    last_commit: Option<BlockCommit>,
    locked: Option<RoundValue>,
    valid: Option<RoundValue>,
    committed_round: Option<Round>,
    pre_vote_timeout_armed: Vec<Round>,
    pre_commit_timeout_armed: Vec<Round>,
    polka_seen: Vec<Round>,
}

/// Insert `round` into `rounds`, returning whether it was absent.
fn first_time(rounds: &mut Vec<Round>, round: Round) -> bool {
    if rounds.contains(&round) {
        false
    } else {
        rounds.push(round);
        true
    }
}

/// A side effect decided under the state lock and carried out after releasing it.
enum Action {
    Broadcast(ConsensusMessage),
    ArmTimeout(TimeoutKind, Round),
    Propose(Round),
    Decide(Decision),
}

/// The consensus state machine of one height.
pub struct Context<B: BlockSource> {
    config: ContextConfiguration,
    validator_set: ValidatorSet,
    block_source: Arc<Mutex<B>>,
    sender: SenderHandle,
    sink: Arc<dyn DecisionSink>,
    event_publisher: Option<Sender<Event>>,
    store: RoundStore,
    state: Mutex<ContextState>,
    timeouts: TimeoutManager,
    disposed: AtomicBool,
}

impl<B: BlockSource> Context<B> {
    /// Create an unstarted context for `config.height`. Its timeout thread is spawned immediately
    /// but stays idle until [`start`](Self::start).
    pub fn new(
        config: ContextConfiguration,
        validator_set: ValidatorSet,
        block_source: Arc<Mutex<B>>,
        sender: SenderHandle,
        sink: Arc<dyn DecisionSink>,
        event_publisher: Option<Sender<Event>>,
    ) -> Arc<Context<B>> {
        Arc::new_cyclic(|context: &Weak<Context<B>>| {
            let context = context.clone();
            let timeouts = TimeoutManager::start(config.timeouts, move |kind, round| {
                if let Some(context) = context.upgrade() {
                    context.on_timeout(kind, round)
                }
            });

            Context {
                config,
                validator_set,
                block_source,
                sender,
                sink,
                event_publisher,
                store: RoundStore::new(),
                state: Mutex::new(ContextState {
                    round: Round::init(),
                    step: Step::Default,
                    last_commit: None,
                    locked: None,
                    valid: None,
                    committed_round: None,
                    pre_vote_timeout_armed: Vec::new(),
                    pre_commit_timeout_armed: Vec::new(),
                    polka_seen: Vec::new(),
                }),
                timeouts,
                disposed: AtomicBool::new(false),
            }
        })
    }

    /// Enter round 0 and evaluate every message buffered so far. `last_commit` is the commit of the
    /// previous height, handed to the block source when this replica proposes.
    ///
    /// Starting a context twice, or starting a disposed context, has no effect.
    pub fn start(&self, last_commit: Option<BlockCommit>) {
        if self.is_disposed() {
            return;
        }

        let has_last_commit = last_commit.is_some();
        let actions = {
            let mut state = lock(&self.state);
            if state.step != Step::Default {
                log::warn!("Context of height {} is already started", self.height());
                return;
            }
            state.last_commit = last_commit;

            let mut actions = Vec::new();
            self.enter_round(&mut state, Round::init(), &mut actions);
            for round in self.store.rounds_above(Round::init()) {
                self.try_decide(&mut state, round, &mut actions);
            }
            self.skip_to_highest_active_round(&mut state, &mut actions);
            actions
        };

        Event::publish(
            &self.event_publisher,
            Event::StartHeight(StartHeightEvent {
                timestamp: SystemTime::now(),
                height: self.height(),
                has_last_commit,
            }),
        );
        self.execute(actions);
    }

    /// Validate and store `message`, then evaluate it if the context is started.
    pub fn handle_message(&self, message: ConsensusMessage) -> HandleOutcome {
        if self.is_disposed() {
            return HandleOutcome::Disposed;
        }

        let signer = message.signer();
        let round = message.round();
        let kind = message.kind();
        match self.store_message(message) {
            Ok(InsertOutcome::Inserted) => (),
            Ok(InsertOutcome::Duplicate) => return HandleOutcome::Duplicate,
            Ok(InsertOutcome::Equivocation) => {
                log::warn!(
                    "Equivocating {} from {} in round {} of height {}",
                    kind,
                    crate::logging::first_seven_base64_chars(&signer),
                    round,
                    self.height()
                );
                return self.reject(signer, round, kind, MessageRejection::Equivocation);
            }
            Err(reason) => return self.reject(signer, round, kind, reason),
        }

        let actions = {
            let mut state = lock(&self.state);
            if state.step == Step::Default {
                return HandleOutcome::Accepted;
            }

            let mut actions = Vec::new();
            self.evaluate_round(&mut state, &mut actions);
            if kind != MessageKind::PreVote {
                self.try_decide(&mut state, round, &mut actions);
            }
            if round > state.round {
                self.skip_to_highest_active_round(&mut state, &mut actions);
            }
            actions
        };
        self.execute(actions);

        HandleOutcome::Accepted
    }

    /// Stop the context: cancel its timeouts and ignore all further messages and timeouts.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.timeouts.cancel();
            log::debug!("Disposed context of height {}", self.height());
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn height(&self) -> Height {
        self.config.height
    }

    pub fn round(&self) -> Round {
        lock(&self.state).round
    }

    pub fn step(&self) -> Step {
        lock(&self.state).step
    }

    pub fn status(&self) -> ContextStatus {
        let state = lock(&self.state);
        ContextStatus {
            height: self.height(),
            round: state.round,
            step: state.step,
            locked_round: state.locked.as_ref().map(|locked| locked.round),
            valid_round: state.valid.as_ref().map(|valid| valid.round),
        }
    }

    /// Get the hash of the block this context is locked on, if any.
    pub fn locked_block(&self) -> Option<CryptoHash> {
        lock(&self.state)
            .locked
            .as_ref()
            .map(|locked| locked.block.hash)
    }

    /// Get the hash of the block this context last saw a two-thirds PreVote quorum for, if any.
    pub fn valid_block(&self) -> Option<CryptoHash> {
        lock(&self.state).valid.as_ref().map(|valid| valid.block.hash)
    }

    /// Get the round in which this context decided, if it did.
    pub fn committed_round(&self) -> Option<Round> {
        lock(&self.state).committed_round
    }

    /// Collect the PreCommits stored for `round` into a [`BlockCommit`] for the block proposed in it.
    /// `None` if no proposal was stored for `round`.
    pub fn vote_set(&self, round: Round) -> Option<BlockCommit> {
        let messages = self.store.snapshot(round);
        let proposal = messages.proposal()?;
        Some(BlockCommit {
            height: self.height(),
            round,
            block_hash: proposal.block.hash,
            votes: messages.votes(VoteKind::PreCommit).cloned().collect(),
        })
    }

    fn reject(
        &self,
        signer: VerifyingKeyBytes,
        round: Round,
        kind: MessageKind,
        reason: MessageRejection,
    ) -> HandleOutcome {
        log::debug!(
            "Rejected {} from {} in round {} of height {}: {}",
            kind,
            crate::logging::first_seven_base64_chars(&signer),
            round,
            self.height(),
            reason
        );
        Event::publish(
            &self.event_publisher,
            Event::RejectMessage(RejectMessageEvent {
                timestamp: SystemTime::now(),
                signer,
                height: self.height(),
                round,
                kind,
                reason: reason.clone(),
            }),
        );
        HandleOutcome::Rejected(reason)
    }

    fn store_message(&self, message: ConsensusMessage) -> Result<InsertOutcome, MessageRejection> {
        if message.height() != self.height() {
            return Err(MessageRejection::WrongHeight {
                expected: self.height(),
                actual: message.height(),
            });
        }

        match message {
            ConsensusMessage::Propose(propose) => self.store_proposal(propose),
            ConsensusMessage::PreVote(vote) => self.store_vote(vote, VoteKind::PreVote),
            ConsensusMessage::PreCommit(vote) => self.store_vote(vote, VoteKind::PreCommit),
        }
    }

    fn store_proposal(&self, propose: Propose) -> Result<InsertOutcome, MessageRejection> {
        let expected_proposer = self
            .validator_set
            .proposer(propose.height, propose.round)
            .map(|proposer| proposer.to_bytes());
        if expected_proposer != Some(propose.proposer) {
            return Err(MessageRejection::InvalidProposer);
        }
        if propose.block_hash.is_nil() {
            return Err(MessageRejection::NilProposal);
        }
        if propose
            .valid_round
            .is_some_and(|valid_round| valid_round >= propose.round)
        {
            return Err(MessageRejection::InvalidValidRound);
        }
        if !propose.is_correctly_self_signed() {
            return Err(MessageRejection::BadSignature);
        }

        if let Some(existing) = self.store.proposal(propose.round) {
            return Ok(if existing == propose {
                InsertOutcome::Duplicate
            } else {
                InsertOutcome::Equivocation
            });
        }

        let block = propose
            .block()
            .map_err(|_| MessageRejection::MalformedBlock)?;
        if block.hash != propose.block_hash || block.height != propose.height || !block.is_correct()
        {
            return Err(MessageRejection::BlockHashMismatch);
        }

        let validity = self
            .check_last_commit(&block)
            .and_then(|()| lock(&self.block_source).validate(&block));
        let is_valid = match validity {
            Ok(()) => true,
            Err(err) => {
                log::debug!(
                    "Block {} proposed in round {} of height {} is invalid: {}",
                    block.hash,
                    propose.round,
                    self.height(),
                    err
                );
                false
            }
        };

        Ok(self.store.insert_proposal(propose, block, is_valid))
    }

    /// Check that `block` carries the proof of finality of the previous height.
    fn check_last_commit(&self, block: &Block) -> Result<(), InvalidBlock> {
        match (&self.config.previous_validator_set, &block.last_commit) {
            (None, None) => Ok(()),
            (None, Some(_)) => Err(InvalidBlock::new(
                "first block after genesis carries a last commit",
            )),
            (Some(_), None) => Err(InvalidBlock::new("missing last commit")),
            (Some(validator_set), Some(last_commit)) => {
                if Some(last_commit.height) != self.height().prev() {
                    return Err(InvalidBlock::new(format!(
                        "last commit is for height {}",
                        last_commit.height
                    )));
                }
                last_commit.is_correct(validator_set).map_err(|err| {
                    InvalidBlock::new(format!("incorrect last commit: {:?}", err))
                })
            }
        }
    }

    fn store_vote(&self, vote: Vote, kind: VoteKind) -> Result<InsertOutcome, MessageRejection> {
        if vote.kind != kind {
            return Err(MessageRejection::MismatchedKind);
        }
        if !self.validator_set.contains(&vote.validator) {
            return Err(MessageRejection::UnknownValidator);
        }
        if !vote.is_correctly_self_signed() {
            return Err(MessageRejection::BadSignature);
        }

        Ok(self.store.insert_vote(vote))
    }

    /// Enter `round` and evaluate what was already stored for it.
    fn enter_round(&self, state: &mut ContextState, round: Round, actions: &mut Vec<Action>) {
        self.start_round(state, round, actions);
        self.evaluate_round(state, actions);
        self.try_decide(state, round, actions);
    }

    fn start_round(&self, state: &mut ContextState, round: Round, actions: &mut Vec<Action>) {
        state.round = round;
        state.step = Step::Propose;

        let proposer = self.validator_set.proposer(self.height(), round);
        let proposer_bytes = proposer.map(|proposer| proposer.to_bytes());
        Event::publish(
            &self.event_publisher,
            Event::StartRound(StartRoundEvent {
                timestamp: SystemTime::now(),
                height: self.height(),
                round,
                proposer: proposer_bytes.unwrap_or_default(),
            }),
        );

        if proposer_bytes == Some(self.config.keypair.public_bytes()) {
            actions.push(Action::Propose(round));
        } else {
            actions.push(Action::ArmTimeout(TimeoutKind::Propose, round));
        }
    }

    /// Skip to the highest round above the current one in which validators holding more than a
    /// third of the voting power have sent messages.
    fn skip_to_highest_active_round(&self, state: &mut ContextState, actions: &mut Vec<Action>) {
        if state.step == Step::EndCommit {
            return;
        }

        let skip_threshold = self.validator_set.skip_threshold();
        let target = self
            .store
            .rounds_above(state.round)
            .into_iter()
            .rev()
            .find(|round| self.store.snapshot(*round).sender_power(&self.validator_set) >= skip_threshold);

        if let Some(round) = target {
            log::debug!(
                "Skipping from round {} to round {} of height {}",
                state.round,
                round,
                self.height()
            );
            self.enter_round(state, round, actions);
        }
    }

    /// Evaluate the rules that concern the current round.
    fn evaluate_round(&self, state: &mut ContextState, actions: &mut Vec<Action>) {
        if state.step == Step::Default || state.step == Step::EndCommit {
            return;
        }

        let round = state.round;
        let messages = self.store.snapshot(round);
        let validator_set = &self.validator_set;

        if let Some(proposal) = messages.proposal() {
            let hash = proposal.block.hash;
            match proposal.propose.valid_round {
                None if state.step == Step::Propose => {
                    let vote_for_block = proposal.is_valid
                        && state
                            .locked
                            .as_ref()
                            .map_or(true, |locked| locked.block.hash == hash);
                    state.step = Step::PreVote;
                    actions.push(self.vote(round, vote_for_block.then_some(hash), VoteKind::PreVote));
                }
                Some(valid_round)
                    if state.step == Step::Propose
                        && valid_round < round
                        && self.store.snapshot(valid_round).has_quorum(
                            VoteKind::PreVote,
                            Tally::Block(hash),
                            validator_set,
                        ) =>
                {
                    let vote_for_block = proposal.is_valid
                        && state.locked.as_ref().map_or(true, |locked| {
                            locked.round <= valid_round || locked.block.hash == hash
                        });
                    state.step = Step::PreVote;
                    actions.push(self.vote(round, vote_for_block.then_some(hash), VoteKind::PreVote));
                }
                _ => (),
            }
        }

        if state.step == Step::PreVote
            && messages.has_quorum(VoteKind::PreVote, Tally::Any, validator_set)
            && first_time(&mut state.pre_vote_timeout_armed, round)
        {
            actions.push(Action::ArmTimeout(TimeoutKind::PreVote, round));
        }

        if let Some(proposal) = messages.proposal() {
            let hash = proposal.block.hash;
            if proposal.is_valid
                && state.step >= Step::PreVote
                && messages.has_quorum(VoteKind::PreVote, Tally::Block(hash), validator_set)
                && first_time(&mut state.polka_seen, round)
            {
                if state.step == Step::PreVote {
                    state.locked = Some(RoundValue {
                        block: proposal.block.clone(),
                        round,
                    });
                    state.step = Step::PreCommit;
                    actions.push(self.vote(round, Some(hash), VoteKind::PreCommit));
                    Event::publish(
                        &self.event_publisher,
                        Event::UpdateLock(UpdateLockEvent {
                            timestamp: SystemTime::now(),
                            height: self.height(),
                            round,
                            block: hash,
                        }),
                    );
                }
                state.valid = Some(RoundValue {
                    block: proposal.block.clone(),
                    round,
                });
                Event::publish(
                    &self.event_publisher,
                    Event::UpdateValid(UpdateValidEvent {
                        timestamp: SystemTime::now(),
                        height: self.height(),
                        round,
                        block: hash,
                    }),
                );
            }
        }

        if state.step == Step::PreVote
            && messages.has_quorum(VoteKind::PreVote, Tally::Nil, validator_set)
        {
            state.step = Step::PreCommit;
            actions.push(self.vote(round, None, VoteKind::PreCommit));
        }

        if messages.has_quorum(VoteKind::PreCommit, Tally::Any, validator_set)
            && first_time(&mut state.pre_commit_timeout_armed, round)
        {
            actions.push(Action::ArmTimeout(TimeoutKind::PreCommit, round));
        }
    }

    /// Decide the block proposed in `round` if it is valid and has a two-thirds PreCommit quorum.
    fn try_decide(&self, state: &mut ContextState, round: Round, actions: &mut Vec<Action>) {
        if state.step == Step::Default || state.step == Step::EndCommit {
            return;
        }

        let messages = self.store.snapshot(round);
        if let Some(proposal) = messages.proposal() {
            if proposal.is_valid
                && messages.has_quorum(
                    VoteKind::PreCommit,
                    Tally::Block(proposal.block.hash),
                    &self.validator_set,
                )
            {
                state.step = Step::EndCommit;
                state.committed_round = Some(round);
                actions.push(Action::Decide(Decision {
                    height: self.height(),
                    round,
                    block: proposal.block.clone(),
                }));
            }
        }
    }

    fn vote(&self, round: Round, block_hash: Option<CryptoHash>, kind: VoteKind) -> Action {
        Action::Broadcast(
            Vote::new(&self.config.keypair, self.height(), round, block_hash, kind).into(),
        )
    }

    fn on_timeout(&self, kind: TimeoutKind, round: Round) {
        if self.is_disposed() {
            return;
        }

        let actions = {
            let mut state = lock(&self.state);
            if state.round != round
                || state.step == Step::Default
                || state.step == Step::EndCommit
            {
                return;
            }

            let mut actions = Vec::new();
            match kind {
                TimeoutKind::Propose if state.step == Step::Propose => {
                    state.step = Step::PreVote;
                    actions.push(self.vote(round, None, VoteKind::PreVote));
                }
                TimeoutKind::PreVote if state.step == Step::PreVote => {
                    state.step = Step::PreCommit;
                    actions.push(self.vote(round, None, VoteKind::PreCommit));
                }
                TimeoutKind::PreCommit => {
                    self.enter_round(&mut state, round + 1, &mut actions);
                    self.skip_to_highest_active_round(&mut state, &mut actions);
                }
                _ => return,
            }
            actions
        };

        log::debug!(
            "{} timeout in round {} of height {}",
            kind,
            round,
            self.height()
        );
        Event::publish(
            &self.event_publisher,
            Event::Timeout(TimeoutEvent {
                timestamp: SystemTime::now(),
                height: self.height(),
                round,
                kind,
                timeout: self.config.timeouts.duration(kind, round),
            }),
        );
        self.execute(actions);
    }

    fn execute(&self, actions: Vec<Action>) {
        for action in actions {
            if self.is_disposed() {
                return;
            }

            match action {
                Action::Broadcast(message) => self.broadcast(message),
                Action::ArmTimeout(kind, round) => {
                    let duration = self.timeouts.schedule(kind, round);
                    log::trace!(
                        "Armed {} timeout of {:?} in round {} of height {}",
                        kind,
                        duration,
                        round,
                        self.height()
                    );
                }
                Action::Propose(round) => self.propose(round),
                Action::Decide(decision) => self.decide(decision),
            }
        }
    }

    /// Hand `message` to the broadcaster and deliver it to this context.
    fn broadcast(&self, message: ConsensusMessage) {
        let event = match &message {
            ConsensusMessage::Propose(propose) => Event::Propose(ProposeEvent {
                timestamp: SystemTime::now(),
                propose: propose.clone(),
            }),
            ConsensusMessage::PreVote(vote) | ConsensusMessage::PreCommit(vote) => {
                Event::Vote(VoteEvent {
                    timestamp: SystemTime::now(),
                    vote: vote.clone(),
                })
            }
        };
        Event::publish(&self.event_publisher, event);

        if let Err(error) = self.sender.broadcast(message.clone()) {
            log::warn!(
                "Failed to broadcast {} in round {} of height {}: {}",
                message.kind(),
                message.round(),
                self.height(),
                error
            );
            Event::publish(
                &self.event_publisher,
                Event::BroadcastFailed(BroadcastFailedEvent {
                    timestamp: SystemTime::now(),
                    height: self.height(),
                    round: message.round(),
                    kind: message.kind(),
                    error,
                }),
            );
        }

        if let HandleOutcome::Rejected(reason) = self.handle_message(message) {
            log::error!("Own message rejected: {}", reason);
        }
    }

    /// Build a proposal for `round` and broadcast it, unless the round or step changed meanwhile.
    fn propose(&self, round: Round) {
        let (valid, last_commit) = {
            let state = lock(&self.state);
            if state.round != round || state.step != Step::Propose {
                return;
            }
            (state.valid.clone(), state.last_commit.clone())
        };

        let (block, valid_round) = match valid {
            Some(valid) => (valid.block, Some(valid.round)),
            None => {
                let candidate = lock(&self.block_source).propose_candidate(ProposeCandidateRequest {
                    height: self.height(),
                    round,
                    last_commit: last_commit.as_ref(),
                });
                match candidate {
                    Ok(block) => (block, None),
                    Err(err) => {
                        log::error!(
                            "Block source failed in round {} of height {}: {}",
                            round,
                            self.height(),
                            err
                        );
                        Event::publish(
                            &self.event_publisher,
                            Event::CollaboratorFault(CollaboratorFaultEvent {
                                timestamp: SystemTime::now(),
                                height: self.height(),
                                fault: err.to_string(),
                            }),
                        );
                        self.sink
                            .report(self.height(), ContextFault::ProposeBlock(err));
                        self.timeouts.schedule(TimeoutKind::Propose, round);
                        return;
                    }
                }
            }
        };

        {
            let state = lock(&self.state);
            if self.is_disposed() || state.round != round || state.step != Step::Propose {
                log::debug!(
                    "Discarding proposal for round {} of height {}: round moved on",
                    round,
                    self.height()
                );
                return;
            }
        }

        let propose = Propose::new(&self.config.keypair, round, &block, valid_round);
        self.broadcast(propose.into());
    }

    fn decide(&self, decision: Decision) {
        self.timeouts.cancel();
        log::info!(
            "Decided block {} in round {} of height {}",
            decision.block.hash,
            decision.round,
            decision.height
        );
        Event::publish(
            &self.event_publisher,
            Event::Decide(DecideEvent {
                timestamp: SystemTime::now(),
                height: decision.height,
                round: decision.round,
                block: decision.block.hash,
            }),
        );
        self.sink.decide(decision);
    }
}

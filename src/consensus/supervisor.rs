/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The supervisor of the per-height [`Context`]s of a replica.
//!
//! [`ConsensusContext`] is a cheaply cloneable handle. All clones share one registry of contexts,
//! keyed by height and guarded by a single mutex, so the poller thread, the timeout threads, and the
//! library user may all call into it concurrently.
//!
//! ## Height lifecycle
//!
//! 1. [`new_height`](ConsensusContext::new_height) makes `h` the current height. It fetches the last
//!    commit of `h - 1`, disposes of every context below `h`, and starts the context of `h`
//!    (creating it if no message for `h` arrived yet).
//! 2. Messages for `h` or any later height are routed to the context of their height, which is
//!    created lazily. Messages below `h` are stale and dropped.
//! 3. When the context of `h` decides, the supervisor appends the block to the chain and, after a
//!    short delay, moves on to `h + 1`.

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError, Sender},
        Arc, Mutex, Weak,
    },
    thread,
    time::{Duration, SystemTime},
};

use crate::{
    block_source::BlockSource,
    chain::{AppendBlockError, Chain, ChainTip},
    events::{CollaboratorFaultEvent, CommitBlockEvent, Event},
    networking::sending::SenderHandle,
    storage::{
        last_commits::{LastCommitStore, LastCommitStoreError},
        pluggables::KVStore,
    },
    types::{
        crypto_primitives::Keypair,
        data_types::{Height, Round},
        validator_set::ValidatorSet,
    },
};

use super::{
    context::{Context, ContextConfiguration, ContextFault, DecisionSink, HandleOutcome},
    lock,
    messages::ConsensusMessage,
    timeouts::TimeoutConfiguration,
    types::{BlockCommit, ContextStatus, Decision, Step},
};

/// Parameters shared by every [`Context`] a [`ConsensusContext`] creates.
#[derive(Clone)]
pub struct SupervisorConfiguration {
    pub keypair: Keypair,
    pub timeouts: TimeoutConfiguration,
    /// How long to wait after the chain tip advances before starting the next height.
    pub new_height_delay: Duration,
    /// How many last commits to keep cached in the key-value store.
    pub last_commit_clear_threshold: usize,
}

/// Enumerates the ways the operations of [`ConsensusContext`] can fail.
#[derive(Debug)]
pub enum ConsensusContextError {
    /// `new_height` was called with the height that is already running.
    AlreadyRunning { height: Height },

    /// `new_height` was called with a height that does not directly follow the chain tip.
    NonContiguousHeight { height: Height, tip: Height },

    /// A message was received for a height below the current one.
    StaleMessage { height: Height, current: Height },

    /// The supervisor was disposed.
    Disposed,

    AppendBlock(AppendBlockError),

    LastCommitStore(LastCommitStoreError),
}

impl From<AppendBlockError> for ConsensusContextError {
    fn from(value: AppendBlockError) -> Self {
        ConsensusContextError::AppendBlock(value)
    }
}

impl From<LastCommitStoreError> for ConsensusContextError {
    fn from(value: LastCommitStoreError) -> Self {
        ConsensusContextError::LastCommitStore(value)
    }
}

impl Display for ConsensusContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusContextError::AlreadyRunning { height } => {
                write!(f, "height {} is already running", height)
            }
            ConsensusContextError::NonContiguousHeight { height, tip } => {
                write!(f, "height {} does not follow chain tip {}", height, tip)
            }
            ConsensusContextError::StaleMessage { height, current } => {
                write!(f, "message for height {} is stale at height {}", height, current)
            }
            ConsensusContextError::Disposed => write!(f, "consensus context is disposed"),
            ConsensusContextError::AppendBlock(err) => write!(f, "{}", err),
            ConsensusContextError::LastCommitStore(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ConsensusContextError {}

/// The delayed start scheduled by the latest tip change. Each scheduled start gets a new
/// generation, so that a start whose delay already elapsed cannot cancel a newer one.
#[derive(Default)]
struct PendingStart {
    generation: u64,
    cancel: Option<Sender<()>>,
}

struct Registry<B: BlockSource> {
    height: Option<Height>,
    contexts: BTreeMap<Height, Arc<Context<B>>>,
}

struct Shared<B: BlockSource, C: Chain, K: KVStore> {
    config: SupervisorConfiguration,
    registry: Mutex<Registry<B>>,
    new_height_lock: Mutex<()>,
    pending_start: Mutex<PendingStart>,
    chain: Mutex<C>,
    last_commits: Mutex<LastCommitStore<K>>,
    block_source: Arc<Mutex<B>>,
    sender: SenderHandle,
    event_publisher: Option<Sender<Event>>,
    disposed: AtomicBool,
}

/// Handle to the supervisor of a replica's per-height consensus contexts.
pub struct ConsensusContext<B: BlockSource, C: Chain, K: KVStore> {
    shared: Arc<Shared<B, C, K>>,
}

impl<B: BlockSource, C: Chain, K: KVStore> Clone for ConsensusContext<B, C, K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: BlockSource, C: Chain, K: KVStore> ConsensusContext<B, C, K> {
    /// Create a supervisor with no current height. Call [`new_height`](Self::new_height) to start
    /// consensus.
    pub fn new(
        config: SupervisorConfiguration,
        block_source: B,
        chain: C,
        kv_store: K,
        sender: SenderHandle,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                registry: Mutex::new(Registry {
                    height: None,
                    contexts: BTreeMap::new(),
                }),
                new_height_lock: Mutex::new(()),
                pending_start: Mutex::new(PendingStart::default()),
                chain: Mutex::new(chain),
                last_commits: Mutex::new(LastCommitStore::new(kv_store)),
                block_source: Arc::new(Mutex::new(block_source)),
                sender,
                event_publisher,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Make `height` the current height and start its context.
    ///
    /// `height` must directly follow the chain tip. Any delayed start scheduled by
    /// [`on_tip_changed`](Self::on_tip_changed) is cancelled.
    pub fn new_height(&self, height: Height) -> Result<(), ConsensusContextError> {
        self.start_height(height, None)
    }

    /// Start `height`. `origin` is the generation of the delayed start that calls this, or `None`
    /// for a direct call.
    fn start_height(
        &self,
        height: Height,
        origin: Option<u64>,
    ) -> Result<(), ConsensusContextError> {
        let _new_height_guard = lock(&self.shared.new_height_lock);
        self.cancel_pending_start(origin);

        if self.is_disposed() {
            return Err(ConsensusContextError::Disposed);
        }
        if lock(&self.shared.registry).height == Some(height) {
            return Err(ConsensusContextError::AlreadyRunning { height });
        }

        let (tip, (validator_set, previous_validator_set)) = {
            let chain = lock(&self.shared.chain);
            (chain.tip(), Self::validator_sets(&chain, height))
        };
        if height != tip.height + 1 {
            return Err(ConsensusContextError::NonContiguousHeight {
                height,
                tip: tip.height,
            });
        }

        let last_commit = self.last_commit_for(height)?;
        let pruned = lock(&self.shared.last_commits)
            .prune(height, self.shared.config.last_commit_clear_threshold)?;
        if !pruned.is_empty() {
            log::debug!("Pruned last commits of {} heights", pruned.len());
        }

        let context = {
            let mut registry = lock(&self.shared.registry);
            let running = registry.contexts.split_off(&height);
            let finished = std::mem::replace(&mut registry.contexts, running);
            for context in finished.values() {
                context.dispose();
            }

            registry.height = Some(height);
            Arc::clone(
                registry
                    .contexts
                    .entry(height)
                    .or_insert_with(|| {
                        self.create_context(height, validator_set, previous_validator_set)
                    }),
            )
        };

        log::info!("Starting height {}", height);
        context.start(last_commit);
        Ok(())
    }

    /// Route `message` to the context of its height, creating that context if needed.
    pub fn handle_message(
        &self,
        message: ConsensusMessage,
    ) -> Result<HandleOutcome, ConsensusContextError> {
        if self.is_disposed() {
            return Err(ConsensusContextError::Disposed);
        }

        let height = message.height();
        let existing = {
            let registry = lock(&self.shared.registry);
            Self::check_not_stale(&registry, height)?;
            registry.contexts.get(&height).cloned()
        };

        let context = match existing {
            Some(context) => context,
            None => {
                let (validator_set, previous_validator_set) =
                    Self::validator_sets(&lock(&self.shared.chain), height);
                let mut registry = lock(&self.shared.registry);
                Self::check_not_stale(&registry, height)?;
                Arc::clone(registry.contexts.entry(height).or_insert_with(|| {
                    self.create_context(height, validator_set, previous_validator_set)
                }))
            }
        };

        Ok(context.handle_message(message))
    }

    /// Append a decided block to the chain, then schedule the start of the next height.
    pub fn commit(&self, decision: Decision) -> Result<(), ConsensusContextError> {
        if self.is_disposed() {
            return Err(ConsensusContextError::Disposed);
        }

        let (old_tip, new_tip) = {
            let mut chain = lock(&self.shared.chain);
            let old_tip = chain.tip();
            chain.append(&decision.block)?;
            (old_tip, chain.tip())
        };

        log::info!(
            "Committed block {} at height {}",
            decision.block.hash,
            decision.height
        );
        Event::publish(
            &self.shared.event_publisher,
            Event::CommitBlock(CommitBlockEvent {
                timestamp: SystemTime::now(),
                height: decision.height,
                block: decision.block.hash,
            }),
        );

        self.on_tip_changed(old_tip, new_tip);
        Ok(())
    }

    /// React to the chain tip advancing from `old` to `new`, whether through [`commit`](Self::commit)
    /// or through an external sync. The height after the tip is started once the tip has stayed put
    /// for the configured new height delay; another tip change within the delay restarts the wait.
    pub fn on_tip_changed(&self, old: ChainTip, new: ChainTip) {
        if self.is_disposed() || new.height <= old.height {
            return;
        }

        let (cancel, cancelled) = mpsc::channel::<()>();
        let generation = {
            let mut pending = lock(&self.shared.pending_start);
            pending.generation += 1;
            // Replacing the sender drops the previous one, which cancels its pending start.
            pending.cancel = Some(cancel);
            pending.generation
        };

        let supervisor = self.clone();
        let delay = self.shared.config.new_height_delay;
        thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(delay) {
                supervisor.start_after_delay(generation);
            }
        });
    }

    /// Start the height after the current chain tip, on behalf of the delayed start `generation`.
    fn start_after_delay(&self, generation: u64) {
        let next = lock(&self.shared.chain).tip().height + 1;
        match self.start_height(next, Some(generation)) {
            Ok(()) | Err(ConsensusContextError::AlreadyRunning { .. }) => (),
            Err(err) => log::warn!("Failed to start height {}: {}", next, err),
        }
    }

    /// Dispose of every context and refuse all further work.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_pending_start(None);

        let mut registry = lock(&self.shared.registry);
        for context in registry.contexts.values() {
            context.dispose();
        }
        registry.contexts.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Get the current height, if [`new_height`](Self::new_height) was called.
    pub fn height(&self) -> Option<Height> {
        lock(&self.shared.registry).height
    }

    pub fn round(&self) -> Option<Round> {
        self.current_context().map(|context| context.round())
    }

    pub fn step(&self) -> Option<Step> {
        self.current_context().map(|context| context.step())
    }

    pub fn status(&self) -> Option<ContextStatus> {
        self.current_context().map(|context| context.status())
    }

    /// Get the context of `height`, if one exists.
    pub fn context(&self, height: Height) -> Option<Arc<Context<B>>> {
        lock(&self.shared.registry).contexts.get(&height).cloned()
    }

    /// Get the tip of the chain.
    pub fn chain_tip(&self) -> ChainTip {
        lock(&self.shared.chain).tip()
    }

    /// Get the validator set of `height` from the chain.
    pub fn validator_set(&self, height: Height) -> ValidatorSet {
        lock(&self.shared.chain).validator_set(height)
    }

    fn current_context(&self) -> Option<Arc<Context<B>>> {
        let registry = lock(&self.shared.registry);
        registry
            .height
            .and_then(|height| registry.contexts.get(&height).cloned())
    }

    fn check_not_stale(registry: &Registry<B>, height: Height) -> Result<(), ConsensusContextError> {
        match registry.height {
            Some(current) if height < current => {
                Err(ConsensusContextError::StaleMessage { height, current })
            }
            _ => Ok(()),
        }
    }

    /// Cancel the pending delayed start, unless `origin` names an older delayed start than the
    /// pending one.
    fn cancel_pending_start(&self, origin: Option<u64>) {
        let mut pending = lock(&self.shared.pending_start);
        if origin.map_or(true, |generation| generation == pending.generation) {
            pending.cancel = None;
        }
    }

    /// Get the validator sets of `height` and, unless it is genesis, of the height before it.
    fn validator_sets(chain: &C, height: Height) -> (ValidatorSet, Option<ValidatorSet>) {
        let previous_validator_set = height
            .prev()
            .filter(|previous| *previous > Height::new(0))
            .map(|previous| chain.validator_set(previous));
        (chain.validator_set(height), previous_validator_set)
    }

    /// Get the commit of `height - 1`, preferring the votes held by the previous height's context
    /// and caching them, and falling back to the cache otherwise.
    fn last_commit_for(
        &self,
        height: Height,
    ) -> Result<Option<BlockCommit>, ConsensusContextError> {
        let previous_height = match height.prev() {
            Some(previous_height) => previous_height,
            None => return Ok(None),
        };

        let from_context = self.context(previous_height).and_then(|context| {
            context
                .committed_round()
                .and_then(|round| context.vote_set(round))
        });

        let mut last_commits = lock(&self.shared.last_commits);
        match from_context {
            Some(commit) => {
                last_commits.put(&commit)?;
                Ok(Some(commit))
            }
            None => Ok(last_commits.get(previous_height)?),
        }
    }

    fn create_context(
        &self,
        height: Height,
        validator_set: ValidatorSet,
        previous_validator_set: Option<ValidatorSet>,
    ) -> Arc<Context<B>> {
        log::debug!("Creating context of height {}", height);
        Context::new(
            ContextConfiguration {
                keypair: self.shared.config.keypair.clone(),
                height,
                timeouts: self.shared.config.timeouts,
                previous_validator_set,
            },
            validator_set,
            Arc::clone(&self.shared.block_source),
            self.shared.sender.clone(),
            Arc::new(SupervisorLink {
                shared: Arc::downgrade(&self.shared),
            }),
            self.shared.event_publisher.clone(),
        )
    }
}

/// The [`DecisionSink`] handed to every context, linking it back to its supervisor without keeping
/// the supervisor alive.
struct SupervisorLink<B: BlockSource, C: Chain, K: KVStore> {
    shared: Weak<Shared<B, C, K>>,
}

impl<B: BlockSource, C: Chain, K: KVStore> DecisionSink for SupervisorLink<B, C, K> {
    fn decide(&self, decision: Decision) {
        if let Some(shared) = self.shared.upgrade() {
            let height = decision.height;
            let event_publisher = shared.event_publisher.clone();
            if let Err(err) = (ConsensusContext { shared }).commit(decision) {
                log::error!("Failed to commit block of height {}: {}", height, err);
                Event::publish(
                    &event_publisher,
                    Event::CollaboratorFault(CollaboratorFaultEvent {
                        timestamp: SystemTime::now(),
                        height,
                        fault: err.to_string(),
                    }),
                );
            }
        }
    }

    fn report(&self, height: Height, fault: ContextFault) {
        log::warn!("Context of height {} reported: {}", height, fault);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use ed25519_dalek::SigningKey;

    use crate::{
        block_source::{InvalidBlock, ProposeBlockError, ProposeCandidateRequest},
        storage::last_commits::tests::MapStore,
        types::{
            block::Block,
            data_types::{CryptoHash, Power},
        },
    };

    use super::*;

    /// A chain that only tracks its height.
    #[derive(Clone)]
    struct HeightChain {
        height: Arc<Mutex<u64>>,
        validator_set: ValidatorSet,
    }

    impl HeightChain {
        fn advance(&self) -> (ChainTip, ChainTip) {
            let old = self.tip();
            *self.height.lock().unwrap() += 1;
            (old, self.tip())
        }
    }

    impl Chain for HeightChain {
        fn append(&mut self, _: &Block) -> Result<(), AppendBlockError> {
            *self.height.lock().unwrap() += 1;
            Ok(())
        }

        fn tip(&self) -> ChainTip {
            ChainTip {
                height: Height::new(*self.height.lock().unwrap()),
                hash: CryptoHash::nil(),
            }
        }

        fn validator_set(&self, _: Height) -> ValidatorSet {
            self.validator_set.clone()
        }
    }

    struct NoBlocks;

    impl BlockSource for NoBlocks {
        fn propose_candidate(
            &mut self,
            _: ProposeCandidateRequest,
        ) -> Result<Block, ProposeBlockError> {
            Err(ProposeBlockError::new("no blocks"))
        }

        fn validate(&mut self, _: &Block) -> Result<(), InvalidBlock> {
            Err(InvalidBlock::new("no blocks"))
        }
    }

    #[test]
    fn elapsed_delayed_start_keeps_the_newer_one() {
        let keypair = Keypair::new(SigningKey::from_bytes(&[5u8; 32]));
        let mut validator_set = ValidatorSet::new();
        validator_set.put(&keypair.public(), Power::new(1));
        let chain = HeightChain {
            height: Arc::new(Mutex::new(0)),
            validator_set,
        };
        let (sender, _outbox) = SenderHandle::new(64);
        let supervisor = ConsensusContext::new(
            SupervisorConfiguration {
                keypair,
                timeouts: TimeoutConfiguration::builder()
                    .propose_base(Duration::from_secs(30))
                    .pre_vote_base(Duration::from_secs(30))
                    .pre_commit_base(Duration::from_secs(30))
                    .build(),
                new_height_delay: Duration::from_millis(300),
                last_commit_clear_threshold: 30,
            },
            NoBlocks,
            chain.clone(),
            MapStore::default(),
            sender,
            None,
        );

        let (old, new) = chain.advance();
        supervisor.on_tip_changed(old, new);
        let (old, new) = chain.advance();
        supervisor.on_tip_changed(old, new);

        // The first delayed start read tip 1 before the second tip change, and only gets to
        // start its height now.
        assert!(matches!(
            supervisor.start_height(Height::new(2), Some(1)),
            Err(ConsensusContextError::NonContiguousHeight { .. })
        ));
        assert_eq!(supervisor.height(), None);

        let deadline = Instant::now() + Duration::from_secs(5);
        while supervisor.height() != Some(Height::new(3)) {
            assert!(Instant::now() < deadline, "height 3 was never started");
            thread::sleep(Duration::from_millis(1));
        }
        supervisor.dispose();
    }
}

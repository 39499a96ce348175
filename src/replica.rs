/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica.
//!
//! A replica is a process that takes part in consensus as one validator of the validator set. Each
//! replica is uniquely identified by an [Ed25519 public key](ed25519_dalek::VerifyingKey).
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - [The type](Replica) which keeps the replica alive.
//!
//! ## Starting a replica
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .block_source(block_source)
//!     .chain(chain)
//!     .kv_store(kv_store)
//!     .network(network)
//!     .configuration(configuration)
//!     .on_commit_block(commit_handler)
//!     .build()
//!     .start()
//! ```
//!
//! ### Required setters
//!
//! The required setters are for providing the trait implementations required to run a replica:
//! - `.block_source(...)`
//! - `.chain(...)`
//! - `.kv_store(...)`
//! - `.network(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from [crate::events]:
//! - `.on_start_height(...)`
//! - `.on_start_round(...)`
//! - `.on_decide(...)`
//! - `.on_commit_block(...)`
//! - `.on_update_lock(...)`
//! - `.on_update_valid(...)`
//! - `.on_propose(...)`
//! - `.on_vote(...)`
//! - `.on_broadcast_failed(...)`
//! - `.on_receive_message(...)`
//! - `.on_reject_message(...)`
//! - `.on_timeout(...)`
//! - `.on_collaborator_fault(...)`
//!
//! The replica's [configuration](Configuration) can also be defined using the builder pattern, for example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(keypair)
//!     .timeouts(TimeoutConfiguration::default())
//!     .new_height_delay(Duration::from_millis(100))
//!     .log_events(true)
//!     .build()
//! ```

use std::{
    sync::mpsc::{self, Sender},
    thread::JoinHandle,
    time::Duration,
};

use ed25519_dalek::SigningKey;
use typed_builder::TypedBuilder;

use crate::{
    block_source::BlockSource,
    chain::{Chain, ChainTip},
    consensus::{
        supervisor::{ConsensusContext, ConsensusContextError, SupervisorConfiguration},
        timeouts::TimeoutConfiguration,
        types::ContextStatus,
    },
    event_bus::*,
    events::*,
    networking::{network::Network, receiving::start_polling, sending::*},
    storage::pluggables::KVStore,
    types::{crypto_primitives::Keypair, data_types::Height},
};

/// Stores the user-defined parameters required to start the replica, that is:
/// 1. The replica's [keypair](ed25519_dalek::SigningKey).
/// 2. The durations of the round [timeouts](TimeoutConfiguration).
/// 3. The new height delay: how long the chain tip must stay put before the next height starts.
/// 4. How many last commits to keep cached in the key-value store.
/// 5. The capacity of the broadcast queue.
/// 6. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Log Events
///
/// This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.log_events(...)`

    Optional:
    - `.timeouts(...)`
    - `.new_height_delay(...)`
    - `.last_commit_clear_threshold(...)`
    - `.broadcast_queue_capacity(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the replica's keypair, used to sign messages. Required."))]
    pub me: SigningKey,
    #[builder(default, setter(doc = "Set the base durations and increments of the round timeouts. Defaults to a 5 second base and a 1 second increment."))]
    pub timeouts: TimeoutConfiguration,
    #[builder(default = Duration::from_millis(10), setter(doc = "Set how long the chain tip must stay put before the next height starts. Defaults to 10 milliseconds."))]
    pub new_height_delay: Duration,
    #[builder(default = 30, setter(doc = "Set how many last commits to keep cached in the key-value store. Defaults to 30."))]
    pub last_commit_clear_threshold: usize,
    #[builder(default = 1024, setter(doc = "Set how many outgoing messages may wait for the broadcaster before new ones are dropped. Defaults to 1024."))]
    pub broadcast_queue_capacity: usize,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl From<Configuration> for SupervisorConfiguration {
    fn from(configuration: Configuration) -> Self {
        SupervisorConfiguration {
            keypair: Keypair::new(configuration.me),
            timeouts: configuration.timeouts,
            new_height_delay: configuration.new_height_delay,
            last_commit_clear_threshold: configuration.last_commit_clear_threshold,
        }
    }
}

#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.block_source(...)`
    - `.chain(...)`
    - `.kv_store(...)`
    - `.network(...)`
    - `.configuration(...)`

    Optional:
    - `.on_start_height(...)`
    - `.on_start_round(...)`
    - `.on_decide(...)`
    - `.on_commit_block(...)`
    - `.on_update_lock(...)`
    - `.on_update_valid(...)`
    - `.on_propose(...)`
    - `.on_vote(...)`
    - `.on_broadcast_failed(...)`
    - `.on_receive_message(...)`
    - `.on_reject_message(...)`
    - `.on_timeout(...)`
    - `.on_collaborator_fault(...)`
"))]
pub struct ReplicaSpec<B: BlockSource, C: Chain, K: KVStore, N: Network + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the producer and validator of block contents. The argument must implement the [BlockSource](crate::block_source::BlockSource) trait. Required."))]
    block_source: B,
    #[builder(setter(doc = "Set the chain that decided blocks are appended to. The argument must implement the [Chain](crate::chain::Chain) trait. Required."))]
    chain: C,
    #[builder(setter(doc = "Set the implementation of the replica's Key-Value store. The argument must implement the [KVStore](crate::storage::pluggables::KVStore) trait. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&StartHeightEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartHeightEvent>),
    doc = "Register a handler closure to be invoked after the replica starts running consensus on a height. Optional."))]
    on_start_height: Option<HandlerPtr<StartHeightEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRoundEvent>),
    doc = "Register a handler closure to be invoked after the replica enters a new round. Optional."))]
    on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DecideEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DecideEvent>),
    doc = "Register a handler closure to be invoked after the replica decides a block. Optional."))]
    on_decide: Option<HandlerPtr<DecideEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a decided block is appended to the chain. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateLockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateLockEvent>),
    doc = "Register a handler closure to be invoked after the replica locks on a block. Optional."))]
    on_update_lock: Option<HandlerPtr<UpdateLockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateValidEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateValidEvent>),
    doc = "Register a handler closure to be invoked after the replica updates its valid value. Optional."))]
    on_update_valid: Option<HandlerPtr<UpdateValidEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a proposal. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VoteEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a PreVote or a PreCommit. Optional."))]
    on_vote: Option<HandlerPtr<VoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BroadcastFailedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BroadcastFailedEvent>),
    doc = "Register a handler closure to be invoked after an outgoing message is dropped. Optional."))]
    on_broadcast_failed: Option<HandlerPtr<BroadcastFailedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveMessageEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveMessageEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a message from the network. Optional."))]
    on_receive_message: Option<HandlerPtr<ReceiveMessageEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectMessageEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectMessageEvent>),
    doc = "Register a handler closure to be invoked after the replica rejects a message. Optional."))]
    on_reject_message: Option<HandlerPtr<RejectMessageEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TimeoutEvent>),
    doc = "Register a handler closure to be invoked after a round timeout expires. Optional."))]
    on_timeout: Option<HandlerPtr<TimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CollaboratorFaultEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CollaboratorFaultEvent>),
    doc = "Register a handler closure to be invoked after the block source or the chain fails. Optional."))]
    on_collaborator_fault: Option<HandlerPtr<CollaboratorFaultEvent>>,
}

impl<B: BlockSource, C: Chain, K: KVStore, N: Network + 'static> ReplicaSpec<B, C, K, N> {
    /// Starts all threads and channels associated with running a replica, and returns the handles to them in a [Replica] struct.
    pub fn start(mut self) -> Result<Replica<B, C, K>, ConsensusContextError> {
        let tip = self.chain.tip();
        self.network
            .init_validator_set(self.chain.validator_set(tip.height + 1));

        let log_events = self.configuration.log_events;
        let broadcast_queue_capacity = self.configuration.broadcast_queue_capacity;

        let event_handlers = EventHandlers::new(
            log_events,
            self.on_start_height,
            self.on_start_round,
            self.on_decide,
            self.on_commit_block,
            self.on_update_lock,
            self.on_update_valid,
            self.on_propose,
            self.on_vote,
            self.on_broadcast_failed,
            self.on_receive_message,
            self.on_reject_message,
            self.on_timeout,
            self.on_collaborator_fault,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(
                    event_handlers,
                    event_subscriber,
                    event_bus_shutdown_receiver,
                );
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        let (sender, outbox) = SenderHandle::new(broadcast_queue_capacity);
        let (broadcaster_shutdown, broadcaster_shutdown_receiver) = mpsc::channel();
        let broadcaster = start_broadcasting(
            self.network.clone(),
            outbox,
            broadcaster_shutdown_receiver,
        );

        let consensus_context = ConsensusContext::new(
            self.configuration.into(),
            self.block_source,
            self.chain,
            self.kv_store,
            sender,
            event_publisher.clone(),
        );

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(
            self.network,
            consensus_context.clone(),
            event_publisher,
            poller_shutdown_receiver,
        );

        let replica = Replica {
            consensus_context,
            poller: Some(poller),
            poller_shutdown,
            broadcaster: Some(broadcaster),
            broadcaster_shutdown,
            event_bus,
            event_bus_shutdown,
        };

        replica.consensus_context.new_height(tip.height + 1)?;
        Ok(replica)
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background threads are
/// gracefully shut down.
pub struct Replica<B: BlockSource, C: Chain, K: KVStore> {
    consensus_context: ConsensusContext<B, C, K>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    broadcaster: Option<JoinHandle<()>>,
    broadcaster_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<B: BlockSource, C: Chain, K: KVStore> Replica<B, C, K> {
    /// Get the [`ConsensusContext`] that supervises this replica's consensus.
    pub fn consensus_context(&self) -> &ConsensusContext<B, C, K> {
        &self.consensus_context
    }

    /// Get the height this replica is running consensus on.
    pub fn height(&self) -> Option<Height> {
        self.consensus_context.height()
    }

    pub fn status(&self) -> Option<ContextStatus> {
        self.consensus_context.status()
    }

    pub fn chain_tip(&self) -> ChainTip {
        self.consensus_context.chain_tip()
    }

    /// Tell the replica that its chain's tip was moved from `old` to `new` by something other than
    /// consensus, for example block sync.
    pub fn tip_changed(&self, old: ChainTip, new: ChainTip) {
        self.consensus_context.on_tip_changed(old, new)
    }
}

impl<B: BlockSource, C: Chain, K: KVStore> Drop for Replica<B, C, K> {
    fn drop(&mut self) {
        // The poller feeds the consensus context, which feeds the broadcaster and the event bus, so
        // threads are stopped in that order.
        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }

        self.consensus_context.dispose();

        let _ = self.broadcaster_shutdown.send(());
        if let Some(broadcaster) = self.broadcaster.take() {
            let _ = broadcaster.join();
        }

        if let Some(event_bus_shutdown) = &self.event_bus_shutdown {
            let _ = event_bus_shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }
    }
}

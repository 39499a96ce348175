/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) published by consensus and invokes
//! the registered handlers for them.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{events::*, logging::Logger};

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Collect the handlers of one event type: the default logger if `log_events` is set, followed by
/// the user-defined handler, if any.
fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = user_handler {
        handlers.push(handler);
    }
    handlers
}

pub(crate) struct EventHandlers {
    pub(crate) start_height_handlers: Vec<HandlerPtr<StartHeightEvent>>,
    pub(crate) start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub(crate) decide_handlers: Vec<HandlerPtr<DecideEvent>>,
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub(crate) update_lock_handlers: Vec<HandlerPtr<UpdateLockEvent>>,
    pub(crate) update_valid_handlers: Vec<HandlerPtr<UpdateValidEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) vote_handlers: Vec<HandlerPtr<VoteEvent>>,
    pub(crate) broadcast_failed_handlers: Vec<HandlerPtr<BroadcastFailedEvent>>,
    pub(crate) receive_message_handlers: Vec<HandlerPtr<ReceiveMessageEvent>>,
    pub(crate) reject_message_handlers: Vec<HandlerPtr<RejectMessageEvent>>,
    pub(crate) timeout_handlers: Vec<HandlerPtr<TimeoutEvent>>,
    pub(crate) collaborator_fault_handlers: Vec<HandlerPtr<CollaboratorFaultEvent>>,
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        start_height_handler: Option<HandlerPtr<StartHeightEvent>>,
        start_round_handler: Option<HandlerPtr<StartRoundEvent>>,
        decide_handler: Option<HandlerPtr<DecideEvent>>,
        commit_block_handler: Option<HandlerPtr<CommitBlockEvent>>,
        update_lock_handler: Option<HandlerPtr<UpdateLockEvent>>,
        update_valid_handler: Option<HandlerPtr<UpdateValidEvent>>,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        vote_handler: Option<HandlerPtr<VoteEvent>>,
        broadcast_failed_handler: Option<HandlerPtr<BroadcastFailedEvent>>,
        receive_message_handler: Option<HandlerPtr<ReceiveMessageEvent>>,
        reject_message_handler: Option<HandlerPtr<RejectMessageEvent>>,
        timeout_handler: Option<HandlerPtr<TimeoutEvent>>,
        collaborator_fault_handler: Option<HandlerPtr<CollaboratorFaultEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            start_height_handlers: handlers(log_events, start_height_handler),
            start_round_handlers: handlers(log_events, start_round_handler),
            decide_handlers: handlers(log_events, decide_handler),
            commit_block_handlers: handlers(log_events, commit_block_handler),
            update_lock_handlers: handlers(log_events, update_lock_handler),
            update_valid_handlers: handlers(log_events, update_valid_handler),
            propose_handlers: handlers(log_events, propose_handler),
            vote_handlers: handlers(log_events, vote_handler),
            broadcast_failed_handlers: handlers(log_events, broadcast_failed_handler),
            receive_message_handlers: handlers(log_events, receive_message_handler),
            reject_message_handlers: handlers(log_events, reject_message_handler),
            timeout_handlers: handlers(log_events, timeout_handler),
            collaborator_fault_handlers: handlers(log_events, collaborator_fault_handler),
        }
    }

    /// Check whether no handler at all is registered, in which case events need not be published.
    pub(crate) fn is_empty(&self) -> bool {
        self.start_height_handlers.is_empty()
            && self.start_round_handlers.is_empty()
            && self.decide_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
            && self.update_lock_handlers.is_empty()
            && self.update_valid_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.broadcast_failed_handlers.is_empty()
            && self.receive_message_handlers.is_empty()
            && self.reject_message_handlers.is_empty()
            && self.timeout_handlers.is_empty()
            && self.collaborator_fault_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::StartHeight(start_height_event) => self
                .start_height_handlers
                .iter()
                .for_each(|handler| handler(&start_height_event)),

            Event::StartRound(start_round_event) => self
                .start_round_handlers
                .iter()
                .for_each(|handler| handler(&start_round_event)),

            Event::Decide(decide_event) => self
                .decide_handlers
                .iter()
                .for_each(|handler| handler(&decide_event)),

            Event::CommitBlock(commit_block_event) => self
                .commit_block_handlers
                .iter()
                .for_each(|handler| handler(&commit_block_event)),

            Event::UpdateLock(update_lock_event) => self
                .update_lock_handlers
                .iter()
                .for_each(|handler| handler(&update_lock_event)),

            Event::UpdateValid(update_valid_event) => self
                .update_valid_handlers
                .iter()
                .for_each(|handler| handler(&update_valid_event)),

            Event::Propose(propose_event) => self
                .propose_handlers
                .iter()
                .for_each(|handler| handler(&propose_event)),

            Event::Vote(vote_event) => self
                .vote_handlers
                .iter()
                .for_each(|handler| handler(&vote_event)),

            Event::BroadcastFailed(broadcast_failed_event) => self
                .broadcast_failed_handlers
                .iter()
                .for_each(|handler| handler(&broadcast_failed_event)),

            Event::ReceiveMessage(receive_message_event) => self
                .receive_message_handlers
                .iter()
                .for_each(|handler| handler(&receive_message_event)),

            Event::RejectMessage(reject_message_event) => self
                .reject_message_handlers
                .iter()
                .for_each(|handler| handler(&reject_message_event)),

            Event::Timeout(timeout_event) => self
                .timeout_handlers
                .iter()
                .for_each(|handler| handler(&timeout_event)),

            Event::CollaboratorFault(collaborator_fault_event) => self
                .collaborator_fault_handlers
                .iter()
                .for_each(|handler| handler(&collaborator_fault_event)),
        }
    }
}

/// Spawn the event bus thread, which fires the handlers of every event received from
/// `event_subscriber` until it receives a shutdown signal or every publisher is dropped.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(Duration::from_millis(10)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

pub(crate) mod keys;

pub(crate) mod logging;

pub(crate) mod mem_db;

pub(crate) mod network;

pub(crate) mod number_chain;

pub(crate) mod recording_sink;

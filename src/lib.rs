//! A peer-to-peer, append-only, conflict-free operation log store built on
//! a content-addressed block service and a pubsub-capable peer network.
//!
//! Each [`store`] is a named, identity-signed, hash-linked [`log::Log`]
//! whose entries are application [`operation::Operation`]s. Peers replicate
//! opportunistically: they exchange log heads, fetch missing ancestors
//! through a bounded-concurrency [`replicator::Replicator`], and converge
//! by merging partially ordered logs via a Lamport-clock total order. A
//! [`index::Index`] materializes an application-visible view — a
//! key→value map for [`store::KvStore`], an ordered event list for
//! [`store::EventLogStore`] — from the log.
//!
//! The block/DAG service, file layer, pubsub transport, identity
//! keystores, and access-control policy are narrow collaborators this
//! crate consumes through the [`block::BlockStore`], [`file::FileLayer`],
//! [`identity::IdentityProvider`], and [`access::AccessController`] traits;
//! in-memory implementations of each are provided for tests and for
//! embedding this crate without a real node.

#![allow(dead_code)]

pub mod access;
pub mod block;
pub mod cache;
pub mod entry;
pub mod error;
pub mod file;
mod gset;
pub mod identity;
pub mod index;
mod lamport_clock;
pub mod log;
pub mod operation;
pub mod registry;
pub mod replicator;
pub mod store;
mod util;

pub use entry::LogEntry;
pub use error::{Result, StoreError};
pub use lamport_clock::LamportClock;
pub use log::{Log, LogOptions};
pub use operation::Operation;
pub use registry::StoreRegistry;
pub use store::{BaseStore, Event, ReplicationInfo, StoreHandle, StoreOptions, SubscriberId};

//! This module exports a minimal message-passing API, which is encapsulated
//! by a `Communicator` trait. Implementors only need to write `send` and
//! `recv` operations for a given transport layer; an in-process channel
//! transport and a pure-Rust TCP transport are included. The trait then
//! provides default implementations for broadcast, reduce, and all-reduce.
//!
//! Every message carries a [`comm::Tag`]. Receives name the tag they expect,
//! and the [`mailbox::Mailbox`] holds back anything that arrives early, so
//! setup collectives and per-tick halo traffic can never be confused.
//!

mod backoff;
pub mod channel;
pub mod comm;
pub mod mailbox;
pub mod tcp;
pub mod util;

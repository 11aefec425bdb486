//! JSON-RPC envelopes and the default Model Context Protocol processor
//!
//! `rpc` is transport-independent envelope validation; `server` is the processor
//! used when no other backend is plugged in.

pub mod rpc;
pub mod server;

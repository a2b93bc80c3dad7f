//! Testing infrastructure: a scripted mock exchange plus in-memory
//! credential and strategy stores.
//!
//! Used by the unit and integration tests and by the demo binary's paper
//! mode, so the whole pipeline can run without touching a real exchange.

pub mod mock_exchange;

pub use mock_exchange::{
    MemoryCredentialStore, MemoryStrategyStore, MockClientFactory, MockExchangeClient,
    ScriptedEvaluator, ScriptedOutcome,
};

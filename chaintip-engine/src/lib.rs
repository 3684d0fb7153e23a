//! Multi-chain transfer orchestration engine.
//!
//! The engine takes validated transfer intents from a business layer (a
//! tipping bot, a payout service), splits them into bounded batches, and
//! dispatches them through per-platform adapters — account-model chains
//! with nonce pipelining, UTXO chains with one transaction per batch, and
//! ledger chains with native multi-send. Results come back asynchronously
//! through a typed event bus, and a liveness monitor watches every queue
//! for stalled work.

pub mod audit;
pub mod config;
pub mod error;
pub mod events;
pub mod fee;
pub mod mocks;
pub mod monitor;
pub mod node;
pub mod orchestrator;
pub mod platform;
pub mod queue;
pub mod registry;
pub mod types;

pub use config::EngineConfig;
pub use error::{EngineError, RegistryError};
pub use events::{EventBus, EventSubscriber, TransferEvent};
pub use orchestrator::TransferOrchestrator;
pub use registry::CoinRegistry;
pub use types::{Batch, DestinationItem, RoutingContext, SourceWallet, TransferIntent};

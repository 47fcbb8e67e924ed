//! Library root for the `collection_gateway` crate
//! HTTP gateway submitting collection items to a ledger node and reading them back

// Core error handling
pub mod api_errors;
pub mod errors;

// Ledger model and node bindings
pub mod identifiers;
pub mod ledger;
pub mod ledger_memory;
pub mod ledger_node;
pub mod runtime_metadata;

// Submission, classification and LOC resolution
pub mod error_classifier;
pub mod loc_resolver;
pub mod signer;
pub mod tx_tracker;

// Orchestration
pub mod gateway;

// Web server interface
pub mod app_state;
pub mod web;

// Configuration & CLI
pub mod cli;
pub mod config;

#[cfg(test)]
mod tests {
    pub mod gateway_scenarios;
    pub mod test_utils;
}

pub use errors::{GatewayError, GatewayResult};
pub use gateway::{AddItemRequest, CollectionGateway, CollectionItemView, GetItemRequest};
pub use tx_tracker::{TxOutcome, TxSubmissionTracker};

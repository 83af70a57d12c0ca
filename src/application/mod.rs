//! Application layer orchestrating payment settlement.
//!
//! `PaymentCoordinator` is the entry point for one payment attempt; it owns
//! at most one `ConfirmationPoller` per bill and finalizes outcomes onto the
//! settlement event bus.

pub mod coordinator;
pub mod poller;

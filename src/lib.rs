//! Conversation state and streaming reply engine for chat front ends.
//!
//! [`ConversationRegistry`] and [`MessageLedger`] hold the client-side
//! state; [`ChatSession`] is the composer's entry point; a spawned
//! [`ResponseCoordinator`] answers each send with one reply cycle drawn from
//! a [`ResponseSource`].

pub mod config;
pub mod error;
pub mod models;
pub mod providers;
pub mod services;

pub use error::ChatError;
pub use providers::ResponseSource;
pub use services::{
    ChatSession, ConversationRegistry, CoordinatorHandle, CoordinatorSettings, CyclePhase,
    MessageLedger, ResponseCoordinator, ResponseStatus,
};

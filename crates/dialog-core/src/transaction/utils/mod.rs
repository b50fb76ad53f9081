//! Helpers shared by the transaction machines

pub mod request_builders;

pub use request_builders::{create_ack_for_2xx, create_cancel, create_error_ack, create_trying};

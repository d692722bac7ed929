//! Shared protocol definitions for the Marketchat wire format.

pub mod frame;
pub mod message;

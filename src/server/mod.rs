//! Inbound TCP listener.

pub mod listener;

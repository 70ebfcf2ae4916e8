//! # Transport Module
//!
//! Send/subscribe primitive over the cellular uplink.
//!
//! This module handles:
//! - Outbound topics used by the tracker
//! - The `Transport` trait seam consumed by the engine and dispatcher
//! - The cloud-socket implementation used on the field unit

pub mod cloud;

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

use crate::error::Result;

pub use cloud::CloudTransport;

/// Outbound message topics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    /// Position reports and on-demand refresh replies
    Gps,

    /// File-tail replies and truck id acknowledgements
    Tail,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Gps => "gps",
            Topic::Tail => "tail",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for uplink operations
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one payload on `topic`; bounded by the implementation's timeout, never retried
    async fn send(&self, payload: &[u8], topic: Topic) -> Result<()>;

    /// Start receiving inbound messages
    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<u8>>>;
}

//! Shared value types for the AngleStream workspace.
//!
//! - [`StateSnapshot`] – an owned copy of the joint-angle state taken by the
//!   server at one instant.
//! - [`Frame`] – one wire line as seen by a consumer.
//! - [`StreamError`] – the workspace-wide error type.
//! - [`wire`] – the line-oriented text codec shared by server and client.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod wire;

/// Three rotation components in degrees, in `x, y, z` order.
pub type Angles = [f64; 3];

/// Default TCP host the server binds to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default TCP port the server binds to.
pub const DEFAULT_PORT: u16 = 5001;

/// Immutable copy of every joint's angles at one instant.
///
/// The key list is shared with the store that produced it (it never changes
/// after construction); the values are owned, so a writer replacing the live
/// state cannot affect a snapshot that is being serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    keys: Arc<[String]>,
    values: Vec<Angles>,
}

impl StateSnapshot {
    /// Build a snapshot from a key list and one value per key, in key order.
    ///
    /// # Panics
    ///
    /// Panics when `keys` and `values` differ in length.
    pub fn from_parts(keys: Arc<[String]>, values: Vec<Angles>) -> Self {
        assert_eq!(
            keys.len(),
            values.len(),
            "snapshot needs exactly one value per joint key"
        );
        Self { keys, values }
    }

    /// Joint keys in declaration order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Number of joints in the snapshot.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Angles for `key`, or `None` for an undeclared joint.
    pub fn get(&self, key: &str) -> Option<Angles> {
        self.keys
            .iter()
            .position(|k| k == key)
            .map(|idx| self.values[idx])
    }

    /// Iterate `(key, angles)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Angles)> + '_ {
        self.keys
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

/// One joint entry of a received [`Frame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointAngle {
    pub key: String,
    /// `[x, y, z]` in degrees.
    pub angles: Angles,
}

/// A parsed wire line: the sender's session time plus every joint in wire
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Seconds since the sending session started.
    pub t: f64,
    pub joints: Vec<JointAngle>,
}

impl Frame {
    /// Angles for `key`, or `None` when the frame does not carry that joint.
    pub fn get(&self, key: &str) -> Option<Angles> {
        self.joints
            .iter()
            .find(|j| j.key == key)
            .map(|j| j.angles)
    }
}

/// Workspace-wide error type covering producer validation, socket failures
/// and consumer-side parsing.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamError {
    /// The producer supplied the wrong key set, wrong arity, or a
    /// non-finite value. The stored state is untouched.
    #[error("Validation Error: {0}")]
    Validation(String),

    /// The listening socket could not be acquired.
    #[error("Bind Error on {addr}: {details}")]
    Bind { addr: String, details: String },

    /// A single connection failed (reset, broken pipe, refused, timeout).
    #[error("Connection Error with {peer}: {details}")]
    Connection { peer: String, details: String },

    /// A wire line did not match the grammar.
    #[error("Malformed Line: {0}")]
    Parse(String),

    /// Invalid server or CLI configuration.
    #[error("Configuration Error: {0}")]
    Config(String),
}

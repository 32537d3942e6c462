//! Stream key validation
//!
//! A broadcaster join awaits the validator before the room is touched. The
//! validator may be slow (it can call out to an auth service) and may fail;
//! a failure is treated the same as a rejected key.

use std::collections::HashSet;

use async_trait::async_trait;
use regex::Regex;

use crate::types::StreamKey;

/// Decides whether a broadcaster may publish on a stream key
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamKeyValidator: Send + Sync {
    /// `Ok(false)` rejects the key. An `Err` is logged and also rejects.
    async fn validate(&self, stream_key: &StreamKey) -> anyhow::Result<bool>;
}

/// Accepts every key that passed the shape check
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllValidator;

#[async_trait]
impl StreamKeyValidator for AllowAllValidator {
    async fn validate(&self, _stream_key: &StreamKey) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Accepts only keys from a fixed list
#[derive(Debug, Clone, Default)]
pub struct StaticKeyValidator {
    keys: HashSet<String>,
}

impl StaticKeyValidator {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl StreamKeyValidator for StaticKeyValidator {
    async fn validate(&self, stream_key: &StreamKey) -> anyhow::Result<bool> {
        Ok(self.keys.contains(stream_key.as_str()))
    }
}

/// Accepts keys matching a regular expression
#[derive(Debug, Clone)]
pub struct PatternValidator {
    pattern: Regex,
}

impl PatternValidator {
    /// The pattern is anchored at both ends
    pub fn new(pattern: &str) -> anyhow::Result<Self> {
        let pattern = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(Self { pattern })
    }
}

#[async_trait]
impl StreamKeyValidator for PatternValidator {
    async fn validate(&self, stream_key: &StreamKey) -> anyhow::Result<bool> {
        Ok(self.pattern.is_match(stream_key.as_str()))
    }
}

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::env;
use crate::graph::DEFAULT_GRAPH_CACHE_CAPACITY;

/// What a capturing converter does when the device cannot record conditional and while nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Run graphified functions eagerly through the composed mock converter.
    #[default]
    Eager,
    /// Fail with `GraphError::CaptureUnsupported`.
    Error,
}

impl FromStr for FallbackPolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "eager" => Ok(FallbackPolicy::Eager),
            "error" => Ok(FallbackPolicy::Error),
            other => bail!("unknown fallback policy '{other}' (expected eager|error)"),
        }
    }
}

impl fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FallbackPolicy::Eager => "eager",
            FallbackPolicy::Error => "error",
        })
    }
}

/// What happens when a graphified function is called with a new argument signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignaturePolicy {
    /// Keep the first captured graph and reject other signatures with `GraphError::GraphRebind`.
    #[default]
    Strict,
    /// Capture a new graph per signature, bounded by the per-function cache capacity.
    Recapture,
}

impl FromStr for SignaturePolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SignaturePolicy::Strict),
            "recapture" => Ok(SignaturePolicy::Recapture),
            other => bail!("unknown signature policy '{other}' (expected strict|recapture)"),
        }
    }
}

impl fmt::Display for SignaturePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignaturePolicy::Strict => "strict",
            SignaturePolicy::Recapture => "recapture",
        })
    }
}

/// Configuration of a [`CapturingConverter`](super::CapturingConverter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConverterOptions {
    pub fallback: FallbackPolicy,
    pub signature_policy: SignaturePolicy,
    /// Graphs kept per graphified function under [`SignaturePolicy::Recapture`].
    pub cache_capacity: usize,
    /// Never capture; behave like the mock converter.
    pub force_eager: bool,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        ConverterOptions {
            fallback: FallbackPolicy::default(),
            signature_policy: SignaturePolicy::default(),
            cache_capacity: DEFAULT_GRAPH_CACHE_CAPACITY,
            force_eager: false,
        }
    }
}

impl ConverterOptions {
    /// Defaults overridden by `DEVGRAPH_*` environment variables. Unparseable values are logged
    /// and ignored.
    pub fn from_env() -> Self {
        let mut options = ConverterOptions {
            force_eager: env::force_eager(),
            ..ConverterOptions::default()
        };
        if let Some(capacity) = env::graph_cache_capacity() {
            options.cache_capacity = capacity;
        }
        if let Some(value) = env::fallback_policy() {
            match value.parse() {
                Ok(policy) => options.fallback = policy,
                Err(err) => warn!("ignoring DEVGRAPH_FALLBACK: {err}"),
            }
        }
        if let Some(value) = env::signature_policy() {
            match value.parse() {
                Ok(policy) => options.signature_policy = policy,
                Err(err) => warn!("ignoring DEVGRAPH_SIGNATURE_POLICY: {err}"),
            }
        }
        options
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_signature_policy(mut self, policy: SignaturePolicy) -> Self {
        self.signature_policy = policy;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }

    pub fn with_force_eager(mut self, force_eager: bool) -> Self {
        self.force_eager = force_eager;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_parse_case_insensitively() -> anyhow::Result<()> {
        assert_eq!("Eager".parse::<FallbackPolicy>()?, FallbackPolicy::Eager);
        assert_eq!(" error ".parse::<FallbackPolicy>()?, FallbackPolicy::Error);
        assert_eq!(
            "RECAPTURE".parse::<SignaturePolicy>()?,
            SignaturePolicy::Recapture
        );
        assert!("sometimes".parse::<SignaturePolicy>().is_err());
        Ok(())
    }

    #[test]
    fn builder_clamps_capacity() {
        let options = ConverterOptions::default().with_cache_capacity(0);
        assert_eq!(options.cache_capacity, 1);
        assert_eq!(options.signature_policy, SignaturePolicy::Strict);
        assert_eq!(options.fallback, FallbackPolicy::Eager);
    }
}

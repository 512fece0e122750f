//! Consumer reconciliation for topics.
//!
//! Desired consumers are matched against the observed ones by name. Missing
//! consumers are added; existing ones get their read offset and codecs
//! updated. Consumers that only exist on the server are never removed here.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{Codec, CodecTable};
use crate::error::{ReconcileError, Result};

/// Desired consumer, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSpecInput {
    /// Consumer name.
    pub name: String,
    /// Codec names; empty means every allowed codec.
    #[serde(default)]
    pub supported_codecs: Vec<String>,
    /// Read position; defaults to the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_from: Option<DateTime<Utc>>,
}

impl ConsumerSpecInput {
    /// Creates a consumer with default codecs and read position.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supported_codecs: Vec::new(),
            read_from: None,
        }
    }

    /// Sets the codec names.
    #[must_use]
    pub fn codecs<S: Into<String>>(mut self, codecs: impl IntoIterator<Item = S>) -> Self {
        self.supported_codecs = codecs.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the read position.
    #[must_use]
    pub fn read_from(mut self, read_from: DateTime<Utc>) -> Self {
        self.read_from = Some(read_from);
        self
    }

    /// Read position with the default applied, in whole seconds.
    #[must_use]
    pub fn effective_read_from(&self) -> DateTime<Utc> {
        self.read_from.map_or(DateTime::<Utc>::UNIX_EPOCH, |at| at.trunc_subsecs(0))
    }

    /// Resolves codec names and defaults into a full consumer.
    pub fn resolve(&self, codecs: &CodecTable) -> Result<ConsumerSpec> {
        let supported_codecs = if self.supported_codecs.is_empty() {
            codecs.allowed().to_vec()
        } else {
            codecs.parse_list(&self.supported_codecs)?
        };
        Ok(ConsumerSpec {
            name: self.name.clone(),
            supported_codecs,
            read_from: self.effective_read_from(),
        })
    }
}

/// A consumer as created on, or described by, the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSpec {
    /// Consumer name.
    pub name: String,
    /// Codecs the consumer can read.
    pub supported_codecs: Vec<Codec>,
    /// Read position.
    pub read_from: DateTime<Utc>,
}

/// A single consumer change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerOp {
    /// Create a consumer.
    AddConsumer(ConsumerSpec),
    /// Move an existing consumer's read position.
    SetReadFrom {
        /// Consumer name.
        name: String,
        /// New read position.
        read_from: DateTime<Utc>,
    },
    /// Replace an existing consumer's codec list.
    SetCodecs {
        /// Consumer name.
        name: String,
        /// New codec list.
        codecs: Vec<Codec>,
    },
}

impl ConsumerOp {
    /// Name of the consumer this operation touches.
    #[must_use]
    pub fn consumer_name(&self) -> &str {
        match self {
            Self::AddConsumer(spec) => &spec.name,
            Self::SetReadFrom { name, .. } | Self::SetCodecs { name, .. } => name,
        }
    }
}

/// Ordered consumer changes.
pub type ConsumerPlan = Vec<ConsumerOp>;

/// Merges desired consumers into the observed ones.
///
/// Operations follow the order of `desired`. For an existing consumer,
/// `SetReadFrom` comes before `SetCodecs`. `SetCodecs` is emitted whenever
/// codecs are given, even if they match what the server reports.
pub fn merge_consumers(
    desired: &[ConsumerSpecInput],
    observed: &[ConsumerSpec],
    codecs: &CodecTable,
) -> Result<ConsumerPlan> {
    let observed_by_name: HashMap<&str, &ConsumerSpec> =
        observed.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut seen = HashSet::new();
    let mut plan = Vec::new();

    for consumer in desired {
        if !seen.insert(consumer.name.as_str()) {
            return Err(ReconcileError::Encoding(format!(
                "duplicate consumer '{}'",
                consumer.name
            )));
        }

        let Some(existing) = observed_by_name.get(consumer.name.as_str()) else {
            debug!(consumer = %consumer.name, "Consumer missing, adding");
            plan.push(ConsumerOp::AddConsumer(consumer.resolve(codecs)?));
            continue;
        };

        let read_from = consumer.effective_read_from();
        if read_from != existing.read_from {
            debug!(consumer = %consumer.name, %read_from, "Read position changed");
            plan.push(ConsumerOp::SetReadFrom {
                name: consumer.name.clone(),
                read_from,
            });
        }

        if !consumer.supported_codecs.is_empty() {
            plan.push(ConsumerOp::SetCodecs {
                name: consumer.name.clone(),
                codecs: codecs.parse_list(&consumer.supported_codecs)?,
            });
        }
    }

    Ok(plan)
}

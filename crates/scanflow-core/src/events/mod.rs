//! External event normalization: classify inbound payloads by their
//! `(source, detail-type)` tag and hand them to the adapter registered for
//! exactly that pair. The registry is built at startup, so the supported
//! set is explicit and enumerable.

pub mod aws_ecs;

use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use crate::model::ScanRequest;

/// Minimal envelope every inbound event must carry.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    pub source: String,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
}

/// Classification failures are fatal for the payload: its shape will not
/// change on retry, so none of these are transient.
#[derive(Debug)]
pub enum NormalizeError {
    /// The payload does not parse as the event envelope at all.
    MalformedEnvelope(serde_json::Error),

    /// No adapter is registered for this tag pair.
    UnsupportedEvent { source: String, detail_type: String },

    /// The envelope was recognized but the source-specific detail was not.
    MalformedPayload {
        source: String,
        detail_type: String,
        reason: String,
    },
}

// Hand-written `Display`/`Error`/`From` impls equivalent to what
// `#[derive(thiserror::Error)]` would generate. A derive is not usable here
// because thiserror unconditionally treats a field literally named `source`
// as the std error source, but `source` here is the event-source string
// (mandated by the spec and tests), not an error cause.
impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizeError::MalformedEnvelope(e) => {
                write!(f, "malformed event envelope: {e}")
            }
            NormalizeError::UnsupportedEvent {
                source,
                detail_type,
            } => write!(
                f,
                "unsupported event detail-type '{detail_type}' from source '{source}'"
            ),
            NormalizeError::MalformedPayload {
                source,
                detail_type,
                reason,
            } => write!(
                f,
                "malformed '{source}' / '{detail_type}' payload: {reason}"
            ),
        }
    }
}

impl std::error::Error for NormalizeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NormalizeError::MalformedEnvelope(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for NormalizeError {
    fn from(e: serde_json::Error) -> Self {
        NormalizeError::MalformedEnvelope(e)
    }
}

/// One source-specific translation from a raw event into scan requests.
pub trait EventAdapter: Send + Sync {
    fn source(&self) -> &'static str;
    fn detail_type(&self) -> &'static str;

    /// Parse the full raw payload and produce zero or more requests
    /// targeting `namespace`. Never mutates any resource.
    fn normalize(
        &self,
        raw: &serde_json::Value,
        namespace: &str,
    ) -> Result<Vec<ScanRequest>, NormalizeError>;
}

/// Dispatch table from `(source, detail-type)` to adapter.
pub struct Normalizer {
    adapters: HashMap<(String, String), Box<dyn EventAdapter>>,
}

impl Normalizer {
    pub fn new() -> Self {
        Normalizer {
            adapters: HashMap::new(),
        }
    }

    /// Registry with every adapter this build ships.
    pub fn with_default_adapters() -> Self {
        let mut normalizer = Self::new();
        normalizer.register(Box::new(aws_ecs::EcsTaskStateChange));
        normalizer
    }

    pub fn register(&mut self, adapter: Box<dyn EventAdapter>) {
        let key = (
            adapter.source().to_string(),
            adapter.detail_type().to_string(),
        );
        self.adapters.insert(key, adapter);
    }

    /// Supported tag pairs, for operator-facing listings.
    pub fn supported(&self) -> Vec<(String, String)> {
        let mut tags: Vec<(String, String)> = self.adapters.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Classify and translate one raw event payload.
    pub fn normalize(
        &self,
        raw: &str,
        namespace: &str,
    ) -> Result<Vec<ScanRequest>, NormalizeError> {
        let envelope: EventEnvelope = serde_json::from_str(raw)?;
        debug!(
            source = %envelope.source,
            detail_type = %envelope.detail_type,
            "event received"
        );

        let key = (envelope.source.clone(), envelope.detail_type.clone());
        let adapter = self
            .adapters
            .get(&key)
            .ok_or(NormalizeError::UnsupportedEvent {
                source: envelope.source,
                detail_type: envelope.detail_type,
            })?;

        // The envelope parsed, so the full payload parses too.
        let value: serde_json::Value = serde_json::from_str(raw)?;
        adapter.normalize(&value, namespace)
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::with_default_adapters()
    }
}

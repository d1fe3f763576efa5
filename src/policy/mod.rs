//! Streaming-vs-queued admission policy.
//!
//! The policy is a pure pre-flight check: given what is known about a
//! payload (estimated size, compression, format) it decides whether the
//! low-latency direct path is worth attempting or the payload should go
//! straight to the durable queued path. It never reads payload bytes.

use crate::source::DataFormat;
use std::collections::HashMap;

/// Base size threshold above which payloads are routed to the queued path.
pub const DEFAULT_BASE_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Hard ceiling on the bytes a direct-path attempt may carry. Unknown-size
/// streams are buffered up to this ceiling plus one byte before deciding.
pub const MAX_STREAMING_SIZE: u64 = 10 * 1024 * 1024;

/// Size multipliers for estimating the raw (decompressed) size of a payload
/// in a given format.
///
/// The exact values are policy tuning, not a contract; override them per
/// format when the defaults fit your data poorly.
#[derive(Debug, Clone, Copy)]
pub struct FormatMultipliers {
    /// Applied when the payload is already compressed.
    pub compressed: f64,
    /// Applied when the payload is uncompressed.
    pub uncompressed: f64,
}

impl FormatMultipliers {
    fn default_for(format: DataFormat) -> Self {
        if format.is_binary() {
            // Binary column formats are self-framing; their stored size is
            // the size that matters.
            Self {
                compressed: 1.0,
                uncompressed: 1.0,
            }
        } else {
            // Text formats compress well, so a compressed payload expands
            // substantially once decompressed.
            Self {
                compressed: 11.0,
                uncompressed: 1.0,
            }
        }
    }
}

/// Outcome of the admission policy, with the factors that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuingDecision {
    /// True if the payload should skip streaming and go straight to the
    /// queued path.
    pub use_queued: bool,
    /// Estimated raw (decompressed) size that was compared.
    pub estimated_raw_size: u64,
    /// Threshold after applying the policy factor.
    pub effective_threshold: u64,
    /// Whether the payload was already compressed.
    pub compressed: bool,
    /// Payload format.
    pub format: DataFormat,
}

/// Admission policy for the managed streaming router.
#[derive(Debug, Clone)]
pub struct QueuingPolicy {
    factor: f64,
    base_threshold: u64,
    multipliers: HashMap<DataFormat, FormatMultipliers>,
}

impl Default for QueuingPolicy {
    fn default() -> Self {
        Self {
            factor: 1.0,
            base_threshold: DEFAULT_BASE_THRESHOLD,
            multipliers: HashMap::new(),
        }
    }
}

impl QueuingPolicy {
    /// Policy with a tuning factor; the effective threshold scales linearly
    /// with it.
    pub fn with_factor(factor: f64) -> Self {
        Self {
            factor,
            ..Default::default()
        }
    }

    /// Override the base threshold.
    pub fn with_base_threshold(mut self, threshold: u64) -> Self {
        self.base_threshold = threshold;
        self
    }

    /// Override the raw-size multipliers for one format.
    pub fn with_multipliers(mut self, format: DataFormat, multipliers: FormatMultipliers) -> Self {
        self.multipliers.insert(format, multipliers);
        self
    }

    /// The current tuning factor.
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Decide whether a payload should skip the direct path.
    ///
    /// Pure function of its inputs. A `raw_size` of zero means the size is
    /// unknown; the caller is expected to buffer a bounded prefix and ask
    /// again with the observed size.
    pub fn should_use_queued(
        &self,
        raw_size: u64,
        compressed: bool,
        format: DataFormat,
    ) -> QueuingDecision {
        let multipliers = self
            .multipliers
            .get(&format)
            .copied()
            .unwrap_or_else(|| FormatMultipliers::default_for(format));

        let multiplier = if compressed {
            multipliers.compressed
        } else {
            multipliers.uncompressed
        };

        let estimated_raw_size = (raw_size as f64 * multiplier) as u64;
        let effective_threshold = (self.base_threshold as f64 * self.factor) as u64;

        QueuingDecision {
            use_queued: raw_size > 0 && estimated_raw_size > effective_threshold,
            estimated_raw_size,
            effective_threshold,
            compressed,
            format,
        }
    }
}

//! Labelling and feature encoding of per-device IoT traffic captures.
//!
//! Stages, in order: extract (tshark) -> label -> merge -> clean ->
//! preprocess. Every device is processed independently against the same
//! read-only vocabularies, so encoded outputs line up across devices.

pub mod cleaner;
pub mod config;
pub mod encoder;
pub mod error;
pub mod extract;
pub mod flags;
pub mod io;
pub mod labeller;
pub mod logger;
pub mod metadata;
pub mod pipeline;
pub mod ports;
pub mod record;
pub mod split;
pub mod table;
pub mod transform;
pub mod vocab;

#[cfg(test)]
mod tests;

pub use cleaner::FeatureCleaner;
pub use config::{PrepConfig, UnknownProtocolPolicy};
pub use encoder::{DatasetEncoder, EncodedSplit, FittedEncoder};
pub use error::{PrepError, Result};
pub use flags::FlagDecoder;
pub use labeller::{DeviceId, Labeller};
pub use metadata::{DeviceMetadata, MaliciousRule, MaliciousRuleSet, NormalMetadata};
pub use ports::PortHierarchy;
pub use record::{FeatureRow, TrafficRecord};
pub use split::{DatasetSplitter, Split};
pub use transform::FeatureTransformer;
pub use vocab::{GlobalVocabulary, LabelTaxonomy};

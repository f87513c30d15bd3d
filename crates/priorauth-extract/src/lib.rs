//! Document → rules: segmentation, classification, pattern extraction, and
//! rule assembly.

mod builder;
mod classifier;
mod error;
mod extractor;
mod patterns;
mod pipeline;
mod segmenter;
mod source;

pub use builder::{GeographicScope, RuleBuilder};
pub use classifier::{ClassificationStats, Classifier};
pub use error::{ExtractError, SourceError, Warning};
pub use extractor::{Extraction, Extractor};
pub use pipeline::{DocumentOutcome, FeatureCounts, Pipeline};
pub use segmenter::Segmenter;
pub use source::{
    AdapterChain, DocumentInput, ExtractedText, LossyUtf8Source, SourceFailure, TextSource,
    Utf8Source,
};

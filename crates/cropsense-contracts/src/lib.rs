pub mod failures;
pub mod image;
pub mod outcome;

pub use failures::{
    AdvisoryFailure, ClassifierFailure, GateFailure, GenerativeFailure, InputError,
};
pub use image::ImageAsset;
pub use outcome::{
    Advisory, ImageMeta, PipelineResult, PipelineStatus, Prediction, ValidationVerdict,
    FALLBACK_ADVISORY,
};

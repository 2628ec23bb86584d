//! facegate-core: face embedding, matching and the enrolled-face store.
//!
//! Uses SCRFD for face detection and ArcFace for embeddings, both running via
//! ONNX Runtime on CPU. Matching is a linear nearest-neighbour scan by
//! Euclidean distance.

pub mod alignment;
pub mod config;
pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod recognizer;
pub mod store;
pub mod types;

pub use config::{Config, ConfigError};
pub use extractor::{decode_image, ExtractError, FaceEncoder, OnnxFaceEncoder};
pub use matcher::{Candidate, EuclideanMatcher, MatchOutcome, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use store::{EnrolledFace, FaceStore, Removed, StoreError};
pub use types::{BoundingBox, Embedding, Profile, ProfileError};

pub use image::GrayImage;

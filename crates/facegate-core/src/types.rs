use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace, 128 for dlib-style encoders).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    #[serde(default)]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine similarity in [-1, 1]. Only used for diagnostics; matching is by distance.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// Free-form profile record attached to an identity.
///
/// Any JSON value. The interactive loop stores its investor type under the
/// `category` key of an object; a bare string is read as the category too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile(pub Value);

impl Default for Profile {
    fn default() -> Self {
        Self(Value::Object(Map::new()))
    }
}

impl Profile {
    /// Parse a profile payload. Only malformed JSON is rejected.
    pub fn parse(raw: &str) -> Result<Self, ProfileError> {
        Ok(Self(serde_json::from_str(raw)?))
    }

    pub fn with_category(category: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("category".into(), Value::String(category.into()));
        Self(Value::Object(map))
    }

    pub fn category(&self) -> Option<&str> {
        match &self.0 {
            Value::String(category) => Some(category),
            Value::Object(map) => map.get("category").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Value {
        self.0.clone()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProfileError {
    #[error("profile is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

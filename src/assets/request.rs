use std::collections::HashMap;
use thiserror::Error;

/// What a preload request or target carries.
///
/// Text is rasterized into an image on the worker, so every target that
/// reaches the uploader is expected to be `Image`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Image,
    Text,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    Int(i64),
    Color([f32; 4]),
    Str(String),
}

impl PropValue {
    #[inline(always)]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Color(_) => "color",
            Self::Str(_) => "string",
        }
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for PropValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<[f32; 4]> for PropValue {
    fn from(v: [f32; 4]) -> Self {
        Self::Color(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// A present property read as the wrong type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("property '{key}' should be {expected}, found {found}")]
pub struct PropertyError {
    pub key: String,
    pub expected: &'static str,
    pub found: &'static str,
}

/// Loosely typed named values attached to widgets and requests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyBag {
    values: HashMap<String, PropValue>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.values.get(key)
    }

    fn mismatch(key: &str, expected: &'static str, found: &PropValue) -> PropertyError {
        PropertyError {
            key: key.to_string(),
            expected,
            found: found.type_name(),
        }
    }

    /// Absent keys yield `Ok(None)`; present keys of another type are an error.
    pub fn int(&self, key: &str) -> Result<Option<i64>, PropertyError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(PropValue::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(Self::mismatch(key, "int", other)),
        }
    }

    pub fn color(&self, key: &str) -> Result<Option<[f32; 4]>, PropertyError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(PropValue::Color(v)) => Ok(Some(*v)),
            Some(other) => Err(Self::mismatch(key, "color", other)),
        }
    }

    pub fn str(&self, key: &str) -> Result<Option<&str>, PropertyError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(PropValue::Str(v)) => Ok(Some(v.as_str())),
            Some(other) => Err(Self::mismatch(key, "string", other)),
        }
    }
}

/// An on-demand decode job submitted from any thread.
#[derive(Clone, Debug)]
pub struct PreloadRequest {
    pub id: String,
    pub kind: TargetKind,
    /// Literal text payload for `Text` requests.
    pub asset: String,
    pub props: PropertyBag,
}

impl PreloadRequest {
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TargetKind::Text,
            asset: text.into(),
            props: PropertyBag::new(),
        }
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.insert(key, value);
        self
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single typed metadata entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum MetaData {
    #[serde(rename = "bool")]
    Bool(bool),
    #[serde(rename = "int")]
    Int(i64),
    #[serde(rename = "float")]
    Float(f64),
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "vec2")]
    Vec2([f64; 2]),
    #[serde(rename = "vec4")]
    Vec4([f64; 4]),
}

impl MetaData {
    pub fn type_name(&self) -> &'static str {
        match self {
            MetaData::Bool(_) => "bool",
            MetaData::Int(_) => "int",
            MetaData::Float(_) => "float",
            MetaData::Text(_) => "text",
            MetaData::Vec2(_) => "vec2",
            MetaData::Vec4(_) => "vec4",
        }
    }
}

/// Rust types that can be stored in a [`MetaDataMap`].
pub trait MetaDataType: Sized {
    fn from_metadata(meta: &MetaData) -> Option<Self>;
    fn into_metadata(self) -> MetaData;
}

macro_rules! impl_metadata_type {
    ($ty:ty, $variant:ident) => {
        impl MetaDataType for $ty {
            fn from_metadata(meta: &MetaData) -> Option<Self> {
                match meta {
                    MetaData::$variant(value) => Some(value.clone()),
                    _ => None,
                }
            }

            fn into_metadata(self) -> MetaData {
                MetaData::$variant(self)
            }
        }
    };
}

impl_metadata_type!(bool, Bool);
impl_metadata_type!(i64, Int);
impl_metadata_type!(f64, Float);
impl_metadata_type!(String, Text);
impl_metadata_type!([f64; 2], Vec2);
impl_metadata_type!([f64; 4], Vec4);

/// Keyed, typed, serializable side data attached to processors and properties.
///
/// Typed reads never fail: a missing key or an entry stored with a different
/// type both yield the caller's default.
///
/// ```
/// use procflow_property::MetaDataMap;
///
/// let mut meta = MetaDataMap::new();
/// meta.set("position", [10.0, 20.0]);
/// assert_eq!(meta.get("position", [0.0, 0.0]), [10.0, 20.0]);
/// // stored as vec2, read as bool
/// assert!(!meta.get("position", false));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaDataMap {
    entries: BTreeMap<String, MetaData>,
}

impl MetaDataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing whatever was there regardless of type.
    pub fn set<T: MetaDataType>(&mut self, key: &str, value: T) {
        self.entries.insert(key.to_string(), value.into_metadata());
    }

    pub fn get<T: MetaDataType>(&self, key: &str, default: T) -> T {
        self.get_opt(key).unwrap_or(default)
    }

    pub fn get_opt<T: MetaDataType>(&self, key: &str) -> Option<T> {
        self.entries.get(key).and_then(T::from_metadata)
    }

    /// True only when `key` exists and holds a `T`.
    pub fn has<T: MetaDataType>(&self, key: &str) -> bool {
        self.get_opt::<T>(key).is_some()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn entry(&self, key: &str) -> Option<&MetaData> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<MetaData> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaData)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Anything that carries a [`MetaDataMap`].
pub trait MetaDataOwner {
    fn metadata(&self) -> &MetaDataMap;
    fn metadata_mut(&mut self) -> &mut MetaDataMap;

    fn set_metadata<T: MetaDataType>(&mut self, key: &str, value: T) {
        self.metadata_mut().set(key, value);
    }

    fn get_metadata<T: MetaDataType>(&self, key: &str, default: T) -> T {
        self.metadata().get(key, default)
    }

    fn has_metadata<T: MetaDataType>(&self, key: &str) -> bool {
        self.metadata().has::<T>(key)
    }
}

impl MetaDataOwner for MetaDataMap {
    fn metadata(&self) -> &MetaDataMap {
        self
    }

    fn metadata_mut(&mut self) -> &mut MetaDataMap {
        self
    }
}

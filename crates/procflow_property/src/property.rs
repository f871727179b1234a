use crate::error::PropertyError;
use crate::invalidation::InvalidationLevel;
use crate::metadata::{MetaDataMap, MetaDataOwner};
use crate::observer::{Observers, Subscription};
use crate::owner::PropertyOwner;
use crate::value::PropertyValue;
use serde::{Deserialize, Serialize};

/// Which parts of a property end up in a saved workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertySerializationMode {
    /// Only state that differs from the default.
    #[default]
    Default,
    /// Everything, including unchanged values and flags.
    All,
    /// Nothing; the property is rebuilt from code on load.
    None,
}

/// Coarse type tag used to select properties without downcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    Bool,
    Int,
    Float,
    Text,
    Vector,
    Event,
    Composite,
    Empty,
}

pub enum PropertyKind {
    Value,
    /// Fires when an interaction event named `trigger` reaches the owner.
    Event { trigger: String },
    Composite(PropertyOwner),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyEvent {
    ValueChanged {
        identifier: String,
        value: PropertyValue,
    },
    Triggered {
        identifier: String,
    },
    ReadOnlyChanged {
        identifier: String,
        read_only: bool,
    },
    VisibilityChanged {
        identifier: String,
        visible: bool,
    },
    DisplayNameChanged {
        identifier: String,
        display_name: String,
    },
}

/// A named, typed, observable parameter living inside a [`PropertyOwner`].
///
/// Writing a value goes through [`PropertyOwner::set_value`], which raises the
/// owner's invalidation level by this property's declared level whenever the
/// value actually changes.
pub struct Property {
    pub(crate) identifier: String,
    pub(crate) display_name: String,
    pub(crate) semantics: String,
    pub(crate) value: PropertyValue,
    pub(crate) default_value: PropertyValue,
    pub(crate) min_value: Option<PropertyValue>,
    pub(crate) max_value: Option<PropertyValue>,
    pub(crate) invalidation_level: InvalidationLevel,
    pub(crate) read_only: bool,
    pub(crate) visible: bool,
    pub(crate) serialization_mode: PropertySerializationMode,
    pub(crate) modified: bool,
    pub(crate) dynamic: bool,
    pub(crate) kind: PropertyKind,
    pub(crate) metadata: MetaDataMap,
    pub(crate) observers: Observers<PropertyEvent>,
}

impl Property {
    pub fn new(identifier: &str, display_name: &str, value: impl Into<PropertyValue>) -> Self {
        let value = value.into();
        Self {
            identifier: identifier.to_string(),
            display_name: display_name.to_string(),
            semantics: "Default".to_string(),
            default_value: value.clone(),
            value,
            min_value: None,
            max_value: None,
            invalidation_level: InvalidationLevel::InvalidOutput,
            read_only: false,
            visible: true,
            serialization_mode: PropertySerializationMode::Default,
            modified: false,
            dynamic: false,
            kind: PropertyKind::Value,
            metadata: MetaDataMap::new(),
            observers: Observers::new(),
        }
    }

    /// A property without a value that fires on the interaction event `trigger`.
    pub fn event(identifier: &str, display_name: &str, trigger: &str) -> Self {
        let mut property = Self::new(identifier, display_name, PropertyValue::None);
        property.kind = PropertyKind::Event {
            trigger: trigger.to_string(),
        };
        property
    }

    /// A property grouping child properties in its own [`PropertyOwner`].
    pub fn composite(identifier: &str, display_name: &str) -> Self {
        let mut property = Self::new(identifier, display_name, PropertyValue::None);
        property.kind = PropertyKind::Composite(PropertyOwner::new());
        property
    }

    pub fn composite_with(
        identifier: &str,
        display_name: &str,
        children: impl IntoIterator<Item = Property>,
    ) -> Result<Self, PropertyError> {
        let mut property = Self::composite(identifier, display_name);
        if let PropertyKind::Composite(owner) = &mut property.kind {
            for child in children {
                owner.add_property(child)?;
            }
        }
        Ok(property)
    }

    pub fn with_range(mut self, min: impl Into<PropertyValue>, max: impl Into<PropertyValue>) -> Self {
        self.min_value = Some(min.into());
        self.max_value = Some(max.into());
        self.value = self
            .value
            .clamped(self.min_value.as_ref(), self.max_value.as_ref());
        self.default_value = self.value.clone();
        self
    }

    pub fn with_invalidation_level(mut self, level: InvalidationLevel) -> Self {
        self.invalidation_level = level;
        self
    }

    pub fn with_semantics(mut self, semantics: &str) -> Self {
        self.semantics = semantics.to_string();
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_serialization_mode(mut self, mode: PropertySerializationMode) -> Self {
        self.serialization_mode = mode;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn semantics(&self) -> &str {
        &self.semantics
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    pub fn default_value(&self) -> &PropertyValue {
        &self.default_value
    }

    pub fn min_value(&self) -> Option<&PropertyValue> {
        self.min_value.as_ref()
    }

    pub fn max_value(&self) -> Option<&PropertyValue> {
        self.max_value.as_ref()
    }

    /// The level this property raises its owner to when it changes.
    pub fn invalidation_level(&self) -> InvalidationLevel {
        self.invalidation_level
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn serialization_mode(&self) -> PropertySerializationMode {
        self.serialization_mode
    }

    /// Set by every value change, cleared when the owner becomes valid.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Created at runtime rather than by the owner's own setup code.
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    pub fn property_type(&self) -> PropertyType {
        match &self.kind {
            PropertyKind::Event { .. } => PropertyType::Event,
            PropertyKind::Composite(_) => PropertyType::Composite,
            PropertyKind::Value => match self.value {
                PropertyValue::None => PropertyType::Empty,
                PropertyValue::Bool(_) => PropertyType::Bool,
                PropertyValue::Int(_) => PropertyType::Int,
                PropertyValue::Float(_) => PropertyType::Float,
                PropertyValue::Text(_) => PropertyType::Text,
                PropertyValue::Vector(_) => PropertyType::Vector,
            },
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.kind, PropertyKind::Composite(_))
    }

    pub fn holds_value(&self) -> bool {
        matches!(self.kind, PropertyKind::Value)
    }

    pub fn trigger(&self) -> Option<&str> {
        match &self.kind {
            PropertyKind::Event { trigger } => Some(trigger),
            _ => None,
        }
    }

    pub fn owner(&self) -> Option<&PropertyOwner> {
        match &self.kind {
            PropertyKind::Composite(owner) => Some(owner),
            _ => None,
        }
    }

    pub fn owner_mut(&mut self) -> Option<&mut PropertyOwner> {
        match &mut self.kind {
            PropertyKind::Composite(owner) => Some(owner),
            _ => None,
        }
    }

    /// Writes a new value. Returns whether the stored value changed.
    ///
    /// Values of a different but convertible kind are converted; out of range
    /// numbers are clamped into `[min, max]`.
    pub fn set(&mut self, value: impl Into<PropertyValue>) -> Result<bool, PropertyError> {
        if self.read_only {
            return Err(PropertyError::ReadOnly(self.identifier.clone()));
        }
        self.assign(value.into())
    }

    /// Like [`Property::set`] but ignores the read-only flag. Used for link
    /// propagation and workspace loading.
    pub fn assign(&mut self, value: PropertyValue) -> Result<bool, PropertyError> {
        if !self.holds_value() {
            return Err(PropertyError::NotAValue(self.identifier.clone()));
        }
        let converted = value
            .convert_like(&self.value)
            .ok_or_else(|| PropertyError::TypeMismatch {
                identifier: self.identifier.clone(),
                expected: self.value.kind_name(),
                found: value.kind_name(),
            })?
            .clamped(self.min_value.as_ref(), self.max_value.as_ref());

        if converted == self.value {
            return Ok(false);
        }
        self.value = converted;
        self.modified = true;
        self.observers.notify(&PropertyEvent::ValueChanged {
            identifier: self.identifier.clone(),
            value: self.value.clone(),
        });
        Ok(true)
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        if self.read_only != read_only {
            self.read_only = read_only;
            self.observers.notify(&PropertyEvent::ReadOnlyChanged {
                identifier: self.identifier.clone(),
                read_only,
            });
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        if self.visible != visible {
            self.visible = visible;
            self.observers.notify(&PropertyEvent::VisibilityChanged {
                identifier: self.identifier.clone(),
                visible,
            });
        }
    }

    pub fn set_display_name(&mut self, display_name: &str) {
        if self.display_name != display_name {
            self.display_name = display_name.to_string();
            self.observers.notify(&PropertyEvent::DisplayNameChanged {
                identifier: self.identifier.clone(),
                display_name: self.display_name.clone(),
            });
        }
    }

    pub fn set_semantics(&mut self, semantics: &str) {
        self.semantics = semantics.to_string();
    }

    pub fn set_serialization_mode(&mut self, mode: PropertySerializationMode) {
        self.serialization_mode = mode;
    }

    /// Restores the default value. Returns whether anything changed.
    pub fn reset_to_default(&mut self) -> bool {
        match &mut self.kind {
            PropertyKind::Composite(owner) => owner.reset_all_properties().is_some(),
            PropertyKind::Event { .. } => false,
            PropertyKind::Value => {
                let default = self.default_value.clone();
                self.assign(default).unwrap_or(false)
            }
        }
    }

    pub fn set_current_state_as_default(&mut self) {
        match &mut self.kind {
            PropertyKind::Composite(owner) => owner.set_all_properties_current_state_as_default(),
            _ => self.default_value = self.value.clone(),
        }
    }

    pub fn set_valid(&mut self) {
        self.modified = false;
        if let PropertyKind::Composite(owner) = &mut self.kind {
            owner.set_valid();
        }
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&PropertyEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.observers.subscribe(callback)
    }

    pub(crate) fn fire(&self) {
        self.observers.notify(&PropertyEvent::Triggered {
            identifier: self.identifier.clone(),
        });
    }

    pub(crate) fn set_dynamic(&mut self, dynamic: bool) {
        self.dynamic = dynamic;
        if let PropertyKind::Composite(owner) = &mut self.kind {
            for child in owner.properties.iter_mut() {
                child.set_dynamic(dynamic);
            }
        }
    }
}

impl MetaDataOwner for Property {
    fn metadata(&self) -> &MetaDataMap {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut MetaDataMap {
        &mut self.metadata
    }
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Property");
        debug
            .field("identifier", &self.identifier)
            .field("value", &self.value)
            .field("invalidation_level", &self.invalidation_level)
            .field("read_only", &self.read_only)
            .field("modified", &self.modified);
        match &self.kind {
            PropertyKind::Value => {}
            PropertyKind::Event { trigger } => {
                debug.field("trigger", trigger);
            }
            PropertyKind::Composite(owner) => {
                debug.field("children", &owner.len());
            }
        }
        debug.finish()
    }
}

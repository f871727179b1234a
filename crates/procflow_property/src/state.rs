//! Saved form of properties inside a workspace document.

use crate::error::PropertyError;
use crate::invalidation::InvalidationLevel;
use crate::metadata::MetaDataMap;
use crate::owner::PropertyOwner;
use crate::property::{Property, PropertyKind, PropertySerializationMode};
use crate::value::PropertyValue;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Everything needed to recreate a dynamic property from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub semantics: String,
    pub default_value: PropertyValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<PropertyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<PropertyValue>,
    #[serde(default)]
    pub invalidation_level: InvalidationLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub composite: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyState {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<PropertyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyState>,
    #[serde(default, skip_serializing_if = "MetaDataMap::is_empty")]
    pub metadata: MetaDataMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<PropertyDefinition>,
}

impl Property {
    pub fn definition(&self) -> PropertyDefinition {
        PropertyDefinition {
            display_name: self.display_name.clone(),
            semantics: self.semantics.clone(),
            default_value: self.default_value.clone(),
            min: self.min_value.clone(),
            max: self.max_value.clone(),
            invalidation_level: self.invalidation_level,
            trigger: self.trigger().map(str::to_string),
            composite: self.is_composite(),
        }
    }

    pub fn from_definition(identifier: &str, definition: &PropertyDefinition) -> Self {
        let mut property = if definition.composite {
            Property::composite(identifier, &definition.display_name)
        } else if let Some(trigger) = &definition.trigger {
            Property::event(identifier, &definition.display_name, trigger)
        } else {
            Property::new(
                identifier,
                &definition.display_name,
                definition.default_value.clone(),
            )
        };
        if !definition.semantics.is_empty() {
            property.semantics = definition.semantics.clone();
        }
        property.min_value = definition.min.clone();
        property.max_value = definition.max.clone();
        property.invalidation_level = definition.invalidation_level;
        property.dynamic = true;
        property
    }

    /// The saved form of this property, or `None` when there is nothing
    /// worth saving under its serialization mode.
    pub fn state(&self) -> Option<PropertyState> {
        self.state_with(self.dynamic)
    }

    fn state_with(&self, with_definition: bool) -> Option<PropertyState> {
        let mode = self.serialization_mode;
        if mode == PropertySerializationMode::None && !with_definition {
            return None;
        }
        let all = mode == PropertySerializationMode::All;

        let value = match self.kind {
            PropertyKind::Value if all || self.value != self.default_value => {
                Some(self.value.clone())
            }
            _ => None,
        };
        let properties = match &self.kind {
            PropertyKind::Composite(owner) => owner.states_with(with_definition),
            _ => Vec::new(),
        };
        let definition = with_definition.then(|| self.definition());

        if !all
            && value.is_none()
            && properties.is_empty()
            && self.metadata.is_empty()
            && definition.is_none()
        {
            return None;
        }

        Some(PropertyState {
            identifier: self.identifier.clone(),
            value,
            read_only: all.then_some(self.read_only),
            visible: all.then_some(self.visible),
            properties,
            metadata: self.metadata.clone(),
            definition,
        })
    }

    fn apply_state(&mut self, state: &PropertyState, problems: &mut Vec<PropertyError>) -> Option<InvalidationLevel> {
        let mut level = None;
        if let Some(value) = &state.value {
            match self.assign(value.clone()) {
                Ok(true) => level = Some(self.invalidation_level),
                Ok(false) => {}
                Err(error) => problems.push(error),
            }
        }
        if let Some(read_only) = state.read_only {
            self.set_read_only(read_only);
        }
        if let Some(visible) = state.visible {
            self.set_visible(visible);
        }
        if !state.metadata.is_empty() {
            self.metadata = state.metadata.clone();
        }
        if let PropertyKind::Composite(owner) = &mut self.kind {
            problems.extend(owner.apply_states(&state.properties));
            if !owner.is_valid() {
                level = Some(owner.invalidation_level());
            }
        }
        level
    }
}

impl PropertyOwner {
    /// Saved form of every property worth saving, in declaration order.
    pub fn states(&self) -> Vec<PropertyState> {
        self.properties.iter().filter_map(Property::state).collect()
    }

    fn states_with(&self, with_definition: bool) -> Vec<PropertyState> {
        self.properties
            .iter()
            .filter_map(|property| property.state_with(with_definition || property.dynamic))
            .collect()
    }

    /// Applies saved states.
    ///
    /// Dynamic properties missing from `states` are removed and dynamic
    /// definitions without a live property are recreated. Problems with
    /// individual entries are collected and returned; the remaining entries
    /// are still applied.
    pub fn apply_states(&mut self, states: &[PropertyState]) -> Vec<PropertyError> {
        let mut problems = Vec::new();

        let stale: Vec<String> = self
            .properties
            .iter()
            .filter(|property| property.dynamic)
            .filter(|property| !states.iter().any(|s| s.identifier == property.identifier))
            .map(|property| property.identifier.clone())
            .collect();
        for identifier in stale {
            debug!(property = %identifier, "removing dynamic property absent from saved state");
            self.remove_property(&identifier);
        }

        for state in states {
            if self.property(&state.identifier).is_none() {
                match &state.definition {
                    Some(definition) => {
                        let property = Property::from_definition(&state.identifier, definition);
                        if let Err(error) = self.add_property(property) {
                            problems.push(error);
                            continue;
                        }
                    }
                    None => {
                        problems.push(PropertyError::NotFound(state.identifier.clone()));
                        continue;
                    }
                }
            }

            let level = match self.property_mut(&state.identifier) {
                Some(property) => property.apply_state(state, &mut problems),
                None => None,
            };
            if let Some(level) = level {
                self.invalidate(level);
            }
        }
        problems
    }
}

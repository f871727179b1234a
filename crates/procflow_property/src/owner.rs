use crate::error::PropertyError;
use crate::invalidation::InvalidationLevel;
use crate::observer::{Observers, Subscription};
use crate::property::{Property, PropertyKind, PropertyType};
use crate::value::PropertyValue;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyOwnerEvent {
    WillAddProperty { identifier: String, index: usize },
    DidAddProperty { identifier: String, index: usize },
    WillRemoveProperty { identifier: String, index: usize },
    DidRemoveProperty { identifier: String, index: usize },
    Invalidated { level: InvalidationLevel },
}

/// A named interaction (key press, pick, ...) routed to event properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionEvent {
    name: String,
    used: bool,
}

impl InteractionEvent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            used: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    pub fn mark_used(&mut self) {
        self.used = true;
    }
}

/// An ordered set of properties plus an aggregate invalidation level.
///
/// Composite properties own a nested `PropertyOwner`; writes through
/// [`PropertyOwner::set_value`] raise every owner along the path, so the
/// top-level owner always reflects the most severe change beneath it.
#[derive(Debug, Default)]
pub struct PropertyOwner {
    pub(crate) properties: Vec<Property>,
    pub(crate) event_properties: Vec<usize>,
    pub(crate) composite_properties: Vec<usize>,
    pub(crate) invalidation_level: InvalidationLevel,
    pub(crate) observers: Observers<PropertyOwnerEvent>,
}

impl PropertyOwner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `property`. Identifiers must be unique within one owner.
    pub fn add_property(&mut self, property: Property) -> Result<(), PropertyError> {
        if property.identifier().is_empty() {
            return Err(PropertyError::EmptyIdentifier);
        }
        // Paths are written as dot separated identifiers.
        if property.identifier().contains('.') {
            return Err(PropertyError::InvalidIdentifier(
                property.identifier().to_string(),
            ));
        }
        if self.index_of(property.identifier()).is_some() {
            return Err(PropertyError::DuplicateIdentifier(
                property.identifier().to_string(),
            ));
        }

        let index = self.properties.len();
        let identifier = property.identifier().to_string();
        self.observers.notify(&PropertyOwnerEvent::WillAddProperty {
            identifier: identifier.clone(),
            index,
        });
        self.properties.push(property);
        self.rebuild_caches();
        self.observers
            .notify(&PropertyOwnerEvent::DidAddProperty { identifier, index });
        Ok(())
    }

    /// Adds a property created at runtime. Dynamic properties are saved with
    /// their full definition and recreated on load.
    pub fn add_dynamic_property(&mut self, mut property: Property) -> Result<(), PropertyError> {
        property.set_dynamic(true);
        self.add_property(property)
    }

    /// Removes and returns the property, or `None` if it is not owned here.
    pub fn remove_property(&mut self, identifier: &str) -> Option<Property> {
        let index = self.index_of(identifier)?;
        self.observers.notify(&PropertyOwnerEvent::WillRemoveProperty {
            identifier: identifier.to_string(),
            index,
        });
        let property = self.properties.remove(index);
        self.rebuild_caches();
        self.observers.notify(&PropertyOwnerEvent::DidRemoveProperty {
            identifier: identifier.to_string(),
            index,
        });
        Some(property)
    }

    /// Removes the property at `path`, at any depth.
    pub fn remove_property_at<S: AsRef<str>>(&mut self, path: &[S]) -> Option<Property> {
        let (last, parent) = path.split_last()?;
        if parent.is_empty() {
            self.remove_property(last.as_ref())
        } else {
            self.property_by_path_mut(parent)?
                .owner_mut()?
                .remove_property(last.as_ref())
        }
    }

    fn rebuild_caches(&mut self) {
        self.event_properties.clear();
        self.composite_properties.clear();
        for (index, property) in self.properties.iter().enumerate() {
            match property.kind() {
                PropertyKind::Event { .. } => self.event_properties.push(index),
                PropertyKind::Composite(_) => self.composite_properties.push(index),
                PropertyKind::Value => {}
            }
        }
    }

    fn index_of(&self, identifier: &str) -> Option<usize> {
        self.properties
            .iter()
            .position(|property| property.identifier() == identifier)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property(&self, identifier: &str) -> Option<&Property> {
        self.index_of(identifier).map(|index| &self.properties[index])
    }

    pub(crate) fn property_mut(&mut self, identifier: &str) -> Option<&mut Property> {
        let index = self.index_of(identifier)?;
        Some(&mut self.properties[index])
    }

    /// Looks `identifier` up among the direct children, or anywhere below
    /// when `recursive` is set. The first match in declaration order wins.
    pub fn property_by_identifier(&self, identifier: &str, recursive: bool) -> Option<&Property> {
        if let Some(property) = self.property(identifier) {
            return Some(property);
        }
        if !recursive {
            return None;
        }
        self.composite_properties
            .iter()
            .filter_map(|&index| self.properties[index].owner())
            .find_map(|owner| owner.property_by_identifier(identifier, true))
    }

    pub fn property_by_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&Property> {
        let (first, rest) = path.split_first()?;
        let property = self.property(first.as_ref())?;
        if rest.is_empty() {
            Some(property)
        } else {
            property.owner()?.property_by_path(rest)
        }
    }

    pub(crate) fn property_by_path_mut<S: AsRef<str>>(&mut self, path: &[S]) -> Option<&mut Property> {
        let (first, rest) = path.split_first()?;
        let property = self.property_mut(first.as_ref())?;
        if rest.is_empty() {
            Some(property)
        } else {
            property.owner_mut()?.property_by_path_mut(rest)
        }
    }

    /// Every property at any depth, parents before their children.
    pub fn properties_recursive(&self) -> Vec<&Property> {
        let mut result = Vec::new();
        for property in &self.properties {
            result.push(property);
            if let Some(owner) = property.owner() {
                result.extend(owner.properties_recursive());
            }
        }
        result
    }

    /// Identifier paths of every property at any depth, in the same order as
    /// [`PropertyOwner::properties_recursive`].
    pub fn property_paths_recursive(&self) -> Vec<Vec<String>> {
        let mut result = Vec::new();
        for property in &self.properties {
            result.push(vec![property.identifier().to_string()]);
            if let Some(owner) = property.owner() {
                for mut path in owner.property_paths_recursive() {
                    path.insert(0, property.identifier().to_string());
                    result.push(path);
                }
            }
        }
        result
    }

    pub fn properties_by_type(&self, property_type: PropertyType, recursive: bool) -> Vec<&Property> {
        let candidates: Vec<&Property> = if recursive {
            self.properties_recursive()
        } else {
            self.properties.iter().collect()
        };
        candidates
            .into_iter()
            .filter(|property| property.property_type() == property_type)
            .collect()
    }

    pub fn event_properties(&self) -> impl Iterator<Item = &Property> {
        self.event_properties
            .iter()
            .map(move |&index| &self.properties[index])
    }

    pub fn composite_properties(&self) -> impl Iterator<Item = &Property> {
        self.composite_properties
            .iter()
            .map(move |&index| &self.properties[index])
    }

    pub fn invalidation_level(&self) -> InvalidationLevel {
        self.invalidation_level
    }

    pub fn is_valid(&self) -> bool {
        self.invalidation_level.is_valid()
    }

    /// Raises the aggregate level to `max(current, level)`. Returns whether
    /// the level went up.
    pub fn invalidate(&mut self, level: InvalidationLevel) -> bool {
        let raised = self.invalidation_level.raise(level);
        if raised == self.invalidation_level {
            return false;
        }
        trace!(from = %self.invalidation_level, to = %raised, "property owner invalidated");
        self.invalidation_level = raised;
        self.observers
            .notify(&PropertyOwnerEvent::Invalidated { level: raised });
        true
    }

    /// Marks the owner valid and clears the modified flag of every property.
    pub fn set_valid(&mut self) {
        for property in &mut self.properties {
            property.set_valid();
        }
        self.invalidation_level = InvalidationLevel::Valid;
    }

    /// Writes the property at `path`, honouring its read-only flag.
    ///
    /// Returns the level the owner was invalidated with, or `None` when the
    /// value did not change.
    pub fn set_value<S: AsRef<str>>(
        &mut self,
        path: &[S],
        value: PropertyValue,
    ) -> Result<Option<InvalidationLevel>, PropertyError> {
        self.write(path, value, false)
    }

    /// Like [`PropertyOwner::set_value`] but bypasses the read-only flag.
    pub fn assign_value<S: AsRef<str>>(
        &mut self,
        path: &[S],
        value: PropertyValue,
    ) -> Result<Option<InvalidationLevel>, PropertyError> {
        self.write(path, value, true)
    }

    /// Hands the property at `path` to `f` for edits that have no dedicated
    /// setter here, such as flags or display names.
    ///
    /// A value change made by `f`, or a rise of a composite's own level, raises
    /// every owner along the path exactly like [`PropertyOwner::set_value`].
    pub fn update_property<S: AsRef<str>, R>(
        &mut self,
        path: &[S],
        f: impl FnOnce(&mut Property) -> R,
    ) -> Result<(R, Option<InvalidationLevel>), PropertyError> {
        let (first, rest) = path.split_first().ok_or(PropertyError::EmptyIdentifier)?;
        let index = self
            .index_of(first.as_ref())
            .ok_or_else(|| PropertyError::NotFound(join_path(path)))?;
        let property = &mut self.properties[index];

        let (result, level) = if rest.is_empty() {
            let value = property.value.clone();
            let nested = property.owner().map(PropertyOwner::invalidation_level);
            let result = f(property);
            let level = if property.value != value {
                Some(property.invalidation_level())
            } else {
                match (nested, property.owner().map(PropertyOwner::invalidation_level)) {
                    (Some(before), Some(after)) if after > before => Some(after),
                    _ => None,
                }
            };
            (result, level)
        } else {
            let identifier = property.identifier().to_string();
            match property.owner_mut() {
                Some(owner) => owner.update_property(rest, f).map_err(|error| match error {
                    PropertyError::NotFound(_) => PropertyError::NotFound(join_path(path)),
                    other => other,
                })?,
                None => return Err(PropertyError::NotAComposite(identifier)),
            }
        };

        if let Some(level) = level {
            self.invalidate(level);
        }
        Ok((result, level))
    }

    fn write<S: AsRef<str>>(
        &mut self,
        path: &[S],
        value: PropertyValue,
        force: bool,
    ) -> Result<Option<InvalidationLevel>, PropertyError> {
        let (first, rest) = path.split_first().ok_or(PropertyError::EmptyIdentifier)?;
        let index = self
            .index_of(first.as_ref())
            .ok_or_else(|| PropertyError::NotFound(join_path(path)))?;
        let property = &mut self.properties[index];

        let level = if rest.is_empty() {
            let changed = if force {
                property.assign(value)?
            } else {
                property.set(value)?
            };
            changed.then(|| property.invalidation_level())
        } else {
            let identifier = property.identifier().to_string();
            match property.owner_mut() {
                Some(owner) => owner.write(rest, value, force).map_err(|error| match error {
                    PropertyError::NotFound(_) => PropertyError::NotFound(join_path(path)),
                    other => other,
                })?,
                None => return Err(PropertyError::NotAComposite(identifier)),
            }
        };

        if let Some(level) = level {
            self.invalidate(level);
        }
        Ok(level)
    }

    /// Routes `event` to the first event property listening for it, searching
    /// direct event properties before descending into composites.
    pub fn invoke_event(&mut self, event: &mut InteractionEvent) -> Option<InvalidationLevel> {
        let hit = self
            .event_properties
            .iter()
            .copied()
            .find(|&index| self.properties[index].trigger() == Some(event.name()));
        if let Some(index) = hit {
            let property = &self.properties[index];
            property.fire();
            event.mark_used();
            let level = property.invalidation_level();
            self.invalidate(level);
            return Some(level);
        }

        for index in self.composite_properties.clone() {
            let nested = self.properties[index]
                .owner_mut()
                .and_then(|owner| owner.invoke_event(event));
            if let Some(level) = nested {
                self.invalidate(level);
                return Some(level);
            }
        }
        None
    }

    /// Restores every property to its default. Returns the resulting
    /// invalidation level if anything changed.
    pub fn reset_all_properties(&mut self) -> Option<InvalidationLevel> {
        let mut level: Option<InvalidationLevel> = None;
        for property in &mut self.properties {
            if property.reset_to_default() {
                let raised = level.map_or(property.invalidation_level(), |current| {
                    current.raise(property.invalidation_level())
                });
                level = Some(raised);
            }
        }
        if let Some(level) = level {
            self.invalidate(level);
        }
        level
    }

    pub fn set_all_properties_current_state_as_default(&mut self) {
        for property in &mut self.properties {
            property.set_current_state_as_default();
        }
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&PropertyOwnerEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.observers.subscribe(callback)
    }
}

pub(crate) fn join_path<S: AsRef<str>>(path: &[S]) -> String {
    path.iter()
        .map(|segment| segment.as_ref())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn camera_owner() -> Result<PropertyOwner, PropertyError> {
        let mut owner = PropertyOwner::new();
        owner.add_property(Property::new("iso", "Iso value", 0.5))?;
        owner.add_property(
            Property::new("resolution", "Resolution", 64_i64)
                .with_invalidation_level(InvalidationLevel::InvalidResources),
        )?;
        owner.add_property(Property::composite_with(
            "camera",
            "Camera",
            [
                Property::new("fov", "Field of view", 60.0),
                Property::event("reset", "Reset", "key-r"),
            ],
        )?)?;
        owner.add_property(Property::event("pick", "Pick", "mouse-press"))?;
        Ok(owner)
    }

    #[test]
    fn test_duplicate_identifier_rejected() -> Result<(), PropertyError> {
        let mut owner = camera_owner()?;
        let error = owner.add_property(Property::new("iso", "Again", 1.0));
        assert_eq!(error, Err(PropertyError::DuplicateIdentifier("iso".into())));
        assert_eq!(owner.len(), 4);
        Ok(())
    }

    #[test]
    fn test_remove_missing_is_none() -> Result<(), PropertyError> {
        let mut owner = camera_owner()?;
        assert!(owner.remove_property("missing").is_none());
        assert!(owner.remove_property("iso").is_some());
        assert_eq!(owner.len(), 3);
        Ok(())
    }

    #[test]
    fn test_caches_follow_removal() -> Result<(), PropertyError> {
        let mut owner = camera_owner()?;
        owner.remove_property("iso");
        let events: Vec<&str> = owner.event_properties().map(|p| p.identifier()).collect();
        assert_eq!(events, vec!["pick"]);
        let composites: Vec<&str> = owner
            .composite_properties()
            .map(|p| p.identifier())
            .collect();
        assert_eq!(composites, vec!["camera"]);
        Ok(())
    }

    #[test]
    fn test_lookup_by_path_and_recursive_identifier() -> Result<(), PropertyError> {
        let owner = camera_owner()?;
        assert!(owner.property_by_path(&["camera", "fov"]).is_some());
        assert!(owner.property_by_path(&["camera", "missing"]).is_none());
        assert!(owner.property_by_identifier("fov", false).is_none());
        assert!(owner.property_by_identifier("fov", true).is_some());

        let paths = owner.property_paths_recursive();
        assert_eq!(paths.len(), owner.properties_recursive().len());
        assert!(paths.contains(&vec!["camera".to_string(), "fov".to_string()]));
        Ok(())
    }

    #[test]
    fn test_properties_by_type() -> Result<(), PropertyError> {
        let owner = camera_owner()?;
        assert_eq!(owner.properties_by_type(PropertyType::Float, false).len(), 1);
        assert_eq!(owner.properties_by_type(PropertyType::Float, true).len(), 2);
        assert_eq!(owner.properties_by_type(PropertyType::Event, true).len(), 2);
        Ok(())
    }

    #[test]
    fn test_invalidation_is_monotonic() {
        let mut owner = PropertyOwner::new();
        assert!(owner.invalidate(InvalidationLevel::InvalidResources));
        assert!(!owner.invalidate(InvalidationLevel::InvalidOutput));
        assert_eq!(owner.invalidation_level(), InvalidationLevel::InvalidResources);
        owner.set_valid();
        assert!(owner.is_valid());
    }

    #[test]
    fn test_set_value_raises_by_declared_level() -> Result<(), PropertyError> {
        let mut owner = camera_owner()?;
        assert_eq!(
            owner.set_value(&["iso"], PropertyValue::Float(0.7))?,
            Some(InvalidationLevel::InvalidOutput)
        );
        assert_eq!(
            owner.set_value(&["resolution"], PropertyValue::Int(128))?,
            Some(InvalidationLevel::InvalidResources)
        );
        assert_eq!(owner.set_value(&["resolution"], PropertyValue::Int(128))?, None);
        assert_eq!(owner.invalidation_level(), InvalidationLevel::InvalidResources);
        Ok(())
    }

    #[test]
    fn test_nested_write_invalidates_every_level() -> Result<(), PropertyError> {
        let mut owner = camera_owner()?;
        owner.set_value(&["camera", "fov"], PropertyValue::Float(45.0))?;
        assert_eq!(owner.invalidation_level(), InvalidationLevel::InvalidOutput);
        let camera = owner
            .property("camera")
            .and_then(|property| property.owner())
            .map(|owner| owner.invalidation_level());
        assert_eq!(camera, Some(InvalidationLevel::InvalidOutput));

        owner.set_valid();
        assert!(owner.properties_recursive().iter().all(|p| !p.is_modified()));
        Ok(())
    }

    #[test]
    fn test_write_errors() -> Result<(), PropertyError> {
        let mut owner = camera_owner()?;
        assert_eq!(
            owner.set_value(&["iso", "x"], PropertyValue::Float(1.0)),
            Err(PropertyError::NotAComposite("iso".into()))
        );
        assert_eq!(
            owner.set_value(&["camera", "zoom"], PropertyValue::Float(1.0)),
            Err(PropertyError::NotFound("camera.zoom".into()))
        );
        assert!(owner.is_valid());
        Ok(())
    }

    #[test]
    fn test_update_property_invalidates_on_value_change() -> Result<(), PropertyError> {
        let mut owner = camera_owner()?;
        let (changed, level) = owner.update_property(&["iso"], |property| property.set(0.9))?;
        assert_eq!(changed, Ok(true));
        assert_eq!(level, Some(InvalidationLevel::InvalidOutput));
        assert_eq!(owner.invalidation_level(), InvalidationLevel::InvalidOutput);

        owner.set_valid();
        let (_, level) = owner.update_property(&["camera", "fov"], |property| {
            property.set_read_only(true);
        })?;
        assert_eq!(level, None);
        assert!(owner.is_valid());
        assert!(owner
            .property_by_path(&["camera", "fov"])
            .is_some_and(Property::is_read_only));

        let (_, level) = owner.update_property(&["camera"], |camera| {
            camera
                .owner_mut()
                .map(|nested| nested.set_value(&["fov"], PropertyValue::Float(30.0)))
        })?;
        assert_eq!(level, Some(InvalidationLevel::InvalidOutput));
        assert!(!owner.is_valid());
        Ok(())
    }

    #[test]
    fn test_identifiers_with_dots_are_rejected() {
        let mut owner = PropertyOwner::new();
        assert_eq!(
            owner.add_property(Property::new("camera.fov", "FoV", 60.0)),
            Err(PropertyError::InvalidIdentifier("camera.fov".into()))
        );
        assert!(owner.is_empty());
    }

    #[test]
    fn test_remove_property_at_nested_path() -> Result<(), PropertyError> {
        let mut owner = camera_owner()?;
        assert!(owner.remove_property_at(&["camera", "fov"]).is_some());
        assert!(owner.property_by_path(&["camera", "fov"]).is_none());
        assert!(owner.remove_property_at(&["iso", "x"]).is_none());
        Ok(())
    }

    #[test]
    fn test_invoke_event_visits_events_then_composites() -> Result<(), PropertyError> {
        let mut owner = camera_owner()?;
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let _subscription = owner
            .property_by_path(&["camera", "reset"])
            .map(|property| {
                property.subscribe(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            });

        let mut event = InteractionEvent::new("key-r");
        assert_eq!(
            owner.invoke_event(&mut event),
            Some(InvalidationLevel::InvalidOutput)
        );
        assert!(event.is_used());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let mut unknown = InteractionEvent::new("key-q");
        assert_eq!(owner.invoke_event(&mut unknown), None);
        assert!(!unknown.is_used());
        Ok(())
    }

    #[test]
    fn test_reset_all_properties() -> Result<(), PropertyError> {
        let mut owner = camera_owner()?;
        owner.set_value(&["resolution"], PropertyValue::Int(256))?;
        owner.set_valid();
        assert_eq!(
            owner.reset_all_properties(),
            Some(InvalidationLevel::InvalidResources)
        );
        assert_eq!(
            owner.property("resolution").map(|p| p.value().clone()),
            Some(PropertyValue::Int(64))
        );
        Ok(())
    }
}

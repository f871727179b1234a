use crate::error::NetworkError;
use crate::network::{NetworkEvent, ProcessorNetwork};
use procflow_property::{InvalidationLevel, Property, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::{debug, warn};

/// Address of a property: owning processor plus identifiers from the
/// processor down through composites.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyPath {
    pub processor: String,
    pub path: Vec<String>,
}

impl PropertyPath {
    pub fn new(processor: &str, path: &[&str]) -> Self {
        Self {
            processor: processor.to_string(),
            path: path.iter().map(|segment| segment.to_string()).collect(),
        }
    }

    /// Parses `processor.property[.child...]`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut segments = text.split('.');
        let processor = segments.next().filter(|s| !s.is_empty())?;
        let path: Vec<String> = segments.map(str::to_string).collect();
        if path.is_empty() || path.iter().any(String::is_empty) {
            return None;
        }
        Some(Self {
            processor: processor.to_string(),
            path,
        })
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.processor, self.path.join("."))
    }
}

/// A directed value link: whenever `source` changes its value is copied to
/// `destination`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyLink {
    pub source: PropertyPath,
    pub destination: PropertyPath,
}

impl PropertyLink {
    pub fn new(source: PropertyPath, destination: PropertyPath) -> Self {
        Self {
            source,
            destination,
        }
    }

    pub fn involves_processor(&self, processor: &str) -> bool {
        self.source.processor == processor || self.destination.processor == processor
    }

    pub fn involves_property(&self, property: &PropertyPath) -> bool {
        starts_with(&self.source, property) || starts_with(&self.destination, property)
    }

    pub(crate) fn rename_processor(&mut self, old: &str, new: &str) {
        for path in [&mut self.source, &mut self.destination] {
            if path.processor == old {
                path.processor = new.to_string();
            }
        }
    }
}

fn starts_with(path: &PropertyPath, prefix: &PropertyPath) -> bool {
    path.processor == prefix.processor && path.path.starts_with(&prefix.path)
}

impl fmt::Display for PropertyLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

impl ProcessorNetwork {
    pub fn property(&self, path: &PropertyPath) -> Option<&Property> {
        self.processors
            .get(&path.processor)?
            .properties
            .property_by_path(&path.path)
    }

    /// Adds a directed link and immediately copies the source value over.
    pub fn add_link(
        &mut self,
        source: &PropertyPath,
        destination: &PropertyPath,
    ) -> Result<(), NetworkError> {
        self.check_link(source, destination).inspect_err(|error| {
            warn!(%source, %destination, %error, "property link rejected");
        })?;

        let link = PropertyLink::new(source.clone(), destination.clone());
        self.observers
            .notify(&NetworkEvent::WillAddLink(link.clone()));
        self.links.push(link.clone());
        self.modified = true;
        self.observers.notify(&NetworkEvent::DidAddLink(link));
        self.observers.notify(&NetworkEvent::Changed);

        self.propagate_links(source);
        Ok(())
    }

    fn check_link(&self, source: &PropertyPath, destination: &PropertyPath) -> Result<(), NetworkError> {
        let invalid = |reason: &str| NetworkError::InvalidLink {
            from: source.clone(),
            to: destination.clone(),
            reason: reason.to_string(),
        };
        if source == destination {
            return Err(invalid("a property cannot be linked to itself"));
        }
        let from = self
            .property(source)
            .ok_or_else(|| NetworkError::PropertyNotFound(source.clone()))?;
        let to = self
            .property(destination)
            .ok_or_else(|| NetworkError::PropertyNotFound(destination.clone()))?;
        if !from.holds_value() || !to.holds_value() {
            return Err(invalid("only value properties can be linked"));
        }
        if !from.value().is_convertible_to(to.value()) {
            return Err(invalid(&format!(
                "{} values cannot be converted to {}",
                from.value().kind_name(),
                to.value().kind_name()
            )));
        }
        if self.is_linked(source, destination) {
            return Err(NetworkError::LinkExists {
                from: source.clone(),
                to: destination.clone(),
            });
        }
        Ok(())
    }

    pub fn remove_link(
        &mut self,
        source: &PropertyPath,
        destination: &PropertyPath,
    ) -> Option<PropertyLink> {
        let index = self
            .links
            .iter()
            .position(|link| &link.source == source && &link.destination == destination)?;
        let link = self.links[index].clone();
        self.observers
            .notify(&NetworkEvent::WillRemoveLink(link.clone()));
        self.links.remove(index);
        self.modified = true;
        self.observers
            .notify(&NetworkEvent::DidRemoveLink(link.clone()));
        self.observers.notify(&NetworkEvent::Changed);
        Some(link)
    }

    pub fn links(&self) -> &[PropertyLink] {
        &self.links
    }

    pub fn is_linked(&self, source: &PropertyPath, destination: &PropertyPath) -> bool {
        self.links
            .iter()
            .any(|link| &link.source == source && &link.destination == destination)
    }

    pub fn is_linked_bidirectional(&self, a: &PropertyPath, b: &PropertyPath) -> bool {
        self.is_linked(a, b) && self.is_linked(b, a)
    }

    /// Every property a change of `path` eventually reaches, in breadth-first order.
    pub fn properties_linked_to(&self, path: &PropertyPath) -> Vec<PropertyPath> {
        let mut visited: HashSet<&PropertyPath> = HashSet::from([path]);
        let mut queue = VecDeque::from([path]);
        let mut result = Vec::new();
        while let Some(current) = queue.pop_front() {
            for link in self.links.iter().filter(|link| &link.source == current) {
                if visited.insert(&link.destination) {
                    result.push(link.destination.clone());
                    queue.push_back(&link.destination);
                }
            }
        }
        result
    }

    /// Links in either direction between two processors.
    pub fn links_between_processors(&self, first: &str, second: &str) -> Vec<&PropertyLink> {
        self.links
            .iter()
            .filter(|link| {
                (link.source.processor == first && link.destination.processor == second)
                    || (link.source.processor == second && link.destination.processor == first)
            })
            .collect()
    }

    /// True while a link propagation is in progress.
    pub fn is_linking(&self) -> bool {
        self.linking
    }

    /// Writes a property value and propagates it along links.
    pub fn set_property_value(
        &mut self,
        path: &PropertyPath,
        value: impl Into<PropertyValue>,
    ) -> Result<(), NetworkError> {
        let changed = self.write_property(path, value.into(), false)?;
        if changed.is_some() {
            self.modified = true;
            self.propagate_links(path);
        }
        Ok(())
    }

    /// Edits a property in place, for example its read-only flag. A value
    /// change made by `f` invalidates and propagates like
    /// [`ProcessorNetwork::set_property_value`].
    pub fn update_property<R>(
        &mut self,
        path: &PropertyPath,
        f: impl FnOnce(&mut Property) -> R,
    ) -> Result<R, NetworkError> {
        let node = self
            .processors
            .get_mut(&path.processor)
            .ok_or_else(|| NetworkError::ProcessorNotFound(path.processor.clone()))?;
        let (result, level) = node
            .properties
            .update_property(&path.path, f)
            .map_err(|error| match error {
                procflow_property::PropertyError::NotFound(_) => {
                    NetworkError::PropertyNotFound(path.clone())
                }
                other => NetworkError::Property(other),
            })?;
        if let Some(level) = level {
            self.modified = true;
            self.invalidate_cascade(&path.processor, level);
            self.propagate_links(path);
        }
        Ok(result)
    }

    /// Writes a property and invalidates its processor by the property's
    /// level when the value changed.
    pub(crate) fn write_property(
        &mut self,
        path: &PropertyPath,
        value: PropertyValue,
        force: bool,
    ) -> Result<Option<InvalidationLevel>, NetworkError> {
        let node = self
            .processors
            .get_mut(&path.processor)
            .ok_or_else(|| NetworkError::ProcessorNotFound(path.processor.clone()))?;
        let level = if force {
            node.properties.assign_value(&path.path, value)
        } else {
            node.properties.set_value(&path.path, value)
        }
        .map_err(|error| match error {
            procflow_property::PropertyError::NotFound(_) => {
                NetworkError::PropertyNotFound(path.clone())
            }
            other => NetworkError::Property(other),
        })?;
        if let Some(level) = level {
            self.invalidate_cascade(&path.processor, level);
        }
        Ok(level)
    }

    /// Copies the value at `start` along outgoing links, transitively.
    ///
    /// Each property is written at most once per propagation, so cycles of
    /// links terminate. Writes made while a propagation is running do not
    /// start a nested one.
    pub(crate) fn propagate_links(&mut self, start: &PropertyPath) {
        if self.linking || self.links.is_empty() {
            return;
        }
        self.linking = true;

        let mut visited: HashSet<PropertyPath> = HashSet::from([start.clone()]);
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(current) = queue.pop_front() {
            let Some(value) = self.property(&current).map(|p| p.value().clone()) else {
                continue;
            };
            let targets: Vec<PropertyPath> = self
                .links
                .iter()
                .filter(|link| link.source == current)
                .map(|link| link.destination.clone())
                .collect();
            for target in targets {
                if !visited.insert(target.clone()) {
                    continue;
                }
                match self.write_property(&target, value.clone(), true) {
                    Ok(_) => queue.push_back(target),
                    Err(error) => {
                        debug!(from = %current, to = %target, %error, "link propagation skipped");
                    }
                }
            }
        }

        self.linking = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_property_path() {
        assert_eq!(
            PropertyPath::parse("Raycaster.camera.fov"),
            Some(PropertyPath::new("Raycaster", &["camera", "fov"]))
        );
        assert_eq!(PropertyPath::parse("Raycaster"), None);
        assert_eq!(PropertyPath::parse("Raycaster..fov"), None);
        assert_eq!(
            PropertyPath::new("A", &["x", "y"]).to_string(),
            "A.x.y"
        );
    }

    #[test]
    fn test_link_involves_nested_property() {
        let link = PropertyLink::new(
            PropertyPath::new("A", &["camera", "fov"]),
            PropertyPath::new("B", &["fov"]),
        );
        assert!(link.involves_property(&PropertyPath::new("A", &["camera"])));
        assert!(!link.involves_property(&PropertyPath::new("A", &["light"])));
        assert!(link.involves_processor("B"));
    }
}

//! Properties, property owners and metadata for procflow processor networks.
//!
//! A [`PropertyOwner`] holds an ordered list of [`Property`] values and an
//! aggregate [`InvalidationLevel`]. Changing a property raises the level of
//! every owner above it; the network uses that level to decide which
//! processors have to run again.

pub mod error;
pub mod invalidation;
pub mod metadata;
pub mod observer;
pub mod owner;
pub mod property;
pub mod state;
pub mod value;

pub use error::PropertyError;
pub use invalidation::InvalidationLevel;
pub use metadata::{MetaData, MetaDataMap, MetaDataOwner, MetaDataType};
pub use observer::{Observers, Subscription};
pub use owner::{InteractionEvent, PropertyOwner, PropertyOwnerEvent};
pub use property::{
    Property, PropertyEvent, PropertyKind, PropertySerializationMode, PropertyType,
};
pub use state::{PropertyDefinition, PropertyState};
pub use value::PropertyValue;

use crate::port::PortAddress;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A directed edge from an outport to an inport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortConnection {
    pub outport: PortAddress,
    pub inport: PortAddress,
}

impl PortConnection {
    pub fn new(outport: PortAddress, inport: PortAddress) -> Self {
        Self { outport, inport }
    }

    pub fn involves_processor(&self, processor: &str) -> bool {
        self.outport.processor == processor || self.inport.processor == processor
    }

    pub(crate) fn rename_processor(&mut self, old: &str, new: &str) {
        for address in [&mut self.outport, &mut self.inport] {
            if address.processor == old {
                address.processor = new.to_string();
            }
        }
    }
}

impl fmt::Display for PortConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.outport, self.inport)
    }
}

//! The storyboard capture document.
//!
//! Every run pass produces one [`Storyboard`]: a Layer -> Group -> element
//! hierarchy that records what the scripts declared, in the order they
//! declared it. The document is append-only during a pass; consumers read it
//! once the pass has finished.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::element::{Layer, ScriptedElement};

/// A named, ordered bucket of elements within one layer.
///
/// Groups exist for editor organization. Two scripts asking for the same
/// `(layer, name)` pair share one group; their elements interleave in
/// emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub layer: Layer,
    pub name: String,
    elements: Vec<ScriptedElement>,
}

impl Group {
    fn new(layer: Layer, name: &str) -> Self {
        Group {
            layer,
            name: name.to_string(),
            elements: Vec::new(),
        }
    }

    /// Elements in emission order.
    pub fn elements(&self) -> &[ScriptedElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// The element capture document of one run pass.
///
/// Groups are keyed by `(layer, name)` and kept in creation order. No sorting
/// by start time ever happens here; emission order *is* the document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Storyboard {
    groups: Vec<Group>,
}

impl Storyboard {
    pub fn new() -> Self {
        Storyboard::default()
    }

    /// Looks up the group for `(layer, name)`, creating it on first use.
    ///
    /// Idempotent: repeated calls with the same pair return the same group and
    /// never disturb its contents.
    pub fn get_group(&mut self, layer: Layer, name: &str) -> &mut Group {
        let position = self
            .groups
            .iter()
            .position(|group| group.layer == layer && group.name == name);
        match position {
            Some(index) => &mut self.groups[index],
            None => {
                self.groups.push(Group::new(layer, name));
                // Just pushed, so the vec is non-empty.
                self.groups.last_mut().unwrap()
            }
        }
    }

    /// Appends an element to its group, creating the group if needed.
    pub fn append(&mut self, element: ScriptedElement) {
        let layer = element.layer;
        let group = element.group.clone();
        self.get_group(layer, &group).elements.push(element);
    }

    /// All groups in creation order, layers interleaved as the scripts
    /// produced them.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Groups of a single layer, in creation order.
    pub fn layer_groups(&self, layer: Layer) -> impl Iterator<Item = &Group> {
        self.groups.iter().filter(move |group| group.layer == layer)
    }

    /// All groups in render order: the fixed layer order first, creation
    /// order within each layer.
    pub fn ordered_groups(&self) -> impl Iterator<Item = &Group> {
        Layer::ALL
            .into_iter()
            .flat_map(move |layer| self.layer_groups(layer))
    }

    pub fn element_count(&self) -> usize {
        self.groups.iter().map(Group::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.element_count() == 0
    }
}

/// Shared handle to the document being filled during a pass.
pub type SharedStoryboard = Arc<Mutex<Storyboard>>;

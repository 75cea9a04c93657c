//! Component registry: builtin operation descriptors plus derived components
//! defined at run time through the `component source` protocol.

use std::collections::BTreeMap;

use crate::foundation::error::{PixflowError, PixflowResult};
use crate::pipeline::ops::OpKind;

/// Which way data flows through a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    In,
    Out,
}

/// What a port carries: pixel buffers travel along edges, value ports
/// receive IIP literals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Buffer,
    Number,
    String,
    Color,
}

/// Static metadata for one port of a component.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PortDescriptor {
    pub name: String,
    pub direction: PortDirection,
    pub kind: PortKind,
    /// Required buffer inputs must be connected before the node can render.
    pub required: bool,
}

/// Static metadata for a component: name plus typed ports.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ComponentDescriptor {
    pub name: String,
    pub description: String,
    pub ports: Vec<PortDescriptor>,
}

impl ComponentDescriptor {
    /// Look up an input port by name.
    pub fn in_port(&self, name: &str) -> Option<&PortDescriptor> {
        self.ports
            .iter()
            .find(|p| p.direction == PortDirection::In && p.name == name)
    }

    /// Look up an output port by name.
    pub fn out_port(&self, name: &str) -> Option<&PortDescriptor> {
        self.ports
            .iter()
            .find(|p| p.direction == PortDirection::Out && p.name == name)
    }
}

/// Source form of a derived component: an existing component plus default
/// literals applied at instantiation time.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DerivedSpec {
    pub base: String,
    #[serde(default)]
    pub defaults: BTreeMap<String, serde_json::Value>,
}

/// How to instantiate a component in the pipeline engine: the builtin
/// operation at the bottom of the (possibly derived) chain, plus merged
/// default literals with the outermost definition winning.
#[derive(Clone, Debug)]
pub struct InstantiationPlan {
    pub kind: OpKind,
    pub defaults: BTreeMap<String, serde_json::Value>,
}

/// Registry mapping component names to descriptors.
///
/// Created with the builtin set; grows through [`ComponentLibrary::set_source`].
pub struct ComponentLibrary {
    components: BTreeMap<String, ComponentDescriptor>,
    derived: BTreeMap<String, DerivedSpec>,
}

impl Default for ComponentLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentLibrary {
    /// A library holding the builtin components.
    pub fn new() -> Self {
        let mut components = BTreeMap::new();
        for kind in OpKind::ALL {
            let d = builtin_descriptor(kind);
            components.insert(d.name.clone(), d);
        }
        Self {
            components,
            derived: BTreeMap::new(),
        }
    }

    /// Resolve a component name to its descriptor.
    pub fn resolve(&self, name: &str) -> PixflowResult<&ComponentDescriptor> {
        self.components
            .get(name)
            .ok_or_else(|| PixflowError::unknown_component(name.to_owned()))
    }

    /// All registered descriptors, builtin and derived, in name order.
    pub fn list(&self) -> impl Iterator<Item = &ComponentDescriptor> {
        self.components.values()
    }

    /// Resolve the builtin operation and merged defaults behind a component.
    pub fn instantiation_plan(&self, name: &str) -> PixflowResult<InstantiationPlan> {
        let mut defaults = BTreeMap::new();
        let mut current = name;
        let mut visited = Vec::new();
        // Walk the derived chain; definitions closer to `name` win.
        loop {
            if visited.contains(&current) {
                return Err(PixflowError::cycle_detected(format!(
                    "derived component chain through '{current}'"
                )));
            }
            visited.push(current);
            if let Some(spec) = self.derived.get(current) {
                for (port, value) in &spec.defaults {
                    defaults
                        .entry(port.clone())
                        .or_insert_with(|| value.clone());
                }
                current = &spec.base;
                continue;
            }
            self.resolve(current)?;
            let kind = OpKind::from_component(current).ok_or_else(|| {
                PixflowError::unknown_component(format!("'{current}' has no builtin operation"))
            })?;
            return Ok(InstantiationPlan { kind, defaults });
        }
    }

    /// Define (or redefine) a derived component from its JSON source.
    ///
    /// The source must parse as a [`DerivedSpec`] whose base already exists;
    /// the new component inherits the base descriptor's ports. Builtin names
    /// cannot be shadowed.
    pub fn set_source(&mut self, name: &str, code: &str) -> PixflowResult<&ComponentDescriptor> {
        if OpKind::from_component(name).is_some() {
            return Err(PixflowError::duplicate_id(format!(
                "cannot redefine builtin component '{name}'"
            )));
        }
        let spec: DerivedSpec = serde_json::from_str(code)
            .map_err(|e| PixflowError::serde(format!("invalid component source: {e}")))?;
        let base = self.resolve(&spec.base)?.clone();
        // Existing derivation chains are acyclic, so walking the new spec's
        // base chain terminates; rejecting any chain that reaches `name`
        // keeps them that way across redefinitions.
        let mut current = spec.base.as_str();
        loop {
            if current == name {
                return Err(PixflowError::cycle_detected(format!(
                    "deriving '{name}' from '{}' would close a cycle",
                    spec.base
                )));
            }
            match self.derived.get(current) {
                Some(next) => current = next.base.as_str(),
                None => break,
            }
        }
        let descriptor = ComponentDescriptor {
            name: name.to_owned(),
            description: format!("derived from {}", spec.base),
            ports: base.ports,
        };
        self.components.insert(name.to_owned(), descriptor);
        self.derived.insert(name.to_owned(), spec);
        Ok(&self.components[name])
    }

    /// Source code of a component: the stored spec for derived components, a
    /// generated equivalent for builtins.
    pub fn get_source(&self, name: &str) -> PixflowResult<String> {
        if let Some(spec) = self.derived.get(name) {
            return serde_json::to_string(spec)
                .map_err(|e| PixflowError::serde(e.to_string()));
        }
        self.resolve(name)?;
        let spec = DerivedSpec {
            base: name.to_owned(),
            defaults: BTreeMap::new(),
        };
        serde_json::to_string(&spec).map_err(|e| PixflowError::serde(e.to_string()))
    }
}

fn port(name: &str, direction: PortDirection, kind: PortKind, required: bool) -> PortDescriptor {
    PortDescriptor {
        name: name.to_owned(),
        direction,
        kind,
        required,
    }
}

fn builtin_descriptor(kind: OpKind) -> ComponentDescriptor {
    use PortDirection::{In, Out};
    let (name, description, ports) = match kind {
        OpKind::Solid => (
            "canvas/solid",
            "solid-color buffer of the given dimensions",
            vec![
                port("width", In, PortKind::Number, true),
                port("height", In, PortKind::Number, true),
                port("color", In, PortKind::Color, false),
                port("output", Out, PortKind::Buffer, false),
            ],
        ),
        OpKind::Passthrough => (
            "filter/passthrough",
            "copies its input unchanged",
            vec![
                port("input", In, PortKind::Buffer, true),
                port("output", Out, PortKind::Buffer, false),
            ],
        ),
        OpKind::Invert => (
            "filter/invert",
            "inverts RGB, preserves alpha",
            vec![
                port("input", In, PortKind::Buffer, true),
                port("output", Out, PortKind::Buffer, false),
            ],
        ),
        OpKind::Opacity => (
            "filter/opacity",
            "scales alpha by a 0..1 amount",
            vec![
                port("input", In, PortKind::Buffer, true),
                port("amount", In, PortKind::Number, false),
                port("output", Out, PortKind::Buffer, false),
            ],
        ),
        OpKind::Crop => (
            "filter/crop",
            "intersects the input with a rectangle",
            vec![
                port("input", In, PortKind::Buffer, true),
                port("x", In, PortKind::Number, false),
                port("y", In, PortKind::Number, false),
                port("width", In, PortKind::Number, false),
                port("height", In, PortKind::Number, false),
                port("output", Out, PortKind::Buffer, false),
            ],
        ),
        OpKind::Over => (
            "comp/over",
            "source-over composite of aux onto input",
            vec![
                port("input", In, PortKind::Buffer, true),
                port("aux", In, PortKind::Buffer, true),
                port("output", Out, PortKind::Buffer, false),
            ],
        ),
    };
    ComponentDescriptor {
        name: name.to_owned(),
        description: description.to_owned(),
        ports,
    }
}

//! Action definitions: named templates describing how an action is presented and
//! dismissed, plus the registry that resolves them by name.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use campaign_core::error::{MessagingError, MessagingResult};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::presentation::Presentation;

/// Called to show an action. Returns whether the action was actually presented.
pub type PresentHandler = Arc<dyn Fn(&Presentation) -> anyhow::Result<bool> + Send + Sync>;
/// Called to force-dismiss a presenting action.
pub type DismissHandler = Arc<dyn Fn(&Presentation) -> anyhow::Result<()> + Send + Sync>;

/// Bit flags classifying a definition. A template can be both a message and an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionKind(u32);

impl ActionKind {
    pub const MESSAGE: ActionKind = ActionKind(1);
    pub const ACTION: ActionKind = ActionKind(1 << 1);

    pub fn from_bits(bits: u32) -> Self {
        ActionKind(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: ActionKind) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ActionKind {
    type Output = ActionKind;

    fn bitor(self, rhs: ActionKind) -> ActionKind {
        ActionKind(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    Integer,
    Float,
    String,
    Bool,
    File,
    Group,
    List,
    Action,
    Color,
}

impl ArgKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArgKind::Integer => "integer",
            ArgKind::Float => "float",
            ArgKind::String => "string",
            ArgKind::Bool => "bool",
            ArgKind::File => "file",
            ArgKind::Group => "group",
            ArgKind::List => "list",
            ArgKind::Action => "action",
            ArgKind::Color => "color",
        }
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Bool(_) => ArgKind::Bool,
            Value::Number(n) if n.is_f64() => ArgKind::Float,
            Value::Number(_) => ArgKind::Integer,
            Value::Object(_) => ArgKind::Group,
            Value::Array(_) => ArgKind::List,
            Value::String(_) | Value::Null => ArgKind::String,
        }
    }
}

/// One argument of a definition's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionArg {
    pub name: String,
    pub kind: ArgKind,
    pub default_value: Value,
}

impl ActionArg {
    /// Argument whose kind is inferred from its default value.
    pub fn arg_named(name: impl Into<String>, default_value: impl Into<Value>) -> Self {
        let default_value = default_value.into();
        Self {
            name: name.into(),
            kind: ArgKind::from_value(&default_value),
            default_value,
        }
    }

    pub fn color_arg_named(name: impl Into<String>, argb: u32) -> Self {
        Self {
            name: name.into(),
            kind: ArgKind::Color,
            default_value: Value::from(argb),
        }
    }

    pub fn file_arg_named(name: impl Into<String>, default_filename: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ArgKind::File,
            default_value: Value::String(default_filename.into()),
        }
    }

    /// Argument that names another action to run (e.g. a button's follow-up).
    pub fn action_arg_named(name: impl Into<String>, default_action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ArgKind::Action,
            default_value: Value::String(default_action.into()),
        }
    }
}

/// A registered action template.
#[derive(Clone)]
pub struct ActionDefinition {
    name: String,
    kind: ActionKind,
    args: Vec<ActionArg>,
    options: Option<Map<String, Value>>,
    present_handler: Option<PresentHandler>,
    dismiss_handler: Option<DismissHandler>,
}

impl ActionDefinition {
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            args: Vec::new(),
            options: None,
            present_handler: None,
            dismiss_handler: None,
        }
    }

    pub fn with_args(mut self, args: Vec<ActionArg>) -> Self {
        self.args = args;
        self
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn on_present<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Presentation) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.present_handler = Some(Arc::new(handler));
        self
    }

    pub fn on_dismiss<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Presentation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dismiss_handler = Some(Arc::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn args(&self) -> &[ActionArg] {
        &self.args
    }

    pub fn options(&self) -> Option<&Map<String, Value>> {
        self.options.as_ref()
    }

    pub fn present_handler(&self) -> Option<&PresentHandler> {
        self.present_handler.as_ref()
    }

    pub fn dismiss_handler(&self) -> Option<&DismissHandler> {
        self.dismiss_handler.as_ref()
    }

    /// Structural description of the definition, in the shape the server declares:
    /// `{kind, values, kinds, order, options}`. Dotted argument names nest into
    /// `values` groups; `kinds` stays keyed by the full argument name.
    pub fn definition_map(&self) -> Value {
        let mut values = Map::new();
        let mut kinds = Map::new();
        let mut order = Vec::with_capacity(self.args.len());

        for arg in &self.args {
            insert_nested(&mut values, &arg.name, arg.default_value.clone());
            kinds.insert(arg.name.clone(), Value::String(arg.kind.as_str().to_string()));
            order.push(Value::String(arg.name.clone()));
        }

        serde_json::json!({
            "kind": self.kind.bits(),
            "values": values,
            "kinds": kinds,
            "order": order,
            "options": self.options.clone().map(Value::Object).unwrap_or(Value::Null),
        })
    }
}

impl fmt::Debug for ActionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("args", &self.args.len())
            .field("has_present_handler", &self.present_handler.is_some())
            .field("has_dismiss_handler", &self.dismiss_handler.is_some())
            .finish()
    }
}

fn insert_nested(values: &mut Map<String, Value>, name: &str, value: Value) {
    let mut components: Vec<&str> = name.split('.').collect();
    let leaf = components.pop().unwrap_or(name);

    let mut group = values;
    for component in components {
        let entry = group
            .entry(component.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(map) = entry else {
            return;
        };
        group = map;
    }
    group.insert(leaf.to_string(), value);
}

/// Registry of action definitions keyed by name (case-sensitive, last writer wins),
/// with an optional server-declared snapshot for drift detection.
#[derive(Default)]
pub struct Definitions {
    definitions: DashMap<String, Arc<ActionDefinition>>,
    server_definitions: RwLock<Option<Value>>,
}

impl Definitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition, replacing any existing definition with the same name.
    pub fn define(&self, definition: ActionDefinition) -> MessagingResult<()> {
        if definition.name.is_empty() {
            return Err(MessagingError::Definition(
                "action definition name must not be empty".to_string(),
            ));
        }
        let name = definition.name.clone();
        let replaced = self
            .definitions
            .insert(name.clone(), Arc::new(definition))
            .is_some();
        info!(action = %name, replaced, "Action definition registered");
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<Arc<ActionDefinition>> {
        self.definitions.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ActionDefinition>> {
        self.definitions.remove(name).map(|(_, definition)| definition)
    }

    pub fn clear(&self) {
        self.definitions.clear();
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// All local definitions as `{name: definition_map}`.
    pub fn action_definition_maps(&self) -> Value {
        let maps: Map<String, Value> = self
            .definitions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().definition_map()))
            .collect();
        Value::Object(maps)
    }

    pub fn set_server_definitions(&self, definitions: Option<Value>) {
        *self.server_definitions.write() = definitions;
    }

    /// Compares local definitions with the server snapshot. Both sides must declare the
    /// same names, and for each name `kind`, `values`, `kinds` and `options` must be deeply
    /// equal, with a missing field equal to `null`. Argument `order` is not compared.
    pub fn are_local_and_server_definitions_equal(&self) -> bool {
        let server = self.server_definitions.read();
        let Some(Value::Object(server)) = server.as_ref() else {
            debug!("No server action definitions to compare against");
            return false;
        };
        let Value::Object(local) = self.action_definition_maps() else {
            return false;
        };
        definition_maps_equal(&local, server)
    }
}

impl fmt::Debug for Definitions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definitions")
            .field("definitions", &self.names())
            .field("has_server_definitions", &self.server_definitions.read().is_some())
            .finish()
    }
}

const COMPARED_FIELDS: [&str; 4] = ["kind", "values", "kinds", "options"];
static NULL: Value = Value::Null;

fn definition_maps_equal(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|(name, a_item)| {
        let (Some(a_item), Some(b_item)) = (
            a_item.as_object(),
            b.get(name).and_then(Value::as_object),
        ) else {
            return false;
        };
        COMPARED_FIELDS.iter().all(|field| {
            a_item.get(*field).unwrap_or(&NULL) == b_item.get(*field).unwrap_or(&NULL)
        })
    })
}

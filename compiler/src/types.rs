// types.rs — Pin type descriptors and generic type expressions
//
// A `PinType` is the full descriptor of a connection point: its category, the
// optional sub-category and sub-category object, the container shape, and for
// maps the terminal (value-side) type. `TypeExpr` is how primitive signatures
// declare pins whose types are resolved from whatever gets linked to them.
//
// Preconditions: none (types only).
// Postconditions: `instantiate` never yields a partially resolved scalar; a
//   pin is either wildcard or carries a concrete category.
// Failure modes: conflicting generic bindings → `BindConflict`.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Categories ──────────────────────────────────────────────────────────────

/// Primary category of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinCategory {
    Exec,
    Wildcard,
    Bool,
    Byte,
    Int,
    Int64,
    Float,
    Name,
    String,
    Text,
    Enum,
    Struct,
    Object,
    Class,
}

impl PinCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            PinCategory::Exec => "exec",
            PinCategory::Wildcard => "wildcard",
            PinCategory::Bool => "bool",
            PinCategory::Byte => "byte",
            PinCategory::Int => "int",
            PinCategory::Int64 => "int64",
            PinCategory::Float => "float",
            PinCategory::Name => "name",
            PinCategory::String => "string",
            PinCategory::Text => "text",
            PinCategory::Enum => "enum",
            PinCategory::Struct => "struct",
            PinCategory::Object => "object",
            PinCategory::Class => "class",
        }
    }
}

/// Container shape of a data pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    #[default]
    None,
    Array,
    Set,
    Map,
}

// ── Terminal type ───────────────────────────────────────────────────────────

/// The value-side type of an associative mapping, tracked independently of
/// the key-side type carried by the owning `PinType`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalType {
    pub category: PinCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category_object: Option<String>,
}

impl Default for TerminalType {
    fn default() -> Self {
        TerminalType::wildcard()
    }
}

impl TerminalType {
    pub fn wildcard() -> Self {
        TerminalType {
            category: PinCategory::Wildcard,
            sub_category: None,
            sub_category_object: None,
        }
    }

    /// The terminal view of a pin type: its primary fields only.
    pub fn of(ty: &PinType) -> Self {
        TerminalType {
            category: ty.category,
            sub_category: ty.sub_category.clone(),
            sub_category_object: ty.sub_category_object.clone(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.category == PinCategory::Wildcard
    }
}

// ── Pin type ────────────────────────────────────────────────────────────────

/// Full type descriptor of a connection point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PinType {
    pub category: PinCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category_object: Option<String>,
    #[serde(default)]
    pub container: ContainerType,
    #[serde(default)]
    pub value_type: TerminalType,
}

impl Default for PinType {
    fn default() -> Self {
        PinType::wildcard()
    }
}

impl PinType {
    pub fn scalar(category: PinCategory) -> Self {
        PinType {
            category,
            sub_category: None,
            sub_category_object: None,
            container: ContainerType::None,
            value_type: TerminalType::wildcard(),
        }
    }

    pub fn exec() -> Self {
        Self::scalar(PinCategory::Exec)
    }

    pub fn wildcard() -> Self {
        Self::scalar(PinCategory::Wildcard)
    }

    pub fn bool() -> Self {
        Self::scalar(PinCategory::Bool)
    }

    pub fn int() -> Self {
        Self::scalar(PinCategory::Int)
    }

    pub fn float() -> Self {
        Self::scalar(PinCategory::Float)
    }

    pub fn name() -> Self {
        Self::scalar(PinCategory::Name)
    }

    pub fn string() -> Self {
        Self::scalar(PinCategory::String)
    }

    /// A struct-typed pin, e.g. `struct:Vector`.
    pub fn structure(object: impl Into<String>) -> Self {
        PinType {
            sub_category_object: Some(object.into()),
            ..Self::scalar(PinCategory::Struct)
        }
    }

    /// An object-reference pin, e.g. `object:Actor`.
    pub fn object(object: impl Into<String>) -> Self {
        PinType {
            sub_category_object: Some(object.into()),
            ..Self::scalar(PinCategory::Object)
        }
    }

    /// Build a map type from a key type and a value type. Only the primary
    /// fields of each side are used.
    pub fn map(key: &PinType, value: &PinType) -> Self {
        PinType {
            container: ContainerType::Map,
            value_type: TerminalType::of(value),
            ..key.element()
        }
    }

    /// The wildcard map shape a container input starts from.
    pub fn wildcard_map() -> Self {
        Self::wildcard().with_container(ContainerType::Map)
    }

    /// Scalar type built from a terminal descriptor.
    pub fn from_terminal(terminal: &TerminalType) -> Self {
        PinType {
            category: terminal.category,
            sub_category: terminal.sub_category.clone(),
            sub_category_object: terminal.sub_category_object.clone(),
            container: ContainerType::None,
            value_type: TerminalType::wildcard(),
        }
    }

    pub fn with_container(mut self, container: ContainerType) -> Self {
        self.container = container;
        self
    }

    /// The scalar element (or key, for maps) type of this pin.
    pub fn element(&self) -> PinType {
        PinType::from_terminal(&TerminalType::of(self))
    }

    /// An array whose elements have this type's primary fields.
    pub fn array_of(&self) -> PinType {
        self.element().with_container(ContainerType::Array)
    }

    pub fn is_exec(&self) -> bool {
        self.category == PinCategory::Exec
    }

    pub fn is_wildcard(&self) -> bool {
        self.category == PinCategory::Wildcard
    }

    /// True when no part of the descriptor is left as wildcard.
    pub fn is_resolved(&self) -> bool {
        !self.is_wildcard()
            && (self.container != ContainerType::Map || !self.value_type.is_wildcard())
    }

    /// Schema-level compatibility between two pins.
    ///
    /// Exec pins only link to exec pins. A wildcard side accepts anything
    /// whose container shape fits; a scalar wildcard accepts any shape.
    /// Resolved pins must agree on every field, with a wildcard map terminal
    /// matching any terminal.
    pub fn is_compatible(&self, other: &PinType) -> bool {
        if self.is_exec() || other.is_exec() {
            return self.is_exec() && other.is_exec();
        }
        let shapes_fit = self.container == other.container
            || (self.is_wildcard() && self.container == ContainerType::None)
            || (other.is_wildcard() && other.container == ContainerType::None);
        if !shapes_fit {
            return false;
        }
        if self.is_wildcard() || other.is_wildcard() {
            return true;
        }
        self.category == other.category
            && self.sub_category == other.sub_category
            && self.sub_category_object == other.sub_category_object
            && (self.container != ContainerType::Map
                || self.value_type.is_wildcard()
                || other.value_type.is_wildcard()
                || self.value_type == other.value_type)
    }
}

fn write_primary(
    f: &mut fmt::Formatter<'_>,
    category: PinCategory,
    sub_category: &Option<String>,
    sub_category_object: &Option<String>,
) -> fmt::Result {
    write!(f, "{}", category.as_str())?;
    match (sub_category_object, sub_category) {
        (Some(obj), _) => write!(f, ":{}", obj),
        (None, Some(sub)) => write!(f, ":{}", sub),
        (None, None) => Ok(()),
    }
}

impl fmt::Display for TerminalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_primary(
            f,
            self.category,
            &self.sub_category,
            &self.sub_category_object,
        )
    }
}

impl fmt::Display for PinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = match self.container {
            ContainerType::None => "",
            ContainerType::Array => "array<",
            ContainerType::Set => "set<",
            ContainerType::Map => "map<",
        };
        f.write_str(open)?;
        write_primary(
            f,
            self.category,
            &self.sub_category,
            &self.sub_category_object,
        )?;
        match self.container {
            ContainerType::None => Ok(()),
            ContainerType::Array | ContainerType::Set => f.write_str(">"),
            ContainerType::Map => write!(f, ", {}>", self.value_type),
        }
    }
}

// ── Generic type expressions ────────────────────────────────────────────────

/// Declared type of a primitive pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeExpr {
    /// A fixed type.
    Exact { ty: PinType },
    /// A scalar type parameter.
    Param { name: String },
    /// An array of a type parameter.
    ArrayOf { param: String },
    /// A map from one type parameter to another.
    MapOf { key: String, value: String },
}

/// Type parameter bindings for one node instance.
pub type Bindings = BTreeMap<String, PinType>;

/// Two links disagree on what a type parameter stands for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("type parameter '{param}' bound to {existing}, cannot also be {found}")]
pub struct BindConflict {
    pub param: String,
    pub existing: PinType,
    pub found: PinType,
}

impl TypeExpr {
    pub fn exact(ty: PinType) -> Self {
        TypeExpr::Exact { ty }
    }

    pub fn param(name: &str) -> Self {
        TypeExpr::Param {
            name: name.to_string(),
        }
    }

    pub fn array_of(param: &str) -> Self {
        TypeExpr::ArrayOf {
            param: param.to_string(),
        }
    }

    pub fn map_of(key: &str, value: &str) -> Self {
        TypeExpr::MapOf {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn is_generic(&self) -> bool {
        !matches!(self, TypeExpr::Exact { .. })
    }

    /// Record what this expression's parameters stand for, given the type of
    /// a pin linked to it. Wildcard or mismatched shapes bind nothing.
    pub fn bind(&self, actual: &PinType, bindings: &mut Bindings) -> Result<(), BindConflict> {
        if actual.is_wildcard() {
            return Ok(());
        }
        match self {
            TypeExpr::Exact { .. } => Ok(()),
            TypeExpr::Param { name } => insert_binding(bindings, name, actual.clone()),
            TypeExpr::ArrayOf { param } => {
                if actual.container == ContainerType::Array {
                    insert_binding(bindings, param, actual.element())
                } else {
                    Ok(())
                }
            }
            TypeExpr::MapOf { key, value } => {
                if actual.container != ContainerType::Map {
                    return Ok(());
                }
                insert_binding(bindings, key, actual.element())?;
                if !actual.value_type.is_wildcard() {
                    insert_binding(bindings, value, PinType::from_terminal(&actual.value_type))?;
                }
                Ok(())
            }
        }
    }

    /// Concrete pin type under the given bindings; unbound parameters stay
    /// wildcard but keep the declared container shape.
    pub fn instantiate(&self, bindings: &Bindings) -> PinType {
        match self {
            TypeExpr::Exact { ty } => ty.clone(),
            TypeExpr::Param { name } => bindings.get(name).cloned().unwrap_or_default(),
            TypeExpr::ArrayOf { param } => match bindings.get(param) {
                Some(elem) => elem.array_of(),
                None => PinType::wildcard().with_container(ContainerType::Array),
            },
            TypeExpr::MapOf { key, value } => {
                let key_ty = bindings.get(key).cloned().unwrap_or_default();
                let value_ty = bindings.get(value).cloned().unwrap_or_default();
                PinType::map(&key_ty, &value_ty)
            }
        }
    }
}

fn insert_binding(bindings: &mut Bindings, param: &str, ty: PinType) -> Result<(), BindConflict> {
    match bindings.get(param) {
        Some(existing) if *existing != ty => Err(BindConflict {
            param: param.to_string(),
            existing: existing.clone(),
            found: ty,
        }),
        Some(_) => Ok(()),
        None => {
            bindings.insert(param.to_string(), ty);
            Ok(())
        }
    }
}

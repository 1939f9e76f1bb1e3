// registry.rs — Primitive operation registry
//
// Looks up primitive operations by stable name. Each entry declares a fixed,
// named pin set whose types are either exact or generic (`TypeExpr`), and
// whether the operation is pure (pulled on demand) or impure (sequenced by
// exec pins). The built-in set covers the map, comparison and arithmetic
// operations the lowering passes need; more can be loaded from a JSON
// manifest.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::graph::{pn, PinDirection};
use crate::types::{PinType, TypeExpr};

// ── Stable primitive names ──────────────────────────────────────────────────

pub const MAP_LENGTH: &str = "Map_Length";
pub const MAP_KEYS: &str = "Map_Keys";
pub const MAP_FIND: &str = "Map_Find";
pub const MAP_ADD: &str = "Map_Add";
pub const MAP_REMOVE: &str = "Map_Remove";
pub const LESS_INT_INT: &str = "Less_IntInt";
pub const ADD_INT_INT: &str = "Add_IntInt";

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

// ── Data types ──────────────────────────────────────────────────────────────

/// One declared pin of a primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub direction: PinDirection,
    pub ty: TypeExpr,
    /// Input is taken by reference; the primitive may mutate the linked value.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub by_ref: bool,
}

impl ParamDecl {
    fn input(name: &str, ty: TypeExpr) -> Self {
        ParamDecl {
            name: name.to_string(),
            direction: PinDirection::Input,
            ty,
            by_ref: false,
        }
    }

    fn input_ref(name: &str, ty: TypeExpr) -> Self {
        ParamDecl {
            by_ref: true,
            ..Self::input(name, ty)
        }
    }

    fn output(name: &str, ty: TypeExpr) -> Self {
        ParamDecl {
            name: name.to_string(),
            direction: PinDirection::Output,
            ty,
            by_ref: false,
        }
    }
}

/// Signature of one primitive operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimitiveSignature {
    pub name: String,
    #[serde(default)]
    pub library: String,
    /// Pure primitives have no exec pins.
    pub pure: bool,
    pub params: Vec<ParamDecl>,
}

impl PrimitiveSignature {
    pub fn param(&self, name: &str) -> Option<&ParamDecl> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Errors that can occur while populating or querying the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: invalid primitive manifest: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: unsupported manifest schema version {version}", .path.display())]
    UnsupportedSchema { path: PathBuf, version: u32 },
    #[error("duplicate primitive '{name}': first defined in {first}, redefined in {second}")]
    DuplicatePrimitive {
        name: String,
        first: Origin,
        second: Origin,
    },
    #[error("unknown primitive '{0}'")]
    UnknownPrimitive(String),
}

/// Where a primitive definition came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Builtin,
    Manifest(PathBuf),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Builtin => write!(f, "<builtin>"),
            Origin::Manifest(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    schema_version: u32,
    primitives: Vec<PrimitiveSignature>,
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Primitive operation registry.
#[derive(Debug, Clone)]
pub struct Registry {
    primitives: BTreeMap<String, (PrimitiveSignature, Origin)>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Registry {
            primitives: BTreeMap::new(),
        }
    }

    /// A registry holding the built-in primitives.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for sig in builtin_primitives() {
            registry
                .primitives
                .insert(sig.name.clone(), (sig, Origin::Builtin));
        }
        registry
    }

    /// Add one primitive; names must be unique.
    pub fn register(&mut self, sig: PrimitiveSignature, origin: Origin) -> Result<(), RegistryError> {
        if let Some((_, first)) = self.primitives.get(&sig.name) {
            return Err(RegistryError::DuplicatePrimitive {
                name: sig.name.clone(),
                first: first.clone(),
                second: origin,
            });
        }
        self.primitives.insert(sig.name.clone(), (sig, origin));
        Ok(())
    }

    /// Load primitives from a JSON manifest. Returns the number loaded.
    pub fn load_manifest(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: Manifest =
            serde_json::from_str(&text).map_err(|source| RegistryError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
            return Err(RegistryError::UnsupportedSchema {
                path: path.to_path_buf(),
                version: manifest.schema_version,
            });
        }
        let count = manifest.primitives.len();
        for sig in manifest.primitives {
            self.register(sig, Origin::Manifest(path.to_path_buf()))?;
        }
        tracing::debug!(path = %path.display(), count, "loaded primitive manifest");
        Ok(count)
    }

    pub fn lookup(&self, name: &str) -> Option<&PrimitiveSignature> {
        self.primitives.get(name).map(|(sig, _)| sig)
    }

    pub fn lookup_checked(&self, name: &str) -> Result<&PrimitiveSignature, RegistryError> {
        self.lookup(name)
            .ok_or_else(|| RegistryError::UnknownPrimitive(name.to_string()))
    }

    /// Primitives in name order.
    pub fn primitives(&self) -> impl Iterator<Item = &PrimitiveSignature> {
        self.primitives.values().map(|(sig, _)| sig)
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    /// Compact manifest JSON in name order, independent of where each
    /// primitive was loaded from.
    pub fn canonical_json(&self) -> String {
        let manifest = Manifest {
            schema_version: MANIFEST_SCHEMA_VERSION,
            primitives: self.primitives().cloned().collect(),
        };
        serde_json::to_string(&manifest).unwrap_or_default()
    }
}

// ── Built-in primitives ─────────────────────────────────────────────────────

fn builtin_primitives() -> Vec<PrimitiveSignature> {
    let map_kv = || TypeExpr::map_of("K", "V");
    let int = || TypeExpr::exact(PinType::int());
    let boolean = || TypeExpr::exact(PinType::bool());

    vec![
        PrimitiveSignature {
            name: MAP_LENGTH.to_string(),
            library: "MapLibrary".to_string(),
            pure: true,
            params: vec![
                ParamDecl::input(pn::TARGET_MAP, map_kv()),
                ParamDecl::output(pn::RETURN_VALUE, int()),
            ],
        },
        PrimitiveSignature {
            name: MAP_KEYS.to_string(),
            library: "MapLibrary".to_string(),
            pure: false,
            params: vec![
                ParamDecl::input(pn::TARGET_MAP, map_kv()),
                ParamDecl::output(pn::KEYS, TypeExpr::array_of("K")),
            ],
        },
        PrimitiveSignature {
            name: MAP_FIND.to_string(),
            library: "MapLibrary".to_string(),
            pure: true,
            params: vec![
                ParamDecl::input(pn::TARGET_MAP, map_kv()),
                ParamDecl::input(pn::KEY, TypeExpr::param("K")),
                ParamDecl::output(pn::VALUE, TypeExpr::param("V")),
                ParamDecl::output(pn::RETURN_VALUE, boolean()),
            ],
        },
        PrimitiveSignature {
            name: MAP_ADD.to_string(),
            library: "MapLibrary".to_string(),
            pure: false,
            params: vec![
                ParamDecl::input_ref(pn::TARGET_MAP, map_kv()),
                ParamDecl::input(pn::KEY, TypeExpr::param("K")),
                ParamDecl::input(pn::VALUE, TypeExpr::param("V")),
            ],
        },
        PrimitiveSignature {
            name: MAP_REMOVE.to_string(),
            library: "MapLibrary".to_string(),
            pure: false,
            params: vec![
                ParamDecl::input_ref(pn::TARGET_MAP, map_kv()),
                ParamDecl::input(pn::KEY, TypeExpr::param("K")),
                ParamDecl::output(pn::RETURN_VALUE, boolean()),
            ],
        },
        PrimitiveSignature {
            name: LESS_INT_INT.to_string(),
            library: "MathLibrary".to_string(),
            pure: true,
            params: vec![
                ParamDecl::input(pn::A, int()),
                ParamDecl::input(pn::B, int()),
                ParamDecl::output(pn::RETURN_VALUE, boolean()),
            ],
        },
        PrimitiveSignature {
            name: ADD_INT_INT.to_string(),
            library: "MathLibrary".to_string(),
            pure: true,
            params: vec![
                ParamDecl::input(pn::A, int()),
                ParamDecl::input(pn::B, int()),
                ParamDecl::output(pn::RETURN_VALUE, int()),
            ],
        },
    ]
}

//! Type environment: primitive/union/record types and the subtype lattice.
//!
//! Named types with builder-style construction and `Display` impls.
//! Subtyping rules: a primitive subtypes its base's super-chain; a type is
//! a subtype of a union iff it is a subtype of some member, transitively.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// The two built-in base kinds every primitive type ultimately names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BaseKind {
    Number,
    Symbol,
}

impl fmt::Display for BaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseKind::Number => write!(f, "number"),
            BaseKind::Symbol => write!(f, "symbol"),
        }
    }
}

/// A named type declaration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TypeDecl {
    /// The predefined `number` or `symbol` type itself.
    Base(BaseKind),
    /// `Primitive(kind, base)` — a named alias of `number` or `symbol`,
    /// possibly through a chain of other primitive aliases.
    Primitive { base: String },
    /// `Union(members)` — `a` is a subtype iff it is a subtype of some
    /// member (transitively).
    Union { members: Vec<String> },
    /// `Record(fields)` — nominal; two records are equal only by name.
    Record { fields: Vec<(String, String)> },
}

/// The named-type environment for one translation unit.
#[derive(Debug, Clone, Default)]
pub struct TypeEnvironment {
    types: HashMap<String, TypeDecl>,
}

impl TypeEnvironment {
    /// Builds an environment pre-populated with the two predefined types.
    pub fn new() -> Self {
        let mut env = TypeEnvironment {
            types: HashMap::new(),
        };
        env.types
            .insert("number".to_string(), TypeDecl::Base(BaseKind::Number));
        env.types
            .insert("symbol".to_string(), TypeDecl::Base(BaseKind::Symbol));
        env
    }

    pub fn create_primitive(&mut self, name: impl Into<String>, base: impl Into<String>) {
        self.types.insert(
            name.into(),
            TypeDecl::Primitive { base: base.into() },
        );
    }

    pub fn create_union(&mut self, name: impl Into<String>, members: Vec<String>) {
        self.types
            .insert(name.into(), TypeDecl::Union { members });
    }

    pub fn create_record(&mut self, name: impl Into<String>, fields: Vec<(String, String)>) {
        self.types.insert(name.into(), TypeDecl::Record { fields });
    }

    pub fn get(&self, name: &str) -> Option<&TypeDecl> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.types.keys()
    }

    /// The base kind (`number`/`symbol`) at the end of `name`'s primitive
    /// alias chain, if `name` resolves to a primitive or base type.
    pub fn base_kind(&self, name: &str) -> Option<BaseKind> {
        let mut seen = HashSet::new();
        let mut current = name;
        loop {
            if !seen.insert(current.to_string()) {
                return None; // cyclic alias chain, not our problem here
            }
            match self.types.get(current)? {
                TypeDecl::Base(kind) => return Some(*kind),
                TypeDecl::Primitive { base } => current = base,
                TypeDecl::Union { .. } | TypeDecl::Record { .. } => return None,
            }
        }
    }

    pub fn is_record(&self, name: &str) -> bool {
        matches!(self.types.get(name), Some(TypeDecl::Record { .. }))
    }

    /// `a ⊑ b`: reflexive; a primitive is a subtype of every type on its
    /// base super-chain; a type is a subtype of a union iff it is a subtype
    /// of some member (transitively). Records are compared nominally only.
    pub fn is_subtype_of(&self, a: &str, b: &str) -> bool {
        self.is_subtype_of_inner(a, b, &mut HashSet::new())
    }

    fn is_subtype_of_inner(&self, a: &str, b: &str, seen: &mut HashSet<(String, String)>) -> bool {
        if a == b {
            return true;
        }
        if !seen.insert((a.to_string(), b.to_string())) {
            return false;
        }
        match self.types.get(b) {
            Some(TypeDecl::Union { members }) => members
                .iter()
                .any(|m| self.is_subtype_of_inner(a, m, seen)),
            _ => match self.types.get(a) {
                Some(TypeDecl::Primitive { base }) => self.is_subtype_of_inner(base, b, seen),
                _ => false,
            },
        }
    }

    /// Pointwise greatest common subtype over two sets of type names.
    /// A type `t` is in the result iff it is a subtype of some member of
    /// `a` and of some member of `b`, restricted to members of `a ∪ b`
    /// themselves (the classic finite-lattice gcs used by the type solver).
    pub fn greatest_common_subtypes(&self, a: &HashSet<String>, b: &HashSet<String>) -> HashSet<String> {
        a.intersection(b)
            .filter(|t| {
                a.iter().all(|x| !self.is_subtype_of(x, t) || self.is_subtype_of(t, x))
            })
            .cloned()
            .collect()
    }

    /// Pointwise least common supertype: every member of `a` is a subtype
    /// of the result and every member of `b` is too; we return the set of
    /// candidates among all known type names satisfying both, preferring
    /// the most specific (no candidate is a subtype of another candidate).
    pub fn least_common_supertypes(&self, a: &HashSet<String>, b: &HashSet<String>) -> HashSet<String> {
        let candidates: HashSet<String> = self
            .types
            .keys()
            .filter(|t| {
                a.iter().all(|x| self.is_subtype_of(x, t)) && b.iter().all(|x| self.is_subtype_of(x, t))
            })
            .cloned()
            .collect();
        candidates
            .iter()
            .filter(|t| !candidates.iter().any(|u| *u != *t && self.is_subtype_of(u, t)))
            .cloned()
            .collect()
    }

    /// Sentinel "all types" set used as the bottom element of the type-set
    /// lattice in the constraint solver (see `type_analysis`).
    pub fn all_types(&self) -> HashSet<String> {
        self.types.keys().cloned().collect()
    }
}

/// gcs/lcs results for a given visit are cached here, memoised by the
/// unordered pair of input sets' sorted fingerprint. Cleared whenever the
/// owning translation unit's IR mutates (see `cache::AnalysisCache`).
#[derive(Debug, Default)]
pub struct LatticeMemo {
    gcs: RefCell<HashMap<(Vec<String>, Vec<String>), HashSet<String>>>,
    lcs: RefCell<HashMap<(Vec<String>, Vec<String>), HashSet<String>>>,
}

impl LatticeMemo {
    fn key(a: &HashSet<String>, b: &HashSet<String>) -> (Vec<String>, Vec<String>) {
        let mut a: Vec<String> = a.iter().cloned().collect();
        let mut b: Vec<String> = b.iter().cloned().collect();
        a.sort();
        b.sort();
        (a, b)
    }

    pub fn gcs(&self, env: &TypeEnvironment, a: &HashSet<String>, b: &HashSet<String>) -> HashSet<String> {
        let key = Self::key(a, b);
        if let Some(cached) = self.gcs.borrow().get(&key) {
            return cached.clone();
        }
        let result = env.greatest_common_subtypes(a, b);
        self.gcs.borrow_mut().insert(key, result.clone());
        result
    }

    pub fn lcs(&self, env: &TypeEnvironment, a: &HashSet<String>, b: &HashSet<String>) -> HashSet<String> {
        let key = Self::key(a, b);
        if let Some(cached) = self.lcs.borrow().get(&key) {
            return cached.clone();
        }
        let result = env.least_common_supertypes(a, b);
        self.lcs.borrow_mut().insert(key, result.clone());
        result
    }
}

//! Declarative requirements and their expansion into requirement sets.
//!
//! Requirements carry intent only. A test declares one [`Requirement`]
//! (usually a composition); [`Requirement::requirement_sets`] turns it into
//! the independent sets the test must run under. Conjunction multiplies
//! alternatives, so `compose(any_of(a, b), c)` yields `{a, c}` and `{b, c}`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::table::{TableDefinition, TableHandle};

// ──────────────────────────────────────────────
// Requirement
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Requirement {
    ImmutableTable(ImmutableTableRequirement),
    MutableTable(MutableTableRequirement),
    Command(CommandRequirement),
    Custom(CustomRequirement),
    /// Alternative requirement sets. Expansion flattens these away, so sets
    /// produced by [`Requirement::requirement_sets`] never contain one.
    Composite(CompositeRequirement),
}

impl Requirement {
    /// The independent sets this requirement expands to.
    pub fn requirement_sets(&self) -> BTreeSet<RequirementSet> {
        match self {
            Requirement::Composite(c) => c.alternatives.clone(),
            leaf => BTreeSet::from([RequirementSet::from_iter([leaf.clone()])]),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Requirement::Composite(_))
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::ImmutableTable(r) => write!(f, "immutable table {}", r.handle),
            Requirement::MutableTable(r) => {
                write!(f, "mutable table {} ({:?})", r.handle, r.state)
            }
            Requirement::Command(r) => write!(f, "{:?} commands {:?}", r.scope, r.commands),
            Requirement::Custom(r) => write!(f, "{} {:?}", r.kind, r.params),
            Requirement::Composite(c) => write!(f, "{} alternatives", c.alternatives.len()),
        }
    }
}

/// A set of alternative requirement sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeRequirement {
    alternatives: BTreeSet<RequirementSet>,
}

impl CompositeRequirement {
    pub fn alternatives(&self) -> &BTreeSet<RequirementSet> {
        &self.alternatives
    }
}

/// Constructors for composite requirements.
pub struct Requirements;

impl Requirements {
    /// All of `requirements` at once. Alternatives inside the members
    /// multiply out into one set per combination.
    pub fn compose(requirements: impl IntoIterator<Item = Requirement>) -> Requirement {
        let mut sets = BTreeSet::from([RequirementSet::default()]);
        for requirement in requirements {
            let alternatives = requirement.requirement_sets();
            sets = sets
                .iter()
                .flat_map(|set| alternatives.iter().map(move |alt| set.union(alt)))
                .collect();
        }
        Requirement::Composite(CompositeRequirement { alternatives: sets })
    }

    /// One run per alternative.
    pub fn any_of(requirements: impl IntoIterator<Item = Requirement>) -> Requirement {
        let alternatives = requirements
            .into_iter()
            .flat_map(|r| r.requirement_sets())
            .collect();
        Requirement::Composite(CompositeRequirement { alternatives })
    }
}

// ──────────────────────────────────────────────
// RequirementSet
// ──────────────────────────────────────────────

/// One concrete, flattened set of requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequirementSet(BTreeSet<Requirement>);

impl RequirementSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn union(&self, other: &RequirementSet) -> RequirementSet {
        self.0.union(&other.0).cloned().collect()
    }

    pub fn insert(&mut self, requirement: Requirement) -> bool {
        self.0.insert(requirement)
    }

    pub fn contains(&self, requirement: &Requirement) -> bool {
        self.0.contains(requirement)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Requirements of the table requirement type `T`.
    pub fn tables<T: TableRequirement>(&self) -> impl Iterator<Item = &T> {
        self.0.iter().filter_map(T::from_requirement)
    }

    pub fn commands(&self, scope: CommandScope) -> impl Iterator<Item = &CommandRequirement> {
        self.0.iter().filter_map(move |r| match r {
            Requirement::Command(c) if c.scope == scope => Some(c),
            _ => None,
        })
    }

    pub fn custom<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a CustomRequirement> {
        self.0.iter().filter_map(move |r| match r {
            Requirement::Custom(c) if c.kind == kind => Some(c),
            _ => None,
        })
    }
}

impl FromIterator<Requirement> for RequirementSet {
    fn from_iter<I: IntoIterator<Item = Requirement>>(iter: I) -> Self {
        RequirementSet(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RequirementSet {
    type Item = &'a Requirement;
    type IntoIter = std::collections::btree_set::Iter<'a, Requirement>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ──────────────────────────────────────────────
// Table requirements
// ──────────────────────────────────────────────

/// Shared shape of the two table requirement kinds.
pub trait TableRequirement: Clone + Ord + fmt::Debug + Send + Sync + 'static {
    fn definition(&self) -> &Arc<TableDefinition>;
    fn handle(&self) -> &TableHandle;
    /// Copy of this requirement pinned to `database`.
    fn with_database(&self, database: &str) -> Self;
    fn from_requirement(requirement: &Requirement) -> Option<&Self>;
}

/// A suite-scoped, shared table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImmutableTableRequirement {
    definition: Arc<TableDefinition>,
    handle: TableHandle,
}

impl ImmutableTableRequirement {
    pub fn new(definition: Arc<TableDefinition>) -> Self {
        let handle = definition.handle().clone();
        Self { definition, handle }
    }

    pub fn with_handle(mut self, handle: TableHandle) -> Self {
        self.handle = handle;
        self
    }
}

impl TableRequirement for ImmutableTableRequirement {
    fn definition(&self) -> &Arc<TableDefinition> {
        &self.definition
    }

    fn handle(&self) -> &TableHandle {
        &self.handle
    }

    fn with_database(&self, database: &str) -> Self {
        Self {
            definition: Arc::clone(&self.definition),
            handle: self.handle.in_database(database),
        }
    }

    fn from_requirement(requirement: &Requirement) -> Option<&Self> {
        match requirement {
            Requirement::ImmutableTable(r) => Some(r),
            _ => None,
        }
    }
}

impl From<ImmutableTableRequirement> for Requirement {
    fn from(r: ImmutableTableRequirement) -> Self {
        Requirement::ImmutableTable(r)
    }
}

/// How far a mutable table is provisioned before the test runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutableTableState {
    /// Name generated, nothing created.
    Prepared,
    /// Table created empty.
    Created,
    /// Table created and loaded with the definition's rows.
    #[default]
    Loaded,
}

/// A test-scoped throwaway table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutableTableRequirement {
    definition: Arc<TableDefinition>,
    handle: TableHandle,
    state: MutableTableState,
}

impl MutableTableRequirement {
    pub fn new(definition: Arc<TableDefinition>) -> Self {
        Self::builder(definition).build()
    }

    pub fn builder(definition: Arc<TableDefinition>) -> MutableTableRequirementBuilder {
        let handle = definition.handle().clone();
        MutableTableRequirementBuilder {
            definition,
            handle,
            state: MutableTableState::default(),
        }
    }

    pub fn state(&self) -> MutableTableState {
        self.state
    }
}

impl TableRequirement for MutableTableRequirement {
    fn definition(&self) -> &Arc<TableDefinition> {
        &self.definition
    }

    fn handle(&self) -> &TableHandle {
        &self.handle
    }

    fn with_database(&self, database: &str) -> Self {
        Self {
            definition: Arc::clone(&self.definition),
            handle: self.handle.in_database(database),
            state: self.state,
        }
    }

    fn from_requirement(requirement: &Requirement) -> Option<&Self> {
        match requirement {
            Requirement::MutableTable(r) => Some(r),
            _ => None,
        }
    }
}

impl From<MutableTableRequirement> for Requirement {
    fn from(r: MutableTableRequirement) -> Self {
        Requirement::MutableTable(r)
    }
}

#[derive(Debug, Clone)]
pub struct MutableTableRequirementBuilder {
    definition: Arc<TableDefinition>,
    handle: TableHandle,
    state: MutableTableState,
}

impl MutableTableRequirementBuilder {
    pub fn with_name(mut self, name: &str) -> Self {
        self.handle = self.handle.with_name(name);
        self
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.handle = self.handle.in_schema(schema);
        self
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.handle = self.handle.in_database(database);
        self
    }

    pub fn with_handle(mut self, handle: TableHandle) -> Self {
        self.handle = handle;
        self
    }

    pub fn with_state(mut self, state: MutableTableState) -> Self {
        self.state = state;
        self
    }

    pub fn build(self) -> MutableTableRequirement {
        MutableTableRequirement {
            definition: self.definition,
            handle: self.handle,
            state: self.state,
        }
    }
}

// ──────────────────────────────────────────────
// Command and custom requirements
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandScope {
    Suite,
    Test,
}

/// Shell commands run once per scope before its tests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandRequirement {
    pub scope: CommandScope,
    pub commands: Vec<String>,
}

impl CommandRequirement {
    pub fn suite(commands: impl IntoIterator<Item = impl Into<String>>) -> Requirement {
        Requirement::Command(Self {
            scope: CommandScope::Suite,
            commands: commands.into_iter().map(Into::into).collect(),
        })
    }

    pub fn test(commands: impl IntoIterator<Item = impl Into<String>>) -> Requirement {
        Requirement::Command(Self {
            scope: CommandScope::Test,
            commands: commands.into_iter().map(Into::into).collect(),
        })
    }
}

/// A requirement kind owned by a user fulfiller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CustomRequirement {
    pub kind: String,
    pub params: BTreeMap<String, String>,
}

impl CustomRequirement {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

impl From<CustomRequirement> for Requirement {
    fn from(r: CustomRequirement) -> Self {
        Requirement::Custom(r)
    }
}

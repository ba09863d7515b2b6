//! Test records, requirement resolution and per-set expansion.
//!
//! A host harness hands the core plain [`TestCase`] records. The resolver
//! computes the requirement sets of each one and the expander turns every
//! declared test into one [`ExpandedTest`] per set.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::Configuration;
use crate::context::TestContext;
use crate::error::BoxError;
use crate::requirement::{CommandRequirement, Requirement, RequirementSet, Requirements};

// ──────────────────────────────────────────────
// Providers
// ──────────────────────────────────────────────

/// Computes a requirement from the suite configuration.
pub trait RequirementsProvider: Send + Sync {
    fn requirements(&self, config: &Configuration) -> Requirement;
}

impl<F> RequirementsProvider for F
where
    F: Fn(&Configuration) -> Requirement + Send + Sync,
{
    fn requirements(&self, config: &Configuration) -> Requirement {
        self(config)
    }
}

impl RequirementsProvider for Requirement {
    fn requirements(&self, _config: &Configuration) -> Requirement {
        self.clone()
    }
}

// ──────────────────────────────────────────────
// TestCase
// ──────────────────────────────────────────────

/// Result type of test bodies and hooks.
pub type TestResult = std::result::Result<(), BoxError>;

/// A test body or a before/after-with-context hook.
pub type TestFn = Arc<dyn Fn(&TestContext) -> TestResult + Send + Sync>;

/// A test as declared by its author.
#[derive(Clone)]
pub struct TestCase {
    name: String,
    groups: BTreeSet<String>,
    providers: Vec<Arc<dyn RequirementsProvider>>,
    body: TestFn,
    before: Vec<TestFn>,
    after: Vec<TestFn>,
}

impl TestCase {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&TestContext) -> TestResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            groups: BTreeSet::new(),
            providers: Vec::new(),
            body: Arc::new(body),
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    pub fn requires(mut self, provider: impl RequirementsProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Runs after fulfillment, before the body. A failure aborts the test.
    pub fn before_with_context<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TestContext) -> TestResult + Send + Sync + 'static,
    {
        self.before.push(Arc::new(hook));
        self
    }

    /// Runs after the body whatever its outcome. A failure fails the test.
    pub fn after_with_context<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TestContext) -> TestResult + Send + Sync + 'static,
    {
        self.after.push(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    pub fn body(&self) -> &TestFn {
        &self.body
    }

    pub fn before_hooks(&self) -> &[TestFn] {
        &self.before
    }

    pub fn after_hooks(&self) -> &[TestFn] {
        &self.after
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("groups", &self.groups)
            .field("providers", &self.providers.len())
            .finish()
    }
}

// ──────────────────────────────────────────────
// Resolver
// ──────────────────────────────────────────────

/// Combines a test's providers with the configured setup commands.
#[derive(Debug, Clone)]
pub struct TestSpecificRequirementsResolver {
    config: Arc<Configuration>,
}

impl TestSpecificRequirementsResolver {
    pub fn new(config: Arc<Configuration>) -> Self {
        Self { config }
    }

    /// The independent requirement sets `case` must run under.
    pub fn resolve(&self, case: &TestCase) -> BTreeSet<RequirementSet> {
        let mut parts: Vec<Requirement> = case
            .providers
            .iter()
            .map(|p| p.requirements(&self.config))
            .collect();
        if !self.config.command.test.is_empty() {
            parts.push(CommandRequirement::test(self.config.command.test.iter().cloned()));
        }
        if !self.config.command.suite.is_empty() {
            parts.push(CommandRequirement::suite(self.config.command.suite.iter().cloned()));
        }
        Requirements::compose(parts).requirement_sets()
    }
}

// ──────────────────────────────────────────────
// Invocations and expansion
// ──────────────────────────────────────────────

/// A test bound to one concrete requirement set.
#[derive(Debug, Clone)]
pub struct ExpandedTest {
    case: Arc<TestCase>,
    requirements: RequirementSet,
    variant: Option<usize>,
}

impl ExpandedTest {
    pub fn case(&self) -> &Arc<TestCase> {
        &self.case
    }

    pub fn requirements(&self) -> &RequirementSet {
        &self.requirements
    }

    /// Position among the sets of a test with several sets.
    pub fn variant(&self) -> Option<usize> {
        self.variant
    }

    pub fn name(&self) -> &str {
        self.case.name()
    }

    /// The test name, suffixed with the variant number when there is one.
    pub fn display_name(&self) -> String {
        match self.variant {
            Some(v) => format!("{} [{}]", self.case.name(), v + 1),
            None => self.case.name().to_string(),
        }
    }
}

/// Either a test as declared or one already bound to a requirement set.
#[derive(Debug, Clone)]
pub enum TestInvocation {
    Declared(Arc<TestCase>),
    Expanded(ExpandedTest),
}

impl TestInvocation {
    pub fn declared(case: TestCase) -> Self {
        TestInvocation::Declared(Arc::new(case))
    }

    pub fn case(&self) -> &Arc<TestCase> {
        match self {
            TestInvocation::Declared(case) => case,
            TestInvocation::Expanded(test) => &test.case,
        }
    }

    pub fn as_expanded(&self) -> Option<&ExpandedTest> {
        match self {
            TestInvocation::Expanded(test) => Some(test),
            TestInvocation::Declared(_) => None,
        }
    }
}

/// Expands declared tests into one invocation per requirement set.
///
/// Expanding an already expanded invocation returns it unchanged, so the
/// expander can be applied to the same batch any number of times.
#[derive(Debug)]
pub struct RequirementsExpander {
    resolver: TestSpecificRequirementsResolver,
    seen: HashSet<usize>,
}

impl RequirementsExpander {
    pub fn new(resolver: TestSpecificRequirementsResolver) -> Self {
        Self {
            resolver,
            seen: HashSet::new(),
        }
    }

    /// Number of distinct declared tests expanded so far.
    pub fn expanded_count(&self) -> usize {
        self.seen.len()
    }

    pub fn expand(&mut self, invocations: Vec<TestInvocation>) -> Vec<TestInvocation> {
        let mut out = Vec::with_capacity(invocations.len());
        for invocation in invocations {
            let case = match invocation {
                TestInvocation::Expanded(_) => {
                    out.push(invocation);
                    continue;
                }
                TestInvocation::Declared(case) => case,
            };
            self.seen.insert(Arc::as_ptr(&case) as usize);

            let sets = self.resolver.resolve(&case);
            debug!(test = case.name(), sets = sets.len(), "expanded requirements");
            if sets.len() == 1 {
                out.extend(sets.into_iter().map(|requirements| {
                    TestInvocation::Expanded(ExpandedTest {
                        case: Arc::clone(&case),
                        requirements,
                        variant: None,
                    })
                }));
                continue;
            }
            for (variant, requirements) in sets.into_iter().enumerate() {
                out.push(TestInvocation::Expanded(ExpandedTest {
                    case: Arc::new(TestCase::clone(&case)),
                    requirements,
                    variant: Some(variant),
                }));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandConfig;
    use crate::requirement::{CommandScope, CustomRequirement};

    fn custom(kind: &str) -> Requirement {
        CustomRequirement::new(kind).into()
    }

    fn case(name: &str) -> TestCase {
        TestCase::new(name, |_| Ok(()))
    }

    fn expander(config: Configuration) -> RequirementsExpander {
        RequirementsExpander::new(TestSpecificRequirementsResolver::new(Arc::new(config)))
    }

    #[test]
    fn providers_see_configuration() {
        let config = Configuration::default().with_property("flavour", "a");
        let resolver = TestSpecificRequirementsResolver::new(Arc::new(config));
        let test = case("t").requires(|c: &Configuration| {
            custom(c.property("flavour").unwrap_or("none"))
        });
        let sets = resolver.resolve(&test);
        assert_eq!(sets.len(), 1);
        assert!(sets.first().unwrap().contains(&custom("a")));
    }

    #[test]
    fn configured_commands_join_every_set() {
        let config = Configuration {
            command: CommandConfig {
                suite: vec!["true".into()],
                test: vec!["true".into()],
            },
            ..Configuration::default()
        };
        let resolver = TestSpecificRequirementsResolver::new(Arc::new(config));
        let test = case("t").requires(Requirements::any_of([custom("a"), custom("b")]));
        let sets = resolver.resolve(&test);
        assert_eq!(sets.len(), 2);
        for set in &sets {
            assert_eq!(set.commands(CommandScope::Suite).count(), 1);
            assert_eq!(set.commands(CommandScope::Test).count(), 1);
        }
    }

    #[test]
    fn single_set_reuses_the_declared_case() {
        let declared = Arc::new(case("t").requires(custom("a")));
        let mut expander = expander(Configuration::default());
        let out = expander.expand(vec![TestInvocation::Declared(Arc::clone(&declared))]);
        assert_eq!(out.len(), 1);
        let test = out[0].as_expanded().unwrap();
        assert!(Arc::ptr_eq(test.case(), &declared));
        assert_eq!(test.variant(), None);
        assert_eq!(test.display_name(), "t");
    }

    #[test]
    fn alternatives_clone_one_invocation_per_set() {
        let declared = Arc::new(
            case("t")
                .in_group("smoke")
                .requires(Requirements::any_of([custom("a"), custom("b"), custom("c")])),
        );
        let mut expander = expander(Configuration::default());
        let out = expander.expand(vec![TestInvocation::Declared(Arc::clone(&declared))]);
        assert_eq!(out.len(), 3);

        let sets: BTreeSet<RequirementSet> = out
            .iter()
            .map(|i| i.as_expanded().unwrap().requirements().clone())
            .collect();
        assert_eq!(sets.len(), 3);
        for (i, invocation) in out.iter().enumerate() {
            let test = invocation.as_expanded().unwrap();
            assert!(!Arc::ptr_eq(test.case(), &declared));
            assert_eq!(test.case().groups(), declared.groups());
            assert_eq!(test.display_name(), format!("t [{}]", i + 1));
        }
    }

    #[test]
    fn expansion_is_idempotent() {
        let mut expander = expander(Configuration::default());
        let first = expander.expand(vec![
            TestInvocation::declared(case("a").requires(Requirements::any_of([custom("x"), custom("y")]))),
            TestInvocation::declared(case("b")),
        ]);
        assert_eq!(first.len(), 3);
        assert_eq!(expander.expanded_count(), 2);

        let second = expander.expand(first.clone());
        assert_eq!(second.len(), 3);
        assert_eq!(expander.expanded_count(), 2);
        for (a, b) in first.iter().zip(&second) {
            let (a, b) = (a.as_expanded().unwrap(), b.as_expanded().unwrap());
            assert!(Arc::ptr_eq(a.case(), b.case()));
            assert_eq!(a.requirements(), b.requirements());
        }
    }

    #[test]
    fn no_alternatives_means_no_invocations() {
        let mut expander = expander(Configuration::default());
        let out = expander.expand(vec![TestInvocation::declared(
            case("t").requires(Requirements::any_of(Vec::new())),
        )]);
        assert!(out.is_empty());
    }
}

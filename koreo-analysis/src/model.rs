//! Domain model produced by extraction: resources, workflow steps, test specs,
//! semantic anchors and the closed outcome types.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::expression::TokenKind;
use crate::function_test::{PrepareError, PreparedFunction};
use crate::schema::Field;
use crate::source::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    ValueFunction,
    ResourceFunction,
    Workflow,
    FunctionTest,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::ValueFunction,
        ResourceKind::ResourceFunction,
        ResourceKind::Workflow,
        ResourceKind::FunctionTest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::ValueFunction => "ValueFunction",
            ResourceKind::ResourceFunction => "ResourceFunction",
            ResourceKind::Workflow => "Workflow",
            ResourceKind::FunctionTest => "FunctionTest",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    pub fn is_function(self) -> bool {
        matches!(
            self,
            ResourceKind::ValueFunction | ResourceKind::ResourceFunction
        )
    }

    /// Kinds a workflow step may reference.
    pub fn is_step_logic(self) -> bool {
        self != ResourceKind::FunctionTest
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of something that can be defined and referenced.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SymbolId {
    Resource { kind: ResourceKind, name: String },
    Step { workflow: String, label: String },
}

impl SymbolId {
    pub fn resource(kind: ResourceKind, name: impl Into<String>) -> Self {
        SymbolId::Resource {
            kind,
            name: name.into(),
        }
    }

    pub fn step(workflow: impl Into<String>, label: impl Into<String>) -> Self {
        SymbolId::Step {
            workflow: workflow.into(),
            label: label.into(),
        }
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolId::Resource { kind, name } => write!(f, "{kind}:{name}"),
            SymbolId::Step { workflow, label } => write!(f, "{workflow}.steps.{label}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnchorRole {
    ResourceKind,
    ResourceNameDef,
    StepLabelDef,
    StepRefUse,
    ResourceRefUse,
    Expression,
    ExpressionToken(TokenKind),
    ResourceField,
    SchemaViolation,
}

impl AnchorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AnchorRole::ResourceKind => "resource-kind",
            AnchorRole::ResourceNameDef => "resource-name-def",
            AnchorRole::StepLabelDef => "step-label-def",
            AnchorRole::StepRefUse => "step-ref-use",
            AnchorRole::ResourceRefUse => "resource-ref-use",
            AnchorRole::Expression => "expression",
            AnchorRole::ExpressionToken(_) => "expression-token",
            AnchorRole::ResourceField => "resource-field",
            AnchorRole::SchemaViolation => "schema-violation",
        }
    }
}

/// A source range tagged with its domain meaning.
#[derive(Debug, Clone)]
pub struct SemanticAnchor {
    pub range: Range,
    pub role: AnchorRole,
    /// Symbol defined at this range.
    pub symbol: Option<SymbolId>,
    /// Symbol referenced from this range.
    pub target: Option<SymbolId>,
    /// Schema field for `resource-field` anchors.
    pub field: Option<&'static Field>,
    pub detail: Option<String>,
}

impl SemanticAnchor {
    pub fn new(range: Range, role: AnchorRole) -> Self {
        Self {
            range,
            role,
            symbol: None,
            target: None,
            field: None,
            detail: None,
        }
    }

    pub fn defining(mut self, symbol: SymbolId) -> Self {
        self.symbol = Some(symbol);
        self
    }

    pub fn targeting(mut self, symbol: SymbolId) -> Self {
        self.target = Some(symbol);
        self
    }

    pub fn with_field(mut self, field: &'static Field) -> Self {
        self.field = Some(field);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub case: Value,
    pub default: bool,
    pub kind: Option<ResourceKind>,
    pub name: String,
    pub name_range: Range,
}

/// The logic a workflow step runs.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicRef {
    Static {
        kind: Option<ResourceKind>,
        name: String,
        name_range: Range,
    },
    Switch {
        switch_on: String,
        cases: Vec<SwitchCase>,
    },
}

impl LogicRef {
    /// Every `(kind, name)` this logic may resolve to.
    pub fn targets(&self) -> Vec<(Option<ResourceKind>, &str, &Range)> {
        match self {
            LogicRef::Static {
                kind,
                name,
                name_range,
            } => vec![(*kind, name.as_str(), name_range)],
            LogicRef::Switch { cases, .. } => cases
                .iter()
                .map(|case| (case.kind, case.name.as_str(), &case.name_range))
                .collect(),
        }
    }
}

/// A step name used inside one of a step's expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct StepMentionSite {
    pub label: String,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    pub label: String,
    pub label_range: Range,
    /// The whole step item.
    pub range: Range,
    pub logic: Option<LogicRef>,
    pub skip_if: Option<String>,
    pub for_each: Option<ForEach>,
    pub condition: Option<StepCondition>,
    pub state: Option<Value>,
    pub inputs: Value,
    pub mentions: Vec<StepMentionSite>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForEach {
    pub item_in: String,
    pub input_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepCondition {
    pub condition_type: String,
    pub name: String,
}

/// Result classification of evaluating a function.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok(Value),
    Skip(String),
    DepSkip(String),
    Retry { message: String, delay: u64 },
    PermFail(String),
}

impl Outcome {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Outcome::Ok(_) => "ok",
            Outcome::Skip(_) => "skip",
            Outcome::DepSkip(_) => "depSkip",
            Outcome::Retry { .. } => "retry",
            Outcome::PermFail(_) => "permFail",
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Ok(_) => None,
            Outcome::Skip(message)
            | Outcome::DepSkip(message)
            | Outcome::PermFail(message)
            | Outcome::Retry { message, .. } => Some(message),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ok(_) => f.write_str("Ok"),
            Outcome::Skip(message) => write!(f, "Skip(\"{message}\")"),
            Outcome::DepSkip(message) => write!(f, "DepSkip(\"{message}\")"),
            Outcome::Retry { message, delay } => write!(f, "Retry(\"{message}\", delay={delay})"),
            Outcome::PermFail(message) => write!(f, "PermFail(\"{message}\")"),
        }
    }
}

/// The outcome a test case expects; messages match as case-insensitive
/// substrings and a zero retry delay matches any delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedOutcome {
    Ok,
    Skip(String),
    DepSkip(String),
    Retry { message: String, delay: u64 },
    PermFail(String),
}

impl ExpectedOutcome {
    pub fn variant_name(&self) -> &'static str {
        match self {
            ExpectedOutcome::Ok => "ok",
            ExpectedOutcome::Skip(_) => "skip",
            ExpectedOutcome::DepSkip(_) => "depSkip",
            ExpectedOutcome::Retry { .. } => "retry",
            ExpectedOutcome::PermFail(_) => "permFail",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    Resource(Value),
    Delete,
    Return(Value),
    Outcome(ExpectedOutcome),
}

impl Expectation {
    pub fn field_name(&self) -> &'static str {
        match self {
            Expectation::Resource(_) => "expectResource",
            Expectation::Delete => "expectDelete",
            Expectation::Return(_) => "expectReturn",
            Expectation::Outcome(_) => "expectOutcome",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub label: Option<String>,
    pub variant: bool,
    pub skip: bool,
    pub input_overrides: Option<Value>,
    pub current_resource: Option<Value>,
    pub overlay_resource: Option<Value>,
    /// `None` when the case declares no expectation; it is then never run.
    pub expectation: Option<Expectation>,
    pub range: Range,
    /// Range of the expectation field's value, where corrections apply.
    pub expectation_range: Option<Range>,
}

impl TestCase {
    pub fn display_name(&self, index: usize) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("case {}", index + 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionTestSpec {
    pub function_ref: Option<(ResourceKind, String)>,
    pub function_ref_range: Option<Range>,
    pub inputs: Value,
    /// Key and value ranges of the top-level `inputs` entry.
    pub inputs_range: Option<(Range, Range)>,
    /// Parent resource visible to the function as `parent`.
    pub parent: Option<Value>,
    pub current_resource: Option<Value>,
    pub cases: Vec<TestCase>,
    /// True when the test declared no cases and runs its top-level inputs once.
    pub implicit_case: bool,
}

#[derive(Debug, Clone)]
pub enum Derived {
    None,
    Workflow(Vec<WorkflowStep>),
    Function(Result<Arc<PreparedFunction>, PrepareError>),
    FunctionTest(FunctionTestSpec),
}

/// One Koreo resource parsed from a document.
#[derive(Debug, Clone)]
pub struct ResourceDefinition {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: Option<String>,
    pub spec: Value,
    /// The whole YAML document.
    pub range: Range,
    pub name_range: Range,
    pub derived: Derived,
}

impl ResourceDefinition {
    pub fn symbol(&self) -> SymbolId {
        SymbolId::resource(self.kind, self.name.clone())
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        match &self.derived {
            Derived::Workflow(steps) => steps,
            _ => &[],
        }
    }

    pub fn test_spec(&self) -> Option<&FunctionTestSpec> {
        match &self.derived {
            Derived::FunctionTest(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn function(&self) -> Option<&Result<Arc<PreparedFunction>, PrepareError>> {
        match &self.derived {
            Derived::Function(function) => Some(function),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kinds_round_trip_through_names() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ResourceKind::parse("Deployment"), None);
        assert!(!ResourceKind::FunctionTest.is_step_logic());
    }

    #[test]
    fn outcome_display_and_messages() {
        let retry = Outcome::Retry {
            message: "waiting".into(),
            delay: 5,
        };
        assert_eq!(retry.to_string(), "Retry(\"waiting\", delay=5)");
        assert_eq!(retry.message(), Some("waiting"));
        assert_eq!(Outcome::Ok(json!({})).message(), None);
        assert_eq!(ExpectedOutcome::Ok.variant_name(), "ok");
    }

    #[test]
    fn symbol_display() {
        assert_eq!(
            SymbolId::resource(ResourceKind::ValueFunction, "f").to_string(),
            "ValueFunction:f"
        );
        assert_eq!(SymbolId::step("wf", "build").to_string(), "wf.steps.build");
    }
}

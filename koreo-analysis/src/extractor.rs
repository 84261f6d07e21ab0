//! Schema-driven extraction of semantics from a YAML stream.
//!
//! A generic walker interprets the tables in [`crate::schema`]. Every node is
//! classified on the way down, emitting anchors and schema diagnostics; a
//! malformed node only produces a local diagnostic and the walk carries on with
//! its siblings and with the following documents.

use std::collections::HashSet;
use std::ops;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::diagnostics::{Diagnostic, DiagnosticCode, Severity};
use crate::expression::{self, parse, tokenize, TokenKind};
use crate::function_test;
use crate::model::{
    AnchorRole, Derived, ExpectedOutcome, Expectation, ForEach, FunctionTestSpec, LogicRef,
    ResourceDefinition, ResourceKind, SemanticAnchor, StepCondition, StepMentionSite, SwitchCase,
    SymbolId, TestCase, WorkflowStep,
};
use crate::schema::{
    self, ExpressionPolicy, Field, GroupKind, MappingRule, ScalarRole, ScalarRule, ScalarType,
    Shape,
};
use crate::source::{Range, SourceLocation};
use crate::yaml::{self, Scalar, YamlNode};

/// Everything extracted from one text.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub resources: Vec<ResourceDefinition>,
    pub anchors: Vec<SemanticAnchor>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn extract(text: &str) -> Extraction {
    let source = SourceLocation::new(text);
    let mut walker = Walker {
        source: &source,
        kind: None,
        workflow: None,
        anchors: Vec::new(),
        diagnostics: Vec::new(),
    };
    let mut resources = Vec::new();

    for document in yaml::parse_stream(text) {
        match &document.root {
            Ok(root) => {
                if let Some(resource) = walker.document(root, document.span.clone()) {
                    resources.push(resource);
                }
            }
            Err(err) => {
                walker.report(
                    DiagnosticCode::YamlSyntax,
                    err.span(),
                    format!("invalid YAML: {err}"),
                );
            }
        }
    }

    let mut seen = HashSet::new();
    for resource in &resources {
        if !seen.insert(resource.symbol()) {
            walker.diagnostics.push(Diagnostic::new(
                DiagnosticCode::DuplicateResource,
                resource.name_range.clone(),
                format!(
                    "{} `{}` is defined more than once in this document",
                    resource.kind, resource.name
                ),
            ));
        }
    }

    let Walker {
        mut anchors,
        diagnostics,
        ..
    } = walker;
    anchors.sort_by(|a, b| {
        a.range
            .span
            .start
            .cmp(&b.range.span.start)
            .then(b.range.span.end.cmp(&a.range.span.end))
    });
    Extraction {
        resources,
        anchors,
        diagnostics,
    }
}

/// Absolute span of `start..end`, offsets into the expression body.
fn body_span(scalar: &Scalar, start: usize, end: usize) -> ops::Range<usize> {
    let from = scalar.source_offset(start + 1);
    let to = if end > start {
        scalar.source_offset(end) + 1
    } else {
        from
    };
    from..to.max(from)
}

struct Walker<'a> {
    source: &'a SourceLocation,
    kind: Option<ResourceKind>,
    workflow: Option<String>,
    anchors: Vec<SemanticAnchor>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Walker<'a> {
    fn range(&self, span: ops::Range<usize>) -> Range {
        self.source.range(span)
    }

    fn report(&mut self, code: DiagnosticCode, span: ops::Range<usize>, message: String) {
        let range = self.range(span);
        if matches!(
            code,
            DiagnosticCode::MissingField
                | DiagnosticCode::OneOf
                | DiagnosticCode::InvalidName
                | DiagnosticCode::InvalidType
                | DiagnosticCode::UnknownField
        ) {
            self.anchors.push(
                SemanticAnchor::new(range.clone(), AnchorRole::SchemaViolation)
                    .with_detail(message.clone()),
            );
        }
        self.diagnostics.push(Diagnostic::new(code, range, message));
    }

    fn document(&mut self, root: &YamlNode, span: ops::Range<usize>) -> Option<ResourceDefinition> {
        self.kind = None;
        self.workflow = None;

        if root.as_mapping().is_none() {
            self.report(
                DiagnosticCode::InvalidType,
                root.span.clone(),
                format!("expected a resource mapping, found a {}", root.shape_name()),
            );
            return None;
        }

        let api_version = root.get("apiVersion").and_then(YamlNode::as_str);
        let kind_node = root.get("kind");
        let kind_text = kind_node.and_then(YamlNode::as_str);
        let koreo_api = api_version
            .map(|version| version.starts_with(&format!("{}/", schema::API_GROUP)))
            .unwrap_or(false);
        let kind = kind_text.and_then(ResourceKind::parse);

        match (koreo_api, kind) {
            (true, Some(kind)) => self.kind = Some(kind),
            (true, None) => {
                let (span, message) = match (kind_node, kind_text) {
                    (Some(node), Some(text)) => (
                        node.span.clone(),
                        format!("`{text}` is not a Koreo resource kind"),
                    ),
                    _ => (root.span.clone(), "resource has no `kind`".to_string()),
                };
                self.report(DiagnosticCode::UnsupportedResource, span, message);
                return None;
            }
            (false, _) => {
                let span = root
                    .get("apiVersion")
                    .map(|node| node.span.clone())
                    .unwrap_or_else(|| root.span.clone());
                let message = match api_version {
                    Some(version) => format!("`{version}` is not a Koreo API version; skipped"),
                    None => "document has no `apiVersion`; skipped".to_string(),
                };
                self.report(DiagnosticCode::UnsupportedResource, span, message);
                return None;
            }
        }

        let name_node = root.get("metadata").and_then(|meta| meta.get("name"));
        let name = name_node.and_then(YamlNode::as_str).map(str::to_string);
        if self.kind == Some(ResourceKind::Workflow) {
            self.workflow = name.clone();
        }

        self.mapping(root, &schema::ROOT);

        let kind = self.kind?;
        let name_node = name_node?;
        let name = name?;
        let spec_node = root.get("spec");
        let spec = spec_node.map(YamlNode::to_json).unwrap_or(Value::Null);
        let derived = match (kind, spec_node) {
            (ResourceKind::Workflow, Some(node)) => Derived::Workflow(self.workflow_steps(node)),
            (ResourceKind::FunctionTest, Some(node)) => Derived::FunctionTest(self.test_spec(node)),
            (kind, _) if kind.is_function() => {
                Derived::Function(function_test::prepare(kind, &name, &spec).map(Arc::new))
            }
            _ => Derived::None,
        };

        Some(ResourceDefinition {
            kind,
            name,
            namespace: root
                .get("metadata")
                .and_then(|meta| meta.get("namespace"))
                .and_then(YamlNode::as_str)
                .map(str::to_string),
            spec,
            range: self.range(span),
            name_range: self.range(name_node.span.clone()),
            derived,
        })
    }

    fn mapping(&mut self, node: &YamlNode, rule: &'static MappingRule) {
        let Some(entries) = node.as_mapping() else {
            self.report(
                DiagnosticCode::InvalidType,
                node.span.clone(),
                format!("expected a mapping for {}, found a {}", rule.name, node.shape_name()),
            );
            self.free_form(node);
            return;
        };

        for entry in entries {
            match rule.field(&entry.key) {
                Some(field) => {
                    let anchor = SemanticAnchor::new(
                        self.range(entry.key_span.clone()),
                        AnchorRole::ResourceField,
                    )
                    .with_field(field);
                    self.anchors.push(anchor);
                    self.field(field, &entry.value, node);
                }
                None => {
                    if rule.strict {
                        self.report(
                            DiagnosticCode::UnknownField,
                            entry.key_span.clone(),
                            format!("unknown field `{}` in {}", entry.key, rule.name),
                        );
                    }
                    self.free_form(&entry.value);
                }
            }
        }

        for field in rule.fields.iter().filter(|field| field.required) {
            if node.entry(field.name).is_none() {
                self.report(
                    DiagnosticCode::MissingField,
                    node.span.clone(),
                    format!("{} is missing required field `{}`", rule.name, field.name),
                );
            }
        }

        for group in rule.groups {
            let present: Vec<&str> = group
                .members
                .iter()
                .copied()
                .filter(|member| node.entry(member).is_some())
                .collect();
            let listed = group
                .members
                .iter()
                .map(|member| format!("`{member}`"))
                .collect::<Vec<_>>()
                .join(", ");
            match (group.kind, present.len()) {
                (_, 0) => self.report(
                    DiagnosticCode::OneOf,
                    node.span.clone(),
                    format!("{} requires one of {listed}", rule.name),
                ),
                (GroupKind::OneOf, count) if count > 1 => {
                    let found = present
                        .iter()
                        .map(|member| format!("`{member}`"))
                        .collect::<Vec<_>>()
                        .join(" and ");
                    self.report(
                        DiagnosticCode::OneOf,
                        node.span.clone(),
                        format!("{} allows only one of {listed}, found {found}", rule.name),
                    )
                }
                _ => {}
            }
        }
    }

    fn field(&mut self, field: &'static Field, node: &YamlNode, parent: &YamlNode) {
        match field.shape {
            Shape::Scalar(rule) => self.scalar(field, rule, node, parent),
            Shape::Mapping(rule) => self.mapping(node, rule),
            Shape::Sequence(rule) => match node.as_sequence() {
                Some(items) => {
                    for item in items {
                        self.mapping(item, rule);
                    }
                }
                None => {
                    self.report(
                        DiagnosticCode::InvalidType,
                        node.span.clone(),
                        format!("`{}` must be a list, found a {}", field.name, node.shape_name()),
                    );
                    self.free_form(node);
                }
            },
            Shape::ValueMap => {
                let empty = node.as_str().map(str::is_empty).unwrap_or(false);
                if node.as_mapping().is_none() && !empty {
                    self.report(
                        DiagnosticCode::InvalidType,
                        node.span.clone(),
                        format!("`{}` must be a mapping, found a {}", field.name, node.shape_name()),
                    );
                }
                self.free_form(node);
            }
            Shape::FreeForm => self.free_form(node),
            Shape::Spec => match self.kind {
                Some(kind) => self.mapping(node, schema::spec_rule(kind)),
                None => self.free_form(node),
            },
        }
    }

    fn scalar(&mut self, field: &'static Field, rule: ScalarRule, node: &YamlNode, parent: &YamlNode) {
        let Some(scalar) = node.as_scalar() else {
            self.report(
                DiagnosticCode::InvalidType,
                node.span.clone(),
                format!("`{}` must be a scalar, found a {}", field.name, node.shape_name()),
            );
            self.free_form(node);
            return;
        };

        if expression::is_expression(&scalar.text) {
            match rule.expression {
                ExpressionPolicy::Never => {
                    let range = self.range(node.span.clone());
                    self.diagnostics.push(
                        Diagnostic::new(
                            DiagnosticCode::InvalidType,
                            range,
                            format!("`{}` is literal; expressions are not evaluated here", field.name),
                        )
                        .with_severity(Severity::Warning),
                    );
                }
                ExpressionPolicy::Allowed | ExpressionPolicy::Required => {
                    self.expression(scalar, node.span.clone());
                }
            }
            return;
        }

        if rule.expression == ExpressionPolicy::Required {
            self.report(
                DiagnosticCode::InvalidType,
                node.span.clone(),
                format!("`{}` must be an expression starting with '='", field.name),
            );
            return;
        }

        let value = scalar.value();
        let type_ok = match rule.scalar_type {
            ScalarType::Any => true,
            ScalarType::String => !value.is_null(),
            ScalarType::Bool => value.is_boolean(),
            ScalarType::Int => value.as_u64().is_some(),
        };
        if !type_ok {
            let expected = match rule.scalar_type {
                ScalarType::Bool => "a boolean",
                ScalarType::Int => "a non-negative integer",
                _ => "a value",
            };
            self.report(
                DiagnosticCode::InvalidType,
                node.span.clone(),
                format!("`{}` must be {expected}", field.name),
            );
            return;
        }

        if let Some(pattern) = rule.pattern {
            if !pattern.matches(&scalar.text) {
                self.report(
                    DiagnosticCode::InvalidName,
                    node.span.clone(),
                    format!(
                        "invalid {} `{}`: {}",
                        field.name,
                        scalar.text,
                        pattern.describe()
                    ),
                );
            }
        }

        let range = self.range(node.span.clone());
        let anchor = match rule.role {
            ScalarRole::Plain => return,
            ScalarRole::ResourceKind => {
                SemanticAnchor::new(range, AnchorRole::ResourceKind).with_detail(scalar.text.clone())
            }
            ScalarRole::ResourceName => {
                let anchor = SemanticAnchor::new(range, AnchorRole::ResourceNameDef);
                match self.kind {
                    Some(kind) => anchor.defining(SymbolId::resource(kind, scalar.text.clone())),
                    None => anchor,
                }
            }
            ScalarRole::StepLabel => {
                let anchor = SemanticAnchor::new(range, AnchorRole::StepLabelDef);
                match &self.workflow {
                    Some(workflow) => {
                        anchor.defining(SymbolId::step(workflow.clone(), scalar.text.clone()))
                    }
                    None => anchor,
                }
            }
            ScalarRole::RefKind => {
                let kind = ResourceKind::parse(&scalar.text);
                if !kind.map(ResourceKind::is_step_logic).unwrap_or(false) {
                    self.report(
                        DiagnosticCode::InvalidType,
                        node.span.clone(),
                        format!(
                            "`{}` cannot be referenced; expected ValueFunction, ResourceFunction or Workflow",
                            scalar.text
                        ),
                    );
                }
                SemanticAnchor::new(range, AnchorRole::ResourceKind).with_detail(scalar.text.clone())
            }
            ScalarRole::RefName => {
                let anchor = SemanticAnchor::new(range, AnchorRole::ResourceRefUse);
                let kind = parent
                    .get("kind")
                    .and_then(YamlNode::as_str)
                    .and_then(ResourceKind::parse);
                match kind {
                    Some(kind) => anchor.targeting(SymbolId::resource(kind, scalar.text.clone())),
                    None => anchor,
                }
            }
        };
        self.anchors.push(anchor);
    }

    /// Only nested expressions are examined below free-form nodes.
    fn free_form(&mut self, node: &YamlNode) {
        let mut found = Vec::new();
        node.scalars(&mut |scalar, span| {
            if expression::is_expression(&scalar.text) {
                found.push((scalar.clone(), span.clone()));
            }
        });
        for (scalar, span) in found {
            self.expression(&scalar, span);
        }
    }

    fn expression(&mut self, scalar: &Scalar, span: ops::Range<usize>) {
        let body = expression::expression_body(&scalar.text).unwrap_or_default();
        let lexed = tokenize(body);

        self.anchors.push(SemanticAnchor::new(
            self.range(span),
            AnchorRole::Expression,
        ));
        for token in &lexed.tokens {
            let range = self.range(body_span(scalar, token.start, token.end));
            self.anchors.push(
                SemanticAnchor::new(range, AnchorRole::ExpressionToken(token.kind))
                    .with_detail(token.lexeme.clone()),
            );
        }
        if let Some(workflow) = self.workflow.clone() {
            for mention in expression::step_mentions(&lexed.tokens) {
                let range = self.range(body_span(scalar, mention.start, mention.end));
                self.anchors.push(
                    SemanticAnchor::new(range, AnchorRole::StepRefUse)
                        .targeting(SymbolId::step(workflow.clone(), mention.label)),
                );
            }
        }

        if !lexed.errors.is_empty() {
            for error in &lexed.errors {
                let range = self.range(body_span(scalar, error.start, error.end));
                self.diagnostics.push(Diagnostic::new(
                    DiagnosticCode::LexicalError,
                    range,
                    error.message.clone(),
                ));
            }
            return;
        }

        let significant = lexed
            .tokens
            .iter()
            .any(|token| token.kind != TokenKind::Error);
        if let Err(error) = parse(&lexed.tokens, body.len()) {
            let span = if significant {
                body_span(scalar, error.start, error.end)
            } else {
                body_span(scalar, 0, 0)
            };
            let range = self.range(span);
            self.diagnostics.push(Diagnostic::new(
                DiagnosticCode::ExpressionSyntax,
                range,
                error.message,
            ));
        }
    }

    fn mentions_in(&self, node: &YamlNode) -> Vec<StepMentionSite> {
        let mut mentions = Vec::new();
        node.scalars(&mut |scalar, _| {
            let Some(body) = expression::expression_body(&scalar.text) else {
                return;
            };
            for mention in expression::step_mentions(&tokenize(body).tokens) {
                mentions.push(StepMentionSite {
                    range: self.range(body_span(scalar, mention.start, mention.end)),
                    label: mention.label,
                });
            }
        });
        mentions
    }

    fn workflow_steps(&self, spec: &YamlNode) -> Vec<WorkflowStep> {
        let Some(items) = spec.get("steps").and_then(YamlNode::as_sequence) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let label_node = item.get("label")?;
                let label = label_node.as_str()?.to_string();
                let text = |node: Option<&YamlNode>| node.and_then(YamlNode::as_str).map(str::to_string);
                let logic = if let Some(reference) = item.get("ref") {
                    let name_node = reference.get("name");
                    Some(LogicRef::Static {
                        kind: text(reference.get("kind")).as_deref().and_then(ResourceKind::parse),
                        name: text(name_node).unwrap_or_default(),
                        name_range: self.range(
                            name_node
                                .map(|node| node.span.clone())
                                .unwrap_or_else(|| reference.span.clone()),
                        ),
                    })
                } else {
                    item.get("refSwitch").map(|switch| LogicRef::Switch {
                        switch_on: text(switch.get("switchOn")).unwrap_or_default(),
                        cases: switch
                            .get("cases")
                            .and_then(YamlNode::as_sequence)
                            .unwrap_or_default()
                            .iter()
                            .map(|case| SwitchCase {
                                case: case.get("case").map(YamlNode::to_json).unwrap_or(Value::Null),
                                default: case
                                    .get("default")
                                    .map(|node| node.to_json() == Value::Bool(true))
                                    .unwrap_or(false),
                                kind: text(case.get("kind")).as_deref().and_then(ResourceKind::parse),
                                name: text(case.get("name")).unwrap_or_default(),
                                name_range: self.range(
                                    case.get("name")
                                        .map(|node| node.span.clone())
                                        .unwrap_or_else(|| case.span.clone()),
                                ),
                            })
                            .collect(),
                    })
                };
                Some(WorkflowStep {
                    label,
                    label_range: self.range(label_node.span.clone()),
                    range: self.range(item.span.clone()),
                    logic,
                    skip_if: text(item.get("skipIf")),
                    for_each: item.get("forEach").map(|each| ForEach {
                        item_in: text(each.get("itemIn")).unwrap_or_default(),
                        input_key: text(each.get("inputKey")),
                    }),
                    condition: item.get("condition").map(|condition| StepCondition {
                        condition_type: text(condition.get("type")).unwrap_or_default(),
                        name: text(condition.get("name")).unwrap_or_default(),
                    }),
                    state: item.get("state").map(YamlNode::to_json),
                    inputs: item
                        .get("inputs")
                        .map(YamlNode::to_json)
                        .filter(Value::is_object)
                        .unwrap_or_else(|| json!({})),
                    mentions: self.mentions_in(item),
                })
            })
            .collect()
    }

    fn test_spec(&self, spec: &YamlNode) -> FunctionTestSpec {
        let reference = spec.get("functionRef");
        let function_ref = reference.and_then(|reference| {
            let kind = ResourceKind::parse(reference.get("kind")?.as_str()?)?;
            Some((kind, reference.get("name")?.as_str()?.to_string()))
        });
        let function_ref_range = reference
            .and_then(|reference| reference.get("name"))
            .map(|node| self.range(node.span.clone()));

        let present = |node: Option<&YamlNode>| node.map(YamlNode::to_json).filter(|v| !v.is_null());
        let mut cases: Vec<TestCase> = spec
            .get("testCases")
            .and_then(YamlNode::as_sequence)
            .unwrap_or_default()
            .iter()
            .map(|item| self.test_case(item))
            .collect();

        let implicit_case = cases.is_empty();
        if implicit_case {
            cases.push(TestCase {
                label: None,
                variant: false,
                skip: false,
                input_overrides: None,
                current_resource: None,
                overlay_resource: None,
                expectation: Some(Expectation::Outcome(ExpectedOutcome::Ok)),
                range: self.range(spec.span.clone()),
                expectation_range: None,
            });
        }

        FunctionTestSpec {
            function_ref,
            function_ref_range,
            inputs: present(spec.get("inputs"))
                .filter(Value::is_object)
                .unwrap_or_else(|| json!({})),
            inputs_range: spec.entry("inputs").map(|entry| {
                (
                    self.range(entry.key_span.clone()),
                    self.range(entry.value.span.clone()),
                )
            }),
            parent: present(spec.get("parent")).filter(Value::is_object),
            current_resource: present(spec.get("currentResource")),
            cases,
            implicit_case,
        }
    }

    fn test_case(&self, item: &YamlNode) -> TestCase {
        let flag = |key: &str| {
            item.get(key)
                .map(|node| node.to_json() == Value::Bool(true))
                .unwrap_or(false)
        };
        let present = |key: &str| item.get(key).map(YamlNode::to_json).filter(|v| !v.is_null());

        let expectation_entry = ["expectResource", "expectDelete", "expectReturn", "expectOutcome"]
            .into_iter()
            .find_map(|key| item.entry(key));
        let expectation = expectation_entry.and_then(|entry| match entry.key.as_str() {
            "expectResource" => Some(Expectation::Resource(entry.value.to_json())),
            "expectDelete" => (entry.value.to_json() == Value::Bool(true)).then_some(Expectation::Delete),
            "expectReturn" => Some(Expectation::Return(entry.value.to_json())),
            _ => expected_outcome(&entry.value).map(Expectation::Outcome),
        });

        TestCase {
            label: item.get("label").and_then(YamlNode::as_str).map(str::to_string),
            variant: flag("variant"),
            skip: flag("skip"),
            input_overrides: present("inputOverrides"),
            current_resource: present("currentResource"),
            overlay_resource: present("overlayResource"),
            expectation,
            range: self.range(item.span.clone()),
            expectation_range: expectation_entry.map(|entry| self.range(entry.value.span.clone())),
        }
    }
}

fn expected_outcome(node: &YamlNode) -> Option<ExpectedOutcome> {
    let entry = node.as_mapping()?.first()?;
    let message = || {
        match entry.value.get("message").map(YamlNode::to_json) {
            Some(Value::String(message)) => message,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    };
    Some(match entry.key.as_str() {
        "ok" => ExpectedOutcome::Ok,
        "skip" => ExpectedOutcome::Skip(message()),
        "depSkip" => ExpectedOutcome::DepSkip(message()),
        "permFail" => ExpectedOutcome::PermFail(message()),
        "retry" => ExpectedOutcome::Retry {
            message: message(),
            delay: entry
                .value
                .get("delay")
                .and_then(|delay| delay.to_json().as_u64())
                .unwrap_or(0),
        },
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticCode;

    fn codes(extraction: &Extraction) -> Vec<DiagnosticCode> {
        extraction.diagnostics.iter().map(|d| d.code).collect()
    }

    const FUNCTION: &str = "\
apiVersion: koreo.dev/v1beta1
kind: ValueFunction
metadata:
  name: checks
spec:
  preconditions:
    - assert: =inputs.a > 0
      ok: {}
      skip:
        message: both
    - assert: =inputs.b > 0
      permFail:
        message: b must be positive
    - assert: =inputs.c >
      retry:
        message: wait
        delay: 5
  return:
    value: =inputs.a
";

    #[test]
    fn one_of_violation_is_local_to_its_condition() {
        let extraction = extract(FUNCTION);
        let one_of: Vec<&Diagnostic> = extraction
            .diagnostics
            .iter()
            .filter(|d| d.code == DiagnosticCode::OneOf)
            .collect();
        assert_eq!(one_of.len(), 1);
        assert_eq!(one_of[0].range.start.line, 6);
        assert!(one_of[0].message.contains("`ok` and `skip`"));
        // The third precondition still gets its own expression diagnostic.
        assert!(codes(&extraction).contains(&DiagnosticCode::ExpressionSyntax));
        assert_eq!(extraction.resources.len(), 1);
    }

    #[test]
    fn expression_tokens_are_anchored_in_the_document() {
        let extraction = extract(FUNCTION);
        let token = extraction
            .anchors
            .iter()
            .find(|a| {
                a.role == AnchorRole::ExpressionToken(TokenKind::Identifier)
                    && a.detail.as_deref() == Some("b")
            })
            .unwrap();
        let line = FUNCTION.lines().nth(token.range.start.line).unwrap();
        assert_eq!(&line[token.range.start.column..token.range.end.column], "b");
    }

    #[test]
    fn tokens_after_escapes_and_folds_stay_anchored() {
        let source = "\
apiVersion: koreo.dev/v1beta1
kind: ValueFunction
metadata:
  name: escaped
spec:
  return:
    quoted: \"=\\\"tab\\\\t\\\" + inputs.first\"
    folded: =inputs.second +
      inputs.third
";
        let extraction = extract(source);
        let location = SourceLocation::new(source);
        for name in ["first", "second", "third"] {
            let token = extraction
                .anchors
                .iter()
                .find(|a| {
                    a.role == AnchorRole::ExpressionToken(TokenKind::Identifier)
                        && a.detail.as_deref() == Some(name)
                })
                .unwrap_or_else(|| panic!("no anchor for `{name}`"));
            let start = location.position_to_byte(token.range.start);
            assert_eq!(&source[start..start + name.len()], name);
            assert_eq!(token.range.span, start..start + name.len());
        }
    }

    #[test]
    fn reports_missing_and_unknown_fields() {
        let text = "\
apiVersion: koreo.dev/v1beta1
kind: ResourceFunction
metadata:
  name: widget
spec:
  frobnicate: true
  resource:
    kind: Widget
";
        let extraction = extract(text);
        let codes = codes(&extraction);
        assert!(codes.contains(&DiagnosticCode::UnknownField));
        assert!(codes.contains(&DiagnosticCode::MissingField));
        let unknown = extraction
            .diagnostics
            .iter()
            .find(|d| d.code == DiagnosticCode::UnknownField)
            .unwrap();
        assert_eq!(unknown.severity, Severity::Warning);
    }

    #[test]
    fn naming_patterns_are_checked() {
        let text = "\
apiVersion: koreo.dev/v1beta1
kind: Workflow
metadata:
  name: Bad_Name
spec:
  steps:
    - label: build-image
      ref:
        kind: ValueFunction
        name: build
      condition:
        type: notPascal
        name: Built
";
        let extraction = extract(text);
        let invalid = extraction
            .diagnostics
            .iter()
            .filter(|d| d.code == DiagnosticCode::InvalidName)
            .count();
        assert_eq!(invalid, 3);
    }

    #[test]
    fn foreign_documents_are_informational_and_do_not_stop_the_stream() {
        let text = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
---
apiVersion: koreo.dev/v1beta1
kind: ValueFunction
metadata:
  name: ok-fn
spec:
  return:
    a: 1
";
        let extraction = extract(text);
        assert_eq!(codes(&extraction), vec![DiagnosticCode::UnsupportedResource]);
        assert_eq!(extraction.diagnostics[0].severity, Severity::Information);
        assert_eq!(extraction.resources.len(), 1);
    }

    #[test]
    fn yaml_errors_do_not_hide_later_documents() {
        let text = "\
apiVersion: koreo.dev/v1beta1
kind: ValueFunction
metadata: [oops
---
apiVersion: koreo.dev/v1beta1
kind: ValueFunction
metadata:
  name: second
spec:
  return:
    x: =inputs.
";
        let extraction = extract(text);
        let codes = codes(&extraction);
        assert!(codes.contains(&DiagnosticCode::YamlSyntax));
        assert!(codes.contains(&DiagnosticCode::ExpressionSyntax));
        assert_eq!(extraction.resources[0].name, "second");
    }

    #[test]
    fn builds_test_specs() {
        let text = "\
apiVersion: koreo.dev/v1beta1
kind: FunctionTest
metadata:
  name: sum-test
spec:
  functionRef:
    kind: ValueFunction
    name: sum
  inputs:
    values: [1, 2]
  testCases:
    - label: returns
      expectReturn:
        total: 3
    - variant: true
      inputOverrides:
        values: []
      expectOutcome:
        retry:
          delay: 0
";
        let extraction = extract(text);
        let spec = extraction.resources[0].test_spec().unwrap();
        assert_eq!(
            spec.function_ref,
            Some((ResourceKind::ValueFunction, "sum".to_string()))
        );
        assert_eq!(spec.cases.len(), 2);
        assert_eq!(
            spec.cases[0].expectation,
            Some(Expectation::Return(json!({"total": 3})))
        );
        assert!(spec.cases[1].variant);
        assert_eq!(
            spec.cases[1].expectation,
            Some(Expectation::Outcome(ExpectedOutcome::Retry {
                message: String::new(),
                delay: 0
            }))
        );
        assert!(!spec.implicit_case);
        assert!(spec.parent.is_none());
        let (key, value) = spec.inputs_range.clone().unwrap();
        assert_eq!(&text[key.span.clone()], "inputs");
        assert!(text[value.span.clone()].starts_with("values: [1, 2]"));
    }

    #[test]
    fn anchors_are_sorted_and_never_partially_overlap() {
        let extraction = extract(FUNCTION);
        for pair in extraction.anchors.windows(2) {
            assert!(pair[0].range.span.start <= pair[1].range.span.start);
        }
        for (i, a) in extraction.anchors.iter().enumerate() {
            for b in &extraction.anchors[i + 1..] {
                let disjoint = a.range.span.end <= b.range.span.start;
                assert!(
                    disjoint || a.range.encloses(&b.range),
                    "{:?} overlaps {:?}",
                    a.range,
                    b.range
                );
            }
        }
    }
}

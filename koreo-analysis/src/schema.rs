//! Static structure of the four Koreo resource kinds.
//!
//! The table is plain data interpreted by the extractor's walker: which fields
//! exist, which are required, which form one-of groups, where expressions are
//! allowed or required, which scalars name or reference symbols, and which
//! subtrees are free-form (walked only for nested expressions).

use crate::model::ResourceKind;

pub const API_GROUP: &str = "koreo.dev";
pub const API_VERSIONS: &[&str] = &["koreo.dev/v1beta1"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionPolicy {
    /// Literal only; an `=` prefix is not evaluated here.
    Never,
    Allowed,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Any,
    String,
    Bool,
    Int,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamePattern {
    /// `^\w+$`
    Label,
    /// Lowercase DNS subdomain, as Kubernetes object names.
    DnsName,
    PascalCase,
}

impl NamePattern {
    pub fn matches(self, value: &str) -> bool {
        match self {
            NamePattern::Label => {
                !value.is_empty() && value.chars().all(|c| c.is_alphanumeric() || c == '_')
            }
            NamePattern::DnsName => {
                let edge_ok = |c: Option<char>| {
                    matches!(c, Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit())
                };
                value.len() <= 253
                    && edge_ok(value.chars().next())
                    && edge_ok(value.chars().last())
                    && value.chars().all(|c| {
                        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_')
                    })
            }
            NamePattern::PascalCase => {
                let mut chars = value.chars();
                matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
                    && chars.all(|c| c.is_ascii_alphanumeric())
            }
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            NamePattern::Label => "letters, digits and underscores only (^\\w+$)",
            NamePattern::DnsName => {
                "lowercase letters, digits, '-', '.' or '_', starting and ending alphanumeric"
            }
            NamePattern::PascalCase => "PascalCase, e.g. 'Ready' or 'DatabaseReady'",
        }
    }
}

/// Meaning a scalar carries beyond its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarRole {
    Plain,
    /// Top-level `kind`.
    ResourceKind,
    /// `metadata.name`; defines the resource symbol.
    ResourceName,
    /// Step `label`; defines a step symbol in its workflow.
    StepLabel,
    /// `kind` inside a `{kind, name}` reference.
    RefKind,
    /// `name` inside a `{kind, name}` reference.
    RefName,
}

#[derive(Debug, Clone, Copy)]
pub struct ScalarRule {
    pub expression: ExpressionPolicy,
    pub scalar_type: ScalarType,
    pub pattern: Option<NamePattern>,
    pub role: ScalarRole,
}

impl ScalarRule {
    const fn literal(scalar_type: ScalarType) -> Self {
        Self {
            expression: ExpressionPolicy::Never,
            scalar_type,
            pattern: None,
            role: ScalarRole::Plain,
        }
    }

    const fn value() -> Self {
        Self {
            expression: ExpressionPolicy::Allowed,
            scalar_type: ScalarType::Any,
            pattern: None,
            role: ScalarRole::Plain,
        }
    }

    const fn expression() -> Self {
        Self {
            expression: ExpressionPolicy::Required,
            scalar_type: ScalarType::Any,
            pattern: None,
            role: ScalarRole::Plain,
        }
    }

    const fn named(role: ScalarRole, pattern: Option<NamePattern>) -> Self {
        Self {
            expression: ExpressionPolicy::Never,
            scalar_type: ScalarType::String,
            pattern,
            role,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Shape {
    Scalar(ScalarRule),
    Mapping(&'static MappingRule),
    Sequence(&'static MappingRule),
    /// Any structure; only nested expressions are examined.
    FreeForm,
    /// A mapping with arbitrary keys and free-form values.
    ValueMap,
    /// The kind-specific `spec` body.
    Spec,
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub required: bool,
    pub shape: Shape,
    pub doc: &'static str,
}

impl Field {
    const fn new(name: &'static str, shape: Shape, doc: &'static str) -> Self {
        Self {
            name,
            required: false,
            shape,
            doc,
        }
    }

    const fn required(name: &'static str, shape: Shape, doc: &'static str) -> Self {
        Self {
            name,
            required: true,
            shape,
            doc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// Exactly one member present.
    OneOf,
    /// At least one member present.
    AnyOf,
}

#[derive(Debug, Clone, Copy)]
pub struct Group {
    pub kind: GroupKind,
    pub members: &'static [&'static str],
}

#[derive(Debug)]
pub struct MappingRule {
    pub name: &'static str,
    pub fields: &'static [Field],
    pub groups: &'static [Group],
    /// Unknown keys are reported when strict.
    pub strict: bool,
}

impl MappingRule {
    pub fn field(&self, name: &str) -> Option<&'static Field> {
        self.fields.iter().find(|field| field.name == name)
    }
}

const fn one_of(members: &'static [&'static str]) -> Group {
    Group {
        kind: GroupKind::OneOf,
        members,
    }
}

pub static ROOT: MappingRule = MappingRule {
    name: "resource",
    fields: &[
        Field::required(
            "apiVersion",
            Shape::Scalar(ScalarRule::literal(ScalarType::String)),
            "API version, `koreo.dev/v1beta1`.",
        ),
        Field::required(
            "kind",
            Shape::Scalar(ScalarRule::named(ScalarRole::ResourceKind, None)),
            "One of ValueFunction, ResourceFunction, Workflow or FunctionTest.",
        ),
        Field::required("metadata", Shape::Mapping(&METADATA), "Object metadata."),
        Field::required("spec", Shape::Spec, "Kind-specific specification."),
    ],
    groups: &[],
    strict: true,
};

static METADATA: MappingRule = MappingRule {
    name: "metadata",
    fields: &[
        Field::required(
            "name",
            Shape::Scalar(ScalarRule::named(
                ScalarRole::ResourceName,
                Some(NamePattern::DnsName),
            )),
            "Resource name, unique per kind.",
        ),
        Field::new(
            "namespace",
            Shape::Scalar(ScalarRule::literal(ScalarType::String)),
            "Namespace the resource is applied to.",
        ),
        Field::new("labels", Shape::ValueMap, "Labels."),
        Field::new("annotations", Shape::ValueMap, "Annotations."),
    ],
    groups: &[],
    strict: false,
};

static REF: MappingRule = MappingRule {
    name: "reference",
    fields: &[
        Field::required(
            "kind",
            Shape::Scalar(ScalarRule::named(ScalarRole::RefKind, None)),
            "Kind of the referenced resource.",
        ),
        Field::required(
            "name",
            Shape::Scalar(ScalarRule::named(ScalarRole::RefName, None)),
            "Name of the referenced resource.",
        ),
    ],
    groups: &[],
    strict: true,
};

static MESSAGE: MappingRule = MappingRule {
    name: "outcome",
    fields: &[Field::new(
        "message",
        Shape::Scalar(ScalarRule::value()),
        "Message reported with the outcome.",
    )],
    groups: &[],
    strict: true,
};

static RETRY: MappingRule = MappingRule {
    name: "retry",
    fields: &[
        Field::new(
            "message",
            Shape::Scalar(ScalarRule::value()),
            "Message reported with the retry.",
        ),
        Field::new(
            "delay",
            Shape::Scalar(ScalarRule::literal(ScalarType::Int)),
            "Seconds before retrying.",
        ),
    ],
    groups: &[],
    strict: true,
};

static CONDITION: MappingRule = MappingRule {
    name: "condition",
    fields: &[
        Field::required(
            "assert",
            Shape::Scalar(ScalarRule::expression()),
            "Expression that must hold; otherwise the outcome applies.",
        ),
        Field::new("ok", Shape::FreeForm, "Continue normally."),
        Field::new("skip", Shape::Mapping(&MESSAGE), "Skip with a message."),
        Field::new(
            "depSkip",
            Shape::Mapping(&MESSAGE),
            "Skip because a dependency is not ready.",
        ),
        Field::new("retry", Shape::Mapping(&RETRY), "Retry after a delay."),
        Field::new("permFail", Shape::Mapping(&MESSAGE), "Fail permanently."),
        Field::new(
            "defaultReturn",
            Shape::FreeForm,
            "Return this value instead of evaluating further.",
        ),
    ],
    groups: &[one_of(&[
        "ok",
        "skip",
        "depSkip",
        "retry",
        "permFail",
        "defaultReturn",
    ])],
    strict: true,
};

static VALUE_FUNCTION: MappingRule = MappingRule {
    name: "ValueFunction spec",
    fields: &[
        Field::new(
            "preconditions",
            Shape::Sequence(&CONDITION),
            "Checked in order before evaluating locals and return.",
        ),
        Field::new("locals", Shape::ValueMap, "Named intermediate values."),
        Field::new("return", Shape::ValueMap, "Value returned on success."),
    ],
    groups: &[],
    strict: true,
};

static API_CONFIG: MappingRule = MappingRule {
    name: "apiConfig",
    fields: &[
        Field::required(
            "apiVersion",
            Shape::Scalar(ScalarRule::literal(ScalarType::String)),
            "API version of the managed resource.",
        ),
        Field::required(
            "kind",
            Shape::Scalar(ScalarRule::literal(ScalarType::String)),
            "Kind of the managed resource.",
        ),
        Field::required(
            "name",
            Shape::Scalar(ScalarRule::value()),
            "Name of the managed resource.",
        ),
        Field::new(
            "namespace",
            Shape::Scalar(ScalarRule::value()),
            "Namespace of the managed resource.",
        ),
        Field::new(
            "plural",
            Shape::Scalar(ScalarRule::literal(ScalarType::String)),
            "Plural resource name.",
        ),
        Field::new(
            "namespaced",
            Shape::Scalar(ScalarRule::literal(ScalarType::Bool)),
            "Whether the resource is namespaced.",
        ),
        Field::new(
            "owned",
            Shape::Scalar(ScalarRule::literal(ScalarType::Bool)),
            "Add an owner reference to the parent.",
        ),
        Field::new(
            "readonly",
            Shape::Scalar(ScalarRule::literal(ScalarType::Bool)),
            "Only read the resource, never modify it.",
        ),
        Field::new(
            "deleteIfExists",
            Shape::Scalar(ScalarRule::literal(ScalarType::Bool)),
            "Delete the resource when it exists.",
        ),
    ],
    groups: &[],
    strict: true,
};

static OVERLAY_ITEM: MappingRule = MappingRule {
    name: "overlay",
    fields: &[
        Field::new("overlay", Shape::FreeForm, "Inline overlay."),
        Field::new(
            "overlayRef",
            Shape::Mapping(&REF),
            "Overlay produced by a ValueFunction.",
        ),
        Field::new(
            "skipIf",
            Shape::Scalar(ScalarRule::expression()),
            "Skip this overlay when true.",
        ),
    ],
    groups: &[one_of(&["overlay", "overlayRef"])],
    strict: true,
};

static CREATE: MappingRule = MappingRule {
    name: "create",
    fields: &[
        Field::new(
            "enabled",
            Shape::Scalar(ScalarRule::literal(ScalarType::Bool)),
            "Create the resource when missing.",
        ),
        Field::new(
            "delay",
            Shape::Scalar(ScalarRule::literal(ScalarType::Int)),
            "Seconds to wait after creating.",
        ),
        Field::new("overlay", Shape::FreeForm, "Applied only on create."),
    ],
    groups: &[],
    strict: true,
};

static DELAY: MappingRule = MappingRule {
    name: "update",
    fields: &[Field::new(
        "delay",
        Shape::Scalar(ScalarRule::literal(ScalarType::Int)),
        "Seconds to wait after updating.",
    )],
    groups: &[],
    strict: true,
};

static UPDATE: MappingRule = MappingRule {
    name: "update",
    fields: &[
        Field::new("patch", Shape::Mapping(&DELAY), "Patch differences in place."),
        Field::new("recreate", Shape::Mapping(&DELAY), "Delete and recreate."),
        Field::new("never", Shape::FreeForm, "Never update."),
    ],
    groups: &[one_of(&["patch", "recreate", "never"])],
    strict: true,
};

static DELETE: MappingRule = MappingRule {
    name: "delete",
    fields: &[
        Field::new("abandon", Shape::FreeForm, "Leave the resource behind."),
        Field::new("destroy", Shape::FreeForm, "Delete the resource."),
    ],
    groups: &[one_of(&["abandon", "destroy"])],
    strict: true,
};

static RESOURCE_FUNCTION: MappingRule = MappingRule {
    name: "ResourceFunction spec",
    fields: &[
        Field::new(
            "preconditions",
            Shape::Sequence(&CONDITION),
            "Checked in order before materializing.",
        ),
        Field::new("locals", Shape::ValueMap, "Named intermediate values."),
        Field::required(
            "apiConfig",
            Shape::Mapping(&API_CONFIG),
            "Identity of the managed resource.",
        ),
        Field::new("resource", Shape::FreeForm, "Base resource body."),
        Field::new(
            "overlays",
            Shape::Sequence(&OVERLAY_ITEM),
            "Applied in order on top of the base resource.",
        ),
        Field::new("create", Shape::Mapping(&CREATE), "Creation behaviour."),
        Field::new("update", Shape::Mapping(&UPDATE), "Update behaviour."),
        Field::new("delete", Shape::Mapping(&DELETE), "Deletion behaviour."),
        Field::new(
            "postconditions",
            Shape::Sequence(&CONDITION),
            "Checked against the resource after reconciling.",
        ),
        Field::new("return", Shape::ValueMap, "Value returned on success."),
    ],
    groups: &[],
    strict: true,
};

static CRD_REF: MappingRule = MappingRule {
    name: "crdRef",
    fields: &[
        Field::required(
            "apiGroup",
            Shape::Scalar(ScalarRule::literal(ScalarType::String)),
            "API group of the parent CRD.",
        ),
        Field::required(
            "version",
            Shape::Scalar(ScalarRule::literal(ScalarType::String)),
            "Version of the parent CRD.",
        ),
        Field::required(
            "kind",
            Shape::Scalar(ScalarRule::literal(ScalarType::String)),
            "Kind of the parent CRD.",
        ),
    ],
    groups: &[],
    strict: true,
};

static SWITCH_CASE: MappingRule = MappingRule {
    name: "refSwitch case",
    fields: &[
        Field::new(
            "case",
            Shape::Scalar(ScalarRule::literal(ScalarType::Any)),
            "Value of switchOn selecting this case.",
        ),
        Field::new(
            "default",
            Shape::Scalar(ScalarRule::literal(ScalarType::Bool)),
            "Used when no case matches.",
        ),
        Field::required(
            "kind",
            Shape::Scalar(ScalarRule::named(ScalarRole::RefKind, None)),
            "Kind of the referenced logic.",
        ),
        Field::required(
            "name",
            Shape::Scalar(ScalarRule::named(ScalarRole::RefName, None)),
            "Name of the referenced logic.",
        ),
    ],
    groups: &[],
    strict: true,
};

static REF_SWITCH: MappingRule = MappingRule {
    name: "refSwitch",
    fields: &[
        Field::required(
            "switchOn",
            Shape::Scalar(ScalarRule::expression()),
            "Expression whose value selects a case.",
        ),
        Field::required("cases", Shape::Sequence(&SWITCH_CASE), "Candidate logic."),
    ],
    groups: &[],
    strict: true,
};

static FOR_EACH: MappingRule = MappingRule {
    name: "forEach",
    fields: &[
        Field::required(
            "itemIn",
            Shape::Scalar(ScalarRule::expression()),
            "Expression producing the list to iterate.",
        ),
        Field::new(
            "inputKey",
            Shape::Scalar(ScalarRule::literal(ScalarType::String)),
            "Input name receiving each item.",
        ),
    ],
    groups: &[],
    strict: true,
};

static STEP_CONDITION: MappingRule = MappingRule {
    name: "condition",
    fields: &[
        Field::required(
            "type",
            Shape::Scalar(ScalarRule::named(
                ScalarRole::Plain,
                Some(NamePattern::PascalCase),
            )),
            "Condition type reported on the parent.",
        ),
        Field::required(
            "name",
            Shape::Scalar(ScalarRule::literal(ScalarType::String)),
            "Human readable condition name.",
        ),
    ],
    groups: &[],
    strict: true,
};

static STEP: MappingRule = MappingRule {
    name: "step",
    fields: &[
        Field::required(
            "label",
            Shape::Scalar(ScalarRule::named(
                ScalarRole::StepLabel,
                Some(NamePattern::Label),
            )),
            "Step label, unique within the workflow.",
        ),
        Field::new("ref", Shape::Mapping(&REF), "Logic run by this step."),
        Field::new(
            "refSwitch",
            Shape::Mapping(&REF_SWITCH),
            "Logic chosen at runtime.",
        ),
        Field::new(
            "skipIf",
            Shape::Scalar(ScalarRule::expression()),
            "Skip the step when true.",
        ),
        Field::new(
            "forEach",
            Shape::Mapping(&FOR_EACH),
            "Run the logic once per item.",
        ),
        Field::new("inputs", Shape::ValueMap, "Inputs passed to the logic."),
        Field::new(
            "condition",
            Shape::Mapping(&STEP_CONDITION),
            "Condition reported on the parent.",
        ),
        Field::new("state", Shape::FreeForm, "Values written to parent status."),
    ],
    groups: &[one_of(&["ref", "refSwitch"])],
    strict: true,
};

static WORKFLOW: MappingRule = MappingRule {
    name: "Workflow spec",
    fields: &[
        Field::new("crdRef", Shape::Mapping(&CRD_REF), "Parent resource type."),
        Field::required("steps", Shape::Sequence(&STEP), "Workflow steps."),
    ],
    groups: &[],
    strict: true,
};

static EXPECT_OUTCOME: MappingRule = MappingRule {
    name: "expectOutcome",
    fields: &[
        Field::new("ok", Shape::FreeForm, "Expect Ok."),
        Field::new("skip", Shape::Mapping(&MESSAGE), "Expect Skip."),
        Field::new("depSkip", Shape::Mapping(&MESSAGE), "Expect DepSkip."),
        Field::new("retry", Shape::Mapping(&RETRY), "Expect Retry."),
        Field::new("permFail", Shape::Mapping(&MESSAGE), "Expect PermFail."),
    ],
    groups: &[one_of(&["ok", "skip", "depSkip", "retry", "permFail"])],
    strict: true,
};

static TEST_CASE: MappingRule = MappingRule {
    name: "test case",
    fields: &[
        Field::new(
            "label",
            Shape::Scalar(ScalarRule::literal(ScalarType::String)),
            "Name shown in results.",
        ),
        Field::new(
            "variant",
            Shape::Scalar(ScalarRule::literal(ScalarType::Bool)),
            "Do not carry this case's changes forward.",
        ),
        Field::new(
            "skip",
            Shape::Scalar(ScalarRule::literal(ScalarType::Bool)),
            "Do not run this case.",
        ),
        Field::new(
            "inputOverrides",
            Shape::ValueMap,
            "Merged over the carried inputs.",
        ),
        Field::new(
            "currentResource",
            Shape::FreeForm,
            "Replaces the carried resource.",
        ),
        Field::new(
            "overlayResource",
            Shape::FreeForm,
            "Overlaid on the carried resource; `template` is that resource.",
        ),
        Field::new(
            "expectResource",
            Shape::FreeForm,
            "Expected resource after the change.",
        ),
        Field::new(
            "expectDelete",
            Shape::Scalar(ScalarRule::literal(ScalarType::Bool)),
            "Expect the resource to be deleted.",
        ),
        Field::new("expectReturn", Shape::FreeForm, "Expected return value."),
        Field::new(
            "expectOutcome",
            Shape::Mapping(&EXPECT_OUTCOME),
            "Expected outcome.",
        ),
    ],
    groups: &[one_of(&[
        "expectResource",
        "expectDelete",
        "expectReturn",
        "expectOutcome",
    ])],
    strict: true,
};

static FUNCTION_TEST: MappingRule = MappingRule {
    name: "FunctionTest spec",
    fields: &[
        Field::required(
            "functionRef",
            Shape::Mapping(&REF),
            "Function under test.",
        ),
        Field::new("inputs", Shape::ValueMap, "Inputs for the first case."),
        Field::new(
            "parent",
            Shape::FreeForm,
            "Parent resource the function reads as `parent`.",
        ),
        Field::new(
            "currentResource",
            Shape::FreeForm,
            "Resource state for the first case.",
        ),
        Field::new(
            "testCases",
            Shape::Sequence(&TEST_CASE),
            "Cases run in order.",
        ),
    ],
    groups: &[],
    strict: true,
};

pub fn spec_rule(kind: ResourceKind) -> &'static MappingRule {
    match kind {
        ResourceKind::ValueFunction => &VALUE_FUNCTION,
        ResourceKind::ResourceFunction => &RESOURCE_FUNCTION,
        ResourceKind::Workflow => &WORKFLOW,
        ResourceKind::FunctionTest => &FUNCTION_TEST,
    }
}

/// One step of a path into a resource document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Resolves the mapping rule governing the mapping found at `path`.
///
/// Returns `None` once the path leaves the schema (free-form data, unknown
/// keys, or a `spec` without a known kind).
pub fn mapping_at(kind: Option<ResourceKind>, path: &[PathSegment]) -> Option<&'static MappingRule> {
    let mut current: &'static MappingRule = &ROOT;
    let mut segments = path.iter();
    while let Some(segment) = segments.next() {
        let PathSegment::Key(key) = segment else {
            return None;
        };
        let field = current.field(key)?;
        current = match field.shape {
            Shape::Mapping(rule) => rule,
            Shape::Spec => spec_rule(kind?),
            Shape::Sequence(rule) => {
                match segments.next() {
                    Some(PathSegment::Index(_)) => rule,
                    // The sequence itself; its items are what callers want.
                    None => return Some(rule),
                    Some(PathSegment::Key(_)) => return None,
                }
            }
            Shape::Scalar(_) | Shape::FreeForm | Shape::ValueMap => return None,
        };
    }
    Some(current)
}

/// The field definition addressed by `path`, if the schema knows it.
pub fn field_at(kind: Option<ResourceKind>, path: &[PathSegment]) -> Option<&'static Field> {
    let (last, parent) = match path.split_last()? {
        (PathSegment::Key(key), parent) => (key, parent),
        (PathSegment::Index(_), parent) => return field_at(kind, parent),
    };
    mapping_at(kind, parent)?.field(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> PathSegment {
        PathSegment::Key(name.into())
    }

    #[test]
    fn name_patterns() {
        assert!(NamePattern::Label.matches("build_image2"));
        assert!(!NamePattern::Label.matches("build-image"));
        assert!(!NamePattern::Label.matches(""));
        assert!(NamePattern::DnsName.matches("sum-and-average.v1"));
        assert!(!NamePattern::DnsName.matches("Sum"));
        assert!(!NamePattern::DnsName.matches("-lead"));
        assert!(NamePattern::PascalCase.matches("DatabaseReady"));
        assert!(!NamePattern::PascalCase.matches("databaseReady"));
    }

    #[test]
    fn resolves_nested_mappings() {
        let step = mapping_at(
            Some(ResourceKind::Workflow),
            &[key("spec"), key("steps"), PathSegment::Index(0)],
        )
        .unwrap();
        assert_eq!(step.name, "step");
        assert!(step.field("refSwitch").is_some());

        let condition = mapping_at(
            Some(ResourceKind::ValueFunction),
            &[key("spec"), key("preconditions"), PathSegment::Index(2)],
        )
        .unwrap();
        assert_eq!(condition.groups[0].members.len(), 6);

        assert!(mapping_at(None, &[key("spec")]).is_none());
        assert!(mapping_at(
            Some(ResourceKind::ResourceFunction),
            &[key("spec"), key("resource"), key("metadata")]
        )
        .is_none());
    }

    #[test]
    fn every_group_member_is_a_field() {
        let kinds = [
            ResourceKind::ValueFunction,
            ResourceKind::ResourceFunction,
            ResourceKind::Workflow,
            ResourceKind::FunctionTest,
        ];
        fn check(rule: &'static MappingRule) {
            for group in rule.groups {
                for member in group.members {
                    assert!(rule.field(member).is_some(), "{}: {member}", rule.name);
                }
            }
            for field in rule.fields {
                if let Shape::Mapping(child) | Shape::Sequence(child) = field.shape {
                    check(child);
                }
            }
        }
        check(&ROOT);
        for kind in kinds {
            check(spec_rule(kind));
        }
    }

    #[test]
    fn field_lookup() {
        let field = field_at(
            Some(ResourceKind::Workflow),
            &[key("spec"), key("steps"), PathSegment::Index(0), key("label")],
        )
        .unwrap();
        assert!(field.required);
        assert!(matches!(
            field.shape,
            Shape::Scalar(ScalarRule {
                role: ScalarRole::StepLabel,
                ..
            })
        ));
    }
}

//! Declarative schemas: derivation and decomposition rules stored as atoms.
//!
//! A schema is ordinary knowledge: an atom of kind `Schema` (or `Rule`)
//! whose map content declares either a two-premise derivation or a goal
//! decomposition. Compilation validates the shape once at registration so
//! the matcher works with checked structures on the hot path.
//!
//! Derivation form:
//!
//! ```text
//! { pattern_a: { kind, content }, pattern_b: { kind, content },
//!   derive:    { kind, content, label?, attach_to_goal? } }
//! ```
//!
//! Decomposition form:
//!
//! ```text
//! { goal: { kind, content },
//!   subgoals: [ { id, kind, content, label?, deps? }, ... ] }
//! ```

use crate::atom::{Atom, AtomId};
use crate::content::Content;
use crate::error::ValidationError;
use crate::item::ItemKind;

/// A pattern paired with the item kind it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct KindPattern {
    /// The item kind this side of the rule matches.
    pub kind: ItemKind,
    /// Unification pattern over the item's atom content.
    pub pattern: Content,
}

/// What a derivation schema produces on a successful match.
#[derive(Debug, Clone, PartialEq)]
pub struct DeriveTemplate {
    /// Kind of the derived item.
    pub kind: ItemKind,
    /// Content template, instantiated with the match bindings.
    pub content: Content,
    /// Optional label template.
    pub label: Option<Content>,
    /// When true and one premise belongs to a goal tree, the derived item
    /// is attached under that goal.
    pub attach_to_goal: bool,
}

/// One subgoal produced by a decomposition schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SubGoalTemplate {
    /// Local id used by sibling `deps` references.
    pub tmp_id: String,
    /// Kind of the subgoal item (usually `Goal`).
    pub kind: ItemKind,
    /// Content template.
    pub content: Content,
    /// Optional label.
    pub label: Option<String>,
    /// Local ids of sibling subgoals that must be achieved first.
    pub deps: Vec<String>,
}

/// The compiled body of a schema.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaBody {
    /// Two-premise forward derivation.
    Derivation {
        /// Pattern for the item being processed.
        a: KindPattern,
        /// Pattern for a context item.
        b: KindPattern,
        /// Product template.
        template: DeriveTemplate,
    },
    /// Goal decomposition into dependent subgoals.
    Decomposition {
        /// Pattern the goal must match.
        goal: KindPattern,
        /// Subgoals to mint, in declaration order.
        subgoals: Vec<SubGoalTemplate>,
    },
}

/// A validated, ready-to-match schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSchema {
    /// The schema atom's id, stamped on everything it derives.
    pub id: AtomId,
    /// The schema atom's source trust, scaling derived attention and truth.
    pub trust: f32,
    /// Checked rule body.
    pub body: SchemaBody,
}

impl CompiledSchema {
    /// Compiles a schema atom, validating kind and shape.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::NotASchema` for non-schema atom kinds and
    /// `ValidationError::MalformedSchema` for shape problems.
    pub fn compile(atom: &Atom) -> Result<Self, ValidationError> {
        if !atom.meta.kind.is_schema_kind() {
            return Err(ValidationError::NotASchema {
                id: atom.id,
                kind: atom.meta.kind,
            });
        }
        let map = atom.content.as_map().ok_or_else(|| malformed("content must be a map"))?;

        let body = if map.contains_key("subgoals") {
            let goal = kind_pattern(atom.content.get("goal"), "goal")?;
            let subgoals_node = atom
                .content
                .get("subgoals")
                .and_then(Content::as_list)
                .ok_or_else(|| malformed("'subgoals' must be a list"))?;
            if subgoals_node.is_empty() {
                return Err(malformed("'subgoals' must not be empty"));
            }
            let mut subgoals = Vec::with_capacity(subgoals_node.len());
            for node in subgoals_node {
                subgoals.push(subgoal_template(node)?);
            }
            for sg in &subgoals {
                for dep in &sg.deps {
                    if !subgoals.iter().any(|other| &other.tmp_id == dep) {
                        return Err(malformed(&format!(
                            "subgoal '{}' depends on unknown sibling '{dep}'",
                            sg.tmp_id
                        )));
                    }
                }
            }
            SchemaBody::Decomposition { goal, subgoals }
        } else {
            let a = kind_pattern(atom.content.get("pattern_a"), "pattern_a")?;
            let b = kind_pattern(atom.content.get("pattern_b"), "pattern_b")?;
            let template = derive_template(atom.content.get("derive"))?;
            SchemaBody::Derivation { a, b, template }
        };

        Ok(Self {
            id: atom.id,
            trust: atom.meta.trust,
            body,
        })
    }

    /// The kind pair this schema's derivation applies to, if it is one.
    #[must_use]
    pub fn derivation_kinds(&self) -> Option<(ItemKind, ItemKind)> {
        match &self.body {
            SchemaBody::Derivation { a, b, .. } => Some((a.kind, b.kind)),
            SchemaBody::Decomposition { .. } => None,
        }
    }

    /// The goal kind this schema decomposes, if it is a decomposition.
    #[must_use]
    pub fn decomposition_kind(&self) -> Option<ItemKind> {
        match &self.body {
            SchemaBody::Decomposition { goal, .. } => Some(goal.kind),
            SchemaBody::Derivation { .. } => None,
        }
    }
}

fn malformed(reason: &str) -> ValidationError {
    ValidationError::MalformedSchema {
        reason: reason.to_string(),
    }
}

fn parse_kind(node: Option<&Content>, field: &str) -> Result<ItemKind, ValidationError> {
    node.and_then(Content::as_text)
        .and_then(ItemKind::parse)
        .ok_or_else(|| malformed(&format!("'{field}' needs a valid 'kind'")))
}

fn kind_pattern(node: Option<&Content>, field: &str) -> Result<KindPattern, ValidationError> {
    let node = node.ok_or_else(|| malformed(&format!("missing '{field}'")))?;
    let kind = parse_kind(node.get("kind"), field)?;
    let pattern = node
        .get("content")
        .cloned()
        .ok_or_else(|| malformed(&format!("'{field}' needs 'content'")))?;
    Ok(KindPattern { kind, pattern })
}

fn derive_template(node: Option<&Content>) -> Result<DeriveTemplate, ValidationError> {
    let node = node.ok_or_else(|| malformed("missing 'derive'"))?;
    let kind = parse_kind(node.get("kind"), "derive")?;
    let content = node
        .get("content")
        .cloned()
        .ok_or_else(|| malformed("'derive' needs 'content'"))?;
    let label = node.get("label").cloned();
    let attach_to_goal = node
        .get("attach_to_goal")
        .and_then(Content::as_text)
        .is_some_and(|s| s == "true");
    Ok(DeriveTemplate {
        kind,
        content,
        label,
        attach_to_goal,
    })
}

fn subgoal_template(node: &Content) -> Result<SubGoalTemplate, ValidationError> {
    let tmp_id = node
        .get("id")
        .and_then(Content::as_text)
        .ok_or_else(|| malformed("subgoal needs an 'id'"))?
        .to_string();
    let kind = parse_kind(node.get("kind"), "subgoal")?;
    let content = node
        .get("content")
        .cloned()
        .ok_or_else(|| malformed(&format!("subgoal '{tmp_id}' needs 'content'")))?;
    let label = node
        .get("label")
        .and_then(Content::as_text)
        .map(str::to_string);
    let deps = match node.get("deps") {
        None => Vec::new(),
        Some(deps) => deps
            .as_list()
            .ok_or_else(|| malformed("'deps' must be a list"))?
            .iter()
            .map(|d| {
                d.as_text()
                    .map(str::to_string)
                    .ok_or_else(|| malformed("'deps' entries must be text"))
            })
            .collect::<Result<_, _>>()?,
    };
    Ok(SubGoalTemplate {
        tmp_id,
        kind,
        content,
        label,
        deps,
    })
}

/// Builds the content of a derivation schema atom.
#[must_use]
pub fn derivation_content(
    a_kind: ItemKind,
    a_pattern: Content,
    b_kind: ItemKind,
    b_pattern: Content,
    template: DeriveTemplate,
) -> Content {
    let mut derive = vec![
        ("kind".to_string(), Content::text(template.kind.to_string())),
        ("content".to_string(), template.content),
    ];
    if let Some(label) = template.label {
        derive.push(("label".to_string(), label));
    }
    if template.attach_to_goal {
        derive.push(("attach_to_goal".to_string(), Content::text("true")));
    }
    Content::map(vec![
        (
            "pattern_a".to_string(),
            Content::map(vec![
                ("kind".to_string(), Content::text(a_kind.to_string())),
                ("content".to_string(), a_pattern),
            ]),
        ),
        (
            "pattern_b".to_string(),
            Content::map(vec![
                ("kind".to_string(), Content::text(b_kind.to_string())),
                ("content".to_string(), b_pattern),
            ]),
        ),
        ("derive".to_string(), Content::map(derive)),
    ])
}

/// Builds the content of a decomposition schema atom.
#[must_use]
pub fn decomposition_content(goal_pattern: Content, subgoals: Vec<SubGoalTemplate>) -> Content {
    let subgoal_nodes = subgoals
        .into_iter()
        .map(|sg| {
            let mut fields = vec![
                ("id".to_string(), Content::text(sg.tmp_id)),
                ("kind".to_string(), Content::text(sg.kind.to_string())),
                ("content".to_string(), sg.content),
            ];
            if let Some(label) = sg.label {
                fields.push(("label".to_string(), Content::text(label)));
            }
            if !sg.deps.is_empty() {
                fields.push((
                    "deps".to_string(),
                    Content::list(sg.deps.into_iter().map(Content::text).collect()),
                ));
            }
            Content::map(fields)
        })
        .collect();
    Content::map(vec![
        (
            "goal".to_string(),
            Content::map(vec![
                ("kind".to_string(), Content::text(ItemKind::Goal.to_string())),
                ("content".to_string(), goal_pattern),
            ]),
        ),
        ("subgoals".to_string(), Content::list(subgoal_nodes)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{AtomKind, AtomMeta};

    fn schema_atom(content: Content) -> Atom {
        let meta = AtomMeta::new(AtomKind::Schema, "rules", 0.9).unwrap();
        Atom::new(content, Vec::new(), meta)
    }

    fn sample_derivation() -> Content {
        derivation_content(
            ItemKind::Goal,
            Content::list(vec![Content::text("obtain"), Content::text("?x")]),
            ItemKind::Belief,
            Content::list(vec![
                Content::text("is_similar_to"),
                Content::text("?x"),
                Content::text("?y"),
            ]),
            DeriveTemplate {
                kind: ItemKind::Goal,
                content: Content::list(vec![Content::text("obtain"), Content::text("?y")]),
                label: None,
                attach_to_goal: true,
            },
        )
    }

    #[test]
    fn compiles_a_derivation() {
        let atom = schema_atom(sample_derivation());
        let schema = CompiledSchema::compile(&atom).unwrap();
        assert_eq!(
            schema.derivation_kinds(),
            Some((ItemKind::Goal, ItemKind::Belief))
        );
        assert_eq!(schema.decomposition_kind(), None);
        match schema.body {
            SchemaBody::Derivation { template, .. } => assert!(template.attach_to_goal),
            SchemaBody::Decomposition { .. } => panic!("expected derivation"),
        }
    }

    #[test]
    fn compiles_a_decomposition() {
        let content = decomposition_content(
            Content::list(vec![Content::text("make"), Content::text("?dish")]),
            vec![
                SubGoalTemplate {
                    tmp_id: "gather".to_string(),
                    kind: ItemKind::Goal,
                    content: Content::list(vec![
                        Content::text("gather_ingredients"),
                        Content::text("?dish"),
                    ]),
                    label: Some("gather".to_string()),
                    deps: Vec::new(),
                },
                SubGoalTemplate {
                    tmp_id: "cook".to_string(),
                    kind: ItemKind::Goal,
                    content: Content::list(vec![Content::text("cook"), Content::text("?dish")]),
                    label: None,
                    deps: vec!["gather".to_string()],
                },
            ],
        );
        let schema = CompiledSchema::compile(&schema_atom(content)).unwrap();
        assert_eq!(schema.decomposition_kind(), Some(ItemKind::Goal));
        match schema.body {
            SchemaBody::Decomposition { subgoals, .. } => {
                assert_eq!(subgoals.len(), 2);
                assert_eq!(subgoals[1].deps, ["gather"]);
            }
            SchemaBody::Derivation { .. } => panic!("expected decomposition"),
        }
    }

    #[test]
    fn rejects_non_schema_atom_kinds() {
        let meta = AtomMeta::new(AtomKind::Fact, "rules", 0.9).unwrap();
        let atom = Atom::new(sample_derivation(), Vec::new(), meta);
        assert!(matches!(
            CompiledSchema::compile(&atom),
            Err(ValidationError::NotASchema { .. })
        ));
    }

    #[test]
    fn rejects_missing_pattern() {
        let mut map = sample_derivation().as_map().unwrap().clone();
        map.remove("pattern_b");
        let atom = schema_atom(Content::Map(map));
        assert!(matches!(
            CompiledSchema::compile(&atom),
            Err(ValidationError::MalformedSchema { .. })
        ));
    }

    #[test]
    fn rejects_non_map_content() {
        let atom = schema_atom(Content::text("not a schema"));
        assert!(CompiledSchema::compile(&atom).is_err());
    }

    #[test]
    fn rejects_unknown_dep_reference() {
        let content = decomposition_content(
            Content::text("?g"),
            vec![SubGoalTemplate {
                tmp_id: "a".to_string(),
                kind: ItemKind::Goal,
                content: Content::text("step"),
                label: None,
                deps: vec!["ghost".to_string()],
            }],
        );
        assert!(CompiledSchema::compile(&schema_atom(content)).is_err());
    }

    #[test]
    fn rejects_empty_subgoal_list() {
        let content = Content::map(vec![
            (
                "goal",
                Content::map(vec![
                    ("kind", Content::text("goal")),
                    ("content", Content::text("?g")),
                ]),
            ),
            ("subgoals", Content::list(vec![])),
        ]);
        assert!(CompiledSchema::compile(&schema_atom(content)).is_err());
    }
}

//! Static validation of a parsed document against a schema.
//!
//! Every rule runs over the whole document; errors come back in the order
//! they were found.

use crate::error::{Location, QueryError};
use crate::query::{Argument, Directive, Document, Fragment, Name, Operation, Selection, Value, MAX_NESTING};
use crate::schema::{NamedType, ObjectType, Schema};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Validate `doc` against `schema`. A `max_depth` of 0 disables the depth limit.
pub fn validate(schema: &Schema, doc: &Document, max_depth: usize) -> Vec<QueryError> {
    let mut v = Validator {
        schema,
        doc,
        errors: Vec::new(),
    };
    v.run(max_depth);
    v.errors
}

/// Variables and fragments referenced directly by one selection set.
#[derive(Default)]
struct Usage<'d> {
    vars: Vec<(&'d str, Location)>,
    spreads: Vec<&'d str>,
}

struct Validator<'a> {
    schema: &'a Schema,
    doc: &'a Document,
    errors: Vec<QueryError>,
}

impl<'a> Validator<'a> {
    fn error(&mut self, message: String, loc: Location) {
        self.errors.push(QueryError::new(message).at(loc));
    }

    fn run(&mut self, max_depth: usize) {
        let doc = self.doc;
        self.check_operation_names();

        let mut fragment_usage: HashMap<&'a str, Usage<'a>> = HashMap::new();
        for fragment in &doc.fragments {
            if fragment_usage.contains_key(fragment.name.name.as_str()) {
                self.error(
                    format!("There can be only one fragment named {:?}.", fragment.name.name),
                    fragment.name.loc,
                );
                continue;
            }
            let usage = self.check_fragment(fragment);
            fragment_usage.insert(&fragment.name.name, usage);
        }
        let before = self.errors.len();
        self.check_fragment_cycles(&fragment_usage);
        let shallow = self.errors.len() == before && self.check_nesting(&fragment_usage);

        let mut used_fragments = HashSet::new();
        for op in &doc.operations {
            used_fragments.extend(self.check_operation(op, &fragment_usage));
            if max_depth > 0 && shallow {
                self.check_depth(&op.selections, 1, max_depth, &mut Vec::new());
            }
        }

        for fragment in &doc.fragments {
            if !used_fragments.contains(fragment.name.name.as_str()) {
                self.error(format!("Fragment {:?} is never used.", fragment.name.name), fragment.loc);
            }
        }
    }

    fn check_operation_names(&mut self) {
        let doc = self.doc;
        let mut seen = HashSet::new();
        for op in &doc.operations {
            match &op.name {
                Some(name) => {
                    if !seen.insert(name.name.as_str()) {
                        self.error(format!("There can be only one operation named {:?}.", name.name), name.loc);
                    }
                }
                None if doc.operations.len() > 1 => {
                    self.error(
                        "This anonymous operation must be the only defined operation.".to_string(),
                        op.loc,
                    );
                }
                None => {}
            }
        }
    }

    fn check_fragment(&mut self, fragment: &'a Fragment) -> Usage<'a> {
        let mut usage = Usage::default();
        self.check_directives(&fragment.directives, &mut usage);
        if let Some(object) = self.condition_type(&fragment.on) {
            self.check_selections(&object, &fragment.selections, &mut usage);
        }
        usage
    }

    /// Resolve a type condition, reporting unknown and non-object types.
    fn condition_type(&mut self, on: &Name) -> Option<Arc<ObjectType>> {
        match self.schema.named_type(&on.name) {
            Some(NamedType::Object(object)) => Some(Arc::clone(object)),
            Some(_) => {
                self.error(format!("Fragment cannot condition on non object type {:?}.", on.name), on.loc);
                None
            }
            None => {
                self.error(format!("Unknown type {:?}.", on.name), on.loc);
                None
            }
        }
    }

    fn check_fragment_cycles(&mut self, usage: &HashMap<&'a str, Usage<'a>>) {
        let doc = self.doc;
        for fragment in &doc.fragments {
            let start = fragment.name.name.as_str();
            let mut stack: Vec<&str> = usage.get(start).map(|u| u.spreads.clone()).unwrap_or_default();
            let mut visited = HashSet::new();
            while let Some(name) = stack.pop() {
                if name == start {
                    self.error(format!("Cannot spread fragment {:?} within itself.", start), fragment.loc);
                    break;
                }
                if visited.insert(name) {
                    if let Some(u) = usage.get(name) {
                        stack.extend(u.spreads.iter().copied());
                    }
                }
            }
        }
    }

    /// Bound how deep selections nest once fragments are inlined, counting
    /// fields, inline fragments and spreads. Only called on acyclic spread
    /// graphs. Returns `false` if anything was too deep.
    fn check_nesting(&mut self, usage: &HashMap<&'a str, Usage<'a>>) -> bool {
        let doc = self.doc;

        // Post-order: every fragment comes after the fragments it spreads.
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        for fragment in &doc.fragments {
            let mut stack = vec![(fragment.name.name.as_str(), false)];
            while let Some((name, expanded)) = stack.pop() {
                if expanded {
                    order.push(name);
                    continue;
                }
                if !seen.insert(name) {
                    continue;
                }
                stack.push((name, true));
                if let Some(u) = usage.get(name) {
                    stack.extend(u.spreads.iter().filter(|s| !seen.contains(*s)).map(|s| (*s, false)));
                }
            }
        }

        let mut depths: HashMap<&str, usize> = HashMap::new();
        let mut shallow = true;
        for name in order {
            let Some(fragment) = doc.fragment(name) else { continue };
            let depth = nesting(&fragment.selections, &depths);
            if depth > MAX_NESTING {
                self.error(format!("Fragment {:?} is nested too deeply.", name), fragment.loc);
                shallow = false;
            }
            depths.insert(name, depth);
        }
        for op in &doc.operations {
            if nesting(&op.selections, &depths) > MAX_NESTING {
                self.error("Operation is nested too deeply.".to_string(), op.loc);
                shallow = false;
            }
        }
        shallow
    }

    /// Validate one operation and return the fragments it reaches.
    fn check_operation(&mut self, op: &'a Operation, fragments: &HashMap<&'a str, Usage<'a>>) -> HashSet<&'a str> {
        let mut reached = HashSet::new();

        let mut defined = HashSet::new();
        for var in &op.vars {
            if !defined.insert(var.name.name.as_str()) {
                self.error(format!("There can be only one variable named \"${}\".", var.name.name), var.loc);
            }
            match self.schema.named_type(var.ty.name()) {
                None => self.error(format!("Unknown type {:?}.", var.ty.name()), var.loc),
                Some(named) if !named.is_input() => self.error(
                    format!(
                        "Variable \"${}\" cannot be non-input type {:?}.",
                        var.name.name,
                        var.ty.to_string()
                    ),
                    var.loc,
                ),
                Some(_) => {}
            }
        }

        let mut usage = Usage::default();
        self.check_directives(&op.directives, &mut usage);
        let root = match self.schema.root_type(op.ty) {
            Some(root) => Arc::clone(root),
            None => {
                self.error(format!("Schema is not configured for {} operations.", op.ty), op.loc);
                return reached;
            }
        };
        self.check_selections(&root, &op.selections, &mut usage);

        // Variables used inside reachable fragments count as used by the operation.
        let mut vars = usage.vars;
        let mut stack = usage.spreads;
        while let Some(name) = stack.pop() {
            if !reached.insert(name) {
                continue;
            }
            if let Some(u) = fragments.get(name) {
                vars.extend(u.vars.iter().copied());
                stack.extend(u.spreads.iter().copied());
            }
        }

        let suffix = |preposition: &str| match op.display_name() {
            Some(name) => format!(" {} operation {:?}.", preposition, name),
            None => ".".to_string(),
        };
        let mut used = HashSet::new();
        for (name, loc) in vars {
            let first = used.insert(name);
            if first && !defined.contains(name) {
                self.error(format!("Variable \"${}\" is not defined{}", name, suffix("by")), loc);
            }
        }
        for var in &op.vars {
            if !used.contains(var.name.name.as_str()) {
                self.error(format!("Variable \"${}\" is never used{}", var.name.name, suffix("in")), var.loc);
            }
        }
        reached
    }

    fn check_selections(&mut self, parent: &ObjectType, selections: &'a [Selection], usage: &mut Usage<'a>) {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    self.check_directives(&field.directives, usage);
                    for arg in &field.arguments {
                        collect_vars(arg, usage);
                    }
                    let name = field.name.name.as_str();
                    if name == "__typename" {
                        if !field.selections.is_empty() {
                            self.error(
                                format!(
                                    "Field {:?} must not have a selection since type \"String!\" has no subfields.",
                                    name
                                ),
                                field.loc,
                            );
                        }
                        continue;
                    }
                    let def = match parent.field(name) {
                        Some(def) => def,
                        None => {
                            self.error(format!("Cannot query field {:?} on type {:?}.", name, parent.name), field.loc);
                            continue;
                        }
                    };

                    for arg in &field.arguments {
                        if def.arg(&arg.name.name).is_none() {
                            self.error(
                                format!(
                                    "Unknown argument {:?} on field {:?} of type {:?}.",
                                    arg.name.name, name, parent.name
                                ),
                                arg.name.loc,
                            );
                        }
                    }
                    for arg in &def.args {
                        let provided = field.arguments.iter().any(|a| a.name.name == arg.name);
                        if arg.ty.is_non_null() && arg.default.is_none() && !provided {
                            self.error(
                                format!(
                                    "Field {:?} argument {:?} of type {:?} is required but not provided.",
                                    name,
                                    arg.name,
                                    arg.ty.to_string()
                                ),
                                field.loc,
                            );
                        }
                    }

                    match self.schema.named_type(def.ty.name()) {
                        Some(NamedType::Object(object)) if !field.selections.is_empty() => {
                            let object = Arc::clone(object);
                            self.check_selections(&object, &field.selections, usage);
                        }
                        Some(NamedType::Object(_)) => self.error(
                            format!(
                                "Field {:?} of type {:?} must have a selection of subfields. Did you mean \"{} {{ ... }}\"?",
                                name,
                                def.ty.to_string(),
                                name
                            ),
                            field.loc,
                        ),
                        _ if !field.selections.is_empty() => self.error(
                            format!(
                                "Field {:?} must not have a selection since type {:?} has no subfields.",
                                name,
                                def.ty.to_string()
                            ),
                            field.loc,
                        ),
                        _ => {}
                    }
                }
                Selection::InlineFragment(inline) => {
                    self.check_directives(&inline.directives, usage);
                    match &inline.on {
                        Some(on) => {
                            if let Some(object) = self.condition_type(on) {
                                self.check_spread_target(parent, &object, on.loc);
                                self.check_selections(&object, &inline.selections, usage);
                            }
                        }
                        None => self.check_selections(parent, &inline.selections, usage),
                    }
                }
                Selection::FragmentSpread(spread) => {
                    self.check_directives(&spread.directives, usage);
                    usage.spreads.push(&spread.name.name);
                    let doc = self.doc;
                    match doc.fragment(&spread.name.name) {
                        Some(fragment) => {
                            if let Some(NamedType::Object(object)) = self.schema.named_type(&fragment.on.name) {
                                let object = Arc::clone(object);
                                self.check_spread_target(parent, &object, spread.loc);
                            }
                        }
                        None => self.error(format!("Unknown fragment {:?}.", spread.name.name), spread.name.loc),
                    }
                }
            }
        }
    }

    fn check_spread_target(&mut self, parent: &ObjectType, target: &ObjectType, loc: Location) {
        if parent.name != target.name {
            self.error(
                format!(
                    "Fragment of type {:?} can never be spread on type {:?}.",
                    target.name, parent.name
                ),
                loc,
            );
        }
    }

    fn check_directives(&mut self, directives: &'a [Directive], usage: &mut Usage<'a>) {
        for directive in directives {
            for arg in &directive.arguments {
                collect_vars(arg, usage);
            }
            let name = directive.name.name.as_str();
            if name != "skip" && name != "include" {
                self.error(format!("Unknown directive \"@{}\".", name), directive.name.loc);
                continue;
            }
            if !directive.arguments.iter().any(|a| a.name.name == "if") {
                self.error(
                    format!(
                        "Directive \"@{}\" argument \"if\" of type \"Boolean!\" is required but not provided.",
                        name
                    ),
                    directive.name.loc,
                );
            }
        }
    }

    fn check_depth(&mut self, selections: &'a [Selection], depth: usize, max: usize, visiting: &mut Vec<&'a str>) {
        let doc = self.doc;
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if depth > max {
                        self.error(
                            format!(
                                "Field {:?} has depth {} that exceeds max depth {}",
                                field.name.name, depth, max
                            ),
                            field.loc,
                        );
                        continue;
                    }
                    self.check_depth(&field.selections, depth + 1, max, visiting);
                }
                Selection::InlineFragment(inline) => {
                    self.check_depth(&inline.selections, depth, max, visiting);
                }
                Selection::FragmentSpread(spread) => {
                    let name = spread.name.name.as_str();
                    if visiting.contains(&name) {
                        continue;
                    }
                    if let Some(fragment) = doc.fragment(name) {
                        visiting.push(name);
                        self.check_depth(&fragment.selections, depth, max, visiting);
                        visiting.pop();
                    }
                }
            }
        }
    }
}

/// Nesting depth of `selections`, taking spread fragments from `depths`.
fn nesting(selections: &[Selection], depths: &HashMap<&str, usize>) -> usize {
    selections
        .iter()
        .map(|selection| {
            let inner = match selection {
                Selection::Field(field) => nesting(&field.selections, depths),
                Selection::InlineFragment(inline) => nesting(&inline.selections, depths),
                Selection::FragmentSpread(spread) => depths.get(spread.name.name.as_str()).copied().unwrap_or(0),
            };
            inner.saturating_add(1)
        })
        .max()
        .unwrap_or(0)
}

fn collect_vars<'d>(arg: &'d Argument, usage: &mut Usage<'d>) {
    fn walk<'d>(value: &'d Value, loc: Location, out: &mut Vec<(&'d str, Location)>) {
        match value {
            Value::Variable(name) => out.push((name, loc)),
            Value::List(items) => items.iter().for_each(|v| walk(v, loc, out)),
            Value::Object(fields) => fields.iter().for_each(|(_, v)| walk(v, loc, out)),
            _ => {}
        }
    }
    walk(&arg.value, arg.name.loc, &mut usage.vars);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;
    use crate::resolvable::from_iter;
    use crate::schema::{FieldDef, ObjectDef};

    fn schema() -> Schema {
        Schema::builder()
            .object(ObjectDef::new("Query").field(FieldDef::new("ok", "Boolean")))
            .object(
                ObjectDef::new("User")
                    .field(FieldDef::new("name", "String!"))
                    .field(FieldDef::new("friend", "User")),
            )
            .object(
                ObjectDef::new("Subscription")
                    .field(FieldDef::new("greeting", "String!").argument("name", "String"))
                    .field(FieldDef::new("userChanged", "User").argument("id", "ID!")),
            )
            .enum_type("Mood", &["HAPPY", "SAD"])
            .resolver_fn("greeting", |_, _| Ok(Some(from_iter(["hi"]))))
            .resolver_fn("userChanged", |_, _| Ok(None))
            .build()
            .unwrap()
    }

    fn messages(query: &str, max_depth: usize) -> Vec<String> {
        let doc = parse(query).unwrap();
        validate(&schema(), &doc, max_depth).into_iter().map(|e| e.message).collect()
    }

    #[test]
    fn test_valid_subscription() {
        let errs = messages(
            r#"subscription S($id: ID!, $skip: Boolean!) {
                userChanged(id: $id) { ...U friend @skip(if: $skip) { name } }
            }
            fragment U on User { name __typename }"#,
            0,
        );
        assert!(errs.is_empty(), "{:?}", errs);
    }

    #[test]
    fn test_unknown_field() {
        let doc = parse("subscription { farewell }").unwrap();
        let errs = validate(&schema(), &doc, 0);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].message, "Cannot query field \"farewell\" on type \"Subscription\".");
        assert_eq!(errs[0].locations, vec![Location { line: 1, column: 16 }]);
    }

    #[test]
    fn test_all_errors_collected() {
        let errs = messages("subscription { farewell userChanged { nope } }", 0);
        assert_eq!(
            errs,
            vec![
                "Cannot query field \"farewell\" on type \"Subscription\".",
                "Field \"userChanged\" argument \"id\" of type \"ID!\" is required but not provided.",
                "Cannot query field \"nope\" on type \"User\".",
            ]
        );
    }

    #[test]
    fn test_leaf_and_composite_selections() {
        let errs = messages("subscription { greeting { x } userChanged(id: 1) }", 0);
        assert_eq!(
            errs,
            vec![
                "Field \"greeting\" must not have a selection since type \"String!\" has no subfields.",
                "Field \"userChanged\" of type \"User\" must have a selection of subfields. Did you mean \"userChanged { ... }\"?",
            ]
        );
    }

    #[test]
    fn test_variables_defined_and_used() {
        let errs = messages("subscription S($unused: String) { greeting(name: $who) }", 0);
        assert_eq!(
            errs,
            vec![
                "Variable \"$who\" is not defined by operation \"S\".",
                "Variable \"$unused\" is never used in operation \"S\".",
            ]
        );
    }

    #[test]
    fn test_variable_must_be_input_type() {
        let errs = messages("subscription ($u: User) { greeting(name: $u) }", 0);
        assert_eq!(errs, vec!["Variable \"$u\" cannot be non-input type \"User\"."]);
    }

    #[test]
    fn test_fragment_cycle() {
        let errs = messages(
            r#"subscription { userChanged(id: 1) { ...A } }
            fragment A on User { friend { ...B } }
            fragment B on User { friend { ...A } }"#,
            0,
        );
        assert_eq!(
            errs,
            vec![
                "Cannot spread fragment \"A\" within itself.",
                "Cannot spread fragment \"B\" within itself.",
            ]
        );
    }

    #[test]
    fn test_unused_and_unknown_fragments() {
        let errs = messages(
            "subscription { userChanged(id: 1) { ...Missing } } fragment Idle on User { name }",
            0,
        );
        assert_eq!(errs, vec!["Unknown fragment \"Missing\".", "Fragment \"Idle\" is never used."]);
    }

    #[test]
    fn test_fragment_type_conditions() {
        let errs = messages(
            "subscription { userChanged(id: 1) { ... on Mood { x } ... on Query { ok } } }",
            0,
        );
        assert_eq!(
            errs,
            vec![
                "Fragment cannot condition on non object type \"Mood\".",
                "Fragment of type \"Query\" can never be spread on type \"User\".",
            ]
        );
    }

    #[test]
    fn test_directives() {
        let errs = messages("subscription { greeting @skip greeting @live }", 0);
        assert_eq!(
            errs,
            vec![
                "Directive \"@skip\" argument \"if\" of type \"Boolean!\" is required but not provided.",
                "Unknown directive \"@live\".",
            ]
        );
    }

    #[test]
    fn test_operation_names() {
        let errs = messages("subscription A { greeting } subscription A { greeting } { ok }", 0);
        assert_eq!(
            errs,
            vec![
                "There can be only one operation named \"A\".",
                "This anonymous operation must be the only defined operation.",
            ]
        );
    }

    #[test]
    fn test_missing_root_type() {
        let errs = messages("mutation { ok }", 0);
        assert_eq!(errs, vec!["Schema is not configured for mutation operations."]);
    }

    #[test]
    fn test_depth_limit() {
        let query = "subscription { userChanged(id: 1) { friend { friend { name } } } }";
        assert!(messages(query, 4).is_empty());
        assert_eq!(messages(query, 3), vec!["Field \"name\" has depth 4 that exceeds max depth 3"]);
        assert!(messages(query, 0).is_empty());
    }

    #[test]
    fn test_depth_counts_fragments() {
        let query = "subscription { userChanged(id: 1) { ...F } } fragment F on User { friend { name } }";
        assert_eq!(messages(query, 2), vec!["Field \"name\" has depth 3 that exceeds max depth 2"]);
    }

    #[test]
    fn test_fragment_chain_too_deep() {
        let mut query = String::from("subscription { userChanged(id: 1) { ...F0 } }");
        for i in 0..400 {
            query.push_str(&format!(" fragment F{} on User {{ ...F{} }}", i, i + 1));
        }
        query.push_str(" fragment F400 on User { name }");
        let errors = messages(&query, 0);
        assert!(errors.iter().any(|m| m == "Fragment \"F0\" is nested too deeply."));
        assert!(errors.contains(&"Operation is nested too deeply.".to_string()));

        let mut short = String::from("subscription { userChanged(id: 1) { ...F0 } }");
        for i in 0..10 {
            short.push_str(&format!(" fragment F{} on User {{ ...F{} }}", i, i + 1));
        }
        short.push_str(" fragment F10 on User { name }");
        assert!(messages(&short, 0).is_empty());
    }
}

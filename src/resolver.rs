//! XPath resolution
//!
//! Two jobs live here. *Build* turns an XPath filter into the hierarchical
//! document an `edit-config` expects, either directly from a strict path
//! grammar or guided by a schema skeleton when the path carries wildcards.
//! *Prune* ([`resolve_xpath`]) trims a server response so that only the
//! node addressed by the XPath (and its immediate children) remains:
//! NETCONF servers always return the full ancestor chain, while callers
//! usually want the node they asked for.
//!
//! The accepted grammar is deliberately small: absolute paths of
//! `name[key='literal']` steps, plus the `//` and `*` wildcards. Unions
//! (`|`) are rejected for build and leave a response untouched for prune.

use crate::error::Error;
use crate::value::{Map, Value, ATTRIBUTES};

/// A path of mapping keys from the document root to a resolved node.
pub type KeyPath = Vec<String>;

/// One step of a strict XPath: `name` or `name[key='value']`.
#[derive(Debug, Clone, PartialEq)]
pub struct StrictSegment {
    pub name: String,
    pub predicate: Option<(String, String)>,
}

/// Rejects XPaths that cannot address an edit target.
pub(crate) fn validate_build_xpath(xpath: &str) -> Result<(), Error> {
    let trimmed = xpath.trim();
    if trimmed.is_empty() || trimmed == "/" || trimmed == "//" {
        return Err(Error::InvalidXPath(format!(
            "'{}' does not address any element",
            xpath
        )));
    }
    if trimmed.contains('|') {
        return Err(Error::InvalidXPath(
            "union expressions are not supported".to_owned(),
        ));
    }
    Ok(())
}

/// Canonical segment list: `//` becomes `/*/`, runs of `*` collapse,
/// bracket predicates are erased innermost-first.
pub fn canonical_segments(xpath: &str) -> Vec<String> {
    let mut path = xpath.replace("//", "/*/");
    loop {
        let Some(close) = path.find(']') else { break };
        let Some(open) = path[..close].rfind('[') else { break };
        path.replace_range(open..=close, "");
    }
    let mut segments: Vec<String> = Vec::new();
    for segment in path.split('/') {
        if segment.is_empty() {
            continue;
        }
        if segment == "*" && segments.last().map(String::as_str) == Some("*") {
            continue;
        }
        segments.push(segment.to_owned());
    }
    segments
}

/// Parses the strict grammar. Returns `None` when the XPath contains
/// wildcards or any segment falls outside `name[key='value']`, in which
/// case the caller falls back to schema-guided resolution.
pub fn strict_segments(xpath: &str) -> Option<Vec<StrictSegment>> {
    if xpath.contains("//") || xpath.contains('*') {
        return None;
    }
    let mut segments = Vec::new();
    for part in xpath.split('/') {
        if part.is_empty() {
            continue;
        }
        segments.push(parse_strict_segment(part)?);
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}

fn parse_strict_segment(part: &str) -> Option<StrictSegment> {
    let Some(open) = part.find('[') else {
        return element_name(part).then(|| StrictSegment {
            name: part.to_owned(),
            predicate: None,
        });
    };
    let name = &part[..open];
    if !element_name(name) || !part.ends_with(']') {
        return None;
    }
    let predicate = &part[open + 1..part.len() - 1];
    let eq = predicate.find('=')?;
    let key = &predicate[..eq];
    let literal = &predicate[eq + 1..];
    let quote = literal.chars().next()?;
    if !element_name(key) || (quote != '\'' && quote != '"') {
        return None;
    }
    if literal.len() < 2 || !literal.ends_with(quote) {
        return None;
    }
    let value = &literal[1..literal.len() - 1];
    if value.contains(quote) {
        return None;
    }
    Some(StrictSegment {
        name: name.to_owned(),
        predicate: Some((key.to_owned(), value.to_owned())),
    })
}

fn element_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

/// Builds the edit target for a strict path by creating one nested mapping
/// per segment inside `target`, setting predicate keys at their depth and
/// injecting namespace attributes into the first segment's mapping.
/// Returns the key path of the innermost mapping as a one-element list.
pub fn build_strict(
    target: &mut Value,
    segments: &[StrictSegment],
    namespace_attributes: &[(String, String)],
) -> Vec<KeyPath> {
    let mut path = KeyPath::with_capacity(segments.len());
    let mut node = target;
    for (index, segment) in segments.iter().enumerate() {
        let map = node.make_map();
        let child = map
            .entry(segment.name.clone())
            .or_insert_with(Value::map);
        child.make_map();
        if index == 0 && !namespace_attributes.is_empty() {
            inject_attributes(child, namespace_attributes);
        }
        if let Some((key, value)) = &segment.predicate {
            child
                .make_map()
                .insert(key.clone(), Value::Str(value.clone()));
        }
        path.push(segment.name.clone());
        node = child;
    }
    vec![path]
}

fn inject_attributes(node: &mut Value, attributes: &[(String, String)]) {
    let Some(map) = node.as_map_mut() else { return };
    let attrs = map
        .entry(ATTRIBUTES.to_owned())
        .or_insert_with(Value::map);
    if let Some(attrs) = attrs.as_map_mut() {
        for (key, value) in attributes {
            attrs.insert(key.clone(), Value::Str(value.clone()));
        }
    }
}

/// Walks a schema skeleton along a canonicalized wildcard path. The
/// skeleton is consumed and becomes the edit target: branches that match
/// nothing are pruned, an addressed list collapses to a single fresh
/// mapping, and each matched terminal is stripped down to its primitives
/// and attributes. Returns the pruned target together with the key paths
/// of every match.
pub fn build_with_schema(
    schema: Value,
    xpath: &str,
    namespace_attributes: &[(String, String)],
) -> (Value, Vec<KeyPath>) {
    let segments = canonical_segments(xpath);
    let mut target = schema;
    let mut results = Vec::new();
    if segments.is_empty() {
        return (target, results);
    }
    let mut path = KeyPath::new();
    descend(&mut target, &segments, &mut path, &mut results);
    if !results.is_empty() && !namespace_attributes.is_empty() {
        if let Value::Map(map) = &mut target {
            for (key, child) in map.iter_mut() {
                if key != ATTRIBUTES {
                    inject_attributes(child, namespace_attributes);
                }
            }
        }
    }
    (target, results)
}

fn descend(
    node: &mut Value,
    segments: &[String],
    path: &mut KeyPath,
    results: &mut Vec<KeyPath>,
) -> bool {
    // a terminal, or a trailing `*` selecting the mapping as a whole
    if segments.is_empty() || (segments.len() == 1 && segments[0] == "*") {
        strip_to_leaf(node);
        results.push(path.clone());
        return true;
    }
    let Value::Map(map) = node else { return false };
    let wildcard = segments[0] == "*";
    let (literal, rest): (&str, &[String]) = if wildcard {
        (segments[1].as_str(), &segments[2..])
    } else {
        (segments[0].as_str(), &segments[1..])
    };
    let keys: Vec<String> = map
        .keys()
        .filter(|key| key.as_str() != ATTRIBUTES)
        .cloned()
        .collect();
    let mut matched_any = false;
    for key in keys {
        let mut produced = false;
        if key == literal {
            // edit-config targets a single element, never a whole list
            if matches!(map.get(&key), Some(Value::List(_))) {
                map.insert(key.clone(), Value::map());
            }
            if let Some(child) = map.get_mut(&key) {
                path.push(key.clone());
                produced = descend(child, rest, path, results);
                path.pop();
            }
        }
        if !produced && wildcard {
            if let Some(child) = map.get_mut(&key) {
                if matches!(child, Value::Map(_)) {
                    path.push(key.clone());
                    produced = descend(child, segments, path, results);
                    path.pop();
                }
            }
        }
        if produced {
            matched_any = true;
        } else {
            map.shift_remove(&key);
        }
    }
    matched_any
}

/// Drops nested mappings and lists, keeping primitives and attributes.
fn strip_to_leaf(node: &mut Value) {
    if let Value::Map(map) = node {
        map.retain(|key, value| key == ATTRIBUTES || value.is_primitive());
    }
}

/// Prunes a response tree down to the node addressed by `xpath`.
///
/// Pure with respect to its inputs: the same tree and path always produce
/// the same output. Union XPaths and empty paths return the tree
/// unchanged.
pub fn resolve_xpath(tree: &Value, xpath: &str) -> Value {
    if xpath.contains('|') {
        return tree.clone();
    }
    let segments = canonical_segments(xpath);
    if segments.is_empty() {
        return tree.clone();
    }
    let mut current: &Value = tree;
    let mut resolved: Option<(String, &Value)> = None;
    let mut index = 0;
    while index < segments.len() {
        let segment = &segments[index];
        if segment == "*" {
            if index + 1 == segments.len() {
                // trailing wildcard: the addressed container itself
                return match current {
                    Value::Map(_) | Value::List(_) => current.clone(),
                    _ => wrap(tree, &resolved),
                };
            }
            // deep mode: unique-descendant search for the next literal
            let literal = &segments[index + 1];
            let mut found = Vec::new();
            deep_scan(current, literal, &mut found);
            match found.as_slice() {
                [(key, value)] => {
                    resolved = Some((key.clone(), *value));
                    if key != literal {
                        // a list blocked the search: bind to its enclosing key
                        return wrap(tree, &resolved);
                    }
                    current = *value;
                }
                _ => return wrap(tree, &resolved),
            }
            index += 2;
        } else {
            match current.get(segment) {
                Some(child) => {
                    resolved = Some((segment.clone(), child));
                    current = child;
                }
                None => return wrap(tree, &resolved),
            }
            index += 1;
        }
    }
    wrap(tree, &resolved)
}

fn wrap(tree: &Value, resolved: &Option<(String, &Value)>) -> Value {
    match resolved {
        Some((key, value)) => {
            let mut map = Map::new();
            map.insert(key.clone(), (*value).clone());
            Value::Map(map)
        }
        None => tree.clone(),
    }
}

/// Collects deep-search candidates: descendants whose key matches, plus
/// any list encountered on the way (bound to its enclosing key, without
/// descending into it). Attribute sub-mappings are not element content.
fn deep_scan<'a>(node: &'a Value, literal: &str, found: &mut Vec<(String, &'a Value)>) {
    let Value::Map(map) = node else { return };
    for (key, value) in map {
        if key == ATTRIBUTES {
            continue;
        }
        match value {
            Value::List(_) => found.push((key.clone(), value)),
            Value::Map(_) => {
                if key == literal {
                    found.push((key.clone(), value));
                }
                deep_scan(value, literal, found);
            }
            _ => {
                if key == literal {
                    found.push((key.clone(), value));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Value)]) -> Value {
        Value::Map(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
        )
    }

    fn keys(path: &[&str]) -> KeyPath {
        path.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn canonicalizes_wildcards_and_predicates() {
        assert_eq!(canonical_segments("/a/b/c"), keys(&["a", "b", "c"]));
        assert_eq!(canonical_segments("//a//d"), keys(&["*", "a", "*", "d"]));
        assert_eq!(
            canonical_segments("//terminal/*/config-item[key='name']"),
            keys(&["*", "terminal", "*", "config-item"])
        );
        assert_eq!(canonical_segments("/*/*/x"), keys(&["*", "x"]));
        assert_eq!(canonical_segments(""), KeyPath::new());
        assert_eq!(canonical_segments("/"), KeyPath::new());
    }

    #[test]
    fn strict_grammar_accepts_names_and_quoted_predicates() {
        let segments = strict_segments("/interfaces/interface[name=\"eth1\"]").unwrap();
        assert_eq!(
            segments,
            vec![
                StrictSegment {
                    name: "interfaces".into(),
                    predicate: None
                },
                StrictSegment {
                    name: "interface".into(),
                    predicate: Some(("name".into(), "eth1".into()))
                },
            ]
        );
        assert_eq!(
            strict_segments("/a/b[key='v']").unwrap()[1].predicate,
            Some(("key".into(), "v".into()))
        );
    }

    #[test]
    fn strict_grammar_rejects_what_it_cannot_express() {
        assert!(strict_segments("//a").is_none());
        assert!(strict_segments("/a/*").is_none());
        assert!(strict_segments("/a/b[1]").is_none());
        assert!(strict_segments("/a/b[key=unquoted]").is_none());
        assert!(strict_segments("/a/b[key='v]").is_none());
        assert!(strict_segments("/").is_none());
    }

    #[test]
    fn builds_a_strict_path_into_an_empty_target() {
        let segments = strict_segments("/interfaces/interface[name=\"eth1\"]").unwrap();
        let mut target = Value::map();
        let matched = build_strict(&mut target, &segments, &[]);
        assert_eq!(matched, vec![keys(&["interfaces", "interface"])]);
        assert_eq!(
            target,
            map(&[(
                "interfaces",
                map(&[("interface", map(&[("name", "eth1".into())]))])
            )])
        );
        assert_eq!(
            target.get_path(&matched[0]),
            Some(&map(&[("name", "eth1".into())]))
        );
    }

    #[test]
    fn strict_build_injects_namespaces_on_the_first_segment() {
        let segments = strict_segments("/interfaces/interface[name=\"eth1\"]").unwrap();
        let mut target = Value::map();
        build_strict(
            &mut target,
            &segments,
            &[("xmlns".to_owned(), "http://x".to_owned())],
        );
        assert_eq!(
            target,
            map(&[(
                "interfaces",
                map(&[
                    ("$", map(&[("xmlns", "http://x".into())])),
                    ("interface", map(&[("name", "eth1".into())])),
                ])
            )])
        );
    }

    fn two_terminal_schema() -> Value {
        map(&[(
            "top",
            map(&[
                (
                    "group1",
                    map(&[(
                        "terminal",
                        map(&[
                            ("id", Value::Int(1)),
                            (
                                "settings",
                                map(&[(
                                    "config-item",
                                    map(&[("key", Value::Null), ("value", Value::Null)]),
                                )]),
                            ),
                        ]),
                    )]),
                ),
                (
                    "group2",
                    map(&[(
                        "terminal",
                        map(&[(
                            "settings",
                            map(&[("config-item", map(&[("key", Value::Null)]))]),
                        )]),
                    )]),
                ),
                ("unrelated", map(&[("leaf", Value::Null)])),
            ]),
        )])
    }

    #[test]
    fn schema_build_matches_every_branch() {
        let (target, matched) =
            build_with_schema(two_terminal_schema(), "//terminal/*/config-item[key='name']", &[]);
        assert_eq!(
            matched,
            vec![
                keys(&["top", "group1", "terminal", "settings", "config-item"]),
                keys(&["top", "group2", "terminal", "settings", "config-item"]),
            ]
        );
        // unmatched branches are pruned from the target
        assert!(target.get("top").unwrap().get("unrelated").is_none());
        // matched terminals keep only primitives
        assert_eq!(
            target.get_path(&matched[0]),
            Some(&map(&[("key", Value::Null), ("value", Value::Null)]))
        );
    }

    #[test]
    fn schema_build_reports_multiple_wildcard_branches() {
        let schema = map(&[
            ("a", map(&[("wildcard", map(&[("key", Value::Null)]))])),
            ("b", map(&[("wildcard", map(&[("key", Value::Null)]))])),
        ]);
        let (_, matched) = build_with_schema(schema, "//wildcard/key", &[]);
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn schema_build_collapses_an_addressed_list() {
        let schema = map(&[(
            "top",
            map(&[(
                "interface",
                Value::List(vec![
                    map(&[("name", Value::Null)]),
                    map(&[("name", Value::Null)]),
                ]),
            )]),
        )]);
        let (target, matched) = build_with_schema(schema, "//interface", &[]);
        assert_eq!(matched, vec![keys(&["top", "interface"])]);
        assert_eq!(target.get_path(&matched[0]), Some(&Value::map()));
    }

    #[test]
    fn schema_build_injects_namespaces_at_the_first_step() {
        let (target, matched) = build_with_schema(
            two_terminal_schema(),
            "//group1//config-item",
            &[("xmlns".to_owned(), "http://x".to_owned())],
        );
        assert_eq!(matched.len(), 1);
        assert_eq!(
            target.get("top").unwrap().get("$"),
            Some(&map(&[("xmlns", "http://x".into())]))
        );
    }

    #[test]
    fn schema_build_strips_terminal_containers() {
        let schema = map(&[(
            "a",
            map(&[(
                "b",
                map(&[
                    ("leaf", Value::Int(1)),
                    ("nested", map(&[("x", Value::Null)])),
                    ("items", Value::List(vec![Value::Int(1)])),
                ]),
            )]),
        )]);
        let (target, matched) = build_with_schema(schema, "//b", &[]);
        assert_eq!(matched, vec![keys(&["a", "b"])]);
        assert_eq!(
            target.get_path(&matched[0]),
            Some(&map(&[("leaf", Value::Int(1))]))
        );
    }

    fn abc() -> Value {
        map(&[("a", map(&[("b", map(&[("c", Value::Int(3))]))]))])
    }

    #[test]
    fn prune_resolves_a_full_literal_path() {
        assert_eq!(
            resolve_xpath(&abc(), "/a/b/c"),
            map(&[("c", Value::Int(3))])
        );
    }

    #[test]
    fn prune_stops_at_the_last_resolved_level() {
        assert_eq!(
            resolve_xpath(&abc(), "/a/b/x"),
            map(&[("b", map(&[("c", Value::Int(3))]))])
        );
    }

    #[test]
    fn prune_deep_search_finds_a_unique_descendant() {
        assert_eq!(
            resolve_xpath(&abc(), "//b"),
            map(&[("b", map(&[("c", Value::Int(3))]))])
        );
    }

    fn forked_lists() -> Value {
        map(&[(
            "root",
            map(&[(
                "a",
                map(&[
                    (
                        "b1",
                        map(&[(
                            "c",
                            Value::List(vec![map(&[("d", map(&[("e", Value::Int(1))]))])]),
                        )]),
                    ),
                    (
                        "b2",
                        map(&[(
                            "c",
                            Value::List(vec![map(&[("d", map(&[("e", Value::Int(2))]))])]),
                        )]),
                    ),
                ]),
            )]),
        )])
    }

    #[test]
    fn prune_binds_to_the_ancestor_when_lists_fork_the_search() {
        let tree = forked_lists();
        assert_eq!(resolve_xpath(&tree, "//a//d"), tree);
    }

    #[test]
    fn prune_trailing_wildcard_returns_a_list_directly() {
        let tree = map(&[(
            "a",
            map(&[(
                "b",
                map(&[(
                    "c",
                    Value::List(vec![map(&[("d", map(&[("e", Value::Int(1))]))])]),
                )]),
            )]),
        )]);
        assert_eq!(
            resolve_xpath(&tree, "//c/*"),
            Value::List(vec![map(&[("d", map(&[("e", Value::Int(1))]))])])
        );
    }

    #[test]
    fn prune_ambiguous_deep_match_returns_the_input() {
        let tree = forked_lists();
        assert_eq!(resolve_xpath(&tree, "//d"), tree);
    }

    #[test]
    fn prune_single_level_and_empty_paths() {
        let tree = abc();
        assert_eq!(resolve_xpath(&tree, ""), tree);
        assert_eq!(resolve_xpath(&tree, "/"), tree);
        assert_eq!(resolve_xpath(&tree, "/a"), tree);
    }

    #[test]
    fn prune_unions_are_a_no_op() {
        let tree = abc();
        assert_eq!(resolve_xpath(&tree, "/a/b | /a/c"), tree);
    }

    #[test]
    fn prune_deep_search_reaching_a_single_list_binds_its_key() {
        let tree = map(&[(
            "a",
            map(&[("b", map(&[("c", Value::List(vec![map(&[("d", Value::Int(1))])]))]))]),
        )]);
        assert_eq!(
            resolve_xpath(&tree, "//d"),
            map(&[("c", Value::List(vec![map(&[("d", Value::Int(1))])]))])
        );
    }

    #[test]
    fn prune_trailing_wildcard_on_a_mapping_returns_its_children() {
        assert_eq!(
            resolve_xpath(&abc(), "/a/b/*"),
            map(&[("c", Value::Int(3))])
        );
    }

    #[test]
    fn prune_is_deterministic() {
        let tree = forked_lists();
        assert_eq!(
            resolve_xpath(&tree, "//a//d"),
            resolve_xpath(&tree, "//a//d")
        );
        assert_eq!(resolve_xpath(&tree, "//b1"), resolve_xpath(&tree, "//b1"));
    }
}

//! Parser for the node/relationship pattern DSL (spec section 4.1).
//!
//! The grammar is whitespace-tolerant and has two node surface forms — rich
//! `(:Label{props})` and simple `Label{props}` — and two relationship
//! surface forms — rich `(:Start)-[:TYPE{props}]->(:End)` (arrow reversible)
//! and bare `Start TYPE End`. Parsing is pure and allocation-light: the
//! input is tokenized once, classified, and turned into an immutable
//! configuration struct meant to be built once at connector start-up and
//! shared read-only by every handler invocation.

use std::collections::BTreeSet;

use bridge_core::BridgeError;

/// Governs which of a node/relationship's properties are projected onto the
/// emitted statement (spec section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternConfigurationType {
    All,
    Include,
    Exclude,
}

/// A parsed node pattern: which labels to merge on, which properties form
/// its identity, and which (if any) of its remaining properties to project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePatternConfiguration {
    pub keys: BTreeSet<String>,
    pub pattern_type: PatternConfigurationType,
    pub labels: Vec<String>,
    pub properties: Vec<String>,
    pub merge_properties: bool,
}

/// A parsed relationship pattern: its endpoints' identity patterns, its
/// type, and which properties to project onto the relationship itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipPatternConfiguration {
    pub start: NodePatternConfiguration,
    pub end: NodePatternConfiguration,
    pub rel_type: String,
    pub properties: Vec<String>,
    pub pattern_type: PatternConfigurationType,
    pub merge_properties: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Key(String),
    Star,
    Bare(String),
    Excluded(String),
}

fn tokenize_props(raw: &str) -> Vec<Token> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            if let Some(rest) = t.strip_prefix('!') {
                Token::Key(rest.trim().to_string())
            } else if t == "*" {
                Token::Star
            } else if let Some(rest) = t.strip_prefix('-') {
                Token::Excluded(rest.trim().to_string())
            } else {
                Token::Bare(t.to_string())
            }
        })
        .collect()
}

fn classify_rest(
    rest: &[Token],
    pattern: &str,
) -> Result<(PatternConfigurationType, Vec<String>), BridgeError> {
    let has_star = rest.iter().any(|t| matches!(t, Token::Star));

    if rest.is_empty() || (has_star && rest.len() == 1) {
        return Ok((PatternConfigurationType::All, Vec::new()));
    }
    if has_star {
        // "*"-plus-includes contradiction.
        return Err(BridgeError::NotHomogeneous { pattern: pattern.to_string() });
    }

    let all_bare = rest.iter().all(|t| matches!(t, Token::Bare(_)));
    if all_bare {
        let props = rest
            .iter()
            .map(|t| match t {
                Token::Bare(s) => s.clone(),
                _ => unreachable!(),
            })
            .collect();
        return Ok((PatternConfigurationType::Include, props));
    }

    let all_excluded = rest.iter().all(|t| matches!(t, Token::Excluded(_)));
    if all_excluded {
        let props = rest
            .iter()
            .map(|t| match t {
                Token::Excluded(s) => s.clone(),
                _ => unreachable!(),
            })
            .collect();
        return Ok((PatternConfigurationType::Exclude, props));
    }

    Err(BridgeError::NotHomogeneous { pattern: pattern.to_string() })
}

fn split_labels(labels_part: &str) -> Vec<String> {
    labels_part
        .split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Splits `Label:Label{props}` (or `:Label:Label{props}` for the rich form)
/// into its labels section and its brace-delimited property section.
fn split_label_and_props(inner: &str, pattern: &str) -> Result<(&str, &str), BridgeError> {
    let open = inner.find('{').ok_or_else(|| BridgeError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: "missing `{` property section".to_string(),
    })?;
    let close = inner.rfind('}').ok_or_else(|| BridgeError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: "missing closing `}`".to_string(),
    })?;
    if close < open {
        return Err(BridgeError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "`}` precedes `{`".to_string(),
        });
    }
    if !inner[close + 1..].trim().is_empty() {
        return Err(BridgeError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "unexpected trailing characters after `}`".to_string(),
        });
    }
    Ok((&inner[..open], &inner[open + 1..close]))
}

fn parse_node_inner(
    inner: &str,
    is_rich: bool,
    original: &str,
) -> Result<NodePatternConfiguration, BridgeError> {
    let inner = inner.trim();
    let inner = if is_rich {
        // Rich form requires the leading `:` before the first label; the
        // simple form does not. This asymmetry is intentional — the source
        // connector's original parser preserved it and spec section 9 asks
        // us to keep it rather than "fix" it.
        inner.strip_prefix(':').ok_or_else(|| BridgeError::InvalidPattern {
            pattern: original.to_string(),
            reason: "rich node pattern must start with `:` before its first label".to_string(),
        })?
    } else {
        inner
    };

    let (labels_part, props_part) = split_label_and_props(inner, original)?;
    let labels = split_labels(labels_part);
    if labels.is_empty() {
        return Err(BridgeError::InvalidPattern {
            pattern: original.to_string(),
            reason: "must declare at least one label".to_string(),
        });
    }

    let tokens = tokenize_props(props_part);
    let mut keys = BTreeSet::new();
    let mut rest = Vec::new();
    for token in tokens {
        match token {
            Token::Key(k) => {
                keys.insert(k);
            }
            other => rest.push(other),
        }
    }
    if keys.is_empty() {
        return Err(BridgeError::MissingKey { pattern: original.to_string() });
    }

    let (pattern_type, properties) = classify_rest(&rest, original)?;

    Ok(NodePatternConfiguration { keys, pattern_type, labels, properties, merge_properties: false })
}

/// Parses a node pattern in either surface form.
pub fn parse_node_pattern(input: &str) -> Result<NodePatternConfiguration, BridgeError> {
    let trimmed = input.trim();
    if let Some(inner) = trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        parse_node_inner(inner, true, trimmed)
    } else {
        parse_node_inner(trimmed, false, trimmed)
    }
}

/// Finds the index of the `}` that closes the `{` opened right before it,
/// assuming property lists never themselves contain braces.
fn find_node_end(s: &str) -> Option<usize> {
    let open = s.find('{')?;
    let close = s[open..].find('}')? + open;
    Some(close)
}

fn parse_rich_relationship(
    input: &str,
) -> Result<RelationshipPatternConfiguration, BridgeError> {
    let first_close = input.find(')').ok_or_else(|| BridgeError::InvalidPattern {
        pattern: input.to_string(),
        reason: "missing closing `)` for first node".to_string(),
    })?;
    if !input.starts_with('(') {
        return Err(BridgeError::InvalidPattern {
            pattern: input.to_string(),
            reason: "rich relationship pattern must start with `(`".to_string(),
        });
    }
    let first_node_src = &input[..=first_close];
    let remainder = &input[first_close + 1..];

    let (reversed, bracket_and_tail) = if let Some(r) = remainder.strip_prefix("<-") {
        (true, r)
    } else if let Some(r) = remainder.strip_prefix('-') {
        (false, r)
    } else {
        return Err(BridgeError::InvalidPattern {
            pattern: input.to_string(),
            reason: "expected `-` or `<-` after first node".to_string(),
        });
    };

    let bracket_open = bracket_and_tail.find('[').ok_or_else(|| BridgeError::InvalidPattern {
        pattern: input.to_string(),
        reason: "missing `[` relationship section".to_string(),
    })?;
    let bracket_close =
        bracket_and_tail.find(']').ok_or_else(|| BridgeError::InvalidPattern {
            pattern: input.to_string(),
            reason: "missing `]` relationship section".to_string(),
        })?;
    let bracket_body = &bracket_and_tail[bracket_open + 1..bracket_close];
    let tail = &bracket_and_tail[bracket_close + 1..];

    let second_node_src = if reversed {
        tail.strip_prefix('-').ok_or_else(|| BridgeError::InvalidPattern {
            pattern: input.to_string(),
            reason: "expected trailing `-` after `]` in reversed relationship".to_string(),
        })?
    } else {
        tail.strip_prefix("->").ok_or_else(|| BridgeError::InvalidPattern {
            pattern: input.to_string(),
            reason: "expected trailing `->` after `]`".to_string(),
        })?
    };

    let (rel_type, properties, pattern_type) = parse_rel_body(bracket_body, input)?;

    let first_node = parse_node_pattern(first_node_src)?;
    let second_node = parse_node_pattern(second_node_src)?;
    for node in [&first_node, &second_node] {
        if !node.properties.is_empty() || node.pattern_type != PatternConfigurationType::All {
            return Err(BridgeError::InvalidPattern {
                pattern: input.to_string(),
                reason: "rich relationship endpoints may only declare keys".to_string(),
            });
        }
    }

    let (start, end) = if reversed { (second_node, first_node) } else { (first_node, second_node) };

    Ok(RelationshipPatternConfiguration {
        start,
        end,
        rel_type,
        properties,
        pattern_type,
        merge_properties: false,
    })
}

fn parse_rel_body(
    body: &str,
    original: &str,
) -> Result<(String, Vec<String>, PatternConfigurationType), BridgeError> {
    let body = body.trim();
    let body = body.strip_prefix(':').ok_or_else(|| BridgeError::InvalidPattern {
        pattern: original.to_string(),
        reason: "relationship type must be prefixed with `:`".to_string(),
    })?;
    parse_rel_type_and_props(body, original)
}

fn parse_rel_type_and_props(
    body: &str,
    original: &str,
) -> Result<(String, Vec<String>, PatternConfigurationType), BridgeError> {
    let body = body.trim();
    if let Some(open) = body.find('{') {
        let rel_type = body[..open].trim().to_string();
        let close = body.rfind('}').ok_or_else(|| BridgeError::InvalidPattern {
            pattern: original.to_string(),
            reason: "missing closing `}` for relationship properties".to_string(),
        })?;
        let tokens = tokenize_props(&body[open + 1..close]);
        let (pattern_type, properties) = classify_rest(&tokens, original)?;
        Ok((rel_type, properties, pattern_type))
    } else {
        if body.is_empty() {
            return Err(BridgeError::InvalidPattern {
                pattern: original.to_string(),
                reason: "missing relationship type".to_string(),
            });
        }
        Ok((body.to_string(), Vec::new(), PatternConfigurationType::All))
    }
}

fn parse_simple_relationship(
    input: &str,
) -> Result<RelationshipPatternConfiguration, BridgeError> {
    let input = input.trim();
    let first_end = find_node_end(input).ok_or_else(|| BridgeError::InvalidPattern {
        pattern: input.to_string(),
        reason: "missing start node pattern".to_string(),
    })?;
    let first_node_src = &input[..=first_end];
    let remainder = input[first_end + 1..].trim_start();

    // REL_TYPE token, optionally followed immediately by `{props}`.
    let rel_end = remainder
        .find(char::is_whitespace)
        .unwrap_or(remainder.len());
    let rel_type_candidate = &remainder[..rel_end];
    let (rel_type, properties, pattern_type, after_rel) = if let Some(open) =
        rel_type_candidate.find('{')
    {
        // REL_TYPE{props} with no space before the brace: the whitespace
        // split landed after the closing `}`, so re-locate it here.
        let close = remainder.find('}').ok_or_else(|| BridgeError::InvalidPattern {
            pattern: input.to_string(),
            reason: "missing closing `}` for relationship properties".to_string(),
        })?;
        let (rt, props, pt) = parse_rel_type_and_props(&remainder[..close + 1], input)?;
        let _ = open;
        (rt, props, pt, &remainder[close + 1..])
    } else {
        // Peek past the bare word for an immediately attached `{...}`.
        let after_word = &remainder[rel_end..];
        if let Some(stripped) = after_word.strip_prefix('{') {
            let close = stripped.find('}').ok_or_else(|| BridgeError::InvalidPattern {
                pattern: input.to_string(),
                reason: "missing closing `}` for relationship properties".to_string(),
            })?;
            let tokens = tokenize_props(&stripped[..close]);
            let (pt, props) = classify_rest(&tokens, input)?;
            (rel_type_candidate.to_string(), props, pt, &stripped[close + 1..])
        } else {
            (rel_type_candidate.to_string(), Vec::new(), PatternConfigurationType::All, after_word)
        }
    };

    let second_node_src = after_rel.trim();
    if second_node_src.is_empty() {
        return Err(BridgeError::InvalidPattern {
            pattern: input.to_string(),
            reason: "missing end node pattern".to_string(),
        });
    }
    if rel_type.is_empty() {
        return Err(BridgeError::InvalidPattern {
            pattern: input.to_string(),
            reason: "missing relationship type".to_string(),
        });
    }

    let start = parse_node_pattern(first_node_src)?;
    let end = parse_node_pattern(second_node_src)?;

    Ok(RelationshipPatternConfiguration {
        start,
        end,
        rel_type,
        properties,
        pattern_type,
        merge_properties: false,
    })
}

/// Parses a relationship pattern in either surface form, handling reversed
/// arrows by swapping `start`/`end` so that `start` is always the tail of
/// the relationship (the node the arrow points away from).
pub fn parse_relationship_pattern(
    input: &str,
) -> Result<RelationshipPatternConfiguration, BridgeError> {
    let trimmed = input.trim();
    if trimmed.starts_with('(') {
        parse_rich_relationship(trimmed)
    } else {
        parse_simple_relationship(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn scenario_1_all_pattern() {
        let p = parse_node_pattern("(:LabelA:LabelB{!id,*})").unwrap();
        assert_eq!(p.keys, BTreeSet::from(["id".to_string()]));
        assert_eq!(p.pattern_type, PatternConfigurationType::All);
        assert_eq!(p.labels, vec!["LabelA", "LabelB"]);
        assert!(p.properties.is_empty());
    }

    #[test]
    fn scenario_2_not_homogeneous() {
        let err = parse_node_pattern("(:LabelA{!id,-foo,bar})").unwrap_err();
        assert!(matches!(err, BridgeError::NotHomogeneous { .. }));
    }

    #[test]
    fn scenario_3_missing_key() {
        let err = parse_node_pattern("LabelA{id,-foo,bar}").unwrap_err();
        // not-homogeneous is detected first against `rest`, but there is no
        // key at all here, so MissingKey must fire before homogeneity.
        assert!(matches!(err, BridgeError::MissingKey { .. }));
    }

    #[test]
    fn scenario_4_reversed_arrow() {
        let p = parse_relationship_pattern("(:LabelA{!id,aa})<-[:REL]-(:LabelB{!idB,bb})").unwrap();
        assert_eq!(p.start.labels, vec!["LabelB"]);
        assert_eq!(p.end.labels, vec!["LabelA"]);
        assert_eq!(p.rel_type, "REL");
    }

    #[test]
    fn rich_form_requires_leading_colon() {
        let err = parse_node_pattern("(LabelA{!id})").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidPattern { .. }));
    }

    #[test]
    fn simple_form_allows_missing_colon() {
        let p = parse_node_pattern("LabelA{!id}").unwrap();
        assert_eq!(p.labels, vec!["LabelA"]);
    }

    #[test]
    fn arrow_reversal_is_symmetric() {
        let forward = parse_relationship_pattern("(:A{!a})-[:R]->(:B{!b})").unwrap();
        let backward = parse_relationship_pattern("(:B{!b})<-[:R]-(:A{!a})").unwrap();
        assert_eq!(forward.start, backward.start);
        assert_eq!(forward.end, backward.end);
    }

    #[test]
    fn rich_relationship_rejects_non_key_endpoint_properties() {
        let err = parse_relationship_pattern("(:A{!a,extra})-[:R]->(:B{!b})").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidPattern { .. }));
    }

    #[test]
    fn simple_relationship_pattern() {
        let p = parse_relationship_pattern("LabelA{!id} REL LabelB{!idB}").unwrap();
        assert_eq!(p.start.labels, vec!["LabelA"]);
        assert_eq!(p.end.labels, vec!["LabelB"]);
        assert_eq!(p.rel_type, "REL");
    }

    #[test]
    fn relationship_properties_follow_homogeneity_rules() {
        let p = parse_relationship_pattern("(:A{!a})-[:R{x,y}]->(:B{!b})").unwrap();
        assert_eq!(p.pattern_type, PatternConfigurationType::Include);
        assert_eq!(p.properties, vec!["x", "y"]);

        let err = parse_relationship_pattern("(:A{!a})-[:R{x,-y}]->(:B{!b})").unwrap_err();
        assert!(matches!(err, BridgeError::NotHomogeneous { .. }));
    }

    #[test]
    fn whitespace_tolerant_patterns_parse_equally() {
        let a = parse_node_pattern("(:Label{!id, name})").unwrap();
        let b = parse_node_pattern("(: Label { ! id , name })").unwrap();
        assert_eq!(a, b);
    }

    proptest::proptest! {
        #[test]
        fn parse_is_deterministic(
            label in "[A-Z][a-zA-Z]{0,8}",
            key in "[a-z][a-z0-9]{0,8}",
        ) {
            let pattern = format!("(:{label}{{!{key}}})");
            let first = parse_node_pattern(&pattern);
            let second = parse_node_pattern(&pattern);
            prop_assert_eq!(first.is_ok(), second.is_ok());
            if let (Ok(a), Ok(b)) = (first, second) {
                prop_assert_eq!(a, b);
            }
        }
    }
}

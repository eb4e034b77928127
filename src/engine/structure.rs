// src/engine/structure.rs

//! Block-program structure checks.
//!
//! The submitted workspace is reduced to a multiset of block kinds, then
//! checked against `must_use`, `forbidden` and `max_blocks`. Every
//! violation is reported, not only the first, so a student can fix them
//! all in one go.
//!
//! Accepted markup:
//! - Blockly XML (`<xml><block type="..">..</block></xml>`)
//! - Blockly JSON serialisation (`{"blocks": {"blocks": [..]}}`)
//! - a bare JSON list of block kinds (`["loop_repeat", "move_forward"]`)
//!
//! Shadow blocks are editor defaults, not student choices, and are not
//! counted.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::engine::Reason;
use crate::rules::ValidationRules;
use crate::submission::MarkupSource;
use crate::util::from_json_str;

/// Nesting limit for blocks inside block inputs. Blocks stacked through
/// `next` do not nest.
const MAX_DEPTH: usize = 256;

/// Largest program accepted, in blocks.
const MAX_BLOCKS: usize = 10_000;

/// Order-independent multiset of block kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSet {
    counts: BTreeMap<String, usize>,
    total: usize,
}

impl BlockSet {
    pub fn from_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for kind in kinds {
            set.add(kind.into());
        }
        set
    }

    fn add(&mut self, kind: String) {
        *self.counts.entry(kind).or_insert(0) += 1;
        self.total += 1;
    }

    /// Add one parsed block, refusing programs past [`MAX_BLOCKS`].
    fn push(&mut self, kind: &str) -> Result<(), String> {
        if self.total >= MAX_BLOCKS {
            return Err(format!("program has more than {MAX_BLOCKS} blocks"));
        }
        self.add(kind.to_string());
        Ok(())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.counts.contains_key(kind)
    }

    pub fn count(&self, kind: &str) -> usize {
        self.counts.get(kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/* ---------------- constraint checks ---------------- */

/// Collect every must-use / forbidden / max-blocks violation.
pub fn check(rules: &ValidationRules, blocks: &BlockSet) -> Vec<Reason> {
    let mut violations = presence(rules, |kind| blocks.contains(kind));
    violations.extend(block_limit(rules, blocks));
    violations
}

/// Must-use / forbidden violations for an arbitrary presence test.
pub fn presence(rules: &ValidationRules, present: impl Fn(&str) -> bool) -> Vec<Reason> {
    let mut violations = Vec::new();

    for name in &rules.must_use {
        if !present(name) {
            violations.push(Reason::MissingElement { name: name.clone() });
        }
    }

    for name in &rules.forbidden {
        if present(name) {
            violations.push(Reason::ForbiddenElement { name: name.clone() });
        }
    }

    violations
}

pub fn block_limit(rules: &ValidationRules, blocks: &BlockSet) -> Option<Reason> {
    let max = rules.max_blocks?;

    if blocks.total() > max {
        Some(Reason::TooManyElements {
            used: blocks.total(),
            max,
        })
    } else {
        None
    }
}

/* ---------------- code tokens ---------------- */

/// Whether `token` occurs in `code` as a whole word.
///
/// Word boundaries are only applied on sides where the token starts/ends
/// with a word character, so operator tokens like `+=` still match.
pub fn contains_token(code: &str, token: &str) -> bool {
    let starts_word = token.chars().next().is_some_and(is_word_char);
    let ends_word = token.chars().last().is_some_and(is_word_char);

    let pattern = format!(
        "{}{}{}",
        if starts_word { r"\b" } else { "" },
        regex::escape(token),
        if ends_word { r"\b" } else { "" },
    );

    match Regex::new(&pattern) {
        Ok(re) => re.is_match(code),
        Err(e) => {
            tracing::warn!(%token, error = %e, "token pattern rejected; using plain containment");
            code.contains(token)
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/* ---------------- markup parsing ---------------- */

/// Reduce submitted markup to its block multiset.
///
/// The error string describes what was wrong with the markup; it is
/// reported as an invalid-structure reason, never as a rule violation.
pub fn parse_markup(markup: MarkupSource<'_>) -> Result<BlockSet, String> {
    match markup {
        MarkupSource::Json(value) => parse_json(value),
        MarkupSource::Text(text) => {
            let trimmed = text.trim();

            if trimmed.starts_with('<') {
                parse_xml(trimmed)
            } else if trimmed.starts_with('{') || trimmed.starts_with('[') {
                let value: Value =
                    from_json_str(trimmed).map_err(|e| format!("markup is not valid JSON ({e})"))?;
                parse_json(&value)
            } else {
                Err("unrecognised markup format".to_string())
            }
        }
    }
}

fn parse_json(value: &Value) -> Result<BlockSet, String> {
    let mut set = BlockSet::default();

    match value {
        Value::Array(items) => walk_json_list(items, &mut set)?,
        Value::Object(obj) => match obj.get("blocks") {
            Some(Value::Object(inner)) => match inner.get("blocks") {
                Some(Value::Array(items)) => walk_json_list(items, &mut set)?,
                None => {}
                Some(_) => return Err("'blocks.blocks' must be a list".to_string()),
            },
            Some(Value::Array(items)) => walk_json_list(items, &mut set)?,
            Some(_) => return Err("'blocks' must be an object or a list".to_string()),
            None if obj.contains_key("type") => walk_json_block(value, &mut set, 0)?,
            None => return Err("no blocks found in workspace".to_string()),
        },
        _ => return Err("markup must be a JSON object or list".to_string()),
    }

    Ok(set)
}

fn walk_json_list(items: &[Value], set: &mut BlockSet) -> Result<(), String> {
    for item in items {
        match item {
            Value::String(kind) if !kind.trim().is_empty() => set.push(kind.trim())?,
            Value::Object(_) => walk_json_block(item, set, 0)?,
            _ => return Err("block list entries must be block objects or kind names".to_string()),
        }
    }
    Ok(())
}

/// Walk one stack of blocks: the `next` chain iteratively, inputs
/// recursively one level deeper.
fn walk_json_block(first: &Value, set: &mut BlockSet, depth: usize) -> Result<(), String> {
    if depth > MAX_DEPTH {
        return Err("block tree is nested too deeply".to_string());
    }

    let mut current = Some(first);
    while let Some(block) = current {
        let kind = block
            .get("type")
            .and_then(Value::as_str)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| "block without a type".to_string())?;

        set.push(kind.trim())?;

        if let Some(Value::Object(inputs)) = block.get("inputs") {
            for input in inputs.values() {
                // Only real blocks count; `shadow` entries are editor defaults.
                if let Some(child) = input.get("block") {
                    walk_json_block(child, set, depth + 1)?;
                }
            }
        }

        current = block.get("next").and_then(|n| n.get("block"));
    }

    Ok(())
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^<>]*>").expect("static tag pattern"))
}

fn comment_regex() -> &'static Regex {
    static COMMENT: OnceLock<Regex> = OnceLock::new();
    COMMENT.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("static comment pattern"))
}

fn type_attr_regex() -> &'static Regex {
    static TYPE_ATTR: OnceLock<Regex> = OnceLock::new();
    TYPE_ATTR.get_or_init(|| {
        Regex::new(r#"\btype\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static attribute pattern")
    })
}

/// Well-formedness checked scan of Blockly XML.
fn parse_xml(text: &str) -> Result<BlockSet, String> {
    let text = comment_regex().replace_all(text, "");
    let mut set = BlockSet::default();
    let mut stack: Vec<String> = Vec::new();
    let mut cursor = 0;
    let mut saw_element = false;

    for tag in tag_regex().find_iter(&text) {
        let gap = &text[cursor..tag.start()];
        if gap.contains('<') || gap.contains('>') {
            return Err("stray '<' or '>' outside a tag".to_string());
        }
        cursor = tag.end();

        let inner = &tag.as_str()[1..tag.as_str().len() - 1];

        if inner.starts_with('?') || inner.starts_with('!') {
            continue;
        }

        if let Some(closing) = inner.strip_prefix('/') {
            let name = closing.trim();
            match stack.pop() {
                Some(open) if open == name => {}
                Some(open) => return Err(format!("<{open}> closed by </{name}>")),
                None => return Err(format!("unexpected closing tag </{name}>")),
            }
            continue;
        }

        let self_closing = inner.ends_with('/');
        let body = inner.trim_end_matches('/');
        let name: String = body
            .chars()
            .take_while(|c| !c.is_whitespace())
            .collect();

        if name.is_empty() {
            return Err("empty tag".to_string());
        }
        saw_element = true;

        if name == "block" {
            let kind = type_attr_regex()
                .captures(body)
                .and_then(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| m.as_str().trim())
                .filter(|k| !k.is_empty())
                .ok_or_else(|| "block without a type".to_string())?;
            set.push(kind)?;
        }

        if !self_closing {
            stack.push(name);
        }
    }

    let tail = &text[cursor..];
    if tail.contains('<') || tail.contains('>') {
        return Err("stray '<' or '>' outside a tag".to_string());
    }

    if let Some(open) = stack.pop() {
        return Err(format!("unclosed <{open}>"));
    }

    if !saw_element {
        return Err("no elements found".to_string());
    }

    Ok(set)
}

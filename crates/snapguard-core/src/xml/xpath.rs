//! XPath subset evaluator over [`XmlDocument`].
//!
//! Supported: absolute and relative location paths, `//` descendant steps,
//! `.`, name tests and `*`, positional `[n]` / `[last()]` predicates,
//! attribute predicates (`[@a]`, `[@a='v']`, `[contains(@a,'v')]`,
//! `[starts-with(@a,'v')]`) joined with `and`, and trailing `@attr` or
//! `text()` steps.

use thiserror::Error;

use super::{ElementRef, NodeId, XmlDocument};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XPathError {
    #[error("empty xpath expression")]
    Empty,

    #[error("xpath syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("unsupported xpath construct: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    DescendantOrSelfChild,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    Name(String),
    AnyElement,
    SelfNode,
    Attribute(String),
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    AttrExists(String),
    AttrEquals(String, String),
    AttrContains(String, String),
    AttrStartsWith(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    Last,
    All(Vec<Condition>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LocationStep {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

/// Compiled expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    absolute: bool,
    steps: Vec<LocationStep>,
}

/// A node selected by an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XPathHit {
    Element(NodeId),
    Attribute { owner: NodeId, name: String },
    Text { owner: NodeId },
}

impl XPathHit {
    /// The hit itself when it is an element, its owning element otherwise.
    pub fn owner_element(&self) -> NodeId {
        match self {
            Self::Element(id) => *id,
            Self::Attribute { owner, .. } | Self::Text { owner } => *owner,
        }
    }
}

/// Evaluation context: the virtual document node or an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    Document,
    Element(NodeId),
}

impl XPath {
    pub fn parse(expr: &str) -> Result<Self, XPathError> {
        Parser::new(expr).parse()
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// All hits in document order.
    pub fn evaluate(&self, doc: &XmlDocument) -> Vec<XPathHit> {
        if doc.is_empty() {
            return Vec::new();
        }
        let mut contexts = vec![Ctx::Document];
        let last = self.steps.len().saturating_sub(1);

        for (i, step) in self.steps.iter().enumerate() {
            match &step.test {
                NodeTest::Attribute(name) => {
                    if i != last {
                        return Vec::new();
                    }
                    return collect_owned(doc, &contexts, step.axis, |el| {
                        el.attr(name).map(|_| XPathHit::Attribute {
                            owner: el.id(),
                            name: name.clone(),
                        })
                    });
                }
                NodeTest::Text => {
                    if i != last {
                        return Vec::new();
                    }
                    return collect_owned(doc, &contexts, step.axis, |el| {
                        doc.raw(el.id())
                            .has_text
                            .then_some(XPathHit::Text { owner: el.id() })
                    });
                }
                NodeTest::SelfNode => {
                    if step.axis == Axis::DescendantOrSelfChild {
                        let mut expanded: Vec<Ctx> = contexts
                            .iter()
                            .flat_map(|ctx| expand_axis(doc, *ctx, step.axis))
                            .collect();
                        expanded.sort_by_key(|c| match c {
                            Ctx::Document => None,
                            Ctx::Element(id) => Some(*id),
                        });
                        expanded.dedup();
                        contexts = expanded;
                    }
                    continue;
                }
                _ => {}
            }

            let mut next: Vec<NodeId> = Vec::new();
            for ctx in &contexts {
                for parent in expand_axis(doc, *ctx, step.axis) {
                    let candidates = step_candidates(doc, parent, &step.test);
                    next.extend(apply_predicates(doc, candidates, &step.predicates));
                }
            }
            next.sort_unstable();
            next.dedup();
            contexts = next.into_iter().map(Ctx::Element).collect();
            if contexts.is_empty() {
                return Vec::new();
            }
        }

        contexts
            .into_iter()
            .filter_map(|c| match c {
                Ctx::Element(id) => Some(XPathHit::Element(id)),
                Ctx::Document => None,
            })
            .collect()
    }

    /// First hit resolved to an element.
    pub fn first_element<'d>(&self, doc: &'d XmlDocument) -> Option<ElementRef<'d>> {
        self.evaluate(doc)
            .first()
            .map(|hit| doc.element(hit.owner_element()))
    }
}

/// Parents whose children a step selects from.
fn expand_axis(doc: &XmlDocument, ctx: Ctx, axis: Axis) -> Vec<Ctx> {
    match axis {
        Axis::Child => vec![ctx],
        Axis::DescendantOrSelfChild => {
            let mut out = vec![ctx];
            let start = match ctx {
                Ctx::Document => {
                    out.extend((0..doc.len()).map(Ctx::Element));
                    return out;
                }
                Ctx::Element(id) => id,
            };
            let mut stack = vec![start];
            let mut desc = Vec::new();
            while let Some(id) = stack.pop() {
                for &c in doc.raw(id).children.iter().rev() {
                    desc.push(c);
                    stack.push(c);
                }
            }
            desc.sort_unstable();
            out.extend(desc.into_iter().map(Ctx::Element));
            out
        }
    }
}

fn step_candidates(doc: &XmlDocument, parent: Ctx, test: &NodeTest) -> Vec<NodeId> {
    let children: Vec<NodeId> = match parent {
        Ctx::Document => vec![0],
        Ctx::Element(id) => doc.raw(id).children.clone(),
    };
    children
        .into_iter()
        .filter(|&c| match test {
            NodeTest::Name(n) => doc.raw(c).name == *n,
            NodeTest::AnyElement => true,
            _ => false,
        })
        .collect()
}

fn apply_predicates(
    doc: &XmlDocument,
    mut nodes: Vec<NodeId>,
    predicates: &[Predicate],
) -> Vec<NodeId> {
    for predicate in predicates {
        nodes = match predicate {
            Predicate::Position(n) => nodes.get(n - 1).copied().into_iter().collect(),
            Predicate::Last => nodes.last().copied().into_iter().collect(),
            Predicate::All(conds) => nodes
                .into_iter()
                .filter(|&id| conds.iter().all(|c| condition_holds(doc.element(id), c)))
                .collect(),
        };
    }
    nodes
}

fn condition_holds(el: ElementRef<'_>, cond: &Condition) -> bool {
    match cond {
        Condition::AttrExists(a) => el.attr(a).is_some(),
        Condition::AttrEquals(a, v) => el.attr(a) == Some(v.as_str()),
        Condition::AttrContains(a, v) => el.attr(a).is_some_and(|x| x.contains(v.as_str())),
        Condition::AttrStartsWith(a, v) => el.attr(a).is_some_and(|x| x.starts_with(v.as_str())),
    }
}

fn collect_owned<F>(doc: &XmlDocument, contexts: &[Ctx], axis: Axis, pick: F) -> Vec<XPathHit>
where
    F: Fn(ElementRef<'_>) -> Option<XPathHit>,
{
    let mut owners: Vec<NodeId> = Vec::new();
    for ctx in contexts {
        match axis {
            Axis::Child => {
                if let Ctx::Element(id) = ctx {
                    owners.push(*id);
                }
            }
            Axis::DescendantOrSelfChild => {
                for c in expand_axis(doc, *ctx, axis) {
                    if let Ctx::Element(id) = c {
                        owners.push(id);
                    }
                }
            }
        }
    }
    owners.sort_unstable();
    owners.dedup();
    owners
        .into_iter()
        .filter_map(|id| pick(doc.element(id)))
        .collect()
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn error(&self, message: impl Into<String>) -> XPathError {
        XPathError::Syntax {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn parse(mut self) -> Result<XPath, XPathError> {
        self.src = self.src.trim();
        if self.src.is_empty() {
            return Err(XPathError::Empty);
        }

        let absolute = self.rest().starts_with('/');
        let mut steps = Vec::new();
        let mut axis = Axis::Child;

        loop {
            if self.rest().starts_with("//") {
                self.pos += 2;
                axis = Axis::DescendantOrSelfChild;
            } else if self.rest().starts_with('/') {
                self.pos += 1;
                axis = Axis::Child;
            } else if !steps.is_empty() {
                return Err(self.error("expected '/'"));
            }
            if self.rest().is_empty() {
                return Err(self.error("path ends with a separator"));
            }

            let test = self.node_test()?;
            let mut predicates = Vec::new();
            while self.rest().starts_with('[') {
                predicates.push(self.predicate()?);
            }
            steps.push(LocationStep {
                axis,
                test,
                predicates,
            });

            if self.rest().is_empty() {
                break;
            }
        }

        Ok(XPath { absolute, steps })
    }

    fn name(&mut self) -> &'a str {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn node_test(&mut self) -> Result<NodeTest, XPathError> {
        let rest = self.rest();
        if rest.starts_with("text()") {
            self.pos += "text()".len();
            return Ok(NodeTest::Text);
        }
        if rest.starts_with("node()") {
            self.pos += "node()".len();
            return Ok(NodeTest::AnyElement);
        }
        if rest.starts_with('*') {
            self.pos += 1;
            return Ok(NodeTest::AnyElement);
        }
        if rest.starts_with('@') {
            self.pos += 1;
            let name = self.name();
            if name.is_empty() {
                return Err(self.error("expected attribute name"));
            }
            return Ok(NodeTest::Attribute(name.to_string()));
        }
        if rest.starts_with('.') && !rest.starts_with("..") {
            self.pos += 1;
            return Ok(NodeTest::SelfNode);
        }
        if rest.starts_with("..") {
            return Err(XPathError::Unsupported(rest.to_string()));
        }
        let name = self.name();
        if name.is_empty() {
            return Err(self.error("expected node test"));
        }
        if self.rest().starts_with("::") {
            return Err(XPathError::Unsupported(format!("axis {name}::")));
        }
        Ok(NodeTest::Name(name.to_string()))
    }

    /// Consume `[ ... ]`, honouring quotes, and parse its body.
    fn predicate(&mut self) -> Result<Predicate, XPathError> {
        let start = self.pos + 1;
        let mut quote: Option<char> = None;
        let mut end = None;
        for (i, c) in self.rest().char_indices().skip(1) {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"') => quote = Some(c),
                (None, ']') => {
                    end = Some(self.pos + i);
                    break;
                }
                _ => {}
            }
        }
        let end = end.ok_or_else(|| self.error("unterminated predicate"))?;
        let body = self.src[start..end].trim();
        self.pos = end + 1;
        parse_predicate_body(body)
    }
}

fn parse_predicate_body(body: &str) -> Result<Predicate, XPathError> {
    if body == "last()" {
        return Ok(Predicate::Last);
    }
    if let Ok(n) = body.parse::<usize>() {
        if n == 0 {
            return Err(XPathError::Unsupported("position 0".to_string()));
        }
        return Ok(Predicate::Position(n));
    }
    split_and(body)
        .into_iter()
        .map(parse_condition)
        .collect::<Result<Vec<_>, _>>()
        .map(Predicate::All)
}

/// Split on ` and ` outside quotes.
fn split_and(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut last = 0;
    let mut skip_until = 0;
    for (i, c) in body.char_indices() {
        if i < skip_until {
            continue;
        }
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if body[i..].starts_with(" and ") => {
                parts.push(body[last..i].trim());
                last = i + " and ".len();
                skip_until = last;
            }
            None => {}
        }
    }
    parts.push(body[last..].trim());
    parts
}

fn unquote(s: &str) -> Option<&str> {
    let s = s.trim();
    let first = s.chars().next()?;
    if (first == '\'' || first == '"') && s.len() >= 2 && s.ends_with(first) {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

fn parse_condition(cond: &str) -> Result<Condition, XPathError> {
    let unsupported = || XPathError::Unsupported(cond.to_string());

    let functions: [(&str, fn(String, String) -> Condition); 2] = [
        ("contains(", Condition::AttrContains),
        ("starts-with(", Condition::AttrStartsWith),
    ];
    for (func, make) in functions {
        if let Some(args) = cond.strip_prefix(func).and_then(|r| r.strip_suffix(')')) {
            let (attr, value) = args.split_once(',').ok_or_else(unsupported)?;
            let attr = attr.trim().strip_prefix('@').ok_or_else(unsupported)?;
            let value = unquote(value).ok_or_else(unsupported)?;
            return Ok(make(attr.to_string(), value.to_string()));
        }
    }

    let attr_expr = cond.strip_prefix('@').ok_or_else(unsupported)?;
    match attr_expr.split_once('=') {
        None => Ok(Condition::AttrExists(attr_expr.trim().to_string())),
        Some((attr, value)) => {
            let value = unquote(value).ok_or_else(unsupported)?;
            Ok(Condition::AttrEquals(
                attr.trim().to_string(),
                value.to_string(),
            ))
        }
    }
}

//! Query capability: compiled XPath 1.0 expressions evaluated with
//! `sxd-xpath` against `sxd-document` trees.
//!
//! Queries are compiled once, when the mapping configuration is loaded, and
//! evaluated many times against document nodes. This module only adapts
//! results to what the extraction layer needs: ordered string values,
//! instance nodes, or a boolean.
//!
//! # Example
//!
//! ```
//! use flatxml::query::{document_element, NamespaceMap, Query};
//!
//! let package = sxd_document::parser::parse("<r><item id='1'/><item id='2'/></r>").unwrap();
//! let doc = package.as_document();
//! let root = document_element(&doc).unwrap();
//! let query = Query::compile("item/@id", &NamespaceMap::new()).unwrap();
//! assert_eq!(query.evaluate_strings(root).unwrap(), vec!["1", "2"]);
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use sxd_document::dom::{ChildOfRoot, Document};
use sxd_xpath::{Context, Factory, Value, XPath};

pub use sxd_xpath::nodeset::Node;

use crate::error::{QueryError, QueryResult};

/// Namespace prefix to URI bindings available to queries.
pub type NamespaceMap = BTreeMap<String, String>;

static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""[^"]*"|'[^']*'"#).expect("Invalid literal regex"));

/// `prefix:local` or `prefix:*`. Axis separators (`::`) never match.
static PREFIXED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_][\w.\-]*):[A-Za-z_*]").expect("Invalid prefix regex")
});

static FUNCTION_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_][\w.\-]*(?::[A-Za-z_][\w.\-]*)?)\s*\(")
        .expect("Invalid function regex")
});

/// XPath 1.0 core function library.
const CORE_FUNCTIONS: &[&str] = &[
    "last",
    "position",
    "count",
    "local-name",
    "namespace-uri",
    "name",
    "string",
    "concat",
    "starts-with",
    "contains",
    "substring-before",
    "substring-after",
    "substring",
    "string-length",
    "normalize-space",
    "translate",
    "boolean",
    "not",
    "true",
    "false",
    "lang",
    "number",
    "sum",
    "floor",
    "ceiling",
    "round",
];

/// Words followed by `(` that are not function calls.
const NOT_FUNCTIONS: &[&str] = &[
    "text",
    "node",
    "comment",
    "processing-instruction",
    "and",
    "or",
    "div",
    "mod",
];

/// A compiled query expression.
#[derive(Clone)]
pub struct Query {
    source: String,
    xpath: Arc<XPath>,
    namespaces: NamespaceMap,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query({:?})", self.source)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.namespaces == other.namespaces
    }
}

impl Query {
    /// Compile `source`. Every prefix it uses must be bound in `namespaces`
    /// and every function it calls must be a core function.
    pub fn compile(source: &str, namespaces: &NamespaceMap) -> QueryResult<Self> {
        let xpath = Factory::new().build(source).map_err(|e| QueryError::Syntax {
            expression: source.to_string(),
            message: e.to_string(),
        })?
        .ok_or_else(|| QueryError::Syntax {
            expression: source.to_string(),
            message: "empty expression".into(),
        })?;

        let code = STRING_LITERAL.replace_all(source, "''");
        for caps in FUNCTION_CALL.captures_iter(&code) {
            let name = &caps[1];
            if !CORE_FUNCTIONS.contains(&name) && !NOT_FUNCTIONS.contains(&name) {
                return Err(QueryError::UnknownFunction(name.to_string()));
            }
        }
        for caps in PREFIXED_NAME.captures_iter(&code) {
            if !namespaces.contains_key(&caps[1]) {
                return Err(QueryError::UnknownPrefix(caps[1].to_string()));
            }
        }

        Ok(Self {
            source: source.to_string(),
            xpath: Arc::new(xpath),
            namespaces: namespaces.clone(),
        })
    }

    /// The expression text as written in the configuration.
    pub fn source(&self) -> &str {
        &self.source
    }

    fn context<'d>(&self) -> Context<'d> {
        let mut context = Context::new();
        for (prefix, uri) in &self.namespaces {
            context.set_namespace(prefix, uri);
        }
        context
    }

    /// Evaluate with `node` as the context node.
    pub fn evaluate<'d>(&self, node: Node<'d>) -> QueryResult<Value<'d>> {
        self.xpath
            .evaluate(&self.context(), node)
            .map_err(|e| QueryError::Evaluation {
                expression: self.source.clone(),
                message: e.to_string(),
            })
    }

    /// Matched nodes in document order. Atomic results yield an empty list.
    pub fn select<'d>(&self, node: Node<'d>) -> QueryResult<Vec<Node<'d>>> {
        Ok(match self.evaluate(node)? {
            Value::Nodeset(nodes) => nodes.document_order(),
            _ => Vec::new(),
        })
    }

    /// Evaluate to an ordered list of string values: the string-value of
    /// each matched node, or the single atomic result.
    pub fn evaluate_strings(&self, node: Node<'_>) -> QueryResult<Vec<String>> {
        Ok(match self.evaluate(node)? {
            Value::Nodeset(nodes) => nodes.document_order().iter().map(|n| n.string_value()).collect(),
            Value::Number(n) => vec![format_number(n)],
            Value::String(s) => vec![s],
            Value::Boolean(b) => vec![b.to_string()],
        })
    }

    /// First string value, if any.
    pub fn evaluate_string(&self, node: Node<'_>) -> QueryResult<Option<String>> {
        Ok(self.evaluate_strings(node)?.into_iter().next())
    }

    /// Boolean value of the expression.
    pub fn matches(&self, node: Node<'_>) -> QueryResult<bool> {
        Ok(self.evaluate(node)?.boolean())
    }
}

/// XPath number-to-string conversion.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// The document element, where evaluation of top-level outputs starts.
pub fn document_element<'d>(document: &Document<'d>) -> Option<Node<'d>> {
    document.root().children().into_iter().find_map(|child| match child {
        ChildOfRoot::Element(element) => Some(Node::Element(element)),
        _ => None,
    })
}

/// Parse `xml` and run `f` against its document element.
#[cfg(test)]
pub(crate) fn with_document<R>(xml: &str, f: impl FnOnce(Node<'_>) -> R) -> R {
    let package = sxd_document::parser::parse(xml).unwrap();
    let document = package.as_document();
    f(document_element(&document).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: &str = r#"<?xml version="1.0"?>
<orders xmlns:x="urn:extra">
  <order id="1" status="open">
    <item sku="A" qty="2">Apple</item>
    <item sku="B" qty="1">Banana</item>
    <x:note>rush</x:note>
  </order>
  <order id="2" status="closed">
    <item sku="C" qty="5">  Cherry   pie </item>
  </order>
  <!-- trailing -->
</orders>"#;

    fn namespaces() -> NamespaceMap {
        let mut ns = NamespaceMap::new();
        ns.insert("x".into(), "urn:extra".into());
        ns
    }

    fn strings(source: &str) -> Vec<String> {
        let query = Query::compile(source, &namespaces()).unwrap();
        with_document(ORDERS, |root| query.evaluate_strings(root).unwrap())
    }

    #[test]
    fn test_child_and_attribute_steps() {
        assert_eq!(strings("order/@id"), vec!["1", "2"]);
        assert_eq!(strings("order/item/@sku"), vec!["A", "B", "C"]);
        assert_eq!(strings("order[1]/item"), vec!["Apple", "Banana"]);
    }

    #[test]
    fn test_descendants_and_absolute_paths() {
        assert_eq!(strings("//item/@sku"), vec!["A", "B", "C"]);
        assert_eq!(strings("/orders/order/@status"), vec!["open", "closed"]);
        assert_eq!(strings("count(//item)"), vec!["3"]);
    }

    #[test]
    fn test_predicates() {
        assert_eq!(strings("order[@status = 'closed']/@id"), vec!["2"]);
        assert_eq!(strings("//item[@qty > 1]/@sku"), vec!["A", "C"]);
        assert_eq!(strings("order/item[last()]/@sku"), vec!["B", "C"]);
        assert_eq!(strings("order[not(x:note)]/@id"), vec!["2"]);
    }

    #[test]
    fn test_union_is_in_document_order() {
        assert_eq!(strings("order[2]/@id | order[1]/@id"), vec!["1", "2"]);
    }

    #[test]
    fn test_arithmetic_and_numeric_functions() {
        assert_eq!(strings("1 + order[1]/item[1]/@qty"), vec!["3"]);
        assert_eq!(strings("-1"), vec!["-1"]);
        assert_eq!(strings("sum(//item/@qty)"), vec!["8"]);
        assert_eq!(strings("//item[@sku='C']/@qty div 2"), vec!["2.5"]);
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(strings("normalize-space(order[2]/item)"), vec!["Cherry pie"]);
        assert_eq!(strings("concat(order[1]/@id, '-', order[1]/@status)"), vec!["1-open"]);
        assert_eq!(strings("translate(order[1]/@status, 'opn', 'OPN')"), vec!["OPeN"]);
        assert_eq!(strings("starts-with(order[1]/item[2], 'nan')"), vec!["false"]);
    }

    #[test]
    fn test_namespaced_names() {
        assert_eq!(strings("order/x:note"), vec!["rush"]);
        // Unprefixed names only match elements without a namespace
        assert!(strings("order/note").is_empty());
        assert_eq!(strings("local-name(order/x:note)"), vec!["note"]);
    }

    #[test]
    fn test_compile_errors() {
        let ns = namespaces();
        assert!(matches!(Query::compile("a[", &ns), Err(QueryError::Syntax { .. })));
        assert_eq!(
            Query::compile("u:a", &ns).unwrap_err(),
            QueryError::UnknownPrefix("u".into())
        );
        assert_eq!(
            Query::compile("frobnicate(a)", &ns).unwrap_err(),
            QueryError::UnknownFunction("frobnicate".into())
        );
        // Axes, node tests, operators and literals are not mistaken for
        // prefixes or calls
        assert!(Query::compile("child::x:note/text()", &ns).is_ok());
        assert!(Query::compile("a and (b or c)", &ns).is_ok());
        assert!(Query::compile("concat('u:a', \"frob(\")", &ns).is_ok());
        assert_eq!(
            Query::compile("not(frob(a))", &ns).unwrap_err(),
            QueryError::UnknownFunction("frob".into())
        );
    }

    #[test]
    fn test_select_and_matches() {
        let ns = NamespaceMap::new();
        with_document(ORDERS, |root| {
            assert_eq!(Query::compile("order", &ns).unwrap().select(root).unwrap().len(), 2);
            assert!(Query::compile("count(order)", &ns).unwrap().select(root).unwrap().is_empty());
            assert!(Query::compile("order[@status='open']", &ns).unwrap().matches(root).unwrap());
            assert!(!Query::compile("order[@status='void']", &ns).unwrap().matches(root).unwrap());
            assert_eq!(
                Query::compile("order/@id", &ns).unwrap().evaluate_string(root).unwrap(),
                Some("1".to_string())
            );
            assert_eq!(
                Query::compile("missing", &ns).unwrap().evaluate_string(root).unwrap(),
                None
            );
        });
    }

    #[test]
    fn test_runtime_fault_is_an_evaluation_error() {
        let query = Query::compile("count('x')", &NamespaceMap::new()).unwrap();
        let result = with_document(ORDERS, |root| query.evaluate_strings(root));
        assert!(matches!(result, Err(QueryError::Evaluation { .. })));
    }
}

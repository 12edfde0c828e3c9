//! Mapping configuration loader.
//!
//! Builds a [`MappingConfiguration`] from its XML form. Elements are
//! recognised by local name, so the configuration may or may not use a
//! namespace of its own.
//!
//! ```xml
//! <MappingConfiguration behaviour="lazy" nameFormat="NoCounts">
//!   <Namespace prefix="o" uri="urn:orders"/>
//!   <Filters>
//!     <FileNameInputFilter fileNameRegex=".*\.xml" matchLocalFileNameOnly="true"/>
//!   </Filters>
//!   <MappingList name="orders" mappingRoot="o:order">
//!     <Mapping name="id" xPath="@id"/>
//!     <MappingList name="items" mappingRoot="o:item" behaviour="greedy">
//!       <Mapping name="sku" xPath="@sku" nameFormat="WithCount"/>
//!     </MappingList>
//!     <PivotMapping name="attrs" kvPairRoot="o:attr" keyXPath="@key" valueXPath="."/>
//!   </MappingList>
//! </MappingConfiguration>
//! ```
//!
//! Loading aborts on the first error; errors carry the source name, line and
//! column of the offending element.

use roxmltree::{Document, Node};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult, Defect};
use crate::mapping::{
    FilterPredicate, InputFilter, MappingCommon, MappingConfiguration, MappingContainer, MappingId,
    MappingNode, MultiValueBehaviour, NameFormat, PivotMapping, ValueMapping, ValueSource,
};
use crate::query::Query;

// Element names
const CONFIGURATION_ELEMENT: &str = "MappingConfiguration";
const NAMESPACE_ELEMENT: &str = "Namespace";
const FILTERS_ELEMENT: &str = "Filters";
const FILE_NAME_FILTER_ELEMENT: &str = "FileNameInputFilter";
const XPATH_FILTER_ELEMENT: &str = "XPathInputFilter";
const MAPPING_LIST_ELEMENT: &str = "MappingList";
const MAPPING_ELEMENT: &str = "Mapping";
const PIVOT_MAPPING_ELEMENT: &str = "PivotMapping";

// Attribute names
const BEHAVIOUR_ATTR: &str = "behaviour";
const CUSTOM_NAME_FORMAT_ATTR: &str = "customNameFormat";
const FILE_NAME_REGEX_ATTR: &str = "fileNameRegex";
const GROUP_ATTR: &str = "group";
const KEY_XPATH_ATTR: &str = "keyXPath";
const KV_PAIR_ROOT_ATTR: &str = "kvPairRoot";
const MAPPING_ROOT_ATTR: &str = "mappingRoot";
const MATCH_LOCAL_ONLY_ATTR: &str = "matchLocalFileNameOnly";
const MIN_VALUES_ATTR: &str = "minValues";
const MAX_VALUES_ATTR: &str = "maxValues";
const LEGACY_MIN_VALUES_ATTR: &str = "minOccurs";
const LEGACY_MAX_VALUES_ATTR: &str = "maxOccurs";
const NAME_ATTR: &str = "name";
const NAME_FORMAT_ATTR: &str = "nameFormat";
const PREFIX_ATTR: &str = "prefix";
const URI_ATTR: &str = "uri";
const VALUE_XPATH_ATTR: &str = "valueXPath";
const XPATH_ATTR: &str = "xPath";

/// Load and merge several configuration files.
pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> ConfigResult<MappingConfiguration> {
    let mut merged: Option<MappingConfiguration> = None;
    for path in paths {
        let config = load_file(path)?;
        match merged.as_mut() {
            None => merged = Some(config),
            Some(existing) => existing.merge(config)?,
        }
    }
    Ok(merged.unwrap_or_default())
}

/// Load one configuration file.
pub fn load_file<P: AsRef<Path>>(path: P) -> ConfigResult<MappingConfiguration> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_str(&text, &path.display().to_string())
}

/// Load a configuration from text. `source_name` identifies it in errors.
///
/// Every `Default` behaviour is resolved before this returns.
pub fn load_str(text: &str, source_name: &str) -> ConfigResult<MappingConfiguration> {
    let doc = Document::parse(text).map_err(|e| ConfigError::Syntax {
        source_name: source_name.to_string(),
        message: e.to_string(),
    })?;

    let mut builder = ConfigBuilder::new(&doc, source_name);
    walk(&mut builder, doc.root_element())?;
    let mut config = builder.finish()?;
    config.resolve_effective_behaviour();

    info!(
        source = %source_name,
        outputs = config.outputs().len(),
        mappings = config.tree.len(),
        filters = config.filters.len(),
        "Loaded mapping configuration"
    );
    Ok(config)
}

/// Feed `node` and its element descendants to the builder as open/close
/// edges, in document order.
fn walk<'input>(builder: &mut ConfigBuilder<'_, 'input>, node: Node<'_, 'input>) -> ConfigResult<()> {
    builder.open(node)?;
    for child in node.children().filter(|n| n.is_element()) {
        walk(builder, child)?;
    }
    builder.close(node)
}

/// What an open element on the stack became.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Frame {
    Configuration,
    Namespace,
    Filters,
    Filter,
    Container(MappingId),
    Mapping,
    Pivot,
}

impl Frame {
    fn element(&self) -> &'static str {
        match self {
            Frame::Configuration => CONFIGURATION_ELEMENT,
            Frame::Namespace => NAMESPACE_ELEMENT,
            Frame::Filters => FILTERS_ELEMENT,
            Frame::Filter => "input filter",
            Frame::Container(_) => MAPPING_LIST_ELEMENT,
            Frame::Mapping => MAPPING_ELEMENT,
            Frame::Pivot => PIVOT_MAPPING_ELEMENT,
        }
    }
}

struct ConfigBuilder<'d, 'input> {
    doc: &'d Document<'input>,
    source_name: &'d str,
    config: MappingConfiguration,
    stack: Vec<Frame>,
    /// Filters under construction, innermost last.
    filters: Vec<InputFilter>,
    /// Default group for the next mapping without an explicit `group`.
    current_group: u32,
}

impl<'d, 'input> ConfigBuilder<'d, 'input> {
    fn new(doc: &'d Document<'input>, source_name: &'d str) -> Self {
        Self {
            doc,
            source_name,
            config: MappingConfiguration::new(),
            stack: Vec::new(),
            filters: Vec::new(),
            current_group: 0,
        }
    }

    fn error(&self, node: Node<'_, '_>, message: impl Into<String>) -> ConfigError {
        let pos = self.doc.text_pos_at(node.range().start);
        ConfigError::Invalid {
            source_name: self.source_name.to_string(),
            line: pos.row,
            column: pos.col,
            message: message.into(),
        }
    }

    // -------------------------------------------------------------------------
    // Attribute helpers
    // -------------------------------------------------------------------------

    fn optional<'n>(&self, node: Node<'n, 'input>, attr: &str) -> Option<&'n str> {
        node.attribute(attr).filter(|v| !v.trim().is_empty())
    }

    fn required<'n>(&self, node: Node<'n, 'input>, attr: &str) -> ConfigResult<&'n str> {
        self.optional(node, attr).ok_or_else(|| {
            self.error(
                node,
                format!(
                    "Missing required attribute \"{}\" on {}",
                    attr,
                    node.tag_name().name()
                ),
            )
        })
    }

    fn parse_attr<T: FromStr>(&self, node: Node<'_, 'input>, attr: &str) -> ConfigResult<Option<T>> {
        match self.optional(node, attr) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                self.error(node, format!("Invalid value \"{}\" for attribute \"{}\"", raw, attr))
            }),
        }
    }

    fn query(&self, node: Node<'_, 'input>, attr: &str, source: &str) -> ConfigResult<Query> {
        Query::compile(source, &self.config.namespaces).map_err(|e| {
            self.error(
                node,
                format!("Invalid XPath \"{}\" in attribute \"{}\": {}", source, attr, e),
            )
        })
    }

    fn optional_query(&self, node: Node<'_, 'input>, attr: &str) -> ConfigResult<Option<Query>> {
        self.optional(node, attr)
            .map(|source| self.query(node, attr, source))
            .transpose()
    }

    fn behaviour(&self, node: Node<'_, 'input>) -> ConfigResult<MultiValueBehaviour> {
        match self.optional(node, BEHAVIOUR_ATTR) {
            None => Ok(MultiValueBehaviour::Default),
            Some(raw) => raw
                .parse::<MultiValueBehaviour>()
                .map_err(|message| self.error(node, message)),
        }
    }

    fn name_format(&self, node: Node<'_, 'input>) -> ConfigResult<NameFormat> {
        NameFormat::parse(
            self.optional(node, NAME_FORMAT_ATTR),
            node.attribute(CUSTOM_NAME_FORMAT_ATTR),
            &self.config.default_name_format,
        )
        .map_err(|message| self.error(node, message))
    }

    /// `minValues`/`maxValues`, or their legacy spellings with the same
    /// meaning.
    fn bounds(&self, node: Node<'_, 'input>) -> ConfigResult<(usize, usize)> {
        let min = match self.parse_attr::<usize>(node, MIN_VALUES_ATTR)? {
            Some(v) => Some(v),
            None => self.parse_attr::<usize>(node, LEGACY_MIN_VALUES_ATTR)?,
        };
        let max = match self.parse_attr::<usize>(node, MAX_VALUES_ATTR)? {
            Some(v) => Some(v),
            None => self.parse_attr::<usize>(node, LEGACY_MAX_VALUES_ATTR)?,
        };
        Ok((min.unwrap_or(0), max.unwrap_or(0)))
    }

    fn common(&self, node: Node<'_, 'input>, name: &str, group: u32) -> ConfigResult<MappingCommon> {
        let (min, max) = self.bounds(node)?;
        MappingCommon::new(name, group)
            .with_behaviour(self.behaviour(node)?)
            .with_name_format(self.name_format(node)?)
            .with_bounds(min, max)
            .map_err(|message| self.error(node, message))
    }

    fn parent_container(&self) -> Option<MappingId> {
        match self.stack.last() {
            Some(Frame::Container(id)) => Some(*id),
            _ => None,
        }
    }

    fn check_unique(&self, node: Node<'_, 'input>, parent: Option<MappingId>, name: &str) -> ConfigResult<()> {
        let clash = match parent {
            Some(parent) => self.config.tree.child_named(parent, name).is_some(),
            None => self.config.tree.root_named(name).is_some(),
        };
        if clash {
            return Err(self.error(node, format!("Duplicate mapping name \"{}\"", name)));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Element handlers
    // -------------------------------------------------------------------------

    fn open(&mut self, node: Node<'_, 'input>) -> ConfigResult<()> {
        let element = node.tag_name().name();
        let parent = self.stack.last().copied();

        let allowed = match (element, parent) {
            (CONFIGURATION_ELEMENT, None) => true,
            (NAMESPACE_ELEMENT | FILTERS_ELEMENT, Some(Frame::Configuration)) => true,
            (FILE_NAME_FILTER_ELEMENT | XPATH_FILTER_ELEMENT, Some(Frame::Filters | Frame::Filter)) => {
                true
            }
            (MAPPING_LIST_ELEMENT, Some(Frame::Configuration | Frame::Container(_))) => true,
            (MAPPING_ELEMENT | PIVOT_MAPPING_ELEMENT, Some(Frame::Container(_))) => true,
            _ => false,
        };
        if !allowed {
            let message = match parent {
                None => format!("Expected root element {}, found {}", CONFIGURATION_ELEMENT, element),
                Some(frame) => format!("Unexpected element {} inside {}", element, frame.element()),
            };
            return Err(self.error(node, message));
        }

        let frame = match element {
            CONFIGURATION_ELEMENT => self.open_configuration(node)?,
            NAMESPACE_ELEMENT => self.open_namespace(node)?,
            FILTERS_ELEMENT => Frame::Filters,
            FILE_NAME_FILTER_ELEMENT => self.open_file_name_filter(node)?,
            XPATH_FILTER_ELEMENT => self.open_xpath_filter(node)?,
            MAPPING_LIST_ELEMENT => self.open_mapping_list(node)?,
            MAPPING_ELEMENT => self.open_mapping(node)?,
            PIVOT_MAPPING_ELEMENT => self.open_pivot(node)?,
            _ => return Err(self.error(node, format!("Unrecognised element {}", element))),
        };
        self.stack.push(frame);
        Ok(())
    }

    fn close(&mut self, node: Node<'_, 'input>) -> ConfigResult<()> {
        let frame = self.stack.pop().ok_or_else(|| {
            Defect::new(format!("close of {} with an empty stack", node.tag_name().name()))
        })?;
        if frame == Frame::Filter {
            let filter = self
                .filters
                .pop()
                .ok_or_else(|| Defect::new("filter stack underflow"))?;
            match self.filters.last_mut() {
                Some(parent) => parent.nested.push(filter),
                None => self.config.filters.push(filter),
            }
        }
        Ok(())
    }

    fn finish(self) -> ConfigResult<MappingConfiguration> {
        if !self.stack.is_empty() || !self.filters.is_empty() {
            return Err(Defect::new(format!(
                "mapping stack should be empty at end of document, contains {} elements",
                self.stack.len()
            ))
            .into());
        }
        Ok(self.config)
    }

    fn open_configuration(&mut self, node: Node<'_, 'input>) -> ConfigResult<Frame> {
        for ns in node.namespaces() {
            match ns.name() {
                Some(prefix) if prefix != "xml" => {
                    self.config
                        .namespaces
                        .insert(prefix.to_string(), ns.uri().to_string());
                }
                _ => {}
            }
        }
        self.config.default_behaviour = self.behaviour(node)?;
        self.config.default_name_format = NameFormat::parse(
            self.optional(node, NAME_FORMAT_ATTR),
            None,
            &NameFormat::NoCounts,
        )
        .map_err(|message| self.error(node, message))?;
        Ok(Frame::Configuration)
    }

    fn open_namespace(&mut self, node: Node<'_, 'input>) -> ConfigResult<Frame> {
        let prefix = self.required(node, PREFIX_ATTR)?;
        let uri = self.required(node, URI_ATTR)?;
        if self.config.namespaces.contains_key(prefix) {
            return Err(self.error(node, format!("Duplicate namespace prefix \"{}\"", prefix)));
        }
        debug!(prefix, uri, "Declared namespace");
        self.config
            .namespaces
            .insert(prefix.to_string(), uri.to_string());
        Ok(Frame::Namespace)
    }

    fn open_file_name_filter(&mut self, node: Node<'_, 'input>) -> ConfigResult<Frame> {
        let pattern = self.required(node, FILE_NAME_REGEX_ATTR)?;
        let local_only = self
            .parse_attr::<bool>(node, MATCH_LOCAL_ONLY_ATTR)?
            .unwrap_or(true);
        let filter = InputFilter::file_name(pattern, local_only).map_err(|e| {
            self.error(node, format!("Invalid file name regex \"{}\": {}", pattern, e))
        })?;
        self.filters.push(filter);
        Ok(Frame::Filter)
    }

    fn open_xpath_filter(&mut self, node: Node<'_, 'input>) -> ConfigResult<Frame> {
        let source = self.required(node, XPATH_ATTR)?;
        let query = self.query(node, XPATH_ATTR, source)?;
        self.filters.push(InputFilter::new(FilterPredicate::XPath(query)));
        Ok(Frame::Filter)
    }

    fn open_mapping_list(&mut self, node: Node<'_, 'input>) -> ConfigResult<Frame> {
        let parent = self.parent_container();
        let name = self.required(node, NAME_ATTR)?;
        self.check_unique(node, parent, name)?;

        let group = self
            .parse_attr::<u32>(node, GROUP_ATTR)?
            .unwrap_or(self.current_group);
        let container = MappingContainer {
            common: self.common(node, name, group)?,
            root: self.optional_query(node, MAPPING_ROOT_ATTR)?,
            children: Vec::new(),
        };

        let id = match parent {
            Some(parent) => self
                .config
                .tree
                .add_child(parent, MappingNode::Container(container))?,
            None => self.config.tree.add_root(container)?,
        };
        // Children default to a group no other container's children use
        self.current_group += 1;
        Ok(Frame::Container(id))
    }

    fn open_mapping(&mut self, node: Node<'_, 'input>) -> ConfigResult<Frame> {
        let parent = self
            .parent_container()
            .ok_or_else(|| Defect::new("Mapping outside a container"))?;
        let source = self.required(node, XPATH_ATTR)?;
        let name = match self.optional(node, NAME_ATTR) {
            Some(name) => name.to_string(),
            None => {
                debug!(xpath = source, "No name given for mapping, deriving from XPath");
                source.replace('/', "_")
            }
        };
        self.check_unique(node, Some(parent), &name)?;

        let group = self
            .parse_attr::<u32>(node, GROUP_ATTR)?
            .unwrap_or(self.current_group);
        let mapping = ValueMapping {
            common: self.common(node, &name, group)?,
            source: ValueSource::Query(self.query(node, XPATH_ATTR, source)?),
        };
        self.config
            .tree
            .add_child(parent, MappingNode::Value(mapping))?;
        Ok(Frame::Mapping)
    }

    fn open_pivot(&mut self, node: Node<'_, 'input>) -> ConfigResult<Frame> {
        let parent = self
            .parent_container()
            .ok_or_else(|| Defect::new("PivotMapping outside a container"))?;
        let key_source = self.required(node, KEY_XPATH_ATTR)?;
        let name = match self.optional(node, NAME_ATTR) {
            Some(name) => name.to_string(),
            None => key_source.replace('/', "_"),
        };
        self.check_unique(node, Some(parent), &name)?;

        let kv_source = self.required(node, KV_PAIR_ROOT_ATTR)?;
        let value_source = self.required(node, VALUE_XPATH_ATTR)?;
        let group = self
            .parse_attr::<u32>(node, GROUP_ATTR)?
            .unwrap_or(self.current_group);

        let pivot = PivotMapping {
            common: self.common(node, &name, group)?,
            root: self.optional_query(node, MAPPING_ROOT_ATTR)?,
            kv_pair_root: self.query(node, KV_PAIR_ROOT_ATTR, kv_source)?,
            key: self.query(node, KEY_XPATH_ATTR, key_source)?,
            value: self.query(node, VALUE_XPATH_ATTR, value_source)?,
            children: Vec::new(),
        };
        self.config.tree.add_child(parent, MappingNode::Pivot(pivot))?;
        self.current_group += 1;
        Ok(Frame::Pivot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ORDERS_CONFIG: &str = r#"<?xml version="1.0"?>
<MappingConfiguration xmlns:o="urn:orders" nameFormat="WithCount">
  <Namespace prefix="x" uri="urn:extra"/>
  <Filters>
    <FileNameInputFilter fileNameRegex=".*\.xml">
      <XPathInputFilter xPath="o:order"/>
    </FileNameInputFilter>
  </Filters>
  <MappingList name="orders" mappingRoot="o:order">
    <Mapping name="id" xPath="@id"/>
    <Mapping xPath="o:customer/o:name" behaviour="greedy" minValues="1" maxValues="3"/>
    <MappingList name="items" mappingRoot="o:item" group="7">
      <Mapping name="sku" xPath="@sku" nameFormat="NoCounts"/>
    </MappingList>
    <PivotMapping name="attrs" kvPairRoot="x:attr" keyXPath="@k" valueXPath="@v"
                  customNameFormat="{parent}.{name}"/>
  </MappingList>
</MappingConfiguration>"#;

    fn child(config: &MappingConfiguration, parent: MappingId, name: &str) -> MappingId {
        config.tree.child_named(parent, name).unwrap()
    }

    #[test]
    fn test_load_full_configuration() {
        let config = load_str(ORDERS_CONFIG, "orders.xml").unwrap();

        assert_eq!(config.namespaces.get("o").map(String::as_str), Some("urn:orders"));
        assert_eq!(config.namespaces.get("x").map(String::as_str), Some("urn:extra"));
        assert_eq!(config.default_name_format, NameFormat::WithCount);
        assert_eq!(config.filters.len(), 1);
        assert_eq!(config.filters[0].nested.len(), 1);

        let orders = config.tree.root_named("orders").unwrap();
        assert_eq!(config.tree.children(orders).len(), 4);

        let id = child(&config, orders, "id");
        let derived = child(&config, orders, "o:customer_o:name");
        let items = child(&config, orders, "items");
        let attrs = child(&config, orders, "attrs");

        // Name format falls back to the configuration default
        assert_eq!(config.tree[id].common().name_format, NameFormat::WithCount);
        assert_eq!(config.tree[derived].common().min_values, 1);
        assert_eq!(config.tree[derived].common().max_values, 3);
        assert_eq!(
            config.tree[derived].common().behaviour,
            MultiValueBehaviour::Greedy
        );
        assert_eq!(config.tree[id].common().behaviour, MultiValueBehaviour::Lazy);
        assert_eq!(config.tree[items].common().group, 7);
        assert!(matches!(config.tree[attrs], MappingNode::Pivot(_)));
        assert_eq!(
            config.tree[attrs].common().name_format,
            NameFormat::Custom("{parent}.{name}".into())
        );
    }

    #[test]
    fn test_group_numbering() {
        let config = load_str(ORDERS_CONFIG, "orders.xml").unwrap();
        let orders = config.tree.root_named("orders").unwrap();
        let group = |name: &str| config.tree[child(&config, orders, name)].common().group;

        // The container takes the counter, its children the incremented value
        assert_eq!(config.tree[orders].common().group, 0);
        assert_eq!(group("id"), 1);
        assert_eq!(group("o:customer_o:name"), 1);
        // An explicit group still advances the counter
        assert_eq!(group("items"), 7);
        assert_eq!(group("attrs"), 2);

        let items = child(&config, orders, "items");
        assert_eq!(config.tree[child(&config, items, "sku")].common().group, 2);
    }

    #[test]
    fn test_value_count_attributes_are_not_inverted() {
        let text = r#"<MappingConfiguration>
  <MappingList name="out" mappingRoot="r">
    <Mapping name="a" xPath="a" minValues="2" maxValues="5"/>
    <Mapping name="b" xPath="b" minOccurs="1" maxOccurs="4"/>
  </MappingList>
</MappingConfiguration>"#;
        let config = load_str(text, "bounds.xml").unwrap();
        let out = config.tree.root_named("out").unwrap();

        let a = config.tree[child(&config, out, "a")].common().clone();
        assert_eq!((a.min_values, a.max_values), (2, 5));
        let b = config.tree[child(&config, out, "b")].common().clone();
        assert_eq!((b.min_values, b.max_values), (1, 4));
    }

    fn load_error(text: &str) -> String {
        load_str(text, "bad.xml").unwrap_err().to_string()
    }

    #[test]
    fn test_errors_are_located() {
        let msg = load_error(
            "<MappingConfiguration>\n  <MappingList name=\"o\" mappingRoot=\"r\">\n    <Mapping name=\"a\" xPath=\"a[\"/>\n  </MappingList>\n</MappingConfiguration>",
        );
        assert!(msg.starts_with("Error parsing bad.xml(3:5)"), "{}", msg);
        assert!(msg.contains("Invalid XPath"));
    }

    #[test]
    fn test_rejected_configurations() {
        assert!(load_error(r#"<MappingConfiguration behaviour="eager"/>"#).contains("eager"));
        assert!(load_error(
            r#"<MappingConfiguration><Namespace prefix="a" uri="u1"/><Namespace prefix="a" uri="u2"/></MappingConfiguration>"#
        )
        .contains("Duplicate namespace prefix"));
        assert!(load_error(r#"<MappingConfiguration xmlns:a="u1"><Namespace prefix="a" uri="u2"/></MappingConfiguration>"#)
            .contains("Duplicate namespace prefix"));
        assert!(load_error(r#"<MappingConfiguration><Frobnicate/></MappingConfiguration>"#)
            .contains("Unexpected element Frobnicate"));
        assert!(load_error(r#"<Other/>"#).contains("Expected root element"));
        assert!(load_error(
            r#"<MappingConfiguration><MappingList mappingRoot="r"/></MappingConfiguration>"#
        )
        .contains("Missing required attribute \"name\""));
        assert!(load_error(
            r#"<MappingConfiguration><MappingList name="o"><Mapping xPath="a" minValues="4" maxValues="2"/></MappingList></MappingConfiguration>"#
        )
        .contains("exceeds maximum"));
        assert!(load_error(
            r#"<MappingConfiguration><MappingList name="o"><Mapping name="a" xPath="a"/><Mapping name="a" xPath="b"/></MappingList></MappingConfiguration>"#
        )
        .contains("Duplicate mapping name"));
        assert!(load_error(
            r#"<MappingConfiguration><MappingList name="o" group="x"/></MappingConfiguration>"#
        )
        .contains("Invalid value \"x\""));
        assert!(load_error(
            r#"<MappingConfiguration><MappingList name="o"><Mapping xPath="u:a"/></MappingList></MappingConfiguration>"#
        )
        .contains("Undeclared namespace prefix 'u'"));
    }

    #[test]
    fn test_full_xpath_expressions_load() {
        let config = load_str(
            r#"<MappingConfiguration>
  <MappingList name="o" mappingRoot="line[@qty * 2 > 3]">
    <Mapping name="next" xPath="1 + @n"/>
    <Mapping name="neg" xPath="-1"/>
    <Mapping name="total" xPath="sum(part/@qty)"/>
    <Mapping name="code" xPath="translate(@code, 'abc', 'ABC')"/>
  </MappingList>
</MappingConfiguration>"#,
            "exprs.xml",
        )
        .unwrap();
        let o = config.tree.root_named("o").unwrap();
        assert_eq!(config.tree.children(o).len(), 4);
        assert!(load_error(
            r#"<MappingConfiguration><MappingList name="o"><Mapping name="a" xPath="frobnicate(a)"/></MappingList></MappingConfiguration>"#
        )
        .contains("frobnicate"));
    }

    #[test]
    fn test_malformed_document_is_a_syntax_error() {
        let err = load_str("<MappingConfiguration>", "broken.xml").unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { .. }));
    }

    #[test]
    fn test_load_files_merges_outputs() {
        let mut first = tempfile::NamedTempFile::new().unwrap();
        write!(
            first,
            r#"<MappingConfiguration><MappingList name="a" mappingRoot="x"><Mapping name="v" xPath="."/></MappingList></MappingConfiguration>"#
        )
        .unwrap();
        let mut second = tempfile::NamedTempFile::new().unwrap();
        write!(
            second,
            r#"<MappingConfiguration behaviour="greedy"><MappingList name="b" mappingRoot="y"><Mapping name="v" xPath="."/></MappingList></MappingConfiguration>"#
        )
        .unwrap();

        let config = load_files(&[first.path(), second.path()]).unwrap();
        assert_eq!(config.outputs().len(), 2);
        let b = config.tree.root_named("b").unwrap();
        // Behaviour was resolved per file before merging
        assert_eq!(config.tree[b].common().behaviour, MultiValueBehaviour::Greedy);
        let a = config.tree.root_named("a").unwrap();
        assert_eq!(config.tree[a].common().behaviour, MultiValueBehaviour::Lazy);

        let dup = load_files(&[first.path(), first.path()]).unwrap_err();
        assert!(matches!(dup, ConfigError::DuplicateOutput(_)));
    }
}

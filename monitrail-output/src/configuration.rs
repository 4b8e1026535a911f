//! GrandOutput configuration document
//!
//! ```xml
//! <GrandOutputConfiguration AppDomainDefaultFilter="Release">
//!   <SourceOverrideFilter ApplyMode="ClearThenApply">
//!     <Add File="src/db.rs" Filter="Debug" />
//!     <Remove File="src/noisy.rs" />
//!   </SourceOverrideFilter>
//!   <Channel>
//!     <Add Type="Console" Name="console" />
//!     <Channel Name="Sql" TopicFilter="*sql*">
//!       <Add Type="TextFile" Name="sql-file" Path="logs/sql.jsonl" />
//!     </Channel>
//!   </Channel>
//! </GrandOutputConfiguration>
//! ```

use crate::handlers::{HandlerError, HandlerRegistry};
use monitrail_route::{
    ActionConfiguration, HandlerConfiguration, MatchOptions, MetaConfiguration, RouteConfiguration,
    RouteError, SubRouteConfiguration, TopicPredicate,
};
use monitrail_schema::{LogFilter, SourceFilterApplyMode};
use ahash::AHashMap;
use roxmltree::{Document, Node};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("{message} (line {line})")]
    Grammar { message: String, line: u32 },

    #[error("Unable to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Unknown handler type '{type_name}' (line {line})")]
    UnknownHandlerType { type_name: String, line: u32 },

    #[error("GrandOutput is disposed")]
    Disposed,
}

/// Receives configuration errors
pub trait ConfigErrorSink {
    fn report(&mut self, error: &ConfigurationError);
}

impl ConfigErrorSink for Vec<String> {
    fn report(&mut self, error: &ConfigurationError) {
        self.push(error.to_string());
    }
}

/// Reports errors as `tracing` warnings
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ConfigErrorSink for TracingSink {
    fn report(&mut self, error: &ConfigurationError) {
        warn!(error = %error, "Configuration error");
    }
}

/// Adapts a closure into a [`ConfigErrorSink`]
pub struct FnSink<F>(pub F);

impl<F: FnMut(&ConfigurationError)> ConfigErrorSink for FnSink<F> {
    fn report(&mut self, error: &ConfigurationError) {
        (self.0)(error)
    }
}

/// Channels, default filter and source file filters of a GrandOutput
#[derive(Debug, Clone, PartialEq)]
pub struct GrandOutputConfiguration {
    route: RouteConfiguration,
    source_filters: AHashMap<String, LogFilter>,
    apply_mode: SourceFilterApplyMode,
    default_filter: Option<LogFilter>,
}

impl Default for GrandOutputConfiguration {
    fn default() -> Self {
        Self {
            route: RouteConfiguration::new("Root"),
            source_filters: AHashMap::new(),
            apply_mode: SourceFilterApplyMode::None,
            default_filter: None,
        }
    }
}

impl GrandOutputConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration around an existing route tree
    pub fn from_route(route: RouteConfiguration) -> Self {
        Self {
            route,
            ..Default::default()
        }
    }

    pub fn route(&self) -> &RouteConfiguration {
        &self.route
    }

    pub fn source_filters(&self) -> &AHashMap<String, LogFilter> {
        &self.source_filters
    }

    pub fn apply_mode(&self) -> SourceFilterApplyMode {
        self.apply_mode
    }

    /// Filter set on the monitoring context when this configuration is applied
    pub fn default_filter(&self) -> Option<LogFilter> {
        self.default_filter
    }

    pub fn with_default_filter(mut self, filter: LogFilter) -> Self {
        self.default_filter = Some(filter);
        self
    }

    pub fn with_source_filters(mut self, filters: AHashMap<String, LogFilter>, mode: SourceFilterApplyMode) -> Self {
        self.source_filters = filters;
        self.apply_mode = mode;
        self
    }

    /// Load from an XML document
    ///
    /// Returns false and reports to `sink` when the document is invalid; this
    /// configuration is then left unchanged.
    pub fn load(&mut self, xml: &str, registry: &HandlerRegistry, sink: &mut dyn ConfigErrorSink) -> bool {
        match Self::parse(xml, registry) {
            Ok(parsed) => {
                *self = parsed;
                debug!(
                    source_filters = self.source_filters.len(),
                    apply_mode = ?self.apply_mode,
                    "Configuration loaded"
                );
                true
            }
            Err(e) => {
                sink.report(&e);
                false
            }
        }
    }

    /// Load from an XML file; see [`load`](Self::load)
    pub fn load_from_file(
        &mut self,
        path: impl AsRef<Path>,
        registry: &HandlerRegistry,
        sink: &mut dyn ConfigErrorSink,
    ) -> bool {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(xml) => self.load(&xml, registry, sink),
            Err(source) => {
                sink.report(&ConfigurationError::Io {
                    path: path.display().to_string(),
                    source,
                });
                false
            }
        }
    }

    /// Parse a document into a new configuration
    pub fn parse(xml: &str, registry: &HandlerRegistry) -> Result<Self, ConfigurationError> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();
        if root.tag_name().name() != "GrandOutputConfiguration" {
            return Err(grammar(root, "Element name must be <GrandOutputConfiguration>"));
        }
        let default_filter = root
            .attribute("AppDomainDefaultFilter")
            .map(|v| parse_filter(root, "AppDomainDefaultFilter", v))
            .transpose()?;

        let (source_filters, apply_mode) = match child_element(root, "SourceOverrideFilter") {
            Some(node) => read_source_filters(node)?,
            None => (AHashMap::new(), SourceFilterApplyMode::None),
        };

        let channel = child_element(root, "Channel").ok_or_else(|| grammar(root, "Missing <Channel /> element"))?;
        let reader = RouteReader { registry };
        let mut route = RouteConfiguration::new(channel.attribute("Name").unwrap_or("Root"));
        reader.fill_route(channel, &mut route)?;

        Ok(Self {
            route,
            source_filters,
            apply_mode,
            default_filter,
        })
    }
}

fn line_of(node: Node<'_, '_>) -> u32 {
    node.document().text_pos_at(node.range().start).row
}

fn grammar(node: Node<'_, '_>, message: impl Into<String>) -> ConfigurationError {
    ConfigurationError::Grammar {
        message: message.into(),
        line: line_of(node),
    }
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    elements(node).find(|n| n.tag_name().name() == name)
}

fn required<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str, ConfigurationError> {
    node.attribute(name).ok_or_else(|| {
        grammar(
            node,
            format!("Missing required attribute '{}' on <{}>", name, node.tag_name().name()),
        )
    })
}

fn parse_filter(node: Node<'_, '_>, attribute: &str, value: &str) -> Result<LogFilter, ConfigurationError> {
    value
        .parse()
        .map_err(|e| grammar(node, format!("Attribute '{}': {}", attribute, e)))
}

fn parse_bool(node: Node<'_, '_>, attribute: &str, default: bool) -> Result<bool, ConfigurationError> {
    match node.attribute(attribute).map(str::trim) {
        None => Ok(default),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(v) => Err(grammar(
            node,
            format!("Attribute '{}' must be true or false, not '{}'", attribute, v),
        )),
    }
}

fn read_source_filters(
    node: Node<'_, '_>,
) -> Result<(AHashMap<String, LogFilter>, SourceFilterApplyMode), ConfigurationError> {
    let apply_mode = match node.attribute("ApplyMode") {
        Some(v) => v.parse().map_err(|e| grammar(node, format!("Attribute 'ApplyMode': {}", e)))?,
        None => SourceFilterApplyMode::Apply,
    };
    let mut filters = AHashMap::new();
    for entry in elements(node) {
        let filter = match entry.tag_name().name() {
            "Add" => parse_filter(entry, "Filter", required(entry, "Filter")?)?,
            "Remove" => LogFilter::UNDEFINED,
            _ => {
                return Err(grammar(
                    entry,
                    "SourceOverrideFilter element must contain only Add and Remove elements",
                ))
            }
        };
        let file = required(entry, "File")?;
        if !file.trim().is_empty() {
            filters.insert(file.to_string(), filter);
        }
    }
    debug!(files = filters.len(), apply_mode = ?apply_mode, "Source override filters read");
    Ok((filters, apply_mode))
}

struct RouteReader<'r> {
    registry: &'r HandlerRegistry,
}

impl RouteReader<'_> {
    fn fill_route(&self, channel: Node<'_, '_>, route: &mut RouteConfiguration) -> Result<(), ConfigurationError> {
        if let Some(namespace) = channel.attribute("Namespace") {
            route.namespace = namespace.to_string();
        }
        for e in elements(channel) {
            let meta = match e.tag_name().name() {
                "Channel" => MetaConfiguration::DeclareRoute(self.read_sub_route(e)?),
                "Add" | "Sequence" | "Parallel" => MetaConfiguration::AddAction(self.read_action(e)?),
                "DeclareAction" => MetaConfiguration::DeclareAction {
                    actions: elements(e).map(|a| self.read_action(a)).collect::<Result<_, _>>()?,
                    overridden: parse_bool(e, "Override", false)?,
                },
                "UseAction" => MetaConfiguration::UseDeclaredAction(required(e, "Name")?.to_string()),
                "RemoveAction" => MetaConfiguration::RemoveAction(required(e, "Name")?.to_string()),
                other => {
                    return Err(grammar(
                        e,
                        format!(
                            "Unexpected element <{}>: expected <Add>, <Parallel>, <Sequence>, <Channel>, \
                             <DeclareAction>, <UseAction> or <RemoveAction>",
                            other
                        ),
                    ))
                }
            };
            route.push(meta);
        }
        Ok(())
    }

    fn read_sub_route(&self, channel: Node<'_, '_>) -> Result<SubRouteConfiguration, ConfigurationError> {
        let name = required(channel, "Name")?;
        let options = match channel.attribute("MatchOptions").map(str::trim) {
            Some(v) if !v.is_empty() => v.parse::<MatchOptions>().map_err(|e| grammar(channel, e.to_string()))?,
            _ => MatchOptions::default(),
        };
        let predicate = match (channel.attribute("TopicFilter"), channel.attribute("TopicRegex")) {
            (Some(filter), None) => TopicPredicate::wildcard(filter, options),
            (None, Some(regex)) => TopicPredicate::regex(regex, options),
            _ => {
                return Err(grammar(
                    channel,
                    "Subordinated Channel must define one TopicFilter or TopicRegex attribute (and not both)",
                ))
            }
        }
        .map_err(|e| grammar(channel, e.to_string()))?;

        let mut route = RouteConfiguration::new(name);
        self.fill_route(channel, &mut route)?;
        Ok(SubRouteConfiguration::new(route, predicate)
            .import_parent_actions(parse_bool(channel, "ImportParentActions", false)?)
            .import_parent_declared_actions_above(parse_bool(channel, "ImportParentDeclaredActionsAbove", true)?))
    }

    fn read_action(&self, e: Node<'_, '_>) -> Result<ActionConfiguration, ConfigurationError> {
        match e.tag_name().name() {
            "Add" => {
                let type_name = required(e, "Type")?;
                if !self.registry.contains(type_name) {
                    return Err(ConfigurationError::UnknownHandlerType {
                        type_name: type_name.to_string(),
                        line: line_of(e),
                    });
                }
                let mut config = HandlerConfiguration::new(type_name, required(e, "Name")?);
                for attr in e.attributes() {
                    if attr.name() != "Type" && attr.name() != "Name" {
                        config = config.with_attribute(attr.name(), attr.value());
                    }
                }
                Ok(ActionConfiguration::Add(config))
            }
            kind @ ("Sequence" | "Parallel") => {
                let name = required(e, "Name")?;
                let children = elements(e).map(|c| self.read_action(c)).collect::<Result<Vec<_>, _>>()?;
                Ok(if kind == "Sequence" {
                    ActionConfiguration::sequence(name, children)
                } else {
                    ActionConfiguration::parallel(name, children)
                })
            }
            other => Err(grammar(
                e,
                format!("Unknown element <{}>: only <Add>, <Parallel> or <Sequence>", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitrail_route::RouteResolver;

    const SAMPLE: &str = r#"
<GrandOutputConfiguration AppDomainDefaultFilter="Release">
  <SourceOverrideFilter ApplyMode="ClearThenApply">
    <Add File="src/db.rs" Filter="Debug" />
    <Remove File="src/noisy.rs" />
    <Add File="  " Filter="Off" />
  </SourceOverrideFilter>
  <Channel>
    <Add Type="Console" Name="console" Format="Json" />
    <Channel Name="Sql" TopicFilter="*sql*">
      <Sequence Name="seq">
        <Add Type="ConsoleConfiguration" Name="inner" />
      </Sequence>
    </Channel>
  </Channel>
</GrandOutputConfiguration>"#;

    fn load(xml: &str) -> (GrandOutputConfiguration, bool, Vec<String>) {
        let mut config = GrandOutputConfiguration::new();
        let mut errors = Vec::new();
        let ok = config.load(xml, &HandlerRegistry::with_builtins(), &mut errors);
        (config, ok, errors)
    }

    #[test]
    fn test_load_sample() {
        let (config, ok, errors) = load(SAMPLE);
        assert!(ok, "{:?}", errors);
        assert_eq!(config.default_filter(), Some(LogFilter::RELEASE));
        assert_eq!(config.apply_mode(), SourceFilterApplyMode::ClearThenApply);
        assert_eq!(config.source_filters().len(), 2);
        assert_eq!(config.source_filters()["src/noisy.rs"], LogFilter::UNDEFINED);

        let resolved = RouteResolver::resolve(config.route()).unwrap();
        let names: Vec<_> = resolved.collect_actions("my SQL query").iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names, vec!["console", "seq"]);
        match resolved.actions()[0].as_ref() {
            ActionConfiguration::Add(h) => assert_eq!(h.attribute("Format"), Some("Json")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_source_override_means_none() {
        let (config, ok, _) = load(r#"<GrandOutputConfiguration><Channel /></GrandOutputConfiguration>"#);
        assert!(ok);
        assert_eq!(config.apply_mode(), SourceFilterApplyMode::None);
        assert_eq!(config.default_filter(), None);
    }

    #[test]
    fn test_failed_load_keeps_previous_values() {
        let mut config = GrandOutputConfiguration::new();
        let registry = HandlerRegistry::with_builtins();
        let mut errors = Vec::new();
        assert!(config.load(SAMPLE, &registry, &mut errors));
        let before = config.clone();

        assert!(!config.load("<Nope />", &registry, &mut errors));
        assert_eq!(config, before);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("GrandOutputConfiguration"));
    }

    #[test]
    fn test_grammar_errors() {
        let cases = [
            r#"<GrandOutputConfiguration />"#,
            r#"<GrandOutputConfiguration><Channel><Bogus /></Channel></GrandOutputConfiguration>"#,
            r#"<GrandOutputConfiguration><Channel><Channel Name="A" /></Channel></GrandOutputConfiguration>"#,
            r#"<GrandOutputConfiguration><Channel><Channel Name="A" TopicFilter="a" TopicRegex="b" /></Channel></GrandOutputConfiguration>"#,
            r#"<GrandOutputConfiguration><Channel><Channel TopicFilter="a" /></Channel></GrandOutputConfiguration>"#,
            r#"<GrandOutputConfiguration><Channel><Add Name="x" /></Channel></GrandOutputConfiguration>"#,
            r#"<GrandOutputConfiguration><Channel><Channel Name="A" TopicRegex="(" /></Channel></GrandOutputConfiguration>"#,
            r#"<GrandOutputConfiguration><Channel><Channel Name="A" TopicFilter="a" MatchOptions="Compiled" /></Channel></GrandOutputConfiguration>"#,
            r#"<GrandOutputConfiguration><SourceOverrideFilter><Set File="a" /></SourceOverrideFilter><Channel /></GrandOutputConfiguration>"#,
            r#"<GrandOutputConfiguration AppDomainDefaultFilter="Loud"><Channel /></GrandOutputConfiguration>"#,
            r#"<GrandOutputConfiguration><Channel"#,
        ];
        for xml in cases {
            let (_, ok, errors) = load(xml);
            assert!(!ok, "accepted: {}", xml);
            assert_eq!(errors.len(), 1, "{}", xml);
        }
    }

    #[test]
    fn test_unknown_handler_type() {
        let xml = "<GrandOutputConfiguration>\n<Channel>\n<Add Type=\"Kafka\" Name=\"k\" />\n</Channel>\n</GrandOutputConfiguration>";
        let err = GrandOutputConfiguration::parse(xml, &HandlerRegistry::with_builtins()).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::UnknownHandlerType { ref type_name, line: 3 } if type_name == "Kafka"
        ));
    }

    #[test]
    fn test_declared_actions_and_options() {
        let xml = r#"
<GrandOutputConfiguration>
  <Channel Namespace="App.">
    <DeclareAction>
      <Add Type="Console" Name="shared" />
    </DeclareAction>
    <Channel Name="Db" TopicRegex="^db" MatchOptions="None" ImportParentDeclaredActionsAbove="true">
      <UseAction Name="shared" />
    </Channel>
    <Add Type="Console" Name="main" />
    <RemoveAction Name="main" />
  </Channel>
</GrandOutputConfiguration>"#;
        let (config, ok, errors) = load(xml);
        assert!(ok, "{:?}", errors);
        let resolved = RouteResolver::resolve(config.route()).unwrap();
        assert_eq!(resolved.matching_routes("db.read"), vec!["App.Root", "App.Db"]);
        assert!(resolved.collect_actions("DB.read").is_empty());
        let names: Vec<_> = resolved.collect_actions("db.read").iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names, vec!["shared"]);
    }

    #[test]
    fn test_fn_sink() {
        let mut seen = 0;
        let mut config = GrandOutputConfiguration::new();
        let ok = config.load("not xml", &HandlerRegistry::with_builtins(), &mut FnSink(|_: &ConfigurationError| seen += 1));
        assert!(!ok);
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_load_from_missing_file() {
        let mut errors = Vec::new();
        let ok = GrandOutputConfiguration::new().load_from_file(
            "/nonexistent/monitrail.xml",
            &HandlerRegistry::with_builtins(),
            &mut errors,
        );
        assert!(!ok);
        assert!(errors[0].contains("/nonexistent/monitrail.xml"));
    }
}

//! Component Registry
//!
//! Maps `(kind, type name)` pairs to factories so that flows can be wired
//! from configuration strings. The registry is an explicit table built at
//! construction — no module scanning, no global state — and it is owned by
//! whoever builds the runtime, so embedders can override or extend the
//! built-in set before any flow is created.
//!
//! Resolution failure is a [`RegistryError`] naming the kind and the unknown
//! identifier; construction failures from the factory itself (bad options)
//! propagate unchanged.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use super::{Filter, InputDriver, Options, Output, OutputFormat, Parser};
use crate::components::filter::FieldFilter;
use crate::components::format::{JsonFormat, TextFormat};
use crate::components::input::{FileInput, MemoryInput, TcpInput};
use crate::components::output::{FileOutput, MemoryOutput, StdoutOutput, TcpOutput};
use crate::components::parser::{JsonParser, Rfc3164Parser, TextParser};

pub type InputFactory = Box<dyn Fn(&Options) -> anyhow::Result<Box<dyn InputDriver>> + Send + Sync>;
pub type ParserFactory = Box<dyn Fn(&Options) -> anyhow::Result<Box<dyn Parser>> + Send + Sync>;
pub type FilterFactory = Box<dyn Fn(&Options) -> anyhow::Result<Box<dyn Filter>> + Send + Sync>;
pub type OutputFactory = Box<dyn Fn(&Options) -> anyhow::Result<Box<dyn Output>> + Send + Sync>;
pub type FormatFactory =
    Box<dyn Fn(&Options) -> anyhow::Result<Box<dyn OutputFormat>> + Send + Sync>;

/// The five component roles a registry resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    Input,
    Parser,
    Filter,
    Output,
    Format,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComponentKind::Input => "input",
            ComponentKind::Parser => "parser",
            ComponentKind::Filter => "filter",
            ComponentKind::Output => "output",
            ComponentKind::Format => "format",
        })
    }
}

/// Lookup failure: the configuration named a component type nobody
/// registered.
#[derive(Debug, Error)]
#[error("unknown {kind} type '{name}'")]
pub struct RegistryError {
    pub kind: ComponentKind,
    pub name: String,
}

/// Factory table for all component kinds.
pub struct ComponentRegistry {
    inputs: HashMap<String, InputFactory>,
    parsers: HashMap<String, ParserFactory>,
    filters: HashMap<String, FilterFactory>,
    outputs: HashMap<String, OutputFactory>,
    formats: HashMap<String, FormatFactory>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry {
    /// A registry with every built-in component installed.
    pub fn new() -> Self {
        let mut registry = Self {
            inputs: HashMap::new(),
            parsers: HashMap::new(),
            filters: HashMap::new(),
            outputs: HashMap::new(),
            formats: HashMap::new(),
        };
        registry.register_builtins();
        registry
    }

    pub fn register_input(&mut self, name: &str, factory: InputFactory) {
        self.inputs.insert(name.to_string(), factory);
    }

    pub fn register_parser(&mut self, name: &str, factory: ParserFactory) {
        self.parsers.insert(name.to_string(), factory);
    }

    pub fn register_filter(&mut self, name: &str, factory: FilterFactory) {
        self.filters.insert(name.to_string(), factory);
    }

    pub fn register_output(&mut self, name: &str, factory: OutputFactory) {
        self.outputs.insert(name.to_string(), factory);
    }

    pub fn register_format(&mut self, name: &str, factory: FormatFactory) {
        self.formats.insert(name.to_string(), factory);
    }

    pub fn create_input(
        &self,
        type_name: &str,
        options: &Options,
    ) -> anyhow::Result<Box<dyn InputDriver>> {
        let factory = self
            .inputs
            .get(type_name)
            .ok_or_else(|| unknown(ComponentKind::Input, type_name))?;
        factory(options)
    }

    pub fn create_parser(
        &self,
        type_name: &str,
        options: &Options,
    ) -> anyhow::Result<Box<dyn Parser>> {
        let factory = self
            .parsers
            .get(type_name)
            .ok_or_else(|| unknown(ComponentKind::Parser, type_name))?;
        factory(options)
    }

    pub fn create_filter(
        &self,
        type_name: &str,
        options: &Options,
    ) -> anyhow::Result<Box<dyn Filter>> {
        let factory = self
            .filters
            .get(type_name)
            .ok_or_else(|| unknown(ComponentKind::Filter, type_name))?;
        factory(options)
    }

    pub fn create_output(
        &self,
        type_name: &str,
        options: &Options,
    ) -> anyhow::Result<Box<dyn Output>> {
        let factory = self
            .outputs
            .get(type_name)
            .ok_or_else(|| unknown(ComponentKind::Output, type_name))?;
        factory(options)
    }

    pub fn create_format(
        &self,
        type_name: &str,
        options: &Options,
    ) -> anyhow::Result<Box<dyn OutputFormat>> {
        let factory = self
            .formats
            .get(type_name)
            .ok_or_else(|| unknown(ComponentKind::Format, type_name))?;
        factory(options)
    }

    /// Registered type names per kind, sorted — used by the CLI's
    /// `--list-components` flag.
    pub fn catalog(&self) -> Vec<(ComponentKind, Vec<String>)> {
        fn names<V>(map: &HashMap<String, V>) -> Vec<String> {
            let mut names: Vec<String> = map.keys().cloned().collect();
            names.sort();
            names
        }

        vec![
            (ComponentKind::Input, names(&self.inputs)),
            (ComponentKind::Parser, names(&self.parsers)),
            (ComponentKind::Filter, names(&self.filters)),
            (ComponentKind::Output, names(&self.outputs)),
            (ComponentKind::Format, names(&self.formats)),
        ]
    }

    fn register_builtins(&mut self) {
        self.register_input(
            "memory",
            Box::new(|options| Ok(Box::new(MemoryInput::from_options(options)?))),
        );
        self.register_input(
            "file",
            Box::new(|options| Ok(Box::new(FileInput::from_options(options)?))),
        );
        self.register_input(
            "tcp",
            Box::new(|options| Ok(Box::new(TcpInput::from_options(options)?))),
        );

        self.register_parser(
            "json",
            Box::new(|options| Ok(Box::new(JsonParser::from_options(options)?))),
        );
        self.register_parser(
            "text",
            Box::new(|options| Ok(Box::new(TextParser::from_options(options)?))),
        );
        self.register_parser(
            "rfc3164",
            Box::new(|options| Ok(Box::new(Rfc3164Parser::from_options(options)?))),
        );

        self.register_filter(
            "field",
            Box::new(|options| Ok(Box::new(FieldFilter::from_options(options)?))),
        );

        self.register_output(
            "memory",
            Box::new(|options| Ok(Box::new(MemoryOutput::from_options(options)?))),
        );
        self.register_output(
            "stdout",
            Box::new(|options| Ok(Box::new(StdoutOutput::from_options(options)?))),
        );
        self.register_output(
            "file",
            Box::new(|options| Ok(Box::new(FileOutput::from_options(options)?))),
        );
        self.register_output(
            "tcp",
            Box::new(|options| Ok(Box::new(TcpOutput::from_options(options)?))),
        );

        self.register_format(
            "json",
            Box::new(|options| Ok(Box::new(JsonFormat::from_options(options)?))),
        );
        self.register_format(
            "text",
            Box::new(|options| Ok(Box::new(TextFormat::from_options(options)?))),
        );
    }
}

fn unknown(kind: ComponentKind, name: &str) -> anyhow::Error {
    RegistryError {
        kind,
        name: name.to_string(),
    }
    .into()
}

//! Declarative schema of the provider protocol
//!
//! Binding generators for other languages consume this document. It must stay
//! closed (every reference names a declared type) and deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const NAMESPACE: &str = "fleetform.providers";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    Unit,
    Bool,
    Byte,
    Int,
    String,
    Duration,
    PropertyValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeReference {
    Primitive(PrimitiveType),
    Array(Box<TypeReference>),
    Map(Box<TypeReference>),
    Ref(String),
}

impl TypeReference {
    fn collect_refs<'a>(&'a self, refs: &mut Vec<&'a str>) {
        match self {
            TypeReference::Primitive(_) => {}
            TypeReference::Array(inner) | TypeReference::Map(inner) => inner.collect_refs(refs),
            TypeReference::Ref(name) => refs.push(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub type_ref: TypeReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub description: String,
    pub properties: Vec<Property>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationValue {
    pub name: String,
    pub description: String,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enumeration {
    pub name: String,
    pub description: String,
    pub values: Vec<EnumerationValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_ref: TypeReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    pub description: String,
    pub parameters: Vec<Parameter>,
    pub return_type: TypeReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub description: String,
    pub methods: Vec<Method>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeDeclaration {
    Enumeration(Enumeration),
    Record(Record),
    Interface(Interface),
}

impl TypeDeclaration {
    pub fn name(&self) -> &str {
        match self {
            TypeDeclaration::Enumeration(e) => &e.name,
            TypeDeclaration::Record(r) => &r.name,
            TypeDeclaration::Interface(i) => &i.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSchema {
    pub namespace: String,
    pub version: String,
    pub declarations: Vec<TypeDeclaration>,
}

impl ProtocolSchema {
    pub fn find(&self, name: &str) -> Option<&TypeDeclaration> {
        self.declarations.iter().find(|d| d.name() == name)
    }

    /// References that do not name a declared type
    pub fn undeclared_references(&self) -> BTreeSet<String> {
        let declared: BTreeSet<&str> = self.declarations.iter().map(|d| d.name()).collect();
        let mut refs = Vec::new();
        for declaration in &self.declarations {
            match declaration {
                TypeDeclaration::Enumeration(_) => {}
                TypeDeclaration::Record(record) => {
                    for property in &record.properties {
                        property.type_ref.collect_refs(&mut refs);
                    }
                }
                TypeDeclaration::Interface(interface) => {
                    for method in &interface.methods {
                        method.return_type.collect_refs(&mut refs);
                        for parameter in &method.parameters {
                            parameter.type_ref.collect_refs(&mut refs);
                        }
                    }
                }
            }
        }
        refs.into_iter()
            .filter(|r| !declared.contains(r))
            .map(str::to_string)
            .collect()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn qualified(name: &str) -> String {
    format!("{}.{}", NAMESPACE, name)
}

fn unit() -> TypeReference {
    TypeReference::Primitive(PrimitiveType::Unit)
}

fn boolean() -> TypeReference {
    TypeReference::Primitive(PrimitiveType::Bool)
}

fn string() -> TypeReference {
    TypeReference::Primitive(PrimitiveType::String)
}

fn duration() -> TypeReference {
    TypeReference::Primitive(PrimitiveType::Duration)
}

fn property_map() -> TypeReference {
    TypeReference::Map(Box::new(TypeReference::Primitive(PrimitiveType::PropertyValue)))
}

fn array(inner: TypeReference) -> TypeReference {
    TypeReference::Array(Box::new(inner))
}

fn reference(name: &str) -> TypeReference {
    TypeReference::Ref(qualified(name))
}

fn prop(name: &str, description: &str, type_ref: TypeReference) -> Property {
    Property {
        name: name.to_string(),
        description: description.to_string(),
        type_ref,
    }
}

fn record(name: &str, description: &str, properties: Vec<Property>) -> TypeDeclaration {
    TypeDeclaration::Record(Record {
        name: qualified(name),
        description: description.to_string(),
        properties,
    })
}

/// Identity properties shared by every resource-scoped request
fn identity(with_id: bool) -> Vec<Property> {
    let mut properties = Vec::new();
    if with_id {
        properties.push(prop("id", "The provider-assigned ID of the resource.", string()));
    }
    properties.push(prop("urn", "The URN of the resource.", string()));
    properties.push(prop("type", "The type token of the resource.", string()));
    properties.push(prop("name", "The name of the resource.", string()));
    properties
}

fn method(name: &str, description: &str, request: Option<&str>, response: TypeReference) -> Method {
    Method {
        name: name.to_string(),
        description: description.to_string(),
        parameters: request
            .map(|r| {
                vec![Parameter {
                    name: "request".to_string(),
                    type_ref: reference(r),
                }]
            })
            .unwrap_or_default(),
        return_type: response,
    }
}

/// The provider protocol as a declarative schema
pub fn core_schema() -> ProtocolSchema {
    let severities = [
        ("debug", "A debug-level message not displayed to end users."),
        ("info", "An informational message printed during resource operations."),
        ("warning", "Something went wrong, but the operation continues."),
        ("error", "A fatal error for the current resource operation."),
    ];
    let log_severity = TypeDeclaration::Enumeration(Enumeration {
        name: qualified("log_severity"),
        description: "Severity of a log message. Errors are fatal; all others are informational."
            .to_string(),
        values: severities
            .iter()
            .enumerate()
            .map(|(i, (name, description))| EnumerationValue {
                name: name.to_string(),
                description: description.to_string(),
                value: i as i32,
            })
            .collect(),
    });

    let log_message = record(
        "log_message",
        "A log message sent by a provider to the engine.",
        vec![
            prop("severity", "The logging level of this message.", reference("log_severity")),
            prop("message", "The contents of the message.", string()),
            prop("urn", "The resource this message is about, if any.", string()),
            prop(
                "stream_id",
                "Groups chunks of one logical message; 0 means no stream.",
                TypeReference::Primitive(PrimitiveType::Int),
            ),
            prop("ephemeral", "Whether this is a transient status message.", boolean()),
        ],
    );

    let host = TypeDeclaration::Interface(Interface {
        name: qualified("host"),
        description: "The engine host running a provider.".to_string(),
        methods: vec![Method {
            name: "log".to_string(),
            description: "Send a log message to the host.".to_string(),
            parameters: vec![Parameter {
                name: "message".to_string(),
                type_ref: reference("log_message"),
            }],
            return_type: unit(),
        }],
    });

    let mut check_request = identity(false);
    check_request.extend([
        prop("olds", "The inputs of the last successful check, if any.", property_map()),
        prop("news", "The desired inputs.", property_map()),
        prop(
            "random_seed",
            "Random bytes for generating unique names.",
            array(TypeReference::Primitive(PrimitiveType::Byte)),
        ),
    ]);

    let mut diff_request = identity(true);
    diff_request.extend([
        prop("olds", "The current inputs.", property_map()),
        prop("news", "The desired inputs.", property_map()),
        prop(
            "ignore_changes",
            "Property paths treated as unchanged.",
            array(string()),
        ),
    ]);

    let mut create_request = identity(false);
    create_request.extend([
        prop("properties", "The checked inputs.", property_map()),
        prop("timeout", "How long the engine waits for the call.", duration()),
        prop("preview", "When set, no real infrastructure may change.", boolean()),
    ]);

    let mut read_request = identity(true);
    read_request.extend([
        prop("properties", "The current state of the resource.", property_map()),
        prop("inputs", "The current inputs, if known.", property_map()),
    ]);

    let mut update_request = identity(true);
    update_request.extend([
        prop("olds", "The current outputs.", property_map()),
        prop("news", "The checked desired inputs.", property_map()),
        prop("timeout", "How long the engine waits for the call.", duration()),
        prop(
            "ignore_changes",
            "Property paths treated as unchanged.",
            array(string()),
        ),
        prop("preview", "When set, no real infrastructure may change.", boolean()),
    ]);

    let provider = TypeDeclaration::Interface(Interface {
        name: qualified("provider"),
        description: "A resource provider plugin.".to_string(),
        methods: vec![
            method(
                "check_config",
                "Validate the provider configuration.",
                Some("check_request"),
                reference("check_response"),
            ),
            method(
                "diff_config",
                "Classify the impact of a configuration change.",
                Some("diff_request"),
                reference("diff_response"),
            ),
            method(
                "configure",
                "Configure the provider with its settings.",
                Some("configure_request"),
                unit(),
            ),
            method(
                "check",
                "Validate resource inputs.",
                Some("check_request"),
                reference("check_response"),
            ),
            method(
                "diff",
                "Classify the impact of an input change.",
                Some("diff_request"),
                reference("diff_response"),
            ),
            method(
                "create",
                "Allocate a new resource.",
                Some("create_request"),
                reference("create_response"),
            ),
            method(
                "read",
                "Read the live state of a resource.",
                Some("read_request"),
                reference("read_response"),
            ),
            method(
                "update",
                "Update a resource in place.",
                Some("update_request"),
                reference("update_response"),
            ),
            method("delete", "Tear down a resource.", Some("delete_request"), unit()),
        ],
    });

    ProtocolSchema {
        namespace: NAMESPACE.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        declarations: vec![
            log_severity,
            log_message,
            host,
            record("check_request", "A request to validate inputs.", check_request),
            record(
                "check_failure",
                "A property that failed validation, and why.",
                vec![
                    prop("property", "The property that failed validation.", string()),
                    prop("reason", "Why the property failed validation.", string()),
                ],
            ),
            record(
                "check_response",
                "The result of validating inputs.",
                vec![
                    prop("inputs", "The inputs for later calls.", property_map()),
                    prop(
                        "failures",
                        "Validation failures; non-empty blocks mutation.",
                        array(reference("check_failure")),
                    ),
                ],
            ),
            record("diff_request", "A request to classify a change.", diff_request),
            TypeDeclaration::Enumeration(Enumeration {
                name: qualified("diff_classification"),
                description: "The impact of a change.".to_string(),
                values: vec![
                    EnumerationValue {
                        name: "no_change".to_string(),
                        description: "Nothing changed.".to_string(),
                        value: 0,
                    },
                    EnumerationValue {
                        name: "update".to_string(),
                        description: "The resource can be updated in place.".to_string(),
                        value: 1,
                    },
                    EnumerationValue {
                        name: "replace".to_string(),
                        description: "The resource must be replaced.".to_string(),
                        value: 2,
                    },
                ],
            }),
            record(
                "diff_response",
                "The classification of a change.",
                vec![
                    prop("classification", "The impact.", reference("diff_classification")),
                    prop("changed_keys", "Properties that changed.", array(string())),
                    prop("replace_keys", "Changed properties forcing replacement.", array(string())),
                    prop(
                        "delete_before_replace",
                        "Delete the old resource before creating the new one.",
                        boolean(),
                    ),
                ],
            ),
            record(
                "configure_request",
                "Provider-wide configuration.",
                vec![prop("variables", "Configuration values.", property_map())],
            ),
            record("create_request", "A request to allocate a resource.", create_request),
            record(
                "create_response",
                "The result of a create.",
                vec![
                    prop("id", "The provider-assigned ID; empty during preview.", string()),
                    prop("properties", "The outputs.", property_map()),
                ],
            ),
            record("read_request", "A request to read live state.", read_request),
            record(
                "read_response",
                "The live state; an empty id means the resource is gone.",
                vec![
                    prop("id", "The provider-assigned ID.", string()),
                    prop("properties", "The live outputs.", property_map()),
                    prop("inputs", "The inputs matching the live state.", property_map()),
                ],
            ),
            record("update_request", "A request to update a resource.", update_request),
            record(
                "update_response",
                "The result of an update.",
                vec![prop("properties", "The new outputs.", property_map())],
            ),
            record("delete_request", "A request to tear down a resource.", identity(true)),
            provider,
        ],
    }
}

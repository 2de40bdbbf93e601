//! # Schema Tree
//!
//! The navigable representation of a schema: one namespace node per source file, holding its
//! services, holding their methods. Only method nodes are selectable.
//!
//! Method IDs are fully qualified names (`package.Service.Method`). They are stable across
//! rebuilds of the same schema content, but a new [`super::SchemaSource`] may drop or rename
//! them, so every refresh must be treated as invalidating previously selected IDs.
use super::resolver::{CompiledFiles, ReflectedSchema, TypeResolver};
use super::source::Generation;
use super::{SchemaError, template};
use crate::BoxError;
use crate::reflection::client::ReflectionClient;
use http_body::Body as HttpBody;
use prost_reflect::MethodDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tonic::client::GrpcService;

/// A node of the tree as exposed to the presentation layer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SchemaNode {
    pub id: String,
    pub label: String,
    pub selectable: bool,
    pub children: Vec<SchemaNode>,
}

impl SchemaNode {
    fn branch(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            selectable: false,
            children: Vec::new(),
        }
    }

    fn leaf(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            selectable: true,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchemaTree {
    generation: Generation,
    resolver: Option<Arc<dyn TypeResolver>>,
    namespaces: Vec<SchemaNode>,
    methods: HashMap<String, MethodDescriptor>,
}

impl Default for SchemaTree {
    fn default() -> Self {
        Self::empty()
    }
}

impl SchemaTree {
    /// The tree of a project without any schema.
    pub fn empty() -> Self {
        Self {
            generation: Generation::NONE,
            resolver: None,
            namespaces: Vec::new(),
            methods: HashMap::new(),
        }
    }

    /// Indexes every service of `resolver`, grouping services by their declaring file.
    pub fn build(resolver: Arc<dyn TypeResolver>, generation: Generation) -> Self {
        let mut namespaces: Vec<SchemaNode> = Vec::new();
        let mut methods = HashMap::new();

        for service in resolver.services() {
            let mut service_node = SchemaNode::branch(service.full_name(), service.name());

            for method in service.methods() {
                let id = method_id(&method);
                service_node
                    .children
                    .push(SchemaNode::leaf(id.clone(), method.name()));
                methods.insert(id, method);
            }

            let file_name = service.parent_file().name().to_string();

            match namespaces.iter_mut().find(|ns| ns.id == file_name) {
                Some(namespace) => namespace.children.push(service_node),
                None => {
                    let mut namespace = SchemaNode::branch(file_name.clone(), file_name);
                    namespace.children.push(service_node);
                    namespaces.push(namespace);
                }
            }
        }

        Self {
            generation,
            resolver: Some(resolver),
            namespaces,
            methods,
        }
    }

    /// Compiles `entry_files` against `import_paths` and builds the tree.
    pub fn from_files(
        import_paths: &[PathBuf],
        entry_files: &[PathBuf],
        generation: Generation,
    ) -> Result<Self, SchemaError> {
        let compiled = CompiledFiles::compile(import_paths, entry_files)?;
        Ok(Self::build(Arc::new(compiled), generation))
    }

    /// Queries the reflection service reachable through `service` and builds the tree.
    pub async fn from_reflection<S>(
        service: S,
        address: &str,
        generation: Generation,
    ) -> Result<Self, SchemaError>
    where
        S: GrpcService<tonic::body::Body>,
        S::Error: Into<BoxError>,
        S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
        <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
    {
        let mut client = ReflectionClient::new(service);
        let reflected = ReflectedSchema::fetch(&mut client, address).await?;
        Ok(Self::build(Arc::new(reflected), generation))
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn resolver(&self) -> Option<&Arc<dyn TypeResolver>> {
        self.resolver.as_ref()
    }

    pub fn nodes(&self) -> &[SchemaNode] {
        &self.namespaces
    }

    pub fn method(&self, method_id: &str) -> Option<&MethodDescriptor> {
        self.methods.get(method_id)
    }

    pub fn contains_method(&self, method_id: &str) -> bool {
        self.methods.contains_key(method_id)
    }

    pub fn method_ids(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Synthesizes the zero-value request payload of a method.
    ///
    /// # Returns
    ///
    /// * `Ok(Value)` - An object whose keys follow the declaration order of the input type.
    /// * `Err(SchemaError::UnknownMethodId)` - The method is not part of this tree.
    pub fn template(&self, method_id: &str) -> Result<serde_json::Value, SchemaError> {
        let method = self
            .method(method_id)
            .ok_or_else(|| SchemaError::UnknownMethodId(method_id.to_string()))?;

        Ok(template::synthesize(&method.input()))
    }
}

fn method_id(method: &MethodDescriptor) -> String {
    format!("{}.{}", method.parent_service().full_name(), method.name())
}

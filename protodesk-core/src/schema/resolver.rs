//! # Type Resolvers
//!
//! A [`TypeResolver`] is the only thing the rest of the engine knows about a schema: it can list
//! the services it describes and resolve message types by their fully qualified name.
//!
//! There are two implementations:
//!
//! * [`CompiledFiles`]: `.proto` files compiled in-process with `protox`, resolving imports
//!   against an ordered list of import paths.
//! * [`ReflectedSchema`]: the file set served by a running server through the gRPC Server
//!   Reflection Protocol.
use super::SchemaError;
use crate::BoxError;
use crate::reflection::client::ReflectionClient;
use http_body::Body as HttpBody;
use prost_reflect::{DescriptorPool, MessageDescriptor, ServiceDescriptor};
use std::fmt::Debug;
use std::path::PathBuf;
use tonic::client::GrpcService;

pub trait TypeResolver: Send + Sync + Debug {
    /// All services described by the schema, sorted by fully qualified name.
    fn services(&self) -> Vec<ServiceDescriptor>;

    /// Looks up a message type, e.g. one referenced by an `Any` in a fault detail.
    fn resolve_message(&self, full_name: &str) -> Option<MessageDescriptor>;
}

fn sorted_services(pool: &DescriptorPool) -> Vec<ServiceDescriptor> {
    let mut services: Vec<_> = pool.services().collect();
    services.sort_by(|a, b| a.full_name().cmp(b.full_name()));
    services
}

/// Schema compiled from local `.proto` files.
#[derive(Debug, Clone)]
pub struct CompiledFiles {
    pool: DescriptorPool,
}

impl CompiledFiles {
    /// Parses `entry_files` (and everything they import) resolving imports against `import_paths`.
    ///
    /// # Returns
    ///
    /// * `Ok(CompiledFiles)` - Every file parsed and every symbol resolved.
    /// * `Err(SchemaError::CompileFailed)` - A file is missing, unparsable, or references an
    ///   unknown symbol.
    pub fn compile(
        import_paths: &[PathBuf],
        entry_files: &[PathBuf],
    ) -> Result<Self, SchemaError> {
        if entry_files.is_empty() {
            return Ok(Self {
                pool: DescriptorPool::new(),
            });
        }

        let mut compiler = protox::Compiler::new(import_paths).map_err(SchemaError::CompileFailed)?;
        compiler.include_imports(true);
        compiler
            .open_files(entry_files)
            .map_err(SchemaError::CompileFailed)?;

        Ok(Self {
            pool: compiler.descriptor_pool(),
        })
    }

    pub fn from_pool(pool: DescriptorPool) -> Self {
        Self { pool }
    }
}

impl TypeResolver for CompiledFiles {
    fn services(&self) -> Vec<ServiceDescriptor> {
        sorted_services(&self.pool)
    }

    fn resolve_message(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.pool.get_message_by_name(full_name)
    }
}

/// Schema served by a live endpoint through server reflection.
#[derive(Debug, Clone)]
pub struct ReflectedSchema {
    pool: DescriptorPool,
}

impl ReflectedSchema {
    /// Lists every service exposed by the server and fetches the files declaring them,
    /// including all of their transitive imports.
    ///
    /// # Returns
    ///
    /// * `Ok(ReflectedSchema)` - The complete file set was fetched and linked.
    /// * `Err(SchemaError::ReflectionUnavailable)` - The server does not expose reflection or
    ///   the exchange failed.
    pub async fn fetch<S>(
        client: &mut ReflectionClient<S>,
        address: &str,
    ) -> Result<Self, SchemaError>
    where
        S: GrpcService<tonic::body::Body>,
        S::Error: Into<BoxError>,
        S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
        <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
    {
        let unavailable = |source| SchemaError::ReflectionUnavailable {
            address: address.to_string(),
            source,
        };

        let services = client.list_services().await.map_err(unavailable)?;

        let fd_set = client
            .file_descriptor_set_by_symbols(&services)
            .await
            .map_err(unavailable)?;

        let pool = DescriptorPool::from_file_descriptor_set(fd_set)?;

        tracing::debug!(
            address,
            services = services.len(),
            files = pool.files().count(),
            "reflected schema"
        );

        Ok(Self { pool })
    }
}

impl TypeResolver for ReflectedSchema {
    fn services(&self) -> Vec<ServiceDescriptor> {
        sorted_services(&self.pool)
    }

    fn resolve_message(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.pool.get_message_by_name(full_name)
    }
}

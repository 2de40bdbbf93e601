//! # Project
//!
//! A project owns one schema and an ordered set of [`Form`]s, one of which is current.
//!
//! ## Locking
//!
//! Structural state (schema tree, import paths and files, the form list, the current form)
//! lives behind a single `RwLock`. Every form guards its own fields, so a call in flight on
//! one form never blocks another form or a reader: [`Project::send`] only holds the project
//! lock long enough to capture what the call needs.
//!
//! ## Persistence
//!
//! Every mutation ends by saving a [`ProjectState`] through the [`StateStore`]. Live
//! connections, pending calls and the schema tree are never persisted; the tree is rebuilt
//! from the saved origin when the project is loaded.
use crate::config::EngineConfig;
use crate::connection::ConnectError;
use crate::form::{CallError, CallTarget, Form, FormState, Header};
use crate::schema::{
    Generation, SchemaError, SchemaNode, SchemaOrigin, SchemaSource, SchemaTree,
};
use crate::store::{StateStore, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Call(#[from] CallError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Schema generation {0} was superseded by a newer one")]
    SchemaSuperseded(u64),
    #[error("Form '{0}' does not exist")]
    UnknownForm(Uuid),
    #[error("A project must keep at least one form")]
    LastForm,
    #[error("Project '{0}' has never been saved")]
    NotFound(String),
    #[error("Saved state of project '{id}' is invalid: '{source}'")]
    InvalidState {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The persisted part of a project.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProjectState {
    pub id: String,
    #[serde(default)]
    pub import_paths: Vec<PathBuf>,
    #[serde(default)]
    pub proto_files: Vec<PathBuf>,
    /// Address the schema was reflected from, when it did not come from files.
    #[serde(default)]
    pub reflected_from: Option<String>,
    pub forms: Vec<FormState>,
    pub current_form_id: Uuid,
}

impl ProjectState {
    /// Where the schema of this project comes from, if it has one.
    pub fn origin(&self) -> Option<SchemaOrigin> {
        schema_origin(&self.import_paths, &self.proto_files, &self.reflected_from)
    }
}

struct Inner {
    import_paths: Vec<PathBuf>,
    proto_files: Vec<PathBuf>,
    reflected_from: Option<String>,
    tree: Arc<SchemaTree>,
    forms: Vec<Arc<Form>>,
    current_form_id: Uuid,
}

impl Inner {
    fn form(&self, form_id: Uuid) -> Result<&Arc<Form>, ProjectError> {
        self.forms
            .iter()
            .find(|f| f.id() == form_id)
            .ok_or(ProjectError::UnknownForm(form_id))
    }

    fn current_form(&self) -> Result<&Arc<Form>, ProjectError> {
        self.form(self.current_form_id)
    }

    /// Swaps in `tree` unless the installed tree comes from a newer source.
    fn install(&mut self, tree: SchemaTree, origin: &SchemaOrigin) -> Result<(), ProjectError> {
        if tree.generation() < self.tree.generation() {
            return Err(ProjectError::SchemaSuperseded(tree.generation().get()));
        }

        match origin {
            SchemaOrigin::StaticFiles {
                import_paths,
                entry_files,
            } => {
                self.import_paths = import_paths.clone();
                self.proto_files = entry_files.clone();
                self.reflected_from = None;
            }
            SchemaOrigin::LiveReflection { address } => {
                self.import_paths.clear();
                self.proto_files.clear();
                self.reflected_from = Some(address.clone());
            }
        }

        for form in &self.forms {
            if let Some(method_id) = form.selected_method_id()
                && !tree.contains_method(&method_id)
            {
                tracing::debug!(
                    form = %form.id(),
                    method_id = %method_id,
                    "selected method vanished from schema"
                );
                form.clear_selection();
            }
        }

        self.tree = Arc::new(tree);
        Ok(())
    }

    fn state(&self, id: &str) -> ProjectState {
        ProjectState {
            id: id.to_string(),
            import_paths: self.import_paths.clone(),
            proto_files: self.proto_files.clone(),
            reflected_from: self.reflected_from.clone(),
            forms: self.forms.iter().map(|f| f.snapshot()).collect(),
            current_form_id: self.current_form_id,
        }
    }
}

pub struct Project {
    id: String,
    config: EngineConfig,
    store: Arc<dyn StateStore>,
    inner: RwLock<Inner>,
    // Held while a loaded reflection project fetches its schema on first send.
    lazy_reflection: tokio::sync::Mutex<()>,
}

impl Project {
    /// Creates a project with a single empty form and saves it.
    pub async fn create(
        id: impl Into<String>,
        store: Arc<dyn StateStore>,
        config: EngineConfig,
    ) -> Result<Self, ProjectError> {
        let form = FormState::new(config.default_address.clone(), Vec::new());
        let current_form_id = form.id;

        let project = Self {
            id: id.into(),
            config,
            store,
            inner: RwLock::new(Inner {
                import_paths: Vec::new(),
                proto_files: Vec::new(),
                reflected_from: None,
                tree: Arc::new(SchemaTree::empty()),
                forms: vec![Arc::new(Form::new(form))],
                current_form_id,
            }),
            lazy_reflection: tokio::sync::Mutex::new(()),
        };

        project.save(&*project.inner.read().await)?;

        tracing::debug!(project = %project.id, "created project");

        Ok(project)
    }

    /// Loads a saved project.
    ///
    /// A schema from files is compiled right away; if that fails the error is logged and the
    /// project starts without a tree. A reflected schema is fetched on the first [`Self::send`].
    pub async fn load(
        id: impl Into<String>,
        store: Arc<dyn StateStore>,
        config: EngineConfig,
    ) -> Result<Self, ProjectError> {
        let id = id.into();

        let value = store
            .load(&id)?
            .ok_or_else(|| ProjectError::NotFound(id.clone()))?;
        let mut state: ProjectState =
            serde_json::from_value(value).map_err(|source| ProjectError::InvalidState {
                id: id.clone(),
                source,
            })?;

        if state.forms.is_empty() {
            state
                .forms
                .push(FormState::new(config.default_address.clone(), Vec::new()));
        }
        if !state.forms.iter().any(|f| f.id == state.current_form_id) {
            state.current_form_id = state.forms[0].id;
        }

        let tree = match state.origin() {
            Some(SchemaOrigin::StaticFiles {
                import_paths,
                entry_files,
            }) => {
                let source = SchemaSource::static_files(import_paths, entry_files);
                build_from_files(&source).unwrap_or_else(|e| {
                    tracing::warn!(
                        project = %id,
                        error = %e,
                        "could not rebuild schema from files"
                    );
                    SchemaTree::empty()
                })
            }
            _ => SchemaTree::empty(),
        };

        Ok(Self {
            id,
            config,
            store,
            inner: RwLock::new(Inner {
                import_paths: state.import_paths,
                proto_files: state.proto_files,
                reflected_from: state.reflected_from,
                tree: Arc::new(tree),
                forms: state
                    .forms
                    .into_iter()
                    .map(|f| Arc::new(Form::new(f)))
                    .collect(),
                current_form_id: state.current_form_id,
            }),
            lazy_reflection: tokio::sync::Mutex::new(()),
        })
    }

    /// Closes every form and removes the project from the store.
    pub async fn delete(self) -> Result<(), ProjectError> {
        self.close().await;
        self.store.delete(&self.id)?;
        Ok(())
    }

    /// Cancels pending calls and releases every connection.
    pub async fn close(&self) {
        let forms = self.inner.read().await.forms.clone();
        for form in forms {
            form.close().await;
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Builds a tree from `source` and swaps it in.
    ///
    /// Forms whose selected method is missing from the new tree lose their selection along
    /// with their request and response text. On failure nothing changes.
    /// A source older than the installed tree is rejected with
    /// [`ProjectError::SchemaSuperseded`].
    pub async fn refresh_schema(
        &self,
        source: SchemaSource,
    ) -> Result<Vec<SchemaNode>, ProjectError> {
        let via = self.inner.read().await.current_form()?.clone();
        self.refresh_schema_via(source, &via).await
    }

    async fn refresh_schema_via(
        &self,
        source: SchemaSource,
        via: &Form,
    ) -> Result<Vec<SchemaNode>, ProjectError> {
        let tree = match source.origin() {
            SchemaOrigin::StaticFiles { .. } => build_from_files(&source)?,
            SchemaOrigin::LiveReflection { address } => {
                self.build_from_reflection(address, source.generation(), via)
                    .await?
            }
        };

        tracing::debug!(
            project = %self.id,
            generation = tree.generation().get(),
            methods = tree.method_ids().count(),
            "schema refreshed"
        );

        let mut inner = self.inner.write().await;
        inner.install(tree, source.origin())?;
        if let SchemaOrigin::LiveReflection { address } = source.origin() {
            via.set_address(address.clone());
        }
        self.save(&inner)?;

        Ok(inner.tree.nodes().to_vec())
    }

    async fn build_from_reflection(
        &self,
        address: &str,
        generation: Generation,
        via: &Form,
    ) -> Result<SchemaTree, ProjectError> {
        let channel = via
            .connect(address, generation, self.config.connect_timeout())
            .await?;

        let timeout = self.config.call_timeout();
        match tokio::time::timeout(
            timeout,
            SchemaTree::from_reflection(channel, address, generation),
        )
        .await
        {
            Ok(tree) => Ok(tree?),
            Err(_) => Err(SchemaError::ReflectionUnavailable {
                address: address.to_string(),
                source: crate::reflection::client::ReflectionResolveError::TimedOut(timeout),
            }
            .into()),
        }
    }

    /// Reflects the schema from `address` through `form_id`'s connection. On success the
    /// address becomes the address of the form; on failure the form is left untouched.
    pub async fn reflect(
        &self,
        form_id: Uuid,
        address: impl Into<String>,
    ) -> Result<Vec<SchemaNode>, ProjectError> {
        let address = address.into();
        let form = self.inner.read().await.form(form_id)?.clone();

        self.refresh_schema_via(SchemaSource::live_reflection(address), &form)
            .await
    }

    /// Adds `path` in front of the project's files and recompiles.
    ///
    /// Without configured import paths, the directory of `path` becomes the import path.
    /// Opening a file that is already part of the project does nothing.
    pub async fn open_proto_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Vec<SchemaNode>, ProjectError> {
        let path = path.as_ref().to_path_buf();

        let source = {
            let inner = self.inner.read().await;

            if inner.reflected_from.is_none() && inner.proto_files.contains(&path) {
                return Ok(inner.tree.nodes().to_vec());
            }

            let import_paths = if inner.import_paths.is_empty() {
                vec![
                    path.parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_default(),
                ]
            } else {
                inner.import_paths.clone()
            };

            let mut files = vec![path];
            if inner.reflected_from.is_none() {
                files.extend(inner.proto_files.iter().cloned());
            }

            SchemaSource::static_files(import_paths, files)
        };

        self.refresh_schema(source).await
    }

    /// Adds an import path. It is used by the next compilation.
    pub async fn open_import_path(&self, path: impl AsRef<Path>) -> Result<(), ProjectError> {
        let path = path.as_ref().to_path_buf();
        let mut inner = self.inner.write().await;

        if inner.import_paths.contains(&path) {
            return Ok(());
        }

        inner.import_paths.push(path);
        self.save(&inner)
    }

    pub async fn remove_import_path(&self, path: impl AsRef<Path>) -> Result<(), ProjectError> {
        let path = path.as_ref();
        let mut inner = self.inner.write().await;

        inner.import_paths.retain(|p| p != path);
        self.save(&inner)
    }

    /// Drops every schema file, closes every form but the current one and resets it.
    pub async fn delete_all_proto_files(&self) -> Result<(), ProjectError> {
        let mut inner = self.inner.write().await;

        let source = SchemaSource::static_files(inner.import_paths.clone(), Vec::new());
        let tree = build_from_files(&source)?;
        inner.install(tree, source.origin())?;

        let current = inner.current_form()?.clone();
        let others: Vec<_> = inner
            .forms
            .drain(..)
            .filter(|f| f.id() != current.id())
            .collect();

        for form in others {
            form.close().await;
        }

        current.clear_selection();
        inner.forms = vec![current];

        self.save(&inner)
    }

    /// Selects `method_id` on `form_id`, replacing its request with the method's template.
    ///
    /// The response is cleared, and a call still in flight on the form is cancelled.
    pub async fn select_method(
        &self,
        form_id: Uuid,
        method_id: &str,
    ) -> Result<String, ProjectError> {
        let inner = self.inner.read().await;
        let form = inner.form(form_id)?;

        let template = inner.tree.template(method_id)?;
        let text = crate::grpc::codec::to_text(&template);

        form.select(method_id, text.clone());
        self.save(&inner)?;

        Ok(text)
    }

    /// Sends the request of `form_id` and returns the rendered response.
    ///
    /// Server faults are part of the response. Errors mean nothing was sent (or nothing could
    /// be rendered) and leave the previous response in place.
    pub async fn send(&self, form_id: Uuid) -> Result<String, ProjectError> {
        let form = self.inner.read().await.form(form_id)?.clone();

        if self.needs_reflection().await {
            let _reflecting = self.lazy_reflection.lock().await;

            // Another send may have reflected while this one waited.
            if self.needs_reflection().await {
                let address = form.snapshot().address;
                tracing::debug!(
                    project = %self.id,
                    address = %address,
                    "reflecting schema before first call"
                );
                self.refresh_schema_via(SchemaSource::live_reflection(address), &form)
                    .await?;
            }
        }

        let target = {
            let inner = self.inner.read().await;
            let method_id = form
                .selected_method_id()
                .ok_or(CallError::NoMethodSelected)?;
            let method = inner
                .tree
                .method(&method_id)
                .ok_or(SchemaError::UnknownMethodId(method_id))?
                .clone();

            CallTarget {
                method,
                resolver: inner.tree.resolver().cloned(),
                generation: inner.tree.generation(),
            }
        };

        let response = form.send(target, &self.config).await?;

        self.save(&*self.inner.read().await)?;

        Ok(response)
    }

    async fn needs_reflection(&self) -> bool {
        let inner = self.inner.read().await;
        inner.reflected_from.is_some() && inner.tree.generation() == Generation::NONE
    }

    /// Cancels the call in flight on `form_id`, if any.
    pub async fn stop(&self, form_id: Uuid) -> Result<(), ProjectError> {
        self.inner.read().await.form(form_id)?.stop();
        Ok(())
    }

    /// Adds a form inheriting the current form's address and headers, and makes it current.
    pub async fn create_form(&self) -> Result<Uuid, ProjectError> {
        let mut inner = self.inner.write().await;

        let (address, headers) = match inner.current_form() {
            Ok(current) => {
                let state = current.snapshot();
                let headers = state
                    .headers
                    .into_iter()
                    .map(|h| Header::new(h.key, h.value))
                    .collect();
                (state.address, headers)
            }
            Err(_) => (self.config.default_address.clone(), Vec::new()),
        };

        let form = Form::new(FormState::new(address, headers));
        let id = form.id();

        inner.forms.push(Arc::new(form));
        inner.current_form_id = id;
        self.save(&inner)?;

        Ok(id)
    }

    /// Closes and removes `form_id`. The last form of a project cannot be removed.
    pub async fn remove_form(&self, form_id: Uuid) -> Result<(), ProjectError> {
        let mut inner = self.inner.write().await;

        let index = inner
            .forms
            .iter()
            .position(|f| f.id() == form_id)
            .ok_or(ProjectError::UnknownForm(form_id))?;

        if inner.forms.len() <= 1 {
            return Err(ProjectError::LastForm);
        }

        let form = inner.forms.remove(index);
        if inner.current_form_id == form_id {
            inner.current_form_id = inner.forms[index.saturating_sub(1)].id();
        }

        form.close().await;
        self.save(&inner)
    }

    pub async fn set_current_form(&self, form_id: Uuid) -> Result<(), ProjectError> {
        let mut inner = self.inner.write().await;
        inner.form(form_id)?;
        inner.current_form_id = form_id;
        self.save(&inner)
    }

    pub async fn save_address(
        &self,
        form_id: Uuid,
        address: impl Into<String>,
    ) -> Result<(), ProjectError> {
        let inner = self.inner.write().await;
        inner.form(form_id)?.set_address(address);
        self.save(&inner)
    }

    /// Appends a blank header to `form_id` and returns its id.
    pub async fn add_header(&self, form_id: Uuid) -> Result<Uuid, ProjectError> {
        let inner = self.inner.write().await;
        let header = Header::new("", "");
        let id = header.id;

        inner.form(form_id)?.add_header(header);
        self.save(&inner)?;

        Ok(id)
    }

    pub async fn save_headers(
        &self,
        form_id: Uuid,
        headers: Vec<Header>,
    ) -> Result<(), ProjectError> {
        let inner = self.inner.write().await;
        inner.form(form_id)?.set_headers(headers);
        self.save(&inner)
    }

    pub async fn delete_header(&self, form_id: Uuid, header_id: Uuid) -> Result<(), ProjectError> {
        let inner = self.inner.write().await;
        inner.form(form_id)?.delete_header(header_id);
        self.save(&inner)
    }

    pub async fn save_request_text(
        &self,
        form_id: Uuid,
        text: impl Into<String>,
    ) -> Result<(), ProjectError> {
        let inner = self.inner.write().await;
        inner.form(form_id)?.set_request_text(text);
        self.save(&inner)
    }

    pub async fn nodes(&self) -> Vec<SchemaNode> {
        self.inner.read().await.tree.nodes().to_vec()
    }

    pub async fn current_form_id(&self) -> Uuid {
        self.inner.read().await.current_form_id
    }

    pub async fn form(&self, form_id: Uuid) -> Result<FormState, ProjectError> {
        Ok(self.inner.read().await.form(form_id)?.snapshot())
    }

    /// Number of dials `form_id` has performed so far.
    pub async fn form_sessions(&self, form_id: Uuid) -> Result<u64, ProjectError> {
        let form = self.inner.read().await.form(form_id)?.clone();
        Ok(form.connection_sessions().await)
    }

    pub async fn snapshot(&self) -> ProjectState {
        self.inner.read().await.state(&self.id)
    }

    fn save(&self, inner: &Inner) -> Result<(), ProjectError> {
        let state = inner.state(&self.id);
        let value = serde_json::to_value(&state).map_err(|source| ProjectError::InvalidState {
            id: self.id.clone(),
            source,
        })?;

        self.store.save(&self.id, &value)?;
        Ok(())
    }
}

fn build_from_files(source: &SchemaSource) -> Result<SchemaTree, SchemaError> {
    match source.origin() {
        SchemaOrigin::StaticFiles {
            import_paths,
            entry_files,
        } => SchemaTree::from_files(import_paths, entry_files, source.generation()),
        SchemaOrigin::LiveReflection { .. } => Ok(SchemaTree::empty()),
    }
}

fn schema_origin(
    import_paths: &[PathBuf],
    proto_files: &[PathBuf],
    reflected_from: &Option<String>,
) -> Option<SchemaOrigin> {
    match reflected_from {
        Some(address) => Some(SchemaOrigin::LiveReflection {
            address: address.clone(),
        }),
        None if !proto_files.is_empty() => Some(SchemaOrigin::StaticFiles {
            import_paths: import_paths.to_vec(),
            entry_files: proto_files.to_vec(),
        }),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn project() -> (Project, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let project = Project::create("p1", store.clone(), EngineConfig::default())
            .await
            .unwrap();
        (project, store)
    }

    #[tokio::test]
    async fn create_saves_a_single_form() {
        let (project, store) = project().await;

        let state = project.snapshot().await;
        assert_eq!(state.forms.len(), 1);
        assert_eq!(state.forms[0].address, crate::config::DEFAULT_ADDRESS);
        assert_eq!(state.forms[0].request_text, "{}");
        assert_eq!(state.current_form_id, state.forms[0].id);
        assert!(store.load("p1").unwrap().is_some());
    }

    #[tokio::test]
    async fn new_forms_inherit_address_and_headers() {
        let (project, _) = project().await;
        let first = project.current_form_id().await;
        project.save_address(first, "localhost:9000").await.unwrap();
        let header = project.add_header(first).await.unwrap();

        let second = project.create_form().await.unwrap();

        let state = project.form(second).await.unwrap();
        assert_eq!(state.address, "localhost:9000");
        assert_eq!(state.headers.len(), 1);
        assert_ne!(state.headers[0].id, header);
        assert_eq!(project.current_form_id().await, second);
    }

    #[tokio::test]
    async fn last_form_cannot_be_removed() {
        let (project, _) = project().await;
        let only = project.current_form_id().await;

        let err = project.remove_form(only).await.unwrap_err();
        assert!(matches!(err, ProjectError::LastForm));
    }

    #[tokio::test]
    async fn removing_the_current_form_moves_selection() {
        let (project, _) = project().await;
        let first = project.current_form_id().await;
        let second = project.create_form().await.unwrap();

        project.remove_form(second).await.unwrap();

        assert_eq!(project.current_form_id().await, first);
        assert_eq!(project.snapshot().await.forms.len(), 1);
    }

    #[tokio::test]
    async fn unknown_forms_are_reported() {
        let (project, _) = project().await;
        let err = project.set_current_form(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ProjectError::UnknownForm(_)));
    }

    #[tokio::test]
    async fn send_without_selection_fails() {
        let (project, _) = project().await;
        let form = project.current_form_id().await;

        let err = project.send(form).await.unwrap_err();
        assert!(matches!(err, ProjectError::Call(CallError::NoMethodSelected)));
    }

    #[tokio::test]
    async fn import_paths_are_deduplicated() {
        let (project, _) = project().await;
        project.open_import_path("/protos").await.unwrap();
        project.open_import_path("/protos").await.unwrap();
        project.open_import_path("/vendor").await.unwrap();
        project.remove_import_path("/protos").await.unwrap();

        assert_eq!(
            project.snapshot().await.import_paths,
            vec![PathBuf::from("/vendor")]
        );
    }

    #[tokio::test]
    async fn stop_twice_is_harmless() {
        let (project, _) = project().await;
        let form = project.current_form_id().await;

        project.stop(form).await.unwrap();
        project.stop(form).await.unwrap();
    }
}

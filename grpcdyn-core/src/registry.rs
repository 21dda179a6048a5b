//! # Descriptor Registry
//!
//! The registry holds every method a script can invoke, keyed by its full gRPC path
//! (`/package.Service/Method`), together with one merged [`DescriptorPool`] that is used to
//! resolve nested, imported and `google.protobuf.Any` payload types.
//!
//! Definitions can come from three sources:
//!
//! * `.proto` sources compiled at runtime with [`protox`].
//! * Serialized `FileDescriptorSet`s (protosets).
//! * A server's reflection service, see [`crate::reflection`].
//!
//! Every load is all-or-nothing: new files are merged into a copy of the pool and the copy
//! only replaces the current state once every method has been validated.
use crate::BoxError;
use crate::error::ErrorKind;
use crate::reflection::client::{ReflectionClient, ReflectionResolveError};
use http_body::Body as HttpBody;
use prost::Message;
use prost_reflect::{DescriptorError, DescriptorPool, MessageDescriptor, MethodDescriptor};
use prost_types::{DescriptorProto, FileDescriptorProto, FileDescriptorSet};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tonic::client::GrpcService;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("couldn't open proto file '{path}': {source}")]
    ProtoNotFound {
        path: String,
        source: std::io::Error,
    },
    #[error("couldn't parse proto files: {0}")]
    Parse(#[source] protox::Error),
    #[error("couldn't open protoset '{path}': {source}")]
    ProtosetNotFound {
        path: String,
        source: std::io::Error,
    },
    #[error("couldn't unmarshal protoset: {0}")]
    ProtosetDecode(#[source] prost::DecodeError),
    #[error("invalid file descriptors: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error(
        "method \"{path}\" is already registered from {existing} with a different signature"
    )]
    Conflict { path: String, existing: Source },
    #[error("file \"{0}\" is already loaded with different definitions")]
    FileConflict(String),
    #[error("\"{symbol}\" from file \"{file}\" conflicts with an already loaded definition")]
    SymbolConflict { symbol: String, file: String },
    #[error("method \"{0}\" not found in file descriptors")]
    MethodNotFound(String),
    #[error("unable to resolve Any type \"{0}\": not found in the loaded descriptors")]
    AnyTypeNotFound(String),
    #[error(transparent)]
    Reflection(#[from] ReflectionResolveError),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProtoNotFound { .. }
            | Self::ProtosetNotFound { .. }
            | Self::MethodNotFound(_)
            | Self::AnyTypeNotFound(_) => ErrorKind::NotFound,
            Self::Parse(_) => ErrorKind::Parse,
            Self::ProtosetDecode(_) | Self::Descriptor(_) => ErrorKind::Decode,
            Self::Conflict { .. } | Self::FileConflict(_) | Self::SymbolConflict { .. } => {
                ErrorKind::AlreadyExists
            }
            Self::Reflection(e) => e.kind(),
        }
    }
}

/// Where a method definition was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    File,
    Protoset,
    Reflection,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::File => f.write_str("a proto file"),
            Source::Protoset => f.write_str("a protoset"),
            Source::Reflection => f.write_str("server reflection"),
        }
    }
}

/// Script-facing description of a registered method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodInfo {
    pub package: String,
    pub service: String,
    pub name: String,
    pub full_method: String,
    pub is_client_stream: bool,
    pub is_server_stream: bool,
}

/// A method known to the registry.
#[derive(Debug, Clone)]
pub struct RegisteredMethod {
    info: MethodInfo,
    descriptor: MethodDescriptor,
    source: Source,
}

impl RegisteredMethod {
    fn new(descriptor: MethodDescriptor, source: Source) -> Self {
        let service = descriptor.parent_service();
        let info = MethodInfo {
            package: service.package_name().to_string(),
            service: service.name().to_string(),
            name: descriptor.name().to_string(),
            full_method: method_path(service.full_name(), descriptor.name()),
            is_client_stream: descriptor.is_client_streaming(),
            is_server_stream: descriptor.is_server_streaming(),
        };

        Self {
            info,
            descriptor,
            source,
        }
    }

    pub fn info(&self) -> &MethodInfo {
        &self.info
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn input(&self) -> MessageDescriptor {
        self.descriptor.input()
    }

    pub fn output(&self) -> MessageDescriptor {
        self.descriptor.output()
    }

    fn signature(&self) -> Signature {
        Signature {
            input: self.descriptor.input().full_name().to_string(),
            output: self.descriptor.output().full_name().to_string(),
            client_streaming: self.descriptor.is_client_streaming(),
            server_streaming: self.descriptor.is_server_streaming(),
        }
    }
}

/// The parts of a method definition that must agree between two registrations.
#[derive(Debug, PartialEq, Eq)]
struct Signature {
    input: String,
    output: String,
    client_streaming: bool,
    server_streaming: bool,
}

/// Which methods of a merged descriptor set get registered.
enum Targets {
    /// Methods of services declared in these files.
    Files(HashSet<String>),
    /// Methods of these fully-qualified services.
    Services(HashSet<String>),
}

impl Targets {
    fn includes(&self, file: &FileDescriptorProto, service_full_name: &str) -> bool {
        match self {
            Targets::Files(names) => names.contains(file.name()),
            Targets::Services(names) => names.contains(service_full_name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DescriptorRegistry {
    pool: DescriptorPool,
    methods: BTreeMap<String, RegisteredMethod>,
}

impl Default for DescriptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self {
            pool: DescriptorPool::new(),
            methods: BTreeMap::new(),
        }
    }

    /// Compiles `.proto` files and registers the methods they declare.
    ///
    /// Imports are resolved against `import_paths`. When none are given, the directory of
    /// each file is used instead. Only services declared directly in `files` are registered;
    /// services of transitively imported files are compiled into the pool but stay
    /// unreachable through [`Self::resolve`].
    ///
    /// # Returns
    ///
    /// * `Ok(methods)` - The methods declared by `files`, in declaration order.
    /// * `Err(RegistryError)` - A file is missing, fails to parse or conflicts with the registry.
    pub fn load_from_source<P, F>(
        &mut self,
        import_paths: &[P],
        files: &[F],
    ) -> Result<Vec<MethodInfo>, RegistryError>
    where
        P: AsRef<Path>,
        F: AsRef<Path>,
    {
        let includes = include_paths(import_paths, files);

        for file in files {
            ensure_proto_exists(file.as_ref(), &includes)?;
        }

        let mut compiler = protox::Compiler::new(&includes).map_err(RegistryError::Parse)?;
        compiler.include_source_info(true);
        compiler.include_imports(false);
        compiler.open_files(files).map_err(RegistryError::Parse)?;

        let named: HashSet<String> = compiler
            .file_descriptor_set()
            .file
            .into_iter()
            .map(|file| file.name().to_string())
            .collect();

        compiler.include_imports(true);
        let fd_set = compiler.file_descriptor_set();

        self.merge(fd_set, Source::File, &Targets::Files(named))
    }

    /// Reads a serialized `FileDescriptorSet` from disk and registers every service in it.
    pub fn load_from_protoset(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<Vec<MethodInfo>, RegistryError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| RegistryError::ProtosetNotFound {
            path: path.display().to_string(),
            source,
        })?;

        self.load_from_protoset_bytes(&bytes)
    }

    /// Registers every service of an encoded `FileDescriptorSet`.
    pub fn load_from_protoset_bytes(
        &mut self,
        bytes: &[u8],
    ) -> Result<Vec<MethodInfo>, RegistryError> {
        let fd_set = FileDescriptorSet::decode(bytes).map_err(RegistryError::ProtosetDecode)?;
        let names = fd_set
            .file
            .iter()
            .map(|file| file.name().to_string())
            .collect();

        self.merge(fd_set, Source::Protoset, &Targets::Files(names))
    }

    /// Discovers every service exposed by a server's reflection service and registers them.
    ///
    /// The reflection services themselves are skipped.
    pub async fn load_from_reflection<S>(
        &mut self,
        client: &mut ReflectionClient<S>,
    ) -> Result<Vec<MethodInfo>, RegistryError>
    where
        S: GrpcService<tonic::body::Body>,
        S::Error: Into<BoxError>,
        S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
        <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
    {
        let services: Vec<String> = client
            .list_services()
            .await?
            .into_iter()
            .filter(|name| !name.starts_with("grpc.reflection."))
            .collect();

        let fd_set = client.file_descriptor_set_by_symbols(&services).await?;

        tracing::debug!(
            services = services.len(),
            files = fd_set.file.len(),
            "fetched descriptors through server reflection"
        );

        let targets = Targets::Services(services.into_iter().collect());
        self.merge(fd_set, Source::Reflection, &targets)
    }

    /// Looks a method up by its full path, with or without the leading slash.
    pub fn resolve(&self, path: &str) -> Result<&RegisteredMethod, RegistryError> {
        let normalized = normalize_path(path);
        self.methods
            .get(normalized.as_str())
            .ok_or(RegistryError::MethodNotFound(normalized))
    }

    /// Finds the message type named by an `Any` type URL
    /// (e.g. `type.googleapis.com/grpc.any.testing.SumRequestData`).
    pub fn resolve_any_type(&self, type_url: &str) -> Result<MessageDescriptor, RegistryError> {
        let name = type_url.rsplit('/').next().unwrap_or_default();

        self.pool
            .get_message_by_name(name)
            .ok_or_else(|| RegistryError::AnyTypeNotFound(type_url.to_string()))
    }

    /// All registered methods, ordered by path.
    pub fn methods(&self) -> impl Iterator<Item = &RegisteredMethod> {
        self.methods.values()
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    fn merge(
        &mut self,
        fd_set: FileDescriptorSet,
        source: Source,
        targets: &Targets,
    ) -> Result<Vec<MethodInfo>, RegistryError> {
        // Conflicts are checked against the incoming definitions, not against the pool:
        // files already in the pool are skipped below and would always look identical.
        let incoming = incoming_signatures(&fd_set, targets);

        for (path, signature) in &incoming {
            if let Some(existing) = self.methods.get(path)
                && existing.signature() != *signature
            {
                return Err(RegistryError::Conflict {
                    path: path.clone(),
                    existing: existing.source,
                });
            }
        }

        let mut pool = self.pool.clone();
        let fresh = new_files(&pool, fd_set.file)?;
        let fresh_count = fresh.len();

        pool.add_file_descriptor_protos(fresh)?;

        let mut staged = Vec::with_capacity(incoming.len());
        for (path, _) in &incoming {
            if self.methods.contains_key(path) {
                staged.push((path.clone(), None));
                continue;
            }

            let method = find_method(&pool, path)
                .ok_or_else(|| RegistryError::MethodNotFound(path.clone()))?;
            staged.push((path.clone(), Some(RegisteredMethod::new(method, source))));
        }

        self.pool = pool;

        let mut infos = Vec::with_capacity(staged.len());
        for (path, method) in staged {
            if let Some(method) = method {
                self.methods.insert(path.clone(), method);
            }
            if let Some(registered) = self.methods.get(&path) {
                infos.push(registered.info.clone());
            }
        }

        tracing::debug!(
            %source,
            files = fresh_count,
            methods = infos.len(),
            "merged descriptors into the registry"
        );

        Ok(infos)
    }
}

/// Method paths and signatures declared by the targeted services of a raw descriptor set.
fn incoming_signatures(fd_set: &FileDescriptorSet, targets: &Targets) -> Vec<(String, Signature)> {
    let mut seen = HashSet::new();
    let mut signatures = Vec::new();

    for file in &fd_set.file {
        for service in &file.service {
            let service_name = qualified_name(file.package(), service.name());
            if !targets.includes(file, &service_name) {
                continue;
            }

            for method in &service.method {
                let path = method_path(&service_name, method.name());
                if !seen.insert(path.clone()) {
                    continue;
                }

                signatures.push((
                    path,
                    Signature {
                        input: method.input_type().trim_start_matches('.').to_string(),
                        output: method.output_type().trim_start_matches('.').to_string(),
                        client_streaming: method.client_streaming(),
                        server_streaming: method.server_streaming(),
                    },
                ));
            }
        }
    }

    signatures
}

/// Picks the incoming files that are not in `pool` yet.
///
/// Files are matched on their definitions, not only on their names:
///
/// * A file already loaded under the same name is skipped when identical and a conflict
///   otherwise.
/// * A file whose definitions are all loaded already, under another file name, is skipped
///   as well. Imports of it are redirected to the files holding those definitions.
fn new_files(
    pool: &DescriptorPool,
    files: Vec<FileDescriptorProto>,
) -> Result<Vec<FileDescriptorProto>, RegistryError> {
    let mut aliases: HashMap<String, Vec<String>> = HashMap::new();
    let mut fresh = Vec::new();

    for file in files {
        if let Some(existing) = pool.get_file_by_name(file.name()) {
            if normalized(existing.file_descriptor_proto()) != normalized(&file) {
                return Err(RegistryError::FileConflict(file.name().to_string()));
            }
            continue;
        }

        match defining_files(pool, &file)? {
            Some(existing) => {
                aliases.insert(file.name().to_string(), existing);
            }
            None => fresh.push(file),
        }
    }

    if !aliases.is_empty() {
        for file in &mut fresh {
            redirect_imports(file, &aliases);
        }
    }

    Ok(fresh)
}

/// Names of the loaded files defining every top-level symbol of `file`.
///
/// `None` when none of them is loaded. Partially loaded or differing definitions are a
/// conflict.
fn defining_files(
    pool: &DescriptorPool,
    file: &FileDescriptorProto,
) -> Result<Option<Vec<String>>, RegistryError> {
    let package = file.package();
    // (symbol, Some((identical, defining file)) when already loaded)
    let mut symbols: Vec<(String, Option<(bool, String)>)> = Vec::new();

    for message in &file.message_type {
        let name = qualified_name(package, message.name());
        let existing = pool.get_message_by_name(&name).map(|loaded| {
            (
                without_json_names(loaded.descriptor_proto()) == without_json_names(message),
                loaded.parent_file().name().to_string(),
            )
        });
        symbols.push((name, existing));
    }

    for enumeration in &file.enum_type {
        let name = qualified_name(package, enumeration.name());
        let existing = pool.get_enum_by_name(&name).map(|loaded| {
            (
                loaded.enum_descriptor_proto() == enumeration,
                loaded.parent_file().name().to_string(),
            )
        });
        symbols.push((name, existing));
    }

    for service in &file.service {
        let name = qualified_name(package, service.name());
        let existing = pool.get_service_by_name(&name).map(|loaded| {
            (
                loaded.service_descriptor_proto() == service,
                loaded.parent_file().name().to_string(),
            )
        });
        symbols.push((name, existing));
    }

    if symbols.iter().all(|(_, existing)| existing.is_none()) {
        return Ok(None);
    }

    let mut defined_in: Vec<String> = Vec::new();
    for (symbol, existing) in symbols {
        match existing {
            Some((true, loaded_file)) => {
                if !defined_in.contains(&loaded_file) {
                    defined_in.push(loaded_file);
                }
            }
            _ => {
                return Err(RegistryError::SymbolConflict {
                    symbol,
                    file: file.name().to_string(),
                });
            }
        }
    }

    Ok(Some(defined_in))
}

/// Rewrites the imports of `file` that point at skipped duplicates.
fn redirect_imports(file: &mut FileDescriptorProto, aliases: &HashMap<String, Vec<String>>) {
    if !file.dependency.iter().any(|dep| aliases.contains_key(dep)) {
        return;
    }

    let mut dependency: Vec<String> = Vec::new();
    // Old import index -> new import indexes.
    let mut moved: Vec<Vec<i32>> = Vec::with_capacity(file.dependency.len());

    for dep in &file.dependency {
        let targets = aliases
            .get(dep)
            .cloned()
            .unwrap_or_else(|| vec![dep.clone()]);

        let mut indexes = Vec::new();
        for target in targets {
            let index = match dependency.iter().position(|known| *known == target) {
                Some(index) => index,
                None => {
                    dependency.push(target);
                    dependency.len() - 1
                }
            };
            indexes.push(index as i32);
        }
        moved.push(indexes);
    }

    let remap = |old: &[i32]| -> Vec<i32> {
        old.iter()
            .filter_map(|index| usize::try_from(*index).ok())
            .filter_map(|index| moved.get(index))
            .flatten()
            .copied()
            .collect()
    };

    file.public_dependency = remap(&file.public_dependency);
    file.weak_dependency = remap(&file.weak_dependency);
    file.dependency = dependency;
}

/// The parts of a file that do not change its definitions are cleared: source info, and
/// JSON names that some compilers fill in and others leave out.
fn normalized(file: &FileDescriptorProto) -> FileDescriptorProto {
    let mut file = file.clone();
    file.source_code_info = None;
    for message in &mut file.message_type {
        strip_json_names(message);
    }
    for extension in &mut file.extension {
        extension.json_name = None;
    }
    file
}

fn without_json_names(message: &DescriptorProto) -> DescriptorProto {
    let mut message = message.clone();
    strip_json_names(&mut message);
    message
}

fn strip_json_names(message: &mut DescriptorProto) {
    for field in message.field.iter_mut().chain(message.extension.iter_mut()) {
        field.json_name = None;
    }
    for nested in &mut message.nested_type {
        strip_json_names(nested);
    }
}

fn find_method(pool: &DescriptorPool, path: &str) -> Option<MethodDescriptor> {
    let (service, method) = path.trim_start_matches('/').split_once('/')?;
    pool.get_service_by_name(service)?
        .methods()
        .find(|m| m.name() == method)
}

fn qualified_name(package: &str, name: &str) -> String {
    if package.is_empty() {
        name.to_string()
    } else {
        format!("{package}.{name}")
    }
}

fn method_path(service_full_name: &str, method: &str) -> String {
    format!("/{service_full_name}/{method}")
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn include_paths<P: AsRef<Path>, F: AsRef<Path>>(import_paths: &[P], files: &[F]) -> Vec<PathBuf> {
    if !import_paths.is_empty() {
        return import_paths
            .iter()
            .map(|path| path.as_ref().to_path_buf())
            .collect();
    }

    let mut includes: Vec<PathBuf> = Vec::new();
    for file in files {
        let parent = match file.as_ref().parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !includes.contains(&parent) {
            includes.push(parent);
        }
    }
    includes
}

/// Checks that `file` exists either as given or relative to one of the include paths.
fn ensure_proto_exists(file: &Path, includes: &[PathBuf]) -> Result<(), RegistryError> {
    let direct = std::fs::metadata(file);
    if direct.is_ok() || includes.iter().any(|dir| dir.join(file).is_file()) {
        return Ok(());
    }

    Err(RegistryError::ProtoNotFound {
        path: file.display().to_string(),
        source: direct
            .err()
            .unwrap_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound)),
    })
}

//! Schema Extraction
//!
//! Apps declare their tools as an ordered list of [`ToolDef`]s. Extraction
//! checks every definition and produces the immutable [`ToolCatalog`] plus
//! the handler table the dispatcher binds calls against.
//!
//! ```rust,ignore
//! impl App for Notes {
//!     fn metadata(&self) -> AppMetadata {
//!         AppMetadata::new("Notes", "Keeps notes")
//!     }
//!
//!     fn tools() -> Vec<ToolDef<Self>> {
//!         vec![ToolDef::new("AddNote", "Store a note")
//!             .param::<String>("text")
//!             .hint("text", "the note body")
//!             .handler(Notes::add_note)]
//!     }
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use busker_proto::{
    AppMetadata, MetadataError, ParamDescriptor, ToolCatalog, ToolDescriptor, ValueKind, WireValue,
};
use futures::future::BoxFuture;

use crate::context::{Args, CallContext};
use crate::marshal::{Marshal, MarshalError};

/// A tool app: metadata plus tool definitions in declaration order.
pub trait App: Send + Sync + Sized + 'static {
    fn metadata(&self) -> AppMetadata;

    fn tools() -> Vec<ToolDef<Self>>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid app metadata: {0}")]
    InvalidMetadata(#[from] MetadataError),

    #[error("a tool has an empty name")]
    EmptyToolName,

    #[error("tool {tool} has no label")]
    MissingLabel { tool: String },

    #[error("tool {tool} is declared more than once")]
    DuplicateTool { tool: String },

    #[error("tool {tool} has a parameter with an empty name")]
    EmptyParameterName { tool: String },

    #[error("tool {tool} declares parameter {param} twice")]
    DuplicateParameter { tool: String, param: String },

    #[error("tool {tool} has a hint for {param}, which is not one of its parameters")]
    UnknownHint { tool: String, param: String },

    #[error("tool {tool} hints parameter {param} twice")]
    DuplicateHint { tool: String, param: String },

    #[error("tool {tool} has no handler")]
    MissingHandler { tool: String },

    #[error("tool {tool} parameter {param} has unsupported kind {kind}")]
    UnsupportedKind {
        tool: String,
        param: String,
        kind: ValueKind,
    },

    #[error("tool {tool} returns unsupported kind {kind}")]
    UnsupportedReturn { tool: String, kind: ValueKind },
}

pub(crate) type Encoded = Result<Option<WireValue>, MarshalError>;

type AsyncBody<A> =
    Arc<dyn Fn(Arc<A>, Args, CallContext) -> BoxFuture<'static, anyhow::Result<Encoded>> + Send + Sync>;

type BlockingBody<A> = Arc<dyn Fn(&A, Args, &CallContext) -> anyhow::Result<Encoded> + Send + Sync>;

/// How a tool body runs.
pub(crate) enum Body<A> {
    /// Spawned as its own task.
    Async(AsyncBody<A>),
    /// Run on the blocking pool.
    Blocking(BlockingBody<A>),
}

impl<A> Clone for Body<A> {
    fn clone(&self) -> Self {
        match self {
            Body::Async(f) => Body::Async(Arc::clone(f)),
            Body::Blocking(f) => Body::Blocking(Arc::clone(f)),
        }
    }
}

/// One formal parameter with the decoder check for its native type.
#[derive(Clone)]
pub(crate) struct ParamSpec {
    pub name: String,
    pub kind: ValueKind,
    pub check: fn(&WireValue) -> Result<(), MarshalError>,
}

/// Declarative description of one tool.
pub struct ToolDef<A> {
    name: String,
    label: String,
    icon: Option<String>,
    params: Vec<ParamSpec>,
    hints: Vec<(String, String)>,
    returns: Option<ValueKind>,
    body: Option<Body<A>>,
    command_timeout: Option<Duration>,
}

impl<A: Send + Sync + 'static> ToolDef<A> {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            icon: None,
            params: Vec::new(),
            hints: Vec::new(),
            returns: None,
            body: None,
            command_timeout: None,
        }
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Declare the next formal parameter. Call order is parameter order.
    pub fn param<T: Marshal + 'static>(mut self, name: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind: T::kind(),
            check: <T as Marshal>::check,
        });
        self
    }

    /// Attach a free-text hint to a declared parameter.
    pub fn hint(mut self, param: impl Into<String>, hint: impl Into<String>) -> Self {
        self.hints.push((param.into(), hint.into()));
        self
    }

    pub fn hints<I, P, H>(mut self, hints: I) -> Self
    where
        I: IntoIterator<Item = (P, H)>,
        P: Into<String>,
        H: Into<String>,
    {
        self.hints
            .extend(hints.into_iter().map(|(p, h)| (p.into(), h.into())));
        self
    }

    /// Timeout for helper commands this tool runs through its context.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Bind an async body. The return kind comes from `R`.
    pub fn handler<F, Fut, R>(mut self, f: F) -> Self
    where
        F: Fn(Arc<A>, Args, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Marshal + Send + 'static,
    {
        self.returns = Some(R::kind());
        self.body = Some(Body::Async(Arc::new(move |app, args, ctx| {
            let fut = f(app, args, ctx);
            Box::pin(async move { fut.await.map(R::encode_result) })
        })));
        self
    }

    /// Bind a synchronous body, run on the blocking pool.
    pub fn blocking_handler<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&A, Args, &CallContext) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Marshal + 'static,
    {
        self.returns = Some(R::kind());
        self.body = Some(Body::Blocking(Arc::new(move |app, args, ctx| {
            f(app, args, ctx).map(R::encode_result)
        })));
        self
    }
}

/// A tool ready for dispatch.
pub(crate) struct Binding<A> {
    pub params: Vec<ParamSpec>,
    pub body: Body<A>,
    pub command_timeout: Option<Duration>,
}

/// Result of extraction.
pub struct Extracted<A> {
    pub metadata: AppMetadata,
    pub catalog: ToolCatalog,
    pub(crate) bindings: HashMap<String, Binding<A>>,
}

impl<A> std::fmt::Debug for Extracted<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extracted")
            .field("metadata", &self.metadata)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

/// Extract the catalog of an app instance.
pub fn extract<A: App>(app: &A) -> Result<Extracted<A>, SchemaError> {
    extract_defs(app.metadata(), A::tools())
}

/// Extract from explicit metadata and definitions.
pub fn extract_defs<A>(
    metadata: AppMetadata,
    defs: Vec<ToolDef<A>>,
) -> Result<Extracted<A>, SchemaError> {
    metadata.validate()?;

    let mut descriptors = Vec::with_capacity(defs.len());
    let mut bindings = HashMap::with_capacity(defs.len());

    for def in defs {
        let name = def.name.trim().to_string();
        if name.is_empty() {
            return Err(SchemaError::EmptyToolName);
        }
        if def.label.trim().is_empty() {
            return Err(SchemaError::MissingLabel { tool: name });
        }
        if bindings.contains_key(&name) {
            return Err(SchemaError::DuplicateTool { tool: name });
        }

        let mut seen = HashSet::new();
        for p in &def.params {
            if p.name.is_empty() {
                return Err(SchemaError::EmptyParameterName { tool: name });
            }
            if !seen.insert(p.name.as_str()) {
                return Err(SchemaError::DuplicateParameter {
                    tool: name,
                    param: p.name.clone(),
                });
            }
            if p.kind.contains_unit() {
                return Err(SchemaError::UnsupportedKind {
                    tool: name,
                    param: p.name.clone(),
                    kind: p.kind.clone(),
                });
            }
        }

        let mut hints: HashMap<&str, &str> = HashMap::new();
        for (param, hint) in &def.hints {
            if !seen.contains(param.as_str()) {
                return Err(SchemaError::UnknownHint {
                    tool: name,
                    param: param.clone(),
                });
            }
            if hints.insert(param.as_str(), hint.as_str()).is_some() {
                return Err(SchemaError::DuplicateHint {
                    tool: name,
                    param: param.clone(),
                });
            }
        }

        let (Some(body), Some(returns)) = (def.body, def.returns) else {
            return Err(SchemaError::MissingHandler { tool: name });
        };
        if returns != ValueKind::Unit && returns.contains_unit() {
            return Err(SchemaError::UnsupportedReturn {
                tool: name,
                kind: returns,
            });
        }

        let params = def
            .params
            .iter()
            .map(|p| ParamDescriptor {
                name: p.name.clone(),
                hint: hints.get(p.name.as_str()).map(|h| h.to_string()).unwrap_or_default(),
                kind: p.kind.clone(),
            })
            .collect();

        descriptors.push(ToolDescriptor {
            name: name.clone(),
            label: def.label,
            icon: def.icon,
            params,
            returns,
        });
        bindings.insert(
            name,
            Binding {
                params: def.params,
                body,
                command_timeout: def.command_timeout,
            },
        );
    }

    tracing::debug!(tools = descriptors.len(), app = %metadata.name, "Extracted tool catalog");

    Ok(Extracted {
        metadata,
        catalog: ToolCatalog::new(descriptors),
        bindings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Fixture;

    async fn echo(_app: Arc<Fixture>, mut args: Args, _ctx: CallContext) -> anyhow::Result<String> {
        args.take("text")
    }

    fn meta() -> AppMetadata {
        AppMetadata::new("Fixture", "test app")
    }

    fn echo_def() -> ToolDef<Fixture> {
        ToolDef::new("Echo", "Echo text")
            .param::<String>("text")
            .hint("text", "what to echo")
            .handler(echo)
    }

    #[test]
    fn params_follow_declaration_order_not_hint_order() {
        let def = ToolDef::<Fixture>::new("Mix", "Mix things")
            .param::<String>("a")
            .param::<i64>("b")
            .param::<Vec<f64>>("c")
            .hints([("c", "third"), ("a", "first"), ("b", "second")])
            .handler(|_app: Arc<Fixture>, _args, _ctx| async { Ok::<_, anyhow::Error>(true) });

        let extracted = extract_defs(meta(), vec![def]).unwrap();
        let tool = extracted.catalog.get("Mix").unwrap();
        let names: Vec<&str> = tool.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(tool.params[0].hint, "first");
        assert_eq!(tool.params[2].kind, ValueKind::list_of(ValueKind::Float));
        assert_eq!(tool.returns, ValueKind::Bool);
    }

    #[test]
    fn unhinted_params_get_empty_hints() {
        let def = ToolDef::<Fixture>::new("Echo", "Echo").param::<String>("text").handler(echo);
        let extracted = extract_defs(meta(), vec![def]).unwrap();
        assert_eq!(extracted.catalog.tools[0].params[0].hint, "");
    }

    #[test]
    fn extraction_is_deterministic() {
        let a = extract_defs(meta(), vec![echo_def()]).unwrap();
        let b = extract_defs(meta(), vec![echo_def()]).unwrap();
        assert_eq!(
            serde_json::to_vec(&a.catalog).unwrap(),
            serde_json::to_vec(&b.catalog).unwrap()
        );
    }

    #[test]
    fn zero_tools_is_a_valid_catalog() {
        let extracted = extract_defs::<Fixture>(meta(), vec![]).unwrap();
        assert!(extracted.catalog.is_empty());
    }

    #[test]
    fn hint_for_missing_param_fails() {
        let def = ToolDef::<Fixture>::new("Echo", "Echo")
            .param::<String>("text")
            .hint("txt", "typo")
            .handler(echo);
        assert_eq!(
            extract_defs(meta(), vec![def]).unwrap_err(),
            SchemaError::UnknownHint {
                tool: "Echo".into(),
                param: "txt".into()
            }
        );
    }

    #[test]
    fn duplicate_tools_and_params_fail() {
        let err = extract_defs(meta(), vec![echo_def(), echo_def()]).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateTool { tool: "Echo".into() });

        let def = ToolDef::<Fixture>::new("Twice", "Twice")
            .param::<String>("x")
            .param::<i64>("x")
            .handler(echo);
        assert!(matches!(
            extract_defs(meta(), vec![def]),
            Err(SchemaError::DuplicateParameter { .. })
        ));
    }

    #[test]
    fn unit_parameters_are_unsupported() {
        let def = ToolDef::<Fixture>::new("Odd", "Odd")
            .param::<Vec<()>>("nothing")
            .handler(echo);
        assert!(matches!(
            extract_defs(meta(), vec![def]),
            Err(SchemaError::UnsupportedKind { .. })
        ));
    }

    #[test]
    fn unit_return_is_allowed() {
        let def = ToolDef::<Fixture>::new("Noop", "Do nothing")
            .handler(|_app: Arc<Fixture>, _args, _ctx| async { Ok::<_, anyhow::Error>(()) });
        let extracted = extract_defs(meta(), vec![def]).unwrap();
        assert_eq!(extracted.catalog.tools[0].returns, ValueKind::Unit);
    }

    #[test]
    fn missing_handler_and_label_fail() {
        let def = ToolDef::<Fixture>::new("Bare", "No body").param::<String>("x");
        assert_eq!(
            extract_defs(meta(), vec![def]).unwrap_err(),
            SchemaError::MissingHandler { tool: "Bare".into() }
        );

        let def = ToolDef::<Fixture>::new("Quiet", " ").handler(echo);
        assert!(matches!(
            extract_defs(meta(), vec![def]),
            Err(SchemaError::MissingLabel { .. })
        ));
    }

    #[test]
    fn empty_metadata_fails() {
        let err = extract_defs::<Fixture>(AppMetadata::new("x", ""), vec![]).unwrap_err();
        assert_eq!(err, SchemaError::InvalidMetadata(MetadataError::EmptyDescription));
    }

    #[test]
    fn icon_is_carried() {
        let extracted = extract_defs(meta(), vec![echo_def().icon("speaker")]).unwrap();
        assert_eq!(extracted.catalog.tools[0].icon.as_deref(), Some("speaker"));
    }
}

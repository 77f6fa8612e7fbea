use serde::{Deserialize, Serialize};

/// Kind of span opened for a guarded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Internal => "internal",
            SpanKind::Server => "server",
            SpanKind::Client => "client",
            SpanKind::Producer => "producer",
            SpanKind::Consumer => "consumer",
        }
    }
}

/// Declarative binding of an operation to its guards and span settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationBinding {
    /// Span name; the operation id is used when absent
    #[serde(default)]
    pub span_name: Option<String>,

    #[serde(default)]
    pub span_kind: SpanKind,

    /// When false, guard attributes are attached to the caller's current span
    #[serde(default = "default_create_new_span")]
    pub create_new_span: bool,

    /// Guard ids in declaration order (outermost first)
    #[serde(default)]
    pub guards: Vec<String>,
}

fn default_create_new_span() -> bool {
    true
}

impl OperationBinding {
    /// Bind an operation to the given guards with default span settings.
    pub fn new<I, S>(guards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OperationBinding {
            span_name: None,
            span_kind: SpanKind::Internal,
            create_new_span: true,
            guards: guards.into_iter().map(Into::into).collect(),
        }
    }

    /// Binding used for operations with no configuration entry.
    pub fn unbound() -> Self {
        OperationBinding::new(Vec::<String>::new())
    }

    /// Resolve the span name for an operation.
    pub fn span_name<'a>(&'a self, operation_id: &'a str) -> &'a str {
        match self.span_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => operation_id,
        }
    }
}

impl Default for OperationBinding {
    fn default() -> Self {
        OperationBinding::unbound()
    }
}

use std::collections::BTreeMap;
use std::time::Instant;
use uuid::Uuid;

/// Per-call snapshot handed to guards.
///
/// Holds only what guards may key or gate on: the discriminant and a
/// small map of call attributes. Dropped when the call completes.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub invocation_id: Uuid,
    pub operation_id: String,
    pub discriminant: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub started_at: Instant,
}

impl InvocationContext {
    pub fn new(operation_id: impl Into<String>) -> Self {
        InvocationContext {
            invocation_id: Uuid::new_v4(),
            operation_id: operation_id.into(),
            discriminant: None,
            attributes: BTreeMap::new(),
            started_at: Instant::now(),
        }
    }

    pub fn with_discriminant(mut self, discriminant: impl Into<String>) -> Self {
        self.discriminant = Some(discriminant.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn discriminant(&self) -> Option<&str> {
        self.discriminant.as_deref()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

//! Capability definition: the unit a model can be offered as a tool or that
//! is exposed as descriptive skill metadata.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::rag::core::{Embedding, EmbeddingProvider};
use crate::utilities::errors::SclError;

/// Kind of capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityType {
    /// Carries an executable body; eligible for invocation and tool offering.
    FunctionCall,
    /// Descriptive metadata only; never offered as a tool, never invoked.
    Skill,
}

impl CapabilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FunctionCall => "function_call",
            Self::Skill => "skill",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function_call" => Some(Self::FunctionCall),
            "skill" => Some(Self::Skill),
            _ => None,
        }
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Function part of a tool schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the arguments.
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

fn function_type() -> String {
    "function".to_string()
}

/// Tool schema presented verbatim to the completion provider.
///
/// Serializes to `{"type": "function", "function": {name, description, parameters}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmDescription {
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: FunctionSchema,
}

impl LlmDescription {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            kind: function_type(),
            function: FunctionSchema {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Names of all declared parameters.
    pub fn parameter_names(&self) -> Vec<String> {
        self.function
            .parameters
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Parameters the caller must supply.
    ///
    /// Uses the schema's `required` list; a schema without one treats every
    /// declared property as required.
    pub fn required_parameters(&self) -> Vec<String> {
        match self.function.parameters.get("required").and_then(Value::as_array) {
            Some(required) => required
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            None => self.parameter_names(),
        }
    }
}

/// One invocable or advertisable unit.
///
/// Immutable after construction. The embedding is derived from
/// `description` on first access and shared by every clone.
#[derive(Clone, Serialize, Deserialize)]
pub struct Capability {
    name: String,
    #[serde(rename = "type")]
    kind: CapabilityType,
    description: String,
    #[serde(default)]
    original_body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    llm_description: Option<LlmDescription>,
    /// Key into the function table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_impl: Option<String>,
    #[serde(skip)]
    embedding: Arc<OnceCell<Embedding>>,
}

impl Capability {
    /// A directly invocable capability. The implementation key defaults to
    /// the capability name.
    pub fn function_call(
        name: impl Into<String>,
        description: impl Into<String>,
        llm_description: LlmDescription,
    ) -> Self {
        let name = name.into();
        Self {
            function_impl: Some(name.clone()),
            name,
            kind: CapabilityType::FunctionCall,
            description: description.into(),
            original_body: Value::Null,
            llm_description: Some(llm_description),
            embedding: Arc::new(OnceCell::new()),
        }
    }

    /// A skill: metadata only.
    pub fn skill(name: impl Into<String>, description: impl Into<String>, metadata: Value) -> Self {
        Self {
            name: name.into(),
            kind: CapabilityType::Skill,
            description: description.into(),
            original_body: metadata,
            llm_description: None,
            function_impl: None,
            embedding: Arc::new(OnceCell::new()),
        }
    }

    pub fn with_original_body(mut self, body: Value) -> Self {
        self.original_body = body;
        self
    }

    /// Point the capability at a differently named function-table entry.
    pub fn with_function_impl(mut self, key: impl Into<String>) -> Self {
        if self.kind == CapabilityType::FunctionCall {
            self.function_impl = Some(key.into());
        }
        self
    }

    /// Seed the embedding cache with a previously computed vector.
    pub fn with_embedding(self, embedding: Embedding) -> Self {
        let cell = OnceCell::new();
        // A fresh cell cannot already be set.
        let _ = cell.set(embedding);
        Self {
            embedding: Arc::new(cell),
            ..self
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CapabilityType {
        self.kind
    }

    pub fn is_skill(&self) -> bool {
        self.kind == CapabilityType::Skill
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn original_body(&self) -> &Value {
        &self.original_body
    }

    pub fn llm_description(&self) -> Option<&LlmDescription> {
        self.llm_description.as_ref()
    }

    pub fn function_impl(&self) -> Option<&str> {
        match self.kind {
            CapabilityType::FunctionCall => self.function_impl.as_deref(),
            CapabilityType::Skill => None,
        }
    }

    /// The embedding if it has already been derived.
    pub fn cached_embedding(&self) -> Option<&[f32]> {
        self.embedding.get().map(Vec::as_slice)
    }

    /// The description embedding, derived at most once.
    pub async fn embedding(&self, embedder: &dyn EmbeddingProvider) -> Result<&[f32], SclError> {
        let vector = self
            .embedding
            .get_or_try_init(|| async {
                log::debug!("Embedding description of capability '{}'", self.name);
                embedder.embed(&self.description).await
            })
            .await?;
        Ok(vector.as_slice())
    }
}

impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.original_body == other.original_body
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("type", &self.kind)
            .field("description", &self.description)
            .field("function_impl", &self.function_impl)
            .field("embedded", &self.embedding.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        fn provider_name(&self) -> &str {
            "counting"
        }

        async fn embed(&self, text: &str) -> Result<Embedding, SclError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    fn add_schema() -> LlmDescription {
        LlmDescription::new(
            "add",
            "Compute the sum of two numbers",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number"},
                    "b": {"type": "number"}
                },
                "required": ["a", "b"]
            }),
        )
    }

    #[tokio::test]
    async fn test_embedding_is_memoized() {
        let embedder = CountingEmbedder::default();
        let cap = Capability::function_call("add", "sum of two numbers", add_schema());

        let first = cap.embedding(&embedder).await.unwrap().to_vec();
        let second = cap.embedding(&embedder).await.unwrap().to_vec();

        assert_eq!(first, second);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clones_share_embedding_cache() {
        let embedder = CountingEmbedder::default();
        let cap = Capability::function_call("add", "sum of two numbers", add_schema());
        let clone = cap.clone();

        cap.embedding(&embedder).await.unwrap();
        clone.embedding(&embedder).await.unwrap();

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert!(clone.cached_embedding().is_some());
    }

    #[tokio::test]
    async fn test_seeded_embedding_skips_provider() {
        let embedder = CountingEmbedder::default();
        let cap = Capability::skill("pdf", "work with pdf files", Value::Null)
            .with_embedding(vec![0.5, 0.5]);

        assert_eq!(cap.embedding(&embedder).await.unwrap(), &[0.5, 0.5]);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_skill_has_no_function_impl() {
        let skill = Capability::skill("art", "algorithmic art", Value::Null).with_function_impl("x");
        assert!(skill.is_skill());
        assert!(skill.function_impl().is_none());
        assert!(skill.llm_description().is_none());
    }

    #[test]
    fn test_function_impl_defaults_to_name() {
        let cap = Capability::function_call("add", "sum", add_schema());
        assert_eq!(cap.function_impl(), Some("add"));
        assert_eq!(cap.kind(), CapabilityType::FunctionCall);
    }

    #[test]
    fn test_llm_description_wire_shape() {
        let json = serde_json::to_value(add_schema()).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "add");
        assert_eq!(json["function"]["parameters"]["required"][1], "b");
    }

    #[test]
    fn test_required_parameters_fallback_to_properties() {
        let desc = LlmDescription::new(
            "echo",
            "echo text",
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}}),
        );
        assert_eq!(desc.required_parameters(), vec!["text".to_string()]);
    }

    #[test]
    fn test_equality_ignores_schema_and_embedding() {
        let a = Capability::function_call("add", "sum", add_schema());
        let b = Capability::function_call("add", "sum", LlmDescription::new("add", "other", Value::Null))
            .with_embedding(vec![1.0]);
        assert_eq!(a, b);
        let c = a.clone().with_original_body(serde_json::json!("def add(a, b): ..."));
        assert_ne!(a, c);
    }

    #[test]
    fn test_serde_roundtrip_keeps_type_tag() {
        let cap = Capability::function_call("add", "sum", add_schema());
        let json = serde_json::to_value(&cap).unwrap();
        assert_eq!(json["type"], "function_call");
        let back: Capability = serde_json::from_value(json).unwrap();
        assert_eq!(back, cap);
        assert!(back.cached_embedding().is_none());
    }
}

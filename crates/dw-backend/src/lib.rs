//! dw-backend: LLM adapters that turn a denial record into a suggested rule.
//!
//! Every provider implements [`Suggester`], which the watcher pipeline takes
//! as an injected capability rather than reaching for a shared client.

pub mod anthropic;
pub mod error;
pub mod http;
pub mod mock;
pub mod openai;
pub mod prompt;

use async_trait::async_trait;

pub use anthropic::AnthropicClient;
pub use error::BackendError;
pub use mock::{MockConfig, MockResponse, MockSuggester};
pub use openai::OpenAiClient;

/// Something that can propose a policy rule for one raw denial line.
#[async_trait]
pub trait Suggester: Send + Sync {
    /// Short backend name used in logs and output (e.g. "openai").
    fn name(&self) -> &str;

    /// Return the suggested rule text for `line`.
    async fn suggest(&self, line: &str) -> Result<String, BackendError>;
}

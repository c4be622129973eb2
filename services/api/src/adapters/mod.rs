pub mod anthropic_llm;
pub mod db;
pub mod memory;
pub mod openai_llm;
pub mod stripe;

pub use anthropic_llm::AnthropicAdapter;
pub use db::DbAdapter;
pub use memory::MemoryAdapter;
pub use openai_llm::OpenAiCompatibleAdapter;
pub use stripe::StripeAdapter;

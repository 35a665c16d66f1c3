pub mod db;
pub mod gemini_vision;
pub mod openai_vision;
pub mod prompts;

pub use db::DbAdapter;
pub use gemini_vision::GeminiVisionAdapter;
pub use openai_vision::OpenAiVisionAdapter;

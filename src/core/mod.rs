pub mod context;
pub mod eog;
pub mod llm;
pub mod ollama;
pub mod openai;

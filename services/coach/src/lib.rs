pub mod archive;
pub mod config;
pub mod console;
pub mod gemini_client;
pub mod openai_client;
pub mod prompt_loader;
pub mod providers;

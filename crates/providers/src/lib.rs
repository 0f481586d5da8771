//! LLM Provider implementations for Grimoire.
//!
//! All providers implement the `grimoire_core::Provider` trait. Every
//! backend the NPC programs talk to (Docker Model Runner, Ollama, llama.cpp)
//! speaks the OpenAI chat-completions dialect.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

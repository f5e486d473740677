pub mod assets;
pub mod dialogue;
pub mod llm;
pub mod mixing;
pub mod production;
pub mod project;
pub mod registry;
pub mod serialization;
pub mod tts;

mod console;

use anyhow::Result;
use console::Console;
use dialogue2audio::core::config::Config;
use dialogue2audio::core::io::{NativeStorage, Storage};
use dialogue2audio::core::session::SessionContext;
use dialogue2audio::services::assets::AssetLibrary;
use dialogue2audio::services::llm::{create_llm, DialogueWriter};
use dialogue2audio::services::production::ProductionEngine;
use dialogue2audio::services::tts::create_speech_client;
use log::warn;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load Config
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid speech settings.");
            return Err(e);
        }
    };

    config.ensure_directories()?;
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());

    // 2. Initialize speech client and fetch voices
    let speech = create_speech_client(&config)?;
    let voices = match speech.list_voices().await {
        Ok(voices) => voices,
        Err(e) => {
            warn!("Could not fetch voices: {:#}", e);
            Vec::new()
        }
    };
    let mut engine = ProductionEngine::new(speech, None, config.voice_settings.clone());
    engine.set_voices(voices.clone());

    // 3. Initialize LLM (optional)
    let writer = match &config.llm {
        Some(llm_config) => Some(DialogueWriter::new(create_llm(llm_config)?)),
        None => None,
    };

    // 4. Open session, resuming one when an id is given
    let session = match std::env::args().nth(1) {
        Some(id) => SessionContext::resume(&config.session_folder, &id, storage.clone())?,
        None => SessionContext::new(&config.session_folder, storage.clone())?,
    };

    let assets = AssetLibrary::from_config(&config, storage);
    let mut console = Console::new(config, session, engine, writer, assets, voices);
    console.run().await?;

    Ok(())
}

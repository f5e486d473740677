use crate::core::error::{DialogueError, DialogueResult};
use crate::core::model::DialogueDocument;
use crate::core::session::SessionContext;
use crate::core::workspace::{Workspace, ARTIFACT_EXT};
use crate::services::serialization::{self, InterchangeDocument};
use anyhow::Context;
use log::{debug, info, warn};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const TEXT_ENTRY: &str = "dialogue.txt";
const AUDIO_PREFIX: &str = "audio/";

/// Copies line artifacts and any joined tracks into `export/audio/`.
async fn export_audio(workspace: &Workspace) -> DialogueResult<Vec<String>> {
    let storage = workspace.storage();
    let export_dir = workspace.export_audio_dir();
    storage.delete(&export_dir).await?;

    let mut sources: Vec<String> = workspace
        .artifact_line_numbers()
        .await?
        .into_iter()
        .map(|n| workspace.line_artifact(n))
        .collect();
    for track in [workspace.joined_track(), workspace.background_track()] {
        if storage.exists(&track).await? {
            sources.push(track);
        }
    }

    let mut names = Vec::with_capacity(sources.len());
    for source in sources {
        let Some(name) = Path::new(&source).file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let target = Path::new(&export_dir).join(name).to_string_lossy().to_string();
        storage.write(&target, &storage.read(&source).await?).await?;
        names.push(name.to_string());
    }
    debug!("Exported {} audio files", names.len());
    Ok(names)
}

/// Writes the export directory and packs it into `project/project.zip`.
/// Returns the archive path.
pub async fn bundle_project(session: &SessionContext, document: &DialogueDocument) -> DialogueResult<String> {
    let workspace = &session.workspace;
    let storage = workspace.storage();

    let text_path = serialization::export_dialogue(workspace, document).await?;
    let audio_names = export_audio(workspace).await?;

    let mut entries = vec![(TEXT_ENTRY.to_string(), storage.read(&text_path).await?)];
    for name in audio_names {
        let path = Path::new(&workspace.export_audio_dir())
            .join(&name)
            .to_string_lossy()
            .to_string();
        entries.push((format!("{}{}", AUDIO_PREFIX, name), storage.read(&path).await?));
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (entry_name, data) in &entries {
        writer.start_file(entry_name.as_str(), options)
            .with_context(|| format!("Failed to add {} to the project archive", entry_name))?;
        writer.write_all(data)
            .with_context(|| format!("Failed to write {} into the project archive", entry_name))?;
    }
    let archive = writer
        .finish()
        .context("Failed to finish project archive")?
        .into_inner();

    let archive_path = workspace.project_archive();
    storage.write(&archive_path, &archive).await?;
    info!("Project bundled at {} ({} files)", archive_path, entries.len());
    Ok(archive_path)
}

/// Unpacks a project archive into the session: line artifacts are restored,
/// the dialogue text is parsed and returned. Derived tracks are not restored.
pub async fn import_project(session: &mut SessionContext, archive: &[u8]) -> DialogueResult<InterchangeDocument> {
    let mut text: Option<String> = None;
    let mut artifacts: Vec<(u32, Vec<u8>)> = Vec::new();

    {
        let mut reader = ZipArchive::new(Cursor::new(archive))
            .map_err(|e| DialogueError::StructuralImport(format!("not a project archive: {}", e)))?;
        for i in 0..reader.len() {
            let mut entry = reader
                .by_index(i)
                .map_err(|e| DialogueError::StructuralImport(format!("corrupt project archive: {}", e)))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().trim_start_matches("./").to_string();
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .with_context(|| format!("Failed to read {} from archive", name))?;

            if name == TEXT_ENTRY {
                text = Some(String::from_utf8_lossy(&data).to_string());
            } else if let Some(n) = name
                .strip_prefix(AUDIO_PREFIX)
                .and_then(Workspace::parse_artifact_name)
            {
                artifacts.push((n, data));
            } else if !name.ends_with(&format!(".{}", ARTIFACT_EXT)) {
                warn!("Ignoring unexpected archive entry {}", name);
            }
        }
    }

    let text = text.ok_or_else(|| {
        DialogueError::StructuralImport(format!("project archive has no {}", TEXT_ENTRY))
    })?;
    let document = serialization::import_text(&text)?;

    let workspace = &session.workspace;
    workspace.clear_audio().await?;
    session.production.clear();
    for (n, data) in &artifacts {
        workspace.storage().write(&workspace.line_artifact(*n), data).await?;
    }
    info!(
        "Imported project: {} lines of dialogue, {} audio files",
        document.dialogue.len(),
        artifacts.len()
    );
    Ok(document)
}

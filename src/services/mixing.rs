use crate::core::error::{DialogueError, DialogueResult};
use crate::core::session::SessionContext;
use crate::services::assets::{AssetKind, AssetLibrary};
use crate::utils::audio::AudioClip;
use anyhow::Result;
use log::info;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundOptions {
    pub fade_in: bool,
    pub fade_out: bool,
    /// How far to lower the bed, in dB. The sign is ignored.
    pub lower_db: f32,
}

impl Default for BackgroundOptions {
    fn default() -> Self {
        Self {
            fade_in: true,
            fade_out: true,
            lower_db: 0.0,
        }
    }
}

/// Lays `bed` under `joined`. The bed is looped or cut to the joined length,
/// lowered, and faded over `fade_secs` at the track edges.
pub fn mix_background(
    joined: &AudioClip,
    bed: &AudioClip,
    options: &BackgroundOptions,
    fade_secs: f64,
) -> Result<AudioClip> {
    let mut bed = bed
        .conform(joined.sample_rate, joined.channels)?
        .fit_to_frames(joined.frames());
    bed.apply_gain_db(-options.lower_db.abs());
    if options.fade_in {
        bed.fade_in(fade_secs);
    }
    if options.fade_out {
        bed.fade_out(fade_secs);
    }
    joined.overlay(&bed, 0.0)
}

/// Mixes a named background into `audio/dialogue_background.wav`. The joined
/// track is read, never rewritten, and must reflect the current line audio.
pub async fn apply_background(
    session: &mut SessionContext,
    assets: &AssetLibrary,
    background_name: &str,
    options: &BackgroundOptions,
    fade_secs: f64,
) -> DialogueResult<AudioClip> {
    let workspace = &session.workspace;
    let joined_path = workspace.joined_track();
    if !session.production.joined_current() || !workspace.storage().exists(&joined_path).await? {
        return Err(DialogueError::StaleJoin);
    }
    let joined = workspace.read_clip(&joined_path).await?;
    let bed = assets.load(AssetKind::Background, background_name).await?;
    info!(
        "Background settings: fade in {}, fade out {}, lower {} dB",
        options.fade_in, options.fade_out, options.lower_db
    );

    let mixed = mix_background(&joined, &bed, options, fade_secs)?;
    workspace.write_clip(&workspace.background_track(), &mixed).await?;
    session.production.mark_background();
    info!("Added background {} to {}", background_name, workspace.background_track());
    Ok(mixed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::{NativeStorage, Storage};
    use std::sync::Arc;

    fn constant(secs: f64, rate: u32, value: f32) -> AudioClip {
        let mut clip = AudioClip::silence(secs, rate, 1);
        clip.samples.iter_mut().for_each(|s| *s = value);
        clip
    }

    #[test]
    fn test_bed_is_looped_to_track_length() -> Result<()> {
        let joined = AudioClip::silence(3.0, 1000, 1);
        let bed = constant(1.0, 1000, 0.2);
        let options = BackgroundOptions {
            fade_in: false,
            fade_out: false,
            lower_db: 0.0,
        };
        let mixed = mix_background(&joined, &bed, &options, 1.0)?;
        assert_eq!(mixed.frames(), 3000);
        assert!((mixed.samples[2500] - 0.2).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_long_bed_is_cut_and_lowered() -> Result<()> {
        let joined = constant(1.0, 1000, 0.1);
        let bed = constant(5.0, 1000, 0.4);
        let options = BackgroundOptions {
            fade_in: false,
            fade_out: false,
            lower_db: 6.0,
        };
        let mixed = mix_background(&joined, &bed, &options, 0.0)?;
        assert_eq!(mixed.frames(), 1000);
        assert!((mixed.samples[500] - (0.1 + 0.4 * 0.5012)).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_fades_at_edges() -> Result<()> {
        let joined = AudioClip::silence(4.0, 1000, 1);
        let bed = constant(4.0, 1000, 0.5);
        let mixed = mix_background(&joined, &bed, &BackgroundOptions::default(), 1.0)?;
        assert_eq!(mixed.samples[0], 0.0);
        assert!((mixed.samples[500] - 0.25).abs() < 1e-3);
        assert!((mixed.samples[2000] - 0.5).abs() < 1e-6);
        assert!(mixed.samples[3999] < 0.01);
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_background_keeps_joined_track() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path().to_str().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
        let mut session = SessionContext::resume(&format!("{}/session", root), "s1", storage.clone())?;
        let assets = AssetLibrary::new(&format!("{}/fx", root), &format!("{}/bg", root), storage.clone());

        storage
            .write(&format!("{}/bg/rain.wav", root), &constant(0.5, 8000, 0.3).to_wav_bytes()?)
            .await?;

        assert!(matches!(
            apply_background(&mut session, &assets, "rain", &BackgroundOptions::default(), 3.0).await,
            Err(DialogueError::StaleJoin)
        ));

        let joined_path = session.workspace.joined_track();
        session.workspace.write_clip(&joined_path, &constant(2.0, 8000, 0.1)).await?;
        session.production.mark_joined();
        let before = storage.read(&joined_path).await?;

        let mixed = apply_background(&mut session, &assets, "rain", &BackgroundOptions::default(), 3.0).await?;
        assert!((mixed.duration_secs() - 2.0).abs() < 1e-9);
        assert_eq!(storage.read(&joined_path).await?, before);
        assert!(storage.exists(&session.workspace.background_track()).await?);
        assert!(session.production.background_current());

        assert!(matches!(
            apply_background(&mut session, &assets, "wind", &BackgroundOptions::default(), 3.0).await,
            Err(DialogueError::Resolution { kind: "background", .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_background_refuses_out_of_date_join() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path().to_str().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
        let mut session = SessionContext::resume(&format!("{}/session", root), "s1", storage.clone())?;
        let assets = AssetLibrary::new(&format!("{}/fx", root), &format!("{}/bg", root), storage.clone());
        storage
            .write(&format!("{}/bg/rain.wav", root), &constant(0.5, 8000, 0.3).to_wav_bytes()?)
            .await?;

        // joined file left over on disk from an earlier join
        session
            .workspace
            .write_clip(&session.workspace.joined_track(), &constant(2.0, 8000, 0.1))
            .await?;
        session.production.mark_joined();
        apply_background(&mut session, &assets, "rain", &BackgroundOptions::default(), 3.0).await?;
        let background = storage.read(&session.workspace.background_track()).await?;

        // a line changed after the join
        session.production.invalidate_tracks();
        assert!(matches!(
            apply_background(&mut session, &assets, "rain", &BackgroundOptions::default(), 3.0).await,
            Err(DialogueError::StaleJoin)
        ));
        assert!(!session.production.background_current());
        assert_eq!(storage.read(&session.workspace.background_track()).await?, background);
        Ok(())
    }
}

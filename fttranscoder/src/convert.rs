//! Conversion d'une piste FLAC en ALAC via ffmpeg
//!
//! La commande est construite en une passe : entrées (source + pochette
//! éventuelle), codec ALAC, rééchantillonnage et tramage uniquement si la
//! source dépasse 48 kHz / 16 bits, copie des métadonnées avec `sort_artist`
//! forcé, tags ID3v2.3.

use std::ffi::OsString;
use std::path::Path;
use tracing::{debug, error, info};

use crate::album_art::find_album_art;
use crate::metadata::{escape_metadata, sort_artist_for};
use crate::probe::{probe_source, SourceFormat};
use crate::{Transcoder, TranscodeError, MIN_ARTIFACT_BYTES, TARGET_BIT_DEPTH, TARGET_SAMPLE_RATE};

pub(crate) async fn run(
    transcoder: &Transcoder,
    source: &Path,
    destination: &Path,
) -> Result<u64, TranscodeError> {
    info!(
        source = %source.display(),
        destination = %destination.display(),
        "Transcoding file using ffmpeg..."
    );

    let album_dir = source.parent().unwrap_or_else(|| Path::new("."));
    let album_art = find_album_art(album_dir);
    if let Some(art) = &album_art {
        debug!(album_art = %art.display(), "Found album art");
    }

    let sort_artist = sort_artist_for(transcoder.source_root(), source);
    debug!(sort_artist = %sort_artist, "Setting sorting artist for the music client");

    let format = probe_source(source).await;
    info!(
        sample_rate = format.sample_rate,
        bit_depth = format.bit_depth,
        "Detected source file sample rate and bit depth"
    );

    if format.sample_rate > TARGET_SAMPLE_RATE {
        info!(
            old_sample_rate = format.sample_rate,
            new_sample_rate = TARGET_SAMPLE_RATE,
            "Sample rate of the destination file will be changed"
        );
    }
    if format.bit_depth > TARGET_BIT_DEPTH {
        info!(
            old_bit_depth = format.bit_depth,
            new_bit_depth = TARGET_BIT_DEPTH,
            "Bit depth of the destination file will be changed"
        );
    }

    let args = build_ffmpeg_args(
        source,
        destination,
        album_art.as_deref(),
        format,
        &sort_artist,
    );
    debug!(
        command = %format_args_for_log(&args),
        "ffmpeg parameters"
    );

    let output = tokio::process::Command::new("ffmpeg")
        .args(&args)
        .output()
        .await
        .map_err(|source| TranscodeError::Spawn {
            program: "ffmpeg",
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        error!(status = %output.status, stderr = %stderr, "Failed to invoke ffmpeg");

        return Err(TranscodeError::Encoder {
            status: output.status,
            stderr,
        });
    }

    let meta = tokio::fs::metadata(destination)
        .await
        .map_err(|source| TranscodeError::OutputMissing {
            path: destination.to_path_buf(),
            source,
        })?;

    if meta.len() < MIN_ARTIFACT_BYTES {
        error!(
            destination = %destination.display(),
            size = meta.len(),
            "Transcoded file is suspiciously small, discarding it"
        );
        let _ = tokio::fs::remove_file(destination).await;

        return Err(TranscodeError::OutputTooSmall { size: meta.len() });
    }

    info!(
        source = %source.display(),
        destination = %destination.display(),
        size = meta.len(),
        "File transcoded successfully"
    );

    Ok(meta.len())
}

/// Construit la ligne d'arguments ffmpeg
///
/// Fonction pure, testée indépendamment de tout processus.
pub(crate) fn build_ffmpeg_args(
    source: &Path,
    destination: &Path,
    album_art: Option<&Path>,
    format: SourceFormat,
    sort_artist: &str,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();

    args.push("-i".into());
    args.push(source.into());

    if let Some(art) = album_art {
        args.push("-i".into());
        args.push(art.into());

        args.push("-map".into());
        args.push("0:a".into());
        args.push("-map".into());
        args.push("1".into());
        args.push("-c:a".into());
        args.push("alac".into());
        args.push("-c:v".into());
        args.push("copy".into());
        args.push("-disposition:v".into());
        args.push("attached_pic".into());
    } else {
        args.push("-map".into());
        args.push("0:a".into());
        args.push("-c:a".into());
        args.push("alac".into());
    }

    if format.sample_rate > TARGET_SAMPLE_RATE {
        args.push("-af".into());
        args.push("aresample=48000:resampler=soxr:precision=28".into());
    } else {
        args.push("-ar".into());
        args.push(format.sample_rate.to_string().into());
    }

    if format.bit_depth > TARGET_BIT_DEPTH {
        args.push("-sample_fmt".into());
        args.push("s16p".into());
        args.push("-dither_method".into());
        args.push("triangular".into());
    }

    args.push("-map_metadata".into());
    args.push("0".into());
    args.push("-metadata".into());
    args.push(format!("sort_artist={}", escape_metadata(sort_artist)).into());
    args.push("-write_id3v2".into());
    args.push("1".into());
    args.push("-id3v2_version".into());
    args.push("3".into());
    args.push(destination.into());
    args.push("-y".into());
    args.push("-loglevel".into());
    args.push("error".into());
    args.push("-stats".into());

    args
}

fn format_args_for_log(args: &[OsString]) -> String {
    let mut line = String::from("ffmpeg");
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has(args: &[OsString], wanted: &str) -> bool {
        args.iter().any(|a| a == wanted)
    }

    fn position(args: &[OsString], wanted: &str) -> usize {
        args.iter().position(|a| a == wanted).unwrap()
    }

    #[test]
    fn test_cd_quality_keeps_rate_and_depth() {
        let args = build_ffmpeg_args(
            Path::new("/m/a/01.flac"),
            Path::new("/c/key.m4a"),
            None,
            SourceFormat {
                sample_rate: 44_100,
                bit_depth: 16,
            },
            "Artist",
        );

        assert!(has(&args, "-ar"));
        assert!(has(&args, "44100"));
        assert!(!has(&args, "-af"));
        assert!(!has(&args, "-dither_method"));
        assert!(has(&args, "alac"));
        assert!(has(&args, "sort_artist=Artist"));
    }

    #[test]
    fn test_hires_source_is_downsampled_and_dithered() {
        let args = build_ffmpeg_args(
            Path::new("/m/a/01.flac"),
            Path::new("/c/key.m4a"),
            None,
            SourceFormat {
                sample_rate: 192_000,
                bit_depth: 24,
            },
            "Artist",
        );

        assert!(has(&args, "-af"));
        assert!(has(&args, "aresample=48000:resampler=soxr:precision=28"));
        assert!(!has(&args, "-ar"));
        assert!(has(&args, "-sample_fmt"));
        assert!(has(&args, "s16p"));
        assert!(has(&args, "-dither_method"));
        assert!(has(&args, "triangular"));
    }

    #[test]
    fn test_album_art_is_attached() {
        let args = build_ffmpeg_args(
            Path::new("/m/a/01.flac"),
            Path::new("/c/key.m4a"),
            Some(Path::new("/m/a/cover.jpg")),
            SourceFormat::default(),
            "Artist",
        );

        assert!(has(&args, "/m/a/cover.jpg"));
        assert!(has(&args, "-disposition:v"));
        assert!(has(&args, "attached_pic"));
        assert!(has(&args, "copy"));
    }

    #[test]
    fn test_id3_tags_and_overwrite() {
        let args = build_ffmpeg_args(
            Path::new("/m/a/01.flac"),
            Path::new("/c/key.m4a"),
            None,
            SourceFormat::default(),
            "Artist",
        );

        assert!(has(&args, "-write_id3v2"));
        assert!(has(&args, "-id3v2_version"));
        assert!(has(&args, "-y"));
        // La destination précède les options finales, comme dans la
        // commande historique
        assert!(position(&args, "/c/key.m4a") < position(&args, "-y"));
    }

    #[test]
    fn test_sort_artist_is_escaped() {
        let args = build_ffmpeg_args(
            Path::new("/m/a/01.flac"),
            Path::new("/c/key.m4a"),
            None,
            SourceFormat::default(),
            "a=b;c",
        );

        assert!(has(&args, r"sort_artist=a\=b\;c"));
    }
}

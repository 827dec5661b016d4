//! Sonde ffprobe de la piste source
//!
//! Le flux audio est analysé avant encodage pour connaître son taux
//! d'échantillonnage et sa profondeur de bits : une source déjà à 44,1 kHz ne
//! doit pas être rééchantillonnée à 48 kHz, et une source 16 bits ne doit pas
//! être tramée. En cas d'échec de la sonde, les valeurs par défaut
//! (48 kHz / 16 bits) sont retenues et l'encodage continue.

use serde_json::Value;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::{TARGET_BIT_DEPTH, TARGET_SAMPLE_RATE};

/// Format détecté du premier flux audio de la source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    pub sample_rate: u32,
    pub bit_depth: u32,
}

impl Default for SourceFormat {
    fn default() -> Self {
        Self {
            sample_rate: TARGET_SAMPLE_RATE,
            bit_depth: TARGET_BIT_DEPTH,
        }
    }
}

/// Interroge ffprobe sur le premier flux audio de `path`
///
/// Ne retourne jamais d'erreur : toute défaillance de la sonde (binaire
/// absent, sortie invalide, pas de flux audio) retombe sur
/// [`SourceFormat::default`].
pub async fn probe_source(path: &Path) -> SourceFormat {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-select_streams")
        .arg("a:0")
        .arg(path)
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            parse_probe_output(&out.stdout).unwrap_or_else(|| {
                debug!(path = %path.display(), "ffprobe output had no usable audio stream");
                SourceFormat::default()
            })
        }
        Ok(out) => {
            debug!(path = %path.display(), status = %out.status, "ffprobe failed");
            SourceFormat::default()
        }
        Err(err) => {
            debug!(path = %path.display(), error = %err, "could not launch ffprobe");
            SourceFormat::default()
        }
    }
}

/// Extrait le format du JSON produit par ffprobe
///
/// ffprobe sérialise la plupart des champs numériques sous forme de chaînes,
/// les deux représentations sont acceptées.
pub(crate) fn parse_probe_output(stdout: &[u8]) -> Option<SourceFormat> {
    let json: Value = serde_json::from_slice(stdout).ok()?;
    let stream = json.get("streams")?.get(0)?;

    let sample_rate = value_as_u32(&stream["sample_rate"])
        .filter(|sr| *sr > 0)
        .unwrap_or(TARGET_SAMPLE_RATE);

    let sample_fmt = stream["sample_fmt"].as_str().unwrap_or("");
    let bit_depth = if sample_fmt.contains("s32") || sample_fmt.contains("flt") {
        32
    } else if sample_fmt.contains("s64") || sample_fmt.contains("dbl") {
        64
    } else {
        value_as_u32(&stream["bits_per_raw_sample"])
            .filter(|bd| *bd > 0)
            .unwrap_or(TARGET_BIT_DEPTH)
    };

    Some(SourceFormat {
        sample_rate,
        bit_depth,
    })
}

fn value_as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as u32),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hires_stream() {
        let json = br#"{
            "streams": [
                {
                    "codec_type": "audio",
                    "sample_rate": "96000",
                    "sample_fmt": "s32",
                    "bits_per_raw_sample": "24"
                }
            ]
        }"#;

        let format = parse_probe_output(json).unwrap();
        assert_eq!(format.sample_rate, 96_000);
        // s32 l'emporte sur bits_per_raw_sample
        assert_eq!(format.bit_depth, 32);
    }

    #[test]
    fn test_parse_cd_quality_stream() {
        let json = br#"{
            "streams": [
                {
                    "codec_type": "audio",
                    "sample_rate": "44100",
                    "sample_fmt": "s16",
                    "bits_per_raw_sample": "16"
                }
            ]
        }"#;

        let format = parse_probe_output(json).unwrap();
        assert_eq!(format.sample_rate, 44_100);
        assert_eq!(format.bit_depth, 16);
    }

    #[test]
    fn test_bits_per_raw_sample_fallback() {
        let json = br#"{
            "streams": [
                {
                    "sample_rate": "192000",
                    "sample_fmt": "s16p",
                    "bits_per_raw_sample": "24"
                }
            ]
        }"#;

        let format = parse_probe_output(json).unwrap();
        assert_eq!(format.bit_depth, 24);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = br#"{"streams": [{"codec_type": "audio"}]}"#;

        let format = parse_probe_output(json).unwrap();
        assert_eq!(format, SourceFormat::default());
    }

    #[test]
    fn test_no_stream_is_none() {
        assert!(parse_probe_output(br#"{"streams": []}"#).is_none());
        assert!(parse_probe_output(b"not json").is_none());
    }
}

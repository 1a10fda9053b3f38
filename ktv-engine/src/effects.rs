//! Audio effects presets
//!
//! One-shot application of the karaoke processing preset to the audio
//! engine. Stateless; nothing is remembered between calls.

use crate::ports::AudioEffects;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Parameter list applied when a karaoke room starts
pub fn karaoke_preset() -> Vec<(&'static str, Value)> {
    vec![
        // Echo cancellation tuned for music rather than speech
        ("audio.aec.enabled", json!(true)),
        ("audio.aec.music_mode", json!(true)),
        ("audio.aec.delay_search_ms", json!(60)),
        // Singing is not noise and should not be levelled
        ("audio.ans.enabled", json!(false)),
        ("audio.agc.enabled", json!(false)),
        ("audio.capture.high_quality", json!(true)),
        ("audio.reverb.preset", json!("ktv")),
        ("audio.reverb.wet_gain_db", json!(-6)),
    ]
}

/// Apply `preset` to `effects`
///
/// Parameters the engine rejects are logged and skipped; returns how many
/// were applied.
pub fn apply_preset(effects: &dyn AudioEffects, preset: &[(&str, Value)]) -> usize {
    let mut applied = 0;
    for (key, value) in preset {
        match effects.set_parameter(key, value) {
            Ok(()) => applied += 1,
            Err(e) => warn!("Audio effect {} rejected: {}", key, e),
        }
    }
    info!("Applied {}/{} audio effect parameters", applied, preset.len());
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RecordingEffects;

    #[test]
    fn test_preset_applied_in_order() {
        let effects = RecordingEffects::default();
        let preset = karaoke_preset();
        let applied = apply_preset(&effects, &preset);

        assert_eq!(applied, preset.len());
        let recorded = effects.applied();
        assert_eq!(recorded.first().map(|(k, _)| k.as_str()), Some("audio.aec.enabled"));
        assert_eq!(recorded.len(), preset.len());
    }

    #[test]
    fn test_rejected_parameters_are_skipped() {
        let effects = RecordingEffects::rejecting(&["audio.reverb.preset"]);
        let applied = apply_preset(&effects, &karaoke_preset());

        assert_eq!(applied, karaoke_preset().len() - 1);
        assert!(effects
            .applied()
            .iter()
            .all(|(key, _)| key != "audio.reverb.preset"));
    }
}

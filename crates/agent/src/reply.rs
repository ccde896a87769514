//! User-facing reply text.

use homebot_core::Error;
use homebot_home::EntityRecord;

use crate::executor::Outcome;

/// Attributes worth showing in a state answer, in display order.
const SHOWN_ATTRIBUTES: &[&str] = &[
    "current_temperature",
    "temperature",
    "current_humidity",
    "humidity",
    "hvac_action",
    "brightness",
    "battery_level",
];

fn display_name(entity: &EntityRecord) -> &str {
    entity.friendly_name().unwrap_or(&entity.entity_id)
}

fn state_line(entity: &EntityRecord) -> String {
    let unit = entity
        .attributes
        .get("unit_of_measurement")
        .and_then(|v| v.as_str())
        .map(|u| format!(" {}", u))
        .unwrap_or_default();
    let mut line = format!("{}: {}{}", display_name(entity), entity.state, unit);
    for key in SHOWN_ATTRIBUTES {
        if let Some(value) = entity.attributes.get(*key) {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            line.push_str(&format!("\n  {}: {}", key, value));
        }
    }
    line
}

pub fn outcome_text(outcome: &Outcome) -> String {
    match outcome {
        Outcome::State { entity } => format!("📊 {}", state_line(entity)),
        Outcome::AlreadyInState { entity } => format!(
            "ℹ️ {} zaten '{}' durumunda, bir şey yapmadım.",
            display_name(entity),
            entity.state
        ),
        Outcome::Executed {
            call,
            entity,
            warning,
        } => {
            let mut text = format!("✅ {}.{} → {}", call.domain, call.service, call.entity_id);
            if let Some(entity) = entity {
                text.push_str(&format!("\nYeni durum: {}", entity.state));
            }
            if let Some(w) = warning {
                text.push_str(&format!("\n⚠️ Doğrulanamadı: {}", w));
            }
            text
        }
        Outcome::DryRun { call } => format!(
            "🧪 Dry-run: {}.{} → {} (gönderilmedi)",
            call.domain, call.service, call.entity_id
        ),
    }
}

/// Failure text. Distinct from every success reply so users can tell
/// "didn't work" from "nothing to do".
pub fn error_text(err: &Error) -> String {
    match err {
        Error::ProviderUnavailable { .. } => {
            "⚠️ Dil modeli şu anda yanıt vermiyor. Lütfen daha sonra tekrar deneyin.".to_string()
        }
        Error::DiscoveryUnavailable(_) | Error::PlatformUnavailable(_) => {
            "⚠️ Home Assistant şu anda erişilemiyor. Hiçbir işlem yapılmadı.".to_string()
        }
        Error::NotConfigured(what) => format!("❌ Yapılandırma eksik: {}", what),
        other => format!("❌ Komut uygulanamadı: {}", other),
    }
}

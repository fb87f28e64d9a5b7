use anyhow::{anyhow, Result};
use isolang::Language;

/// Language utilities for ISO language code handling
///
/// Transcription languages travel through the system as short codes
/// (ISO 639-1 where one exists). These helpers turn codes into
/// human-readable names for chat messages and map the English language
/// names some detection services return back to codes.

/// Placeholder used when detection could not determine a language
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Normalize a language code to ISO 639-2/T (3-letter) format
pub fn normalize_to_part2t(code: &str) -> Result<String> {
    let normalized_code = code.trim().to_lowercase();

    // If it's a 2-letter code, convert to 3-letter
    if normalized_code.len() == 2 {
        if let Some(lang) = Language::from_639_1(&normalized_code) {
            return Ok(lang.to_639_3().to_string());
        }
    }
    // If it's already a 3-letter code, ensure it's ISO 639-2/T
    else if normalized_code.len() == 3 {
        if Language::from_639_3(&normalized_code).is_some() {
            return Ok(normalized_code);
        }

        // ISO 639-2/B codes that differ from their 639-2/T form
        let part2t = match normalized_code.as_str() {
            "fre" => Some("fra"),
            "ger" => Some("deu"),
            "dut" => Some("nld"),
            "gre" => Some("ell"),
            "chi" => Some("zho"),
            "cze" => Some("ces"),
            "per" => Some("fas"),
            "rum" => Some("ron"),
            "slo" => Some("slk"),
            _ => None,
        };
        if let Some(part2t) = part2t {
            return Ok(part2t.to_string());
        }
    }

    Err(anyhow!("Cannot normalize invalid language code: {}", code))
}

/// Get the language name from a code
pub fn get_language_name(code: &str) -> Result<String> {
    let normalized = normalize_to_part2t(code)?;
    let lang = Language::from_639_3(&normalized)
        .ok_or_else(|| anyhow!("Failed to get language from code: {}", normalized))?;

    Ok(lang.to_name().to_string())
}

/// Human-readable label for a code, e.g. `fr (French)`.
/// Codes that are not ISO codes are shown as-is.
pub fn describe_language(code: &str) -> String {
    match get_language_name(code) {
        Ok(name) => format!("{} ({})", code, name),
        Err(_) => code.to_string(),
    }
}

/// Turn a detection result into a short code.
///
/// Accepts either a code (`"fr"`, `"fra"`) or an English language name
/// (`"french"`, as returned by OpenAI-compatible `verbose_json`
/// responses). Anything unrecognised becomes [`UNKNOWN_LANGUAGE`].
pub fn detected_language_code(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return UNKNOWN_LANGUAGE.to_string();
    }

    if let Ok(part2t) = normalize_to_part2t(value) {
        if let Some(lang) = Language::from_639_3(&part2t) {
            return lang
                .to_639_1()
                .map(|c| c.to_string())
                .unwrap_or(part2t);
        }
    }

    let mut name = value.to_lowercase();
    if let Some(first) = name.get(0..1) {
        name = format!("{}{}", first.to_uppercase(), &name[1..]);
    }
    match Language::from_name(&name) {
        Some(lang) => lang
            .to_639_1()
            .map(|c| c.to_string())
            .unwrap_or_else(|| lang.to_639_3().to_string()),
        None => UNKNOWN_LANGUAGE.to_string(),
    }
}

use regex_lite::Regex;

use crate::error::ProvisionError;
use crate::models::LabTemplate;

/// Device version as compared against template tags: lowercased, build suffix dropped
/// ("4.28.3M-28204577.4283M" -> "4.28.3m")
pub fn version_key(version: &str) -> String {
    version
        .trim()
        .to_lowercase()
        .split('-')
        .next()
        .unwrap_or("")
        .to_string()
}

/// Version pattern embedded in a template's image tag.
/// Only docker templates with a tagged image carry one.
pub fn template_pattern(template: &LabTemplate) -> Option<String> {
    if template.template_type != "docker" {
        return None;
    }
    let (_, tag) = template.image.rsplit_once(':')?;
    if tag.is_empty() || tag.contains('/') {
        return None;
    }
    Some(tag.trim().to_lowercase())
}

fn pattern_matches(pattern: &str, key: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == key;
    }
    let expr = pattern
        .split('*')
        .map(regex_lite::escape)
        .collect::<Vec<_>>()
        .join(".*");
    match Regex::new(&format!("^{}$", expr)) {
        Ok(re) => re.is_match(key),
        Err(e) => {
            tracing::warn!("Ignoring template pattern {:?}: {}", pattern, e);
            false
        }
    }
}

/// Pick the single template whose version pattern matches `version`.
/// Zero or several matches are both `NoMatchingTemplate`.
pub fn match_template<'a>(
    device: &str,
    version: &str,
    templates: &'a [LabTemplate],
) -> Result<&'a LabTemplate, ProvisionError> {
    let key = version_key(version);
    let matches: Vec<&LabTemplate> = templates
        .iter()
        .filter(|t| template_pattern(t).is_some_and(|p| pattern_matches(&p, &key)))
        .collect();

    match matches.as_slice() {
        [only] => Ok(*only),
        [] => Err(ProvisionError::NoMatchingTemplate {
            device: device.to_string(),
            version: version.to_string(),
            reason: format!("no docker template is tagged for {}", key),
        }),
        several => Err(ProvisionError::NoMatchingTemplate {
            device: device.to_string(),
            version: version.to_string(),
            reason: format!(
                "{} templates match {}: {}",
                several.len(),
                key,
                several.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")
            ),
        }),
    }
}

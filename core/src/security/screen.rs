use base64::Engine;

use crate::config::SecurityOptions;

use super::patterns::{
    Rule, DANGEROUS_RULES, ENCODED_PAYLOAD, ENVIRONMENT_RULES, FILE_SYSTEM_RULES, NETWORK_RULES,
    REGISTRY_RULES,
};
use super::{IssueCategory, SecurityIssue, SecurityResult};

/// Screen script text against the dangerous-operation tables and the
/// capability flags in `options`.
pub fn screen(content: &str, options: &SecurityOptions) -> SecurityResult {
    let mut issues = Vec::new();
    scan(content, options, None, &mut issues);
    SecurityResult::from_issues(issues)
}

fn capability_rules(options: &SecurityOptions) -> Vec<&'static [Rule]> {
    let mut tables: Vec<&'static [Rule]> = Vec::with_capacity(4);
    if !options.allow_network_access {
        tables.push(NETWORK_RULES.as_slice());
    }
    if !options.allow_file_system_access {
        tables.push(FILE_SYSTEM_RULES.as_slice());
    }
    if !options.allow_registry_access {
        tables.push(REGISTRY_RULES.as_slice());
    }
    if !options.allow_environment_access {
        tables.push(ENVIRONMENT_RULES.as_slice());
    }
    tables
}

/// `origin_line` is set while rescanning a decoded payload so findings point
/// at the line that carried it.
fn scan(
    content: &str,
    options: &SecurityOptions,
    origin_line: Option<usize>,
    issues: &mut Vec<SecurityIssue>,
) {
    let capability = capability_rules(options);

    for (idx, line) in content.lines().enumerate() {
        let line_no = origin_line.unwrap_or(idx + 1);
        let tables = std::iter::once(DANGEROUS_RULES.as_slice()).chain(capability.iter().copied());

        for table in tables {
            for rule in table {
                if !rule.matches(line) {
                    continue;
                }
                if issues
                    .iter()
                    .any(|i| i.line == line_no && i.category == rule.category)
                {
                    continue;
                }
                let message = match origin_line {
                    Some(_) => format!("{} (inside encoded payload)", rule.message),
                    None => rule.message.to_string(),
                };
                issues.push(SecurityIssue::new(rule.category, line_no, message));
            }
        }

        // Decoded payloads are rescanned once; nested encodings are already
        // flagged as encoded commands by the outer pass.
        if origin_line.is_none() {
            if let Some(decoded) = decode_encoded_payload(line) {
                scan(&decoded, options, Some(line_no), issues);
            }
        }
    }
}

fn decode_encoded_payload(line: &str) -> Option<String> {
    let caps = ENCODED_PAYLOAD.captures(line)?;
    let payload = caps.get(1)?.as_str();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .ok()?;

    // PowerShell encodes UTF-16LE; fall back to UTF-8 for hand-rolled payloads.
    let looks_utf16 = bytes.len() >= 2
        && bytes.len() % 2 == 0
        && bytes.iter().skip(1).step_by(2).all(|b| *b == 0);
    let text = if looks_utf16 {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(&bytes).into_owned()
    };

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

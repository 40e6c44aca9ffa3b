// Module: Placeholder
// Pure text substitution over the three placeholder syntaxes.
//
// Resolution order within one text: ${ENV} first, then {{step.var}},
// then #{manual[:default]}. An environment variable may therefore expand
// into a {{...}} reference that the second pass resolves.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use uuid::Uuid;

use crate::model::{Environment, ValueType};

static ENV_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("valid env placeholder regex"));

static STEP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("valid step placeholder regex"));

static MANUAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"#\{([A-Za-z0-9_.\-]+)(?::([^}]*))?\}").expect("valid manual placeholder regex")
});

/// One `#{name}` / `#{name:default}` occurrence found in a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualInputRef {
    pub name: String,
    pub default_value: Option<String>,
}

/// Current instant as ISO-8601 with offset, at UTC.
pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Expands a value according to its environment value type.
pub fn expand_value_type(value_type: ValueType, value: &str) -> String {
    match value_type {
        ValueType::Static => value.to_string(),
        ValueType::Uuid => Uuid::new_v4().to_string(),
        ValueType::IsoTimestamp => now_utc_iso(),
    }
}

/// Resolves `${NAME}` environment placeholders.
///
/// Unknown names are left untouched, without a warning. A UUID-typed
/// variable produces a fresh value per occurrence.
pub fn resolve_env(text: &str, env: &Environment) -> String {
    replace_all(&ENV_RE, text, |caps| {
        let name = &caps[1];
        match env.variable(name) {
            Some(var) => expand_value_type(var.value_type, &var.value),
            None => caps[0].to_string(),
        }
    })
}

/// Resolves `{{stepName.variableName}}` references against the extracted
/// variable namespace. Unknown keys stay literal and push a warning.
pub fn resolve_step_vars(
    text: &str,
    extracted: &HashMap<String, String>,
    warnings: &mut Vec<String>,
) -> String {
    replace_all(&STEP_RE, text, |caps| {
        let key = caps[1].trim();
        match extracted.get(key) {
            Some(value) => value.clone(),
            None => {
                warnings.push(format!("Unresolved step variable '{{{{{}}}}}'", key));
                caps[0].to_string()
            }
        }
    })
}

/// Resolves `#{name}` / `#{name:default}` manual inputs.
///
/// Absent names fall back to the inline default, else the empty string.
pub fn resolve_manual(text: &str, manual_inputs: &HashMap<String, String>) -> String {
    replace_all(&MANUAL_RE, text, |caps| {
        let name = &caps[1];
        match manual_inputs.get(name) {
            Some(value) => value.clone(),
            None => caps
                .get(2)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        }
    })
}

/// Full resolution of one text: env, then step variables, then manual.
pub fn resolve(
    text: &str,
    env: &Environment,
    extracted: &HashMap<String, String>,
    manual_inputs: &HashMap<String, String>,
    warnings: &mut Vec<String>,
) -> String {
    let after_env = resolve_env(text, env);
    let after_steps = resolve_step_vars(&after_env, extracted, warnings);
    resolve_manual(&after_steps, manual_inputs)
}

/// Env + step variable resolution only, keeping `#{...}` intact.
/// Used to decide which manual inputs a step still needs.
pub fn resolve_except_manual(
    text: &str,
    env: &Environment,
    extracted: &HashMap<String, String>,
    warnings: &mut Vec<String>,
) -> String {
    let after_env = resolve_env(text, env);
    resolve_step_vars(&after_env, extracted, warnings)
}

/// Lists the manual input references in a text, first occurrence wins,
/// preserving order.
pub fn scan_manual_inputs(text: &str) -> Vec<ManualInputRef> {
    let mut seen: Vec<ManualInputRef> = Vec::new();
    for caps in MANUAL_RE.captures_iter(text) {
        let name = caps[1].to_string();
        if seen.iter().any(|r| r.name == name) {
            continue;
        }
        seen.push(ManualInputRef {
            name,
            default_value: caps.get(2).map(|m| m.as_str().to_string()),
        });
    }
    seen
}

// Capture-walk substitution keeping untouched spans verbatim.
fn replace_all<F>(re: &Regex, input: &str, mut replacer: F) -> String
where
    F: FnMut(&Captures) -> String,
{
    let mut result = String::with_capacity(input.len());
    let mut last_index = 0;
    for caps in re.captures_iter(input) {
        let matched = caps.get(0).expect("capture group 0 always present");
        result.push_str(&input[last_index..matched.start()]);
        result.push_str(&replacer(&caps));
        last_index = matched.end();
    }
    result.push_str(&input[last_index..]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EnvironmentVariable;

    fn env_with(vars: Vec<(&str, &str, ValueType)>) -> Environment {
        Environment {
            id: 1,
            name: "test".to_string(),
            base_url: None,
            variables: vars
                .into_iter()
                .map(|(k, v, t)| EnvironmentVariable {
                    key: k.to_string(),
                    value: v.to_string(),
                    value_type: t,
                    secret: false,
                })
                .collect(),
            default_headers: vec![],
            connectors: vec![],
            files: vec![],
        }
    }

    #[test]
    fn test_static_env_variable() {
        let env = env_with(vec![("HOST", "api.example.com", ValueType::Static)]);
        let out = resolve_env("https://${HOST}/users", &env);
        assert_eq!(out, "https://api.example.com/users");
    }

    #[test]
    fn test_unknown_env_variable_left_intact() {
        let env = env_with(vec![]);
        assert_eq!(resolve_env("x ${NOPE} y", &env), "x ${NOPE} y");
    }

    #[test]
    fn test_uuid_fresh_per_occurrence() {
        let env = env_with(vec![("ID", "", ValueType::Uuid)]);
        let out = resolve_env("${ID}/${ID}", &env);
        let parts: Vec<&str> = out.split('/').collect();
        assert_eq!(parts.len(), 2);
        assert_ne!(parts[0], parts[1]);
        assert_eq!(parts[0].len(), 36);
    }

    #[test]
    fn test_iso_timestamp_shape() {
        let env = env_with(vec![("NOW", "", ValueType::IsoTimestamp)]);
        let out = resolve_env("${NOW}", &env);
        assert!(out.contains('T'));
        assert!(out.ends_with('Z'));
    }

    #[test]
    fn test_file_reference_not_touched_by_env_pass() {
        // ${FILE:key} carries a colon, which the env pattern rejects.
        let env = env_with(vec![("FILE", "oops", ValueType::Static)]);
        assert_eq!(resolve_env("${FILE:avatar}", &env), "${FILE:avatar}");
    }

    #[test]
    fn test_step_variable_resolution() {
        let mut extracted = HashMap::new();
        extracted.insert("Login.token".to_string(), "xyz".to_string());
        let mut warnings = Vec::new();
        let out = resolve_step_vars("Bearer {{Login.token}}", &extracted, &mut warnings);
        assert_eq!(out, "Bearer xyz");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unknown_step_variable_warns_and_stays() {
        let extracted = HashMap::new();
        let mut warnings = Vec::new();
        let out = resolve_step_vars("Bearer {{Login.token}}", &extracted, &mut warnings);
        assert_eq!(out, "Bearer {{Login.token}}");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Login.token"));
    }

    #[test]
    fn test_env_var_expanding_into_step_reference() {
        let env = env_with(vec![("AUTH", "{{Login.token}}", ValueType::Static)]);
        let mut extracted = HashMap::new();
        extracted.insert("Login.token".to_string(), "abc".to_string());
        let mut warnings = Vec::new();
        let out = resolve(
            "Bearer ${AUTH}",
            &env,
            &extracted,
            &HashMap::new(),
            &mut warnings,
        );
        assert_eq!(out, "Bearer abc");
    }

    #[test]
    fn test_manual_input_from_cache() {
        let mut manual = HashMap::new();
        manual.insert("userId".to_string(), "7".to_string());
        assert_eq!(resolve_manual("/users/#{userId:42}", &manual), "/users/7");
    }

    #[test]
    fn test_manual_input_default_then_empty() {
        let manual = HashMap::new();
        assert_eq!(resolve_manual("/users/#{userId:42}", &manual), "/users/42");
        assert_eq!(resolve_manual("/users/#{userId}", &manual), "/users/");
    }

    #[test]
    fn test_scan_manual_inputs_dedupes() {
        let refs = scan_manual_inputs("/a/#{id:1}/b/#{id}/c/#{other}");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].name, "id");
        assert_eq!(refs[0].default_value, Some("1".to_string()));
        assert_eq!(refs[1].name, "other");
        assert_eq!(refs[1].default_value, None);
    }

    #[test]
    fn test_resolution_idempotent_when_everything_absent() {
        let env = env_with(vec![]);
        let extracted = HashMap::new();
        let manual = HashMap::new();
        let input = "x ${A} {{B.c}} #{d} y";
        let mut w1 = Vec::new();
        let once = resolve(input, &env, &extracted, &manual, &mut w1);
        let mut w2 = Vec::new();
        let twice = resolve(&once, &env, &extracted, &manual, &mut w2);
        assert_eq!(once, twice);
    }
}

use std::collections::HashMap;
use std::path::Path;

use action_flow::Script;
use anyhow::{Context, Result};
use tokio::fs;

/// Read a script from JSON, or YAML when the extension says so.
pub async fn load_script(path: &Path) -> Result<Script> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading script {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    );
    let script: Script = if is_yaml {
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    } else {
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    };
    script
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    Ok(script)
}

/// clap value parser for `--var KEY=VALUE`
pub fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

pub fn into_variables(pairs: Vec<(String, String)>) -> HashMap<String, String> {
    pairs.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_split_on_first_equals() {
        assert_eq!(
            parse_var("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_var("empty=").unwrap().1, "");
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[tokio::test]
    async fn yaml_and_json_scripts_load_alike() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("s.yaml");
        std::fs::write(
            &yaml,
            "name: Search\nsteps:\n  - step_id: go\n    actions:\n      - action_type: navigate\n        url: https://example.com\n",
        )
        .unwrap();
        let json = dir.path().join("s.json");
        std::fs::write(
            &json,
            r#"{"name":"Search","steps":[{"step_id":"go","actions":[{"action_type":"navigate","url":"https://example.com"}]}]}"#,
        )
        .unwrap();

        let from_yaml = load_script(&yaml).await.unwrap();
        let from_json = load_script(&json).await.unwrap();
        assert_eq!(from_yaml, from_json);
        assert_eq!(from_yaml.action_count(), 1);
    }

    #[tokio::test]
    async fn empty_scripts_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, r#"{"name":"Nothing","steps":[]}"#).unwrap();
        assert!(load_script(&path).await.is_err());
    }
}

//! Test fixtures providing common specs and configurations.

use std::path::Path;

use crate::config::Config;
use crate::spec::{ImportPattern, InlineSpec, Spec, SpecMap, CODE_MARKER, IMPORTS_MARKER};

/// Common spec fixtures
pub struct SpecFixtures;

impl SpecFixtures {
    pub fn python() -> Spec {
        Spec {
            image: "python:3-alpine".to_string(),
            entrypoint: "python3".to_string(),
            file_name: "main.py".to_string(),
            inline: Some(InlineSpec {
                template: format!("print({})", CODE_MARKER),
                import_regex: None,
            }),
            ..Default::default()
        }
    }

    pub fn go() -> Spec {
        let import_regex = ImportPattern::new(r#"import\s+"[^"]+""#).ok();
        Spec {
            image: "golang:alpine".to_string(),
            entrypoint: "go run".to_string(),
            file_name: "main.go".to_string(),
            inline: Some(InlineSpec {
                template: format!(
                    "package main\n{}\nfunc main() {{\n{}\n}}",
                    IMPORTS_MARKER, CODE_MARKER
                ),
                import_regex,
            }),
            ..Default::default()
        }
    }

    pub fn node() -> Spec {
        Spec {
            image: "node:18-alpine".to_string(),
            entrypoint: "node".to_string(),
            file_name: "index.js".to_string(),
            ..Default::default()
        }
    }

    pub fn alias(target: &str) -> Spec {
        Spec {
            use_spec: target.to_string(),
            ..Default::default()
        }
    }

    /// python3, go, node, the `py` alias and a two-hop `python` alias.
    pub fn sample_map() -> SpecMap {
        SpecMap::from([
            ("python3".to_string(), Self::python()),
            ("go".to_string(), Self::go()),
            ("node".to_string(), Self::node()),
            ("py".to_string(), Self::alias("python3")),
            ("python".to_string(), Self::alias("py")),
        ])
    }
}

/// Configuration rooted in a test directory with a short timeout.
pub fn test_config(host_root: &Path) -> Config {
    let mut config = Config::default();
    config.host_root_dir = host_root.to_string_lossy().into_owned();
    config.sandbox.timeout_seconds = 1;
    config
}

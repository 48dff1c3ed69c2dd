//! Expansion of single expressions into a spec's inline code template.

use crate::sandbox::SandboxError;
use crate::spec::{Spec, CODE_MARKER, IMPORTS_MARKER};

/// Wraps `code` into the spec's inline template.
///
/// When the template declares an import pattern, every match is moved out of
/// the code into the imports marker, one per line. The remaining code
/// replaces the code marker.
pub fn expand(spec: &Spec, code: &str) -> Result<String, SandboxError> {
    let inline = match &spec.inline {
        Some(inline) if inline.template.contains(CODE_MARKER) => inline,
        _ => return Err(SandboxError::NoInlineSupport),
    };

    let mut template = inline.template.clone();
    let mut code = code.to_string();

    if let Some(pattern) = &inline.import_regex {
        let imports: Vec<String> = pattern
            .regex()
            .find_iter(&code)
            .map(|m| m.as_str().trim().to_string())
            .collect();
        code = pattern.regex().replace_all(&code, "").trim().to_string();
        template = template.replace(IMPORTS_MARKER, &imports.join("\n"));
    }

    Ok(template.replace(CODE_MARKER, &code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ImportPattern, InlineSpec};
    use pretty_assertions::assert_eq;

    fn spec_with(template: &str, import_regex: Option<&str>) -> Spec {
        Spec {
            image: "golang:alpine".to_string(),
            entrypoint: "go run".to_string(),
            file_name: "main.go".to_string(),
            inline: Some(InlineSpec {
                template: template.to_string(),
                import_regex: import_regex.map(|p| ImportPattern::new(p).unwrap()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_expand_without_imports() {
        let spec = spec_with("print($${CODE})", None);
        assert_eq!(expand(&spec, "1 + 2").unwrap(), "print(1 + 2)");
    }

    #[test]
    fn test_expand_extracts_imports() {
        let spec = spec_with(
            "package main\n$${IMPORTS}\nfunc main() {\n$${CODE}\n}",
            Some(r#"import\s+"[^"]+""#),
        );

        let out = expand(
            &spec,
            "import \"fmt\"\nimport \"os\"\nfmt.Println(len(os.Args))",
        )
        .unwrap();

        assert_eq!(
            out,
            "package main\nimport \"fmt\"\nimport \"os\"\nfunc main() {\nfmt.Println(len(os.Args))\n}"
        );
    }

    #[test]
    fn test_expand_rejects_missing_support() {
        let mut spec = spec_with("no marker here", None);
        assert!(matches!(
            expand(&spec, "1"),
            Err(SandboxError::NoInlineSupport)
        ));

        spec.inline = None;
        assert!(matches!(
            expand(&spec, "1"),
            Err(SandboxError::NoInlineSupport)
        ));
    }
}

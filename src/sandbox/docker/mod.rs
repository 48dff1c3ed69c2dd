//! Docker isolation backend built on `bollard`.

mod provider;
mod sandbox;

pub use provider::DockerProvider;
pub use sandbox::DockerSandbox;

/// Backend type reported by [`DockerProvider`].
pub const BACKEND_TYPE: &str = "docker";

const CONTAINER_NAME_PREFIX: &str = "sandbox-runner";

/// Splits an image reference into repository and tag. A missing tag
/// defaults to `latest`. A registry port is not mistaken for a tag.
pub fn split_image(image: &str) -> (&str, &str) {
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (&image[..split], &image[split + 1..])
        }
        None => (image, "latest"),
    }
}

/// Unique container name for an execution of `language`.
pub fn container_name(language: &str) -> String {
    let language: String = language
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!(
        "{}-{}-{}",
        CONTAINER_NAME_PREFIX,
        language,
        uuid::Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_image() {
        assert_eq!(split_image("python:3-alpine"), ("python", "3-alpine"));
        assert_eq!(split_image("python"), ("python", "latest"));
        assert_eq!(
            split_image("localhost:5000/team/node"),
            ("localhost:5000/team/node", "latest")
        );
        assert_eq!(
            split_image("localhost:5000/team/node:18"),
            ("localhost:5000/team/node", "18")
        );
    }

    #[test]
    fn test_container_name() {
        let a = container_name("c++");
        let b = container_name("c++");
        assert!(a.starts_with("sandbox-runner-c---"));
        assert_ne!(a, b);
    }
}

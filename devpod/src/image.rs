const DEFAULT_REGISTRY: &str = "docker.io";
const OFFICIAL_REPOSITORY_PREFIX: &str = "library/";
const DEFAULT_TAG: &str = "latest";

/// A parsed container image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Fully qualified repository, e.g. `docker.io/library/nginx`.
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parses an image reference, qualifying short names with the default registry.
    pub fn parse(image: &str) -> ImageReference {
        let image = image.trim();

        let (remainder, digest) = match image.split_once('@') {
            Some((remainder, digest)) => (remainder, Some(digest.to_string())),
            None => (image, None),
        };

        // A colon after the last slash separates the tag, earlier ones belong to a registry port.
        let last_slash = remainder.rfind('/').map(|index| index + 1).unwrap_or(0);
        let (repository, tag) = match remainder[last_slash..].rfind(':') {
            Some(index) => {
                let split = last_slash + index;
                (
                    &remainder[..split],
                    Some(remainder[split + 1..].to_string()),
                )
            }
            None => (remainder, None),
        };

        ImageReference {
            repository: qualify_repository(repository),
            tag,
            digest,
        }
    }

    /// Returns the tag, defaulting to `latest` when the reference has none.
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }
}

fn qualify_repository(repository: &str) -> String {
    let (first, rest) = match repository.split_once('/') {
        Some((first, rest)) => (first, Some(rest)),
        None => (repository, None),
    };

    let is_registry = first.contains('.') || first.contains(':') || first == "localhost";

    match rest {
        Some(_) if is_registry => repository.to_string(),
        Some(_) => format!("{DEFAULT_REGISTRY}/{repository}"),
        None => format!("{DEFAULT_REGISTRY}/{OFFICIAL_REPOSITORY_PREFIX}{repository}"),
    }
}

/// Decides whether a container image is addressed by an image selector.
pub trait ImageMatcher: Send + Sync {
    fn matches(&self, selector: &str, image: &str) -> bool;
}

/// [`ImageMatcher`] comparing normalized image references.
///
/// A selector without a tag matches every tag of the repository. A selector with a tag or a
/// digest also requires that part to match, with `latest` assumed for untagged images.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceImageMatcher;

impl ImageMatcher for ReferenceImageMatcher {
    fn matches(&self, selector: &str, image: &str) -> bool {
        let selector = ImageReference::parse(selector);
        let image = ImageReference::parse(image);

        if selector.repository != image.repository {
            return false;
        }

        if let Some(digest) = &selector.digest {
            return image.digest.as_ref() == Some(digest);
        }

        match &selector.tag {
            Some(tag) => image.tag_or_default() == tag,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_name() {
        let reference = ImageReference::parse("nginx");

        assert_eq!(reference.repository, "docker.io/library/nginx");
        assert_eq!(reference.tag, None);
        assert_eq!(reference.tag_or_default(), "latest");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let reference = ImageReference::parse("localhost:5000/team/api:1.2");

        assert_eq!(reference.repository, "localhost:5000/team/api");
        assert_eq!(reference.tag.as_deref(), Some("1.2"));
    }

    #[test]
    fn test_parse_digest() {
        let reference = ImageReference::parse("ghcr.io/acme/web@sha256:abc");

        assert_eq!(reference.repository, "ghcr.io/acme/web");
        assert_eq!(reference.digest.as_deref(), Some("sha256:abc"));
    }

    #[test]
    fn test_matching_normalizes_docker_hub_names() {
        let matcher = ReferenceImageMatcher;

        assert!(matcher.matches("nginx", "docker.io/library/nginx:1.25"));
        assert!(matcher.matches("library/nginx:latest", "nginx"));
        assert!(matcher.matches("acme/api", "docker.io/acme/api:dev"));
        assert!(!matcher.matches("nginx:1.25", "nginx:1.26"));
        assert!(!matcher.matches("nginx", "ghcr.io/library/nginx"));
    }
}

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::model::ComponentKind;

const DEFAULT_REGISTRY: &str = "quay.io/oaas";
const TILLER_TAG: &str = "v2.16.3";
const BUILTIN_VERSIONS: &[&str] = &["2.0.0", "2.1.0"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    /// Parse `repo[:tag]`; the tag defaults to `latest`.
    pub fn parse(reference: &str) -> Option<ImageRef> {
        let reference = reference.trim();
        // digests cannot be expressed as repository:tag
        if reference.is_empty() || reference.contains('@') {
            return None;
        }
        let last_slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match reference[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&reference[..split], &reference[split + 1..])
            }
            None => (reference, "latest"),
        };
        if repository.is_empty() || tag.is_empty() {
            return None;
        }
        Some(ImageRef {
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Re-home the image under `registry`, keeping only the final path segment.
    pub fn with_registry(&self, registry: &str) -> ImageRef {
        let registry = registry.trim_end_matches('/');
        let image = self
            .repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository);
        ImageRef {
            repository: format!("{}/{}", registry, image),
            tag: self.tag.clone(),
        }
    }

    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown version {0}")]
    UnknownVersion(String),
    #[error("no image for {component} in version {version}")]
    UnknownComponent { version: String, component: String },
}

/// Version table lookup consumed by the synthesizer.
pub trait ImageResolver: Send + Sync {
    fn resolve(&self, version: &str, component: &str) -> Result<ImageRef, ResolveError>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StaticImageTable {
    /// version -> component image name -> image
    pub versions: BTreeMap<String, BTreeMap<String, ImageRef>>,
}

impl StaticImageTable {
    pub fn builtin() -> Self {
        let mut versions = BTreeMap::new();
        for version in BUILTIN_VERSIONS {
            let images = ComponentKind::ALL
                .iter()
                .map(|k| {
                    let tag = match k {
                        ComponentKind::Tiller => TILLER_TAG.to_string(),
                        _ => version.to_string(),
                    };
                    (
                        k.image_name().to_string(),
                        ImageRef {
                            repository: format!(
                                "{}/{}",
                                DEFAULT_REGISTRY,
                                k.image_name()
                            ),
                            tag,
                        },
                    )
                })
                .collect();
            versions.insert(version.to_string(), images);
        }
        Self { versions }
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_yaml(&raw)?)
    }
}

impl ImageResolver for StaticImageTable {
    fn resolve(&self, version: &str, component: &str) -> Result<ImageRef, ResolveError> {
        let images = self
            .versions
            .get(version)
            .ok_or_else(|| ResolveError::UnknownVersion(version.to_string()))?;
        images
            .get(component)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownComponent {
                version: version.to_string(),
                component: component.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_handles_tags_and_registry_ports() {
        assert_eq!(
            ImageRef::parse("quay.io/oaas/search:1.2").unwrap(),
            ImageRef {
                repository: "quay.io/oaas/search".into(),
                tag: "1.2".into()
            }
        );
        assert_eq!(
            ImageRef::parse("localhost:5000/search").unwrap(),
            ImageRef {
                repository: "localhost:5000/search".into(),
                tag: "latest".into()
            }
        );
        assert!(ImageRef::parse("").is_none());
        assert!(ImageRef::parse("repo:").is_none());
        assert!(ImageRef::parse("quay.io/oaas/search@sha256:abc").is_none());
    }

    #[test]
    fn registry_override_replaces_host() {
        let img = ImageRef::parse("quay.io/oaas/search-collector:2.1.0").unwrap();
        assert_eq!(
            img.with_registry("mirror.local:5000/").reference(),
            "mirror.local:5000/search-collector:2.1.0"
        );
        let bare = ImageRef::parse("tiller:v2").unwrap();
        assert_eq!(bare.with_registry("r.io/x").reference(), "r.io/x/tiller:v2");
    }

    #[test]
    fn builtin_table_covers_every_component() {
        let table = StaticImageTable::builtin();
        for version in BUILTIN_VERSIONS {
            for k in ComponentKind::ALL {
                assert!(table.resolve(version, k.image_name()).is_ok());
            }
        }
        assert_eq!(
            table.resolve("9.9.9", "tiller"),
            Err(ResolveError::UnknownVersion("9.9.9".into()))
        );
    }

    #[test]
    fn yaml_table_loads() {
        let table = StaticImageTable::from_yaml(
            r#"
versions:
  "3.0.0":
    search-collector:
      repository: example.com/search
      tag: "3.0.0-rc1"
"#,
        )
        .unwrap();
        assert_eq!(
            table.resolve("3.0.0", "search-collector").unwrap().tag,
            "3.0.0-rc1"
        );
        assert!(matches!(
            table.resolve("3.0.0", "tiller"),
            Err(ResolveError::UnknownComponent { .. })
        ));
    }
}

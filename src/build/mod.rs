/// Building custom controller-manager images from source
///
/// A [`BuildRequest`] names one allow-listed component and exactly one source:
/// a local checkout, or a tag of the component's upstream repository that is
/// cloned into a scratch directory. The image tag is the short hash of the
/// checked-out commit.
///
/// Pushing requires the caller to be logged in to the registry already.
use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::config::{Settings, ENV_IMAGE_REGISTRY};
use crate::utils::command::{CommandRunner, Invocation};

/// Components that can be built, with their upstream repositories
pub const COMPONENTS: &[(&str, &str)] = &[
    (
        "cloud-provider-azure",
        "https://github.com/kubernetes-sigs/cloud-provider-azure.git",
    ),
    (
        "azure-file",
        "https://github.com/kubernetes-sigs/azurefile-csi-driver.git",
    ),
    (
        "azure-disk",
        "https://github.com/kubernetes-sigs/azuredisk-csi-driver.git",
    ),
];

/// Make targets that build and push the CCM and CNM images, in order
const CCM_TARGETS: &[&str] = &[
    "build-ccm-image-amd64",
    "push-ccm-image-amd64",
    "build-node-image-linux-amd64",
    "push-node-image-linux-amd64",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildRequestError {
    #[error("component {0:?} not supported")]
    UnsupportedComponent(String),

    #[error("exactly one of target path and target tag must be set")]
    AmbiguousSource,

    #[error("component {0:?} has no image build actions")]
    NoBuildActions(String),
}

/// An allow-listed component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component {
    name: &'static str,
    repository: &'static str,
}

impl Component {
    /// Look up a component by name in the allow-list
    pub fn from_name(name: &str) -> Result<Self, BuildRequestError> {
        COMPONENTS
            .iter()
            .find(|(known, _)| *known == name)
            .map(|&(name, repository)| Component { name, repository })
            .ok_or_else(|| BuildRequestError::UnsupportedComponent(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn repository(&self) -> &'static str {
        self.repository
    }

    /// Ordered make targets that build and publish this component's images
    pub fn build_targets(&self) -> &'static [&'static str] {
        match self.name {
            "cloud-provider-azure" => CCM_TARGETS,
            _ => &[],
        }
    }
}

/// Where the source tree comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildSource {
    Path(PathBuf),
    Tag(String),
}

/// A validated build request
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub component: Component,
    pub source: BuildSource,
}

impl BuildRequest {
    /// Validate flags into a request; nothing is touched on failure
    pub fn new(
        component: &str,
        path: Option<PathBuf>,
        tag: Option<String>,
    ) -> Result<Self, BuildRequestError> {
        let component = Component::from_name(component)?;

        let path = path.filter(|p| !p.as_os_str().is_empty());
        let tag = tag.filter(|t| !t.is_empty());
        let source = match (path, tag) {
            (Some(path), None) => BuildSource::Path(path),
            (None, Some(tag)) => BuildSource::Tag(tag),
            _ => return Err(BuildRequestError::AmbiguousSource),
        };

        Ok(Self { component, source })
    }
}

/// Short commit hash used as the image tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTag(String);

impl ImageTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds and pushes component images through a [`CommandRunner`]
pub struct ImageBuilder<'a> {
    runner: &'a dyn CommandRunner,
    clone_dir: PathBuf,
    image_registry: Option<String>,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(runner: &'a dyn CommandRunner, settings: &Settings) -> Self {
        Self {
            runner,
            clone_dir: settings.git_clone_dir.clone(),
            image_registry: settings.image_registry.clone(),
        }
    }

    /// Resolve the source tree, build and push the images, and return the tag
    pub async fn build(&self, request: &BuildRequest) -> Result<ImageTag> {
        let component = request.component;
        if component.build_targets().is_empty() {
            return Err(BuildRequestError::NoBuildActions(component.name().to_string()).into());
        }

        let tree = match &request.source {
            BuildSource::Path(path) => {
                info!("Making {} images with path {}", component.name(), path.display());
                path.clone()
            }
            BuildSource::Tag(tag) => {
                info!("Making {} images with tag {}", component.name(), tag);
                self.clone_at_tag(component, tag)
                    .await
                    .with_context(|| {
                        format!("Failed to check out {} at tag {:?}", component.name(), tag)
                    })?
            }
        };

        let image_tag = self.make_images(component, &tree).await?;
        info!("{} images with tag {:?} are ready", component.name(), image_tag.as_str());
        Ok(image_tag)
    }

    /// Fresh clone of the component repository at `refs/tags/<tag>`
    async fn clone_at_tag(&self, component: Component, tag: &str) -> Result<PathBuf> {
        let dest = self.clone_dir.join(component.name());

        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            info!("Removing previous clone at {}", dest.display());
            tokio::fs::remove_dir_all(&dest)
                .await
                .with_context(|| format!("Failed to remove {}", dest.display()))?;
        }
        tokio::fs::create_dir_all(&self.clone_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.clone_dir.display()))?;

        let dest_arg = dest.display().to_string();
        self.runner
            .run(&Invocation::new("git").args(["clone", component.repository(), dest_arg.as_str()]))
            .await
            .with_context(|| format!("Failed to clone from URL {:?}", component.repository()))?;

        let tag_ref = format!("refs/tags/{}", tag);
        let checkout = Invocation::new("git").args([
            "-C",
            dest_arg.as_str(),
            "checkout",
            tag_ref.as_str(),
        ]);
        self.runner
            .run(&checkout)
            .await
            .context("Failed to check out tag")?;

        Ok(dest)
    }

    async fn make_images(&self, component: Component, tree: &Path) -> Result<ImageTag> {
        let tree_arg = tree.display().to_string();

        self.runner
            .run(&Invocation::new("git").args(["-C", tree_arg.as_str(), "show", "--stat"]))
            .await
            .context("Failed to show commit")?;

        for &target in component.build_targets() {
            info!("Running make {}", target);
            let mut invocation = Invocation::new("make").args(["-C", tree_arg.as_str(), target]);
            if let Some(registry) = &self.image_registry {
                invocation = invocation.env(ENV_IMAGE_REGISTRY, registry.as_str());
            }
            self.runner
                .run(&invocation)
                .await
                .with_context(|| format!("Failed to make {}", target))?;
        }

        let rev_parse = Invocation::new("git").args([
            "-C",
            tree_arg.as_str(),
            "rev-parse",
            "--short=7",
            "HEAD",
        ]);
        let stdout = self
            .runner
            .output(&rev_parse)
            .await
            .context("Failed to get image tag")?;

        let tag = stdout.trim();
        if tag.is_empty() {
            anyhow::bail!("Failed to get image tag: git rev-parse printed nothing");
        }
        Ok(ImageTag::new(tag))
    }
}

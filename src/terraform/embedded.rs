//! Terraform configurations compiled into the binary.

use crate::config::ProviderKind;

/// A file synced into the Terraform working directory.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EmbeddedFile {
    /// Path relative to the working directory.
    pub path: &'static str,
    /// File content.
    pub contents: &'static str,
}

const CLOUD_INIT: &str = "cloud-init/user-data.yaml.tftpl";

const SCALEWAY: &[EmbeddedFile] = &[
    EmbeddedFile {
        path: "variables.tf",
        contents: include_str!("../../terraform/scaleway/variables.tf"),
    },
    EmbeddedFile {
        path: "main.tf",
        contents: include_str!("../../terraform/scaleway/main.tf"),
    },
    EmbeddedFile {
        path: "outputs.tf",
        contents: include_str!("../../terraform/scaleway/outputs.tf"),
    },
    EmbeddedFile {
        path: "providers.tf",
        contents: include_str!("../../terraform/scaleway/providers.tf"),
    },
    EmbeddedFile {
        path: "versions.tf",
        contents: include_str!("../../terraform/scaleway/versions.tf"),
    },
    EmbeddedFile {
        path: CLOUD_INIT,
        contents: include_str!("../../terraform/scaleway/cloud-init/user-data.yaml.tftpl"),
    },
];

const DIGITALOCEAN: &[EmbeddedFile] = &[
    EmbeddedFile {
        path: "variables.tf",
        contents: include_str!("../../terraform/digitalocean/variables.tf"),
    },
    EmbeddedFile {
        path: "main.tf",
        contents: include_str!("../../terraform/digitalocean/main.tf"),
    },
    EmbeddedFile {
        path: "outputs.tf",
        contents: include_str!("../../terraform/digitalocean/outputs.tf"),
    },
    EmbeddedFile {
        path: "versions.tf",
        contents: include_str!("../../terraform/digitalocean/versions.tf"),
    },
    EmbeddedFile {
        path: CLOUD_INIT,
        contents: include_str!("../../terraform/digitalocean/cloud-init/user-data.yaml.tftpl"),
    },
];

/// Returns the embedded file set for `kind`.
#[must_use]
pub const fn for_provider(kind: ProviderKind) -> &'static [EmbeddedFile] {
    match kind {
        ProviderKind::Scaleway => SCALEWAY,
        ProviderKind::DigitalOcean => DIGITALOCEAN,
    }
}

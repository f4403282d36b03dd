//! Machine image registry
//!
//! Maps OS ids to per-region, per-architecture AMI ids so environment files
//! can say "ubuntu22.04" instead of hardcoding image ids.

use crate::errors::{HolodeckError, Result};

/// A registry entry: one supported OS.
#[derive(Debug, Clone, Copy)]
pub struct OsEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub default_username: &'static str,
    /// (region, arch, ami id)
    images: &'static [(&'static str, &'static str, &'static str)],
}

impl OsEntry {
    pub fn regions(&self) -> Vec<&'static str> {
        let mut regions: Vec<_> = self.images.iter().map(|(region, _, _)| *region).collect();
        regions.dedup();
        regions
    }
}

static REGISTRY: &[OsEntry] = &[
    OsEntry {
        id: "ubuntu20.04",
        name: "Ubuntu 20.04 LTS (Focal Fossa)",
        default_username: "ubuntu",
        images: &[
            ("us-east-1", "x86_64", "ami-0c4f7023847b90322"),
            ("us-east-1", "arm64", "ami-07041441b708acbd6"),
            ("us-west-2", "x86_64", "ami-036d46416a34a611c"),
            ("us-west-2", "arm64", "ami-0899f7de7c62e2a05"),
            ("eu-west-1", "x86_64", "ami-0d64bb532e0502c46"),
            ("eu-north-1", "x86_64", "ami-0989fb15ce71ba39e"),
        ],
    },
    OsEntry {
        id: "ubuntu22.04",
        name: "Ubuntu 22.04 LTS (Jammy Jellyfish)",
        default_username: "ubuntu",
        images: &[
            ("us-east-1", "x86_64", "ami-0e2c8caa4b6378d8c"),
            ("us-east-1", "arm64", "ami-05d47d29a4c2d19e1"),
            ("us-west-2", "x86_64", "ami-05134c8ef96964280"),
            ("us-west-2", "arm64", "ami-0eb11ab33f229b26c"),
            ("eu-west-1", "x86_64", "ami-0d940f23d527c3ab1"),
            ("eu-west-1", "arm64", "ami-0a89fa9a6d8c7ad98"),
            ("eu-north-1", "x86_64", "ami-075449515af5df0d1"),
            ("eu-north-1", "arm64", "ami-02eb7a4783e7e9317"),
        ],
    },
    OsEntry {
        id: "ubuntu24.04",
        name: "Ubuntu 24.04 LTS (Noble Numbat)",
        default_username: "ubuntu",
        images: &[
            ("us-east-1", "x86_64", "ami-04b70fa74e45c3917"),
            ("us-east-1", "arm64", "ami-00beae93a2d981137"),
            ("us-west-2", "x86_64", "ami-0cf2b4e024cdb6960"),
            ("us-west-2", "arm64", "ami-00f3c44a2de45a590"),
            ("eu-west-1", "x86_64", "ami-0776c814353b4814d"),
            ("eu-north-1", "x86_64", "ami-011e54f70c1c91e17"),
        ],
    },
];

/// Normalise an architecture string to `x86_64` or `arm64`.
pub fn normalize_arch(arch: &str) -> Result<&'static str> {
    match arch.to_ascii_lowercase().as_str() {
        "amd64" | "x86_64" => Ok("x86_64"),
        "arm64" | "aarch64" => Ok("arm64"),
        other => Err(HolodeckError::ConfigInvalid(format!(
            "unknown architecture {other:?}: expected amd64/x86_64 or arm64/aarch64"
        ))),
    }
}

/// Look up one OS entry by id.
pub fn get(os_id: &str) -> Option<&'static OsEntry> {
    REGISTRY.iter().find(|entry| entry.id == os_id)
}

/// All supported OS entries.
pub fn list() -> &'static [OsEntry] {
    REGISTRY
}

/// Resolve an AMI id for (os, region, arch).
pub fn resolve(os_id: &str, region: &str, arch: &str) -> Result<String> {
    let entry = get(os_id).ok_or_else(|| {
        HolodeckError::ConfigInvalid(format!(
            "unknown OS id {os_id:?}; run `holodeck os list` for supported ids"
        ))
    })?;
    let arch = normalize_arch(arch)?;
    entry
        .images
        .iter()
        .find(|(r, a, _)| *r == region && *a == arch)
        .map(|(_, _, ami)| ami.to_string())
        .ok_or_else(|| {
            HolodeckError::Provider(format!(
                "no {os_id} image registered for region {region} on {arch}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_normalisation_table() {
        for arch in ["amd64", "AMD64", "x86_64"] {
            assert_eq!(normalize_arch(arch).unwrap(), "x86_64");
        }
        for arch in ["arm64", "aarch64", "AARCH64"] {
            assert_eq!(normalize_arch(arch).unwrap(), "arm64");
        }
        assert!(normalize_arch("riscv64").is_err());
    }

    #[test]
    fn test_resolve_known_image() {
        let ami = resolve("ubuntu22.04", "us-west-2", "amd64").unwrap();
        assert!(ami.starts_with("ami-"));

        // amd64 and x86_64 resolve identically
        assert_eq!(
            resolve("ubuntu22.04", "us-west-2", "amd64").unwrap(),
            resolve("ubuntu22.04", "us-west-2", "x86_64").unwrap()
        );
    }

    #[test]
    fn test_resolve_unknown_os_and_region() {
        assert!(matches!(
            resolve("slackware1.0", "us-west-2", "x86_64"),
            Err(HolodeckError::ConfigInvalid(_))
        ));
        assert!(matches!(
            resolve("ubuntu22.04", "mars-north-1", "x86_64"),
            Err(HolodeckError::Provider(_))
        ));
    }

    #[test]
    fn test_list_and_get_agree() {
        for entry in list() {
            assert_eq!(get(entry.id).unwrap().id, entry.id);
        }
        assert!(get("ubuntu22.04").is_some());
        assert!(get("ubuntu9.10").is_none());
    }
}

//! Descriptor emitters - render a desired config into Terraform HCL
//!
//! Pure string rendering; nothing here touches the network or the
//! filesystem. The free-tier `check` blocks are generated from the same
//! quota tables the validator enforces, so the descriptor can never assert
//! a different limit than the validator checked.

use reconcile::{DescriptorRenderer, DesiredConfig, Enforcement, QuotaSpec, ResourceKind};
use std::fmt::Write as _;

// ============================================================================
// OCI
// ============================================================================

pub struct OciRenderer {
    pub compartment_id: String,
    pub region: String,
    pub availability_domain: String,
    pub ssh_public_key: String,
    pub quotas: &'static [QuotaSpec],
}

impl DescriptorRenderer for OciRenderer {
    fn render(&self, desired: &DesiredConfig) -> String {
        let mut tf = String::new();

        tf.push_str(
            "terraform {\n  required_providers {\n    oci = {\n      source = \"oracle/oci\"\n    }\n  }\n}\n\n",
        );
        let _ = writeln!(tf, "provider \"oci\" {{\n  region = \"{}\"\n}}\n", region_or(desired, &self.region));
        let _ = writeln!(
            tf,
            "locals {{\n  compartment_id = \"{}\"\n  availability_domain = \"{}\"\n}}\n",
            self.compartment_id, self.availability_domain
        );

        // one VCN and subnet, adopted when they already exist
        tf.push_str(
            r#"resource "oci_core_vcn" "vcn" {
  compartment_id = local.compartment_id
  display_name   = "cumulo-vcn"
  cidr_blocks    = ["10.0.0.0/16"]
  dns_label      = "cumulo"
}

resource "oci_core_subnet" "subnet" {
  compartment_id = local.compartment_id
  vcn_id         = oci_core_vcn.vcn.id
  display_name   = "cumulo-subnet"
  cidr_block     = "10.0.0.0/24"
  dns_label      = "main"
}

resource "oci_core_internet_gateway" "igw" {
  compartment_id = local.compartment_id
  vcn_id         = oci_core_vcn.vcn.id
  display_name   = "cumulo-igw"
}

"#,
        );

        for group in &desired.groups {
            if group.count == 0 {
                continue;
            }
            let shape = match group.class.as_str() {
                "amd" => "VM.Standard.E2.1.Micro",
                "arm" => "VM.Standard.A1.Flex",
                other => other,
            };
            let hostnames = group
                .hostnames
                .iter()
                .map(|h| format!("\"{h}\""))
                .collect::<Vec<_>>()
                .join(", ");

            let _ = writeln!(
                tf,
                "data \"oci_core_images\" \"{class}\" {{\n  compartment_id = local.compartment_id\n  operating_system = \"Canonical Ubuntu\"\n  shape = \"{shape}\"\n  sort_by = \"TIMECREATED\"\n  sort_order = \"DESC\"\n}}\n",
                class = group.class,
            );
            let _ = writeln!(
                tf,
                "resource \"oci_core_instance\" \"{class}\" {{\n  count               = {count}\n  compartment_id      = local.compartment_id\n  availability_domain = local.availability_domain\n  display_name        = element([{hostnames}], count.index)\n  shape               = \"{shape}\"",
                class = group.class,
                count = group.count,
            );
            if shape == "VM.Standard.A1.Flex" {
                // ocpus and memory are per instance
                let _ = writeln!(
                    tf,
                    "  shape_config {{\n    ocpus         = {}\n    memory_in_gbs = {}\n  }}",
                    group.ocpus, group.memory_gb
                );
            }
            let _ = writeln!(
                tf,
                "  create_vnic_details {{\n    subnet_id        = oci_core_subnet.subnet.id\n    assign_public_ip = true\n  }}\n  source_details {{\n    source_type             = \"image\"\n    source_id               = data.oci_core_images.{class}.images[0].id\n    boot_volume_size_in_gbs = {boot}\n  }}\n  metadata = {{\n    ssh_authorized_keys = \"{key}\"\n  }}\n}}\n",
                class = group.class,
                boot = group.boot_volume_gb,
                key = self.ssh_public_key,
            );
        }

        for (i, gb) in desired.block_volume_gb.iter().enumerate() {
            let _ = writeln!(
                tf,
                "resource \"oci_core_volume\" \"extra_{i}\" {{\n  compartment_id      = local.compartment_id\n  availability_domain = local.availability_domain\n  display_name        = \"cumulo-volume-{i}\"\n  size_in_gbs         = {gb}\n}}\n",
            );
        }

        tf.push_str(&check_blocks(self.quotas, desired));
        tf
    }
}

// ============================================================================
// GCP
// ============================================================================

pub struct GcpRenderer {
    pub project: String,
    pub region: String,
    pub zone: String,
    pub ssh_public_key: String,
    pub quotas: &'static [QuotaSpec],
}

impl DescriptorRenderer for GcpRenderer {
    fn render(&self, desired: &DesiredConfig) -> String {
        let mut tf = String::new();
        let region = region_or(desired, &self.region);

        tf.push_str(
            "terraform {\n  required_providers {\n    google = {\n      source = \"hashicorp/google\"\n    }\n  }\n}\n\n",
        );
        let _ = writeln!(
            tf,
            "provider \"google\" {{\n  project = \"{}\"\n  region  = \"{region}\"\n  zone    = \"{}\"\n}}\n",
            self.project, self.zone
        );

        tf.push_str(
            r#"resource "google_compute_network" "network" {
  name                    = "cumulo-network"
  auto_create_subnetworks = false
}

resource "google_compute_subnetwork" "subnet" {
  name          = "cumulo-subnet"
  network       = google_compute_network.network.id
  ip_cidr_range = "10.0.0.0/24"
}

resource "google_compute_firewall" "ssh" {
  name    = "cumulo-allow-ssh"
  network = google_compute_network.network.id
  allow {
    protocol = "tcp"
    ports    = ["22"]
  }
  source_ranges = ["0.0.0.0/0"]
}

"#,
        );

        for group in &desired.groups {
            if group.count == 0 {
                continue;
            }
            let machine_type = match group.class.as_str() {
                "micro" => "e2-micro",
                other => other,
            };
            let hostnames = group
                .hostnames
                .iter()
                .map(|h| format!("\"{h}\""))
                .collect::<Vec<_>>()
                .join(", ");

            let _ = writeln!(
                tf,
                "resource \"google_compute_instance\" \"{class}\" {{\n  count        = {count}\n  name         = element([{hostnames}], count.index)\n  machine_type = \"{machine_type}\"\n  boot_disk {{\n    initialize_params {{\n      image = \"debian-cloud/debian-12\"\n      size  = {boot}\n      type  = \"pd-standard\"\n    }}\n  }}\n  network_interface {{\n    subnetwork = google_compute_subnetwork.subnet.id\n    access_config {{}}\n  }}\n  metadata = {{\n    ssh-keys = \"{key}\"\n  }}\n}}\n",
                class = group.class,
                count = group.count,
                boot = group.boot_volume_gb,
                key = self.ssh_public_key,
            );
        }

        for (i, gb) in desired.block_volume_gb.iter().enumerate() {
            let _ = writeln!(
                tf,
                "resource \"google_compute_disk\" \"extra_{i}\" {{\n  name = \"cumulo-disk-{i}\"\n  type = \"pd-standard\"\n  size = {gb}\n}}\n",
            );
        }

        tf.push_str(&check_blocks(self.quotas, desired));
        tf
    }
}

// ============================================================================
// Check blocks
// ============================================================================

fn region_or<'a>(desired: &'a DesiredConfig, fallback: &'a str) -> &'a str {
    if desired.region.is_empty() {
        fallback
    } else {
        &desired.region
    }
}

/// Generate a `check` block per hard quota the config puts usage against
///
/// The asserted totals are the gross usage of the rendered config, so a
/// descriptor edited by hand still fails its own checks when it outgrows
/// the free tier.
fn check_blocks(quotas: &[QuotaSpec], desired: &DesiredConfig) -> String {
    let mut tf = String::new();
    for quota in quotas {
        if quota.enforcement != Enforcement::Hard {
            continue;
        }
        let Some(usage) = gross_usage(quota, desired) else {
            continue;
        };
        let name = quota.category.replace('-', "_");
        let _ = writeln!(
            tf,
            "check \"free_tier_{name}\" {{\n  assert {{\n    condition     = {usage} <= {limit}\n    error_message = \"{category} usage {usage} exceeds the always-free limit of {limit}{unit}\"\n  }}\n}}\n",
            limit = quota.limit,
            category = quota.category,
            unit = quota.unit,
        );
    }
    tf
}

fn gross_usage(quota: &QuotaSpec, desired: &DesiredConfig) -> Option<u64> {
    let usage = match quota.kind {
        ResourceKind::ComputeInstance => desired
            .groups
            .iter()
            .filter(|g| quota.class.is_none_or(|class| g.class == class))
            .map(|g| match quota.unit {
                reconcile::QuotaUnit::Count => g.count,
                reconcile::QuotaUnit::Ocpus => g.count * g.ocpus,
                reconcile::QuotaUnit::Gigabytes => g.count * g.memory_gb,
            })
            .sum(),
        ResourceKind::Disk => {
            desired
                .groups
                .iter()
                .map(|g| g.count * g.boot_volume_gb)
                .sum::<u64>()
                + desired.block_volume_gb.iter().sum::<u64>()
        }
        ResourceKind::Network => 1,
        _ => return None,
    };
    Some(usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{gcp, oci};
    use reconcile::InstanceGroup;

    fn oci_renderer() -> OciRenderer {
        OciRenderer {
            compartment_id: "ocid1.tenancy.oc1..x".into(),
            region: "eu-stockholm-1".into(),
            availability_domain: "AD-1".into(),
            ssh_public_key: "ssh-ed25519 AAAA test".into(),
            quotas: oci::QUOTAS,
        }
    }

    fn desired() -> DesiredConfig {
        DesiredConfig {
            region: "eu-stockholm-1".into(),
            groups: vec![
                InstanceGroup {
                    class: "amd".into(),
                    count: 2,
                    hostnames: vec!["amd-1".into(), "amd-2".into()],
                    ocpus: 1,
                    memory_gb: 1,
                    boot_volume_gb: 47,
                },
                InstanceGroup {
                    class: "arm".into(),
                    count: 1,
                    hostnames: vec!["arm-1".into()],
                    ocpus: 4,
                    memory_gb: 24,
                    boot_volume_gb: 47,
                },
            ],
            block_volume_gb: vec![50],
        }
    }

    #[test]
    fn test_oci_render_covers_groups_and_volumes() {
        let tf = oci_renderer().render(&desired());
        assert!(tf.contains("resource \"oci_core_instance\" \"amd\""));
        assert!(tf.contains("VM.Standard.A1.Flex"));
        assert!(tf.contains("\"amd-1\", \"amd-2\""));
        assert!(tf.contains("boot_volume_size_in_gbs = 47"));
        assert!(tf.contains("oci_core_volume\" \"extra_0"));
        assert!(tf.contains("ssh-ed25519 AAAA test"));
    }

    #[test]
    fn test_oci_check_blocks_match_quota_table() {
        let tf = oci_renderer().render(&desired());
        for quota in oci::QUOTAS {
            if quota.enforcement == Enforcement::Hard {
                let name = quota.category.replace('-', "_");
                assert!(
                    tf.contains(&format!("check \"free_tier_{name}\"")),
                    "missing check for {}",
                    quota.category
                );
                assert!(tf.contains(&format!("<= {}", quota.limit)));
            }
        }
        // soft quotas never become checks
        assert!(!tf.contains("reserved_addresses"));
    }

    #[test]
    fn test_gcp_render() {
        let renderer = GcpRenderer {
            project: "my-project".into(),
            region: "us-west1".into(),
            zone: "us-west1-a".into(),
            ssh_public_key: "user:ssh-ed25519 AAAA".into(),
            quotas: gcp::QUOTAS,
        };
        let config = DesiredConfig {
            region: "us-west1".into(),
            groups: vec![InstanceGroup {
                class: "micro".into(),
                count: 1,
                hostnames: vec!["free-1".into()],
                ocpus: 1,
                memory_gb: 1,
                boot_volume_gb: 30,
            }],
            block_volume_gb: vec![],
        };

        let tf = renderer.render(&config);
        assert!(tf.contains("e2-micro"));
        assert!(tf.contains("google_compute_network"));
        assert!(tf.contains("check \"free_tier_micro_instances\""));
        assert!(tf.contains("size  = 30"));
    }

    #[test]
    fn test_empty_groups_are_skipped() {
        let mut config = desired();
        config.groups[0].count = 0;
        let tf = oci_renderer().render(&config);
        assert!(!tf.contains("resource \"oci_core_instance\" \"amd\""));
        assert!(tf.contains("resource \"oci_core_instance\" \"arm\""));
    }
}

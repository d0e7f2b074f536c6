//! Claim and job requests issued by the migration commands.

use shell_escape::unix::escape;

use crate::cluster::{ClaimRequest, JobMount, JobRequest};

const RCLONE_VERSION: &str = "v1.64.2";
const SOURCE_MOUNT: &str = "/src_vol";
const DESTINATION_MOUNT: &str = "/dst_vol";

/// How much of the chain directory a copy job transfers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CopyLevel {
    /// Synchronise the whole chain directory.
    #[default]
    All,
    /// Synchronise only the `paritydb/full` database.
    ChainOnly,
    /// List both sides without copying anything.
    PrintOnly,
}

impl CopyLevel {
    const fn subdirectory(self) -> &'static str {
        match self {
            Self::All | Self::PrintOnly => "",
            Self::ChainOnly => "paritydb/full/",
        }
    }
}

/// Name of the throwaway claim used to provision a destination volume.
#[must_use]
pub fn dummy_claim_name(existing_claim: &str) -> String {
    format!("dummy-for-{existing_claim}")
}

/// Name of the job copying data out of `existing_claim`.
#[must_use]
pub fn copy_job_name(existing_claim: &str) -> String {
    format!("migrate-{existing_claim}")
}

/// Name of the job deleting chain data from `claim`.
#[must_use]
pub fn delete_chain_job_name(claim: &str) -> String {
    format!("rm-rocksdb-{claim}")
}

/// Claim name generated for a stateful pod by its volume claim template.
#[must_use]
pub fn pod_claim_name(prefix: &str, pod: &str) -> String {
    format!("{prefix}{pod}")
}

/// Builds the single-writer claim that triggers provisioning.
#[must_use]
pub fn dummy_claim(name: &str, capacity: &str, storage_class: &str) -> ClaimRequest {
    ClaimRequest {
        name: name.to_owned(),
        capacity: capacity.to_owned(),
        storage_class: storage_class.to_owned(),
        access_mode: String::from("ReadWriteOnce"),
    }
}

/// Inputs for [`copy_job`].
#[derive(Clone, Debug)]
pub struct CopyJobSpec<'a> {
    /// Job name.
    pub name: &'a str,
    /// Claim copied from; mounted read-only.
    pub source_claim: &'a str,
    /// Claim copied to.
    pub destination_claim: &'a str,
    /// Chain directory under `chains/`.
    pub chain: &'a str,
    /// Amount of data to copy.
    pub level: CopyLevel,
    /// Container image with `apt-get` available.
    pub image: &'a str,
}

/// Builds the job that copies the chain directory between two claims.
#[must_use]
pub fn copy_job(spec: &CopyJobSpec<'_>) -> JobRequest {
    let extra = spec.level.subdirectory();
    let source = format!("{SOURCE_MOUNT}/chains/{}/{extra}", spec.chain);
    let destination = format!("{DESTINATION_MOUNT}/chains/{}/{extra}", spec.chain);
    let source_arg = escape(source.as_str().into());
    let destination_arg = escape(destination.as_str().into());

    let script = if spec.level == CopyLevel::PrintOnly {
        join_commands(&[
            format!("ls -lhxc {source_arg}"),
            format!("ls -lhxc {destination_arg}"),
        ])
    } else {
        let archive = format!("rclone-{RCLONE_VERSION}-linux-amd64");
        join_commands(&[
            String::from("apt-get update"),
            String::from("apt-get install -y wget unzip"),
            format!("wget https://downloads.rclone.org/{RCLONE_VERSION}/{archive}.zip"),
            format!("unzip {archive}.zip"),
            format!("cp {archive}/rclone /usr/bin/"),
            format!(
                "rclone sync {source_arg} {destination_arg} --progress --multi-thread-streams=8"
            ),
            format!("du -shxc {source_arg} {destination_arg}"),
        ])
    };

    JobRequest {
        name: spec.name.to_owned(),
        image: spec.image.to_owned(),
        script,
        mounts: vec![
            JobMount {
                name: String::from("src"),
                claim: spec.source_claim.to_owned(),
                path: String::from(SOURCE_MOUNT),
                read_only: true,
            },
            JobMount {
                name: String::from("dst"),
                claim: spec.destination_claim.to_owned(),
                path: String::from(DESTINATION_MOUNT),
                read_only: false,
            },
        ],
        backoff_limit: 1,
        ttl_seconds_after_finished: 60,
    }
}

/// Builds the job that removes a chain's database (and optionally its
/// frontier database) from a claim.
#[must_use]
pub fn delete_chain_job(
    claim: &str,
    chain: &str,
    delete_frontier: bool,
    image: &str,
) -> JobRequest {
    let chain_dir = format!("{SOURCE_MOUNT}/chains/{chain}");
    let chain_arg = escape(chain_dir.as_str().into());
    let mut targets = vec![escape(format!("{chain_dir}/db").into()).into_owned()];
    if delete_frontier {
        targets.push(escape(format!("{chain_dir}/frontier").into()).into_owned());
    }

    JobRequest {
        name: delete_chain_job_name(claim),
        image: image.to_owned(),
        script: join_commands(&[
            format!("ls -lah {chain_arg}"),
            format!("rm -rf {}", targets.join(" ")),
            format!("ls -lah {chain_arg}"),
        ]),
        mounts: vec![JobMount {
            name: String::from("src"),
            claim: claim.to_owned(),
            path: String::from(SOURCE_MOUNT),
            read_only: false,
        }],
        backoff_limit: 0,
        ttl_seconds_after_finished: 15,
    }
}

fn join_commands(parts: &[String]) -> String {
    parts.join(" && ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(level: CopyLevel) -> CopyJobSpec<'static> {
        CopyJobSpec {
            name: "migrate-node-storage-a",
            source_claim: "node-storage-a",
            destination_claim: "dummy-for-node-storage-a",
            chain: "creditcoin",
            level,
            image: "debian",
        }
    }

    #[test]
    fn copy_job_mounts_source_read_only() {
        let job = copy_job(&spec(CopyLevel::All));

        let source = job
            .mounts
            .iter()
            .find(|mount| mount.path == "/src_vol")
            .unwrap_or_else(|| panic!("source mount missing"));
        let destination = job
            .mounts
            .iter()
            .find(|mount| mount.path == "/dst_vol")
            .unwrap_or_else(|| panic!("destination mount missing"));
        assert!(source.read_only);
        assert_eq!(source.claim, "node-storage-a");
        assert!(!destination.read_only);
        assert_eq!(destination.claim, "dummy-for-node-storage-a");
        assert_eq!(job.backoff_limit, 1);
    }

    #[test]
    fn copy_job_syncs_whole_chain_directory() {
        let job = copy_job(&spec(CopyLevel::All));
        assert!(
            job.script.contains(
                "rclone sync /src_vol/chains/creditcoin/ /dst_vol/chains/creditcoin/ --progress --multi-thread-streams=8"
            ),
            "script: {}",
            job.script
        );
    }

    #[test]
    fn chain_only_copy_targets_parity_database() {
        let job = copy_job(&spec(CopyLevel::ChainOnly));
        assert!(
            job.script
                .contains("/src_vol/chains/creditcoin/paritydb/full/"),
            "script: {}",
            job.script
        );
    }

    #[test]
    fn print_only_copy_never_installs_rclone() {
        let job = copy_job(&spec(CopyLevel::PrintOnly));
        assert!(!job.script.contains("rclone"), "script: {}", job.script);
        assert!(job.script.starts_with("ls -lhxc"));
    }

    #[test]
    fn delete_chain_job_optionally_keeps_frontier() {
        let with_frontier = delete_chain_job("node-storage-a", "creditcoin3_dev", true, "debian");
        let without_frontier =
            delete_chain_job("node-storage-a", "creditcoin3_dev", false, "debian");

        assert_eq!(with_frontier.name, "rm-rocksdb-node-storage-a");
        assert!(
            with_frontier
                .script
                .contains("/src_vol/chains/creditcoin3_dev/frontier")
        );
        assert!(!without_frontier.script.contains("frontier"));
        assert_eq!(with_frontier.backoff_limit, 0);
    }

    #[test]
    fn chain_names_are_shell_escaped() {
        let job = delete_chain_job("claim", "bad name", false, "debian");
        assert!(
            job.script.contains("'/src_vol/chains/bad name/db'"),
            "script: {}",
            job.script
        );
    }

    #[test]
    fn derived_names_follow_conventions() {
        assert_eq!(dummy_claim_name("c1"), "dummy-for-c1");
        assert_eq!(copy_job_name("c1"), "migrate-c1");
        assert_eq!(pod_claim_name("node-storage-", "validator-0"), "node-storage-validator-0");
    }
}

//! Mounts command - list filesystems mounted under the base path.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use comfy_table::{Cell, Color, Table};
use tracing::instrument;
use wekafs_mount::naming::transport_dir;
use wekafs_mount::node::read_mount_table;
use wekafs_mount::options::OPTION_CONTAINER_NAME;
use wekafs_mount::{DataTransport, MountOptions, MounterGroupConfig, SystemMount, TRANSPORT_PREFERENCE};

#[derive(ClapArgs, Debug, Clone)]
pub struct Args {
    /// Mount table to read
    #[arg(long, default_value = "/proc/self/mounts", value_name = "FILE")]
    pub mount_table: PathBuf,
}

/// A mount under the base path, attributed to the transport that owns its directory.
#[derive(Debug)]
struct ManagedMount {
    transport: DataTransport,
    mount: SystemMount,
}

#[instrument(level = "info", name = "cmd::mounts", skip_all)]
pub fn execute(args: &Args, config: &MounterGroupConfig) -> Result<()> {
    let table = read_mount_table(&args.mount_table)
        .with_context(|| format!("Failed to read mount table: {}", args.mount_table.display()))?;
    let mounts = managed_mounts(table, &config.mounter.base_path);

    if mounts.is_empty() {
        eprintln!(
            "No mounts under {}.",
            config.mounter.base_path.display()
        );
        return Ok(());
    }

    let mut output = Table::new();
    output.set_header(vec!["Transport", "Filesystem", "Type", "Source", "Mountpoint", "Container"]);
    for m in &mounts {
        let transport_cell = Cell::new(m.transport).fg(match m.transport {
            DataTransport::Wekafs => Color::Blue,
            DataTransport::Nfs => Color::Magenta,
        });
        let container = m
            .mount
            .options
            .parse::<MountOptions>()
            .ok()
            .and_then(|o| o.value(OPTION_CONTAINER_NAME).map(str::to_string))
            .unwrap_or_default();
        output.add_row(vec![
            transport_cell,
            Cell::new(filesystem_name(m)),
            Cell::new(&m.mount.fstype),
            Cell::new(&m.mount.source),
            Cell::new(m.mount.mountpoint.display()),
            Cell::new(container),
        ]);
    }
    println!("{output}");
    eprintln!("{} mount(s)", mounts.len());
    Ok(())
}

fn managed_mounts(table: Vec<SystemMount>, base: &Path) -> Vec<ManagedMount> {
    table
        .into_iter()
        .filter_map(|mount| {
            let transport = TRANSPORT_PREFERENCE.iter().copied().find(|t| {
                mount.mountpoint.starts_with(transport_dir(base, *t))
                    && t.matches_fs_type(&mount.fstype)
            })?;
            Some(ManagedMount { transport, mount })
        })
        .collect()
}

/// Filesystem name from the mount source: `fs` for native, `ip:/fs` for NFS.
fn filesystem_name(m: &ManagedMount) -> &str {
    match m.transport {
        DataTransport::Wekafs => &m.mount.source,
        DataTransport::Nfs => m
            .mount
            .source
            .rsplit_once(":/")
            .map_or(m.mount.source.as_str(), |(_, fs)| fs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(source: &str, mountpoint: &str, fstype: &str) -> SystemMount {
        SystemMount {
            source: source.into(),
            mountpoint: mountpoint.into(),
            fstype: fstype.into(),
            options: "rw".into(),
        }
    }

    #[test]
    fn test_managed_mounts_filters_by_base_and_type() {
        let table = vec![
            mount("fs1", "/run/weka-fs-mounts/wekafs/fs1-ABC", "wekafs"),
            mount("10.0.0.1:/fs2", "/run/weka-fs-mounts/nfs/fs2-DEF", "nfs4"),
            mount("/dev/sda1", "/", "ext4"),
            mount("tmpfs", "/run/weka-fs-mounts/wekafs/stray", "tmpfs"),
        ];
        let found = managed_mounts(table, Path::new("/run/weka-fs-mounts"));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].transport, DataTransport::Wekafs);
        assert_eq!(filesystem_name(&found[0]), "fs1");
        assert_eq!(found[1].transport, DataTransport::Nfs);
        assert_eq!(filesystem_name(&found[1]), "fs2");
    }
}

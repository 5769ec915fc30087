#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use flatfs_core::{FlatFs, FsStats};
use flatfs_ondisk::{Geometry, SuperBlock};
use serde::Serialize;
use std::env;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Serialize)]
struct InspectOutput {
    geometry: Geometry,
    superblock: SuperBlock,
    stats: FsStats,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "mkfs" => {
            let Some(path) = args.next() else {
                bail!("mkfs requires an image path");
            };
            let flags: Vec<String> = args.collect();
            mkfs(Path::new(&path), &flags)
        }
        "inspect" => {
            let Some(path) = args.next() else {
                bail!("inspect requires an image path");
            };
            let json = args.any(|arg| arg == "--json");
            inspect(Path::new(&path), json)
        }
        "ls" => {
            let Some(path) = args.next() else {
                bail!("ls requires an image path");
            };
            let json = args.any(|arg| arg == "--json");
            ls(Path::new(&path), json)
        }
        "import" => {
            let (Some(path), Some(host), Some(name)) = (args.next(), args.next(), args.next())
            else {
                bail!("import requires <image> <host-file> <name>");
            };
            import(Path::new(&path), Path::new(&host), &name)
        }
        "export" => {
            let (Some(path), Some(name), Some(host)) = (args.next(), args.next(), args.next())
            else {
                bail!("export requires <image> <name> <host-file>");
            };
            export(Path::new(&path), &name, Path::new(&host))
        }
        "cat" => {
            let (Some(path), Some(name)) = (args.next(), args.next()) else {
                bail!("cat requires <image> <name>");
            };
            cat(Path::new(&path), &name)
        }
        "rm" => {
            let (Some(path), Some(name)) = (args.next(), args.next()) else {
                bail!("rm requires <image> <name>");
            };
            rm(Path::new(&path), &name)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("flatfs-cli\n");
    println!("USAGE:");
    println!("  flatfs-cli mkfs <image> [--blocks N] [--inodes N] [--dir-entries N] [--data-blocks N]");
    println!("  flatfs-cli inspect <image> [--json]");
    println!("  flatfs-cli ls <image> [--json]");
    println!("  flatfs-cli import <image> <host-file> <name>");
    println!("  flatfs-cli export <image> <name> <host-file>");
    println!("  flatfs-cli cat <image> <name>");
    println!("  flatfs-cli rm <image> <name>");
}

fn mkfs(path: &Path, flags: &[String]) -> Result<()> {
    let mut geo = Geometry::default();
    let mut data_blocks = None;
    let mut iter = flags.iter();
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--blocks" => geo.total_blocks = parse_count(iter.next(), "--blocks")?,
            "--inodes" => geo.inode_count = parse_count(iter.next(), "--inodes")?,
            "--dir-entries" => geo.dir_capacity = parse_count(iter.next(), "--dir-entries")?,
            "--data-blocks" => data_blocks = Some(parse_count(iter.next(), "--data-blocks")?),
            other => bail!("unknown mkfs flag: {other}"),
        }
    }
    // --data-blocks sizes the whole volume around the requested data
    // region and overrides --blocks.
    if let Some(data) = data_blocks {
        geo = Geometry::for_capacity(data, geo.inode_count, geo.dir_capacity)
            .context("size volume for the requested data region")?;
    }

    let fs = FlatFs::format(path, geo)
        .with_context(|| format!("format {}", path.display()))?;
    let sb = fs.superblock();
    println!("formatted {}", path.display());
    println!("total_blocks: {}", sb.total_blocks);
    println!("data_blocks: {}", sb.data_blocks());
    println!("inodes: {}", sb.inode_count);
    println!("dir_entries: {}", sb.dir_capacity);
    Ok(())
}

fn inspect(path: &Path, json: bool) -> Result<()> {
    let fs = open_volume(path)?;
    let output = InspectOutput {
        geometry: fs.geometry(),
        superblock: *fs.superblock(),
        stats: fs.stats().context("gather volume statistics")?,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
        return Ok(());
    }

    let sb = &output.superblock;
    let stats = &output.stats;
    println!("flatfs volume {}", path.display());
    println!("version: {}", sb.version);
    println!("total_blocks: {}", sb.total_blocks);
    println!(
        "regions: inodes {}..{} dir {}..{} bitmap {}..{} data {}..{}",
        sb.inode_start,
        sb.dir_start,
        sb.dir_start,
        sb.free_start,
        sb.free_start,
        sb.data_start,
        sb.data_start,
        sb.total_blocks
    );
    println!("free_blocks: {}/{}", stats.free_blocks, stats.data_blocks);
    println!("inodes_used: {}/{}", stats.inodes_used, stats.inode_count);
    println!("entries_used: {}/{}", stats.entries_used, stats.dir_capacity);
    println!("max_file_size: {}", stats.max_file_size);
    Ok(())
}

fn ls(path: &Path, json: bool) -> Result<()> {
    let fs = open_volume(path)?;
    let listing = fs.list().context("read directory")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&listing).context("serialize listing")?
        );
        return Ok(());
    }

    for file in &listing {
        println!("{:>8}  {:>3}  {}", file.size, file.blocks, file.name);
    }
    Ok(())
}

fn import(path: &Path, host: &Path, name: &str) -> Result<()> {
    let data = std::fs::read(host).with_context(|| format!("read {}", host.display()))?;
    let mut fs = open_volume(path)?;
    let fd = fs
        .create(name)
        .with_context(|| format!("create {name:?}"))?;
    let written = fs
        .write(fd, &data)
        .with_context(|| format!("import {}", host.display()))?;
    fs.close(fd)?;
    fs.sync()?;
    println!("imported {} ({written} bytes) as {name:?}", host.display());
    Ok(())
}

fn export(path: &Path, name: &str, host: &Path) -> Result<()> {
    let mut fs = open_volume(path)?;
    let data = read_all(&mut fs, name)?;
    std::fs::write(host, &data).with_context(|| format!("write {}", host.display()))?;
    println!("exported {name:?} ({} bytes) to {}", data.len(), host.display());
    Ok(())
}

fn cat(path: &Path, name: &str) -> Result<()> {
    let mut fs = open_volume(path)?;
    let data = read_all(&mut fs, name)?;
    std::io::stdout()
        .write_all(&data)
        .context("write to stdout")?;
    Ok(())
}

fn rm(path: &Path, name: &str) -> Result<()> {
    let mut fs = open_volume(path)?;
    fs.unlink(name).with_context(|| format!("remove {name:?}"))?;
    fs.sync()?;
    Ok(())
}

fn open_volume(path: &Path) -> Result<FlatFs> {
    FlatFs::mount(path).with_context(|| format!("mount {}", path.display()))
}

fn read_all(fs: &mut FlatFs, name: &str) -> Result<Vec<u8>> {
    let fd = fs.open(name).with_context(|| format!("open {name:?}"))?;
    let len = usize::try_from(fs.size(fd)?)?;
    let mut data = vec![0_u8; len];
    let got = fs.read(fd, &mut data).with_context(|| format!("read {name:?}"))?;
    data.truncate(got);
    fs.close(fd)?;
    Ok(data)
}

fn parse_count(value: Option<&String>, flag: &str) -> Result<u32> {
    let Some(value) = value else {
        bail!("{flag} requires a value");
    };
    value
        .parse()
        .with_context(|| format!("{flag} expects a count, got {value:?}"))
}

//! Command results and how they are printed.
//!
//! Every command builds one result value. [`Printer`] wraps it in a
//! `success`/`result_code` envelope and prints it to stdout, either as
//! pretty JSON (`--json`) or through the result's [`Render`] impl. Failures
//! go to stderr in the same envelope. Logs never touch stdout.

use anyhow::Result;
use cdnmirror_core::{
    ArchiveReport, BuildHashes, Config, Install, LegacyReport, PreloadReport, ProductReport,
    Remote,
};
use serde::Serialize;
use std::fmt::{self, Write as _};
use std::io::{self, Write};

/// Result code for a command that finished with some items failed.
pub const PARTIAL: u8 = 2;

/// A command result that can be shown to a person.
pub trait Render: Serialize {
    /// Exit code the result maps to.
    fn result_code(&self) -> u8 {
        0
    }

    /// Plain text form, one fact per line.
    fn render(&self, out: &mut String) -> fmt::Result;
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    success: bool,
    result_code: u8,
    #[serde(flatten)]
    result: &'a T,
}

#[derive(Serialize)]
struct Failure {
    success: bool,
    result_code: u8,
    error: String,
}

/// Prints results to stdout and failures to stderr.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    json: bool,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Print `result` and return its exit code.
    pub fn print<T: Render>(&self, result: &T) -> Result<u8> {
        let result_code = result.result_code();
        let mut stdout = io::stdout().lock();

        if self.json {
            let envelope = Envelope {
                success: result_code == 0,
                result_code,
                result,
            };
            serde_json::to_writer_pretty(&mut stdout, &envelope)?;
            writeln!(stdout)?;
        } else {
            let mut text = String::new();
            result.render(&mut text)?;
            stdout.write_all(text.as_bytes())?;
        }
        Ok(result_code)
    }

    /// Report a command failure; returns the exit code to use.
    pub fn fail(&self, error: &anyhow::Error) -> u8 {
        let result_code = 1;
        let mut stderr = io::stderr().lock();

        if self.json {
            let failure = Failure {
                success: false,
                result_code,
                error: format!("{:#}", error),
            };
            if serde_json::to_writer_pretty(&mut stderr, &failure).is_ok() {
                let _ = writeln!(stderr);
            }
        } else {
            let _ = writeln!(stderr, "Error: {:#}", error);
        }
        result_code
    }
}

fn partial_if(failed: bool) -> u8 {
    if failed { PARTIAL } else { 0 }
}

/// `shard`
#[derive(Debug, Serialize)]
pub struct ShardResult {
    pub hash: String,
    pub prefix2: String,
    pub prefix4: String,
    pub path: String,
}

impl Render for ShardResult {
    fn render(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "{}", self.path)
    }
}

/// `preload`
#[derive(Debug, Serialize)]
pub struct PreloadResult {
    pub root: String,
    pub link_root: String,
    #[serde(flatten)]
    pub report: PreloadReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub installs: Vec<Install>,
}

impl Render for PreloadResult {
    fn render(&self, out: &mut String) -> fmt::Result {
        render_preload(&self.report, out)?;
        for install in &self.installs {
            render_install(install, out)?;
        }
        Ok(())
    }
}

fn render_preload(report: &PreloadReport, out: &mut String) -> fmt::Result {
    writeln!(out, "Catalogs resolved: {}", report.catalogs_resolved)?;
    writeln!(
        out,
        "Links created: {} ({} already present)",
        report.links_created, report.links_existing
    )?;
    if report.catalogs_without_manifest > 0 {
        writeln!(
            out,
            "Catalogs without manifest: {}",
            report.catalogs_without_manifest
        )?;
    }
    for skipped in &report.skipped {
        writeln!(
            out,
            "Skipped {} ({}): {}",
            skipped.name, skipped.hash, skipped.reason
        )?;
    }
    Ok(())
}

fn render_install(install: &Install, out: &mut String) -> fmt::Result {
    match &install.instructions_url {
        Some(url) => writeln!(out, "{} {}", install.product, url),
        None => writeln!(
            out,
            "{} (legacy, {} files)",
            install.product,
            install.legacy_urls.len()
        ),
    }
}

/// `configs`
#[derive(Debug, Serialize)]
pub struct ConfigsResult {
    #[serde(flatten)]
    pub hashes: BuildHashes,
    pub cdn_root: Remote,
    pub build: Config,
    pub cdn: Config,
}

impl Render for ConfigsResult {
    fn render(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "Region: {}", self.hashes.region)?;
        writeln!(
            out,
            "CDN: {} {}",
            self.cdn_root.hosts.join(" "),
            self.cdn_root.path
        )?;
        for (title, hash, config) in [
            ("Build", &self.hashes.build_config, &self.build),
            ("CDN", &self.hashes.cdn_config, &self.cdn),
        ] {
            writeln!(out, "{} config {}:", title, hash)?;
            for (key, value) in config.iter() {
                writeln!(out, "  {} = {}", key, value.tokens().join(" "))?;
            }
        }
        Ok(())
    }
}

/// `archives`
#[derive(Debug, Serialize)]
pub struct ArchivesResult {
    pub region: String,
    pub store_root: String,
    #[serde(flatten)]
    pub report: ArchiveReport,
}

impl Render for ArchivesResult {
    fn result_code(&self) -> u8 {
        partial_if(!self.report.failed.is_empty())
    }

    fn render(&self, out: &mut String) -> fmt::Result {
        writeln!(
            out,
            "Cached {} archives in {}",
            self.report.cached, self.store_root
        )?;
        for failed in &self.report.failed {
            writeln!(out, "Failed {}: {}", failed.hash, failed.reason)?;
        }
        Ok(())
    }
}

/// A product `sync` could not mirror.
#[derive(Debug, Serialize)]
pub struct FailedProduct {
    pub product: String,
    pub instructions_url: String,
    pub reason: String,
}

/// `sync`
#[derive(Debug, Serialize)]
pub struct SyncResult {
    pub root: String,
    pub region_code: String,
    pub catalog: PreloadReport,
    pub legacy: LegacyReport,
    pub products: Vec<ProductReport>,
    pub failed_products: Vec<FailedProduct>,
}

impl Render for SyncResult {
    fn result_code(&self) -> u8 {
        let archives_failed = self.products.iter().any(|p| !p.archives.failed.is_empty());
        partial_if(archives_failed || !self.failed_products.is_empty() || !self.legacy.failed.is_empty())
    }

    fn render(&self, out: &mut String) -> fmt::Result {
        render_preload(&self.catalog, out)?;
        writeln!(
            out,
            "Legacy files: {} cached, {} present, {} not found",
            self.legacy.cached,
            self.legacy.existing,
            self.legacy.not_found.len()
        )?;
        for failed in &self.legacy.failed {
            writeln!(out, "Failed {}: {}", failed.url, failed.reason)?;
        }
        for product in &self.products {
            writeln!(
                out,
                "{} [{}]: {} archives cached, {} failed",
                product.instructions_url,
                product.hashes.region,
                product.archives.cached,
                product.archives.failed.len()
            )?;
        }
        for failed in &self.failed_products {
            writeln!(
                out,
                "Failed {} ({}): {}",
                failed.product, failed.instructions_url, failed.reason
            )?;
        }
        Ok(())
    }
}

/// `verify-index`
#[derive(Debug, Serialize)]
pub struct VerifyIndexResult {
    pub path: String,
    pub blocks: usize,
    pub entries: u32,
}

impl Render for VerifyIndexResult {
    fn render(&self, out: &mut String) -> fmt::Result {
        writeln!(
            out,
            "{}: OK ({} blocks, {} entries)",
            self.path, self.blocks, self.entries
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdnmirror_core::FailedArchive;

    #[test]
    fn test_envelope_flattens_result() {
        let result = VerifyIndexResult {
            path: "a.index".to_string(),
            blocks: 3,
            entries: 7,
        };
        let envelope = Envelope {
            success: true,
            result_code: 0,
            result: &result,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["blocks"], 3);
        assert_eq!(json["path"], "a.index");
    }

    #[test]
    fn test_failed_archive_makes_result_partial() {
        let mut result = ArchivesResult {
            region: "us".to_string(),
            store_root: "/tmp/ngdp".to_string(),
            report: ArchiveReport::default(),
        };
        assert_eq!(result.result_code(), 0);

        result.report.failed.push(FailedArchive {
            hash: "00".repeat(16),
            reason: "bad index".to_string(),
        });
        assert_eq!(result.result_code(), PARTIAL);

        let mut text = String::new();
        result.render(&mut text).unwrap();
        assert!(text.contains("Failed 0000"));
    }
}

mod output;

use anyhow::{Context, Result};
use cdnmirror_core::{
    CATALOG_NAMESPACE, CatalogResolver, ConfigResolver, ContentHash, Fetcher, HashStore,
    HttpFetcher, IndexTrailer, LegacyMirror, ProductTables, Remote, Settings, StoreLayout,
    cache_archives, mirror_product, shard, validate_index,
};
use clap::{Parser, Subcommand};
use output::{
    ArchivesResult, ConfigsResult, FailedProduct, PreloadResult, Printer, ShardResult,
    SyncResult, VerifyIndexResult,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// cdnmirror - A local mirror for hash-addressed CDNs
#[derive(Parser)]
#[command(name = "cdnmirror")]
#[command(about = "Fetch, verify and cache objects from hash-addressed CDNs", long_about = None)]
#[command(version)]
struct Cli {
    /// Save root (defaults to MPQ_BASE_DIR, XDG_DATA_HOME/mpq or ~/.local/share/mpq)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// URL scheme for CDN requests
    #[arg(long, global = true)]
    scheme: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the shard path of a hash
    Shard {
        /// Hex hash
        hash: String,
    },

    /// Cache a catalog tree and link its manifest files
    Preload {
        #[command(flatten)]
        catalog: CatalogArgs,

        /// List product installs of the resolved catalogs for this region code
        #[arg(long)]
        installs: Option<String>,
    },

    /// Resolve build and CDN configs for a product
    Configs {
        #[command(flatten)]
        product: ProductArgs,
    },

    /// Cache every archive and index listed in a product's CDN config
    Archives {
        #[command(flatten)]
        product: ProductArgs,

        /// Number of download threads
        #[arg(short, long, default_value_t = 4)]
        jobs: usize,
    },

    /// Preload a catalog, then mirror every product it installs
    Sync {
        #[command(flatten)]
        catalog: CatalogArgs,

        /// Region code substituted into install URLs
        #[arg(long, default_value = "us")]
        region_code: String,

        /// Candidate regions for version rows, tried in order
        #[arg(long = "region", default_values = ["xx", "us"])]
        regions: Vec<String>,

        /// Number of download threads per product
        #[arg(short, long, default_value_t = 4)]
        jobs: usize,
    },

    /// Validate a block index file
    VerifyIndex {
        /// Index file
        file: PathBuf,
    },
}

#[derive(clap::Args)]
struct CatalogArgs {
    /// CDN host; repeat to add fallbacks in order
    #[arg(long = "host", required = true)]
    hosts: Vec<String>,

    /// Path prefix of the catalog store on the CDN
    #[arg(long)]
    path: String,

    /// Directory to create manifest links in (defaults to the namespace root)
    #[arg(long)]
    link_root: Option<PathBuf>,

    /// Root catalog hash
    root_hash: String,
}

#[derive(clap::Args)]
struct ProductArgs {
    /// Product instructions URL (serves `versions` and `cdns`)
    #[arg(long)]
    instructions: String,

    /// Candidate regions, tried in order
    #[arg(long = "region", default_values = ["xx", "us"])]
    regions: Vec<String>,

    /// CDN host overriding the `cdns` table; repeat for fallbacks
    #[arg(long = "cdn-host", requires = "cdn_path")]
    cdn_hosts: Vec<String>,

    /// CDN path prefix overriding the `cdns` table
    #[arg(long, requires = "cdn_hosts")]
    cdn_path: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let out = Printer::new(cli.json);
    let settings = settings_from(&cli);
    tracing::debug!(root = %settings.save_root.display(), scheme = %settings.scheme, "settings");

    let result = match cli.command {
        Commands::Shard { hash } => cmd_shard(&out, &hash),
        Commands::Preload { catalog, installs } => {
            cmd_preload(&out, &settings, &catalog, installs.as_deref())
        }
        Commands::Configs { product } => cmd_configs(&out, &settings, &product),
        Commands::Archives { product, jobs } => cmd_archives(&out, &settings, &product, jobs),
        Commands::Sync {
            catalog,
            region_code,
            regions,
            jobs,
        } => cmd_sync(&out, &settings, &catalog, &region_code, &regions, jobs),
        Commands::VerifyIndex { file } => cmd_verify_index(&out, &file),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => ExitCode::from(out.fail(&e)),
    }
}

/// Settings precedence: flags > environment > defaults.
fn settings_from(cli: &Cli) -> Settings {
    let mut settings = match &cli.root {
        Some(root) => Settings::new(root),
        None => Settings::from_env(),
    };
    if let Some(secs) = cli.timeout {
        settings.timeout = Duration::from_secs(secs);
    }
    if let Some(scheme) = &cli.scheme {
        settings.scheme = scheme.clone();
    }
    settings
}


fn cmd_shard(out: &Printer, hash: &str) -> Result<u8> {
    let sharded = shard(hash).with_context(|| format!("Invalid hash: {}", hash))?;

    out.print(&ShardResult {
        path: sharded.to_url_path(),
        hash: sharded.full,
        prefix2: sharded.prefix2,
        prefix4: sharded.prefix4,
    })
}

/// Open the catalog store and parse the root hash.
fn catalog_store(
    settings: &Settings,
    fetcher: Arc<dyn Fetcher>,
    catalog: &CatalogArgs,
) -> Result<(ContentHash, HashStore)> {
    let root = ContentHash::from_hex(&catalog.root_hash)
        .with_context(|| format!("Invalid hash: {}", catalog.root_hash))?;
    let remote = Remote::with_hosts(catalog.hosts.clone(), &catalog.path);
    let store = HashStore::new(settings, CATALOG_NAMESPACE, remote, StoreLayout::Flat, fetcher)
        .with_context(|| format!("Invalid catalog path: {}", catalog.path))?;
    Ok((root, store))
}

fn catalog_resolver<'s>(store: &'s HashStore, catalog: &CatalogArgs) -> CatalogResolver<'s> {
    match &catalog.link_root {
        Some(dir) => CatalogResolver::with_link_root(store, dir),
        None => CatalogResolver::new(store),
    }
}

fn cmd_preload(
    out: &Printer,
    settings: &Settings,
    catalog: &CatalogArgs,
    installs: Option<&str>,
) -> Result<u8> {
    let fetcher = Arc::new(HttpFetcher::from_settings(settings));
    let (root, store) = catalog_store(settings, fetcher, catalog)?;
    let mut resolver = catalog_resolver(&store, catalog);

    let report = resolver
        .preload(&root)
        .with_context(|| format!("Failed to preload catalog {}", root))?;
    tracing::info!(%root, catalogs = report.catalogs_resolved, links = report.links_created, "catalog preloaded");

    out.print(&PreloadResult {
        root: root.to_hex(),
        link_root: resolver.link_root().display().to_string(),
        installs: installs
            .map(|region_code| resolver.installs(region_code))
            .unwrap_or_default(),
        report,
    })
}

/// Fetch the product tables and build a resolver for them.
fn product_resolver(settings: &Settings, product: &ProductArgs) -> Result<ConfigResolver> {
    let fetcher = Arc::new(HttpFetcher::from_settings(settings));
    let tables = ProductTables::fetch(fetcher.as_ref(), &product.instructions)
        .with_context(|| format!("Failed to fetch product tables from {}", product.instructions))?;

    let resolver = ConfigResolver::new(settings.clone(), fetcher, tables);
    Ok(match &product.cdn_path {
        Some(path) => resolver.with_cdn(Remote::with_hosts(product.cdn_hosts.clone(), path)),
        None => resolver,
    })
}

fn cmd_configs(out: &Printer, settings: &Settings, product: &ProductArgs) -> Result<u8> {
    let resolver = product_resolver(settings, product)?;
    let candidates: Vec<&str> = product.regions.iter().map(String::as_str).collect();
    let hashes = resolver
        .resolve_hashes(&candidates)
        .with_context(|| format!("No usable version row for regions {:?}", candidates))?;

    let store = resolver.store().context("Failed to determine CDN root")?;
    let build = resolver
        .build_config(&store, &hashes)
        .with_context(|| format!("Failed to load build config {}", hashes.build_config))?;
    let cdn = resolver
        .cdn_config(&store, &hashes)
        .with_context(|| format!("Failed to load CDN config {}", hashes.cdn_config))?;

    out.print(&ConfigsResult {
        hashes,
        cdn_root: store.remote().clone(),
        build,
        cdn,
    })
}

fn cmd_archives(
    out: &Printer,
    settings: &Settings,
    product: &ProductArgs,
    jobs: usize,
) -> Result<u8> {
    let resolver = product_resolver(settings, product)?;
    let candidates: Vec<&str> = product.regions.iter().map(String::as_str).collect();
    let hashes = resolver
        .resolve_hashes(&candidates)
        .with_context(|| format!("No usable version row for regions {:?}", candidates))?;

    let store = resolver.store().context("Failed to determine CDN root")?;
    let cdn = resolver
        .cdn_config(&store, &hashes)
        .with_context(|| format!("Failed to load CDN config {}", hashes.cdn_config))?;

    out.print(&ArchivesResult {
        region: hashes.region,
        store_root: store.root().display().to_string(),
        report: cache_archives(&store, &cdn, jobs),
    })
}

fn cmd_sync(
    out: &Printer,
    settings: &Settings,
    catalog: &CatalogArgs,
    region_code: &str,
    regions: &[String],
    jobs: usize,
) -> Result<u8> {
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::from_settings(settings));
    let (root, store) = catalog_store(settings, Arc::clone(&fetcher), catalog)?;
    let mut resolver = catalog_resolver(&store, catalog);

    let report = resolver
        .preload(&root)
        .with_context(|| format!("Failed to preload catalog {}", root))?;
    let installs = resolver.installs(region_code);
    tracing::info!(%root, products = installs.len(), "catalog preloaded");

    let legacy = LegacyMirror::new(settings, Arc::clone(&fetcher)).mirror_all(
        installs
            .iter()
            .flat_map(|install| install.legacy_urls.iter().map(String::as_str)),
    );

    let candidates: Vec<&str> = regions.iter().map(String::as_str).collect();
    let mut products = Vec::new();
    let mut failed_products = Vec::new();
    for install in &installs {
        let Some(url) = &install.instructions_url else {
            continue;
        };
        tracing::info!(product = %install.product, %url, "mirroring product");

        match mirror_product(settings, Arc::clone(&fetcher), url, &candidates, None, jobs) {
            Ok(product) => products.push(product),
            Err(e) => {
                tracing::warn!(product = %install.product, error = %e, "failed to mirror product");
                failed_products.push(FailedProduct {
                    product: install.product.clone(),
                    instructions_url: url.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    out.print(&SyncResult {
        root: root.to_hex(),
        region_code: region_code.to_string(),
        catalog: report,
        legacy,
        products,
        failed_products,
    })
}

fn cmd_verify_index(out: &Printer, file: &Path) -> Result<u8> {
    let buf = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let blocks =
        validate_index(&buf).with_context(|| format!("Invalid index: {}", file.display()))?;
    let trailer = IndexTrailer::parse(&buf)?;

    out.print(&VerifyIndexResult {
        path: file.display().to_string(),
        blocks,
        entries: trailer.entry_count,
    })
}

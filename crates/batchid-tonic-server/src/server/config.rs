use anyhow::{Context, bail};
use batchid::{FileStorage, MemoryStorage, ShardKey, WatermarkStorage, validate_tag};
use batchid_tonic_core::HostAddr;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Runtime configuration for the `batchid-server` binary.
///
/// The same binary can host an allocator, a generator, both, or neither (a
/// pure client). Which roles run here and which are reached over gRPC follows
/// from the host lists: a role with hosts configured is remote unless this
/// process is told to serve it. All values are parsed from CLI arguments or
/// environment variables.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "batchid-server",
    version,
    about = "A gRPC service for tag-scoped, batched unique IDs"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Comma separated `host:port` list of allocator processes.
    ///
    /// When set, generators fetch batches from these hosts. A process that
    /// also has a storage backend serves the allocator on the first entry.
    ///
    /// Environment variable: `ALLOCATOR_HOSTS`
    #[arg(long, env = "ALLOCATOR_HOSTS", default_value = "")]
    pub allocator_hosts: String,

    /// Where the allocator persists watermarks. `none` means this process
    /// cannot host an allocator.
    ///
    /// Environment variable: `ALLOCATOR_STORAGE`
    #[arg(long, env = "ALLOCATOR_STORAGE", value_enum, default_value_t = StorageChoice::File)]
    pub allocator_storage: StorageChoice,

    /// Directory of the `file` storage backend.
    ///
    /// Environment variable: `STORAGE_DIR`
    #[arg(long, env = "STORAGE_DIR", default_value = "./var/batchid/data")]
    pub storage_dir: PathBuf,

    /// Directory holding one `<tag>.json` step configuration per tag.
    ///
    /// Environment variable: `TAG_CONFIG_DIR`
    #[arg(long, env = "TAG_CONFIG_DIR", default_value = "./config/batchid")]
    pub tag_config_dir: PathBuf,

    /// Forces how the local generator reaches the allocator. Defaults to
    /// `remote` when allocator hosts are set, `local` otherwise.
    ///
    /// Environment variable: `REQUESTER`
    #[arg(long, env = "REQUESTER", value_enum)]
    pub requester: Option<RequesterKind>,

    /// Comma separated `host:port` list of generator processes.
    ///
    /// When set, IDs are requested from these hosts instead of a generator
    /// owned by this process.
    ///
    /// Environment variable: `GENERATOR_HOSTS`
    #[arg(long, env = "GENERATOR_HOSTS", default_value = "")]
    pub generator_hosts: String,

    /// Host the generator endpoint on the first generator host.
    ///
    /// Environment variable: `SERVE_GENERATOR`
    #[arg(long, env = "SERVE_GENERATOR", default_value_t = false)]
    pub serve_generator: bool,

    /// Comma separated tags whose default shard is loaded at startup.
    ///
    /// Environment variable: `PRELOAD_TAGS`
    #[arg(long, env = "PRELOAD_TAGS", default_value = "")]
    pub preload_tags: String,

    /// Maximum number of IDs a single `BatchGenerate` call may ask for.
    ///
    /// Environment variable: `MAX_BATCH_GENERATE`
    #[arg(long, env = "MAX_BATCH_GENERATE", default_value_t = 1_000_000)]
    pub max_batch_generate: u64,

    /// Deadline in milliseconds for each call to a remote allocator or
    /// generator. `0` leaves calls unbounded.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_MS`
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 0)]
    pub request_timeout_ms: u64,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Host the planned endpoints until SIGINT or SIGTERM (default).
    Serve,
    /// Print IDs of a tag, one per line, then exit.
    Generate {
        /// Tag to draw IDs from.
        tag: String,
        /// Number of IDs to print.
        #[arg(long, default_value_t = 1)]
        count: u64,
        /// Shard within the tag. Integers select an integer shard.
        #[arg(long, value_parser = parse_shard, default_value = "0")]
        shard: ShardKey,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageChoice {
    File,
    Memory,
    None,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequesterKind {
    Local,
    Remote,
}

/// A storage backend this process can open for an allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageKind {
    File(PathBuf),
    Memory,
}

impl StorageKind {
    pub fn open(&self) -> Arc<dyn WatermarkStorage> {
        match self {
            Self::File(dir) => Arc::new(FileStorage::new(dir.clone())),
            Self::Memory => Arc::new(MemoryStorage::new()),
        }
    }
}

/// Validated placement of the allocator and generator roles.
#[derive(Debug, Clone)]
pub struct TopologyConfig {
    pub allocator_hosts: Vec<HostAddr>,
    pub storage: Option<StorageKind>,
    pub tag_config_dir: PathBuf,
    pub requester: Option<RequesterKind>,
    pub generator_hosts: Vec<HostAddr>,
    pub serve_generator: bool,
    pub preload_tags: Vec<String>,
    pub max_batch_generate: u64,
    pub request_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub command: Command,
    pub topology: TopologyConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_batch_generate == 0 {
            bail!("MAX_BATCH_GENERATE must be greater than 0");
        }

        let allocator_hosts =
            HostAddr::parse_list(&args.allocator_hosts).context("invalid ALLOCATOR_HOSTS")?;
        let generator_hosts =
            HostAddr::parse_list(&args.generator_hosts).context("invalid GENERATOR_HOSTS")?;

        let preload_tags = split_list(&args.preload_tags);
        for tag in &preload_tags {
            validate_tag(tag).context("invalid PRELOAD_TAGS")?;
        }

        let storage = match args.allocator_storage {
            StorageChoice::File => Some(StorageKind::File(args.storage_dir)),
            StorageChoice::Memory => Some(StorageKind::Memory),
            StorageChoice::None => None,
        };

        Ok(Self {
            command: args.command.unwrap_or(Command::Serve),
            topology: TopologyConfig {
                allocator_hosts,
                storage,
                tag_config_dir: args.tag_config_dir,
                requester: args.requester,
                generator_hosts,
                serve_generator: args.serve_generator,
                preload_tags,
                max_batch_generate: args.max_batch_generate,
                request_timeout: (args.request_timeout_ms > 0)
                    .then(|| Duration::from_millis(args.request_timeout_ms)),
            },
        })
    }
}

/// Integers become integer shards, anything else a string shard.
pub fn parse_shard(raw: &str) -> Result<ShardKey, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("shard must not be empty".into());
    }
    Ok(raw
        .parse::<i64>()
        .map_or_else(|_| ShardKey::from(raw), ShardKey::Int))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

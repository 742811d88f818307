//! unitree CLI - command line interface for unitree_db
//!
//! One command per registry operation. Each invocation opens the data
//! directory, runs the command and shuts the registry down, which commits
//! every tree. `unitree shell` keeps one registry open and reads commands from
//! stdin until EOF. Results are printed to stdout as JSON; logs go to stderr.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::PathBuf;
use unitree_db::{
    CompressedMerkleProof, Config, Hash, HashAlgorithm, MerkleProof, Registry, TreeInfo,
};

#[derive(Parser)]
#[command(name = "unitree")]
#[command(about = "Named sparse merkle trees with proofs")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(short, long, env = "UNIDB_DIR")]
    data_dir: Option<PathBuf>,

    /// Treat keys and values as UTF-8 strings instead of hex
    #[arg(short, long, global = true)]
    utf8: bool,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Cache height limit for trees created without -c
    #[arg(long, env = "UNIDB_CACHE_HEIGHT_LIMIT", default_value_t = 0)]
    default_cache_height_limit: u32,

    /// Hash function for trees created without --hash
    #[arg(long, env = "UNIDB_HASH", default_value_t = HashAlgorithm::Sha256)]
    default_hash: HashAlgorithm,

    #[command(subcommand)]
    command: Commands,
}

/// One line of `unitree shell` input
#[derive(Parser)]
#[command(name = "unitree", no_binary_name = true)]
struct ShellLine {
    /// Treat keys and values as UTF-8 strings instead of hex
    #[arg(short, long)]
    utf8: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all trees
    List,

    /// Read one command per line from stdin against a single open registry;
    /// shuts down on EOF
    Shell,

    /// Create a new tree
    Create {
        /// Tree name
        name: String,
        /// Nodes within this many levels of the leaves are not cached
        #[arg(short, long)]
        cache_height_limit: Option<u32>,
        /// Hash function: sha256, blake2b or blake3
        #[arg(long)]
        hash: Option<HashAlgorithm>,
    },

    /// Drop a tree
    Drop {
        /// Tree name
        name: String,
    },

    /// Persist metadata for every tree
    SyncMeta,

    /// Write key=value pairs (best effort); an empty value deletes
    Update {
        tree: String,
        #[arg(required = true)]
        pairs: Vec<String>,
    },

    /// Write key=value pairs, all or nothing
    AtomicUpdate {
        tree: String,
        #[arg(required = true)]
        pairs: Vec<String>,
    },

    /// Read a value
    Get { tree: String, key: String },

    /// Persist pending nodes
    Commit { tree: String },

    /// Remember the current root as a revert target
    Stash {
        tree: String,
        /// Drop nodes cached since the previous stash or commit
        #[arg(long)]
        rollback_cache: bool,
    },

    /// Move the root back to a committed or stashed root
    Revert { tree: String, root: String },

    /// Merkle proof for a key
    Proof {
        tree: String,
        key: String,
        /// Prove against this root instead of the current one
        #[arg(long)]
        root: Option<String>,
    },

    /// Bitmap-compressed merkle proof for a key
    ProofCompressed {
        tree: String,
        key: String,
        #[arg(long)]
        root: Option<String>,
    },

    /// Verify a proof (as printed by `proof`) against the current root.
    /// With --value checks inclusion, otherwise non-inclusion.
    Verify {
        tree: String,
        key: String,
        /// Proof JSON
        #[arg(long)]
        proof: String,
        #[arg(long)]
        value: Option<String>,
    },

    /// Verify a proof printed by `proof-compressed`
    VerifyCompressed {
        tree: String,
        key: String,
        #[arg(long)]
        proof: String,
        #[arg(long)]
        value: Option<String>,
    },
}

/// Proof as printed and accepted by the CLI; hashes and bytes in hex
#[derive(Serialize, Deserialize)]
struct ProofJson {
    included: bool,
    audit_path: Vec<String>,
    proof_key: Option<String>,
    proof_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bitmap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
}

impl ProofJson {
    fn plain(proof: &MerkleProof) -> Self {
        ProofJson {
            included: proof.included,
            audit_path: proof.audit_path.iter().map(|h| h.to_hex()).collect(),
            proof_key: proof.proof_key.map(|k| k.to_hex()),
            proof_value: hex::encode(&proof.proof_value),
            bitmap: None,
            height: None,
        }
    }

    fn compressed(proof: &CompressedMerkleProof) -> Self {
        ProofJson {
            included: proof.included,
            audit_path: proof.audit_path.iter().map(|h| h.to_hex()).collect(),
            proof_key: proof.proof_key.map(|k| k.to_hex()),
            proof_value: hex::encode(&proof.proof_value),
            bitmap: Some(hex::encode(&proof.bitmap)),
            height: Some(proof.height),
        }
    }

    fn parse(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn audit_path(&self) -> anyhow::Result<Vec<Hash>> {
        Ok(self
            .audit_path
            .iter()
            .map(|h| Hash::from_hex(h))
            .collect::<Result<_, _>>()?)
    }

    fn proof_key(&self) -> anyhow::Result<Option<Hash>> {
        Ok(self.proof_key.as_deref().map(Hash::from_hex).transpose()?)
    }

    fn into_plain(self) -> anyhow::Result<MerkleProof> {
        Ok(MerkleProof {
            audit_path: self.audit_path()?,
            included: self.included,
            proof_key: self.proof_key()?,
            proof_value: hex::decode(&self.proof_value)?,
        })
    }

    fn into_compressed(self) -> anyhow::Result<CompressedMerkleProof> {
        let bitmap = self
            .bitmap
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("compressed proof is missing its bitmap"))?;
        let height = self
            .height
            .ok_or_else(|| anyhow::anyhow!("compressed proof is missing its height"))?;
        Ok(CompressedMerkleProof {
            bitmap: hex::decode(bitmap)?,
            audit_path: self.audit_path()?,
            height,
            included: self.included,
            proof_key: self.proof_key()?,
            proof_value: hex::decode(&self.proof_value)?,
        })
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = Config::resolve(cli.data_dir.clone())?
        .with_cache_height_limit(cli.default_cache_height_limit)
        .with_hash(cli.default_hash);
    let registry = Registry::open_dir(&config)?;

    let result = match &cli.command {
        Commands::Shell => shell(cli.utf8, &config, &registry),
        command => run(command, cli.utf8, &config, &registry).map(|value| output(&value)),
    };
    let shutdown = registry.shutdown();

    match result {
        Ok(()) => {
            shutdown?;
            Ok(())
        }
        Err(e) => {
            output(&error_json(&e));
            if let Err(e) = shutdown {
                tracing::warn!("Shutdown failed: {}", e);
            }
            std::process::exit(1);
        }
    }
}

/// Serve stdin line by line. A failing command prints its error and the
/// session goes on.
fn shell(utf8: bool, config: &Config, registry: &Registry) -> anyhow::Result<()> {
    tracing::info!("Shell ready, reading commands from stdin");

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let result = ShellLine::try_parse_from(line.split_whitespace())
            .map_err(anyhow::Error::from)
            .and_then(|parsed| run(&parsed.command, utf8 || parsed.utf8, config, registry));
        match result {
            Ok(value) => output(&value),
            Err(e) => output(&error_json(&e)),
        }
    }

    tracing::info!("Shell input closed");
    Ok(())
}

fn run(
    command: &Commands,
    utf8: bool,
    config: &Config,
    registry: &Registry,
) -> anyhow::Result<serde_json::Value> {
    let bytes = |s: &str| parse_bytes(s, utf8);

    let value = match command {
        Commands::Shell => anyhow::bail!("shell is already running"),

        Commands::List => {
            let trees = registry.list_trees()?;
            let items: Vec<_> = trees.iter().map(tree_json).collect();
            serde_json::json!({
                "count": items.len(),
                "trees": items
            })
        }

        Commands::Create {
            name,
            cache_height_limit,
            hash,
        } => {
            let limit = cache_height_limit.unwrap_or(config.default_cache_height_limit);
            let created = registry.create_tree_with(name, limit, hash.unwrap_or(config.hash))?;
            serde_json::json!({
                "status": "ok",
                "name": name,
                "created": created
            })
        }

        Commands::Drop { name } => {
            let deleted = registry.drop_tree(name)?;
            serde_json::json!({
                "status": "ok",
                "name": name,
                "deleted": deleted
            })
        }

        Commands::SyncMeta => {
            registry.sync_meta()?;
            serde_json::json!({ "status": "ok" })
        }

        Commands::Update { tree, pairs } => {
            let pairs = parse_pairs(pairs, utf8)?;
            let root = registry.update(tree, &pairs)?;
            serde_json::json!({
                "status": "ok",
                "tree": tree,
                "root": root.to_hex()
            })
        }

        Commands::AtomicUpdate { tree, pairs } => {
            let pairs = parse_pairs(pairs, utf8)?;
            let root = registry.atomic_update(tree, &pairs)?;
            serde_json::json!({
                "status": "ok",
                "tree": tree,
                "root": root.to_hex()
            })
        }

        Commands::Get { tree, key } => {
            let value = registry.get(tree, &bytes(key)?)?;
            serde_json::json!({
                "tree": tree,
                "key": key,
                "value": render_bytes(&value, utf8)
            })
        }

        Commands::Commit { tree } => {
            registry.commit(tree)?;
            let info = registry.tree_info(tree)?;
            serde_json::json!({
                "status": "ok",
                "tree": tree,
                "root": info.root.to_hex()
            })
        }

        Commands::Stash {
            tree,
            rollback_cache,
        } => {
            registry.stash(tree, *rollback_cache)?;
            let info = registry.tree_info(tree)?;
            serde_json::json!({
                "status": "ok",
                "tree": tree,
                "root": info.root.to_hex()
            })
        }

        Commands::Revert { tree, root } => {
            let root = Hash::from_hex(root)?;
            registry.revert(tree, root)?;
            serde_json::json!({
                "status": "ok",
                "tree": tree,
                "root": root.to_hex()
            })
        }

        Commands::Proof { tree, key, root } => {
            let key_bytes = bytes(key)?;
            let proof = match root {
                Some(root) => registry.merkle_proof_r(tree, &key_bytes, Hash::from_hex(root)?)?,
                None => registry.merkle_proof(tree, &key_bytes)?,
            };
            serde_json::to_value(ProofJson::plain(&proof))?
        }

        Commands::ProofCompressed { tree, key, root } => {
            let key_bytes = bytes(key)?;
            let proof = match root {
                Some(root) => {
                    registry.merkle_proof_compressed_r(tree, &key_bytes, Hash::from_hex(root)?)?
                }
                None => registry.merkle_proof_compressed(tree, &key_bytes)?,
            };
            serde_json::to_value(ProofJson::compressed(&proof))?
        }

        Commands::Verify {
            tree,
            key,
            proof,
            value,
        } => {
            let proof = ProofJson::parse(proof)?.into_plain()?;
            let key_bytes = bytes(key)?;
            let valid = match value {
                Some(value) => registry.verify_inclusion(tree, &proof, &key_bytes, &bytes(value)?)?,
                None => registry.verify_non_inclusion(tree, &proof, &key_bytes)?,
            };
            serde_json::json!({
                "tree": tree,
                "key": key,
                "inclusion": value.is_some(),
                "valid": valid
            })
        }

        Commands::VerifyCompressed {
            tree,
            key,
            proof,
            value,
        } => {
            let proof = ProofJson::parse(proof)?.into_compressed()?;
            let key_bytes = bytes(key)?;
            let valid = match value {
                Some(value) => {
                    registry.verify_inclusion_compressed(tree, &proof, &key_bytes, &bytes(value)?)?
                }
                None => registry.verify_non_inclusion_compressed(tree, &proof, &key_bytes)?,
            };
            serde_json::json!({
                "tree": tree,
                "key": key,
                "inclusion": value.is_some(),
                "valid": valid
            })
        }
    };

    Ok(value)
}

fn init_logging(debug: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("unitree_db=debug,unitree=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("unitree_db=info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();
}

fn tree_json(info: &TreeInfo) -> serde_json::Value {
    serde_json::json!({
        "name": info.name,
        "root": info.root.to_hex(),
        "committed_root": info.committed_root.to_hex(),
        "height": info.height,
        "hash": info.hash.name(),
        "load_db_counter": info.load_db_counter,
        "load_cache_counter": info.load_cache_counter,
        "cache_height_limit": info.cache_height_limit
    })
}

/// Hex (with optional 0x) or, with --utf8, the raw string
fn parse_bytes(input: &str, utf8: bool) -> anyhow::Result<Vec<u8>> {
    if utf8 {
        return Ok(input.as_bytes().to_vec());
    }
    let digits = input.strip_prefix("0x").unwrap_or(input);
    hex::decode(digits).map_err(|e| anyhow::anyhow!("Invalid hex {:?}: {}", input, e))
}

fn render_bytes(bytes: &[u8], utf8: bool) -> String {
    if utf8 {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        hex::encode(bytes)
    }
}

/// Split `key=value` arguments at the first `=`
fn parse_pairs(args: &[String], utf8: bool) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
    args.iter()
        .map(|arg| {
            let (key, value) = arg
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("Expected key=value, got {:?}", arg))?;
            Ok((parse_bytes(key, utf8)?, parse_bytes(value, utf8)?))
        })
        .collect()
}

fn error_json(e: &anyhow::Error) -> serde_json::Value {
    serde_json::json!({
        "status": "error",
        "message": e.to_string()
    })
}

fn output(value: &serde_json::Value) {
    println!("{}", value);
}

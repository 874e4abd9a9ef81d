//! gistsync command line interface: wires the stores, gateway and
//! reconciler together and exposes the engine's operations.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use gistsync::config::load_config;
use gistsync::crypto::Envelope;
use gistsync::gateway::http::HttpGistClient;
use gistsync::gateway::GistApi;
use gistsync::logging::init_tracing;
use gistsync::reconciler::Reconciler;
use gistsync::secrets::TokenStore;
use gistsync::shard::{ShardRouter, ShardSyncer};
use gistsync::store::blobs::FsBlobCache;
use gistsync::store::kv::RedbStore;
use gistsync::store::KvStore;
use gistsync::types::{DeletedItemType, SyncOutcome};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "gistsync", version, about = "Encrypted multi-device Gist sync")]
struct Cli {
	/// State directory (default: ~/.gistsync)
	#[arg(long, global = true)]
	dir: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Two-way sync with the remote Gist
	Sync,
	/// Download remote state (remote authoritative)
	Pull,
	/// Upload local state (local authoritative)
	Push,
	/// Sync paged task/workflow collections only
	Tasks,
	/// Show configuration and shard statistics
	Status,
	/// Manage the API token
	Token {
		#[command(subcommand)]
		command: TokenCommand,
	},
	/// Manage the encryption passphrase
	Password {
		#[command(subcommand)]
		command: PasswordCommand,
	},
	/// Gist lifecycle operations
	Gist {
		#[command(subcommand)]
		command: GistCommand,
	},
	/// Recycle bin operations
	Trash {
		#[command(subcommand)]
		command: TrashCommand,
	},
	/// Media shard maintenance
	Media {
		#[command(subcommand)]
		command: MediaCommand,
	},
}

#[derive(Subcommand)]
enum TokenCommand {
	/// Store an API token
	Set { token: String },
	/// Probe the stored token against the API
	Check,
	/// Remove the stored token
	Clear,
}

#[derive(Subcommand)]
enum PasswordCommand {
	/// Store an encryption passphrase
	Set { passphrase: String },
	/// Remove the stored passphrase
	Clear,
}

#[derive(Subcommand)]
enum GistCommand {
	/// Create a fresh sync Gist from local data
	Create,
	/// Switch to an existing Gist
	Switch { id: String },
	/// Delete a Gist
	Delete { id: String },
	/// Forget the configured Gist (local data kept)
	Disconnect,
	/// Disconnect and drop engine caches
	Reset,
}

#[derive(Subcommand)]
enum TrashCommand {
	/// List recoverable items
	List,
	/// Restore a deleted board or media item
	Restore {
		/// "board" or "media"
		kind: String,
		id: String,
	},
	/// Permanently delete everything in the recycle bin
	Purge,
}

#[derive(Subcommand)]
enum MediaCommand {
	/// Check shard consistency against the master index
	Validate,
	/// Re-register orphan media files
	Repair,
	/// Hard-delete media whose tombstones are past retention
	Cleanup,
}

fn state_dir(cli: &Cli) -> PathBuf {
	cli.dir.clone().unwrap_or_else(|| {
		let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
		PathBuf::from(home).join(".gistsync")
	})
}

fn print_outcome(outcome: SyncOutcome) {
	match outcome {
		SyncOutcome::Success(report) => {
			println!(
				"ok: up {} boards / {} prompts / {} tasks / {} workflows, down {} boards / {} prompts / {} tasks, deleted {}, {} conflicts ({} ms)",
				report.uploaded.boards,
				report.uploaded.prompts,
				report.uploaded.tasks,
				report.uploaded.workflows,
				report.downloaded.boards,
				report.downloaded.prompts,
				report.downloaded.tasks,
				report.deleted.boards,
				report.conflicts.len(),
				report.duration_ms,
			);
			for warning in &report.safety_warnings {
				println!("warning: {}", warning);
			}
			for item in &report.skipped_items {
				println!("skipped {} ({:?})", item.id, item.reason);
			}
			for error in &report.errors {
				println!("non-fatal: {}", error);
			}
		}
		SyncOutcome::NeedsPassword => {
			eprintln!("The remote data requires a passphrase: gistsync password set <passphrase>");
			std::process::exit(2);
		}
		SyncOutcome::Failed(e) => {
			eprintln!("error: {}", e);
			std::process::exit(1);
		}
	}
}

#[tokio::main]
async fn main() {
	init_tracing();
	let cli = Cli::parse();
	let dir = state_dir(&cli);
	if let Err(e) = std::fs::create_dir_all(&dir) {
		eprintln!("error: cannot create state directory {}: {}", dir.display(), e);
		std::process::exit(1);
	}

	let store = match RedbStore::open(&dir.join("gistsync.db")) {
		Ok(store) => Arc::new(store),
		Err(e) => {
			eprintln!("error: cannot open local store: {}", e);
			std::process::exit(1);
		}
	};
	let kv: Arc<dyn KvStore> = store.clone();
	let tokens = Arc::new(TokenStore::new(kv.clone()));
	let gateway = Arc::new(HttpGistClient::new(tokens.clone()));
	let crypto = Arc::new(Envelope::new());
	let blobs = Arc::new(FsBlobCache::new(dir.join("blobs")));
	let router = Arc::new(ShardRouter::new(gateway.clone(), crypto.clone(), kv.clone()));

	let device = match gistsync::config::device_id(kv.as_ref()).await {
		Ok(device) => device,
		Err(e) => {
			eprintln!("error: {}", e);
			std::process::exit(1);
		}
	};
	let media = Arc::new(ShardSyncer::new(
		gateway.clone(),
		router.clone(),
		crypto.clone(),
		blobs.clone(),
		device,
	));
	let reconciler = Reconciler::new(
		gateway.clone(),
		crypto,
		kv.clone(),
		store.clone(),
		store.clone(),
		blobs,
		media.clone(),
		APP_VERSION,
	);

	match cli.command {
		Command::Sync => print_outcome(reconciler.sync().await),
		Command::Pull => print_outcome(reconciler.pull_from_remote().await),
		Command::Push => print_outcome(reconciler.push_to_remote().await),
		Command::Tasks => print_outcome(reconciler.sync_paged().await),
		Command::Status => {
			let config = match load_config(kv.as_ref()).await {
				Ok(config) => config,
				Err(e) => {
					eprintln!("error: {}", e);
					std::process::exit(1);
				}
			};
			println!("enabled: {}", config.enabled);
			println!("gist: {}", config.gist_id.as_deref().unwrap_or("(none)"));
			match config.last_sync_time {
				Some(t) => println!("last sync: {} ms since epoch", t),
				None => println!("last sync: never"),
			}
			if let Some(gist_id) = config.gist_id {
				if media.router().ensure_loaded(&gist_id).await.is_ok() {
					if let Ok(stats) = media.router().stats().await {
						println!(
							"media: {} files / {} bytes across {} shards, {} tombstones",
							stats.file_count, stats.total_size, stats.shard_count, stats.tombstone_count,
						);
					}
				}
			}
		}
		Command::Token { command } => match command {
			TokenCommand::Set { token } => match tokens.set(&token).await {
				Ok(()) => println!("token stored"),
				Err(e) => {
					eprintln!("error: {}", e);
					std::process::exit(1);
				}
			},
			TokenCommand::Check => match gateway.validate_token().await {
				Ok(probe) => {
					println!("token ok: {} (gists: {})", probe.login, probe.can_read_gists)
				}
				Err(e) => {
					eprintln!("token invalid: {}", e);
					std::process::exit(1);
				}
			},
			TokenCommand::Clear => match tokens.clear().await {
				Ok(()) => println!("token cleared"),
				Err(e) => {
					eprintln!("error: {}", e);
					std::process::exit(1);
				}
			},
		},
		Command::Password { command } => match command {
			PasswordCommand::Set { passphrase } => {
				match reconciler.passwords().set(&passphrase).await {
					Ok(()) => println!("passphrase stored"),
					Err(e) => {
						eprintln!("error: {}", e);
						std::process::exit(1);
					}
				}
			}
			PasswordCommand::Clear => match reconciler.passwords().clear().await {
				Ok(()) => println!("passphrase cleared"),
				Err(e) => {
					eprintln!("error: {}", e);
					std::process::exit(1);
				}
			},
		},
		Command::Gist { command } => {
			let result = match command {
				GistCommand::Create => reconciler.create_new_gist().await.map(|id| {
					println!("created {}", id);
				}),
				GistCommand::Switch { id } => reconciler.switch_to_gist(&id).await.map(|_| {
					println!("switched to {}", id);
				}),
				GistCommand::Delete { id } => reconciler.delete_gist(&id).await.map(|_| {
					println!("deleted {}", id);
				}),
				GistCommand::Disconnect => reconciler.disconnect().await.map(|_| {
					println!("disconnected");
				}),
				GistCommand::Reset => reconciler.reset().await.map(|_| {
					println!("reset");
				}),
			};
			if let Err(e) = result {
				eprintln!("error: {}", e);
				std::process::exit(1);
			}
		}
		Command::Trash { command } => match command {
			TrashCommand::List => match reconciler.get_deleted_items().await {
				Ok(items) => {
					for item in items {
						println!(
							"{:?}\t{}\t{}\tdeleted_at={} remaining_ms={}",
							item.item_type,
							item.id,
							item.name,
							item.deleted_at,
							item.retention_remaining_ms,
						);
					}
				}
				Err(e) => {
					eprintln!("error: {}", e);
					std::process::exit(1);
				}
			},
			TrashCommand::Restore { kind, id } => {
				let item_type = match kind.as_str() {
					"board" => DeletedItemType::Board,
					"media" => DeletedItemType::Media,
					other => {
						eprintln!("error: unknown kind '{}', expected board or media", other);
						std::process::exit(1);
					}
				};
				match reconciler.restore_item(item_type, &id).await {
					Ok(()) => println!("restored {}", id),
					Err(e) => {
						eprintln!("error: {}", e);
						std::process::exit(1);
					}
				}
			}
			TrashCommand::Purge => match reconciler.empty_recycle_bin().await {
				Ok(n) => println!("purged {} items", n),
				Err(e) => {
					eprintln!("error: {}", e);
					std::process::exit(1);
				}
			},
		},
		Command::Media { command } => {
			let config = match load_config(kv.as_ref()).await {
				Ok(config) => config,
				Err(e) => {
					eprintln!("error: {}", e);
					std::process::exit(1);
				}
			};
			let gist_id = match config.gist_id {
				Some(id) => id,
				None => {
					eprintln!("error: no sync Gist configured");
					std::process::exit(1);
				}
			};
			if let Err(e) = media.router().ensure_loaded(&gist_id).await {
				eprintln!("error: {}", e);
				std::process::exit(1);
			}
			match command {
				MediaCommand::Validate => match media.validate_shards().await {
					Ok(issues) if issues.is_empty() => println!("all shards consistent"),
					Ok(issues) => {
						for issue in issues {
							println!("{:?}", issue);
						}
					}
					Err(e) => {
						eprintln!("error: {}", e);
						std::process::exit(1);
					}
				},
				MediaCommand::Repair => match media.repair_orphan_files().await {
					Ok(n) => println!("repaired {} orphan files", n),
					Err(e) => {
						eprintln!("error: {}", e);
						std::process::exit(1);
					}
				},
				MediaCommand::Cleanup => match media.cleanup_expired_tombstones().await {
					Ok(n) => println!("removed {} expired media files", n),
					Err(e) => {
						eprintln!("error: {}", e);
						std::process::exit(1);
					}
				},
			}
		}
	}
}

// vim: ts=4

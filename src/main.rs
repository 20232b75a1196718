use clap::{Arg, ArgAction, ArgMatches, Command};
use hybrid_cache::{
    config::Config,
    data_provider::{DataProvider, LocalDataProvider, ReadOutcome},
    http_backend::backends_from_config,
    listing::{ListEntry, ListPage, LocalPages},
    logging::init_logging,
    meta_store::JsonMetaStore,
    mountpoint::{ContentType, Mountpoints},
    object_attrs::{Checksum, ChecksumType, ObjectAttrs},
    page_iter::{LocalPageIterator, PageBound},
    page_pool::Page,
    record::LocalStore,
    registry::RecordRegistry,
    remote_check::RemoteReconciler,
    CacheError, Result,
};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

fn build_cli() -> Command {
    let bucket = Arg::new("bucket").required(true).value_name("BUCKET");
    let object = Arg::new("object").required(true).value_name("OBJECT");
    let prefix = Arg::new("prefix")
        .long("prefix")
        .value_name("PREFIX")
        .default_value("")
        .help("Only objects whose name starts with PREFIX");

    Command::new("hybrid-cache")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Disk-resident object cache in front of remote object stores")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Configuration file path"),
        )
        .subcommand(
            Command::new("get")
                .about("Stream an object to stdout, serving the local copy when valid")
                .arg(bucket.clone())
                .arg(object.clone())
                .arg(
                    Arg::new("latest")
                        .long("latest")
                        .action(ArgAction::SetTrue)
                        .help("Check the remote version before serving a local copy"),
                ),
        )
        .subcommand(
            Command::new("put")
                .about("Populate the local cache with a file's contents")
                .arg(bucket.clone())
                .arg(object.clone())
                .arg(Arg::new("file").required(true).value_name("FILE"))
                .arg(
                    Arg::new("version")
                        .long("version")
                        .value_name("VERSION")
                        .help("Remote version the bytes correspond to"),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Compare a cached object against the remote backend")
                .arg(bucket.clone())
                .arg(object),
        )
        .subcommand(
            Command::new("ls-local")
                .about("List objects cached on local mountpoints")
                .arg(bucket.clone())
                .arg(prefix.clone()),
        )
        .subcommand(
            Command::new("ghosts")
                .about("List cached objects missing from a remote listing")
                .arg(bucket)
                .arg(
                    Arg::new("listing")
                        .required(true)
                        .value_name("FILE")
                        .help("Sorted remote object names, one per line"),
                )
                .arg(prefix),
        )
}

fn arg<'a>(matches: &'a ArgMatches, id: &str) -> &'a str {
    matches.get_one::<String>(id).map(String::as_str).unwrap_or_default()
}

fn open_store(config: &Config) -> Result<Arc<LocalStore>> {
    let mountpoints = Mountpoints::new(config.mountpoints.iter().cloned())?;
    Ok(Arc::new(LocalStore::new(
        mountpoints,
        Arc::new(JsonMetaStore::new()),
        RecordRegistry::new(config.registry.clone()),
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let config = Config::load(matches.get_one::<String>("config").map(Path::new))?;
    let _log_guard = init_logging(&config.logging)?;

    info!(
        "Starting hybrid-cache: version={}, built={}",
        env!("BUILD_VERSION"),
        env!("BUILD_TIMESTAMP")
    );

    let store = open_store(&config)?;
    let backends = Arc::new(backends_from_config(&config.backends));

    match matches.subcommand() {
        Some(("get", sub)) => {
            let bck = Arc::new(config.bucket(arg(sub, "bucket"))?.clone());
            let mut record = store.record(bck, arg(sub, "object"))?;
            let provider = LocalDataProvider::new(backends);
            match provider.reader(&mut record, sub.get_flag("latest")).await? {
                ReadOutcome::Ready {
                    mut reader,
                    attrs,
                    source,
                } => {
                    debug!("Serving {} from {:?}: size={}", record, source, attrs.size);
                    let mut stdout = tokio::io::stdout();
                    let copied = tokio::io::copy(&mut reader, &mut stdout).await;
                    let closed = reader.close();
                    copied?;
                    closed?;
                    stdout.flush().await?;
                }
                ReadOutcome::Skip => {
                    eprintln!("{}: not found", record);
                }
            }
        }
        Some(("put", sub)) => {
            let bck = Arc::new(config.bucket(arg(sub, "bucket"))?.clone());
            let data = tokio::fs::read(arg(sub, "file")).await?;
            let mut attrs = ObjectAttrs::new(data.len() as u64)
                .with_checksum(Checksum::new(
                    ChecksumType::Blake3,
                    blake3::hash(&data).to_hex().to_string(),
                ))
                .with_atime(SystemTime::now());
            if let Some(version) = sub.get_one::<String>("version") {
                attrs = attrs.with_version(version.as_str());
            }
            let mut record = store.record(bck, arg(sub, "object"))?;
            let guard = record.lock(true).await;
            record.write_local(&data, attrs, &guard).await?;
            guard.unlock();
            info!("Cached {}: size={}, path={:?}", record, data.len(), record.fqn());
        }
        Some(("check", sub)) => {
            let bck = Arc::new(config.bucket(arg(sub, "bucket"))?.clone());
            let mut record = store.record(bck, arg(sub, "object"))?;
            let mut guard = record.lock(false).await;
            record.load(true, Some(&guard)).await?;
            let reconciler = RemoteReconciler::new(backends);
            let equal = reconciler.check_remote_md(&mut record, &mut guard).await?;
            guard.unlock();
            println!("{}\t{}", record, if equal { "current" } else { "stale" });
        }
        Some(("ls-local", sub)) => {
            let bck = config.bucket(arg(sub, "bucket"))?;
            let mut page = Page::new();
            for mp in store.mountpoints().avail() {
                let mut it = LocalPageIterator::new(
                    mp.make_path_ct(bck, ContentType::Object),
                    arg(sub, "prefix"),
                );
                if let Err(e) = it.next(&PageBound::AllPages, &mut page) {
                    warn!(mountpoint = ?mp.path(), error = %e, "skipping mountpoint");
                }
            }
            let mut entries: Vec<_> = page.into_iter().collect();
            entries.sort_unstable();
            for (name, size) in entries {
                println!("{}\t{}", name, size);
            }
        }
        Some(("ghosts", sub)) => {
            let bck = Arc::new(config.bucket(arg(sub, "bucket"))?.clone());
            let listing = tokio::fs::read_to_string(arg(sub, "listing")).await?;
            let remote: Vec<ListEntry> = listing
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|name| ListEntry::new(name, 0))
                .collect();

            let mut lpis = LocalPages::new(&store, bck, arg(sub, "prefix"), &config.listing);
            let mut out = ListPage::new();
            let mut pages = remote.chunks(config.listing.page_size).peekable();
            if pages.peek().is_none() {
                lpis.reconcile(&[], &mut out, true);
            }
            while let Some(page) = pages.next() {
                let last = pages.peek().is_none();
                lpis.reconcile(page, &mut out, last);
            }
            for en in &out.entries {
                println!("{}\t{}", en.name, en.size);
            }
        }
        _ => {
            return Err(CacheError::InvalidRequest("unknown command".to_string()));
        }
    }

    Ok(())
}

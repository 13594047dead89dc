//! Command line interface: `init`, `store serve` and `query plumbing`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context as _, Result};
use cid::Cid;
use clap::{Args, Parser, Subcommand, ValueEnum};
use godless_crdt::{Identity, Link};
use godless_query::Query;
use godless_store::MemStore;
use tracing::error;

use crate::api::{ReflectionType, Request};
use crate::client::Client;
use crate::config::Config;
use crate::node::Node;

#[derive(Parser, Debug)]
#[command(name = "godless", version, about = "A peer-to-peer database over a content-addressed store", long_about = None)]
pub struct Cli {
    /// Config file path; defaults to ~/.godless/config.json.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate crypto keys and write the config file.
    Init,
    /// The godless data store.
    Store(StoreArgs),
    /// Godless client commands.
    Query(QueryArgs),
}

#[derive(Args, Debug)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub command: StoreCommands,
}

#[derive(Subcommand, Debug)]
pub enum StoreCommands {
    /// Run a godless node.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Web service bind address.
    #[arg(long)]
    pub address: Option<SocketAddr>,
    /// Comma separated list of pubsub topics.
    #[arg(long, value_delimiter = ',')]
    pub topics: Vec<String>,
    /// Seconds between replications.
    #[arg(long)]
    pub interval: Option<u64>,
    /// Index hash to load on startup.
    #[arg(long)]
    pub hash: Option<String>,
    /// Crash if the content store is unreachable at startup.
    #[arg(long)]
    pub early: bool,
    /// Number of simultaneous queries.
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[command(subcommand)]
    pub command: QueryCommands,
}

#[derive(Subcommand, Debug)]
pub enum QueryCommands {
    /// Low level client for godless servers.
    Plumbing(PlumbingArgs),
}

#[derive(Args, Debug)]
pub struct PlumbingArgs {
    /// Server address, e.g. http://127.0.0.1:8085.
    #[arg(long)]
    pub address: Option<String>,
    /// Godless query text.
    #[arg(long)]
    pub query: Option<String>,
    /// Reflect on server state.
    #[arg(long, value_enum)]
    pub reflect: Option<ReflectArg>,
    /// Replicate a remote index by hash.
    #[arg(long)]
    pub replicate: Option<String>,
    /// Write the binary response to stdout.
    #[arg(long)]
    pub binary: bool,
    /// Compile and validate only; send nothing.
    #[arg(long)]
    pub dryrun: bool,
    /// Print query analysis.
    #[arg(long)]
    pub analyse: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ReflectArg {
    Index,
    Head,
    Namespace,
}

impl From<ReflectArg> for ReflectionType {
    fn from(arg: ReflectArg) -> Self {
        match arg {
            ReflectArg::Index => ReflectionType::Index,
            ReflectArg::Head => ReflectionType::HeadPath,
            ReflectArg::Namespace => ReflectionType::DumpNamespace,
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config_path = self.config.clone();
        match self.command {
            Commands::Init => init(config_path),
            Commands::Store(store) => match store.command {
                StoreCommands::Serve(args) => serve(config_path, args).await,
            },
            Commands::Query(query) => match query.command {
                QueryCommands::Plumbing(args) => plumbing(config_path, args).await,
            },
        }
    }
}

fn init(config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path
        .or_else(Config::default_path)
        .context("cannot locate a home directory; pass --config")?;

    let mut config = Config::load(Some(&path))?;
    let identity = Identity::generate(&mut rand::rngs::OsRng);
    let id = identity.id();
    config.add_identity(&identity);
    config.store(&path)?;

    println!("Generated identity. Peers verify your heads with:\n\n\t{id}\n");
    println!("Config written to {}", path.display());
    Ok(())
}

async fn serve(config_path: Option<PathBuf>, args: ServeArgs) -> Result<()> {
    let mut config = Config::load(config_path.as_deref())?;
    if let Some(address) = args.address {
        config.web_addr = address.to_string();
    }
    if !args.topics.is_empty() {
        config.topics = args.topics;
    }
    if let Some(interval) = args.interval {
        config.replicate_interval_secs = interval;
    }
    if let Some(hash) = args.hash {
        config.index_hash = Some(hash);
    }
    if args.early {
        config.early = true;
    }
    if let Some(limit) = args.limit {
        config.api_query_limit = limit;
    }

    let keys = config.key_store()?;
    let options = config.options()?;
    let addr = options.web_addr;

    // The content store binding shipped here is in-process; a node talking
    // to an external COS plugs its client in through the library API.
    let mut node = Node::new(MemStore::new(), keys, options).await?;
    if let Some(addr) = addr {
        println!("godless listening on http://{addr}");
    }

    let mut errors = node.errors().expect("fresh node");
    let error_log = tokio::spawn(async move {
        while let Some(err) = errors.recv().await {
            error!(%err, "background task error");
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    node.shutdown().await;
    error_log.abort();
    Ok(())
}

async fn plumbing(config_path: Option<PathBuf>, args: PlumbingArgs) -> Result<()> {
    let config = Config::load(config_path.as_deref())?;
    let address = args
        .address
        .clone()
        .unwrap_or_else(|| format!("http://{}", config.web_addr));

    let request = if let Some(source) = &args.query {
        let query = Query::parse(source).context("compiling query")?;
        query.validate().context("validating query")?;
        if args.analyse {
            println!("Query analysis:\n\n{}", query.analyse());
        }
        if args.dryrun {
            return Ok(());
        }
        Request::Query(query)
    } else if let Some(kind) = args.reflect {
        Request::Reflect(kind.into())
    } else if let Some(hash) = &args.replicate {
        let cid = Cid::from_str(hash).context("invalid hash")?;
        Request::Replicate(vec![Link::unsigned(cid)])
    } else {
        bail!("nothing to do: pass --query, --reflect or --replicate");
    };

    let client = Client::new(&address);
    let response = client.send(&request).await?;

    if args.binary {
        use std::io::Write;
        let bytes = postcard::to_allocvec(&response).context("encoding response")?;
        std::io::stdout().write_all(&bytes)?;
    } else {
        print!("{response}");
    }
    Ok(())
}

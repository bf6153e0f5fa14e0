use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use hostres::config::{self, Settings};
use hostres::{ResolveError, Resolver};

#[derive(Parser)]
#[command(name = "hostres", about = "Cached unicast + mDNS host name resolution")]
struct Cli {
    /// YAML 设置文件
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别，RUST_LOG 优先
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 名称 → 地址
    Host {
        name: String,
        #[arg(long)]
        no_cache: bool,
        /// 覆盖默认 DNS 服务器，可重复
        #[arg(long = "server")]
        servers: Vec<String>,
        #[arg(long, default_value_t = 3)]
        attempts: u32,
        /// 单次交换超时（秒）
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
    /// 地址 → 名称
    Ip { addr: String },
    /// host[:port] → 一个可拨号的地址
    Resolve { target: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let settings = match &cli.config {
        Some(path) => config::load_settings(path)?,
        None => Settings::default(),
    };
    let resolver = Resolver::from_settings(&settings)?;
    info!(servers = ?resolver.config().servers, "hostres ready");

    let result = run(&resolver, cli.command).await;
    resolver.close().await;
    if let Err(e) = result {
        eprintln!("hostres: [{}] {:#}", error_label(&e), e);
        std::process::exit(1);
    }
    Ok(())
}

/// 解析错误按类别打标签，其余错误统一为 ERROR
fn error_label(err: &anyhow::Error) -> &'static str {
    ResolveError::classify(err)
        .map(|kind| kind.as_str())
        .unwrap_or("ERROR")
}

async fn run(resolver: &Resolver, command: Command) -> Result<()> {
    match command {
        Command::Host {
            name,
            no_cache,
            servers,
            attempts,
            timeout,
        } => {
            let addrs = if !servers.is_empty() {
                resolver
                    .lookup_host_with_servers(&name, servers, attempts, timeout)
                    .await?
            } else if no_cache {
                resolver.lookup_host_no_cache(&name).await?
            } else {
                resolver.lookup_host(&name).await?
            };
            for addr in addrs {
                println!("{}", addr);
            }
        }
        Command::Ip { addr } => {
            println!("{}", resolver.lookup_ip(&addr).await?);
        }
        Command::Resolve { target } => {
            println!("{}", resolver.resolve(&target).await?);
        }
    }
    Ok(())
}

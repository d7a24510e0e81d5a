use std::path::PathBuf;

use clap::{Parser, Subcommand};

use paxos_http::{client, logger, run};

#[derive(Parser)]
#[command(name = "paxos-http", about = "Single-decree Paxos over HTTP")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the role configured for one node
    Node {
        #[arg(long)]
        node_id: u64,

        /// path to config file
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,
    },
    /// Send decision requests to random proposers and count failures
    Client {
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,

        #[arg(long, default_value = "foo")]
        key: String,

        #[arg(long, default_value = "Hello world!")]
        value: String,

        #[arg(long, default_value_t = 20)]
        requests: usize,
    },
    /// Run a whole cluster in this process over a simulated network
    Local {
        #[arg(long, default_value_t = 3)]
        acceptors: usize,

        #[arg(long, default_value_t = 2)]
        learners: usize,

        #[arg(long, default_value = "x")]
        key: String,

        #[arg(long, default_value = "v1")]
        value: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Node { node_id, config } => run::run_node(node_id, &config).await,
        Command::Client {
            config,
            key,
            value,
            requests,
        } => {
            logger::init_tracing_with("warn");
            client::run_client(&config, &key, &value, requests).await?;
            Ok(())
        }
        Command::Local {
            acceptors,
            learners,
            key,
            value,
        } => {
            run::run_local(acceptors, learners, &key, &value).await?;
            Ok(())
        }
    }
}

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;

use vaultspark_client::events::{ClientEvent, EventType};
use vaultspark_client::{Config, VaultClient};

#[derive(Parser)]
#[command(name = "vaultspark-client", version, about = "VaultSpark wallet client")]
struct Cli {
    /// Directory holding network.ron, tokens.ron and contract.ron
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the wallet session and target network
    Status,
    /// Connect the wallet and switch to the target network
    Connect,
    /// Reset the wallet session
    Disconnect,
    /// Switch the wallet to the target network, adding it if needed
    SwitchNetwork,
    Swap {
        token_in: String,
        token_out: String,
        amount: String,
    },
    Lend {
        token: String,
        amount: String,
    },
    Borrow {
        token: String,
        collateral_token: String,
        amount: String,
        collateral: String,
    },
    /// Withdraw a lend position by index
    Withdraw {
        index: u64,
    },
    /// Repay a borrow position by index
    Repay {
        index: u64,
        amount: String,
        /// Repayment token (defaults to the native asset)
        #[arg(long)]
        token: Option<String>,
    },
    /// Expected output of a swap
    Quote {
        token_in: String,
        token_out: String,
        amount: String,
    },
    /// Lend and borrow positions for an address (defaults to the connected account)
    Positions {
        #[arg(long)]
        user: Option<String>,
    },
    /// Collateral needed for a borrow amount
    Collateral {
        amount: String,
        #[arg(long, default_value = "USDT")]
        token: String,
    },
    /// Print session changes and client events until Ctrl-C
    Watch,
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => log::error!("Failed to serialize output: {}", e),
    }
}

fn print_notifications(rx: &mut broadcast::Receiver<ClientEvent>) {
    while let Ok(event) = rx.try_recv() {
        if event.is(EventType::Notification) {
            eprintln!(
                "[{}] {}",
                event.data["level"].as_str().unwrap_or("info"),
                event.data["message"].as_str().unwrap_or_default()
            );
        }
    }
}

/// Reuse an authorized session when there is one, otherwise prompt
async fn ensure_session(client: &VaultClient) -> bool {
    if client.restore().await.is_some() {
        return true;
    }
    client.connect().await.is_some()
}

async fn watch(client: &VaultClient) {
    let mut session = client.session();
    let mut events = client.subscribe();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    print_json(&session.snapshot());
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Shutting down watch");
                break;
            }
            changed = session.changed() => match changed {
                Ok(snapshot) => print_json(&snapshot),
                Err(_) => break,
            },
            event = events.recv() => match event {
                Ok(event) => print_json(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Dropped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn run(client: &VaultClient, command: Command) -> bool {
    match command {
        Command::Status => {
            client.restore().await;
            print_json(&serde_json::json!({
                "session": client.session().snapshot(),
                "on_target_network": client.session().snapshot().is_on_network(client.network()),
                "network": client.network(),
                "tokens": client.tokens().symbols(),
            }));
            true
        }
        Command::Connect => match client.connect().await {
            Some(session) => {
                print_json(&session);
                true
            }
            None => false,
        },
        Command::Disconnect => {
            client.restore().await;
            client.disconnect();
            print_json(&client.session().snapshot());
            true
        }
        Command::SwitchNetwork => {
            ensure_session(client).await && client.switch_network().await.is_some()
        }
        Command::Swap {
            token_in,
            token_out,
            amount,
        } => {
            if !ensure_session(client).await {
                return false;
            }
            client
                .swap(&token_in, &token_out, &amount)
                .await
                .map(|o| print_json(&o))
                .is_some()
        }
        Command::Lend { token, amount } => {
            if !ensure_session(client).await {
                return false;
            }
            client
                .lend(&token, &amount)
                .await
                .map(|o| print_json(&o))
                .is_some()
        }
        Command::Borrow {
            token,
            collateral_token,
            amount,
            collateral,
        } => {
            if !ensure_session(client).await {
                return false;
            }
            client
                .borrow(&token, &collateral_token, &amount, &collateral)
                .await
                .map(|o| print_json(&o))
                .is_some()
        }
        Command::Withdraw { index } => {
            if !ensure_session(client).await {
                return false;
            }
            client.withdraw(index).await.map(|o| print_json(&o)).is_some()
        }
        Command::Repay {
            index,
            amount,
            token,
        } => {
            if !ensure_session(client).await {
                return false;
            }
            client
                .repay(index, &amount, token.as_deref())
                .await
                .map(|o| print_json(&o))
                .is_some()
        }
        Command::Quote {
            token_in,
            token_out,
            amount,
        } => match client.quote(&token_in, &token_out, &amount).await {
            Some(out) => {
                println!("{} {} -> {} {}", amount, token_in, out, token_out);
                true
            }
            None => false,
        },
        Command::Positions { user } => {
            if user.is_none() {
                client.restore().await;
            }
            let lend = client.lend_positions(user.as_deref()).await;
            let borrow = client.borrow_positions(user.as_deref()).await;
            match (lend, borrow) {
                (Some(lend), Some(borrow)) => {
                    print_json(&serde_json::json!({ "lend": lend, "borrow": borrow }));
                    true
                }
                _ => false,
            }
        }
        Command::Collateral { amount, token } => match client.collateral_needed(&token, &amount) {
            Some(needed) => {
                println!("{} {} needs {} collateral", amount, token, needed);
                true
            }
            None => false,
        },
        Command::Watch => {
            if !ensure_session(client).await {
                return false;
            }
            watch(client).await;
            true
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };
    if let Some(dir) = cli.config_dir {
        config.config_dir = dir;
    }
    log::debug!("{:?}", config);

    let client = match VaultClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let mut notifications = client.subscribe();
    let ok = run(&client, cli.command).await;
    print_notifications(&mut notifications);

    if !ok {
        std::process::exit(1);
    }
}

// offpay - command line wallet composing the peer transport and the offline ledger

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use offpay::intent::PaymentIntent;
use offpay::ledger::{Direction, LedgerConfig, LedgerError, OfflineLedger};
use offpay::logging::{init_logging, LogFormat};
use offpay::transport::{
    InboundEvent, PeerAddress, TcpTransport, Transport, TransportConfig, SERVICE_PORT,
};
use rust_decimal::Decimal;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "offpay", version, about = "Offline peer-to-peer payments")]
struct Cli {
    /// Directory holding the wallet database
    #[arg(long, env = "OFFPAY_STORE", default_value = "offpay-wallet")]
    store: PathBuf,

    /// Settled balance assumed before anything is stored
    #[arg(long, env = "OFFPAY_STARTING_ALLOWANCE", default_value = "1000")]
    starting_allowance: Decimal,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "OFFPAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// "pretty" or "json"
    #[arg(long, env = "OFFPAY_LOG_FORMAT", default_value = "pretty")]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait for inbound payments
    Listen {
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        #[arg(long, default_value_t = SERVICE_PORT)]
        port: u16,
        /// Record every inbound payment as a credit without asking
        #[arg(long)]
        auto_accept: bool,
    },
    /// Send a payment to a peer (PIN required)
    Send {
        /// Peer address as host:port
        #[arg(long)]
        peer: String,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        pin: String,
        /// Name the receiver sees
        #[arg(long, env = "OFFPAY_LABEL", default_value = "offpay")]
        label: String,
        #[arg(long, default_value_t = 10_000)]
        connect_timeout_ms: u64,
    },
    /// Show settled and available balance
    Balance,
    /// Fold all pending entries into the settled balance
    Settle,
    /// Set the sending PIN (4 digits)
    SetPin {
        #[arg(long)]
        pin: String,
    },
    /// List every ledger entry
    History,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, LogFormat::from_str_lossy(&cli.log_format));

    let config = LedgerConfig::new().with_starting_allowance(cli.starting_allowance);
    let ledger = OfflineLedger::open(&cli.store, config)
        .with_context(|| format!("opening wallet at {}", cli.store.display()))?;

    match cli.command {
        Command::Listen {
            bind,
            port,
            auto_accept,
        } => listen(&ledger, bind, port, auto_accept).await,
        Command::Send {
            peer,
            amount,
            pin,
            label,
            connect_timeout_ms,
        } => send(&ledger, &peer, amount, &pin, &label, connect_timeout_ms).await,
        Command::Balance => {
            let state = ledger.state();
            let available = state
                .available_balance()
                .ok_or(LedgerError::BalanceOverflow)?;
            println!("settled:   {}", state.settled_balance());
            println!("available: {}", available);
            println!("pending:   {}", state.pending_count());
            Ok(())
        }
        Command::Settle => {
            let count = ledger.settle()?;
            println!("settled {} entries, balance {}", count, ledger.settled_balance());
            Ok(())
        }
        Command::SetPin { pin } => {
            ledger.set_pin(&pin)?;
            println!("PIN set");
            Ok(())
        }
        Command::History => {
            for entry in ledger.entries() {
                println!(
                    "{}  {:<6}  {:>10}  {:?}  {}",
                    entry.created_at().to_rfc3339(),
                    entry.direction(),
                    entry.amount(),
                    entry.status(),
                    entry.id()
                );
            }
            Ok(())
        }
    }
}

async fn listen(ledger: &OfflineLedger, bind: String, port: u16, auto_accept: bool) -> Result<()> {
    let transport = TcpTransport::new(
        TransportConfig::new()
            .with_bind_address(&bind)
            .with_bind_port(port),
    );
    let (tx, mut rx) = mpsc::channel(32);
    transport.start_listening(tx).await?;
    println!("listening on {}:{} (ctrl-c to stop)", bind, port);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Some(InboundEvent::Received { from, message, .. }) => {
                    let intent = PaymentIntent::parse(&message);
                    println!("{} ({}) wants to send {}", intent.sender_label(), from, intent.amount());

                    // Further inbound messages wait in the channel until this one is answered
                    let accepted = if auto_accept {
                        true
                    } else {
                        println!("accept? [y/N]");
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => break,
                            line = stdin.next_line() => {
                                matches!(line?, Some(line) if line.trim().eq_ignore_ascii_case("y"))
                            }
                        }
                    };

                    if !accepted {
                        println!("declined");
                        continue;
                    }
                    match ledger.add_pending_entry(intent.amount(), Direction::Credit) {
                        Ok(entry) => {
                            info!(id = %entry.id(), amount = %entry.amount(), "credit recorded");
                            println!("received {} (pending), available {}", entry.amount(), ledger.available_balance()?);
                        }
                        Err(LedgerError::InvalidAmount(amount)) => {
                            warn!(%amount, %from, "inbound amount rejected");
                            println!("rejected: amount {} cannot be recorded", amount);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Some(InboundEvent::AcceptFailed { error }) => {
                    warn!(%error, "listener error, retrying");
                }
                None => break,
            },
        }
    }

    transport.stop_listening().await;
    Ok(())
}

async fn send(
    ledger: &OfflineLedger,
    peer: &str,
    amount: Decimal,
    pin: &str,
    label: &str,
    connect_timeout_ms: u64,
) -> Result<()> {
    match ledger.verify_pin(pin) {
        Ok(true) => {}
        Ok(false) => bail!("incorrect PIN"),
        Err(LedgerError::PinNotSet) => bail!("no PIN set, run `offpay set-pin` first"),
        Err(e) => return Err(e.into()),
    }

    if amount <= Decimal::ZERO {
        bail!("amount must be positive");
    }
    let available = ledger.available_balance()?;
    if amount > available {
        bail!("insufficient balance: available {}, requested {}", available, amount);
    }

    let peer: PeerAddress = peer.parse()?;
    let transport = TcpTransport::new(TransportConfig::new().with_connect_timeout_ms(connect_timeout_ms));
    let intent = PaymentIntent::new(label, amount);

    let receipt = transport.send(&peer, &intent.to_message()).await?;
    let entry = ledger.add_pending_entry(amount, Direction::Debit)?;
    info!(id = %entry.id(), elapsed = ?receipt.elapsed, "debit recorded");
    println!("sent {} to {} (pending), available {}", amount, peer, ledger.available_balance()?);
    Ok(())
}

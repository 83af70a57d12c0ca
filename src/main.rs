use clap::{Parser, Subcommand};
use medipay::application::coordinator::{ConfirmOutcome, InitiateOutcome, PaymentCoordinator};
use medipay::application::poller::{PollerConfig, PollerStatus};
use medipay::domain::invoice::{Amount, BillId, PaymentMethod};
use medipay::domain::ports::DynBillingApi;
use medipay::events::SettlementEventBus;
use medipay::infrastructure::http::HttpBillingClient;
use medipay::infrastructure::qr::{QrConfig, StaticQrIssuer};
use miette::{IntoDiagnostic, Result, miette};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the billing service
    #[arg(long, default_value = "http://localhost:8080")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show an invoice
    Show { bill_id: u64 },
    /// Settle an invoice with an operator-confirmed method (cash or card)
    Pay {
        bill_id: u64,
        amount: Decimal,
        method: String,
    },
    /// Prepare a bank-transfer reference and wait for confirmation
    Transfer {
        bill_id: u64,
        amount: Decimal,

        /// Seconds between confirmation checks
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,

        /// Ceiling on confirmation checks before giving up
        #[arg(long, default_value_t = 30)]
        max_attempts: u32,

        /// Receiving bank BIN
        #[arg(long)]
        bank_bin: Option<String>,

        /// Receiving account number
        #[arg(long)]
        account_number: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let billing: DynBillingApi = Arc::new(HttpBillingClient::new(&cli.base_url));

    match cli.command {
        Command::Show { bill_id } => {
            let invoice = billing.get_by_id(BillId(bill_id)).await.into_diagnostic()?;
            println!("{}", serde_json::to_string_pretty(&invoice).into_diagnostic()?);
        }
        Command::Pay {
            bill_id,
            amount,
            method,
        } => {
            let method = PaymentMethod::from_str(&method).into_diagnostic()?;
            if !method.is_operator_confirmed() {
                return Err(miette!("use the transfer command for bank transfers"));
            }

            let events = SettlementEventBus::new();
            let coordinator = PaymentCoordinator::new(
                billing.clone(),
                Arc::new(StaticQrIssuer::new(QrConfig::default())),
                events,
                PollerConfig::default(),
            );

            let invoice = billing.get_by_id(BillId(bill_id)).await.into_diagnostic()?;
            let amount = Amount::new(amount).into_diagnostic()?;
            match coordinator
                .initiate(&invoice, method, amount)
                .await
                .into_diagnostic()?
            {
                InitiateOutcome::AlreadySettled => {
                    println!("Bill {bill_id} has nothing remaining; no payment was made.");
                }
                InitiateOutcome::Settled(updated) => {
                    println!(
                        "Settled {amount} by {method}; remaining {}",
                        updated.remaining_amount()
                    );
                }
                InitiateOutcome::AwaitingTransfer(_) => unreachable!("method is not a transfer"),
            }
        }
        Command::Transfer {
            bill_id,
            amount,
            interval_secs,
            max_attempts,
            bank_bin,
            account_number,
        } => {
            let mut qr_config = QrConfig::default();
            if let Some(bin) = bank_bin {
                qr_config.bank_bin = bin;
            }
            if let Some(account) = account_number {
                qr_config.account_number = account;
            }

            let events = SettlementEventBus::new();
            let mut settlements = events.subscribe();
            let coordinator = PaymentCoordinator::new(
                billing.clone(),
                Arc::new(StaticQrIssuer::new(qr_config)),
                events,
                PollerConfig {
                    interval: Duration::from_secs(interval_secs),
                    max_attempts,
                },
            );

            let invoice = billing.get_by_id(BillId(bill_id)).await.into_diagnostic()?;
            let amount = Amount::new(amount).into_diagnostic()?;
            let outcome = coordinator
                .initiate(&invoice, PaymentMethod::Transfer, amount)
                .await
                .into_diagnostic()?;

            let reference = match outcome {
                InitiateOutcome::AlreadySettled => {
                    println!("Bill {bill_id} has nothing remaining; no payment needed.");
                    return Ok(());
                }
                InitiateOutcome::AwaitingTransfer(reference) => reference,
                InitiateOutcome::Settled(_) => unreachable!("transfers settle asynchronously"),
            };

            println!("Show this reference to the patient:");
            println!("  {reference}");

            let handle = match coordinator.confirm(&invoice).await.into_diagnostic()? {
                ConfirmOutcome::Confirmed(_) => {
                    println!("Transfer already received; bill {bill_id} is settled.");
                    return Ok(());
                }
                ConfirmOutcome::Polling(handle) | ConfirmOutcome::AlreadyPolling(handle) => handle,
            };

            println!(
                "Waiting for the transfer to land (checking every {interval_secs}s, up to {max_attempts} times; Ctrl-C to stop)..."
            );
            let status = tokio::select! {
                status = handle.wait() => status,
                _ = tokio::signal::ctrl_c() => {
                    coordinator.cancel_confirmation(invoice.id);
                    PollerStatus::Cancelled
                }
            };

            match status {
                PollerStatus::Succeeded => {
                    if let Ok(event) = settlements.try_recv() {
                        println!(
                            "Transfer confirmed: bill {} settled {} by {}.",
                            event.bill_id, event.amount, event.payment_method
                        );
                    } else {
                        println!("Transfer confirmed: bill {bill_id} is settled.");
                    }
                }
                PollerStatus::TimedOut => {
                    println!(
                        "Transfer not confirmed after {} checks. The invoice remains payable: re-run this command, switch method, or contact support.",
                        handle.attempts()
                    );
                }
                PollerStatus::Cancelled => {
                    println!("Confirmation stopped; no further checks will run.");
                }
                PollerStatus::Idle | PollerStatus::Active => unreachable!("wait returns terminal states"),
            }
        }
    }

    Ok(())
}

use medipay::application::coordinator::{ConfirmOutcome, InitiateOutcome, PaymentCoordinator};
use medipay::application::poller::{PollerConfig, PollerStatus};
use medipay::domain::invoice::{Amount, BillId, Invoice, PaymentMethod, PaymentStatus};
use medipay::domain::ports::BillingApi;
use medipay::events::SettlementEventBus;
use medipay::infrastructure::in_memory::InMemoryBillingService;
use medipay::infrastructure::qr::{QrConfig, StaticQrIssuer};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

struct Fixture {
    service: Arc<InMemoryBillingService>,
    coordinator: PaymentCoordinator,
    settlements: tokio::sync::broadcast::Receiver<medipay::events::SettlementEvent>,
}

async fn fixture(total: rust_decimal::Decimal, max_attempts: u32) -> (Fixture, Invoice) {
    let service = Arc::new(InMemoryBillingService::new());
    let invoice = Invoice::new(BillId(1), total);
    service.insert(invoice.clone()).await;

    let events = SettlementEventBus::new();
    let settlements = events.subscribe();
    let coordinator = PaymentCoordinator::new(
        service.clone(),
        Arc::new(StaticQrIssuer::new(QrConfig::default())),
        events,
        PollerConfig {
            interval: Duration::from_secs(10),
            max_attempts,
        },
    );

    (
        Fixture {
            service,
            coordinator,
            settlements,
        },
        invoice,
    )
}

// Transfer confirmed on the third poll attempt: the poller succeeds and
// exactly one settlement event goes out.
#[tokio::test(start_paused = true)]
async fn test_transfer_confirmed_on_third_attempt() {
    let (mut fx, invoice) = fixture(dec!(500000), 30).await;
    // confirm() itself performs the first authoritative check; the transfer
    // lands on the poller's third attempt, the fourth check overall.
    fx.service.receive_transfer_after_checks(BillId(1), 4).await;

    let outcome = fx
        .coordinator
        .initiate(&invoice, PaymentMethod::Transfer, Amount::new(dec!(500000)).unwrap())
        .await
        .unwrap();
    assert!(matches!(outcome, InitiateOutcome::AwaitingTransfer(_)));

    let ConfirmOutcome::Polling(handle) = fx.coordinator.confirm(&invoice).await.unwrap() else {
        panic!("expected a polling session");
    };

    assert_eq!(handle.wait().await, PollerStatus::Succeeded);
    assert_eq!(handle.attempts(), 3);

    let event = fx.settlements.try_recv().unwrap();
    assert_eq!(event.bill_id, BillId(1));
    assert_eq!(event.amount, dec!(500000));
    assert_eq!(event.payment_method, PaymentMethod::Transfer);
    assert!(matches!(fx.settlements.try_recv(), Err(TryRecvError::Empty)));
}

// Transfer never lands: the poller exhausts its window, nothing is
// published, and the invoice keeps its prior status.
#[tokio::test(start_paused = true)]
async fn test_transfer_never_confirmed_times_out() {
    let (mut fx, invoice) = fixture(dec!(500000), 30).await;

    let ConfirmOutcome::Polling(handle) = fx.coordinator.confirm(&invoice).await.unwrap() else {
        panic!("expected a polling session");
    };

    assert_eq!(handle.wait().await, PollerStatus::TimedOut);
    assert_eq!(handle.attempts(), 30);
    assert!(matches!(fx.settlements.try_recv(), Err(TryRecvError::Empty)));

    let current = fx.service.get_by_id(BillId(1)).await.unwrap();
    assert_eq!(current.payment_status, PaymentStatus::Pending);
    assert_eq!(current.remaining_amount(), dec!(500000));

    // Timeout is not final for the invoice: a new confirmation may start.
    let outcome = fx.coordinator.confirm(&invoice).await.unwrap();
    assert!(matches!(outcome, ConfirmOutcome::Polling(_)));
    fx.coordinator.cancel_confirmation(invoice.id);
}

// Cash settles synchronously: one pay call, no polling session, one event.
#[tokio::test]
async fn test_cash_settles_without_polling() {
    let (mut fx, invoice) = fixture(dec!(200000), 30).await;

    let outcome = fx
        .coordinator
        .initiate(&invoice, PaymentMethod::Cash, Amount::new(dec!(200000)).unwrap())
        .await
        .unwrap();

    let InitiateOutcome::Settled(updated) = outcome else {
        panic!("expected immediate settlement");
    };
    assert!(updated.is_settled());
    assert_eq!(fx.service.pay_count(BillId(1)).await, 1);
    assert_eq!(fx.service.check_count(BillId(1)).await, 0);

    let event = fx.settlements.try_recv().unwrap();
    assert_eq!(event.amount, dec!(200000));
    assert_eq!(event.payment_method, PaymentMethod::Cash);
    assert!(matches!(fx.settlements.try_recv(), Err(TryRecvError::Empty)));
}

// Confirming an already settled invoice is a no-op success: no duplicate
// pay, and at most one event across the invoice's lifetime.
#[tokio::test]
async fn test_repeated_confirmation_of_settled_invoice() {
    let (mut fx, invoice) = fixture(dec!(500000), 30).await;
    fx.service.receive_transfer(BillId(1)).await.unwrap();

    let first = fx.coordinator.confirm(&invoice).await.unwrap();
    assert!(matches!(first, ConfirmOutcome::Confirmed(_)));
    assert_eq!(fx.settlements.try_recv().unwrap().bill_id, BillId(1));

    // The operator clicks confirm again.
    let second = fx.coordinator.confirm(&invoice).await.unwrap();
    assert!(matches!(second, ConfirmOutcome::Confirmed(_)));
    assert!(matches!(fx.settlements.try_recv(), Err(TryRecvError::Empty)));

    // And tries to pay again with a stale snapshot of the paid bill.
    let refreshed = fx.service.get_by_id(BillId(1)).await.unwrap();
    let outcome = fx
        .coordinator
        .initiate(&refreshed, PaymentMethod::Cash, Amount::new(dec!(1)).unwrap())
        .await
        .unwrap();
    assert!(matches!(outcome, InitiateOutcome::AlreadySettled));

    assert_eq!(fx.service.pay_count(BillId(1)).await, 0);
    assert!(matches!(fx.settlements.try_recv(), Err(TryRecvError::Empty)));
    assert!(fx.coordinator.is_fully_settled(BillId(1)));
}

// Arithmetic invariant: after a pay, remaining is what was owed minus what
// was just settled, never negative.
#[tokio::test]
async fn test_remaining_after_partial_payments() {
    let (fx, invoice) = fixture(dec!(500000), 30).await;

    let outcome = fx
        .coordinator
        .initiate(&invoice, PaymentMethod::Card, Amount::new(dec!(150000)).unwrap())
        .await
        .unwrap();
    let InitiateOutcome::Settled(updated) = outcome else {
        panic!("expected settlement");
    };
    assert_eq!(updated.remaining_amount(), dec!(350000));
    assert_eq!(updated.payment_status, PaymentStatus::PartiallyPaid);

    let outcome = fx
        .coordinator
        .initiate(&updated, PaymentMethod::Cash, Amount::new(dec!(350000)).unwrap())
        .await
        .unwrap();
    let InitiateOutcome::Settled(settled) = outcome else {
        panic!("expected settlement");
    };
    assert_eq!(settled.remaining_amount(), dec!(0));
    assert_eq!(settled.payment_status, PaymentStatus::Paid);
}

// Each partial settlement announces itself; the lifetime cap applies once
// the bill is fully paid.
#[tokio::test]
async fn test_partial_settlements_each_publish() {
    let (mut fx, invoice) = fixture(dec!(500000), 30).await;

    let InitiateOutcome::Settled(after_first) = fx
        .coordinator
        .initiate(&invoice, PaymentMethod::Card, Amount::new(dec!(200000)).unwrap())
        .await
        .unwrap()
    else {
        panic!("expected settlement");
    };
    let InitiateOutcome::Settled(_) = fx
        .coordinator
        .initiate(&after_first, PaymentMethod::Cash, Amount::new(dec!(300000)).unwrap())
        .await
        .unwrap()
    else {
        panic!("expected settlement");
    };

    assert_eq!(fx.settlements.try_recv().unwrap().amount, dec!(200000));
    assert_eq!(fx.settlements.try_recv().unwrap().amount, dec!(300000));
    assert!(matches!(fx.settlements.try_recv(), Err(TryRecvError::Empty)));
}

// A transfer that lands while the confirmation view was closed settles
// through the fast path on the next confirmation.
#[tokio::test(start_paused = true)]
async fn test_late_landing_reconciles_on_next_confirm() {
    let (mut fx, invoice) = fixture(dec!(500000), 30).await;

    let ConfirmOutcome::Polling(handle) = fx.coordinator.confirm(&invoice).await.unwrap() else {
        panic!("expected a polling session");
    };
    fx.coordinator.cancel_confirmation(invoice.id);
    assert_eq!(handle.status(), PollerStatus::Cancelled);

    // The transfer lands after the session was torn down.
    fx.service.receive_transfer(BillId(1)).await.unwrap();
    assert!(matches!(fx.settlements.try_recv(), Err(TryRecvError::Empty)));

    let outcome = fx.coordinator.confirm(&invoice).await.unwrap();
    assert!(matches!(outcome, ConfirmOutcome::Confirmed(_)));
    assert_eq!(fx.settlements.try_recv().unwrap().amount, dec!(500000));
}

//! Settlement gateway boundary.
//!
//! Non-cash payments go through an external processor. The trait keeps the
//! reconciliation service testable; the simulated implementation stands in
//! for a real acquirer integration.

use std::time::Duration;

use async_trait::async_trait;

use crate::payment::{PaymentId, PaymentMethod};

/// What the gateway needs to attempt a settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRequest {
    pub payment_id: PaymentId,
    pub transaction_id: String,
    /// Amount in the smallest currency unit.
    pub amount: u64,
    pub method: PaymentMethod,
}

/// Gateway verdict for a single settlement attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled,
    Declined { reason: String },
}

/// External settlement processor.
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    async fn settle(&self, request: &SettlementRequest) -> SettlementOutcome;
}

/// Simulated processor: fixed latency, then a biased coin flip.
///
/// Cash is settled unconditionally; there is no acquirer to decline it.
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    success_rate: f64,
    latency: Duration,
}

impl SimulatedGateway {
    pub fn new(success_rate: f64, latency: Duration) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
            latency,
        }
    }

    /// Always-settle variant for tests that exercise everything but declines.
    pub fn always_settles() -> Self {
        Self::new(1.0, Duration::ZERO)
    }

    /// Always-decline variant for tests of the failure path.
    pub fn always_declines() -> Self {
        Self::new(0.0, Duration::ZERO)
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new(0.95, Duration::from_millis(50))
    }
}

#[async_trait]
impl SettlementGateway for SimulatedGateway {
    async fn settle(&self, request: &SettlementRequest) -> SettlementOutcome {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if request.method == PaymentMethod::Cash {
            return SettlementOutcome::Settled;
        }

        if rand::random::<f64>() < self.success_rate {
            SettlementOutcome::Settled
        } else {
            SettlementOutcome::Declined {
                reason: format!("processor declined transaction {}", request.transaction_id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicops_core::AggregateId;

    fn request(method: PaymentMethod) -> SettlementRequest {
        SettlementRequest {
            payment_id: PaymentId::new(AggregateId::new()),
            transaction_id: "TXN-test".to_string(),
            amount: 2_500,
            method,
        }
    }

    #[tokio::test]
    async fn always_settles_settles() {
        let gateway = SimulatedGateway::always_settles();
        let outcome = gateway.settle(&request(PaymentMethod::CreditCard)).await;
        assert_eq!(outcome, SettlementOutcome::Settled);
    }

    #[tokio::test]
    async fn always_declines_declines_cards_but_not_cash() {
        let gateway = SimulatedGateway::always_declines();

        let outcome = gateway.settle(&request(PaymentMethod::CreditCard)).await;
        assert!(matches!(outcome, SettlementOutcome::Declined { .. }));

        let outcome = gateway.settle(&request(PaymentMethod::Cash)).await;
        assert_eq!(outcome, SettlementOutcome::Settled);
    }
}

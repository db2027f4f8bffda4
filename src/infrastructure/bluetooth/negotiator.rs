//! Characteristic negotiation.
//!
//! Walks the candidate table in priority order and adopts the first
//! characteristic that accepts a subscription. A failing candidate is not
//! fatal; running out of candidates is.

use crate::error::{FailedAttempt, NegotiationError};
use crate::infrastructure::bluetooth::transport::Link;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    /// The characteristic now delivering notifications
    pub active: Uuid,
    /// Higher-priority candidates that were tried first and failed
    pub failed: Vec<FailedAttempt>,
}

pub async fn negotiate(link: &dyn Link, candidates: &[Uuid]) -> Result<Negotiation, NegotiationError> {
    if candidates.is_empty() {
        return Err(NegotiationError::NoCandidates);
    }

    let mut failed = Vec::new();
    for (priority, &characteristic) in candidates.iter().enumerate() {
        match link.subscribe(characteristic).await {
            Ok(()) => {
                info!(%characteristic, priority, "Subscribed to characteristic");
                return Ok(Negotiation {
                    active: characteristic,
                    failed,
                });
            }
            Err(e) => {
                warn!(%characteristic, priority, "Characteristic subscription failed: {}", e);
                failed.push(FailedAttempt {
                    characteristic,
                    error: e,
                });
            }
        }
    }

    error!("All {} candidate characteristics failed", failed.len());
    Err(NegotiationError::Exhausted { attempts: failed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DeviceAddress;
    use crate::infrastructure::bluetooth::mock::{LinkCall, MockTransport};
    use crate::infrastructure::bluetooth::protocol::{
        CSC_MEASUREMENT, CYCLING_POWER_MEASUREMENT, DEFAULT_CANDIDATES, INDOOR_BIKE_DATA,
    };
    use crate::infrastructure::bluetooth::transport::Transport;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_last_candidate_wins_after_two_failures() {
        let transport = MockTransport::new();
        transport.reject_subscribe(INDOOR_BIKE_DATA);
        transport.reject_subscribe(CYCLING_POWER_MEASUREMENT);
        let link = transport
            .connect(&DeviceAddress::new("AA:BB"))
            .await
            .unwrap();

        let negotiation = negotiate(link.as_ref(), &DEFAULT_CANDIDATES).await.unwrap();

        assert_eq!(negotiation.active, CSC_MEASUREMENT);
        assert_eq!(negotiation.failed.len(), 2);
        assert_eq!(negotiation.failed[0].characteristic, INDOOR_BIKE_DATA);
        assert_eq!(negotiation.failed[1].characteristic, CYCLING_POWER_MEASUREMENT);

        logs_assert(|lines: &[&str]| {
            let failures = lines
                .iter()
                .filter(|line| line.contains("Characteristic subscription failed"))
                .count();
            if failures == 2 {
                Ok(())
            } else {
                Err(format!("expected 2 failed attempts logged, saw {}", failures))
            }
        });
    }

    #[tokio::test]
    async fn test_first_success_stops_negotiation() {
        let transport = MockTransport::new();
        let link = transport
            .connect(&DeviceAddress::new("AA:BB"))
            .await
            .unwrap();

        let negotiation = negotiate(link.as_ref(), &DEFAULT_CANDIDATES).await.unwrap();

        assert_eq!(negotiation.active, INDOOR_BIKE_DATA);
        assert!(negotiation.failed.is_empty());
        assert_eq!(
            transport.last_link().calls(),
            vec![LinkCall::Subscribe(INDOOR_BIKE_DATA)]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_reports_every_attempt() {
        let transport = MockTransport::new();
        for uuid in DEFAULT_CANDIDATES {
            transport.reject_subscribe(uuid);
        }
        let link = transport
            .connect(&DeviceAddress::new("AA:BB"))
            .await
            .unwrap();

        match negotiate(link.as_ref(), &DEFAULT_CANDIDATES).await {
            Err(NegotiationError::Exhausted { attempts }) => {
                let tried: Vec<Uuid> = attempts.iter().map(|a| a.characteristic).collect();
                assert_eq!(tried, DEFAULT_CANDIDATES.to_vec());
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_candidate_table() {
        let transport = MockTransport::new();
        let link = transport
            .connect(&DeviceAddress::new("AA:BB"))
            .await
            .unwrap();

        assert_eq!(
            negotiate(link.as_ref(), &[]).await,
            Err(NegotiationError::NoCandidates)
        );
    }
}

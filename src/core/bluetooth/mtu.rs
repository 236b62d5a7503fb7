//! MTU negotiation
//!
//! Binary-searches the widest MTU the link accepts. Each probe depends on
//! the outcome of the previous one, so probes are issued strictly in order.

use log::{debug, info};

use crate::core::bluetooth::constants::{MAX_MTU, MIN_MTU};
use crate::core::bluetooth::stack::BleStack;
use crate::core::bluetooth::types::Mtu;

#[derive(Debug, Clone, Copy)]
pub struct MtuNegotiator {
    min: u16,
    max: u16,
}

impl Default for MtuNegotiator {
    fn default() -> Self {
        Self {
            min: MIN_MTU,
            max: MAX_MTU,
        }
    }
}

impl MtuNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Narrows the search range. Bounds are clamped into `[MIN_MTU, MAX_MTU]`.
    pub fn with_range(min: u16, max: u16) -> Self {
        let min = min.clamp(MIN_MTU, MAX_MTU);
        let max = max.clamp(min, MAX_MTU);
        Self { min, max }
    }

    /// Largest value in range the peer accepts, or the lower bound if it accepts none.
    /// Any probe failure counts as a rejection.
    pub async fn negotiate(&self, stack: &dyn BleStack, device_id: &str) -> Mtu {
        let (mut start, mut end, mut best) = (i32::from(self.min), i32::from(self.max), self.min);
        let mut probes = 0u32;

        while start <= end {
            let mid = start + (end - start) / 2;
            // `mid` lies within [min, max], both u16
            let candidate = mid as u16;
            probes += 1;
            match stack.set_mtu(device_id, candidate).await {
                Ok(()) => {
                    debug!("MTU {} accepted by {}", candidate, device_id);
                    best = candidate;
                    start = mid + 1;
                }
                Err(e) => {
                    debug!("MTU {} rejected by {}: {}", candidate, device_id, e);
                    end = mid - 1;
                }
            }
        }

        info!("Negotiated MTU {} with {} after {} probes", best, device_id, probes);
        Mtu::clamped(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::simulated::{SimulatedPeripheral, SimulatedStack, StackCall};

    async fn negotiate_against(limit: Option<u16>) -> (Mtu, usize) {
        let stack = SimulatedStack::new()
            .with_peripheral(SimulatedPeripheral::printer("P", "Printer").with_mtu_limit(limit));
        stack.connect("P").await.unwrap();
        stack.clear_calls();
        let mtu = MtuNegotiator::new().negotiate(&stack, "P").await;
        let probes = stack
            .calls()
            .iter()
            .filter(|c| matches!(c, StackCall::SetMtu(..)))
            .count();
        (mtu, probes)
    }

    // ceil(log2(511 - 23 + 1))
    const PROBE_BOUND: usize = 9;

    #[tokio::test]
    async fn test_accept_all_yields_max() {
        let (mtu, probes) = negotiate_against(Some(u16::MAX)).await;
        assert_eq!(mtu.get(), 511);
        assert!(probes <= PROBE_BOUND);
    }

    #[tokio::test]
    async fn test_reject_all_yields_min() {
        let (mtu, probes) = negotiate_against(None).await;
        assert_eq!(mtu.get(), 23);
        assert!(probes <= PROBE_BOUND);
    }

    #[tokio::test]
    async fn test_converges_on_peer_limit() {
        let (mtu, probes) = negotiate_against(Some(200)).await;
        assert_eq!(mtu.get(), 200);
        assert!(probes <= PROBE_BOUND, "took {probes} probes");
    }

    #[tokio::test]
    async fn test_every_limit_converges() {
        for limit in [23u16, 24, 100, 247, 255, 256, 510] {
            let (mtu, _) = negotiate_against(Some(limit)).await;
            assert_eq!(mtu.get(), limit);
        }
    }

    #[tokio::test]
    async fn test_custom_range() {
        let stack = SimulatedStack::new()
            .with_peripheral(SimulatedPeripheral::printer("P", "Printer").with_mtu_limit(Some(400)));
        stack.connect("P").await.unwrap();
        let mtu = MtuNegotiator::with_range(23, 247).negotiate(&stack, "P").await;
        assert_eq!(mtu.get(), 247);

        let clamped = MtuNegotiator::with_range(0, 9000);
        assert_eq!((clamped.min, clamped.max), (MIN_MTU, MAX_MTU));
    }
}

//! Chunked payload writes.
//!
//! A payload is cut into MTU-sized chunks and written one at a time. The
//! next chunk is only issued after the previous write was acknowledged.

use log::{debug, info, warn};

use crate::core::bluetooth::error::TransferError;
use crate::core::bluetooth::stack::BleStack;
use crate::core::bluetooth::types::{Mtu, ServiceEndpoint};

/// Number of writes needed for `len` bytes in chunks of `chunk_len`
pub fn chunk_count(len: usize, chunk_len: usize) -> usize {
    len.div_ceil(chunk_len)
}

pub struct ChunkedTransfer;

impl ChunkedTransfer {
    /// Writes `payload` in order. The first failed write aborts the transfer;
    /// nothing is retried here.
    pub async fn send(
        stack: &dyn BleStack,
        device_id: &str,
        endpoint: &ServiceEndpoint,
        payload: &[u8],
        mtu: Mtu,
    ) -> Result<(), TransferError> {
        Self::send_with_chunk_len(stack, device_id, endpoint, payload, mtu.chunk_len()).await
    }

    pub async fn send_with_chunk_len(
        stack: &dyn BleStack,
        device_id: &str,
        endpoint: &ServiceEndpoint,
        payload: &[u8],
        chunk_len: usize,
    ) -> Result<(), TransferError> {
        if chunk_len == 0 {
            return Err(TransferError::EmptyMtu);
        }
        let total = chunk_count(payload.len(), chunk_len);
        info!(
            "Sending {} bytes to {} in {} chunks of up to {} bytes",
            payload.len(),
            device_id,
            total,
            chunk_len
        );

        for (index, chunk) in payload.chunks(chunk_len).enumerate() {
            debug!("Writing chunk {}/{} ({} bytes)", index + 1, total, chunk.len());
            if let Err(source) = stack
                .write_characteristic(
                    device_id,
                    &endpoint.service_id,
                    &endpoint.characteristic_id,
                    chunk,
                )
                .await
            {
                warn!("Chunk {} of {} failed: {}", index, total, source);
                return Err(TransferError::ChunkFailed {
                    index,
                    total,
                    source,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::error::BleError;
    use crate::core::bluetooth::simulated::{
        SimulatedPeripheral, SimulatedStack, UUID_PRINT_SERVICE, UUID_PRINT_WRITE_CHAR,
    };
    use crate::core::bluetooth::types::CharacteristicProperties;

    fn endpoint() -> ServiceEndpoint {
        ServiceEndpoint {
            service_id: UUID_PRINT_SERVICE,
            characteristic_id: UUID_PRINT_WRITE_CHAR,
            properties: CharacteristicProperties {
                write: true,
                ..Default::default()
            },
        }
    }

    async fn printer() -> SimulatedStack {
        let stack = SimulatedStack::new().with_peripheral(SimulatedPeripheral::printer("P", "Printer"));
        stack.connect("P").await.unwrap();
        stack
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 23), 0);
        assert_eq!(chunk_count(1, 23), 1);
        assert_eq!(chunk_count(23, 23), 1);
        assert_eq!(chunk_count(24, 23), 2);
        assert_eq!(chunk_count(1000, 185), 6);
    }

    #[tokio::test]
    async fn test_chunks_cover_payload_in_order() {
        let stack = printer().await;
        let data = payload(1000);
        let mtu = Mtu::new(185).unwrap();
        ChunkedTransfer::send(&stack, "P", &endpoint(), &data, mtu).await.unwrap();

        let writes = stack.writes();
        assert_eq!(writes.len(), chunk_count(data.len(), 185));
        assert!(writes.iter().all(|w| w.len() <= 185));
        assert_eq!(writes.concat(), data);
        assert_eq!(writes.last().map(Vec::len), Some(1000 - 5 * 185));
    }

    #[tokio::test]
    async fn test_empty_payload_writes_nothing() {
        let stack = printer().await;
        ChunkedTransfer::send(&stack, "P", &endpoint(), &[], Mtu::MIN).await.unwrap();
        assert!(stack.writes().is_empty());
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_chunks() {
        let stack = printer().await;
        stack.fail_write_at(2, BleError::transport("writeBLECharacteristicValue:fail"));
        let data = payload(23 * 5);
        let err = ChunkedTransfer::send(&stack, "P", &endpoint(), &data, Mtu::MIN)
            .await
            .unwrap_err();

        match err {
            TransferError::ChunkFailed { index, total, source } => {
                assert_eq!(index, 2);
                assert_eq!(total, 5);
                assert_eq!(source.message(), "writeBLECharacteristicValue:fail");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(stack.writes().len(), 3);
    }

    #[tokio::test]
    async fn test_zero_chunk_len_rejected() {
        let stack = printer().await;
        let err = ChunkedTransfer::send_with_chunk_len(&stack, "P", &endpoint(), &[1, 2, 3], 0)
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::EmptyMtu);
    }
}

// PayloadPool - lock-free payload pool with dual SPSC queues
//
// Implements an object pool using two lock-free SPSC (Single Producer
// Single Consumer) ring buffers so the Bluetooth notification callback
// never allocates. The callback thread and the decode worker each own one
// end of each queue.
//
// Payload flow:
// 1. Callback thread pops an empty payload buffer from the FREE queue
// 2. Callback thread copies the notification bytes into it
// 3. Callback thread pushes the filled buffer to the FILLED queue
// 4. Decode worker pops the filled buffer, decodes it into a SensorSample
// 5. Decode worker clears the buffer and pushes it back to the FREE queue

use rtrb::{Consumer, Producer};

/// Configuration constants for the payload pool
pub const DEFAULT_POOL_SIZE: usize = 64;
pub const DEFAULT_PAYLOAD_CAPACITY: usize = 256;

/// Raw notification payload - pre-allocated byte vector
pub type RawPayload = Vec<u8>;

/// Split pool channels for producer/consumer separation
///
/// Returned by `PayloadPool::new()`; ownership of each end pins which
/// thread may touch which queue.
pub struct PayloadPoolChannels {
    /// Producer for handing filled payloads to the decode worker
    pub filled_producer: Producer<RawPayload>,
    /// Consumer for receiving filled payloads in the decode worker
    pub filled_consumer: Consumer<RawPayload>,
    /// Producer for returning drained payloads from the decode worker
    pub free_producer: Producer<RawPayload>,
    /// Consumer for retrieving empty payloads in the callback thread
    pub free_consumer: Consumer<RawPayload>,
}

/// Lock-free payload pool over dual SPSC ring buffers
///
/// All heap allocation happens at construction; steady-state ingestion
/// recycles the same buffers between the callback thread and the decode
/// worker.
pub struct PayloadPool;

impl PayloadPool {
    /// Create a pool with `pool_size` payload buffers of `capacity` bytes
    ///
    /// # Panics
    /// Panics if `pool_size` or `capacity` is 0
    #[allow(clippy::new_ret_no_self)]
    pub fn new(pool_size: usize, capacity: usize) -> PayloadPoolChannels {
        assert!(pool_size > 0, "pool_size must be greater than 0");
        assert!(capacity > 0, "capacity must be greater than 0");

        let (mut free_producer, free_consumer) = rtrb::RingBuffer::new(pool_size);
        let (filled_producer, filled_consumer) = rtrb::RingBuffer::new(pool_size);

        for _ in 0..pool_size {
            let payload = Vec::with_capacity(capacity);
            free_producer
                .push(payload)
                .expect("Failed to push payload to free queue during initialization");
        }

        PayloadPoolChannels {
            filled_producer,
            filled_consumer,
            free_producer,
            free_consumer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation() {
        let mut channels = PayloadPool::new(8, 128);

        let mut available = 0;
        while channels.free_consumer.pop().is_ok() {
            available += 1;
        }
        assert_eq!(available, 8, "Expected 8 payloads in free queue");
        assert!(
            channels.filled_consumer.pop().is_err(),
            "Filled queue should start empty"
        );
    }

    #[test]
    fn test_payload_capacity() {
        let mut channels = PayloadPool::new(1, 256);
        let payload = channels.free_consumer.pop().expect("one payload in pool");
        assert_eq!(payload.capacity(), 256);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_payload_circulation() {
        let mut channels = PayloadPool::new(4, 64);

        // Callback thread: pop free, fill, push filled
        let mut payload = channels.free_consumer.pop().expect("free payload");
        payload.extend_from_slice(&[1, 2, 3]);
        channels.filled_producer.push(payload).expect("push filled");

        // Decode worker: pop filled, drain, return to free queue
        let mut payload = channels.filled_consumer.pop().expect("filled payload");
        assert_eq!(payload.as_slice(), &[1, 2, 3]);
        payload.clear();
        channels.free_producer.push(payload).expect("return to pool");

        let payload = channels.free_consumer.pop().expect("payload recycled");
        assert!(payload.is_empty());
        assert_eq!(payload.capacity(), 64);
    }

    #[test]
    fn test_exhausted_pool_backpressure() {
        let mut channels = PayloadPool::new(2, 32);

        let a = channels.free_consumer.pop().unwrap();
        let b = channels.free_consumer.pop().unwrap();
        assert!(
            channels.free_consumer.pop().is_err(),
            "Free queue exhausted; callback must drop the notification"
        );

        channels.filled_producer.push(a).unwrap();
        channels.filled_producer.push(b).unwrap();
        assert!(channels.filled_consumer.pop().is_ok());
        assert!(channels.filled_consumer.pop().is_ok());
    }

    #[test]
    fn test_send() {
        fn assert_send<T: Send>() {}
        // Producer and Consumer move between threads; neither is Sync,
        // which is exactly the SPSC contract.
        assert_send::<Producer<RawPayload>>();
        assert_send::<Consumer<RawPayload>>();
        assert_send::<PayloadPoolChannels>();
    }

    #[test]
    #[should_panic(expected = "pool_size must be greater than 0")]
    fn test_zero_pool_size_panics() {
        PayloadPool::new(0, 64);
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn test_zero_capacity_panics() {
        PayloadPool::new(8, 0);
    }
}

use crate::bus::QueueStatus;
use crate::error::BrokerError;

/// Request/response queries against a broker's management interface.
///
/// Every query is bounded by the client's receive timeout; a timeout or a
/// transport failure is reported as [`BrokerError::Unavailable`].
pub trait ManagementClient: Send + Sync {
    fn exchange_exists(&self, exchange: &str) -> Result<bool, BrokerError>;

    fn binding_count(&self, exchange: &str) -> Result<usize, BrokerError>;

    /// Names of the queues bound to `exchange`, without duplicates.
    fn bound_queues(&self, exchange: &str) -> Result<Vec<String>, BrokerError>;

    fn queue_flow_stopped(&self, queue: &str) -> Result<bool, BrokerError>;

    fn queue_depth(&self, queue: &str) -> Result<QueueStatus, BrokerError>;
}

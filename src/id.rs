//! ID generation utilities for warden
//!
//! Provides functions for generating unique identifiers for operations,
//! transactions, and background tasks.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Generate a unique operation ID
///
/// Format: `op-{timestamp_ms}-{random_hex}`
/// Example: `op-1738300800123-a1b2`
pub fn generate_operation_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("op-{}-{:04x}", timestamp, random)
}

/// Generate a unique transaction ID
///
/// Format: `txn-{timestamp_ms}-{random_hex}`
pub fn generate_transaction_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("txn-{}-{:04x}", timestamp, random)
}

/// Generate a unique background task ID
///
/// Format: `task-{timestamp_ms}-{random_hex}`
pub fn generate_task_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("task-{}-{:04x}", timestamp, random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        // Should be after 2020-01-01 and before 2100-01-01
        assert!(ts > 1577836800000); // 2020-01-01
        assert!(ts < 4102444800000); // 2100-01-01
    }

    #[test]
    fn test_generate_operation_id_format() {
        let id = generate_operation_id();
        assert!(id.starts_with("op-"));
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_operation_id_uniqueness() {
        let id1 = generate_operation_id();
        let id2 = generate_operation_id();
        // With random component, should be different
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_generate_transaction_id_format() {
        let id = generate_transaction_id();
        assert!(id.starts_with("txn-"));
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 4);
    }

    #[test]
    fn test_generate_task_id_format() {
        let id = generate_task_id();
        assert!(id.starts_with("task-"));
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }
}

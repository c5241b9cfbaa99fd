// Standardized error codes for the ReliefWatch engine

pub mod validation {
    pub const INVALID_PAYLOAD: &str = "VALIDATION_1001";
    pub const MISSING_REQUIRED_FIELD: &str = "VALIDATION_1002";
    pub const KIND_MISMATCH: &str = "VALIDATION_1003";
}

pub mod storage {
    pub const QUERY_FAILED: &str = "STORAGE_2001";
    pub const QUOTA_EXCEEDED: &str = "STORAGE_2002";
    pub const NOT_FOUND: &str = "STORAGE_2003";
    pub const SERIALIZATION: &str = "STORAGE_2004";
}

pub mod crypto {
    pub const DECRYPTION_FAILED: &str = "CRYPTO_3001";
    pub const KEY_UNAVAILABLE: &str = "CRYPTO_3002";
    pub const OPERATION_FAILED: &str = "CRYPTO_3003";
}

pub mod sync {
    pub const TRANSIENT: &str = "SYNC_4001";
    pub const VERSION_CONFLICT: &str = "SYNC_4002";
    pub const RETRIES_EXHAUSTED: &str = "SYNC_4003";
    pub const INVALID_TRANSITION: &str = "SYNC_4004";
    pub const CANCELLED: &str = "SYNC_4005";
}

pub mod configuration {
    pub const LOAD_FAILED: &str = "CONFIG_5001";
}

pub mod internal {
    pub const UNEXPECTED: &str = "INTERNAL_9001";
}

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global unit id counter
static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an opened unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u64);

impl UnitId {
    pub fn next() -> Self {
        UnitId(NEXT_UNIT_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unit_{}", self.0)
    }
}

/// Transaction isolation levels supported by the relational manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn to_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_sql())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl AccessMode {
    pub fn to_sql(&self) -> &'static str {
        match self {
            AccessMode::ReadWrite => "READ WRITE",
            AccessMode::ReadOnly => "READ ONLY",
        }
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_sql())
    }
}

/// Isolation level and access mode requested for one relational unit.
///
/// Only consulted when a fresh transaction is opened; a nested call that
/// flattens into an outer transaction inherits the outer options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub access: AccessMode,
}

impl TxOptions {
    pub fn new(isolation: IsolationLevel, access: AccessMode) -> Self {
        Self { isolation, access }
    }

    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.access == AccessMode::ReadOnly
    }

    /// Statement that opens a transaction with these options
    ///
    /// # Examples
    ///
    /// ```
    /// use scopedtx::{AccessMode, IsolationLevel, TxOptions};
    ///
    /// let options = TxOptions::new(IsolationLevel::Serializable, AccessMode::ReadOnly);
    /// assert_eq!(options.begin_sql(), "BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY");
    /// ```
    pub fn begin_sql(&self) -> String {
        format!(
            "BEGIN ISOLATION LEVEL {} {}",
            self.isolation.to_sql(),
            self.access.to_sql()
        )
    }
}

impl std::fmt::Display for TxOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.isolation, self.access)
    }
}

/// Lifecycle state of a unit of work
///
/// State transitions:
/// ```text
/// Open ──success──> Committed | Executed
///   │
///   └──failure──> RolledBack | Discarded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Open,
    Committed,
    RolledBack,
    Executed,
    Discarded,
}

impl UnitState {
    pub fn is_open(&self) -> bool {
        matches!(self, UnitState::Open)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitState::Committed | UnitState::Executed)
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitState::Open => write!(f, "OPEN"),
            UnitState::Committed => write!(f, "COMMITTED"),
            UnitState::RolledBack => write!(f, "ROLLED BACK"),
            UnitState::Executed => write!(f, "EXECUTED"),
            UnitState::Discarded => write!(f, "DISCARDED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_ids_are_unique() {
        let a = UnitId::next();
        let b = UnitId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_default_options() {
        let options = TxOptions::default();
        assert_eq!(options.isolation, IsolationLevel::ReadCommitted);
        assert_eq!(options.access, AccessMode::ReadWrite);
        assert!(!options.is_read_only());
        assert_eq!(options.to_string(), "READ COMMITTED READ WRITE");
    }

    #[test]
    fn test_terminal_states() {
        assert!(UnitState::Open.is_open());
        for state in [
            UnitState::Committed,
            UnitState::RolledBack,
            UnitState::Executed,
            UnitState::Discarded,
        ] {
            assert!(state.is_terminal());
        }
        assert!(UnitState::Executed.is_success());
        assert!(!UnitState::Discarded.is_success());
    }
}
